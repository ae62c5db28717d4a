use colored::Colorize;

fn prefix() -> String {
    "[era]".bold().cyan().to_string()
}

/// Print an informational message: [era] message
pub fn info(msg: &str) {
    println!("{} {}", prefix(), msg);
}

/// Print a success message: [era] message (in green)
pub fn success(msg: &str) {
    println!("{} {}", prefix(), msg.green());
}

/// Print an error message: [era] ERROR: message (in red)
pub fn error(msg: &str) {
    eprintln!("{} {}", "[era]".bold().red(), msg.red());
}

/// Print a warning message: [era] message (in yellow)
pub fn warn(msg: &str) {
    println!("{} {}", prefix(), msg.yellow());
}

/// Show an interactive y/N confirmation prompt. Returns true if confirmed.
pub fn confirm(msg: &str) -> bool {
    inquire::Confirm::new(msg).with_default(false).prompt().unwrap_or(false)
}
