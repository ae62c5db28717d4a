use serde::Serialize;

/// Global `--output` selector, mirroring the reference CLI's `table|json` switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

impl OutputFormat {
    pub fn from_str_arg(s: &str) -> Self {
        match s {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Table,
        }
    }
}

/// A flat row a table can print: fixed column headers, one string per cell.
pub trait TableRow {
    fn header() -> Vec<&'static str>;
    fn cells(&self) -> Vec<String>;
}

/// Render a list of rows either as a padded-column table or a JSON array.
pub fn render_list<T: TableRow + Serialize>(rows: &[T], fmt: OutputFormat) {
    match fmt {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(rows).expect("rows always serialize"));
        }
        OutputFormat::Table => {
            if rows.is_empty() {
                return;
            }
            let header = T::header();
            let widths = column_widths(&header, rows);
            print_row(&header.iter().map(|h| h.to_string()).collect::<Vec<_>>(), &widths);
            for row in rows {
                print_row(&row.cells(), &widths);
            }
        }
    }
}

/// Render a single record either as `label: value` lines or pretty JSON.
pub fn render_one<T: Serialize>(value: &T, fmt: OutputFormat) {
    match fmt {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value).expect("value always serializes"));
        }
        OutputFormat::Table => {
            let json = serde_json::to_value(value).expect("value always serializes");
            if let serde_json::Value::Object(map) = json {
                for (key, val) in map {
                    println!("{:<18} {}", format!("{key}:"), render_scalar(&val));
                }
            }
        }
    }
}

fn render_scalar(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

fn column_widths<T: TableRow>(header: &[&'static str], rows: &[T]) -> Vec<usize> {
    let mut widths: Vec<usize> = header.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.cells().iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.len());
            }
        }
    }
    widths
}

fn print_row(cells: &[String], widths: &[usize]) {
    let padded: Vec<String> = cells
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{:<width$}", c, width = widths.get(i).copied().unwrap_or(0) + 2))
        .collect();
    println!("{}", padded.join("").trim_end());
}
