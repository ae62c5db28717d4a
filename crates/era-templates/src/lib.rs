use era_core::error::{Error, Result};
use era_core::language::Language;
use serde::Serialize;
use tera::{Context, Tera};

/// Well-typed inputs to a run-command template. Nothing caller-supplied
/// (session code, env values, shell args) is ever substituted in; only
/// these fixed, server-controlled fields are.
#[derive(Debug, Clone, Serialize)]
pub struct RunCommandInputs {
    pub workspace: String,
    pub entrypoint: String,
}

impl RunCommandInputs {
    pub fn for_language(language: Language) -> Self {
        RunCommandInputs {
            workspace: "/workspace".to_string(),
            entrypoint: format!("/workspace/{}", language.entrypoint()),
        }
    }
}

/// Maps a language to the shell command used to execute its entrypoint
/// inside a guest, via small named templates instead of `format!` calls
/// scattered through the run path.
pub struct CommandRegistry {
    tera: Tera,
}

fn template_name(language: Language) -> &'static str {
    match language {
        Language::Python => "python",
        Language::Node => "node",
        Language::Typescript => "typescript",
        Language::Go => "go",
        Language::Deno => "deno",
        Language::Shell => "shell",
    }
}

impl CommandRegistry {
    pub fn new() -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            ("python", "python3 {{ entrypoint }}"),
            ("node", "node {{ entrypoint }}"),
            ("typescript", "tsx {{ entrypoint }}"),
            ("go", "go run {{ entrypoint }}"),
            ("deno", "deno run --allow-all {{ entrypoint }}"),
        ])
        .map_err(|e| Error::Internal(format!("loading run-command templates: {e}")))?;
        Ok(CommandRegistry { tera })
    }

    /// Render the guest shell command for `language`. `shell` sessions use
    /// the caller's literal command string and never go through a
    /// template — there's nothing to interpolate.
    pub fn render(&self, language: Language) -> Result<String> {
        if language == Language::Shell {
            return Err(Error::InvalidArgument(
                "shell language has no run-command template; use the caller's literal command".to_string(),
            ));
        }
        let inputs = RunCommandInputs::for_language(language);
        let ctx = Context::from_serialize(&inputs).map_err(|e| Error::Internal(format!("building template context: {e}")))?;
        self.tera
            .render(template_name(language), &ctx)
            .map_err(|e| Error::Internal(format!("rendering run command for {language}: {e}")))
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new().expect("built-in templates always compile")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_expected_command_per_language() {
        let registry = CommandRegistry::new().unwrap();
        assert_eq!(registry.render(Language::Python).unwrap(), "python3 /workspace/main.py");
        assert_eq!(registry.render(Language::Node).unwrap(), "node /workspace/main.js");
        assert_eq!(registry.render(Language::Typescript).unwrap(), "tsx /workspace/main.ts");
        assert_eq!(registry.render(Language::Go).unwrap(), "go run /workspace/main.go");
        assert_eq!(
            registry.render(Language::Deno).unwrap(),
            "deno run --allow-all /workspace/main.ts"
        );
    }

    #[test]
    fn shell_has_no_template() {
        let registry = CommandRegistry::new().unwrap();
        assert!(registry.render(Language::Shell).is_err());
    }
}
