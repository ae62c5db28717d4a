use serde::{Deserialize, Serialize};

/// Supported guest languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Node,
    Typescript,
    Go,
    Deno,
    Shell,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Node => "node",
            Language::Typescript => "typescript",
            Language::Go => "go",
            Language::Deno => "deno",
            Language::Shell => "shell",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "python" => Some(Language::Python),
            "node" => Some(Language::Node),
            "typescript" | "ts" => Some(Language::Typescript),
            "go" => Some(Language::Go),
            "deno" => Some(Language::Deno),
            "shell" | "sh" => Some(Language::Shell),
            _ => None,
        }
    }

    /// Guest-relative entrypoint filename written under `/workspace`.
    pub fn entrypoint(&self) -> &'static str {
        match self {
            Language::Python => "main.py",
            Language::Node => "main.js",
            Language::Typescript => "main.ts",
            Language::Go => "main.go",
            Language::Deno => "main.ts",
            Language::Shell => "main.sh",
        }
    }

    /// Language used for the async setup phase: typescript maps to node
    /// because the setup VM installs npm packages, not a TS toolchain.
    pub fn setup_language(&self) -> Language {
        match self {
            Language::Typescript => Language::Node,
            other => *other,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_str() {
        for l in [
            Language::Python,
            Language::Node,
            Language::Typescript,
            Language::Go,
            Language::Deno,
            Language::Shell,
        ] {
            assert_eq!(Language::parse(l.as_str()), Some(l));
        }
    }

    #[test]
    fn typescript_setup_uses_node() {
        assert_eq!(Language::Typescript.setup_language(), Language::Node);
        assert_eq!(Language::Python.setup_language(), Language::Python);
    }

    #[test]
    fn unknown_language_rejected() {
        assert_eq!(Language::parse("rust"), None);
    }
}
