use std::path::Path;

/// Exact basenames that must never leave a VM via extract.
const SENSITIVE_NAMES: &[&str] = &[
    ".env",
    "credentials.json",
    "service-account.json",
    ".netrc",
    ".dockercfg",
    ".npmrc",
    ".pypirc",
];

/// Basenames with a wildcard suffix/prefix, matched case-insensitively.
const SENSITIVE_PREFIXES: &[&str] = &[".env."];
const SENSITIVE_SECRET_STEMS: &[&str] = &["secrets.json", "secrets.yaml", "secrets.yml"];

/// Path suffixes (joined with `/`) that are sensitive regardless of where
/// they sit in the tree, e.g. `.aws/credentials`.
const SENSITIVE_PATH_SUFFIXES: &[&str] = &[
    ".aws/credentials",
    ".ssh/id_rsa",
    ".ssh/id_ed25519",
];

/// Whether `rel_path` matches the documented sensitive-file set. Matching
/// is case-insensitive on the basename and exact (case-sensitive) on path
/// suffixes.
pub fn is_sensitive_path(rel_path: &str) -> bool {
    let normalized = rel_path.replace('\\', "/");
    for suffix in SENSITIVE_PATH_SUFFIXES {
        if normalized == *suffix || normalized.ends_with(&format!("/{suffix}")) {
            return true;
        }
    }

    let basename = Path::new(&normalized)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(&normalized)
        .to_ascii_lowercase();

    if SENSITIVE_NAMES.iter().any(|n| *n == basename) {
        return true;
    }
    if SENSITIVE_PREFIXES.iter().any(|p| basename.starts_with(p)) {
        return true;
    }
    if SENSITIVE_SECRET_STEMS.iter().any(|s| *s == basename) {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_documented_sensitive_names() {
        for name in [
            ".env",
            ".env.local",
            ".env.production",
            "credentials.json",
            "service-account.json",
            ".netrc",
            ".dockercfg",
            ".npmrc",
            ".pypirc",
            "secrets.json",
            "secrets.yaml",
            "secrets.yml",
        ] {
            assert!(is_sensitive_path(name), "{name} should be sensitive");
            assert!(is_sensitive_path(&name.to_ascii_uppercase()), "{name} case-insensitive");
        }
    }

    #[test]
    fn flags_sensitive_subpaths() {
        assert!(is_sensitive_path(".aws/credentials"));
        assert!(is_sensitive_path("home/user/.aws/credentials"));
        assert!(is_sensitive_path(".ssh/id_rsa"));
        assert!(is_sensitive_path(".ssh/id_ed25519"));
    }

    #[test]
    fn ordinary_files_pass() {
        assert!(!is_sensitive_path("ok.txt"));
        assert!(!is_sensitive_path("src/main.py"));
        assert!(!is_sensitive_path("envelope.txt"));
        assert!(!is_sensitive_path("my-secrets-notes.txt"));
    }
}
