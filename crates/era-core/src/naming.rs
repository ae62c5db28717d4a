use std::sync::atomic::{AtomicU64, Ordering};

use crate::language::Language;

static VM_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate a VM id: `<language>-<monotonic>`.
///
/// The counter is process-local and monotonic within a process lifetime;
/// collisions across restarts are avoided because `VmService::create`
/// checks the catalog with `conditional_put` before accepting the id.
pub fn generate_vm_id(language: Language) -> String {
    let n = VM_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}", language.as_str(), n)
}

/// Validate a client-supplied session id against `[A-Za-z0-9_-]+`.
pub fn validate_session_id(id: &str) -> Result<(), String> {
    if id.is_empty() || id.len() > 128 {
        return Err(format!("session id must be 1-128 characters, got {}", id.len()));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(format!("session id must match [A-Za-z0-9_-]+: {id:?}"));
    }
    Ok(())
}

/// Generate a human-readable session id ("brave-falcon-x4f2") when the
/// client omits one. Falls back to a uuid-derived suffix if the word
/// generator is unavailable.
pub fn generate_session_id() -> String {
    let words = names::Generator::default()
        .next()
        .unwrap_or_else(|| format!("session-{}", uuid::Uuid::new_v4().simple()));
    words.replace('_', "-")
}

/// Validate a relative file path has no traversal components and is not
/// rooted.
pub fn validate_relative_path(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("path must not be empty".to_string());
    }
    let p = std::path::Path::new(path);
    if p.is_absolute() {
        return Err(format!("path must be relative: {path:?}"));
    }
    for comp in p.components() {
        match comp {
            std::path::Component::Normal(_) => {}
            other => return Err(format!("path contains disallowed component {other:?}: {path:?}")),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vm_ids_are_unique_and_language_prefixed() {
        let a = generate_vm_id(Language::Python);
        let b = generate_vm_id(Language::Python);
        assert_ne!(a, b);
        assert!(a.starts_with("python-"));
        assert!(b.starts_with("python-"));
    }

    #[test]
    fn session_id_validation() {
        assert!(validate_session_id("my-session_1").is_ok());
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id("has space").is_err());
        assert!(validate_session_id("slash/here").is_err());
        assert!(validate_session_id(&"a".repeat(129)).is_err());
    }

    #[test]
    fn generated_session_id_is_nonempty() {
        let id = generate_session_id();
        assert!(!id.is_empty());
    }

    #[test]
    fn relative_path_rejects_traversal() {
        assert!(validate_relative_path("hello.txt").is_ok());
        assert!(validate_relative_path("sub/dir/file.txt").is_ok());
        assert!(validate_relative_path("../escape").is_err());
        assert!(validate_relative_path("/etc/passwd").is_err());
        assert!(validate_relative_path("a/../../b").is_err());
        assert!(validate_relative_path("").is_err());
    }
}
