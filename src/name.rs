//! Session-name grammar: `[A-Za-z0-9._-]{1,64}`, not equal to `.` or `..`.
//!
//! Every subcommand that takes a name must call [`validate`] before doing
//! anything else; [`registry::enumerate`] calls it again on each on-disk
//! entry so a hostile file dropped in the registry directory can never
//! surface as a session.
use anyhow::{anyhow, Result};

pub const MAX_LEN: usize = 64;

pub fn validate(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(anyhow!("session name must not be empty"));
    }
    if name.len() > MAX_LEN {
        return Err(anyhow!("session name must be at most {} bytes", MAX_LEN));
    }
    if name == "." || name == ".." {
        return Err(anyhow!("session name must not be '.' or '..'"));
    }
    if !name.bytes().all(is_name_byte) {
        return Err(anyhow!(
            "session name '{}' may only contain letters, digits, '.', '_', and '-'",
            name
        ));
    }
    Ok(())
}

pub fn is_valid(name: &str) -> bool {
    validate(name).is_ok()
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_names() {
        for n in ["test-ok", "my_session", "v1.2", "ABC123", "a"] {
            assert!(is_valid(n), "{} should be valid", n);
        }
    }

    #[test]
    fn rejects_dot_and_dotdot() {
        assert!(!is_valid("."));
        assert!(!is_valid(".."));
    }

    #[test]
    fn rejects_empty() {
        assert!(!is_valid(""));
    }

    #[test]
    fn rejects_path_traversal() {
        assert!(!is_valid("../etc"));
        assert!(!is_valid("a/b"));
    }

    #[test]
    fn rejects_whitespace_and_shell_metacharacters() {
        assert!(!is_valid("a b"));
        assert!(!is_valid("a;b"));
        assert!(!is_valid("$(whoami)"));
    }

    #[test]
    fn rejects_too_long() {
        let long = "a".repeat(100);
        assert!(!is_valid(&long));
        let max = "a".repeat(MAX_LEN);
        assert!(is_valid(&max));
    }
}
