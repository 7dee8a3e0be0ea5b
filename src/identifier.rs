use inflector::Inflector;
use regex::Regex;

use crate::error::{Error, Result};

/// The reserved prefix for generated/internal names (`spec.md` §4.F,
/// "reject collisions... with the reserved prefix `_`").
pub fn is_reserved(name: &str) -> bool {
    name.starts_with('_')
}

/// Validates a user-supplied top-level name against `allowed_name_pattern`
/// and the reserved prefix, independent of collision checking (which the
/// caller does against its own name table).
pub fn validate(name: &str, allowed_pattern: &str) -> Result<()> {
    if is_reserved(name) {
        return Err(Error::NameCollision {
            name: name.to_string(),
        });
    }
    let re = Regex::new(allowed_pattern).map_err(|_| Error::NameCollision {
        name: name.to_string(),
    })?;
    if !re.is_match(name) {
        return Err(Error::NameCollision {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Turns an arbitrary DataSet key into a valid Python module name: a
/// DataSet's keys are user-chosen strings (`spec.md` §4.H), but each one
/// backs a real `.py` file, so it is sanitized the way a case-conversion
/// utility would normalize any other cross-boundary identifier.
///
/// Never produces a leading underscore — the sanitized name is later run
/// through the same `insert_as` path as ordinary user-supplied names, which
/// rejects the reserved `_` prefix.
pub fn sanitize_module_name(key: &str) -> String {
    let snake = key.to_snake_case();
    if snake.is_empty() {
        "unnamed".to_string()
    } else if snake.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        format!("k{snake}")
    } else if snake.starts_with('_') {
        format!("k{}", snake.trim_start_matches('_'))
    } else {
        snake
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_prefix_is_rejected() {
        assert!(validate("_private", r"^[A-Za-z_][A-Za-z0-9_]*$").is_err());
    }

    #[test]
    fn well_formed_name_is_accepted() {
        assert!(validate("result", r"^[A-Za-z_][A-Za-z0-9_]*$").is_ok());
    }

    #[test]
    fn sanitize_handles_hyphens_and_spaces() {
        assert_eq!(sanitize_module_name("My Key-Name"), "my_key_name");
    }

    #[test]
    fn sanitize_handles_leading_digit() {
        assert_eq!(sanitize_module_name("123abc"), "k123abc");
    }

    #[test]
    fn sanitize_never_yields_reserved_prefix() {
        assert_eq!(sanitize_module_name(""), "unnamed");
        assert_eq!(sanitize_module_name("__dunder__"), "kdunder");
        assert!(!is_reserved(&sanitize_module_name("123")));
        assert!(!is_reserved(&sanitize_module_name("")));
    }
}
