//! Identifier validation and quoting for DDL/DML construction.
//!
//! Every table and column name that reaches generated SQL passes through
//! [`validate_identifier`] first; values always travel as bound
//! parameters, never as literals.

use tidemark_types::SyncError;

/// Validate a name against the strict identifier grammar
/// `[A-Za-z_][A-Za-z0-9_]*`.
///
/// # Errors
///
/// Returns `ConfigInvalid` describing the first violation.
pub fn validate_identifier(name: &str) -> Result<(), SyncError> {
    if name.is_empty() {
        return Err(SyncError::config("identifier must not be empty"));
    }

    let mut chars = name.chars();
    let first = chars.next().expect("non-empty identifier");
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(SyncError::config(format!(
            "identifier '{name}' must start with a letter or underscore"
        )));
    }
    for ch in chars {
        if !ch.is_ascii_alphanumeric() && ch != '_' {
            return Err(SyncError::config(format!(
                "identifier '{name}' contains invalid character '{ch}'"
            )));
        }
    }
    Ok(())
}

/// Double-quote a previously validated identifier.
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{name}\"")
}
