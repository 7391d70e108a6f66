//! Source-to-analytics type mapping.
//!
//! A pure function over the source catalog's type text. Matching is
//! case-insensitive and prefix-based, applied in a fixed order, so the
//! same input always maps to the same [`TargetType`]. Anything without a
//! rule fails with `TypeUnmappable` — values are never silently coerced.

use tidemark_types::{SyncError, TargetType};

/// Widest DECIMAL the analytics store can hold; beyond it we fall back to
/// DOUBLE.
const MAX_DECIMAL_PRECISION: u8 = 38;

/// Map a source column type to its analytics target type.
///
/// # Errors
///
/// Returns `TypeUnmappable` (naming the column and type) when no rule
/// applies.
pub fn map_source_type(column: &str, source_type: &str) -> Result<TargetType, SyncError> {
    let ty = source_type.trim().to_ascii_uppercase();

    if ty.starts_with("NUMBER") {
        return Ok(map_number(&ty));
    }

    if ty.starts_with("SMALLINT") || ty.starts_with("BIGINT") || ty.starts_with("INT") {
        return Ok(TargetType::Integer);
    }

    if ty.starts_with("DECIMAL") || ty.starts_with("NUMERIC") {
        return Ok(match parse_precision_scale(&ty) {
            Some((p, s)) if p <= MAX_DECIMAL_PRECISION => TargetType::Decimal {
                precision: p,
                scale: s.max(0) as u8,
            },
            // Precision absent or wider than the store supports.
            _ => TargetType::Double,
        });
    }

    if ty.starts_with("BINARY_FLOAT")
        || ty.starts_with("BINARY_DOUBLE")
        || ty.starts_with("FLOAT")
        || ty.starts_with("DOUBLE")
        || ty.starts_with("REAL")
    {
        return Ok(TargetType::Double);
    }

    if ty.starts_with("TIMESTAMP") || ty.starts_with("DATE") {
        return Ok(TargetType::Timestamp);
    }

    if ty.starts_with("VARCHAR")
        || ty.starts_with("NVARCHAR")
        || ty.starts_with("NCHAR")
        || ty.starts_with("CHAR")
        || ty.starts_with("NCLOB")
        || ty.starts_with("CLOB")
        || ty.starts_with("TEXT")
    {
        return Ok(TargetType::VarChar);
    }

    Err(SyncError::type_unmappable(column, source_type))
}

fn map_number(ty: &str) -> TargetType {
    match parse_precision_scale(ty) {
        Some((p, s)) if s > 0 && p <= MAX_DECIMAL_PRECISION => TargetType::Decimal {
            precision: p,
            scale: s as u8,
        },
        Some((p, _)) if p <= 9 => TargetType::Integer,
        Some((p, _)) if p <= MAX_DECIMAL_PRECISION => TargetType::Decimal {
            precision: p,
            scale: 0,
        },
        // No usable precision: Oracle's unconstrained NUMBER is a float-ish
        // catch-all.
        _ => TargetType::Double,
    }
}

/// Parse `(p)` or `(p,s)` out of a type text. `None` when absent or not
/// numeric (e.g. `NUMBER(*,2)`).
fn parse_precision_scale(ty: &str) -> Option<(u8, i32)> {
    let open = ty.find('(')?;
    let close = ty[open..].find(')')? + open;
    let inner = &ty[open + 1..close];
    let mut parts = inner.splitn(2, ',');
    let precision: u8 = parts.next()?.trim().parse().ok()?;
    let scale: i32 = match parts.next() {
        Some(s) => s.trim().parse().ok()?,
        None => 0,
    };
    Some((precision, scale))
}
