//! Failure classification (§4.1.3): maps a driver SQL state onto one of three
//! outcomes that decide what happens to the connection that produced it.
use std::fmt;

/// A five-character SQL state code, e.g. `"08001"`.
///
/// A missing SQL state is treated as `08999`, which is already a
/// `CONNECTION_BROKEN`-class code under the rules below, so callers can just
/// pass `None` through [`classify`] without special-casing it first.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SqlState(pub [u8; 5]);

impl SqlState {
    pub const UNKNOWN: SqlState = SqlState(*b"08999");

    pub fn new(code: &str) -> Option<Self> {
        let bytes = code.as_bytes();
        if bytes.len() != 5 {
            return None;
        }
        let mut buf = [0u8; 5];
        buf.copy_from_slice(bytes);
        Some(SqlState(buf))
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("?????")
    }
}

impl fmt::Debug for SqlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for SqlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

const DATABASE_DOWN_CODES: &[&str] = &["08001", "08007", "08S01", "57P01"];

/// Outcome of classifying a driver failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The whole database looks unreachable; every connection in the pool
    /// should be considered suspect.
    DatabaseDown,
    /// Only this connection looks broken; retire it, the rest of the pool is fine.
    ConnectionBroken,
    /// An ordinary data-level error (e.g. a constraint violation); the
    /// connection stays poolable.
    DataError,
}

/// The only recognized return codes from a [`ConnectionHook`][crate::hooks::ConnectionHook]
/// classification callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Nop,
    ConnectionPossiblyBroken,
    TerminateAllConnections,
}

/// Classify a SQL state (or its absence) per the table in §4.1.3, folding in
/// whatever a [`ConnectionHook`][crate::hooks::ConnectionHook] callback returned.
pub fn classify(sql_state: Option<&SqlState>, hook_state: ConnectionState) -> Classification {
    if hook_state == ConnectionState::TerminateAllConnections {
        return Classification::DatabaseDown;
    }

    let code = sql_state.cloned().unwrap_or(SqlState::UNKNOWN);
    let code_str = code.as_str();

    if DATABASE_DOWN_CODES.contains(&code_str) {
        return Classification::DatabaseDown;
    }

    if hook_state == ConnectionState::ConnectionPossiblyBroken {
        return Classification::ConnectionBroken;
    }

    let first = code_str.as_bytes()[0];
    let starts_with_08 = code_str.starts_with("08");
    let is_known_broken_code = matches!(code_str, "40001" | "HY000");
    let first_char_5_to_9 = (b'5'..=b'9').contains(&first);

    if starts_with_08 || is_known_broken_code || first_char_5_to_9 {
        return Classification::ConnectionBroken;
    }

    Classification::DataError
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_down_codes() {
        for code in DATABASE_DOWN_CODES {
            let state = SqlState::new(code).unwrap();
            assert_eq!(classify(Some(&state), ConnectionState::Nop), Classification::DatabaseDown);
        }
    }

    #[test]
    fn hook_can_escalate_to_terminate_all() {
        let state = SqlState::new("23505").unwrap();
        assert_eq!(
            classify(Some(&state), ConnectionState::TerminateAllConnections),
            Classification::DatabaseDown
        );
    }

    #[test]
    fn connection_broken_family() {
        for code in ["08003", "40001", "HY000", "57014", "99999"] {
            let state = SqlState::new(code).unwrap();
            assert_eq!(
                classify(Some(&state), ConnectionState::Nop),
                Classification::ConnectionBroken,
                "{code} should classify as ConnectionBroken",
            );
        }
    }

    #[test]
    fn data_error_passes_through() {
        let state = SqlState::new("23505").unwrap();
        assert_eq!(classify(Some(&state), ConnectionState::Nop), Classification::DataError);
    }

    #[test]
    fn missing_sql_state_is_safety_broken() {
        assert_eq!(classify(None, ConnectionState::Nop), Classification::ConnectionBroken);
    }

    #[test]
    fn hook_can_mark_possibly_broken() {
        let state = SqlState::new("23505").unwrap();
        assert_eq!(
            classify(Some(&state), ConnectionState::ConnectionPossiblyBroken),
            Classification::ConnectionBroken
        );
    }
}
