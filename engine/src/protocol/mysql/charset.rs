//! Collation id table used when negotiating the character set for a backend
//! connection. Not exhaustive, only the collations this engine is known to
//! emit or compare against.
use hashbrown::HashMap;
use std::sync::OnceLock;

pub const UTF8_GENERAL_CI: u8 = 33;
pub const UTF8_MB4_GENERAL_CI: u8 = 45;
pub const BINARY: u8 = 63;

pub const DEFAULT_COLLATION_ID: u8 = UTF8_MB4_GENERAL_CI;

pub fn collation_names() -> &'static HashMap<u8, &'static str> {
    static NAMES: OnceLock<HashMap<u8, &'static str>> = OnceLock::new();
    NAMES.get_or_init(|| {
        HashMap::from([
            (UTF8_GENERAL_CI, "utf8_general_ci"),
            (UTF8_MB4_GENERAL_CI, "utf8mb4_general_ci"),
            (BINARY, "binary"),
        ])
    })
}

pub fn collation_name(id: u8) -> &'static str {
    collation_names().get(&id).copied().unwrap_or("unknown")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_collation_is_utf8mb4() {
        assert_eq!(DEFAULT_COLLATION_ID, UTF8_MB4_GENERAL_CI);
        assert_eq!(collation_name(DEFAULT_COLLATION_ID), "utf8mb4_general_ci");
    }

    #[test]
    fn unknown_collation_name() {
        assert_eq!(collation_name(200), "unknown");
    }
}
