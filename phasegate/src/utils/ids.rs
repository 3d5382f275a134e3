//! Identifier generation.

use uuid::Uuid;

/// Generates a random identifier (UUID v4).
#[must_use]
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generates a time-ordered execution identifier (UUID v7).
///
/// Execution ids sort by creation time, which keeps checkpoint listings
/// chronological.
#[must_use]
pub fn new_execution_id() -> String {
    Uuid::now_v7().to_string()
}

/// Generates an identifier with a short human-readable prefix, e.g. `neg-1a2b3c4d`.
#[must_use]
pub fn prefixed_id(prefix: &str) -> String {
    let simple = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &simple[..12])
}
