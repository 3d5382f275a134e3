//! Utility functions for id generation and timestamp handling.

mod ids;
pub mod timestamps;

pub use ids::{new_execution_id, new_id, prefixed_id};
pub use timestamps::{iso_timestamp, now_utc, to_iso, Timestamp};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_id_is_uuid() {
        let id = new_id();
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_iso_timestamp_format() {
        let ts = iso_timestamp();
        assert!(ts.contains('T'));
        assert!(ts.ends_with("+00:00"));
    }
}
