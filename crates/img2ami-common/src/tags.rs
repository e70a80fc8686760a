//! AWS resource tag constants for img2ami
//!
//! The worker instance, its working volume and the snapshot are tagged at
//! creation so leaked resources can be discovered and reclaimed by
//! `img2ami cleanup-orphans`.
//!
//! ## Tag Schema
//!
//! | Tag Key | Description |
//! |---------|-------------|
//! | `img2ami:tool` | Static identifier ("img2ami") |
//! | `img2ami:run-id` | Unique run identifier (UUID) |
//! | `img2ami:created-at` | RFC 3339 creation timestamp |
//! | `img2ami:image-name` | Name of the image being registered |

/// Tag key for tool identification - all img2ami resources have this
pub const TAG_TOOL: &str = "img2ami:tool";

/// Tag value for tool identification
pub const TAG_TOOL_VALUE: &str = "img2ami";

/// Tag key for run ID - unique identifier per invocation
pub const TAG_RUN_ID: &str = "img2ami:run-id";

/// Tag key for creation timestamp (RFC 3339 format)
pub const TAG_CREATED_AT: &str = "img2ami:created-at";

/// Tag key for the target image name
pub const TAG_IMAGE_NAME: &str = "img2ami:image-name";

/// Helper to format creation timestamp for tags
pub fn format_created_at(time: chrono::DateTime<chrono::Utc>) -> String {
    time.to_rfc3339()
}

/// Helper to parse creation timestamp from tags
pub fn parse_created_at(s: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&chrono::Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_created_at_round_trips() {
        let time = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let formatted = format_created_at(time);
        assert_eq!(parse_created_at(&formatted), Some(time));
    }

    #[test]
    fn test_garbage_created_at_is_none() {
        assert!(parse_created_at("yesterday").is_none());
    }
}
