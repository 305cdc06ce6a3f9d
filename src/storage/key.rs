use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Builds the object key for a batch: `<tier>/<YYYY-MM-DD>/<uuid>.json`.
///
/// The date is the UTC date of `at`, not of the events in the batch.
pub fn storage_key(tier: &str, at: DateTime<Utc>, id: Uuid) -> String {
    format!("{}/{}/{}.json", tier, at.format("%Y-%m-%d"), id)
}

/// Storage key for a batch uploaded now, with a random v4 UUID.
pub fn generate_storage_key(tier: &str) -> String {
    storage_key(tier, Utc::now(), Uuid::new_v4())
}
