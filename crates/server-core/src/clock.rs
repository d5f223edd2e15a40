use chrono::Utc;

/// Wall-clock time in milliseconds since the Unix epoch.
pub fn epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}
