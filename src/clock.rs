use std::time::{SystemTime, UNIX_EPOCH};

/// UNIXエポックからのミリ秒
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
