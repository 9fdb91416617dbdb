use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Format of version timestamps: fixed width, millisecond resolution,
/// lexicographic order equals chronological order.
const VERSION_TS_FORMAT: &str = "%Y%m%d_%H%M%S%.3f";

/// Returns a fresh entry identifier in canonical hyphenated form.
pub fn generate_uid() -> String {
    Uuid::new_v4().to_string()
}

/// Current wall-clock time in milliseconds since the epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn format_version_ts(millis: i64) -> String {
    let dt: DateTime<Utc> =
        DateTime::from_timestamp_millis(millis).expect("millisecond timestamp out of range");
    dt.format(VERSION_TS_FORMAT).to_string()
}

/// Issues version timestamps that are strictly monotonic per uid. When the
/// wall clock has not advanced past the last stamp issued for a uid, the
/// next stamp is bumped by one millisecond instead of waiting.
#[derive(Debug, Default)]
pub struct VersionClock {
    last_issued: Mutex<HashMap<String, i64>>,
}

impl VersionClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, uid: &str) -> String {
        let mut last_issued = self.last_issued.lock().expect("version clock poisoned");
        let mut millis = now_millis();
        if let Some(prev) = last_issued.get(uid) {
            if millis <= *prev {
                millis = prev + 1;
            }
        }
        last_issued.insert(uid.to_owned(), millis);
        format_version_ts(millis)
    }
}
