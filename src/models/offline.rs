use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineCredentials {
    pub email: String,
    pub password_hash: String,
    pub last_sync: DateTime<Utc>,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lockout_until: Option<DateTime<Utc>>,
}

impl OfflineCredentials {
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.lockout_until.is_some_and(|until| until > now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockoutStatus {
    Unlocked { attempts: u32, remaining: u32 },
    Locked { until: DateTime<Utc> },
}
