use serde::{Deserialize, Serialize};

/// Maximum clock difference (seconds) tolerated on nonce timestamps.
///
/// Five hours, matching the OpenID relying-party library constant.
pub const DEFAULT_NONCE_SKEW_SECS: i64 = 5 * 60 * 60;

/// One consumed nonce, one row of `openid_nonces`.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceRecord {
    pub server_url: String,
    pub timestamp: i64,
    pub salt: String,
}

impl NonceRecord {
    pub fn new(server_url: &str, timestamp: i64, salt: &str) -> Self {
        Self {
            server_url: server_url.to_string(),
            timestamp,
            salt: salt.to_string(),
        }
    }
}

/// The closed interval of acceptable nonce timestamps around a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceWindow {
    pub earliest: i64,
    pub latest: i64,
}

impl NonceWindow {
    pub fn around(now: i64, skew: i64) -> Self {
        Self {
            earliest: now.saturating_sub(skew),
            latest: now.saturating_add(skew),
        }
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        (self.earliest..=self.latest).contains(&timestamp)
    }
}

/// First characters of a salt, safe for log fields.
pub fn salt_prefix(salt: &str) -> String {
    salt.chars().take(6).collect()
}
