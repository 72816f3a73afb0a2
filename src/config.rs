//! Session tuning loaded from environment variables.
//!
//! Every knob has a compiled-in default; unset or unparseable variables fall
//! back to it silently.

use std::time::Duration;

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_TYPING_DEBOUNCE_MS: u64 = 500;
pub const DEFAULT_TYPING_TIMEOUT_MS: u64 = 3000;
pub const DEFAULT_TYPING_GRACE_MS: u64 = 2000;
pub const DEFAULT_LOG_MAX: usize = 200;
pub const DEFAULT_LOG_KEEP: usize = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long `connect()` waits for the broker acknowledgment.
    pub connect_timeout: Duration,
    /// Quiet window before a keystroke is acted on.
    pub typing_debounce: Duration,
    /// Local inactivity before an automatic TYPING_STOP.
    pub typing_timeout: Duration,
    /// Extra slack granted to remote typists beyond their own auto-stop.
    pub typing_grace: Duration,
    /// Log length that triggers truncation.
    pub log_max: usize,
    /// Log length kept after truncation.
    pub log_keep: usize,
}

impl SessionConfig {
    /// Build config from environment variables.
    ///
    /// Optional:
    /// - `CHAT_CONNECT_TIMEOUT_MS`: default 10000
    /// - `CHAT_TYPING_DEBOUNCE_MS`: default 500
    /// - `CHAT_TYPING_TIMEOUT_MS`: default 3000
    /// - `CHAT_TYPING_GRACE_MS`: default 2000
    /// - `CHAT_LOG_MAX`: default 200
    /// - `CHAT_LOG_KEEP`: default 150, clamped to `CHAT_LOG_MAX`
    #[must_use]
    pub fn from_env() -> Self {
        let log_max = env_parse("CHAT_LOG_MAX", DEFAULT_LOG_MAX).max(1);
        let log_keep = env_parse("CHAT_LOG_KEEP", DEFAULT_LOG_KEEP).min(log_max);

        Self {
            connect_timeout: Duration::from_millis(env_parse("CHAT_CONNECT_TIMEOUT_MS", DEFAULT_CONNECT_TIMEOUT_MS)),
            typing_debounce: Duration::from_millis(env_parse("CHAT_TYPING_DEBOUNCE_MS", DEFAULT_TYPING_DEBOUNCE_MS)),
            typing_timeout: Duration::from_millis(env_parse("CHAT_TYPING_TIMEOUT_MS", DEFAULT_TYPING_TIMEOUT_MS)),
            typing_grace: Duration::from_millis(env_parse("CHAT_TYPING_GRACE_MS", DEFAULT_TYPING_GRACE_MS)),
            log_max,
            log_keep,
        }
    }

    /// Age at which a remote presence entry is considered stale.
    #[must_use]
    pub fn presence_ttl(&self) -> Duration {
        self.typing_timeout + self.typing_grace
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            typing_debounce: Duration::from_millis(DEFAULT_TYPING_DEBOUNCE_MS),
            typing_timeout: Duration::from_millis(DEFAULT_TYPING_TIMEOUT_MS),
            typing_grace: Duration::from_millis(DEFAULT_TYPING_GRACE_MS),
            log_max: DEFAULT_LOG_MAX,
            log_keep: DEFAULT_LOG_KEEP,
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
