use super::*;

const VARS: [&str; 6] = [
    "CHAT_CONNECT_TIMEOUT_MS",
    "CHAT_TYPING_DEBOUNCE_MS",
    "CHAT_TYPING_TIMEOUT_MS",
    "CHAT_TYPING_GRACE_MS",
    "CHAT_LOG_MAX",
    "CHAT_LOG_KEEP",
];

/// # Safety
/// Only this test module touches the `CHAT_*` variables; the env tests are
/// folded into one function so they never race each other.
unsafe fn clear_chat_env() {
    for var in VARS {
        unsafe { std::env::remove_var(var) };
    }
}

#[test]
fn default_matches_documented_constants() {
    let cfg = SessionConfig::default();
    assert_eq!(cfg.connect_timeout, Duration::from_millis(10_000));
    assert_eq!(cfg.typing_debounce, Duration::from_millis(500));
    assert_eq!(cfg.typing_timeout, Duration::from_millis(3000));
    assert_eq!(cfg.typing_grace, Duration::from_millis(2000));
    assert_eq!(cfg.log_max, 200);
    assert_eq!(cfg.log_keep, 150);
}

#[test]
fn presence_ttl_is_timeout_plus_grace() {
    assert_eq!(SessionConfig::default().presence_ttl(), Duration::from_millis(5000));
}

#[test]
fn from_env_defaults_overrides_and_clamping() {
    unsafe { clear_chat_env() };
    assert_eq!(SessionConfig::from_env(), SessionConfig::default());

    unsafe {
        std::env::set_var("CHAT_CONNECT_TIMEOUT_MS", "2500");
        std::env::set_var("CHAT_TYPING_DEBOUNCE_MS", "not-a-number");
        std::env::set_var("CHAT_LOG_MAX", "20");
        std::env::set_var("CHAT_LOG_KEEP", "50");
    }
    let cfg = SessionConfig::from_env();
    assert_eq!(cfg.connect_timeout, Duration::from_millis(2500));
    assert_eq!(cfg.typing_debounce, Duration::from_millis(DEFAULT_TYPING_DEBOUNCE_MS));
    assert_eq!(cfg.log_max, 20);
    assert_eq!(cfg.log_keep, 20);

    unsafe { clear_chat_env() };
}
