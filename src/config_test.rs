use super::*;
use std::sync::{Mutex, MutexGuard};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn env_guard() -> MutexGuard<'static, ()> {
    ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// # Safety
/// Callers hold `env_guard()` so no other test mutates the environment.
unsafe fn clear_server_env() {
    unsafe {
        for key in [
            "PORT",
            "DATABASE_URL",
            "CLIENT_CHANNEL_CAPACITY",
            "MAX_CONTENT_CHARS",
            "AI_HISTORY_TURNS",
            "AI_MAX_TOKENS",
            "AI_REPLY_MAX_CHARS",
            "AI_TIMEOUT_SECS",
            "TYPING_EXPIRY_SECS",
            "REQUIRE_KNOWN_USERS",
            "UPLOAD_DIR",
            "UPLOAD_MAX_BYTES",
        ] {
            std::env::remove_var(key);
        }
    }
}

#[test]
fn from_env_defaults() {
    let _guard = env_guard();
    unsafe { clear_server_env() };

    let cfg = ServerConfig::from_env();
    assert_eq!(cfg, ServerConfig::default());
    assert!(cfg.database_url.is_none());
    assert!(cfg.typing_expiry.is_none());
    assert_eq!(cfg.assistant.history_turns, 10);
    assert_eq!(cfg.upload_dir, PathBuf::from("uploads"));
    assert_eq!(cfg.upload_max_bytes, 10 * 1024 * 1024);
}

#[test]
fn from_env_parses_overrides() {
    let _guard = env_guard();
    unsafe {
        clear_server_env();
        std::env::set_var("PORT", "8080");
        std::env::set_var("DATABASE_URL", "postgres://chat@localhost/chat");
        std::env::set_var("AI_HISTORY_TURNS", "4");
        std::env::set_var("AI_TIMEOUT_SECS", "5");
        std::env::set_var("TYPING_EXPIRY_SECS", "8");
        std::env::set_var("REQUIRE_KNOWN_USERS", "true");
        std::env::set_var("UPLOAD_DIR", "/var/lib/neurochat/uploads");
        std::env::set_var("UPLOAD_MAX_BYTES", "1024");
    }

    let cfg = ServerConfig::from_env();
    assert_eq!(cfg.port, 8080);
    assert_eq!(cfg.database_url.as_deref(), Some("postgres://chat@localhost/chat"));
    assert_eq!(cfg.assistant.history_turns, 4);
    assert_eq!(cfg.assistant.timeout, Duration::from_secs(5));
    assert_eq!(cfg.typing_expiry, Some(Duration::from_secs(8)));
    assert!(cfg.require_known_users);
    assert_eq!(cfg.upload_dir, PathBuf::from("/var/lib/neurochat/uploads"));
    assert_eq!(cfg.upload_max_bytes, 1024);

    unsafe { clear_server_env() };
}

#[test]
fn zero_typing_expiry_disables_sweep() {
    let _guard = env_guard();
    unsafe {
        clear_server_env();
        std::env::set_var("TYPING_EXPIRY_SECS", "0");
    }

    assert!(ServerConfig::from_env().typing_expiry.is_none());

    unsafe { clear_server_env() };
}

#[test]
fn unparseable_values_fall_back_to_defaults() {
    let _guard = env_guard();
    unsafe {
        clear_server_env();
        std::env::set_var("PORT", "not-a-port");
        std::env::set_var("DATABASE_URL", "  ");
    }

    let cfg = ServerConfig::from_env();
    assert_eq!(cfg.port, 3000);
    assert!(cfg.database_url.is_none());

    unsafe { clear_server_env() };
}
