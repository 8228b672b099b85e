//! Integration tests for logging system

use bridge_traits::time::LogLevel;
use core_runtime::logging::{redact_if_sensitive, strip_query, LogFormat, LoggingConfig};

#[test]
fn test_logging_config_defaults() {
    let config = LoggingConfig::default();

    assert_eq!(config.level, LogLevel::Info);
    assert!(config.redact_pii);
    assert!(config.logger_sink.is_none());
    assert!(config.filter.is_none());
}

#[test]
fn test_redaction_of_credentials() {
    assert_eq!(redact_if_sensitive("access_token", "AT1"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("refresh_token", "RT1"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("code_verifier", "abc"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("Authorization", "Bearer AT1"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("direct_login_data", "idp"), "[REDACTED]");
}

#[test]
fn test_redaction_of_emails() {
    let redacted = redact_if_sensitive("email", "user@example.com");

    assert!(redacted.starts_with('u'));
    assert!(redacted.contains("[REDACTED]"));
    assert!(!redacted.contains("example.com"));
}

#[test]
fn test_normal_values_pass_through() {
    assert_eq!(redact_if_sensitive("region", "eu"), "eu");
    assert_eq!(redact_if_sensitive("flow", "direct"), "direct");
    assert_eq!(redact_if_sensitive("user_id", "user_123"), "user_123");
}

#[test]
fn test_callback_urls_lose_their_query() {
    assert_eq!(
        strip_query("com.example.app://auth.example.com/android/oauth/callback?code=abc123"),
        "com.example.app://auth.example.com/android/oauth/callback"
    );
    assert_eq!(
        strip_query("https://auth.example.com/oauth/authorize?code_challenge=x&nonce=y"),
        "https://auth.example.com/oauth/authorize"
    );
    assert_eq!(strip_query(""), "");
}

#[test]
fn test_config_chaining() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Warn)
        .with_pii_redaction(false)
        .with_spans(false)
        .with_target(false)
        .with_thread_info(true);

    assert_eq!(config.format, LogFormat::Compact);
    assert_eq!(config.level, LogLevel::Warn);
    assert!(!config.redact_pii);
    assert!(!config.enable_spans);
    assert!(!config.display_target);
    assert!(config.display_thread_info);
}
