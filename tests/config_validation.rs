//! Integration tests for configuration loading and validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use reliable_protocol::config::ProtocolConfig;
use reliable_protocol::protocol::dh::KeySize;
use reliable_protocol::utils::compression::CompressionKind;
use std::time::Duration;

#[test]
fn test_default_config_validates() {
    let config = ProtocolConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
    assert!(config.validate_strict().is_ok());
}

#[test]
fn test_min_rto_above_max_rto() {
    let mut config = ProtocolConfig::default();
    config.reliability.min_rto = Duration::from_secs(10);
    config.reliability.max_rto = Duration::from_secs(1);

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("exceeds maximum RTO")));
}

#[test]
fn test_initial_rto_outside_bounds() {
    let mut config = ProtocolConfig::default();
    config.reliability.initial_rto = Duration::from_millis(50);

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Initial RTO")));
}

#[test]
fn test_zero_max_attempts() {
    let mut config = ProtocolConfig::default();
    config.reliability.max_attempts = 0;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Max attempts must be greater than 0")));
}

#[test]
fn test_tick_slower_than_min_rto() {
    let mut config = ProtocolConfig::default();
    config.reliability.tick_interval = Duration::from_secs(1);

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Tick interval")));
}

#[test]
fn test_unit_size_cannot_carry_headers() {
    let mut config = ProtocolConfig::default();
    config.fragmentation.max_unit_size = 29;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("cannot carry")));

    config.fragmentation.max_unit_size = 30;
    assert!(config.validate().is_empty());
}

#[test]
fn test_compression_ratio_range() {
    for bad in [0.0, -0.5, 1.5] {
        let mut config = ProtocolConfig::default();
        config.transform.compression_enabled = true;
        config.transform.compression_ratio = bad;
        assert!(
            config
                .validate()
                .iter()
                .any(|e| e.contains("Invalid compression ratio")),
            "ratio {bad} should be rejected"
        );
    }

    let mut config = ProtocolConfig::default();
    config.transform.compression_enabled = true;
    config.transform.compression_ratio = 1.0;
    assert!(config.validate().is_empty());
}

#[test]
fn test_short_handshake_timeout() {
    let mut config = ProtocolConfig::default();
    config.security.handshake_timeout = Duration::from_millis(10);
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Handshake timeout too short")));
}

#[test]
fn test_validate_strict_lists_every_error() {
    let mut config = ProtocolConfig::default();
    config.reliability.max_attempts = 0;
    config.fragmentation.max_concurrent_sets = 0;

    let err = config.validate_strict().unwrap_err().to_string();
    assert!(err.contains("Max attempts"));
    assert!(err.contains("concurrent fragment sets"));
}

#[test]
fn test_from_toml_partial_sections() {
    let config = ProtocolConfig::from_toml(
        r#"
        [reliability]
        initial_rto = 300
        max_attempts = 8

        [fragmentation]
        max_unit_size = 1400

        [transform]
        compression_enabled = true
        compression_kind = "zstd"

        [security]
        key_size = "bits512"
        "#,
    )
    .expect("TOML should parse");

    assert_eq!(config.reliability.initial_rto, Duration::from_millis(300));
    assert_eq!(config.reliability.max_attempts, 8);
    // untouched fields keep their defaults
    assert_eq!(config.reliability.max_rto, Duration::from_secs(5));
    assert_eq!(config.fragmentation.max_unit_size, 1400);
    assert_eq!(config.transform.compression_kind, CompressionKind::Zstd);
    assert_eq!(config.security.key_size, KeySize::Bits512);
    assert!(config.validate().is_empty());
}

#[test]
fn test_from_toml_rejects_garbage() {
    assert!(ProtocolConfig::from_toml("[reliability\nmax_attempts = ").is_err());
    assert!(ProtocolConfig::from_toml("[security]\nkey_size = \"bits1024\"").is_err());
}

#[test]
fn test_example_config_roundtrips() {
    let text = ProtocolConfig::example_config();
    let parsed = ProtocolConfig::from_toml(&text).expect("example config should parse");
    assert_eq!(
        parsed.reliability.initial_rto,
        ProtocolConfig::default().reliability.initial_rto
    );
    assert!(parsed.validate().is_empty());
}

#[test]
fn test_from_file_missing() {
    assert!(ProtocolConfig::from_file("/nonexistent/reliable-protocol.toml").is_err());
}
