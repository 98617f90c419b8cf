use super::types::*;

#[test]
fn test_load_toml_config() {
    let toml_str = r#"
database_url = "postgres://localhost/proxyctl"
admin_email = "ops@example.com"
"#;
    let tmp = std::env::temp_dir().join("proxyctl_test_config.toml");
    std::fs::write(&tmp, toml_str).unwrap();
    let cfg = ProxyCtlConfig::load(&tmp).unwrap();
    assert_eq!(cfg.database_url, "postgres://localhost/proxyctl");
    assert_eq!(cfg.admin_email.as_deref(), Some("ops@example.com"));
    std::fs::remove_file(&tmp).ok();
}

#[test]
fn test_load_json_config() {
    let json = r#"{
        "database_url": "postgres://localhost/proxyctl",
        "node_env": "development"
    }"#;
    let tmp = std::env::temp_dir().join("proxyctl_test_config.json");
    std::fs::write(&tmp, json).unwrap();
    let cfg = ProxyCtlConfig::load(&tmp).unwrap();
    assert_eq!(cfg.database_url, "postgres://localhost/proxyctl");
    assert!(cfg.is_development());
    std::fs::remove_file(&tmp).ok();
}

#[test]
fn test_validate_missing_database_url_fails() {
    let cfg = ProxyCtlConfig {
        database_url: String::new(),
        ..ProxyCtlConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_validate_production_requires_admin_email() {
    let cfg = ProxyCtlConfig {
        database_url: "postgres://localhost/proxyctl".into(),
        node_env: "production".into(),
        admin_email: None,
        ..ProxyCtlConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_validate_development_skips_admin_email() {
    let cfg = ProxyCtlConfig {
        database_url: "postgres://localhost/proxyctl".into(),
        node_env: "development".into(),
        admin_email: None,
        ..ProxyCtlConfig::default()
    };
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_deserialize_defaults() {
    let toml_str = r#"
database_url = "postgres://localhost/proxyctl"
"#;
    let cfg: ProxyCtlConfig = toml::from_str(toml_str).unwrap();
    assert_eq!(cfg.renew_before_days, 30);
    assert_eq!(cfg.alert_threshold_days, 14);
    assert_eq!(cfg.port, 3000);
    assert_eq!(cfg.cluster_timing.heartbeat_ms, 30_000);
    assert_eq!(cfg.cluster_timing.stale_ms, 120_000);
    assert_eq!(cfg.paths.nginx_dir, "/etc/nginx");
}

#[test]
fn test_resolved_hostname_uses_configured_value() {
    let cfg = ProxyCtlConfig {
        hostname: Some("node-a".into()),
        ..ProxyCtlConfig::default()
    };
    assert_eq!(cfg.resolved_hostname(), "node-a");
}

#[test]
fn test_unsupported_format() {
    let tmp = std::env::temp_dir().join("proxyctl_test.yml");
    std::fs::write(&tmp, "key: value").unwrap();
    assert!(ProxyCtlConfig::load(&tmp).is_err());
    std::fs::remove_file(&tmp).ok();
}
