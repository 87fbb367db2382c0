use xr_domain::config::{Config, ConfigSeverity, OverflowMode};

#[test]
fn default_host_is_localhost() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
}

#[test]
fn default_validation_is_strict_and_enabled() {
    let config = Config::default();
    assert!(config.validation.enabled);
    assert_eq!(config.validation.mode, OverflowMode::Strict);
}

#[test]
fn truncate_mode_parses() {
    let toml_str = r#"
[validation]
mode = "truncate"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert!(config.validation.enabled);
    assert!(config.validation.truncate());
}

#[test]
fn default_config_is_valid() {
    let config = Config::default();
    assert!(config.is_valid(), "{:?}", config.validate());
}

#[test]
fn zero_port_and_bad_base_url_are_errors() {
    let toml_str = r#"
[server]
port = 0

[client]
base_url = "ftp://example.com"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issues = config.validate();
    let fields: Vec<&str> = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .map(|i| i.field.as_str())
        .collect();
    assert!(fields.contains(&"server.port"));
    assert!(fields.contains(&"client.base_url"));
    assert!(!config.is_valid());
}

#[test]
fn disabled_validation_is_only_a_warning() {
    let toml_str = r#"
[validation]
enabled = false
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issues = config.validate();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].severity, ConfigSeverity::Warning);
    assert!(config.is_valid());
}
