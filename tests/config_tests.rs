// Config loading and validation tests

use hostpanel::config::AppConfig;

const MINIMAL_CONFIG: &str = r#"
[server]
port = 8081
host = "0.0.0.0"
"#;

#[test]
fn test_minimal_config_gets_defaults() {
    let config = AppConfig::load_from_str(MINIMAL_CONFIG).expect("load_from_str");
    assert_eq!(config.server.port, 8081);
    assert!(config.server.api_token.is_none());
    assert_eq!(
        config.paths.main_config.to_str(),
        Some("/etc/nginx/nginx.conf")
    );
    assert_eq!(
        config.paths.sites_available.to_str(),
        Some("/etc/nginx/sites-available")
    );
    assert_eq!(config.monitoring.history_capacity, 288);
    assert_eq!(config.monitoring.cpu_threshold_percent, 90.0);
    assert_eq!(config.monitoring.memory_threshold_percent, 90.0);
    assert_eq!(config.timeouts.validate_secs, 30);
    assert_eq!(config.timeouts.certificate_secs, 120);
    assert_eq!(config.backup.retention_days, 30);
    assert_eq!(config.schedule.tick_secs, 60);
    assert_eq!(
        config.commands.validate.argv(),
        ["nginx", "-t", "-q", "-c", "{config}"]
    );
    assert!(config.alerts.alert_email.is_none());
}

#[test]
fn test_config_overrides_sections() {
    let s = format!(
        "{}\n[backup]\nretention_days = 3\nlocation = \"/srv/backups\"\n\n[commands]\nreload = [\"nginx\", \"-s\", \"reload\"]\n",
        MINIMAL_CONFIG
    );
    let config = AppConfig::load_from_str(&s).unwrap();
    assert_eq!(config.backup.retention_days, 3);
    assert_eq!(config.backup.location.to_str(), Some("/srv/backups"));
    assert_eq!(config.commands.reload.argv(), ["nginx", "-s", "reload"]);
    // Untouched commands keep their defaults.
    assert_eq!(
        config.commands.validate.argv(),
        ["nginx", "-t", "-q", "-c", "{config}"]
    );
}

#[test]
fn test_config_validation_rejects_invalid_port() {
    let bad = MINIMAL_CONFIG.replace("port = 8081", "port = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("server.port"));
}

#[test]
fn test_config_requires_server_section() {
    assert!(AppConfig::load_from_str("[paths]\nweb_root = \"/var/www\"\n").is_err());
}

#[test]
fn test_config_validation_rejects_bad_cron() {
    let bad = format!("{}\n[schedule]\nbackup = \"every night\"\n", MINIMAL_CONFIG);
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("schedule.backup"));
}

#[test]
fn test_config_accepts_five_field_cron() {
    let s = format!("{}\n[schedule]\nbackup = \"30 1 * * *\"\n", MINIMAL_CONFIG);
    let config = AppConfig::load_from_str(&s).unwrap();
    assert_eq!(config.schedule.backup, "30 1 * * *");
}

#[test]
fn test_config_validation_rejects_threshold_out_of_range() {
    let bad = format!("{}\n[monitoring]\ncpu_threshold_percent = 0.0\n", MINIMAL_CONFIG);
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("monitoring.cpu_threshold_percent"));

    let bad = format!("{}\n[monitoring]\nmemory_threshold_percent = 120.0\n", MINIMAL_CONFIG);
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("monitoring.memory_threshold_percent"));
}

#[test]
fn test_config_validation_rejects_empty_command() {
    let bad = format!("{}\n[commands]\nvalidate = []\n", MINIMAL_CONFIG);
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("commands.validate"));
}

#[test]
fn test_config_validation_rejects_zero_history_capacity() {
    let bad = format!("{}\n[monitoring]\nhistory_capacity = 0\n", MINIMAL_CONFIG);
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("monitoring.history_capacity"));
}

#[test]
fn test_config_validation_rejects_bad_archive_name() {
    let bad = format!(
        "{}\n[backup]\narchives = [{{ name = \"../etc\", path = \"/etc\" }}]\n",
        MINIMAL_CONFIG
    );
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("backup.archives"));
}

#[test]
fn test_config_validation_rejects_empty_token() {
    let bad = MINIMAL_CONFIG.replace("host = \"0.0.0.0\"", "host = \"0.0.0.0\"\napi_token = \"\"");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("server.api_token"));
}

#[test]
fn test_config_validation_rejects_empty_db_path() {
    let bad = format!("{}\n[database]\npath = \"\"\n", MINIMAL_CONFIG);
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("database.path"));
}

#[test]
fn test_config_validator_must_receive_config_path() {
    let bad = format!("{}\n[commands]\nvalidate = [\"nginx\", \"-t\"]\n", MINIMAL_CONFIG);
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("commands.validate"));
}

#[test]
fn test_rate_limit_defaults_and_validation() {
    let config = AppConfig::load_from_str(MINIMAL_CONFIG).unwrap();
    assert_eq!(config.server.rate_limit_max, 100);
    assert_eq!(config.server.rate_limit_window_secs, 900);

    let bad = format!("{}rate_limit_max = 0\n", MINIMAL_CONFIG);
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("server.rate_limit_max"));
}
