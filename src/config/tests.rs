// 配置系统测试

#[cfg(test)]
mod tests {
    use crate::config::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert!(config.database.url.starts_with("sqlite:"));
        assert_eq!(config.registry.timeout, 30);
        assert_eq!(config.registry.cache_ttl, 3600);
        assert_eq!(config.restart.delay_ms, 3000);
        assert_eq!(config.restart.delay(), std::time::Duration::from_secs(3));
        assert_eq!(config.restart.strategy, "exit");
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_config_collects_all_errors() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        config.database.max_connections = 0;
        config.restart.strategy = "reboot".to_string();

        let errors = ConfigValidator::validate_all(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_environment_methods() {
        let mut config = AppConfig::default();

        config.environment.name = "development".to_string();
        assert!(config.is_development());
        assert!(!config.is_production());

        config.environment.name = "production".to_string();
        assert!(config.is_production());
        assert!(!config.is_test());

        config.environment.name = "test".to_string();
        assert!(config.is_test());
    }

    #[test]
    fn test_config_validator_server() {
        let mut server_config = ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8080,
            workers: Some(4),
            keep_alive: 75,
        };
        assert!(ConfigValidator::validate_server(&server_config).is_ok());

        server_config.workers = Some(0);
        assert!(ConfigValidator::validate_server(&server_config).is_err());

        server_config.workers = None;
        server_config.host = String::new();
        assert!(ConfigValidator::validate_server(&server_config).is_err());
    }

    #[test]
    fn test_config_validator_database() {
        let mut db_config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout: 30,
            idle_timeout: 600,
        };
        assert!(ConfigValidator::validate_database(&db_config).is_ok());

        db_config.url = "postgresql://localhost/nasplane".to_string();
        assert!(ConfigValidator::validate_database(&db_config).is_ok());

        db_config.url = "mysql://localhost/nasplane".to_string();
        assert!(ConfigValidator::validate_database(&db_config).is_err());

        db_config.url = "sqlite::memory:".to_string();
        db_config.min_connections = 20;
        assert!(ConfigValidator::validate_database(&db_config).is_err());
    }

    #[test]
    fn test_config_validator_registry() {
        let mut registry = AppConfig::default().registry;
        assert!(ConfigValidator::validate_registry(&registry).is_ok());

        registry.url = "ftp://example.com/registry.json".to_string();
        assert!(ConfigValidator::validate_registry(&registry).is_err());

        registry.url = "not a url".to_string();
        assert!(ConfigValidator::validate_registry(&registry).is_err());

        registry.url = "http://localhost:9000/registry.json".to_string();
        registry.timeout = 0;
        assert!(ConfigValidator::validate_registry(&registry).is_err());
    }

    #[test]
    fn test_config_validator_addons() {
        let mut addons = AppConfig::default().addons;
        assert!(ConfigValidator::validate_addons(&addons).is_ok());
        assert_eq!(addons.download_timeout(), std::time::Duration::from_secs(300));
        assert_eq!(addons.max_download_bytes(), 512 * 1024 * 1024);

        addons.download_timeout = 0;
        assert!(ConfigValidator::validate_addons(&addons).is_err());

        addons.download_timeout = 60;
        addons.max_download_mb = 0;
        assert!(ConfigValidator::validate_addons(&addons).is_err());
    }

    #[test]
    fn test_config_validator_restart() {
        let mut restart = AppConfig::default().restart;
        assert!(ConfigValidator::validate_restart(&restart).is_ok());

        restart.strategy = "systemctl".to_string();
        assert!(ConfigValidator::validate_restart(&restart).is_ok());

        restart.unit = " ".to_string();
        assert!(ConfigValidator::validate_restart(&restart).is_err());
    }

    #[test]
    fn test_config_validator_logging() {
        let mut logging = AppConfig::default().logging;
        logging.file_enabled = true;
        logging.file_path = None;
        assert!(ConfigValidator::validate_logging(&logging).is_err());

        logging.file_path = Some("./logs/nasplane.log".to_string());
        assert!(ConfigValidator::validate_logging(&logging).is_ok());

        logging.level = "verbose".to_string();
        assert!(ConfigValidator::validate_logging(&logging).is_err());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9100

[restart]
strategy = "systemctl"
unit = "nas.service"
delay_ms = 500
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.restart.strategy, "systemctl");
        assert_eq!(config.restart.delay_ms, 500);
        assert_eq!(config.environment.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_load_from_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.server.port, 8080);
    }
}
