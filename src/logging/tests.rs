// 日志系统测试

#[cfg(test)]
mod tests {
    use crate::config::ConfigValidator;
    use crate::logging::LoggingSetup;
    use tracing::Level;

    #[test]
    fn test_parse_level() {
        assert_eq!(LoggingSetup::parse_level("trace"), Level::TRACE);
        assert_eq!(LoggingSetup::parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(LoggingSetup::parse_level("info"), Level::INFO);
        assert_eq!(LoggingSetup::parse_level("warn"), Level::WARN);
        assert_eq!(LoggingSetup::parse_level("error"), Level::ERROR);
        assert_eq!(LoggingSetup::parse_level("invalid"), Level::INFO);
    }

    #[test]
    fn test_preset_configs_are_valid() {
        for config in [
            LoggingSetup::development_config(),
            LoggingSetup::production_config(),
            LoggingSetup::test_config(),
        ] {
            assert!(ConfigValidator::validate_logging(&config).is_ok());
        }
    }

    #[test]
    fn test_production_config_writes_file() {
        let config = LoggingSetup::production_config();
        assert_eq!(config.format, "json");
        assert!(config.file_enabled);
        assert!(config.file_path.is_some());
    }

    #[test]
    fn test_test_config() {
        let config = LoggingSetup::test_config();
        assert_eq!(config.level, "warn");
        assert_eq!(config.format, "compact");
        assert!(!config.file_enabled);
    }

    #[test]
    fn test_env_filter_falls_back_on_garbage() {
        // 无效指令不会 panic，而是回退到 info
        let filter = LoggingSetup::env_filter("[[not a filter");
        assert!(!filter.to_string().is_empty());
    }
}
