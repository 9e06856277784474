// 配置验证器
// 逐个配置段校验，并一次性汇总全部错误

use crate::config::{
    AddonsConfig, AppConfig, DatabaseConfig, EnvironmentConfig, LoggingConfig, RegistryConfig,
    RestartConfig, ServerConfig,
};
use nasplane_common::CommonError;
use url::Url;

/// 支持的数据库 URL 前缀
const DATABASE_SCHEMES: [&str; 3] = ["sqlite:", "postgres://", "postgresql://"];

/// 配置验证器
pub struct ConfigValidator;

impl ConfigValidator {
    /// 验证完整配置
    pub fn validate_all(config: &AppConfig) -> Result<(), Vec<CommonError>> {
        let errors: Vec<CommonError> = [
            Self::validate_server(&config.server),
            Self::validate_database(&config.database),
            Self::validate_logging(&config.logging),
            Self::validate_addons(&config.addons),
            Self::validate_registry(&config.registry),
            Self::validate_restart(&config.restart),
            Self::validate_environment(&config.environment),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// 验证服务器配置
    pub fn validate_server(config: &ServerConfig) -> Result<(), CommonError> {
        if config.port == 0 {
            return Err(CommonError::validation("服务器端口不能为 0"));
        }

        if config.host.is_empty() {
            return Err(CommonError::validation("服务器主机地址不能为空"));
        }

        if let Some(workers) = config.workers {
            if workers == 0 {
                return Err(CommonError::validation("工作线程数不能为 0"));
            }
        }

        Ok(())
    }

    /// 验证数据库配置
    pub fn validate_database(config: &DatabaseConfig) -> Result<(), CommonError> {
        if config.url.is_empty() {
            return Err(CommonError::validation("数据库 URL 不能为空"));
        }

        if !DATABASE_SCHEMES.iter().any(|scheme| config.url.starts_with(scheme)) {
            return Err(CommonError::validation(format!(
                "不支持的数据库 URL: {}，有效前缀: {:?}",
                config.url, DATABASE_SCHEMES
            )));
        }

        if config.max_connections == 0 {
            return Err(CommonError::validation("数据库最大连接数不能为 0"));
        }

        if config.min_connections > config.max_connections {
            return Err(CommonError::validation("数据库最小连接数不能大于最大连接数"));
        }

        if config.connect_timeout == 0 {
            return Err(CommonError::validation("数据库连接超时不能为 0"));
        }

        Ok(())
    }

    /// 验证日志配置
    pub fn validate_logging(config: &LoggingConfig) -> Result<(), CommonError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.level.as_str()) {
            return Err(CommonError::validation(format!(
                "无效的日志级别: {}，有效值: {:?}",
                config.level, valid_levels
            )));
        }

        let valid_formats = ["json", "pretty", "compact"];
        if !valid_formats.contains(&config.format.as_str()) {
            return Err(CommonError::validation(format!(
                "无效的日志格式: {}，有效值: {:?}",
                config.format, valid_formats
            )));
        }

        if config.file_enabled && config.file_path.as_deref().map_or(true, str::is_empty) {
            return Err(CommonError::validation("启用文件日志时必须指定日志文件路径"));
        }

        Ok(())
    }

    /// 验证插件配置
    pub fn validate_addons(config: &AddonsConfig) -> Result<(), CommonError> {
        if config.install_root.trim().is_empty() {
            return Err(CommonError::validation("插件安装根目录不能为空"));
        }

        if let Some(dir) = &config.manifest_dir {
            if dir.trim().is_empty() {
                return Err(CommonError::validation("插件清单目录不能为空字符串"));
            }
        }

        if config.download_timeout == 0 {
            return Err(CommonError::validation("插件包下载超时必须大于 0"));
        }

        if config.max_download_mb == 0 {
            return Err(CommonError::validation("插件包大小上限必须大于 0"));
        }

        Ok(())
    }

    /// 验证注册表配置
    pub fn validate_registry(config: &RegistryConfig) -> Result<(), CommonError> {
        let url = Url::parse(&config.url)
            .map_err(|e| CommonError::validation(format!("注册表 URL 格式无效: {}", e)))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(CommonError::validation("注册表 URL 必须使用 http 或 https"));
        }

        if config.timeout == 0 {
            return Err(CommonError::validation("注册表请求超时不能为 0"));
        }

        Ok(())
    }

    /// 验证重启配置
    pub fn validate_restart(config: &RestartConfig) -> Result<(), CommonError> {
        match config.strategy.as_str() {
            "exit" => Ok(()),
            "systemctl" if config.unit.trim().is_empty() => Err(CommonError::validation(
                "systemctl 重启策略必须指定服务单元名称",
            )),
            "systemctl" => Ok(()),
            other => Err(CommonError::validation(format!(
                "无效的重启策略: {}，有效值: [\"exit\", \"systemctl\"]",
                other
            ))),
        }
    }

    /// 验证环境配置
    pub fn validate_environment(config: &EnvironmentConfig) -> Result<(), CommonError> {
        let valid_environments = ["development", "staging", "production", "test"];
        if !valid_environments.contains(&config.name.as_str()) {
            return Err(CommonError::validation(format!(
                "无效的环境名称: {}，有效值: {:?}",
                config.name, valid_environments
            )));
        }

        Ok(())
    }
}
