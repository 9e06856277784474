// 配置加载器
// 处理 .env、配置文件和环境变量，返回经过校验的配置

use crate::config::AppConfig;
use config::ConfigError;
use dotenvy::dotenv;
use nasplane_common::CommonError;
use tracing::{debug, info};

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 加载并校验配置
    ///
    /// 配置由启动流程持有并向下传递，不存放在全局变量中。
    pub fn load() -> Result<AppConfig, CommonError> {
        // .env 文件可选；此时日志系统尚未初始化
        let _ = dotenv();

        let config = AppConfig::load().map_err(convert_config_error)?;
        config.validate()?;

        Ok(config)
    }

    /// 记录配置摘要
    pub fn log_summary(config: &AppConfig) {
        info!(
            environment = %config.environment.name,
            version = %config.environment.version,
            "配置加载成功"
        );
        info!("服务器: {}:{}", config.server.host, config.server.port);
        info!(
            "数据库连接池: {}-{}",
            config.database.min_connections, config.database.max_connections
        );
        info!(
            url = %config.registry.url,
            cache_ttl = config.registry.cache_ttl,
            "插件注册表"
        );
        info!(
            strategy = %config.restart.strategy,
            delay_ms = config.restart.delay_ms,
            "重启协调"
        );
        debug!(
            install_root = %config.addons.install_root,
            provisioning_enabled = config.addons.provisioning_enabled,
            download_timeout = config.addons.download_timeout,
            max_download_mb = config.addons.max_download_mb,
            manifest_dir = ?config.addons.manifest_dir,
            "插件部署"
        );
    }
}

/// 配置错误转换辅助函数
pub fn convert_config_error(err: ConfigError) -> CommonError {
    CommonError::configuration(format!("配置错误: {}", err))
}
