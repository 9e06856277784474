// 数据库连接管理
// 处理数据库连接池和连接配置

use crate::config::DatabaseConfig;
use crate::errors::NasError;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::time::{Duration, Instant};
use tracing::{error, info, instrument};

/// 数据库连接管理器
///
/// 由启动流程创建并持有，连接句柄以克隆方式分发给各组件。
#[derive(Clone)]
pub struct DatabaseManager {
    connection: DatabaseConnection,
    config: DatabaseConfig,
}

impl DatabaseManager {
    /// 建立连接池并执行一次健康检查
    #[instrument(skip(config))]
    pub async fn connect(config: DatabaseConfig) -> Result<Self, NasError> {
        let mut opt = ConnectOptions::new(config.url.clone());

        opt.max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .idle_timeout(Duration::from_secs(config.idle_timeout))
            .sqlx_logging(true)
            .sqlx_logging_level(tracing::log::LevelFilter::Debug);

        info!(
            url = %Self::mask_password(&config.url),
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "连接数据库"
        );

        let connection = Database::connect(opt)
            .await
            .map_err(|e| NasError::database(format!("数据库连接失败: {}", e)))?;

        let manager = Self { connection, config };
        manager.health_check().await?;

        info!("数据库连接初始化完成");
        Ok(manager)
    }

    /// 获取数据库连接
    pub fn get_connection(&self) -> &DatabaseConnection {
        &self.connection
    }

    /// 获取配置
    pub fn get_config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// 数据库健康检查
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<Duration, NasError> {
        let start = Instant::now();
        let backend = self.connection.get_database_backend();

        match self
            .connection
            .execute(Statement::from_string(backend, "SELECT 1".to_string()))
            .await
        {
            Ok(_) => Ok(start.elapsed()),
            Err(e) => {
                error!(error = %e, "数据库健康检查失败");
                Err(NasError::database(format!("数据库健康检查失败: {}", e)))
            }
        }
    }

    /// 关闭数据库连接
    #[instrument(skip(self))]
    pub async fn close(self) -> Result<(), NasError> {
        info!("关闭数据库连接");

        self.connection
            .close()
            .await
            .map_err(|e| NasError::database(format!("关闭数据库连接失败: {}", e)))
    }

    /// 屏蔽密码信息用于日志记录
    pub fn mask_password(url: &str) -> String {
        match url::Url::parse(url) {
            Ok(mut parsed_url) if parsed_url.password().is_some() => {
                let _ = parsed_url.set_password(Some("***"));
                parsed_url.to_string()
            }
            Ok(_) => url.to_string(),
            Err(_) => "***".to_string(),
        }
    }
}
