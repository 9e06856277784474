// 日志系统设置

use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// 日志系统初始化器
pub struct LoggingSetup;

impl LoggingSetup {
    /// 初始化日志系统
    ///
    /// 启用文件日志时返回后台写线程的 guard，调用方需持有到进程退出。
    pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
        let env_filter = Self::env_filter(&config.level);

        let mut layers: Vec<BoxedLayer> = vec![Self::stdout_layer(&config.format)];
        let mut guard = None;

        if config.file_enabled {
            let path = config
                .file_path
                .as_deref()
                .context("启用文件日志时必须指定日志文件路径")?;
            let (layer, file_guard) = Self::file_layer(Path::new(path))?;
            layers.push(layer);
            guard = Some(file_guard);
        }

        tracing_subscriber::registry()
            .with(layers)
            .with(env_filter)
            .try_init()
            .context("日志系统已初始化")?;

        tracing::info!("日志系统初始化完成");
        tracing::info!("日志级别: {}", config.level);
        tracing::info!("日志格式: {}", config.format);

        if config.file_enabled {
            tracing::info!("文件日志已启用: {:?}", config.file_path);
        }

        Ok(guard)
    }

    /// 创建环境过滤器，RUST_LOG 优先于配置
    pub fn env_filter(level: &str) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }

    fn stdout_layer(format: &str) -> BoxedLayer {
        match format {
            "json" => fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
            "pretty" => fmt::layer()
                .pretty()
                .with_target(true)
                .with_thread_names(true)
                .boxed(),
            "compact" => fmt::layer().compact().with_target(true).boxed(),
            _ => fmt::layer().with_target(true).boxed(),
        }
    }

    /// 按天滚动的 JSON 文件日志
    fn file_layer(path: &Path) -> Result<(BoxedLayer, WorkerGuard)> {
        let directory = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name = path
            .file_name()
            .with_context(|| format!("无效的日志文件路径: {}", path.display()))?;

        std::fs::create_dir_all(directory)
            .with_context(|| format!("无法创建日志目录: {}", directory.display()))?;

        let appender = tracing_appender::rolling::daily(directory, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);

        let layer = fmt::layer()
            .json()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .boxed();

        Ok((layer, guard))
    }

    /// 解析日志级别
    pub fn parse_level(level: &str) -> Level {
        match level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }

    /// 创建开发环境日志配置
    pub fn development_config() -> LoggingConfig {
        LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
            file_enabled: false,
            file_path: None,
        }
    }

    /// 创建生产环境日志配置
    pub fn production_config() -> LoggingConfig {
        LoggingConfig {
            level: "info".to_string(),
            format: "json".to_string(),
            file_enabled: true,
            file_path: Some("/var/log/nasplane/nasplane.log".to_string()),
        }
    }

    /// 创建测试环境日志配置
    pub fn test_config() -> LoggingConfig {
        LoggingConfig {
            level: "warn".to_string(),
            format: "compact".to_string(),
            file_enabled: false,
            file_path: None,
        }
    }
}
