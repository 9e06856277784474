use actix_cors::Cors;
use actix_web::{web, App, HttpResponse, HttpServer, Result as ActixResult};
use std::path::Path;
use std::sync::Arc;

use nasplane::addons::manifest::{builtin_manifests, load_manifest_dir};
use nasplane::addons::restart::process_control;
use nasplane::addons::{
    AddonManager, DbCatalogStore, DbInstallationStore, HttpRegistrySource, ManifestStore,
    ManifestValidator, RegistryClient, RestartCoordinator, SystemProvisioner,
};
use nasplane::api::{ApiRouteConfig, AppState};
use nasplane::config::{AppConfig, ConfigLoader};
use nasplane::db::{DatabaseManager, MigrationManager};
use nasplane::errors::{ErrorHandlerMiddleware, NasError};
use nasplane::logging::LoggingSetup;

fn io_error(e: impl std::fmt::Display) -> std::io::Error {
    std::io::Error::other(e.to_string())
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // 初始化配置
    let config = ConfigLoader::load()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

    // 初始化结构化日志系统，guard 需在进程生命周期内保持
    let _log_guard = LoggingSetup::init(&config.logging).map_err(io_error)?;

    tracing::info!("🚀 启动 NAS Plane v{}", config.environment.version);
    ConfigLoader::log_summary(&config);

    let db = DatabaseManager::connect(config.database.clone())
        .await
        .map_err(io_error)?;

    tracing::info!(
        max_connections = db.get_config().max_connections,
        "数据库连接池已就绪"
    );

    let migrations = MigrationManager::new(db.get_connection().clone());
    let applied = migrations.migrate().await.map_err(io_error)?;
    if !applied.is_empty() {
        tracing::info!("应用了 {} 个数据库迁移", applied.len());
    }

    if config.is_production() && !config.addons.provisioning_enabled {
        tracing::warn!("生产环境未启用插件供给，安装与卸载只记录日志");
    }

    let state = build_state(&config, db.clone()).await.map_err(io_error)?;

    if config.registry.sync_on_startup {
        let registry = Arc::clone(&state.registry);
        let manager = Arc::clone(&state.manager);
        tokio::spawn(async move {
            if let Err(e) = registry.sync().await {
                tracing::warn!(error = %e, "启动时同步插件注册表失败");
                return;
            }
            match manager.apply_auto_updates().await {
                Ok(outcomes) => {
                    if manager.restart_after_updates(&outcomes).await {
                        tracing::info!(count = outcomes.len(), "自动更新完成，已计划重启");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "自动更新检查失败"),
            }
        });
    }

    tracing::info!("🌐 服务器启动地址: http://{}:{}", config.server.host, config.server.port);
    tracing::info!("📋 健康检查: http://{}:{}/health", config.server.host, config.server.port);

    let data = web::Data::new(state);
    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .max_age(3600),
            )
            .wrap(ErrorHandlerMiddleware)
            .wrap(tracing_actix_web::TracingLogger::default())
            .app_data(data.clone())
            .route("/", web::get().to(index))
            .configure(ApiRouteConfig::configure_all)
    })
    .keep_alive(std::time::Duration::from_secs(config.server.keep_alive));

    if let Some(workers) = config.server.workers {
        server = server.workers(workers);
    }

    server
        .bind((config.server.host.clone(), config.server.port))?
        .run()
        .await?;

    tracing::info!("服务器已停止，关闭数据库连接");
    db.close().await.map_err(io_error)
}

/// 组装插件管理所需的全部组件
async fn build_state(config: &AppConfig, db: DatabaseManager) -> Result<AppState, NasError> {
    let validator = ManifestValidator::new()?;
    let mut bundled = builtin_manifests();
    if let Some(dir) = &config.addons.manifest_dir {
        let extra = load_manifest_dir(Path::new(dir), &validator).await?;
        tracing::info!(count = extra.len(), dir = %dir, "加载额外插件清单");
        bundled.extend(extra);
    }

    let manifests = Arc::new(ManifestStore::new(bundled)?);
    let installations = Arc::new(DbInstallationStore::new(db.get_connection().clone()));
    let provisioner = Arc::new(SystemProvisioner::from_config(&config.addons)?);
    let restart = Arc::new(RestartCoordinator::new(
        config.restart.delay(),
        process_control(&config.restart),
    ));

    let manager = Arc::new(AddonManager::new(
        Arc::clone(&manifests),
        installations.clone(),
        provisioner,
        restart,
    ));
    let registry = Arc::new(RegistryClient::new(
        Arc::new(HttpRegistrySource::new(&config.registry)?),
        manifests,
        installations,
        Arc::new(DbCatalogStore::new(db.get_connection().clone())),
        config.registry.cache_ttl(),
    )?);
    registry.restore().await?;

    Ok(AppState::new(manager, registry, Some(db)))
}

/// 根路径处理器
async fn index() -> ActixResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "name": "NAS Plane",
        "version": env!("CARGO_PKG_VERSION"),
        "api": {
            "version": "v1",
            "base_url": "/api/v1",
            "openapi": "/api/v1/openapi.json"
        },
        "health": {
            "simple": "/health",
            "detailed": "/api/v1/health/detailed"
        },
        "timestamp": chrono::Utc::now()
    })))
}
