// 插件商店 API 处理器
// 远程注册表目录的浏览、搜索、同步与更新

use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};

use crate::addons::{CatalogItem, UpdateOutcome};
use crate::api::handlers::addons::addon_id;
use crate::api::responses::HttpResponseBuilder;
use crate::api::state::AppState;
use crate::errors::NasError;

/// 目录列表
#[derive(Debug, Serialize, ToSchema)]
pub struct CatalogResponse {
    pub plugins: Vec<CatalogItem>,
    pub total: usize,
    pub last_sync: Option<DateTime<Utc>>,
}

impl CatalogResponse {
    fn new(plugins: Vec<CatalogItem>, last_sync: Option<DateTime<Utc>>) -> Self {
        Self {
            total: plugins.len(),
            plugins,
            last_sync,
        }
    }
}

/// 搜索参数
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct SearchQuery {
    /// 关键字（匹配 ID、名称、描述、标签）
    pub q: Option<String>,
    /// 分类或标签
    pub category: Option<String>,
}

/// 同步结果
#[derive(Debug, Serialize, ToSchema)]
pub struct SyncResponse {
    pub added: usize,
    pub updated: usize,
    pub total: usize,
    /// 本次同步后自动更新的插件
    pub auto_updated: Vec<String>,
    pub restart_scheduled: bool,
    pub message: String,
}

/// 更新结果
#[derive(Debug, Serialize, ToSchema)]
pub struct UpdateResponse {
    #[serde(flatten)]
    pub outcome: UpdateOutcome,
    pub restart_scheduled: bool,
}

/// 浏览目录，缓存过期时先尝试同步
#[utoipa::path(
    get,
    path = "/plugin-store",
    tag = "Plugin Store",
    responses(
        (status = 200, description = "获取成功", body = CatalogResponse),
        (status = 500, description = "存储错误")
    )
)]
pub async fn list_catalog(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    if let Err(e) = state.registry.sync_if_stale().await {
        warn!(error = %e, "注册表同步失败，返回缓存目录");
    }

    let entries = state.registry.catalog().await;
    let plugins = state.manager.catalog_items(entries).await?;
    let last_sync = state.registry.last_sync().await.map(|s| s.at);

    HttpResponseBuilder::ok(&req, CatalogResponse::new(plugins, last_sync))
}

/// 搜索目录
#[utoipa::path(
    get,
    path = "/plugin-store/search",
    tag = "Plugin Store",
    params(SearchQuery),
    responses(
        (status = 200, description = "搜索结果，按 ID 排序", body = CatalogResponse)
    )
)]
pub async fn search_catalog(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<SearchQuery>,
) -> ActixResult<HttpResponse> {
    let entries = state
        .registry
        .search(query.q.as_deref(), query.category.as_deref())
        .await;
    let plugins = state.manager.catalog_items(entries).await?;
    let last_sync = state.registry.last_sync().await.map(|s| s.at);

    HttpResponseBuilder::ok(&req, CatalogResponse::new(plugins, last_sync))
}

/// 已安装的注册表插件
#[utoipa::path(
    get,
    path = "/plugin-store/installed",
    tag = "Plugin Store",
    responses(
        (status = 200, description = "获取成功", body = CatalogResponse),
        (status = 500, description = "存储错误")
    )
)]
pub async fn list_installed(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let plugins = state.manager.installed_registry_addons().await?;
    let last_sync = state.registry.last_sync().await.map(|s| s.at);

    HttpResponseBuilder::ok(&req, CatalogResponse::new(plugins, last_sync))
}

/// 获取单个目录条目
#[utoipa::path(
    get,
    path = "/plugin-store/{id}",
    tag = "Plugin Store",
    params(("id" = String, Path, description = "插件 ID")),
    responses(
        (status = 200, description = "获取成功", body = CatalogItem),
        (status = 404, description = "目录中不存在")
    )
)]
pub async fn get_plugin(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<HttpResponse> {
    let id = addon_id(path)?;
    let entry = state
        .registry
        .entry(&id)
        .await
        .ok_or_else(|| NasError::not_found(format!("plugin {}", id)))?;

    let mut items = state.manager.catalog_items(vec![entry]).await?;
    match items.pop() {
        Some(item) => HttpResponseBuilder::ok(&req, item),
        None => Err(NasError::not_found(format!("plugin {}", id)).into()),
    }
}

/// 将已安装插件更新到目录中的版本
#[utoipa::path(
    post,
    path = "/plugin-store/{id}/update",
    tag = "Plugin Store",
    params(("id" = String, Path, description = "插件 ID")),
    responses(
        (status = 200, description = "更新完成或已是最新", body = UpdateResponse),
        (status = 404, description = "插件未安装或不在目录中"),
        (status = 500, description = "供给或存储失败")
    )
)]
pub async fn update_plugin(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<HttpResponse> {
    let id = addon_id(path)?;
    let outcome = state.manager.update(&id).await?;
    if outcome.updated {
        info!(addon_id = %id, version = %outcome.version, "插件已更新");
    }

    let restart_scheduled = state
        .manager
        .restart_after_updates(std::slice::from_ref(&outcome))
        .await;

    HttpResponseBuilder::ok(
        &req,
        UpdateResponse {
            outcome,
            restart_scheduled,
        },
    )
}

/// 强制同步远程注册表，随后更新开启了自动更新的插件
#[utoipa::path(
    post,
    path = "/plugin-store/sync",
    tag = "Plugin Store",
    responses(
        (status = 200, description = "同步成功", body = SyncResponse),
        (status = 500, description = "拉取或合并失败，目录保持不变")
    )
)]
pub async fn sync_registry(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let stats = state.registry.sync().await?;
    let total = state.registry.catalog().await.len();

    let outcomes = state.manager.apply_auto_updates().await.unwrap_or_else(|e| {
        warn!(error = %e, "自动更新检查失败");
        Vec::new()
    });
    let restart_scheduled = state.manager.restart_after_updates(&outcomes).await;

    HttpResponseBuilder::ok(
        &req,
        SyncResponse {
            added: stats.added,
            updated: stats.updated,
            total,
            auto_updated: outcomes.into_iter().map(|o| o.addon_id).collect(),
            restart_scheduled,
            message: "Plugin registry synchronized successfully".to_string(),
        },
    )
}

/// 配置插件商店路由
pub fn configure_plugin_store_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/plugin-store")
            .route("", web::get().to(list_catalog))
            .route("/search", web::get().to(search_catalog))
            .route("/installed", web::get().to(list_installed))
            .route("/sync", web::post().to(sync_registry))
            .route("/{id}", web::get().to(get_plugin))
            .route("/{id}/update", web::post().to(update_plugin)),
    );
}
