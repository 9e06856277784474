// API 路由定义
// 定义所有 API 端点的路由配置

use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use utoipa::OpenApi;

use crate::api::handlers::{addons, health, plugin_store};
use crate::api::responses::HttpResponseBuilder;

/// API 文档聚合
#[derive(OpenApi)]
#[openapi(
    info(
        title = "NAS Plane API",
        description = "NAS 管理面插件生命周期接口",
        version = "1.0.0",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        health::health_detailed,
        addons::list_addons,
        addons::get_addon,
        addons::get_addon_status,
        addons::install_addon,
        addons::uninstall_addon,
        addons::enable_addon,
        addons::disable_addon,
        addons::update_addon_config,
        plugin_store::list_catalog,
        plugin_store::search_catalog,
        plugin_store::list_installed,
        plugin_store::get_plugin,
        plugin_store::update_plugin,
        plugin_store::sync_registry,
    ),
    components(schemas(
        crate::addons::AddonManifest,
        crate::addons::manifest::Distribution,
        crate::addons::InstallationRecord,
        crate::addons::AddonStatus,
        crate::addons::RegistryEntry,
        crate::addons::CatalogItem,
        crate::addons::UpdateOutcome,
        crate::addons::RestartStatus,
        crate::health::HealthReport,
        crate::health::HealthStatus,
        crate::health::DependencyHealth,
        addons::AddonView,
        addons::AddonDetail,
        addons::InstallResponse,
        addons::UninstallResponse,
        addons::AddonConfigRequest,
        plugin_store::CatalogResponse,
        plugin_store::SyncResponse,
        plugin_store::UpdateResponse,
        crate::errors::ErrorResponse,
        crate::errors::ErrorDetail,
    )),
    tags(
        (name = "Health", description = "健康检查相关接口"),
        (name = "Addons", description = "插件安装与状态相关接口"),
        (name = "Plugin Store", description = "远程插件目录相关接口"),
    )
)]
pub struct ApiDoc;

/// 配置 API 路由
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .configure(health::configure_health_routes)
            .configure(addons::configure_addon_routes)
            .configure(plugin_store::configure_plugin_store_routes)
            .route("/openapi.json", web::get().to(get_openapi_spec)),
    );
}

/// 获取 OpenAPI 规范
async fn get_openapi_spec(req: HttpRequest) -> ActixResult<HttpResponse> {
    HttpResponseBuilder::ok(&req, ApiDoc::openapi())
}

/// API 路由配置辅助函数
pub struct ApiRouteConfig;

impl ApiRouteConfig {
    /// 配置所有路由，包括根路径的存活检查
    pub fn configure_all(cfg: &mut web::ServiceConfig) {
        cfg.route("/health", web::get().to(crate::health::health_check));
        configure_routes(cfg);
    }
}
