// 健康检查处理器

use actix_web::{http::StatusCode, web, HttpRequest, HttpResponse, Result as ActixResult};
use chrono::Utc;

use crate::api::responses::HttpResponseBuilder;
use crate::api::state::AppState;
use crate::health::{check_database, HealthReport, HealthStatus, SERVICE_NAME};

/// 详细健康检查
///
/// 返回服务、数据库、重启计划与待核对插件的状态
#[utoipa::path(
    get,
    path = "/health/detailed",
    tag = "Health",
    responses(
        (status = 200, description = "服务健康或降级", body = HealthReport),
        (status = 503, description = "服务不健康", body = HealthReport)
    )
)]
pub async fn health_detailed(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let dependencies = vec![check_database(state.db.as_ref()).await];
    let status = HealthReport::overall(&dependencies);

    let report = HealthReport {
        status,
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        dependencies,
        restart: state.manager.restart_coordinator().status(),
        pending_reconciliation: state.manager.pending_reconciliation(),
        last_registry_sync: state.registry.last_sync().await.map(|s| s.at),
    };

    let status_code = match status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    HttpResponseBuilder::with_status(&req, status_code, report)
}

/// 配置健康检查路由
pub fn configure_health_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health/detailed", web::get().to(health_detailed));
}
