use actix_web::{HttpResponse, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use utoipa::ToSchema;

use crate::addons::RestartStatus;
use crate::db::DatabaseManager;

pub const SERVICE_NAME: &str = "nasplane";

/// 健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// 依赖健康状态
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DependencyHealth {
    pub name: String,
    pub status: HealthStatus,
    pub latency_ms: Option<u64>,
    pub message: Option<String>,
}

/// 详细健康报告
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub dependencies: Vec<DependencyHealth>,
    pub restart: RestartStatus,
    /// 等待按系统状态核对的插件
    pub pending_reconciliation: Vec<String>,
    pub last_registry_sync: Option<DateTime<Utc>>,
}

impl HealthReport {
    /// 依赖中最差的状态
    pub fn overall(dependencies: &[DependencyHealth]) -> HealthStatus {
        dependencies
            .iter()
            .fold(HealthStatus::Healthy, |acc, dep| match (acc, dep.status) {
                (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => {
                    HealthStatus::Unhealthy
                }
                (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => {
                    HealthStatus::Degraded
                }
                _ => HealthStatus::Healthy,
            })
    }
}

/// 检查数据库连接
pub async fn check_database(db: Option<&DatabaseManager>) -> DependencyHealth {
    let Some(db) = db else {
        return DependencyHealth {
            name: "database".to_string(),
            status: HealthStatus::Degraded,
            latency_ms: None,
            message: Some("使用内存存储".to_string()),
        };
    };

    match db.health_check().await {
        Ok(latency) => DependencyHealth {
            name: "database".to_string(),
            status: HealthStatus::Healthy,
            latency_ms: Some(latency.as_millis() as u64),
            message: None,
        },
        Err(e) => DependencyHealth {
            name: "database".to_string(),
            status: HealthStatus::Unhealthy,
            latency_ms: None,
            message: Some(e.to_string()),
        },
    }
}

/// 健康检查端点
pub async fn health_check() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339()
    })))
}
