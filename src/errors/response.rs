// 错误响应格式化

use crate::errors::NasError;
use actix_web::HttpResponse;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// 错误响应结构
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetail,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip)]
    status: u16,
}

/// 错误详情
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    /// 从 NasError 创建错误响应
    pub fn from_error(error: &NasError) -> Self {
        let details = match error {
            NasError::Database { code: Some(code), .. } => {
                Some(serde_json::json!({ "database_code": code }))
            }
            NasError::Validation { field, .. } => Some(serde_json::json!({ "field": field })),
            NasError::Provisioning { addon_id, .. } => {
                Some(serde_json::json!({ "addon_id": addon_id }))
            }
            NasError::ExternalService { service, .. } => {
                Some(serde_json::json!({ "service": service }))
            }
            NasError::Timeout { operation } => Some(serde_json::json!({ "operation": operation })),
            _ => None,
        };

        Self {
            success: false,
            error: ErrorDetail {
                code: error.error_code().to_string(),
                message: error.to_string(),
                details,
            },
            timestamp: Utc::now(),
            request_id: None,
            status: error.status_code(),
        }
    }

    /// 设置请求 ID
    pub fn with_request_id(mut self, request_id: String) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// HTTP 状态码
    pub fn status(&self) -> u16 {
        self.status
    }

    /// 转换为 HTTP 响应
    pub fn into_http_response(self) -> HttpResponse {
        let mut response = HttpResponse::build(
            actix_web::http::StatusCode::from_u16(self.status)
                .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR),
        );

        if let Some(ref request_id) = self.request_id {
            response.insert_header(("X-Request-ID", request_id.clone()));
        }

        response.json(self)
    }
}
