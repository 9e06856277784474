// API 响应封装
// 成功响应统一为 {success, data}，错误响应由 NasError 生成

use actix_web::{http::StatusCode, HttpRequest, HttpResponse, Result as ActixResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::request_id_of;

/// 统一 API 响应结构
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    /// 是否成功
    pub success: bool,
    /// 响应数据
    pub data: T,
    /// 请求 ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// 响应时间戳
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            request_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }
}

/// HTTP 响应构建器
pub struct HttpResponseBuilder;

impl HttpResponseBuilder {
    /// 200 OK
    pub fn ok<T: Serialize>(req: &HttpRequest, data: T) -> ActixResult<HttpResponse> {
        Self::with_status(req, StatusCode::OK, data)
    }

    /// 指定状态码的成功包络
    pub fn with_status<T: Serialize>(
        req: &HttpRequest,
        status: StatusCode,
        data: T,
    ) -> ActixResult<HttpResponse> {
        let body = ApiResponse::ok(data).with_request_id(request_id_of(req));
        Ok(HttpResponse::build(status).json(body))
    }
}
