// 插件管理 API 处理器

use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use utoipa::ToSchema;

use crate::addons::{AddonManifest, AddonStatus, InstallationRecord};
use crate::api::responses::HttpResponseBuilder;
use crate::api::state::AppState;
use crate::errors::NasError;

/// 插件列表项：无安装记录时状态为合成的未安装记录
#[derive(Debug, Serialize, ToSchema)]
pub struct AddonView {
    pub manifest: AddonManifest,
    pub status: InstallationRecord,
}

/// 插件详情
#[derive(Debug, Serialize, ToSchema)]
pub struct AddonDetail {
    pub manifest: AddonManifest,
    pub status: AddonStatus,
}

/// 安装结果
#[derive(Debug, Serialize, ToSchema)]
pub struct InstallResponse {
    pub addon_id: String,
    pub version: String,
    pub previous_version: Option<String>,
    pub restart_scheduled: bool,
    pub message: String,
}

/// 卸载结果
#[derive(Debug, Serialize, ToSchema)]
pub struct UninstallResponse {
    pub addon_id: String,
    pub message: String,
    pub status: InstallationRecord,
}

/// 插件设置更新请求，省略的字段保持不变
#[derive(Debug, Deserialize, ToSchema)]
pub struct AddonConfigRequest {
    #[schema(value_type = Object)]
    pub config: Option<Value>,
    pub auto_update: Option<bool>,
}

/// 校验路径中的插件 ID
pub(crate) fn addon_id(path: web::Path<String>) -> Result<String, NasError> {
    let id = path.into_inner();
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(NasError::validation("id", "Addon ID is required"));
    }
    Ok(trimmed.to_string())
}

/// 状态查询：记录不存在时降级为未安装
async fn status_of(state: &AppState, manifest: &AddonManifest) -> Result<AddonStatus, NasError> {
    match state.manager.get_status(&manifest.id).await {
        Ok(record) => {
            let probe = state.manager.probe(manifest).await;
            Ok(AddonStatus::new(record, probe))
        }
        Err(e) if e.is_not_found() => Ok(AddonStatus::not_installed(&manifest.id)),
        Err(e) => Err(e),
    }
}

/// 列出所有插件及安装状态
#[utoipa::path(
    get,
    path = "/addons",
    tag = "Addons",
    responses(
        (status = 200, description = "获取成功", body = [AddonView]),
        (status = 500, description = "存储错误")
    )
)]
pub async fn list_addons(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let addons: Vec<AddonView> = state
        .manager
        .list_with_status()
        .await?
        .into_iter()
        .map(|item| AddonView {
            status: item
                .status
                .unwrap_or_else(|| InstallationRecord::never_installed(&item.manifest.id)),
            manifest: item.manifest,
        })
        .collect();

    HttpResponseBuilder::ok(&req, addons)
}

/// 获取插件清单和状态
#[utoipa::path(
    get,
    path = "/addons/{id}",
    tag = "Addons",
    params(("id" = String, Path, description = "插件 ID")),
    responses(
        (status = 200, description = "获取成功", body = AddonDetail),
        (status = 400, description = "插件 ID 为空"),
        (status = 404, description = "插件不存在")
    )
)]
pub async fn get_addon(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<HttpResponse> {
    let id = addon_id(path)?;
    let manifest = state.manager.get_manifest(&id).await?;
    let status = status_of(&state, &manifest).await?;

    HttpResponseBuilder::ok(&req, AddonDetail { manifest, status })
}

/// 获取插件安装状态
#[utoipa::path(
    get,
    path = "/addons/{id}/status",
    tag = "Addons",
    params(("id" = String, Path, description = "插件 ID")),
    responses(
        (status = 200, description = "获取成功，未安装时 installed 为 false", body = AddonStatus),
        (status = 404, description = "插件不存在"),
        (status = 500, description = "存储错误")
    )
)]
pub async fn get_addon_status(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<HttpResponse> {
    let id = addon_id(path)?;
    let manifest = state.manager.get_manifest(&id).await?;
    let status = status_of(&state, &manifest).await?;

    HttpResponseBuilder::ok(&req, status)
}

/// 安装插件，需要时计划服务重启
#[utoipa::path(
    post,
    path = "/addons/{id}/install",
    tag = "Addons",
    params(("id" = String, Path, description = "插件 ID")),
    responses(
        (status = 200, description = "安装成功", body = InstallResponse),
        (status = 404, description = "插件不存在"),
        (status = 409, description = "相同版本已安装"),
        (status = 500, description = "供给或存储失败")
    )
)]
pub async fn install_addon(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<HttpResponse> {
    let id = addon_id(path)?;
    info!(addon_id = %id, "通过 API 安装插件");

    let outcome = state.manager.install(&id).await?;

    let restart_scheduled = outcome.manifest.requires_restart
        && state.manager.schedule_restart().is_some();

    let message = if restart_scheduled {
        let delay = state.manager.restart_coordinator().delay();
        format!(
            "Addon installed successfully. Service will restart in {} seconds to initialize addon.",
            delay.as_secs()
        )
    } else if outcome.manifest.requires_restart {
        "Addon installed successfully. Restart the service to initialize addon.".to_string()
    } else {
        "Addon installed successfully".to_string()
    };

    HttpResponseBuilder::ok(
        &req,
        InstallResponse {
            addon_id: id,
            version: outcome.manifest.version,
            previous_version: outcome.previous_version,
            restart_scheduled,
            message,
        },
    )
}

/// 卸载插件
#[utoipa::path(
    delete,
    path = "/addons/{id}",
    tag = "Addons",
    params(("id" = String, Path, description = "插件 ID")),
    responses(
        (status = 200, description = "卸载成功", body = UninstallResponse),
        (status = 404, description = "插件从未安装"),
        (status = 409, description = "插件未安装"),
        (status = 500, description = "卸载失败")
    )
)]
pub async fn uninstall_addon(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<HttpResponse> {
    let id = addon_id(path)?;
    info!(addon_id = %id, "通过 API 卸载插件");

    let status = state.manager.uninstall(&id).await?;

    HttpResponseBuilder::ok(
        &req,
        UninstallResponse {
            addon_id: id,
            message: "Addon uninstalled successfully".to_string(),
            status,
        },
    )
}

/// 启用已安装的插件
#[utoipa::path(
    post,
    path = "/addons/{id}/enable",
    tag = "Addons",
    params(("id" = String, Path, description = "插件 ID")),
    responses(
        (status = 200, description = "已启用", body = InstallationRecord),
        (status = 404, description = "插件不存在或从未安装"),
        (status = 409, description = "插件未安装"),
        (status = 500, description = "启动服务失败")
    )
)]
pub async fn enable_addon(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<HttpResponse> {
    let id = addon_id(path)?;
    info!(addon_id = %id, "通过 API 启用插件");

    let record = state.manager.enable(&id).await?;
    HttpResponseBuilder::ok(&req, record)
}

/// 停用插件，保留安装
#[utoipa::path(
    post,
    path = "/addons/{id}/disable",
    tag = "Addons",
    params(("id" = String, Path, description = "插件 ID")),
    responses(
        (status = 200, description = "已停用", body = InstallationRecord),
        (status = 404, description = "插件不存在或从未安装"),
        (status = 409, description = "插件未安装"),
        (status = 500, description = "停止服务失败")
    )
)]
pub async fn disable_addon(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<HttpResponse> {
    let id = addon_id(path)?;
    info!(addon_id = %id, "通过 API 停用插件");

    let record = state.manager.disable(&id).await?;
    HttpResponseBuilder::ok(&req, record)
}

/// 更新插件配置与自动更新开关
#[utoipa::path(
    put,
    path = "/addons/{id}/config",
    tag = "Addons",
    params(("id" = String, Path, description = "插件 ID")),
    request_body = AddonConfigRequest,
    responses(
        (status = 200, description = "已更新", body = InstallationRecord),
        (status = 400, description = "配置不是 JSON 对象"),
        (status = 404, description = "插件不存在或从未安装"),
        (status = 409, description = "插件未安装")
    )
)]
pub async fn update_addon_config(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<AddonConfigRequest>,
) -> ActixResult<HttpResponse> {
    let id = addon_id(path)?;
    let AddonConfigRequest {
        config,
        auto_update,
    } = body.into_inner();

    let record = state.manager.configure(&id, config, auto_update).await?;
    HttpResponseBuilder::ok(&req, record)
}

/// 配置插件路由
pub fn configure_addon_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/addons")
            .route("", web::get().to(list_addons))
            .route("/{id}", web::get().to(get_addon))
            .route("/{id}", web::delete().to(uninstall_addon))
            .route("/{id}/status", web::get().to(get_addon_status))
            .route("/{id}/install", web::post().to(install_addon))
            .route("/{id}/enable", web::post().to(enable_addon))
            .route("/{id}/disable", web::post().to(disable_addon))
            .route("/{id}/config", web::put().to(update_addon_config)),
    );
}
