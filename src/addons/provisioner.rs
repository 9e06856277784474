// 插件系统资源供给
// 内置插件通过 apt/systemctl 安装，注册表插件下载并解压到安装目录

use crate::addons::manifest::{AddonManifest, Distribution};
use crate::config::AddonsConfig;
use crate::errors::NasError;
use async_trait::async_trait;
use flate2::read::GzDecoder;
use nasplane_common::AddonSource;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;

/// 系统上的实际状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct ProvisionProbe {
    pub packages_ok: bool,
    pub services_ok: bool,
}

impl ProvisionProbe {
    /// 插件资源是否已落地
    pub fn is_materialized(&self) -> bool {
        self.packages_ok
    }
}

/// 插件资源供给器
#[async_trait]
pub trait AddonProvisioner: Send + Sync {
    /// 安装插件所需的软件包、服务或文件
    async fn provision(&self, manifest: &AddonManifest) -> Result<(), NasError>;

    /// 移除插件资源
    async fn deprovision(&self, manifest: &AddonManifest) -> Result<(), NasError>;

    /// 检查插件资源的实际状态
    async fn probe(&self, manifest: &AddonManifest) -> Result<ProvisionProbe, NasError>;

    /// 启用已安装的插件
    async fn activate(&self, manifest: &AddonManifest) -> Result<(), NasError>;

    /// 停用插件但保留其资源
    async fn deactivate(&self, manifest: &AddonManifest) -> Result<(), NasError>;
}

/// 插件包下载限制
#[derive(Debug, Clone, Copy)]
pub struct DownloadLimits {
    pub timeout: Duration,
    pub max_bytes: u64,
}

impl Default for DownloadLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            max_bytes: 512 * 1024 * 1024,
        }
    }
}

impl From<&AddonsConfig> for DownloadLimits {
    fn from(config: &AddonsConfig) -> Self {
        Self {
            timeout: config.download_timeout(),
            max_bytes: config.max_download_bytes(),
        }
    }
}

/// 基于系统命令的供给器
///
/// `enabled == false` 时只记录日志（开发环境或测试）。
pub struct SystemProvisioner {
    install_root: PathBuf,
    enabled: bool,
    limits: DownloadLimits,
    client: reqwest::Client,
}

impl SystemProvisioner {
    pub fn new(
        install_root: impl Into<PathBuf>,
        enabled: bool,
        limits: DownloadLimits,
    ) -> Result<Self, NasError> {
        let client = reqwest::Client::builder()
            .timeout(limits.timeout)
            .user_agent(concat!("nasplane/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NasError::configuration(format!("HTTP 客户端创建失败: {}", e)))?;

        Ok(Self {
            install_root: install_root.into(),
            enabled,
            limits,
            client,
        })
    }

    pub fn from_config(config: &AddonsConfig) -> Result<Self, NasError> {
        Self::new(
            &config.install_root,
            config.provisioning_enabled,
            DownloadLimits::from(config),
        )
    }

    /// 注册表插件的安装目录
    pub fn addon_dir(&self, addon_id: &str) -> PathBuf {
        self.install_root.join(addon_id)
    }

    async fn install_packages(&self, manifest: &AddonManifest) -> Result<(), NasError> {
        if manifest.system_packages.is_empty() {
            return Ok(());
        }

        run_command(&manifest.id, "apt-get", &["update"]).await?;

        let mut args = vec!["install", "-y"];
        args.extend(manifest.system_packages.iter().map(String::as_str));
        run_command(&manifest.id, "apt-get", &args).await
    }

    async fn start_services(&self, manifest: &AddonManifest) -> Result<(), NasError> {
        for service in &manifest.services {
            let enabled = run_command(&manifest.id, "systemctl", &["enable", service.as_str()]).await;
            if let Err(e) = enabled {
                warn!(addon_id = %manifest.id, service = %service, error = %e, "启用服务失败");
            }
            run_command(&manifest.id, "systemctl", &["start", service]).await?;
        }
        Ok(())
    }

    async fn install_bundle(
        &self,
        manifest: &AddonManifest,
        distribution: &Distribution,
    ) -> Result<(), NasError> {
        info!(addon_id = %manifest.id, url = %distribution.download_url, "下载插件包");

        let bytes = self.download(&manifest.id, &distribution.download_url).await?;

        if let Some(expected) = &distribution.checksum {
            verify_checksum(&manifest.id, &bytes, expected)?;
        } else {
            warn!(addon_id = %manifest.id, "插件包未提供校验和");
        }

        let dest = self.addon_dir(&manifest.id);
        let addon_id = manifest.id.clone();
        tokio::task::spawn_blocking(move || extract_archive(&addon_id, &bytes, &dest))
            .await
            .map_err(|e| NasError::internal(format!("解压任务失败: {}", e)))?
    }

    /// 分块读取插件包，超过大小上限立即中止
    async fn download(&self, addon_id: &str, url: &str) -> Result<Vec<u8>, NasError> {
        let max = self.limits.max_bytes;
        let mut response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(NasError::provisioning(
                addon_id,
                format!("下载失败: HTTP {}", response.status()),
            ));
        }

        if let Some(length) = response.content_length() {
            if length > max {
                return Err(too_large(addon_id, length, max));
            }
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let received = (bytes.len() + chunk.len()) as u64;
            if received > max {
                return Err(too_large(addon_id, received, max));
            }
            bytes.extend_from_slice(&chunk);
        }

        debug!(addon_id, size = bytes.len(), "插件包下载完成");
        Ok(bytes)
    }
}

fn too_large(addon_id: &str, size: u64, max: u64) -> NasError {
    NasError::provisioning(
        addon_id,
        format!("插件包过大: {} 字节，上限 {} 字节", size, max),
    )
}

#[async_trait]
impl AddonProvisioner for SystemProvisioner {
    #[instrument(skip(self, manifest), fields(addon_id = %manifest.id))]
    async fn provision(&self, manifest: &AddonManifest) -> Result<(), NasError> {
        if !self.enabled {
            info!(
                packages = ?manifest.system_packages,
                services = ?manifest.services,
                "供给已禁用，跳过插件安装"
            );
            return Ok(());
        }

        let result = match (manifest.source, &manifest.distribution) {
            (AddonSource::Registry, Some(distribution)) => {
                self.install_bundle(manifest, distribution).await
            }
            (AddonSource::Registry, None) => Err(NasError::provisioning(
                &manifest.id,
                "注册表插件缺少分发信息",
            )),
            (AddonSource::Bundled, _) => match self.install_packages(manifest).await {
                Ok(()) => self.start_services(manifest).await,
                Err(e) => Err(e),
            },
        };

        result.map_err(|e| provisioning_error(&manifest.id, e))
    }

    #[instrument(skip(self, manifest), fields(addon_id = %manifest.id))]
    async fn deprovision(&self, manifest: &AddonManifest) -> Result<(), NasError> {
        if !self.enabled {
            info!("供给已禁用，跳过插件卸载");
            return Ok(());
        }

        if manifest.source == AddonSource::Registry {
            let dir = self.addon_dir(&manifest.id);
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(NasError::provisioning(
                        &manifest.id,
                        format!("删除 {} 失败: {}", dir.display(), e),
                    ));
                }
            }
            return Ok(());
        }

        for service in &manifest.services {
            for action in ["stop", "disable"] {
                let result = run_command(&manifest.id, "systemctl", &[action, service.as_str()]).await;
                if let Err(e) = result {
                    warn!(service = %service, action, error = %e, "停止服务失败");
                }
            }
        }

        if !manifest.system_packages.is_empty() {
            let mut args = vec!["remove", "-y"];
            args.extend(manifest.system_packages.iter().map(String::as_str));
            run_command(&manifest.id, "apt-get", &args).await?;
        }

        Ok(())
    }

    #[instrument(skip(self, manifest), fields(addon_id = %manifest.id))]
    async fn activate(&self, manifest: &AddonManifest) -> Result<(), NasError> {
        if !self.enabled || manifest.services.is_empty() {
            debug!(services = ?manifest.services, "无需启动服务");
            return Ok(());
        }

        for service in &manifest.services {
            run_command(&manifest.id, "systemctl", &["start", service.as_str()])
                .await
                .map_err(|e| provisioning_error(&manifest.id, e))?;
        }
        Ok(())
    }

    #[instrument(skip(self, manifest), fields(addon_id = %manifest.id))]
    async fn deactivate(&self, manifest: &AddonManifest) -> Result<(), NasError> {
        if !self.enabled || manifest.services.is_empty() {
            debug!(services = ?manifest.services, "无需停止服务");
            return Ok(());
        }

        for service in &manifest.services {
            run_command(&manifest.id, "systemctl", &["stop", service.as_str()])
                .await
                .map_err(|e| provisioning_error(&manifest.id, e))?;
        }
        Ok(())
    }

    async fn probe(&self, manifest: &AddonManifest) -> Result<ProvisionProbe, NasError> {
        if !self.enabled {
            return Ok(ProvisionProbe {
                packages_ok: true,
                services_ok: true,
            });
        }

        if manifest.source == AddonSource::Registry {
            let exists = tokio::fs::try_exists(self.addon_dir(&manifest.id)).await?;
            return Ok(ProvisionProbe {
                packages_ok: exists,
                services_ok: exists,
            });
        }

        let mut packages_ok = true;
        for package in &manifest.system_packages {
            if !command_succeeds("dpkg", &["-s", package.as_str()]).await {
                debug!(addon_id = %manifest.id, package = %package, "软件包未安装");
                packages_ok = false;
                break;
            }
        }

        let mut services_ok = true;
        for service in &manifest.services {
            if !command_succeeds("systemctl", &["is-active", "--quiet", service.as_str()]).await {
                debug!(addon_id = %manifest.id, service = %service, "服务未运行");
                services_ok = false;
                break;
            }
        }

        Ok(ProvisionProbe {
            packages_ok,
            services_ok,
        })
    }
}

/// 其他错误统一包装为供给错误
fn provisioning_error(addon_id: &str, err: NasError) -> NasError {
    match err {
        NasError::Provisioning { .. } => err,
        other => NasError::provisioning(addon_id, other.to_string()),
    }
}

async fn run_command(addon_id: &str, program: &str, args: &[&str]) -> Result<(), NasError> {
    debug!(addon_id, program, ?args, "执行系统命令");

    let output = Command::new(program)
        .args(args)
        .env("DEBIAN_FRONTEND", "noninteractive")
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| NasError::provisioning(addon_id, format!("无法执行 {}: {}", program, e)))?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(NasError::provisioning(
        addon_id,
        format!("{} {} 失败 ({}): {}", program, args.join(" "), output.status, stderr.trim()),
    ))
}

async fn command_succeeds(program: &str, args: &[&str]) -> bool {
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

/// 校验 sha256（十六进制，大小写不敏感）
pub fn verify_checksum(addon_id: &str, bytes: &[u8], expected: &str) -> Result<(), NasError> {
    let actual = format!("{:x}", Sha256::digest(bytes));
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(NasError::provisioning(
            addon_id,
            format!("校验和不匹配: 期望 {}, 实际 {}", expected, actual),
        ))
    }
}

/// 解压 tar.gz 到目标目录
///
/// 先解压到同级临时目录，成功后替换目标目录；拒绝包含 `..` 或绝对路径的条目。
pub fn extract_archive(addon_id: &str, bytes: &[u8], dest: &Path) -> Result<(), NasError> {
    let staging = staging_dir(dest);
    if staging.exists() {
        std::fs::remove_dir_all(&staging)?;
    }
    std::fs::create_dir_all(&staging)?;

    if let Err(e) = unpack_into(addon_id, bytes, &staging) {
        let _ = std::fs::remove_dir_all(&staging);
        return Err(e);
    }

    if dest.exists() {
        std::fs::remove_dir_all(dest)?;
    }
    std::fs::rename(&staging, dest)?;

    info!(addon_id, dest = %dest.display(), "插件包已解压");
    Ok(())
}

fn staging_dir(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{}.staging", name))
}

fn unpack_into(addon_id: &str, bytes: &[u8], staging: &Path) -> Result<(), NasError> {
    let mut archive = tar::Archive::new(GzDecoder::new(Cursor::new(bytes)));

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();

        let unsafe_component = path.components().any(|c| {
            matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_))
        });
        if unsafe_component {
            return Err(NasError::provisioning(
                addon_id,
                format!("插件包包含非法路径: {}", path.display()),
            ));
        }

        entry.unpack_in(staging)?;
    }

    Ok(())
}
