// 服务重启协调
// 延迟触发，窗口内的多次请求合并为一次重启

use crate::config::RestartConfig;
use crate::errors::NasError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nasplane_common::RestartToken;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};
use utoipa::ToSchema;

/// 进程控制
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// 触发服务重启
    async fn trigger_restart(&self) -> Result<(), NasError>;
}

/// 直接退出进程，由进程管理器拉起
pub struct ExitProcessControl;

#[async_trait]
impl ProcessControl for ExitProcessControl {
    async fn trigger_restart(&self) -> Result<(), NasError> {
        warn!("进程即将退出以完成重启");
        std::process::exit(0)
    }
}

/// 通过 systemctl 重启服务单元
pub struct SystemctlProcessControl {
    unit: String,
}

impl SystemctlProcessControl {
    pub fn new(unit: impl Into<String>) -> Self {
        Self { unit: unit.into() }
    }
}

#[async_trait]
impl ProcessControl for SystemctlProcessControl {
    async fn trigger_restart(&self) -> Result<(), NasError> {
        info!(unit = %self.unit, "通过 systemctl 重启服务");

        let status = Command::new("systemctl")
            .args(["restart", self.unit.as_str()])
            .status()
            .await?;

        if status.success() {
            Ok(())
        } else {
            Err(NasError::external_service(
                "systemctl",
                format!("重启 {} 失败: {}", self.unit, status),
            ))
        }
    }
}

/// 按配置选择进程控制方式
pub fn process_control(config: &RestartConfig) -> Arc<dyn ProcessControl> {
    match config.strategy.as_str() {
        "systemctl" => Arc::new(SystemctlProcessControl::new(config.unit.clone())),
        _ => Arc::new(ExitProcessControl),
    }
}

struct Pending {
    token: RestartToken,
    deadline: Instant,
    scheduled_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct State {
    next_token: RestartToken,
    pending: Option<Pending>,
    fired: u64,
}

/// 重启计划
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RestartStatus {
    pub pending: bool,
    pub token: Option<RestartToken>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub fires_in_ms: Option<u64>,
    pub fired: u64,
}

/// 重启协调器
///
/// 每次 `schedule` 都会取消尚未触发的计划并从当前时间重新计时。
pub struct RestartCoordinator {
    state: Arc<Mutex<State>>,
    delay: Duration,
    control: Arc<dyn ProcessControl>,
}

impl RestartCoordinator {
    pub fn new(delay: Duration, control: Arc<dyn ProcessControl>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            delay,
            control,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// 计划一次重启，返回本次计划的令牌
    ///
    /// 没有运行时可用时不计划，返回 `None`。
    pub fn schedule(&self) -> Option<RestartToken> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                error!(error = %e, "没有可用的异步运行时，无法计划重启");
                return None;
            }
        };

        let mut state = lock(&self.state);
        state.next_token += 1;
        let token = state.next_token;

        if let Some(previous) = state.pending.take() {
            previous.handle.abort();
            info!(previous = previous.token, token, "合并重启请求");
        }

        let deadline = Instant::now() + self.delay;
        let shared = Arc::clone(&self.state);
        let control = Arc::clone(&self.control);

        let handle = runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;

            {
                let mut state = lock(&shared);
                match &state.pending {
                    Some(pending) if pending.token == token => {}
                    _ => return,
                }
                state.pending = None;
                state.fired += 1;
            }

            info!(token, "触发服务重启");
            if let Err(e) = control.trigger_restart().await {
                error!(token, error = %e, "服务重启失败");
            }
        });

        state.pending = Some(Pending {
            token,
            deadline,
            scheduled_at: Utc::now(),
            handle,
        });

        info!(token, delay_ms = self.delay.as_millis() as u64, "已计划服务重启");
        Some(token)
    }

    pub fn status(&self) -> RestartStatus {
        let state = lock(&self.state);
        let pending = state.pending.as_ref();

        RestartStatus {
            pending: pending.is_some(),
            token: pending.map(|p| p.token),
            scheduled_at: pending.map(|p| p.scheduled_at),
            fires_in_ms: pending.map(|p| {
                p.deadline
                    .saturating_duration_since(Instant::now())
                    .as_millis() as u64
            }),
            fired: state.fired,
        }
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingControl;
    use super::*;

    const DELAY: Duration = Duration::from_millis(3000);

    #[tokio::test(start_paused = true)]
    async fn test_single_schedule_fires_after_delay() {
        let control = Arc::new(RecordingControl::default());
        let coordinator = RestartCoordinator::new(DELAY, control.clone());

        let start = Instant::now();
        assert_eq!(coordinator.schedule(), Some(1));
        assert!(coordinator.status().pending);

        tokio::time::sleep(Duration::from_millis(2999)).await;
        assert_eq!(control.count(), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(control.count(), 1);
        let elapsed = control.fired_at.lock().unwrap()[0] - start;
        assert!(elapsed >= DELAY && elapsed < DELAY + Duration::from_millis(5));

        let status = coordinator.status();
        assert!(!status.pending);
        assert_eq!(status.fired, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_schedules_coalesce() {
        let control = Arc::new(RecordingControl::default());
        let coordinator = RestartCoordinator::new(DELAY, control.clone());

        let mut last_call = None;
        for i in 1..=5u64 {
            last_call = Some(Instant::now());
            assert_eq!(coordinator.schedule(), Some(i));
            tokio::time::sleep(Duration::from_millis(1000)).await;
        }
        assert_eq!(control.count(), 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(control.count(), 1);
        let elapsed = control.fired_at.lock().unwrap()[0] - last_call.unwrap();
        assert!(elapsed >= DELAY && elapsed < DELAY + Duration::from_millis(5));
        assert_eq!(coordinator.status().fired, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_after_fire_starts_new_window() {
        let control = Arc::new(RecordingControl::default());
        let coordinator = RestartCoordinator::new(DELAY, control.clone());

        coordinator.schedule();
        tokio::time::sleep(Duration::from_secs(4)).await;
        coordinator.schedule();
        tokio::time::sleep(Duration::from_secs(4)).await;

        assert_eq!(control.count(), 2);
    }

    #[test]
    fn test_schedule_without_runtime_returns_none() {
        let coordinator =
            RestartCoordinator::new(DELAY, Arc::new(RecordingControl::default()));
        assert_eq!(coordinator.schedule(), None);
        assert!(!coordinator.status().pending);
    }
}
