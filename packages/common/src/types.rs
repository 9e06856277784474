// 通用类型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 重启令牌类型
pub type RestartToken = u64;

/// 插件来源
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddonSource {
    /// 随程序发布的内置清单
    #[default]
    Bundled,
    /// 从远程注册表同步的清单
    Registry,
}

impl AddonSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bundled => "bundled",
            Self::Registry => "registry",
        }
    }
}

impl std::fmt::Display for AddonSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 同步结果统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub added: usize,
    pub updated: usize,
}

/// 带时间戳的计数快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timestamped<T> {
    pub value: T,
    pub at: DateTime<Utc>,
}

impl<T> Timestamped<T> {
    pub fn now(value: T) -> Self {
        Self {
            value,
            at: Utc::now(),
        }
    }
}
