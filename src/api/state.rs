// 应用共享状态
// 在启动时构建，通过 web::Data 注入到处理器

use std::sync::Arc;
use std::time::Instant;

use crate::addons::{AddonManager, RegistryClient};
use crate::db::DatabaseManager;

/// 处理器共享的应用状态
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<AddonManager>,
    pub registry: Arc<RegistryClient>,
    /// 内存存储模式下为空
    pub db: Option<DatabaseManager>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        manager: Arc<AddonManager>,
        registry: Arc<RegistryClient>,
        db: Option<DatabaseManager>,
    ) -> Self {
        Self {
            manager,
            registry,
            db,
            started_at: Instant::now(),
        }
    }
}
