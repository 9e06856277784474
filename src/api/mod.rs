// API 模块
// 统一导出所有 API 相关组件

pub mod handlers;
pub mod responses;
pub mod routes;
pub mod state;

pub use responses::*;
pub use routes::*;
pub use state::AppState;
