// 错误处理模块
// 定义统一的错误类型和处理逻辑

pub mod types;
pub mod middleware;
pub mod response;


pub use types::*;
pub use middleware::*;
pub use response::*;
