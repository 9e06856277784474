// NAS Plane Library
// 导出主要模块供二进制与测试使用

pub mod addons;
pub mod api;
pub mod config;
pub mod db;
pub mod errors;
pub mod health;
pub mod logging;
