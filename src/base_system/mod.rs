//! 基础设施：配置、日志、路径工具。

pub mod config;
pub mod context;
pub mod logging;
