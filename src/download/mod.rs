//! 下载流程模块入口。
//!
//! 子模块：
//! - `models`       — 数据模型（LinkTask / DownloadTask / DownloadSummary 等）
//! - `queue`        — 任务队列与结果收集器
//! - `worker_pool`  — 限速工作池
//! - `retry`        — 下载重试状态机
//! - `progress`     — 串行化控制台输出与进度计数
//! - `checkpoint`   — 断点文件读写与下载任务还原
//! - `transfer`     — 单文件下载（临时文件 + 成功后替换）与下载池
//! - `pipeline`     — 三阶段流水线编排

pub mod checkpoint;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod retry;
pub mod transfer;
pub mod worker_pool;
