//! 交互层入口。
//!
//! 目前只有基于标准输入输出的菜单。

pub mod noui;
