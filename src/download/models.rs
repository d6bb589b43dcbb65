//! 下载相关的数据模型定义。
//!
//! 包含 Mod/文件标识、链接任务、下载任务、单任务结果与整批汇总。

use std::fmt;
use std::path::PathBuf;

pub type ModId = u64;
pub type FileId = u64;

/// 追踪列表中的一项；`domain_name` 缺失时视为属于任意游戏域名。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedMod {
    pub mod_id: ModId,
    pub domain_name: Option<String>,
}

impl TrackedMod {
    pub fn belongs_to(&self, domain: &str) -> bool {
        self.domain_name
            .as_deref()
            .map(|d| d.eq_ignore_ascii_case(domain))
            .unwrap_or(true)
    }
}

/// (Mod, 文件) 对，下载链接的键。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkTask {
    pub mod_id: ModId,
    pub file_id: FileId,
}

impl LinkTask {
    pub fn new(mod_id: ModId, file_id: FileId) -> Self {
        Self { mod_id, file_id }
    }
}

impl fmt::Display for LinkTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mod {} / 文件 {}", self.mod_id, self.file_id)
    }
}

/// 由断点文件中的一行还原出的下载任务。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub mod_id: ModId,
    pub file_id: FileId,
    pub url: String,
    pub dest: PathBuf,
}

impl DownloadTask {
    pub fn link(&self) -> LinkTask {
        LinkTask::new(self.mod_id, self.file_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub success: bool,
    pub attempts: u32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DownloadSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// 整个下载阶段未能执行的批次数：断点文件不可用的游戏域名，或拿不到订阅列表的 GameBanana。
    pub aborted_domains: usize,
}

impl DownloadSummary {
    pub fn record(&mut self, outcome: DownloadOutcome) {
        self.total += 1;
        if outcome.success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }

    pub fn merge(&mut self, other: DownloadSummary) {
        self.total += other.total;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.aborted_domains += other.aborted_domains;
    }

    /// 全部成功（包括“无事可做”）才算完整。
    pub fn is_complete(&self) -> bool {
        self.failed == 0 && self.aborted_domains == 0
    }
}

impl fmt::Display for DownloadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "成功 {} / 失败 {} / 共 {}",
            self.succeeded, self.failed, self.total
        )?;
        if self.aborted_domains > 0 {
            write!(f, "（{} 个下载批次未能执行）", self.aborted_domains)?;
        }
        Ok(())
    }
}
