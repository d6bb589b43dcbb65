//! 阶段 3 的文件传输。
//!
//! 每次尝试都写入目标目录下的临时文件，下载成功后才整体替换目标文件。
//! 失败的任务不改动磁盘上已有的同名文件。

use std::fs;
use std::io;
use std::path::Path;

use super::checkpoint::escape_spaces;
use super::models::{DownloadOutcome, DownloadSummary, DownloadTask};
use super::progress::{ConsoleSink, ProgressTracker};
use super::queue::{ResultAggregator, TaskQueue};
use super::retry::{FailureKind, RetryPolicy, run_with_retry};
use super::worker_pool::{PoolOptions, run_pool};
use crate::network_parser::{Transport, TransportError};

const PART_PREFIX: &str = ".modular-";
const PART_SUFFIX: &str = ".part";

fn classify(err: TransportError) -> (TransportError, FailureKind) {
    let kind = if err.is_retryable() {
        FailureKind::Transient
    } else {
        FailureKind::Fatal
    };
    (err, kind)
}

fn local_failure(path: &Path, source: io::Error) -> (TransportError, FailureKind) {
    (
        TransportError::Io {
            path: path.to_path_buf(),
            source,
        },
        FailureKind::Fatal,
    )
}

/// 下载单个任务，按 `policy` 重试。
pub fn download_one(
    transport: &dyn Transport,
    sink: &ConsoleSink,
    policy: &RetryPolicy,
    task: &DownloadTask,
) -> DownloadOutcome {
    let dir = match task.dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if let Err(err) = fs::create_dir_all(dir) {
        sink.error(format!("无法创建目录 {}: {}", dir.display(), err));
        return DownloadOutcome {
            success: false,
            attempts: 0,
        };
    }

    let label = task.link().to_string();
    let url = escape_spaces(&task.url);
    let outcome = run_with_retry(policy, &label, sink, |_| {
        // 临时文件在 drop 时删除，失败的尝试不留下残片
        let part = tempfile::Builder::new()
            .prefix(PART_PREFIX)
            .suffix(PART_SUFFIX)
            .tempfile_in(dir)
            .map_err(|source| local_failure(dir, source))?;
        transport
            .download_to_file(&url, part.path())
            .map_err(classify)?;
        part.persist(&task.dest)
            .map_err(|e| local_failure(&task.dest, e.error))?;
        Ok(())
    });

    if outcome.success {
        sink.info(format!("已保存 {}", task.dest.display()));
    }
    outcome
}

/// 用固定大小的下载池处理全部任务，返回汇总。
pub fn download_all(
    transport: &dyn Transport,
    sink: &ConsoleSink,
    policy: &RetryPolicy,
    workers: usize,
    tasks: Vec<DownloadTask>,
) -> DownloadSummary {
    if tasks.is_empty() {
        return DownloadSummary::default();
    }

    let tracker = ProgressTracker::new(sink, tasks.len());
    let queue: TaskQueue<DownloadTask> = tasks.into_iter().collect();
    let results = ResultAggregator::new();
    let options = PoolOptions::download("download", queue.len(), workers);
    sink.info(format!(
        "开始下载 {} 个文件 ({} 个线程)",
        queue.len(),
        options.workers
    ));

    run_pool(&queue, &results, &options, |task| {
        let outcome = download_one(transport, sink, policy, &task);
        tracker.complete(outcome);
        outcome
    });
    drop(tracker);

    let mut summary = DownloadSummary::default();
    for outcome in results.drain() {
        summary.record(outcome);
    }
    summary
}
