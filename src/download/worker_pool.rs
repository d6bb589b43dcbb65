//! 通用的限速工作池。
//!
//! 固定数量的 OS 线程从 `TaskQueue` 取任务、把结果推入 `ResultAggregator`。
//! API 阶段每个线程在每次请求后各自冷却一段时间，整体吞吐约为 `线程数 / 冷却时间`。
//! 函数返回即表示所有线程已 join，结果可以安全汇总。

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, warn};

use super::queue::{ResultAggregator, TaskQueue};

#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub name: &'static str,
    pub workers: usize,
    /// 每个任务完成后的冷却；None 表示不限速（下载阶段）
    pub post_task_delay: Option<Duration>,
}

impl PoolOptions {
    /// API 阶段：`min(任务数, CPU 并行度[, 配置上限])`。
    pub fn api(name: &'static str, task_count: usize, cap: Option<usize>, delay: Duration) -> Self {
        let mut workers = task_count.min(available_parallelism());
        if let Some(cap) = cap {
            workers = workers.min(cap.max(1));
        }
        Self {
            name,
            workers,
            post_task_delay: Some(delay),
        }
    }

    /// 下载阶段：固定线程数，瓶颈是带宽而不是 API 配额。
    pub fn download(name: &'static str, task_count: usize, workers: usize) -> Self {
        Self {
            name,
            workers: workers.max(1).min(task_count),
            post_task_delay: None,
        }
    }
}

pub fn available_parallelism() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// 对队列中的每个任务执行 `work`，返回已处理的任务数。
pub fn run_pool<T, R, F>(
    queue: &TaskQueue<T>,
    results: &ResultAggregator<R>,
    options: &PoolOptions,
    work: F,
) -> usize
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    if options.workers == 0 || queue.is_empty() {
        return 0;
    }

    let processed = AtomicUsize::new(0);
    let work = &work;
    let processed_ref = &processed;
    let delay = options.post_task_delay.filter(|d| !d.is_zero());

    debug!(
        "pool `{}` starting {} workers for {} tasks",
        options.name,
        options.workers,
        queue.len()
    );

    thread::scope(|s| {
        let mut handles = Vec::with_capacity(options.workers);
        for idx in 0..options.workers {
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", options.name, idx))
                .spawn_scoped(s, move || {
                    worker_loop(queue, results, delay, work, processed_ref)
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => warn!("无法创建工作线程 {}-{}: {}", options.name, idx, err),
            }
        }

        // 一个线程都没起来时在当前线程上跑完，保证队列被清空
        if handles.is_empty() {
            worker_loop(queue, results, delay, work, processed_ref);
        }

        for handle in handles {
            if handle.join().is_err() {
                error!("工作线程在 `{}` 中 panic，其余线程继续", options.name);
            }
        }
    });

    processed.into_inner()
}

fn worker_loop<T, R, F>(
    queue: &TaskQueue<T>,
    results: &ResultAggregator<R>,
    delay: Option<Duration>,
    work: &F,
    processed: &AtomicUsize,
) where
    F: Fn(T) -> R,
{
    while let Some(task) = queue.try_pop() {
        results.push(work(task));
        processed.fetch_add(1, Ordering::Relaxed);
        // 限速：请求完成之后再冷却，而非之前
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
    }
}
