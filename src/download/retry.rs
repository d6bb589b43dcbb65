//! 下载重试状态机：固定次数、固定间隔，不做指数退避。
//!
//! `Pending → Attempting → {Succeeded | Attempting(重试) | Failed}`

use std::fmt::Display;
use std::time::Duration;

use super::models::DownloadOutcome;
use super::progress::ConsoleSink;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Pending,
    Attempting { attempt: u32 },
    Succeeded { attempts: u32 },
    Failed { attempts: u32 },
}

impl AttemptState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptState::Succeeded { .. } | AttemptState::Failed { .. }
        )
    }

    pub fn outcome(&self) -> Option<DownloadOutcome> {
        match *self {
            AttemptState::Succeeded { attempts } => Some(DownloadOutcome {
                success: true,
                attempts,
            }),
            AttemptState::Failed { attempts } => Some(DownloadOutcome {
                success: false,
                attempts,
            }),
            _ => None,
        }
    }
}

/// 单次尝试失败的性质。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// 连接失败、非 2xx 等，可以再试
    Transient,
    /// 本地文件系统错误等，立刻放弃该任务
    Fatal,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    pub fn start(&self) -> AttemptState {
        AttemptState::Attempting { attempt: 1 }
    }

    pub fn on_success(&self, state: AttemptState) -> AttemptState {
        match state {
            AttemptState::Attempting { attempt } => AttemptState::Succeeded { attempts: attempt },
            other => other,
        }
    }

    pub fn on_failure(&self, state: AttemptState, kind: FailureKind) -> AttemptState {
        match state {
            AttemptState::Attempting { attempt }
                if kind == FailureKind::Transient && attempt < self.max_attempts =>
            {
                AttemptState::Attempting {
                    attempt: attempt + 1,
                }
            }
            AttemptState::Attempting { attempt } => AttemptState::Failed { attempts: attempt },
            other => other,
        }
    }
}

/// 驱动状态机直到终态。`op` 收到当前尝试序号（从 1 开始）。
///
/// 失败时在两次尝试之间阻塞当前线程 `backoff`，其他工作线程不受影响。
pub fn run_with_retry<E, F>(
    policy: &RetryPolicy,
    label: &str,
    sink: &ConsoleSink,
    mut op: F,
) -> DownloadOutcome
where
    E: Display,
    F: FnMut(u32) -> Result<(), (E, FailureKind)>,
{
    let mut state = AttemptState::Pending;
    while !state.is_terminal() {
        state = match state {
            AttemptState::Pending => policy.start(),
            AttemptState::Attempting { attempt } => {
                sink.info(format!(
                    "正在下载 {} (第 {}/{} 次尝试)...",
                    label,
                    attempt,
                    policy.max_attempts()
                ));
                match op(attempt) {
                    Ok(()) => policy.on_success(state),
                    Err((err, kind)) => {
                        sink.warn(format!("下载 {} 出错: {}", label, err));
                        let next = policy.on_failure(state, kind);
                        if let AttemptState::Attempting { .. } = next {
                            sink.info(format!(
                                "{} 将在 {:.1} 秒后重试",
                                label,
                                policy.backoff().as_secs_f64()
                            ));
                            std::thread::sleep(policy.backoff());
                        }
                        next
                    }
                }
            }
            terminal => terminal,
        };
    }

    if let AttemptState::Failed { attempts } = state {
        sink.error(format!("{} 在 {} 次尝试后仍下载失败", label, attempts));
    }
    // 循环结束时必然是终态
    state.outcome().unwrap_or(DownloadOutcome {
        success: false,
        attempts: 0,
    })
}
