//! 控制台输出与下载进度。
//!
//! 所有工作线程的进度、警告与错误都经由同一个 `ConsoleSink` 输出，
//! 由一把互斥锁保证多线程输出时每一行完整、不被截断交错。
//! 每条消息同时作为 tracing 事件写入日志文件。

use std::io::{self, IsTerminal, Write};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::{error, info, warn};

use super::models::DownloadOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Info,
    Warn,
    Error,
}

struct SinkState {
    out: Box<dyn Write + Send>,
    bar: Option<ProgressBar>,
}

pub struct ConsoleSink {
    state: Mutex<SinkState>,
    interactive: bool,
}

impl ConsoleSink {
    pub fn stdout() -> Self {
        // 进度条画在 stderr 上
        let interactive = io::stderr().is_terminal();
        Self {
            state: Mutex::new(SinkState {
                out: Box::new(io::stdout()),
                bar: None,
            }),
            interactive,
        }
    }

    pub fn with_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            state: Mutex::new(SinkState {
                out: Box::new(writer),
                bar: None,
            }),
            interactive: false,
        }
    }

    /// 丢弃所有控制台输出（仍然写日志）。
    pub fn quiet() -> Self {
        Self::with_writer(io::sink())
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        self.emit(Level::Info, msg.as_ref());
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        self.emit(Level::Warn, msg.as_ref());
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        self.emit(Level::Error, msg.as_ref());
    }

    fn emit(&self, level: Level, msg: &str) {
        match level {
            Level::Info => info!(target: "console", "{msg}"),
            Level::Warn => warn!(target: "console", "{msg}"),
            Level::Error => error!(target: "console", "{msg}"),
        }

        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let line = match level {
            Level::Info => msg.to_string(),
            Level::Warn => format!("警告: {msg}"),
            Level::Error => format!("错误: {msg}"),
        };
        if let Some(bar) = state.bar.as_ref() {
            bar.println(line);
        } else {
            let _ = writeln!(state.out, "{line}");
            let _ = state.out.flush();
        }
    }

    /// 终端环境下挂上进度条，此后的输出行都打印在进度条上方。
    fn attach_bar(&self, total: usize) {
        if !self.interactive || total == 0 {
            return;
        }
        let bar = ProgressBar::with_draw_target(Some(total as u64), ProgressDrawTarget::stderr());
        let style = ProgressStyle::with_template(
            "{prefix} [{elapsed_precise}] {wide_bar} {pos}/{len} ({eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");
        bar.set_style(style);
        bar.set_prefix("文件下载");

        if let Ok(mut state) = self.state.lock() {
            state.bar = Some(bar);
        }
    }

    fn advance_bar(&self, completed: usize) {
        if let Ok(state) = self.state.lock()
            && let Some(bar) = state.bar.as_ref()
        {
            bar.set_position(completed as u64);
        }
    }

    fn finish_bar(&self) {
        if let Ok(mut state) = self.state.lock()
            && let Some(bar) = state.bar.take()
        {
            bar.finish_and_clear();
        }
    }
}

/// 单次下载阶段的进度计数。
pub struct ProgressTracker<'a> {
    sink: &'a ConsoleSink,
    completed: AtomicUsize,
    total: usize,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(sink: &'a ConsoleSink, total: usize) -> Self {
        sink.attach_bar(total);
        Self {
            sink,
            completed: AtomicUsize::new(0),
            total,
        }
    }

    /// 每个任务结束（成功或重试耗尽）时调用一次，返回当前完成数。
    pub fn complete(&self, _outcome: DownloadOutcome) -> usize {
        let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        self.sink.advance_bar(done);
        self.sink
            .info(format!("进度: [{}/{}] 个文件已处理", done, self.total));
        done
    }
}

impl Drop for ProgressTracker<'_> {
    fn drop(&mut self) {
        self.sink.finish_bar();
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};

    /// 可在测试中读取内容的共享缓冲区。
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        pub(crate) fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            // 故意逐字节写入，放大未加锁时行被拆散的概率
            let mut inner = self.0.lock().unwrap();
            for b in buf {
                inner.push(*b);
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
