//! Modular Downloader：NexusMods 追踪列表批量下载工具。
//!
//! 代码结构（读代码入口）：
//! - `base_system`：配置/日志等基础设施
//! - `network_parser`：HTTP 传输层与 NexusMods 接口
//! - `download`：队列、限速工作池、重试与三阶段流水线
//! - `rename`：把数字 Mod 目录重命名为 Mod 名称
//! - `gamebanana`：GameBanana 订阅下载
//! - `ui`：交互菜单

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use tracing::info;

mod base_system;
mod download;
mod gamebanana;
mod network_parser;
mod rename;
mod ui;

use base_system::config::{load_or_create_with_base, resolve_path};
use base_system::context::Config;
use base_system::logging::{LogOptions, LogSystem};
use download::models::DownloadSummary;
use download::pipeline::{Pipeline, PipelineSettings};
use download::progress::ConsoleSink;
use network_parser::{ApiAuth, GameBananaEndpoints, HttpTransport, TransportOptions};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 有下载永久失败或某个域名未能执行时的退出码。
const EXIT_PARTIAL_FAILURE: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "modular")]
#[command(about = "Bulk downloader for NexusMods tracked mods")]
struct Cli {
    /// 启用调试日志输出（同时输出到 stderr）
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// 显示版本信息后退出
    #[arg(long, default_value_t = false)]
    version: bool,

    /// 数据目录路径（用于存放 config.yml 和 logs）
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 完整流程：文件列表 → 下载链接 → 断点文件 → 下载
    Sync {
        /// 游戏域名；省略时使用配置中的 game_domains
        domains: Vec<String>,
    },
    /// 仅按已有断点文件下载
    Download { domains: Vec<String> },
    /// 把数字 Mod 目录重命名为 Mod 名称
    Rename,
    /// 下载 gb_user_id 对应用户在 GameBanana 上订阅的 Mod
    Gamebanana,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    if cli.version {
        println!("Modular Downloader v{}", VERSION);
        return Ok(ExitCode::SUCCESS);
    }

    let data_dir = cli.data_dir.as_deref();
    let log = init_logging(cli.debug, data_dir)?;
    info!(target: "startup", "当前版本: v{}，日志目录: {}", VERSION, log.logs_dir().display());

    let config_path = resolve_path::<Config>(None, data_dir);
    let mut config = load_or_create_with_base::<Config>(None, data_dir)
        .with_context(|| format!("无法加载配置 {}", config_path.display()))?;

    let transport = HttpTransport::new(&TransportOptions {
        request_timeout: config.request_timeout(),
        connect_timeout: config.connect_timeout(),
        ..TransportOptions::default()
    })
    .context("无法创建 HTTP 客户端")?;
    let sink = ConsoleSink::stdout();

    let Some(command) = cli.command else {
        ui::noui::run(&mut config, &config_path, &transport, &sink)?;
        return Ok(ExitCode::SUCCESS);
    };

    let settings = PipelineSettings::from_config(&config);
    let base_dir = config.default_mods_dir();

    let summary = match command {
        Command::Sync { domains } => {
            let auth = nexus_auth(&config, &config_path)?;
            let domains = pick_domains(domains, &config)?;
            Pipeline::new(&auth, &transport, &sink, &settings).run_sequence(&domains, &base_dir)
        }
        Command::Download { domains } => {
            let auth = nexus_auth(&config, &config_path)?;
            let domains = pick_domains(domains, &config)?;
            Pipeline::new(&auth, &transport, &sink, &settings)
                .download_sequence(&domains, &base_dir)
        }
        Command::Rename => {
            let auth = nexus_auth(&config, &config_path)?;
            let pipeline = Pipeline::new(&auth, &transport, &sink, &settings);
            let report = rename::run_rename_sequence(&pipeline, &base_dir);
            return Ok(if report.failed == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_PARTIAL_FAILURE)
            });
        }
        Command::Gamebanana => {
            if config.gb_user_id.is_empty() {
                bail!("请在 {} 中设置 gb_user_id", config_path.display());
            }
            gamebanana::run_gamebanana_sequence(
                &transport,
                &sink,
                &settings,
                &GameBananaEndpoints::new(&config.gamebanana_api_url),
                &config.gb_user_id,
                &base_dir,
            )
        }
    };

    Ok(finish(&sink, summary))
}

/// NexusMods 命令在执行任何阶段之前先校验 API Key。
fn nexus_auth(config: &Config, config_path: &Path) -> Result<ApiAuth> {
    ApiAuth::new(&config.nexus_api_key).with_context(|| {
        format!(
            "请在 {} 中设置 nexus_api_key 或设置环境变量 {}",
            config_path.display(),
            base_system::context::API_KEY_ENV
        )
    })
}

fn finish(sink: &ConsoleSink, summary: DownloadSummary) -> ExitCode {
    sink.info(format!("全部完成: {}", summary));
    if summary.is_complete() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_PARTIAL_FAILURE)
    }
}

fn pick_domains(domains: Vec<String>, config: &Config) -> Result<Vec<String>> {
    let domains = if domains.is_empty() {
        config.game_domains.clone()
    } else {
        domains
    };
    if domains.is_empty() {
        bail!("未指定游戏域名：请在命令行中给出，或在配置中设置 game_domains");
    }
    Ok(domains)
}

fn init_logging(debug: bool, base_dir: Option<&Path>) -> Result<LogSystem> {
    let opts = LogOptions {
        debug,
        use_color: true,
        archive_on_exit: true,
        console: debug,
    };
    LogSystem::init_with_base(opts, base_dir).map_err(|e| anyhow!(e))
}
