//! 无 UI 交互菜单。
//!
//! 使用标准输入输出逐行交互；缺少 API Key 或 GameBanana 用户 ID 时提示输入并写回 `config.yml`。

use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result, anyhow};

use crate::base_system::config::write_with_comments;
use crate::base_system::context::Config;
use crate::download::pipeline::{Pipeline, PipelineSettings};
use crate::download::progress::ConsoleSink;
use crate::gamebanana::run_gamebanana_sequence;
use crate::network_parser::{ApiAuth, GameBananaEndpoints, Transport};
use crate::rename::run_rename_sequence;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MenuChoice {
    Sync,
    Download,
    Rename,
    GameBanana,
    Quit,
}

fn parse_choice(input: &str) -> Option<MenuChoice> {
    match input.trim() {
        "1" => Some(MenuChoice::Sync),
        "2" => Some(MenuChoice::Download),
        "3" => Some(MenuChoice::Rename),
        "4" => Some(MenuChoice::GameBanana),
        s if s.eq_ignore_ascii_case("q") || s == "0" => Some(MenuChoice::Quit),
        _ => None,
    }
}

/// 空格或逗号分隔的域名列表；输入为空时使用配置中的默认域名。
fn parse_domains(input: &str, defaults: &[String]) -> Vec<String> {
    let typed: Vec<String> = input
        .split(|c: char| c.is_whitespace() || c == ',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if typed.is_empty() {
        defaults.to_vec()
    } else {
        typed
    }
}

pub fn run(
    config: &mut Config,
    config_path: &Path,
    transport: &dyn Transport,
    sink: &ConsoleSink,
) -> Result<()> {
    println!(
        "欢迎使用 Modular Downloader v{}\n\
追踪列表中的 Mod 将被下载到 {}",
        env!("CARGO_PKG_VERSION"),
        config.default_mods_dir().display()
    );

    ensure_api_key(config, config_path)?;
    let auth = ApiAuth::new(&config.nexus_api_key).map_err(|e| anyhow!(e))?;
    let settings = PipelineSettings::from_config(config);
    let pipeline = Pipeline::new(&auth, transport, sink, &settings);
    let base_dir = config.default_mods_dir();

    loop {
        println!(
            "\n================ 主菜单 ================\n\
1. 运行 NexusMods 流程（文件列表 → 下载链接 → 下载）\n\
2. 仅按已有断点文件下载\n\
3. 运行重命名流程（通常在 1 之后执行）\n\
4. 下载 GameBanana 订阅的 Mod\n\
q. 退出\n\
========================================"
        );
        let input = read_line("请选择 (1/2/3/4/q)：")?;
        let Some(choice) = parse_choice(&input) else {
            println!("无效的选项，请重新输入。");
            continue;
        };

        match choice {
            MenuChoice::Quit => {
                println!("已退出。");
                break;
            }
            MenuChoice::Sync | MenuChoice::Download => {
                let hint = if config.game_domains.is_empty() {
                    String::new()
                } else {
                    format!("，直接回车使用 {}", config.game_domains.join(" "))
                };
                let line = read_line(&format!("请输入一个或多个游戏域名（空格分隔{}）：", hint))?;
                let domains = parse_domains(&line, &config.game_domains);
                if domains.is_empty() {
                    println!("未指定游戏域名，返回主菜单。");
                    continue;
                }

                let summary = if choice == MenuChoice::Sync {
                    pipeline.run_sequence(&domains, &base_dir)
                } else {
                    pipeline.download_sequence(&domains, &base_dir)
                };
                println!("全部完成: {}", summary);
            }
            MenuChoice::Rename => {
                run_rename_sequence(&pipeline, &base_dir);
            }
            MenuChoice::GameBanana => {
                ensure_gb_user_id(config, config_path)?;
                let summary = run_gamebanana_sequence(
                    transport,
                    sink,
                    &settings,
                    &GameBananaEndpoints::new(&config.gamebanana_api_url),
                    &config.gb_user_id,
                    &base_dir,
                );
                println!("全部完成: {}", summary);
            }
        }
    }

    Ok(())
}

fn ensure_api_key(config: &mut Config, config_path: &Path) -> Result<()> {
    if !config.nexus_api_key.trim().is_empty() {
        return Ok(());
    }
    while config.nexus_api_key.trim().is_empty() {
        let key = read_line("未配置 NexusMods API Key，请输入（可在 NexusMods 账户设置中获取）：")?;
        config.nexus_api_key = key.trim().to_string();
    }

    write_with_comments(config, config_path)
        .with_context(|| format!("保存配置失败: {}", config_path.display()))?;
    println!("API Key 已保存到 {}", config_path.display());
    Ok(())
}

fn ensure_gb_user_id(config: &mut Config, config_path: &Path) -> Result<()> {
    if !config.gb_user_id.trim().is_empty() {
        return Ok(());
    }
    while config.gb_user_id.trim().is_empty() {
        let id = read_line("未配置 GameBanana 用户 ID，请输入（个人主页地址中的数字）：")?;
        config.gb_user_id = id.trim().to_string();
    }

    write_with_comments(config, config_path)
        .with_context(|| format!("保存配置失败: {}", config_path.display()))?;
    println!("GameBanana 用户 ID 已保存到 {}", config_path.display());
    Ok(())
}

fn read_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush().ok();
    let stdin = io::stdin();
    let mut line = String::new();
    let n = stdin.lock().read_line(&mut line)?;
    if n == 0 {
        return Err(anyhow!("标准输入已关闭"));
    }
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn menu_choices() {
        assert_eq!(parse_choice(" 1\n"), Some(MenuChoice::Sync));
        assert_eq!(parse_choice("2"), Some(MenuChoice::Download));
        assert_eq!(parse_choice("3"), Some(MenuChoice::Rename));
        assert_eq!(parse_choice("4 "), Some(MenuChoice::GameBanana));
        assert_eq!(parse_choice("Q"), Some(MenuChoice::Quit));
        assert_eq!(parse_choice("0"), Some(MenuChoice::Quit));
        assert_eq!(parse_choice("abc"), None);
    }

    #[test]
    fn domains_fall_back_to_configured_defaults() {
        let defaults = vec!["skyrimspecialedition".to_string()];
        assert_eq!(parse_domains("\n", &defaults), defaults);
        assert_eq!(
            parse_domains("fallout4  starfield,cyberpunk2077\n", &defaults),
            vec!["fallout4", "starfield", "cyberpunk2077"]
        );
        assert!(parse_domains("   ", &[]).is_empty());
    }
}
