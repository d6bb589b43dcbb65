//! 全局配置结构（Config）与默认值。
//!
//! 该模块同时提供生成 `config.yml` 的字段元信息，以及文件名清洗工具。

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::{ConfigSpec, FieldMeta};

pub const API_KEY_ENV: &str = "NEXUS_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // 路径配置
    #[serde(default)]
    pub mods_directory: String,

    // API 配置
    #[serde(default)]
    pub nexus_api_key: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub game_domains: Vec<String>,
    #[serde(default = "default_file_category")]
    pub file_category: String,
    #[serde(default = "default_link_expires")]
    pub link_expires: u64,

    // 网络配置
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    #[serde(default)]
    pub api_workers: usize,
    #[serde(default = "default_rate_limit_delay_ms")]
    pub rate_limit_delay_ms: u64,

    // 下载配置
    #[serde(default = "default_download_workers")]
    pub download_workers: usize,
    #[serde(default = "default_max_download_attempts")]
    pub max_download_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    // GameBanana 配置
    #[serde(default)]
    pub gb_user_id: String,
    #[serde(default = "default_gamebanana_api_url")]
    pub gamebanana_api_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mods_directory: String::new(),
            nexus_api_key: String::new(),
            api_base_url: default_api_base_url(),
            game_domains: Vec::new(),
            file_category: default_file_category(),
            link_expires: default_link_expires(),
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
            api_workers: 0,
            rate_limit_delay_ms: default_rate_limit_delay_ms(),
            download_workers: default_download_workers(),
            max_download_attempts: default_max_download_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            gb_user_id: String::new(),
            gamebanana_api_url: default_gamebanana_api_url(),
        }
    }
}

impl ConfigSpec for Config {
    const FILE_NAME: &'static str = "config.yml";

    fn fields() -> &'static [FieldMeta] {
        static FIELDS: [FieldMeta; 15] = [
            FieldMeta {
                name: "mods_directory",
                description: "Mod 保存目录（留空则使用 ~/Games/Mods-Lists）",
            },
            FieldMeta {
                name: "nexus_api_key",
                description: "NexusMods API Key（账户页面获取；也可通过环境变量 NEXUS_API_KEY 提供）",
            },
            FieldMeta {
                name: "api_base_url",
                description: "NexusMods API 地址",
            },
            FieldMeta {
                name: "game_domains",
                description: "默认处理的游戏域名列表，例如 [skyrimspecialedition]",
            },
            FieldMeta {
                name: "file_category",
                description: "文件分类过滤（main/update/optional 等）",
            },
            FieldMeta {
                name: "link_expires",
                description: "下载链接 expires 参数",
            },
            FieldMeta {
                name: "request_timeout",
                description: "请求超时时间（秒）",
            },
            FieldMeta {
                name: "connect_timeout",
                description: "连接超时时间（秒）",
            },
            FieldMeta {
                name: "api_workers",
                description: "API 查询并发线程数（0 表示按 CPU 核数自动选择）",
            },
            FieldMeta {
                name: "rate_limit_delay_ms",
                description: "每个线程每次 API 请求后的冷却时间, 单位ms",
            },
            FieldMeta {
                name: "download_workers",
                description: "文件下载并发线程数",
            },
            FieldMeta {
                name: "max_download_attempts",
                description: "单个文件最大下载尝试次数",
            },
            FieldMeta {
                name: "retry_backoff_ms",
                description: "下载失败后重试前的等待时间, 单位ms",
            },
            FieldMeta {
                name: "gb_user_id",
                description: "GameBanana 用户 ID（下载该用户订阅的 Mod；留空则不可用）",
            },
            FieldMeta {
                name: "gamebanana_api_url",
                description: "GameBanana API 地址",
            },
        ];
        &FIELDS
    }

    fn normalize(&mut self) {
        if self.nexus_api_key.trim().is_empty()
            && let Ok(key) = std::env::var(API_KEY_ENV)
        {
            self.nexus_api_key = key.trim().to_string();
        }
        self.download_workers = self.download_workers.max(1);
        self.max_download_attempts = self.max_download_attempts.max(1);
        self.api_base_url = self.api_base_url.trim().trim_end_matches('/').to_string();
        self.game_domains.retain(|d| !d.trim().is_empty());
        self.gb_user_id = self.gb_user_id.trim().to_string();
        self.gamebanana_api_url = self
            .gamebanana_api_url
            .trim()
            .trim_end_matches('/')
            .to_string();
    }
}

impl Config {
    pub fn default_mods_dir(&self) -> PathBuf {
        if !self.mods_directory.trim().is_empty() {
            return PathBuf::from(self.mods_directory.trim());
        }
        match std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
            Some(home) => PathBuf::from(home).join("Games").join("Mods-Lists"),
            None => PathBuf::from("Games").join("Mods-Lists"),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout.max(1))
    }

    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_delay_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// `api_workers` 为 0 时不设上限，由线程池按 CPU 核数决定。
    pub fn api_worker_cap(&self) -> Option<usize> {
        (self.api_workers > 0).then_some(self.api_workers)
    }
}

pub fn safe_fs_name(name: &str, replacement: &str, max_len: usize) -> String {
    let repl = replacement.chars().next().unwrap_or('_');
    let mut cleaned: String = name
        .trim()
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => repl,
            c if (c as u32) < 32 => repl,
            _ => ch,
        })
        .collect();

    while cleaned.ends_with(' ') || cleaned.ends_with('.') {
        cleaned.pop();
    }

    if cleaned.is_empty() {
        cleaned.push_str("unnamed");
    }

    const RESERVED: [&str; 22] = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    let upper = cleaned.to_uppercase();
    if RESERVED.contains(&upper.as_str()) {
        cleaned = format!("_{}", cleaned);
    }

    if cleaned.len() > max_len {
        // 避免在多字节 UTF-8 字符中间截断导致 panic
        let mut end = max_len;
        while !cleaned.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        cleaned.truncate(end);
        while cleaned.ends_with(' ') || cleaned.ends_with('.') {
            cleaned.pop();
        }
        if cleaned.is_empty() {
            cleaned.push_str("unnamed");
        }
    }

    cleaned
}

fn default_api_base_url() -> String {
    "https://api.nexusmods.com/v1".to_string()
}

fn default_gamebanana_api_url() -> String {
    "https://gamebanana.com/apiv11".to_string()
}

fn default_file_category() -> String {
    "main".to_string()
}

fn default_link_expires() -> u64 {
    999_999
}

fn default_request_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_rate_limit_delay_ms() -> u64 {
    1000
}

fn default_download_workers() -> usize {
    4
}

fn default_max_download_attempts() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    5000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_fs_name_replaces_forbidden_characters() {
        assert_eq!(safe_fs_name("SkyUI: Reborn?", "_", 120), "SkyUI_ Reborn_");
        assert_eq!(safe_fs_name("a/b\\c", "_", 120), "a_b_c");
        assert_eq!(safe_fs_name("  trailing.. ", "_", 120), "trailing");
        assert_eq!(safe_fs_name("", "_", 120), "unnamed");
        assert_eq!(safe_fs_name("con", "_", 120), "_con");
    }

    #[test]
    fn safe_fs_name_truncates_on_char_boundary() {
        let name = "模组名称很长很长";
        let out = safe_fs_name(name, "_", 7);
        assert_eq!(out, "模组");
    }

    #[test]
    fn defaults_match_pipeline_constants() {
        let cfg = Config::default();
        assert_eq!(cfg.download_workers, 4);
        assert_eq!(cfg.max_download_attempts, 5);
        assert_eq!(cfg.retry_backoff(), Duration::from_secs(5));
        assert_eq!(cfg.rate_limit_delay(), Duration::from_secs(1));
        assert_eq!(cfg.api_worker_cap(), None);
    }

    #[test]
    fn normalize_clamps_and_trims() {
        let mut cfg = Config {
            nexus_api_key: "key".to_string(),
            api_base_url: "http://localhost:1234/v1/".to_string(),
            download_workers: 0,
            max_download_attempts: 0,
            game_domains: vec!["skyrim".to_string(), "  ".to_string()],
            gb_user_id: " 1234 ".to_string(),
            gamebanana_api_url: "https://gamebanana.com/apiv11/".to_string(),
            ..Config::default()
        };
        cfg.normalize();
        assert_eq!(cfg.api_base_url, "http://localhost:1234/v1");
        assert_eq!(cfg.download_workers, 1);
        assert_eq!(cfg.max_download_attempts, 1);
        assert_eq!(cfg.game_domains, vec!["skyrim".to_string()]);
        assert_eq!(cfg.gb_user_id, "1234");
        assert_eq!(cfg.gamebanana_api_url, "https://gamebanana.com/apiv11");
    }
}
