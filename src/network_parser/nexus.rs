//! NexusMods v1 接口：鉴权上下文、URL 构造与响应解析。
//!
//! 解析函数只关心数据形状；状态码与网络错误由调用方（流水线）处理。

use std::fmt;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::download::models::{FileId, ModId, TrackedMod};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("NexusMods API Key 未配置")]
    MissingKey,
    #[error("NexusMods API Key 含有非法字符")]
    InvalidKey,
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing field `{0}`")]
    MissingField(&'static str),
}

/// 只读鉴权上下文，运行开始后在所有线程间共享。
#[derive(Clone)]
pub struct ApiAuth {
    api_key: String,
}

impl ApiAuth {
    pub fn new(api_key: &str) -> Result<Self, AuthError> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(AuthError::MissingKey);
        }
        if api_key.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return Err(AuthError::InvalidKey);
        }
        Ok(Self {
            api_key: api_key.to_string(),
        })
    }

    pub fn headers(&self) -> [(&'static str, &str); 2] {
        [("accept", "application/json"), ("apikey", self.api_key.as_str())]
    }
}

impl fmt::Debug for ApiAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiAuth")
            .field("api_key", &"***")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct NexusEndpoints {
    base: String,
    file_category: String,
    link_expires: u64,
}

impl NexusEndpoints {
    pub fn new(base: &str, file_category: &str, link_expires: u64) -> Self {
        Self {
            base: base.trim().trim_end_matches('/').to_string(),
            file_category: file_category.trim().to_string(),
            link_expires,
        }
    }

    pub fn tracked_mods(&self) -> String {
        format!("{}/user/tracked_mods.json", self.base)
    }

    pub fn mod_files(&self, domain: &str, mod_id: ModId) -> String {
        let url = format!("{}/games/{}/mods/{}/files.json", self.base, domain, mod_id);
        if self.file_category.is_empty() {
            url
        } else {
            format!("{}?category={}", url, self.file_category)
        }
    }

    pub fn download_link(&self, domain: &str, mod_id: ModId, file_id: FileId) -> String {
        format!(
            "{}/games/{}/mods/{}/files/{}/download_link.json?expires={}",
            self.base, domain, mod_id, file_id, self.link_expires
        )
    }

    pub fn mod_details(&self, domain: &str, mod_id: ModId) -> String {
        format!("{}/games/{}/mods/{}.json", self.base, domain, mod_id)
    }
}

impl Default for NexusEndpoints {
    fn default() -> Self {
        Self::new("https://api.nexusmods.com/v1", "main", 999_999)
    }
}

#[derive(Debug, Deserialize)]
struct TrackedEntry {
    mod_id: Option<ModId>,
    domain_name: Option<String>,
}

/// 追踪列表既可能是数组，也可能是 `{ "mods": [...] }`。
/// 缺少 `mod_id` 的条目直接跳过。
pub fn parse_tracked_mods(body: &str) -> Result<Vec<TrackedMod>, PayloadError> {
    let value: Value = serde_json::from_str(body)?;
    let list = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("mods") {
            Some(Value::Array(items)) => items,
            _ => return Err(PayloadError::MissingField("mods")),
        },
        _ => return Err(PayloadError::MissingField("mods")),
    };

    Ok(list
        .into_iter()
        .filter_map(|item| serde_json::from_value::<TrackedEntry>(item).ok())
        .filter_map(|entry| {
            entry.mod_id.map(|mod_id| TrackedMod {
                mod_id,
                domain_name: entry.domain_name.filter(|d| !d.trim().is_empty()),
            })
        })
        .collect())
}

pub fn parse_file_ids(body: &str) -> Result<Vec<FileId>, PayloadError> {
    let value: Value = serde_json::from_str(body)?;
    let files = value
        .get("files")
        .and_then(Value::as_array)
        .ok_or(PayloadError::MissingField("files"))?;
    Ok(files
        .iter()
        .filter_map(|f| f.get("file_id").and_then(Value::as_u64))
        .collect())
}

/// 取第一个 CDN 镜像的 `URI`。
pub fn parse_download_uri(body: &str) -> Result<String, PayloadError> {
    let value: Value = serde_json::from_str(body)?;
    value
        .as_array()
        .and_then(|mirrors| mirrors.first())
        .and_then(|m| m.get("URI"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or(PayloadError::MissingField("URI"))
}

pub fn parse_mod_name(body: &str) -> Result<String, PayloadError> {
    let value: Value = serde_json::from_str(body)?;
    value
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or(PayloadError::MissingField("name"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracked_mods_accepts_array_and_object_shapes() {
        let arr = r#"[{"mod_id":5,"domain_name":"skyrim"},{"mod_id":6},{"name":"no id"}]"#;
        let parsed = parse_tracked_mods(arr).unwrap();
        assert_eq!(
            parsed,
            vec![
                TrackedMod {
                    mod_id: 5,
                    domain_name: Some("skyrim".to_string())
                },
                TrackedMod {
                    mod_id: 6,
                    domain_name: None
                },
            ]
        );

        let obj = r#"{"mods":[{"mod_id":7}]}"#;
        assert_eq!(parse_tracked_mods(obj).unwrap()[0].mod_id, 7);

        assert!(matches!(
            parse_tracked_mods(r#"{"other":1}"#),
            Err(PayloadError::MissingField("mods"))
        ));
        assert!(matches!(
            parse_tracked_mods("not json"),
            Err(PayloadError::Json(_))
        ));
    }

    #[test]
    fn file_ids_require_files_field() {
        let body = r#"{"files":[{"file_id":100,"name":"a"},{"name":"b"},{"file_id":101}]}"#;
        assert_eq!(parse_file_ids(body).unwrap(), vec![100, 101]);
        assert_eq!(parse_file_ids(r#"{"files":[]}"#).unwrap(), Vec::<FileId>::new());
        assert!(parse_file_ids(r#"{"error":"x"}"#).is_err());
    }

    #[test]
    fn download_uri_uses_first_mirror() {
        let body = r#"[{"name":"Nexus CDN","URI":"https://cdn/a.zip?md5=1"},{"URI":"https://b"}]"#;
        assert_eq!(parse_download_uri(body).unwrap(), "https://cdn/a.zip?md5=1");
        assert!(parse_download_uri("[]").is_err());
        assert!(parse_download_uri(r#"[{"URI":""}]"#).is_err());
        assert!(parse_download_uri(r#"{"URI":"x"}"#).is_err());
    }

    #[test]
    fn mod_name_is_trimmed() {
        assert_eq!(parse_mod_name(r#"{"name":"  SkyUI "}"#).unwrap(), "SkyUI");
        assert!(parse_mod_name(r#"{"name":null}"#).is_err());
    }

    #[test]
    fn endpoints_follow_nexus_layout() {
        let ep = NexusEndpoints::new("https://api.nexusmods.com/v1/", "main", 999_999);
        assert_eq!(
            ep.tracked_mods(),
            "https://api.nexusmods.com/v1/user/tracked_mods.json"
        );
        assert_eq!(
            ep.mod_files("skyrim", 5),
            "https://api.nexusmods.com/v1/games/skyrim/mods/5/files.json?category=main"
        );
        assert_eq!(
            ep.download_link("skyrim", 5, 100),
            "https://api.nexusmods.com/v1/games/skyrim/mods/5/files/100/download_link.json?expires=999999"
        );
        assert_eq!(
            ep.mod_details("skyrim", 5),
            "https://api.nexusmods.com/v1/games/skyrim/mods/5.json"
        );
    }

    #[test]
    fn auth_rejects_empty_key_and_hides_it_in_debug() {
        assert!(matches!(ApiAuth::new("  "), Err(AuthError::MissingKey)));
        assert!(matches!(ApiAuth::new("a b"), Err(AuthError::InvalidKey)));

        let auth = ApiAuth::new("secret-key").unwrap();
        assert_eq!(auth.headers()[1], ("apikey", "secret-key"));
        assert!(!format!("{auth:?}").contains("secret-key"));
    }
}
