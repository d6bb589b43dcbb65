//! GameBanana apiv11 接口：订阅列表与 Mod 文件列表。
//!
//! 接口无需鉴权；解析规则与 NexusMods 一致，只关心数据形状。

use serde_json::Value;

use super::nexus::PayloadError;

/// 订阅列表中的一个 Mod。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub mod_id: u64,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct GameBananaEndpoints {
    base: String,
}

impl GameBananaEndpoints {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim().trim_end_matches('/').to_string(),
        }
    }

    pub fn subscriptions(&self, user_id: &str) -> String {
        format!("{}/Member/{}/Subscriptions", self.base, user_id.trim())
    }

    pub fn mod_files(&self, mod_id: u64) -> String {
        format!("{}/Mod/{}?_csvProperties=_aFiles", self.base, mod_id)
    }
}

impl Default for GameBananaEndpoints {
    fn default() -> Self {
        Self::new("https://gamebanana.com/apiv11")
    }
}

/// `https://gamebanana.com/mods/12345` → 12345
pub fn mod_id_from_profile_url(url: &str) -> Option<u64> {
    let (_, rest) = url.split_once("/mods/")?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// 只保留类型为 Mod、且带有资料页地址和名称的订阅。
pub fn parse_subscriptions(body: &str) -> Result<Vec<Subscription>, PayloadError> {
    let value: Value = serde_json::from_str(body)?;
    let records = value
        .get("_aRecords")
        .and_then(Value::as_array)
        .ok_or(PayloadError::MissingField("_aRecords"))?;

    Ok(records
        .iter()
        .filter_map(|r| r.get("_aSubscription"))
        .filter(|s| s.get("_sSingularTitle").and_then(Value::as_str) == Some("Mod"))
        .filter_map(|s| {
            let url = s.get("_sProfileUrl").and_then(Value::as_str)?;
            let name = s.get("_sName").and_then(Value::as_str)?.trim();
            if name.is_empty() {
                return None;
            }
            Some(Subscription {
                mod_id: mod_id_from_profile_url(url)?,
                name: name.to_string(),
            })
        })
        .collect())
}

/// `_aFiles` 可能是数组，也可能是以文件 ID 为键的对象。
pub fn parse_file_urls(body: &str) -> Result<Vec<String>, PayloadError> {
    let value: Value = serde_json::from_str(body)?;
    let files: Vec<&Value> = match value.get("_aFiles") {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(Value::Object(map)) => map.values().collect(),
        _ => return Err(PayloadError::MissingField("_aFiles")),
    };
    Ok(files
        .into_iter()
        .filter_map(|f| f.get("_sDownloadUrl").and_then(Value::as_str))
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(str::to_string)
        .collect())
}

/// URL 最后一个 `/` 之后的部分；为空时使用 `downloaded_file`。
pub fn file_name_from_url(url: &str) -> String {
    let tail = url.rsplit('/').next().unwrap_or_default();
    let tail = tail.split(['?', '#']).next().unwrap_or_default();
    if tail.is_empty() {
        "downloaded_file".to_string()
    } else {
        tail.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriptions_keep_only_mods() {
        let body = r#"{"_aRecords":[
            {"_aSubscription":{"_sSingularTitle":"Mod","_sProfileUrl":"https://gamebanana.com/mods/481234","_sName":"Better HUD"}},
            {"_aSubscription":{"_sSingularTitle":"Sound","_sProfileUrl":"https://gamebanana.com/sounds/9","_sName":"Beep"}},
            {"_aSubscription":{"_sSingularTitle":"Mod","_sName":"No Url"}},
            {"_aSubscription":{"_sSingularTitle":"Mod","_sProfileUrl":"https://gamebanana.com/mods/77?x=1","_sName":" Skins "}},
            {"_sType":"Member"}
        ]}"#;
        assert_eq!(
            parse_subscriptions(body).unwrap(),
            vec![
                Subscription {
                    mod_id: 481234,
                    name: "Better HUD".to_string()
                },
                Subscription {
                    mod_id: 77,
                    name: "Skins".to_string()
                },
            ]
        );
        assert!(matches!(
            parse_subscriptions("{}"),
            Err(PayloadError::MissingField("_aRecords"))
        ));
    }

    #[test]
    fn profile_url_without_numeric_id_is_rejected() {
        assert_eq!(mod_id_from_profile_url("https://gamebanana.com/mods/12"), Some(12));
        assert_eq!(mod_id_from_profile_url("https://gamebanana.com/mods/"), None);
        assert_eq!(mod_id_from_profile_url("https://gamebanana.com/tools/5"), None);
    }

    #[test]
    fn file_urls_from_array_or_object() {
        let arr = r#"{"_aFiles":[{"_sDownloadUrl":"https://gamebanana.com/dl/1"},{"_sFile":"x"}]}"#;
        assert_eq!(parse_file_urls(arr).unwrap(), vec!["https://gamebanana.com/dl/1"]);

        let obj = r#"{"_aFiles":{"10":{"_sDownloadUrl":"https://gamebanana.com/dl/10"}}}"#;
        assert_eq!(parse_file_urls(obj).unwrap(), vec!["https://gamebanana.com/dl/10"]);

        assert!(parse_file_urls(r#"{"_aFiles":null}"#).is_err());
    }

    #[test]
    fn endpoints_and_file_names() {
        let ep = GameBananaEndpoints::new("http://gb.test/apiv11/");
        assert_eq!(ep.subscriptions(" 42 "), "http://gb.test/apiv11/Member/42/Subscriptions");
        assert_eq!(ep.mod_files(7), "http://gb.test/apiv11/Mod/7?_csvProperties=_aFiles");

        assert_eq!(file_name_from_url("https://gamebanana.com/dl/1234"), "1234");
        assert_eq!(file_name_from_url("https://files.test/a/pack.7z?t=1"), "pack.7z");
        assert_eq!(file_name_from_url("https://gamebanana.com/dl/"), "downloaded_file");
    }
}
