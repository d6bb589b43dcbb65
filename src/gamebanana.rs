//! GameBanana 订阅下载。
//!
//! 拉取用户的订阅列表，经由限速工作池查询每个 Mod 的文件，
//! 再用与 NexusMods 相同的下载池与重试策略下载到
//! `mods_directory/gamebanana/<Mod 名称>/<序号>_<文件名>`。

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use tracing::debug;

use crate::base_system::context::safe_fs_name;
use crate::download::models::{DownloadSummary, DownloadTask};
use crate::download::pipeline::PipelineSettings;
use crate::download::progress::ConsoleSink;
use crate::download::queue::{ResultAggregator, TaskQueue};
use crate::download::transfer;
use crate::download::worker_pool::{PoolOptions, run_pool};
use crate::network_parser::{GameBananaEndpoints, Transport};
use crate::network_parser::gamebanana::{
    Subscription, file_name_from_url, parse_file_urls, parse_subscriptions,
};

/// `mods_directory` 下存放 GameBanana 下载的子目录。
pub const GAMEBANANA_DIR: &str = "gamebanana";

const MAX_NAME_LEN: usize = 120;
const JSON_HEADERS: [(&str, &str); 1] = [("accept", "application/json")];

fn fetch_json(
    transport: &dyn Transport,
    sink: &ConsoleSink,
    url: &str,
    what: &str,
) -> Option<String> {
    match transport.get(url, &JSON_HEADERS) {
        Ok(resp) if resp.is_ok() => Some(resp.body),
        Ok(resp) => {
            sink.warn(format!("{} 请求返回状态码 {}", what, resp.status));
            None
        }
        Err(err) => {
            sink.warn(format!("{} 请求失败: {}", what, err));
            None
        }
    }
}

fn fetch_file_urls(
    transport: &dyn Transport,
    sink: &ConsoleSink,
    endpoints: &GameBananaEndpoints,
    sub: &Subscription,
) -> Vec<String> {
    let what = format!("GameBanana Mod {} 文件列表", sub.mod_id);
    let Some(body) = fetch_json(transport, sink, &endpoints.mod_files(sub.mod_id), &what) else {
        return Vec::new();
    };
    match parse_file_urls(&body) {
        Ok(urls) => {
            debug!("gamebanana mod {} has {} files", sub.mod_id, urls.len());
            urls
        }
        Err(err) => {
            sink.warn(format!("无法解析 {}: {}", what, err));
            Vec::new()
        }
    }
}

/// 每个 Mod 的文件按序号命名：`1_<文件名>`、`2_<文件名>`……
pub fn plan_gamebanana_tasks(
    subs: &[Subscription],
    files: &BTreeMap<u64, Vec<String>>,
    base_dir: &Path,
) -> Vec<DownloadTask> {
    let root = base_dir.join(GAMEBANANA_DIR);
    subs.iter()
        .flat_map(|sub| {
            let dir = root.join(safe_fs_name(&sub.name, "_", MAX_NAME_LEN));
            files
                .get(&sub.mod_id)
                .into_iter()
                .flatten()
                .zip(1u64..)
                .map(move |(url, n)| {
                    let name = safe_fs_name(&file_name_from_url(url), "_", MAX_NAME_LEN);
                    DownloadTask {
                        mod_id: sub.mod_id,
                        file_id: n,
                        url: url.clone(),
                        dest: dir.join(format!("{}_{}", n, name)),
                    }
                })
        })
        .collect()
}

pub fn run_gamebanana_sequence(
    transport: &dyn Transport,
    sink: &ConsoleSink,
    settings: &PipelineSettings,
    endpoints: &GameBananaEndpoints,
    user_id: &str,
    base_dir: &Path,
) -> DownloadSummary {
    let aborted = DownloadSummary {
        aborted_domains: 1,
        ..DownloadSummary::default()
    };

    sink.info("========== GameBanana ==========");
    let user_id = user_id.trim();
    if user_id.is_empty() {
        sink.error("未配置 gb_user_id，无法获取 GameBanana 订阅");
        return aborted;
    }

    let Some(body) = fetch_json(transport, sink, &endpoints.subscriptions(user_id), "订阅列表")
    else {
        sink.error("无法获取 GameBanana 订阅列表");
        return aborted;
    };
    let subs = match parse_subscriptions(&body) {
        Ok(subs) => {
            let mut seen = HashSet::new();
            subs.into_iter()
                .filter(|s| seen.insert(s.mod_id))
                .collect::<Vec<_>>()
        }
        Err(err) => {
            sink.error(format!("无法解析 GameBanana 订阅列表: {}", err));
            return aborted;
        }
    };
    sink.info(format!("订阅列表中共有 {} 个 Mod", subs.len()));
    if subs.is_empty() {
        return DownloadSummary::default();
    }

    let queue: TaskQueue<&Subscription> = subs.iter().collect();
    let results = ResultAggregator::new();
    let options = PoolOptions::api(
        "gb-files",
        queue.len(),
        settings.api_worker_cap,
        settings.rate_limit_delay,
    );
    sink.info(format!(
        "正在获取 {} 个 Mod 的文件列表 ({} 个线程)",
        queue.len(),
        options.workers
    ));
    run_pool(&queue, &results, &options, |sub| {
        (sub.mod_id, fetch_file_urls(transport, sink, endpoints, sub))
    });
    let files: BTreeMap<u64, Vec<String>> = results.drain_into_map();

    let tasks = plan_gamebanana_tasks(&subs, &files, base_dir);
    if tasks.is_empty() {
        sink.info("订阅的 Mod 中没有可下载的文件");
        return DownloadSummary::default();
    }

    let summary = transfer::download_all(
        transport,
        sink,
        &settings.retry,
        settings.download_workers,
        tasks,
    );
    sink.info(format!("[GameBanana] 下载结束: {}", summary));
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    use crate::download::pipeline::test_support::FakeTransport;
    use crate::download::retry::RetryPolicy;

    const GB: &str = "http://gb.test/apiv11";

    fn settings() -> PipelineSettings {
        PipelineSettings {
            api_worker_cap: None,
            rate_limit_delay: Duration::ZERO,
            download_workers: 2,
            retry: RetryPolicy::new(2, Duration::ZERO),
            ..PipelineSettings::default()
        }
    }

    fn mock_gb() -> FakeTransport {
        FakeTransport::default()
            .route(
                &format!("{GB}/Member/42/Subscriptions"),
                200,
                r#"{"_aRecords":[
                    {"_aSubscription":{"_sSingularTitle":"Mod","_sProfileUrl":"https://gamebanana.com/mods/100","_sName":"HUD: Clean"}},
                    {"_aSubscription":{"_sSingularTitle":"Mod","_sProfileUrl":"https://gamebanana.com/mods/200","_sName":"Empty"}},
                    {"_aSubscription":{"_sSingularTitle":"Mod","_sProfileUrl":"https://gamebanana.com/mods/100","_sName":"HUD: Clean"}}
                ]}"#,
            )
            .route(
                &format!("{GB}/Mod/100?_csvProperties=_aFiles"),
                200,
                r#"{"_aFiles":[{"_sDownloadUrl":"http://dl.test/dl/11"},{"_sDownloadUrl":"http://dl.test/dl/12"}]}"#,
            )
            .route(
                &format!("{GB}/Mod/200?_csvProperties=_aFiles"),
                200,
                r#"{"_aFiles":[]}"#,
            )
    }

    #[test]
    fn downloads_numbered_files_into_mod_name_folder() {
        let base = tempfile::tempdir().unwrap();
        let transport = mock_gb()
            .script_download("http://dl.test/dl/11", vec![Ok(b"eleven".to_vec())])
            .script_download("http://dl.test/dl/12", vec![Err(502), Ok(b"twelve".to_vec())]);
        let sink = ConsoleSink::quiet();

        let summary = run_gamebanana_sequence(
            &transport,
            &sink,
            &settings(),
            &GameBananaEndpoints::new(GB),
            "42",
            base.path(),
        );

        assert_eq!(summary.total, 2);
        assert_eq!(summary.succeeded, 2);
        assert!(summary.is_complete());
        let dir = base.path().join(GAMEBANANA_DIR).join("HUD_ Clean");
        assert_eq!(fs::read(dir.join("1_11")).unwrap(), b"eleven");
        assert_eq!(fs::read(dir.join("2_12")).unwrap(), b"twelve");
        // 重复订阅只查询一次
        let lookups = transport
            .requested_urls()
            .iter()
            .filter(|u| u.contains("/Mod/100"))
            .count();
        assert_eq!(lookups, 1);
    }

    #[test]
    fn missing_user_id_or_subscriptions_abort() {
        let base = tempfile::tempdir().unwrap();
        let sink = ConsoleSink::quiet();
        let transport = FakeTransport::default();
        let endpoints = GameBananaEndpoints::new(GB);

        let summary =
            run_gamebanana_sequence(&transport, &sink, &settings(), &endpoints, "  ", base.path());
        assert_eq!(summary.aborted_domains, 1);
        assert!(transport.requested_urls().is_empty());

        let summary =
            run_gamebanana_sequence(&transport, &sink, &settings(), &endpoints, "7", base.path());
        assert_eq!(summary.aborted_domains, 1);
        assert!(!summary.is_complete());
        assert!(!base.path().join(GAMEBANANA_DIR).exists());
    }

    #[test]
    fn task_plan_numbers_files_per_mod() {
        let subs = vec![
            Subscription {
                mod_id: 1,
                name: "A".to_string(),
            },
            Subscription {
                mod_id: 2,
                name: "B/C".to_string(),
            },
        ];
        let files: BTreeMap<u64, Vec<String>> = [
            (1, vec!["http://x/dl/".to_string()]),
            (2, vec!["http://x/a.zip".to_string(), "http://x/b.zip".to_string()]),
        ]
        .into_iter()
        .collect();

        let dests: Vec<_> = plan_gamebanana_tasks(&subs, &files, Path::new("/m"))
            .into_iter()
            .map(|t| (t.mod_id, t.file_id, t.dest))
            .collect();
        let root = Path::new("/m").join(GAMEBANANA_DIR);
        assert_eq!(
            dests,
            vec![
                (1, 1, root.join("A").join("1_downloaded_file")),
                (2, 1, root.join("B_C").join("1_a.zip")),
                (2, 2, root.join("B_C").join("2_b.zip")),
            ]
        );
    }
}
