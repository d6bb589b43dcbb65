//! 三阶段下载流水线。
//!
//! 阶段 1：每个 Mod 的文件列表；阶段 2：每个 (Mod, 文件) 的签名下载链接；
//! 写出断点文件；阶段 3：读取断点文件并带重试地下载。
//! 每个阶段都是完整的屏障：上一阶段的工作线程全部 join 之后才开始下一阶段。
//! 单个任务的失败只计数并记录日志，不会越过工作线程边界。

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use super::checkpoint::{self, CheckpointError, plan_download_tasks, read_checkpoint};
use super::models::{DownloadSummary, FileId, LinkTask, ModId, TrackedMod};
use super::progress::ConsoleSink;
use super::queue::{ResultAggregator, TaskQueue};
use super::retry::RetryPolicy;
use super::transfer;
use super::worker_pool::{PoolOptions, run_pool};
use crate::base_system::context::Config;
use crate::network_parser::nexus::{
    parse_download_uri, parse_file_ids, parse_mod_name, parse_tracked_mods,
};
use crate::network_parser::{ApiAuth, NexusEndpoints, Transport};

/// 运行期间只读的流水线参数。
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub endpoints: NexusEndpoints,
    pub api_worker_cap: Option<usize>,
    pub rate_limit_delay: Duration,
    pub download_workers: usize,
    pub retry: RetryPolicy,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            endpoints: NexusEndpoints::new(
                &config.api_base_url,
                &config.file_category,
                config.link_expires,
            ),
            api_worker_cap: config.api_worker_cap(),
            rate_limit_delay: config.rate_limit_delay(),
            download_workers: config.download_workers,
            retry: RetryPolicy::new(config.max_download_attempts, config.retry_backoff()),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            endpoints: NexusEndpoints::default(),
            api_worker_cap: None,
            rate_limit_delay: Duration::from_secs(1),
            download_workers: 4,
            retry: RetryPolicy::default(),
        }
    }
}

pub struct Pipeline<'a> {
    auth: &'a ApiAuth,
    transport: &'a dyn Transport,
    sink: &'a ConsoleSink,
    settings: &'a PipelineSettings,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        auth: &'a ApiAuth,
        transport: &'a dyn Transport,
        sink: &'a ConsoleSink,
        settings: &'a PipelineSettings,
    ) -> Self {
        Self {
            auth,
            transport,
            sink,
            settings,
        }
    }

    pub fn sink(&self) -> &ConsoleSink {
        self.sink
    }

    /// 带鉴权头的 GET；网络错误或非 200 记为警告并返回 None。
    fn fetch_json(&self, url: &str, what: &str) -> Option<String> {
        match self.transport.get(url, &self.auth.headers()) {
            Ok(resp) if resp.is_ok() => Some(resp.body),
            Ok(resp) => {
                self.sink
                    .warn(format!("{} 请求返回状态码 {}", what, resp.status));
                None
            }
            Err(err) => {
                self.sink.warn(format!("{} 请求失败: {}", what, err));
                None
            }
        }
    }

    fn api_pool(&self, name: &'static str, task_count: usize) -> PoolOptions {
        PoolOptions::api(
            name,
            task_count,
            self.settings.api_worker_cap,
            self.settings.rate_limit_delay,
        )
    }

    /// 拉取追踪列表；请求或解析失败时返回 None。
    pub fn resolve_tracked_mods(&self) -> Option<Vec<TrackedMod>> {
        let body = self.fetch_json(&self.settings.endpoints.tracked_mods(), "追踪列表")?;
        match parse_tracked_mods(&body) {
            Ok(mods) => {
                self.sink
                    .info(format!("追踪列表中共有 {} 个 Mod", mods.len()));
                Some(mods)
            }
            Err(err) => {
                self.sink.warn(format!("无法解析追踪列表: {}", err));
                None
            }
        }
    }

    /// 去重后的追踪 Mod ID，保持原有顺序。
    pub fn resolve_tracked_identifiers(&self) -> Vec<ModId> {
        let mods = self.resolve_tracked_mods().unwrap_or_default();
        dedup_ids(mods.iter().map(|m| m.mod_id))
    }

    /// 阶段 1：每个 Mod 的文件 ID 列表。获取失败的 Mod 对应空列表。
    pub fn resolve_file_descriptors(
        &self,
        ids: &[ModId],
        domain: &str,
    ) -> BTreeMap<ModId, Vec<FileId>> {
        let queue: TaskQueue<ModId> = ids.iter().copied().collect();
        let results = ResultAggregator::new();
        let options = self.api_pool("files", queue.len());
        self.sink.info(format!(
            "正在获取 {} 个 Mod 的文件列表 ({} 个线程)",
            queue.len(),
            options.workers
        ));

        run_pool(&queue, &results, &options, |mod_id| {
            (mod_id, self.fetch_file_ids(domain, mod_id))
        });
        results.drain_into_map()
    }

    fn fetch_file_ids(&self, domain: &str, mod_id: ModId) -> Vec<FileId> {
        let url = self.settings.endpoints.mod_files(domain, mod_id);
        let what = format!("Mod {} 文件列表", mod_id);
        let Some(body) = self.fetch_json(&url, &what) else {
            return Vec::new();
        };
        match parse_file_ids(&body) {
            Ok(ids) => {
                debug!("mod {} has {} files", mod_id, ids.len());
                ids
            }
            Err(err) => {
                self.sink.warn(format!("无法解析 {}: {}", what, err));
                Vec::new()
            }
        }
    }

    /// 阶段 2：把文件列表展平为 `LinkTask` 并解析下载链接。
    /// 没拿到链接的任务直接丢弃，不重试。
    pub fn resolve_download_links(
        &self,
        files: &BTreeMap<ModId, Vec<FileId>>,
        domain: &str,
    ) -> BTreeMap<LinkTask, String> {
        let tasks: BTreeSet<LinkTask> = files
            .iter()
            .flat_map(|(mod_id, file_ids)| {
                file_ids
                    .iter()
                    .map(move |file_id| LinkTask::new(*mod_id, *file_id))
            })
            .collect();

        let queue: TaskQueue<LinkTask> = tasks.into_iter().collect();
        let results = ResultAggregator::new();
        let options = self.api_pool("links", queue.len());
        self.sink.info(format!(
            "正在解析 {} 个文件的下载链接 ({} 个线程)",
            queue.len(),
            options.workers
        ));

        run_pool(&queue, &results, &options, |task| {
            (task, self.fetch_download_uri(domain, task))
        });

        results
            .drain_into_map()
            .into_iter()
            .filter_map(|(task, url)| url.map(|url| (task, url)))
            .collect()
    }

    fn fetch_download_uri(&self, domain: &str, task: LinkTask) -> Option<String> {
        let url = self
            .settings
            .endpoints
            .download_link(domain, task.mod_id, task.file_id);
        let what = format!("{} 下载链接", task);
        let body = self.fetch_json(&url, &what)?;
        match parse_download_uri(&body) {
            Ok(uri) => Some(uri),
            Err(err) => {
                self.sink.warn(format!("无法解析 {}: {}", what, err));
                None
            }
        }
    }

    pub fn persist_checkpoint(
        &self,
        links: &BTreeMap<LinkTask, String>,
        domain: &str,
        base_dir: &Path,
    ) -> Result<PathBuf, CheckpointError> {
        let (path, written) = checkpoint::write_checkpoint(links, domain, base_dir)?;
        self.sink.info(format!(
            "已写入 {} 条下载链接到 {}",
            written,
            path.display()
        ));
        Ok(path)
    }

    /// 阶段 3：按断点文件下载。可对同一份断点文件重复执行。
    pub fn run_download_stage(&self, domain: &str, base_dir: &Path) -> DownloadSummary {
        let path = checkpoint::checkpoint_path(base_dir, domain);
        let parsed = match read_checkpoint(domain, base_dir) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => {
                self.sink
                    .info(format!("未找到 {}，无需下载", path.display()));
                return DownloadSummary::default();
            }
            Err(err) => {
                self.sink.error(format!("读取断点文件失败: {}", err));
                return DownloadSummary {
                    aborted_domains: 1,
                    ..DownloadSummary::default()
                };
            }
        };

        for (line_no, raw) in &parsed.skipped {
            self.sink
                .warn(format!("跳过断点文件第 {} 行: {}", line_no, raw));
        }

        let tasks = plan_download_tasks(parsed.records, domain, base_dir);
        if tasks.is_empty() {
            self.sink
                .info(format!("{} 中没有可下载的文件", path.display()));
            return DownloadSummary::default();
        }

        let summary = transfer::download_all(
            self.transport,
            self.sink,
            &self.settings.retry,
            self.settings.download_workers,
            tasks,
        );
        self.sink.info(format!("[{}] 下载结束: {}", domain, summary));
        summary
    }

    /// 单个游戏域名的完整流程：阶段 1 → 阶段 2 → 断点文件 → 阶段 3。
    pub fn run_domain(
        &self,
        tracked: &[TrackedMod],
        domain: &str,
        base_dir: &Path,
    ) -> DownloadSummary {
        self.sink.info(format!("========== {} ==========", domain));

        let ids = dedup_ids(
            tracked
                .iter()
                .filter(|m| m.belongs_to(domain))
                .map(|m| m.mod_id),
        );
        if ids.is_empty() {
            self.sink.info(format!("没有属于 {} 的追踪 Mod", domain));
        }

        let files = self.resolve_file_descriptors(&ids, domain);
        let links = self.resolve_download_links(&files, domain);

        match self.persist_checkpoint(&links, domain, base_dir) {
            Ok(_) => self.run_download_stage(domain, base_dir),
            Err(err) => {
                self.sink
                    .error(format!("[{}] 无法写入断点文件，跳过下载: {}", domain, err));
                DownloadSummary {
                    aborted_domains: 1,
                    ..DownloadSummary::default()
                }
            }
        }
    }

    /// 依次处理多个游戏域名，追踪列表只拉取一次。
    pub fn run_sequence(&self, domains: &[String], base_dir: &Path) -> DownloadSummary {
        let Some(tracked) = self.resolve_tracked_mods() else {
            self.sink.error("无法获取追踪列表，本次不做任何处理");
            return DownloadSummary {
                aborted_domains: domains.len(),
                ..DownloadSummary::default()
            };
        };

        let mut total = DownloadSummary::default();
        for domain in domains {
            total.merge(self.run_domain(&tracked, domain, base_dir));
        }
        total
    }

    /// 只执行阶段 3，使用各域名已有的断点文件。
    pub fn download_sequence(&self, domains: &[String], base_dir: &Path) -> DownloadSummary {
        let mut total = DownloadSummary::default();
        for domain in domains {
            self.sink.info(format!("========== {} ==========", domain));
            total.merge(self.run_download_stage(domain, base_dir));
        }
        total
    }

    /// 经由限速工作池查询 Mod 名称；查不到的 Mod 不出现在结果中。
    pub fn resolve_mod_names(&self, ids: &[ModId], domain: &str) -> BTreeMap<ModId, String> {
        let queue: TaskQueue<ModId> = dedup_ids(ids.iter().copied()).into_iter().collect();
        let results = ResultAggregator::new();
        let options = self.api_pool("names", queue.len());

        run_pool(&queue, &results, &options, |mod_id| {
            (mod_id, self.fetch_mod_name(domain, mod_id))
        });

        results
            .drain_into_map()
            .into_iter()
            .filter_map(|(id, name)| name.map(|name| (id, name)))
            .collect()
    }

    fn fetch_mod_name(&self, domain: &str, mod_id: ModId) -> Option<String> {
        let url = self.settings.endpoints.mod_details(domain, mod_id);
        let what = format!("Mod {} 详情", mod_id);
        let body = self.fetch_json(&url, &what)?;
        match parse_mod_name(&body) {
            Ok(name) => Some(name),
            Err(err) => {
                self.sink.warn(format!("无法解析 {}: {}", what, err));
                None
            }
        }
    }
}

fn dedup_ids(ids: impl IntoIterator<Item = ModId>) -> Vec<ModId> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::{HashMap, VecDeque};
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;

    use crate::network_parser::network::HttpResponse;
    use crate::network_parser::{Transport, TransportError};

    /// 内存中的 `Transport`：按完整 URL 返回固定响应，下载按脚本依次返回。
    #[derive(Default)]
    pub(crate) struct FakeTransport {
        routes: HashMap<String, (u16, String)>,
        downloads: Mutex<HashMap<String, VecDeque<Result<Vec<u8>, u16>>>>,
        pub(crate) requests: Mutex<Vec<(String, Vec<(String, String)>)>>,
    }

    impl FakeTransport {
        pub(crate) fn route(mut self, url: &str, status: u16, body: &str) -> Self {
            self.routes
                .insert(url.to_string(), (status, body.to_string()));
            self
        }

        pub(crate) fn script_download(self, url: &str, steps: Vec<Result<Vec<u8>, u16>>) -> Self {
            self.downloads
                .lock()
                .unwrap()
                .insert(url.to_string(), steps.into());
            self
        }

        pub(crate) fn requested_urls(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|(u, _)| u.clone())
                .collect()
        }
    }

    impl Transport for FakeTransport {
        fn get(
            &self,
            url: &str,
            headers: &[(&str, &str)],
        ) -> Result<HttpResponse, TransportError> {
            self.requests.lock().unwrap().push((
                url.to_string(),
                headers
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ));
            let (status, body) = self
                .routes
                .get(url)
                .cloned()
                .unwrap_or((404, String::new()));
            Ok(HttpResponse { status, body })
        }

        fn download_to_file(&self, url: &str, dest: &Path) -> Result<u64, TransportError> {
            let step = self
                .downloads
                .lock()
                .unwrap()
                .get_mut(url)
                .and_then(VecDeque::pop_front)
                .unwrap_or(Err(404));
            match step {
                Ok(bytes) => {
                    fs::write(dest, &bytes).map_err(|source| TransportError::Io {
                        path: dest.to_path_buf(),
                        source,
                    })?;
                    Ok(bytes.len() as u64)
                }
                Err(status) => Err(TransportError::Status {
                    url: url.to_string(),
                    status,
                }),
            }
        }
    }
}
