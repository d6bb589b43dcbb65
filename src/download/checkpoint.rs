//! 断点文件 `download_links.txt`：链接解析阶段与下载阶段之间的交接。
//!
//! 每行一条 `mod_id,file_id,url`；每次运行整体重写（先写临时文件再原子替换）。
//! 读取时跳过无法解析的行，不中断整个流程。

use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::warn;

use super::models::{DownloadTask, FileId, LinkTask, ModId};

pub const CHECKPOINT_FILE: &str = "download_links.txt";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("io error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("failed to replace {path}: {source}")]
    Persist {
        path: PathBuf,
        source: tempfile::PersistError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRecord {
    pub mod_id: ModId,
    pub file_id: FileId,
    pub url: String,
}

#[derive(Debug, Default)]
pub struct ParsedCheckpoint {
    pub records: Vec<CheckpointRecord>,
    /// (行号, 原始内容)
    pub skipped: Vec<(usize, String)>,
}

static RE_LINE: OnceLock<Regex> = OnceLock::new();

fn re_line() -> &'static Regex {
    RE_LINE.get_or_init(|| {
        Regex::new(r"^\s*(\d+)\s*,\s*(\d+)\s*,(.+)$").expect("compile RE_LINE")
    })
}

pub fn domain_dir(base_dir: &Path, domain: &str) -> PathBuf {
    base_dir.join(domain)
}

pub fn checkpoint_path(base_dir: &Path, domain: &str) -> PathBuf {
    domain_dir(base_dir, domain).join(CHECKPOINT_FILE)
}

/// 写出断点文件，返回路径与实际写入的记录数。
///
/// 含换行的 URL 会破坏行格式，直接跳过并记录警告。
pub fn write_checkpoint(
    links: &BTreeMap<LinkTask, String>,
    domain: &str,
    base_dir: &Path,
) -> Result<(PathBuf, usize), CheckpointError> {
    let dir = domain_dir(base_dir, domain);
    fs::create_dir_all(&dir).map_err(|source| CheckpointError::Io {
        path: dir.clone(),
        source,
    })?;
    let path = dir.join(CHECKPOINT_FILE);

    let tmp = NamedTempFile::new_in(&dir).map_err(|source| CheckpointError::Io {
        path: dir.clone(),
        source,
    })?;
    let io_err = |source| CheckpointError::Io {
        path: path.clone(),
        source,
    };

    let mut written = 0usize;
    {
        let mut out = BufWriter::new(tmp.as_file());
        for (task, url) in links {
            let url = url.trim();
            if url.is_empty() || url.contains(['\n', '\r']) {
                warn!("跳过无法写入断点文件的链接: {}", task);
                continue;
            }
            writeln!(out, "{},{},{}", task.mod_id, task.file_id, url).map_err(io_err)?;
            written += 1;
        }
        out.flush().map_err(io_err)?;
    }
    tmp.as_file().sync_all().map_err(io_err)?;

    tmp.persist(&path)
        .map_err(|source| CheckpointError::Persist {
            path: path.clone(),
            source,
        })?;
    Ok((path, written))
}

pub fn parse_line(line: &str) -> Option<CheckpointRecord> {
    let caps = re_line().captures(line.trim_end_matches(['\r', '\n']))?;
    let mod_id = caps.get(1)?.as_str().parse().ok()?;
    let file_id = caps.get(2)?.as_str().parse().ok()?;
    let url = caps.get(3)?.as_str().trim();
    if url.is_empty() {
        return None;
    }
    Some(CheckpointRecord {
        mod_id,
        file_id,
        url: url.to_string(),
    })
}

/// 读取断点文件；文件不存在时返回 `Ok(None)`。
pub fn read_checkpoint(
    domain: &str,
    base_dir: &Path,
) -> Result<Option<ParsedCheckpoint>, CheckpointError> {
    let path = checkpoint_path(base_dir, domain);
    let file = match fs::File::open(&path) {
        Ok(f) => f,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(CheckpointError::Io { path, source }),
    };

    let mut parsed = ParsedCheckpoint::default();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|source| CheckpointError::Io {
            path: path.clone(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(&line) {
            Some(record) => parsed.records.push(record),
            None => parsed.skipped.push((idx + 1, line)),
        }
    }
    Ok(Some(parsed))
}

/// URL 最后一个 `/` 之后、`?` 之前的部分；取不到时使用 `mod_{id}_file_{id}.zip`。
pub fn file_name_from_url(url: &str, mod_id: ModId, file_id: FileId) -> String {
    let tail = url.rsplit('/').next().unwrap_or("");
    let name = tail.split(['?', '#']).next().unwrap_or("").trim();
    if name.is_empty() || name == "." || name == ".." || name.contains('\\') {
        format!("mod_{}_file_{}.zip", mod_id, file_id)
    } else {
        name.to_string()
    }
}

/// 只转义原始空格，其余字符保持签名链接原样。
pub fn escape_spaces(url: &str) -> Cow<'_, str> {
    if url.contains(' ') {
        Cow::Owned(url.replace(' ', "%20"))
    } else {
        Cow::Borrowed(url)
    }
}

/// 把断点记录展开为下载任务，目标路径为 `base/domain/mod_id/filename`。
///
/// 同一 Mod 下文件名撞车时加上 `file_id` 前缀，保证一次运行中目标路径唯一。
pub fn plan_download_tasks(
    records: Vec<CheckpointRecord>,
    domain: &str,
    base_dir: &Path,
) -> Vec<DownloadTask> {
    let root = domain_dir(base_dir, domain);
    let mut taken: HashSet<PathBuf> = HashSet::new();
    let mut tasks = Vec::with_capacity(records.len());

    for record in records {
        let mod_dir = root.join(record.mod_id.to_string());
        let name = file_name_from_url(&record.url, record.mod_id, record.file_id);

        let mut dest = mod_dir.join(&name);
        let mut n = 1;
        while taken.contains(&dest) {
            let prefixed = if n == 1 {
                format!("{}_{}", record.file_id, name)
            } else {
                format!("{}_{}_{}", record.file_id, n, name)
            };
            dest = mod_dir.join(prefixed);
            n += 1;
        }
        taken.insert(dest.clone());

        tasks.push(DownloadTask {
            mod_id: record.mod_id,
            file_id: record.file_id,
            url: record.url,
            dest,
        });
    }
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_yields_expected_destinations() {
        let base = tempfile::tempdir().unwrap();
        let mut links = BTreeMap::new();
        links.insert(LinkTask::new(10, 20), "http://x/a.zip".to_string());
        links.insert(LinkTask::new(10, 21), "http://x/b.zip".to_string());

        let (path, written) = write_checkpoint(&links, "domain", base.path()).unwrap();
        assert_eq!(path, base.path().join("domain").join(CHECKPOINT_FILE));
        assert_eq!(written, 2);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "10,20,http://x/a.zip\n10,21,http://x/b.zip\n"
        );

        let parsed = read_checkpoint("domain", base.path()).unwrap().unwrap();
        assert!(parsed.skipped.is_empty());
        let tasks = plan_download_tasks(parsed.records, "domain", base.path());
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].dest, base.path().join("domain/10/a.zip"));
        assert_eq!(tasks[1].dest, base.path().join("domain/10/b.zip"));
        assert_eq!(tasks[0].link(), LinkTask::new(10, 20));
        assert_eq!(tasks[1].url, "http://x/b.zip");
    }

    #[test]
    fn rewrite_replaces_previous_generation() {
        let base = tempfile::tempdir().unwrap();
        let mut links = BTreeMap::new();
        links.insert(LinkTask::new(1, 1), "http://x/old.zip".to_string());
        write_checkpoint(&links, "d", base.path()).unwrap();

        let mut links = BTreeMap::new();
        links.insert(LinkTask::new(2, 2), "http://x/new.zip".to_string());
        write_checkpoint(&links, "d", base.path()).unwrap();

        let parsed = read_checkpoint("d", base.path()).unwrap().unwrap();
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].mod_id, 2);
    }

    #[test]
    fn malformed_lines_are_skipped_not_fatal() {
        let base = tempfile::tempdir().unwrap();
        let dir = base.path().join("d");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(CHECKPOINT_FILE),
            "1,2,http://x/a.zip\nnot a record\n\nabc,2,http://x\n3,4,\n5,6,http://x/c,d.zip\n",
        )
        .unwrap();

        let parsed = read_checkpoint("d", base.path()).unwrap().unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[1].url, "http://x/c,d.zip");
        let skipped_lines: Vec<usize> = parsed.skipped.iter().map(|(n, _)| *n).collect();
        assert_eq!(skipped_lines, vec![2, 4, 5]);
    }

    #[test]
    fn missing_checkpoint_is_not_an_error() {
        let base = tempfile::tempdir().unwrap();
        assert!(read_checkpoint("nothing", base.path()).unwrap().is_none());
    }

    #[test]
    fn urls_with_newlines_are_not_persisted() {
        let base = tempfile::tempdir().unwrap();
        let mut links = BTreeMap::new();
        links.insert(LinkTask::new(1, 1), "http://x/a\nb.zip".to_string());
        links.insert(LinkTask::new(1, 2), "http://x/ok.zip".to_string());
        let (_, written) = write_checkpoint(&links, "d", base.path()).unwrap();
        assert_eq!(written, 1);
    }

    #[test]
    fn file_name_rules() {
        assert_eq!(
            file_name_from_url("https://cdn/files/SkyUI_5_2.7z?md5=abc&expires=1", 1, 2),
            "SkyUI_5_2.7z"
        );
        assert_eq!(file_name_from_url("https://cdn/files/", 1, 2), "mod_1_file_2.zip");
        assert_eq!(file_name_from_url("https://cdn/..", 1, 2), "mod_1_file_2.zip");
        assert_eq!(file_name_from_url("https://cdn/?x=1", 3, 4), "mod_3_file_4.zip");
    }

    #[test]
    fn spaces_are_escaped_only_when_present() {
        assert_eq!(
            escape_spaces("https://cdn/My Mod 1.zip"),
            "https://cdn/My%20Mod%201.zip"
        );
        assert!(matches!(escape_spaces("https://cdn/a.zip"), Cow::Borrowed(_)));
    }

    #[test]
    fn colliding_file_names_get_unique_destinations() {
        let base = Path::new("/base");
        let records = vec![
            CheckpointRecord {
                mod_id: 7,
                file_id: 1,
                url: "http://x/a/main.zip".to_string(),
            },
            CheckpointRecord {
                mod_id: 7,
                file_id: 2,
                url: "http://x/b/main.zip".to_string(),
            },
            CheckpointRecord {
                mod_id: 8,
                file_id: 3,
                url: "http://x/c/main.zip".to_string(),
            },
        ];
        let tasks = plan_download_tasks(records, "d", base);
        let dests: Vec<_> = tasks.iter().map(|t| t.dest.clone()).collect();
        assert_eq!(
            dests,
            vec![
                base.join("d/7/main.zip"),
                base.join("d/7/2_main.zip"),
                base.join("d/8/main.zip"),
            ]
        );
    }
}
