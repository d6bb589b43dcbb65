//! 把 `mods_directory/<domain>/<mod_id>` 目录重命名为 Mod 名称。
//!
//! 通常在下载流程之后运行一次。名称经由限速工作池从详情接口获取。

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::base_system::context::safe_fs_name;
use crate::download::models::ModId;
use crate::download::pipeline::Pipeline;
use crate::gamebanana::GAMEBANANA_DIR;

const MAX_NAME_LEN: usize = 120;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RenameReport {
    pub renamed: usize,
    pub skipped: usize,
    pub failed: usize,
}

fn sorted_subdirs(dir: &Path) -> io::Result<Vec<(String, PathBuf)>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            out.push((name.to_string(), entry.path()));
        }
    }
    out.sort();
    Ok(out)
}

/// `mods_directory` 下除 GameBanana 目录以外的每个子目录都视为一个游戏域名。
pub fn domain_dirs(base_dir: &Path) -> io::Result<Vec<(String, PathBuf)>> {
    let mut dirs = sorted_subdirs(base_dir)?;
    dirs.retain(|(name, _)| name != GAMEBANANA_DIR);
    Ok(dirs)
}

/// 名称全为数字的子目录，即尚未重命名的 Mod 目录。
pub fn numeric_subdirs(domain_dir: &Path) -> io::Result<Vec<(ModId, PathBuf)>> {
    Ok(sorted_subdirs(domain_dir)?
        .into_iter()
        .filter(|(name, _)| !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()))
        .filter_map(|(name, path)| name.parse::<ModId>().ok().map(|id| (id, path)))
        .collect())
}

pub fn run_rename_sequence(pipeline: &Pipeline<'_>, base_dir: &Path) -> RenameReport {
    let sink = pipeline.sink();
    let mut report = RenameReport::default();

    sink.info(format!("Mod 目录: {}", base_dir.display()));
    let domains = match domain_dirs(base_dir) {
        Ok(domains) => domains,
        Err(err) => {
            sink.error(format!("无法读取 {}: {}", base_dir.display(), err));
            return report;
        }
    };
    if domains.is_empty() {
        sink.warn(format!("{} 下没有任何游戏域名目录", base_dir.display()));
        return report;
    }

    for (domain, domain_path) in domains {
        sink.info(format!("========== {} ==========", domain));
        let mods = match numeric_subdirs(&domain_path) {
            Ok(mods) => mods,
            Err(err) => {
                sink.error(format!("无法读取 {}: {}", domain_path.display(), err));
                continue;
            }
        };
        if mods.is_empty() {
            sink.info(format!("{} 下没有需要重命名的 Mod 目录", domain));
            continue;
        }

        let ids: Vec<ModId> = mods.iter().map(|(id, _)| *id).collect();
        let names = pipeline.resolve_mod_names(&ids, &domain);

        for (mod_id, old_path) in mods {
            let Some(raw) = names.get(&mod_id) else {
                sink.warn(format!("未找到 Mod {} 的名称，保持原目录", mod_id));
                report.failed += 1;
                continue;
            };
            let new_name = safe_fs_name(raw, "_", MAX_NAME_LEN);
            let new_path = domain_path.join(&new_name);
            if new_path.exists() {
                sink.warn(format!(
                    "{} 已存在，跳过 Mod {}",
                    new_path.display(),
                    mod_id
                ));
                report.skipped += 1;
                continue;
            }

            match fs::rename(&old_path, &new_path) {
                Ok(()) => {
                    debug!("renamed {} -> {}", old_path.display(), new_path.display());
                    sink.info(format!("[{}] {} -> {}", domain, mod_id, new_name));
                    report.renamed += 1;
                }
                Err(err) => {
                    sink.error(format!(
                        "重命名 {} 失败: {}",
                        old_path.display(),
                        err
                    ));
                    report.failed += 1;
                }
            }
        }
    }

    sink.info(format!(
        "重命名完成: 成功 {} / 跳过 {} / 失败 {}",
        report.renamed, report.skipped, report.failed
    ));
    report
}
