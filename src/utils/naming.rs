//! 输出路径的生成：`{下载目录}/[{平台}/]{标题}.{扩展名}`（媒体）与 `{下载目录}/Files/{文件名}`（文件）

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::config::TaskSettings;
use crate::core::task::TaskId;

const MAX_TITLE_CHARS: usize = 100;
const FALLBACK_TITLE: &str = "download";
const FALLBACK_FILE_NAME: &str = "download.bin";
const FILES_SUBDIR: &str = "Files";
const PART_SUFFIX: &str = "part";

fn unsafe_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).expect("静态正则"))
}

/// 去掉常见文件系统不允许的字符
pub fn sanitize_component(name: &str) -> String {
    let cleaned = unsafe_chars().replace_all(name, "");
    cleaned.trim().trim_end_matches('.').trim().to_string()
}

/// 媒体标题：截断到 100 个字符后清理，空则使用 "download"
pub fn media_title(raw: &str) -> String {
    let truncated: String = raw.chars().take(MAX_TITLE_CHARS).collect();
    let safe = sanitize_component(&truncated);
    if safe.is_empty() {
        FALLBACK_TITLE.to_string()
    } else {
        safe
    }
}

/// 取 URL 路径的最后一段作为文件名
pub fn filename_from_url(url: &str) -> String {
    let segment = url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(|s| s.to_string()))
        })
        .unwrap_or_default();
    let safe = sanitize_component(&segment);
    if safe.is_empty() {
        FALLBACK_FILE_NAME.to_string()
    } else {
        safe
    }
}

/// 按命名模板生成文件名主干
pub fn render_pattern(pattern: &str, title: &str, platform: &str, quality: &str, format: &str) -> String {
    let rendered = pattern
        .replace("{title}", title)
        .replace("{platform}", platform)
        .replace("{quality}", quality)
        .replace("{format}", format);
    media_title(&rendered)
}

pub fn media_target(settings: &TaskSettings, platform: &str, stem: &str, ext: &str) -> PathBuf {
    let mut dir = settings.download_dir.clone();
    if settings.create_platform_subfolders {
        let folder = sanitize_component(&platform.to_lowercase());
        if !folder.is_empty() {
            dir = dir.join(folder);
        }
    }
    let ext = sanitize_component(ext.trim_start_matches('.'));
    if ext.is_empty() {
        dir.join(stem)
    } else {
        dir.join(format!("{}.{}", stem, ext))
    }
}

pub fn file_target(settings: &TaskSettings, file_name: &str) -> PathBuf {
    let mut name = sanitize_component(file_name);
    if name.is_empty() {
        name = FALLBACK_FILE_NAME.to_string();
    }
    settings.download_dir.join(FILES_SUBDIR).join(name)
}

/// 下载过程中写入的临时文件：`<目标>.<任务 id>.part`
pub fn part_path(target: &Path, task_id: &TaskId) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.{}", task_id, PART_SUFFIX));
    target.with_file_name(name)
}

/// 目标重名时的第 n 个备选：`名字 (n).扩展名`
pub fn numbered(target: &Path, n: usize) -> PathBuf {
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| FALLBACK_TITLE.to_string());
    let name = match target.extension() {
        Some(ext) => format!("{} ({}).{}", stem, n, ext.to_string_lossy()),
        None => format!("{} ({})", stem, n),
    };
    target.with_file_name(name)
}
