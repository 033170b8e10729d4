use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::error::DownloadError;

/// 配置结构体
///
/// 所有字段都有默认值，配置文件缺少的键会回落到默认配置。
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// 下载根目录
    pub download_dir: String,
    /// 媒体任务最大并发数
    pub max_concurrent_media: usize,
    /// 文件任务最大并发数，0 表示不限制
    pub max_concurrent_files: usize,
    /// 媒体文件是否按平台建子目录
    pub create_platform_subfolders: bool,
    /// 默认画质
    pub default_quality: String,
    /// 默认封装格式
    pub default_format: String,
    /// 媒体文件命名模板
    pub naming_pattern: String,
    /// 网络超时时间（秒），同时作用于连接和每次读取
    pub timeout: u64,
    /// User-Agent
    pub user_agent: String,
    /// 分块大小（字节）
    pub chunk_size: usize,
    /// 调度器满载时的退避时间（毫秒）
    pub admission_backoff_ms: u64,
    /// 平台开关
    pub platforms: BTreeMap<String, bool>,
}

pub fn default_download_dir() -> String {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    Path::new(&home)
        .join("Downloads")
        .join("SocialDownloader")
        .display()
        .to_string()
}

impl Default for Config {
    fn default() -> Self {
        let platforms = ["youtube", "instagram", "tiktok", "twitter", "facebook"]
            .iter()
            .map(|p| (p.to_string(), true))
            .collect();
        Self {
            download_dir: default_download_dir(),
            max_concurrent_media: 3,
            max_concurrent_files: 0,
            create_platform_subfolders: true,
            default_quality: "720p".to_string(),
            default_format: "mp4".to_string(),
            naming_pattern: "{title}".to_string(),
            timeout: 30,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string(),
            chunk_size: 64 * 1024,
            admission_backoff_ms: 1000,
            platforms,
        }
    }
}

/// 提交任务时从配置中截取的快照，之后配置变化不影响已提交的任务
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSettings {
    pub download_dir: PathBuf,
    pub create_platform_subfolders: bool,
    pub naming_pattern: String,
}

impl Config {
    /// 加载配置文件，不存在时写入默认配置
    pub fn load(path: &str) -> Result<Self, DownloadError> {
        if Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            match toml::from_str(&content) {
                Ok(config) => Ok(config),
                Err(e) => {
                    log::warn!("配置文件格式错误: {}，将使用默认配置", e);
                    Ok(Config::default())
                }
            }
        } else {
            let config = Config::default();
            config.save_with_tutorial(path)?;
            Ok(config)
        }
    }

    /// 保存带说明的配置文件
    pub fn save_with_tutorial(&self, path: &str) -> Result<(), DownloadError> {
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent)?;
        }
        let config_content = toml::to_string_pretty(self)
            .map_err(|e| DownloadError::Config(format!("无法序列化配置: {}", e)))?;
        let full_content = format!("{}\n{}", Config::generate_tutorial_content(), config_content);
        fs::write(path, full_content)?;
        Ok(())
    }

    fn generate_tutorial_content() -> &'static str {
        r#"# socdl 配置文件
# ====================
#
# TOML 格式。缺少的配置项使用默认值，命令行参数优先于配置文件。
#
# download_dir               下载根目录，媒体保存在 <download_dir>/<平台>/，文件保存在 <download_dir>/Files/
# max_concurrent_media       同时进行的媒体下载数
# max_concurrent_files       同时进行的文件下载数，0 表示不限制
# create_platform_subfolders 媒体是否按平台建立子目录
# default_quality            默认画质，例如 720p、1080p
# default_format             默认封装格式，例如 mp4、webm、mp3
# naming_pattern             媒体文件名模板，可用 {title} {platform} {quality} {format}
# timeout                    网络超时（秒）
# user_agent                 直链下载使用的 User-Agent
# chunk_size                 分块大小（字节），暂停和取消在分块边界生效
# admission_backoff_ms       并发已满时调度器的退避时间（毫秒）
# [platforms]                各平台开关，关闭的平台在解析阶段直接失败
"#
    }

    /// 校验配置合法性
    pub fn validate(&self) -> Result<(), DownloadError> {
        if self.max_concurrent_media == 0 {
            return Err(DownloadError::Config("媒体并发数必须大于0".to_string()));
        }
        if self.timeout == 0 {
            return Err(DownloadError::Config("超时时间必须大于0".to_string()));
        }
        if self.download_dir.trim().is_empty() {
            return Err(DownloadError::Config("下载目录不能为空".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(DownloadError::Config("分块大小必须大于0".to_string()));
        }
        if !self.naming_pattern.contains("{title}") && !self.naming_pattern.contains("{platform}") {
            return Err(DownloadError::Config("命名模板至少需要包含 {title} 或 {platform}".to_string()));
        }
        Ok(())
    }

    /// 合并命令行参数到配置
    pub fn merge_from_args(&mut self, args: &crate::cli::Args) {
        if let Some(dir) = &args.download_dir {
            self.download_dir = dir.clone();
        }
        if let Some(jobs) = args.jobs {
            self.max_concurrent_media = jobs;
        }
        if let Some(quality) = &args.quality {
            self.default_quality = quality.clone();
        }
        if let Some(format) = &args.format {
            self.default_format = format.clone();
        }
    }

    pub fn task_settings(&self) -> TaskSettings {
        TaskSettings {
            download_dir: PathBuf::from(&self.download_dir),
            create_platform_subfolders: self.create_platform_subfolders,
            naming_pattern: self.naming_pattern.clone(),
        }
    }

    /// 文件调度器的并发上限，None 表示不限制
    pub fn file_concurrency(&self) -> Option<usize> {
        if self.max_concurrent_files == 0 {
            None
        } else {
            Some(self.max_concurrent_files)
        }
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn admission_backoff(&self) -> Duration {
        Duration::from_millis(self.admission_backoff_ms)
    }

    /// 获取配置摘要信息
    pub fn get_summary(&self) -> String {
        format!(
            "配置摘要:\n\
            - 下载目录: {}\n\
            - 媒体并发数: {}\n\
            - 文件并发数: {}\n\
            - 平台子目录: {}\n\
            - 默认画质: {}\n\
            - 默认格式: {}\n\
            - 超时时间: {} 秒",
            self.download_dir,
            self.max_concurrent_media,
            if self.max_concurrent_files == 0 { "不限制".to_string() } else { self.max_concurrent_files.to_string() },
            if self.create_platform_subfolders { "启用" } else { "禁用" },
            self.default_quality,
            self.default_format,
            self.timeout,
        )
    }
}
