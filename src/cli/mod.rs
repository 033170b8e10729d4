//! CLI: 命令行接口和参数解析模块
//!
//! ## 支持的命令
//!
//! - 媒体下载：`socdl <url>`
//! - 直接文件：`socdl --file-url <url>`
//! - 批量下载：`socdl -f urls.txt`
//! - 编辑配置：`socdl -e`
//! - 指定配置：`socdl -c config.conf <url>`
//!
//! ## 配置文件位置
//!
//! - Windows: `%APPDATA%/socdl/socdl.conf`
//! - macOS: `~/Library/Application Support/socdl/socdl.conf`
//! - Linux: `~/.config/socdl/socdl.conf`

use clap::Parser;
use std::env;
use std::fs;
use std::sync::OnceLock;

use crate::config::Config;
use crate::core::actor_manager::SubmitTask;
use crate::core::error::DownloadError;
use crate::utils::validator;

/// 获取平台默认配置文件路径
pub fn default_config_path() -> String {
    #[cfg(target_os = "windows")]
    {
        let appdata = env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
        format!("{}/socdl/socdl.conf", appdata)
    }
    #[cfg(target_os = "macos")]
    {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/Library/Application Support/socdl/socdl.conf", home)
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/.config/socdl/socdl.conf", home)
    }
}

/// 打开配置文件编辑器
pub fn open_config_in_editor(config_path: &str) {
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("notepad").arg(config_path).status().ok();
    }
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg("-e").arg(config_path).status().ok();
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        // 优先 xdg-open，否则 nano
        if std::process::Command::new("xdg-open").arg(config_path).status().is_err() {
            let _ = std::process::Command::new("nano").arg(config_path).status();
        }
    }
}

/// `--version` 的长输出，带上构建时记录的 git 提交和时间
fn long_version() -> &'static str {
    static VERSION: OnceLock<String> = OnceLock::new();
    VERSION.get_or_init(|| {
        format!(
            "{}\ncommit: {}\nbuilt: {}",
            env!("CARGO_PKG_VERSION"),
            option_env!("VERGEN_GIT_SHA").unwrap_or("unknown"),
            option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or("unknown"),
        )
    })
}

/// socdl 命令行参数
///
/// 示例用法：
///   socdl https://www.youtube.com/watch?v=xxxx
///   socdl --file-url https://example.com/file.zip
///   socdl -j 5 -q 1080p -f urls.txt
#[derive(Parser, Debug, Clone)]
#[command(
    name = "socdl",
    version = env!("CARGO_PKG_VERSION"),
    long_version = long_version(),
    about = "社交媒体视频与文件的并发下载队列",
    long_about = "把媒体链接和文件链接放进下载队列，按并发上限下载，支持暂停、恢复和取消。\n\n按键：p 暂停全部，r 恢复全部，c 取消全部，q 退出。\n"
)]
pub struct Args {
    /// 媒体链接（需要解析的社交媒体地址）
    #[arg(required = false, help = "要下载的媒体链接，可以同时指定多个。")]
    pub urls: Vec<String>,

    /// 直接文件链接
    #[arg(long = "file-url", value_name = "URL", help = "直接下载的文件链接，可以重复指定。")]
    pub file_urls: Vec<String>,

    /// 包含链接列表的文件
    #[arg(short = 'f', long = "url-file", help = "包含链接列表的文件，每行一个，以 file: 开头的行按文件下载。")]
    pub url_file: Option<String>,

    /// 配置文件路径，默认为平台推荐路径
    #[arg(short = 'c', long, default_value_t = default_config_path(), help = "配置文件路径，默认为平台推荐路径。")]
    pub config: String,

    /// 编辑配置文件（-e 或 --edit）
    #[arg(short = 'e', long = "edit", help = "用系统默认编辑器打开配置文件并退出。")]
    pub edit_config: bool,

    /// 指定下载目录
    #[arg(long, short = 'd', help = "下载根目录，覆盖配置文件中的设置。")]
    pub download_dir: Option<String>,

    /// 媒体并发数
    #[arg(long, short = 'j', help = "同时进行的媒体下载数，覆盖配置文件中的设置。")]
    pub jobs: Option<usize>,

    /// 画质
    #[arg(long, short = 'q', help = "媒体画质，例如 720p、1080p。")]
    pub quality: Option<String>,

    /// 封装格式
    #[arg(long, help = "媒体封装格式，例如 mp4、webm、mp3。")]
    pub format: Option<String>,

    /// 日志文件
    #[arg(long, help = "把日志写入文件（按大小轮转），默认输出到标准错误。")]
    pub log_file: Option<String>,

    /// 结束后输出 JSON
    #[arg(long, help = "结束时以 JSON 输出所有任务的最终状态。")]
    pub json: bool,
}

impl Args {
    /// 加载配置文件并合并命令行参数
    pub fn load_config(&self) -> Result<Config, DownloadError> {
        let mut config = Config::load(&self.config)?;
        config.merge_from_args(self);
        config.validate()?;
        Ok(config)
    }

    /// 汇总命令行和链接文件中的下载请求，链接格式不对时直接报错
    pub fn get_requests(&self) -> Result<Vec<SubmitTask>, DownloadError> {
        let mut requests: Vec<SubmitTask> = self.urls.iter().map(SubmitTask::media).collect();
        requests.extend(self.file_urls.iter().map(SubmitTask::file));

        if let Some(file_path) = &self.url_file {
            let content = fs::read_to_string(file_path)?;
            // 按行读取，忽略空行和注释
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                match line.strip_prefix("file:") {
                    Some(url) => requests.push(SubmitTask::file(url.trim())),
                    None => requests.push(SubmitTask::media(line)),
                }
            }
        }

        for request in &requests {
            validator::parse_url(&request.url)?;
        }
        if requests.is_empty() {
            return Err(DownloadError::InvalidUrl(
                "未提供任何链接。请通过命令行参数或文件提供至少一个链接。".to_string(),
            ));
        }

        Ok(requests)
    }
}
