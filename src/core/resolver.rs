//! 解析器：把社交媒体链接转换成可以拉取的媒体流
//!
//! 真正的站点解析引擎不在本 crate 内，这里只定义接口并提供一个按直链处理的 `GenericResolver`。

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::utils::naming;
use crate::utils::validator;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    #[error("{0}")]
    Failed(String),

    #[error("平台已被禁用: {0}")]
    PlatformDisabled(String),

    #[error("解析器不支持该操作: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Transfer(String),
}

/// 提交时确定的格式偏好
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRequest {
    pub quality: String,
    pub format: String,
}

/// 解析得到的媒体流
#[derive(Debug, Clone, PartialEq)]
pub enum StreamDescriptor {
    /// 可以直接 GET 的地址，由下载器自己分块拉取
    Direct {
        url: String,
        extension: String,
        total_bytes: Option<u64>,
    },
    /// 只能交给解析器自己下载的流（分片、需要合并等）
    Delegated { token: String, extension: String },
}

impl StreamDescriptor {
    pub fn extension(&self) -> &str {
        match self {
            StreamDescriptor::Direct { extension, .. } => extension,
            StreamDescriptor::Delegated { extension, .. } => extension,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMedia {
    pub title: String,
    pub platform: String,
    pub stream: StreamDescriptor,
}

/// 解析器代为下载时上报的进度
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolverProgress {
    pub bytes_done: u64,
    /// 0 表示未知
    pub bytes_total: u64,
    pub rate_bps: f64,
}

#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, url: &str, request: &MediaRequest) -> Result<ResolvedMedia, ResolveError>;

    /// 下载 `Delegated` 流到 `output`（不含扩展名的模板路径），返回最终文件路径。
    ///
    /// `progress` 是有界通道，下载器暂停时发送会阻塞，暂停只在上报边界生效。
    async fn download(
        &self,
        stream: &StreamDescriptor,
        output: &Path,
        progress: mpsc::Sender<ResolverProgress>,
    ) -> Result<PathBuf, ResolveError> {
        let _ = (output, progress);
        Err(ResolveError::Unsupported(format!("无法下载流: {:?}", stream)))
    }
}

const KNOWN_PLATFORMS: &[(&str, &str)] = &[
    ("youtube.com", "Youtube"),
    ("youtu.be", "Youtube"),
    ("instagram.com", "Instagram"),
    ("tiktok.com", "TikTok"),
    ("twitter.com", "Twitter"),
    ("x.com", "Twitter"),
    ("facebook.com", "Facebook"),
    ("fb.watch", "Facebook"),
];

/// 根据域名识别平台，未知站点返回 "Generic"
pub fn detect_platform(host: &str) -> &'static str {
    let host = host.to_lowercase();
    KNOWN_PLATFORMS
        .iter()
        .find(|(domain, _)| host == *domain || host.ends_with(&format!(".{}", domain)))
        .map(|(_, name)| *name)
        .unwrap_or("Generic")
}

/// 不做站点解析，把链接本身当作媒体流
#[derive(Debug, Clone, Default)]
pub struct GenericResolver {
    /// 平台开关，未列出的平台视为启用
    platforms: BTreeMap<String, bool>,
}

impl GenericResolver {
    pub fn new(platforms: BTreeMap<String, bool>) -> Self {
        Self { platforms }
    }

    fn is_enabled(&self, platform: &str) -> bool {
        self.platforms
            .get(&platform.to_lowercase())
            .copied()
            .unwrap_or(true)
    }
}

#[async_trait]
impl Resolver for GenericResolver {
    async fn resolve(&self, url: &str, request: &MediaRequest) -> Result<ResolvedMedia, ResolveError> {
        let parsed = validator::parse_url(url).map_err(|e| ResolveError::Failed(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ResolveError::Failed(format!("不支持的协议: {}", parsed.scheme())));
        }
        let platform = detect_platform(parsed.host_str().unwrap_or_default());
        if !self.is_enabled(platform) {
            return Err(ResolveError::PlatformDisabled(platform.to_string()));
        }

        let file_name = naming::filename_from_url(url);
        let (title, extension) = match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => (stem.to_string(), ext.to_string()),
            _ => (file_name.clone(), request.format.clone()),
        };

        Ok(ResolvedMedia {
            title,
            platform: platform.to_string(),
            stream: StreamDescriptor::Direct {
                url: parsed.to_string(),
                extension,
                total_bytes: None,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> MediaRequest {
        MediaRequest {
            quality: "720p".to_string(),
            format: "mp4".to_string(),
        }
    }

    #[test]
    fn test_detect_platform() {
        assert_eq!(detect_platform("www.youtube.com"), "Youtube");
        assert_eq!(detect_platform("youtu.be"), "Youtube");
        assert_eq!(detect_platform("m.facebook.com"), "Facebook");
        assert_eq!(detect_platform("x.com"), "Twitter");
        assert_eq!(detect_platform("box.com"), "Generic");
        assert_eq!(detect_platform("example.org"), "Generic");
    }

    #[test]
    fn test_generic_resolve_uses_path_extension() {
        let resolver = GenericResolver::default();
        let media = tokio_test::block_on(resolver.resolve("https://cdn.example.com/v/clip.webm", &request())).unwrap();
        assert_eq!(media.title, "clip");
        assert_eq!(media.platform, "Generic");
        assert_eq!(media.stream.extension(), "webm");
    }

    #[test]
    fn test_generic_resolve_falls_back_to_requested_format() {
        let resolver = GenericResolver::default();
        let media = tokio_test::block_on(resolver.resolve("https://www.youtube.com/watch?v=abc", &request())).unwrap();
        assert_eq!(media.title, "watch");
        assert_eq!(media.platform, "Youtube");
        assert_eq!(media.stream.extension(), "mp4");
    }

    #[test]
    fn test_disabled_platform_fails() {
        let mut platforms = BTreeMap::new();
        platforms.insert("tiktok".to_string(), false);
        let resolver = GenericResolver::new(platforms);
        let err = tokio_test::block_on(resolver.resolve("https://www.tiktok.com/@a/video/1", &request())).unwrap_err();
        assert_eq!(err, ResolveError::PlatformDisabled("TikTok".to_string()));
    }

    #[test]
    fn test_default_download_is_unsupported() {
        let resolver = GenericResolver::default();
        let (tx, _rx) = mpsc::channel(1);
        let stream = StreamDescriptor::Delegated {
            token: "t".to_string(),
            extension: "mp4".to_string(),
        };
        let err = tokio_test::block_on(resolver.download(&stream, Path::new("/tmp/x"), tx)).unwrap_err();
        assert!(matches!(err, ResolveError::Unsupported(_)));
    }
}
