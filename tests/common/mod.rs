//! 集成测试共用的本地 HTTP 服务、配置和解析器替身

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Path as UrlPath;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

use socdl::core::resolver::{
    MediaRequest, ResolveError, ResolvedMedia, Resolver, ResolverProgress, StreamDescriptor,
};
use socdl::utils::naming;
use socdl::{Config, QueueManager, TaskId, TaskSnapshot, TaskStatus};

pub const PIECE: usize = 64 * 1024;
/// 慢速接口每发送一个分块停顿的时间
pub const SLOW_DELAY: Duration = Duration::from_millis(20);
pub const WAIT_LIMIT: Duration = Duration::from_secs(15);

/// 固定的字节序列，方便校验落盘内容
pub fn payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

async fn fast(UrlPath((size, _name)): UrlPath<(usize, String)>) -> impl IntoResponse {
    payload(size)
}

async fn slow(UrlPath((size, _name)): UrlPath<(usize, String)>) -> impl IntoResponse {
    let data = Bytes::from(payload(size));
    let stream = futures::stream::unfold(0usize, move |offset| {
        let data = data.clone();
        async move {
            if offset >= data.len() {
                return None;
            }
            tokio::time::sleep(SLOW_DELAY).await;
            let end = (offset + PIECE).min(data.len());
            Some((Ok::<_, std::io::Error>(data.slice(offset..end)), end))
        }
    });
    ([(header::CONTENT_LENGTH, size.to_string())], Body::from_stream(stream))
}

pub struct TestServer {
    pub addr: SocketAddr,
}

impl TestServer {
    pub async fn start() -> Self {
        let app = Router::new()
            .route("/fast/{size}/{name}", get(fast))
            .route("/slow/{size}/{name}", get(slow));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        actix::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.download_dir = dir.display().to_string();
    config.timeout = 5;
    config.admission_backoff_ms = 50;
    config
}

/// 轮询快照直到满足条件
pub async fn wait_for<F>(manager: &QueueManager, id: TaskId, mut check: F) -> TaskSnapshot
where
    F: FnMut(&TaskSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    loop {
        let snapshot = manager.snapshot(id).await.unwrap();
        if check(&snapshot) {
            return snapshot;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("等待超时，最后状态: {:?}", snapshot);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_status(manager: &QueueManager, id: TaskId, status: TaskStatus) -> TaskSnapshot {
    wait_for(manager, id, |s| s.status == status).await
}

pub fn part_of(path: &Path, id: TaskId) -> PathBuf {
    naming::part_path(path, &id)
}

/// 把媒体链接解析成测试服务上的直链，标题取链接最后一段
///
/// 链接中带 `fail` 的前 `failures` 次解析会失败。
pub struct ScriptedResolver {
    pub stream_url: String,
    pub failures: usize,
    pub calls: AtomicUsize,
}

impl ScriptedResolver {
    pub fn new(stream_url: String) -> Self {
        Self {
            stream_url,
            failures: 0,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(stream_url: String, failures: usize) -> Self {
        Self {
            failures,
            ..Self::new(stream_url)
        }
    }
}

#[async_trait]
impl Resolver for ScriptedResolver {
    async fn resolve(&self, url: &str, request: &MediaRequest) -> Result<ResolvedMedia, ResolveError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if url.contains("fail") && call < self.failures {
            return Err(ResolveError::Failed("视频不可用".to_string()));
        }
        let title = url.rsplit('/').next().unwrap_or("clip").to_string();
        Ok(ResolvedMedia {
            title,
            platform: "TestTube".to_string(),
            stream: StreamDescriptor::Direct {
                url: self.stream_url.clone(),
                extension: request.format.clone(),
                total_bytes: None,
            },
        })
    }
}

/// 解析永远不返回，只能被取消打断
pub struct HangingResolver;

#[async_trait]
impl Resolver for HangingResolver {
    async fn resolve(&self, _url: &str, _request: &MediaRequest) -> Result<ResolvedMedia, ResolveError> {
        std::future::pending().await
    }
}

/// 自己完成下载的解析器，每写一段上报一次进度
pub struct DelegatingResolver {
    pub steps: usize,
    pub step_size: usize,
}

#[async_trait]
impl Resolver for DelegatingResolver {
    async fn resolve(&self, _url: &str, _request: &MediaRequest) -> Result<ResolvedMedia, ResolveError> {
        Ok(ResolvedMedia {
            title: "分段: 视频".to_string(),
            platform: "Segmented".to_string(),
            stream: StreamDescriptor::Delegated {
                token: "playlist-1".to_string(),
                extension: "mkv".to_string(),
            },
        })
    }

    async fn download(
        &self,
        _stream: &StreamDescriptor,
        output: &Path,
        progress: mpsc::Sender<ResolverProgress>,
    ) -> Result<PathBuf, ResolveError> {
        let final_path = output.with_extension("mkv");
        let total = (self.steps * self.step_size) as u64;
        let mut written = Vec::new();
        for step in 1..=self.steps {
            tokio::time::sleep(Duration::from_millis(10)).await;
            written.extend(std::iter::repeat(step as u8).take(self.step_size));
            let _ = progress
                .send(ResolverProgress {
                    bytes_done: (step * self.step_size) as u64,
                    bytes_total: total,
                    rate_bps: 1024.0,
                })
                .await;
        }
        tokio::fs::write(&final_path, &written)
            .await
            .map_err(|e| ResolveError::Transfer(e.to_string()))?;
        Ok(final_path)
    }
}
