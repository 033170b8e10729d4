//! 单个任务的字节传输
//!
//! 直链按固定大小分块写入 `<目标>.<任务 id>.part`，每个分块之后依次检查取消和暂停，完成后改名为目标文件。
//! 解析器代为下载的流只在进度上报边界检查暂停和取消。

use bytes::BytesMut;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::core::error::{DownloadError, DownloadResult};
use crate::core::resolver::{Resolver, StreamDescriptor};
use crate::core::task::{DownloadTask, TaskKind};
use crate::utils::{naming, validator};

/// 进行中任务占用的目标路径，两个任务不会写到同一个文件
#[derive(Default)]
struct TargetRegistry {
    taken: Mutex<HashSet<PathBuf>>,
}

impl TargetRegistry {
    /// 选一个磁盘上不存在、也没有被其他任务占用的路径，重名时追加 ` (n)`
    fn reserve(&self, desired: PathBuf) -> TargetLease<'_> {
        let mut taken = self.taken.lock();
        let mut candidate = desired.clone();
        let mut n = 1;
        while taken.contains(&candidate) || candidate.exists() {
            candidate = naming::numbered(&desired, n);
            n += 1;
        }
        if candidate != desired {
            debug!("目标 {} 已被占用，改用 {}", desired.display(), candidate.display());
        }
        taken.insert(candidate.clone());
        TargetLease {
            registry: self,
            path: candidate,
        }
    }
}

/// 离开作用域时释放占用的路径
struct TargetLease<'a> {
    registry: &'a TargetRegistry,
    path: PathBuf,
}

impl Drop for TargetLease<'_> {
    fn drop(&mut self) {
        self.registry.taken.lock().remove(&self.path);
    }
}

pub struct Fetcher {
    client: reqwest::Client,
    read_timeout: Duration,
    chunk_size: usize,
    resolver: Arc<dyn Resolver>,
    targets: TargetRegistry,
}

impl Fetcher {
    pub fn new(config: &Config, resolver: Arc<dyn Resolver>) -> DownloadResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.timeout_duration())
            .build()?;
        Ok(Self {
            client,
            read_timeout: config.timeout_duration(),
            chunk_size: config.chunk_size,
            resolver,
            targets: TargetRegistry::default(),
        })
    }

    /// 执行一次下载尝试，结束时任务一定处于 Completed、Error 或 Cancelled
    pub async fn run(&self, task: Arc<DownloadTask>) {
        info!("开始下载任务 {} ({})", task.id, task.source_url);
        let outcome = match task.kind {
            TaskKind::File => self.fetch_file(&task).await,
            TaskKind::Media => self.fetch_media(&task).await,
        };

        match outcome {
            Ok(path) => info!(
                "任务 {} 下载完成: {} ({:.2} MB/s)",
                task.id,
                path.display(),
                task.snapshot().speed_mbps()
            ),
            Err(e) => {
                // 先删临时文件，再让其他调用方看到终态
                if let Some(target) = task.target_path() {
                    remove_if_exists(&naming::part_path(&target, &task.id)).await;
                }
                if task.control().is_cancelled() || matches!(e, DownloadError::Cancelled) {
                    info!("任务 {} 已取消", task.id);
                    task.finish_cancelled();
                } else {
                    error!("任务 {} 下载失败: {}", task.id, e);
                    task.finish_failed(e.to_string());
                }
            }
        }
    }

    async fn fetch_file(&self, task: &DownloadTask) -> DownloadResult<PathBuf> {
        let name = task
            .file_name
            .clone()
            .unwrap_or_else(|| naming::filename_from_url(&task.source_url));
        let lease = self.targets.reserve(naming::file_target(&task.settings, &name));
        task.set_target(lease.path.clone());
        self.fetch_direct(task, &task.source_url, &lease.path, None).await
    }

    async fn fetch_media(&self, task: &DownloadTask) -> DownloadResult<PathBuf> {
        let request = task.media_request();
        let control = task.control();
        let media = tokio::select! {
            resolved = self.resolver.resolve(&task.source_url, &request) => resolved?,
            _ = control.cancelled() => return Err(DownloadError::Cancelled),
        };
        debug!("任务 {} 解析完成: {} [{}]", task.id, media.title, media.platform);

        let title = naming::media_title(&media.title);
        task.set_media_info(&title, &media.platform);
        let stem = naming::render_pattern(
            &task.settings.naming_pattern,
            &title,
            &media.platform,
            &request.quality,
            &request.format,
        );
        let desired = naming::media_target(&task.settings, &media.platform, &stem, media.stream.extension());
        let lease = self.targets.reserve(desired);
        let target = lease.path.clone();
        task.set_target(target.clone());

        match &media.stream {
            StreamDescriptor::Direct { url, total_bytes, .. } => {
                self.fetch_direct(task, url, &target, *total_bytes).await
            }
            StreamDescriptor::Delegated { .. } => {
                // 扩展名由解析器决定
                let template = match target.extension() {
                    Some(_) if !media.stream.extension().is_empty() => target.with_extension(""),
                    _ => target.clone(),
                };
                self.fetch_delegated(task, &media.stream, &template).await
            }
        }
    }

    async fn fetch_direct(
        &self,
        task: &DownloadTask,
        url: &str,
        target: &Path,
        expected_total: Option<u64>,
    ) -> DownloadResult<PathBuf> {
        if !validator::is_http_url(url) {
            return Err(DownloadError::Transfer(format!("不支持的协议: {}", url)));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        let control = task.control();

        let response = tokio::select! {
            response = self.client.get(url).send() => response?,
            _ = control.cancelled() => return Err(DownloadError::Cancelled),
        };
        let mut response = response.error_for_status()?;
        let total = response.content_length().or(expected_total).unwrap_or(0);

        let part = naming::part_path(target, &task.id);
        let mut file = fs::File::create(&part).await?;
        let mut buffer = BytesMut::with_capacity(self.chunk_size);
        let mut transferred = 0u64;
        let started = Instant::now();

        loop {
            let next = tokio::select! {
                next = tokio::time::timeout(self.read_timeout, response.chunk()) => next.map_err(|_| {
                    DownloadError::Transfer(format!("读取超时（{} 秒）", self.read_timeout.as_secs()))
                })??,
                _ = control.cancelled() => return Err(DownloadError::Cancelled),
            };
            let Some(bytes) = next else { break };
            buffer.extend_from_slice(&bytes);

            while buffer.len() >= self.chunk_size {
                let chunk = buffer.split_to(self.chunk_size);
                transferred = self
                    .write_chunk(task, &mut file, &chunk, transferred, total, started)
                    .await?;
            }
        }
        if !buffer.is_empty() {
            let chunk = buffer.split();
            transferred = self
                .write_chunk(task, &mut file, &chunk, transferred, total, started)
                .await?;
        }

        file.flush().await?;
        drop(file);

        if total > 0 && transferred < total {
            return Err(DownloadError::Transfer(format!(
                "连接提前关闭: 收到 {} / {} 字节",
                transferred, total
            )));
        }

        let committed = task.finish_completed(|| {
            std::fs::rename(&part, target)?;
            Ok(target.to_path_buf())
        })?;
        if !committed {
            return Err(DownloadError::Cancelled);
        }
        Ok(target.to_path_buf())
    }

    /// 写入一个分块后检查取消、等待暂停结束，然后更新进度
    async fn write_chunk(
        &self,
        task: &DownloadTask,
        file: &mut fs::File,
        chunk: &[u8],
        transferred: u64,
        total: u64,
        started: Instant,
    ) -> DownloadResult<u64> {
        file.write_all(chunk).await?;
        let transferred = transferred + chunk.len() as u64;

        let control = task.control();
        if control.is_cancelled() || !control.wait_while_paused().await {
            return Err(DownloadError::Cancelled);
        }

        // 平均速度 = 已传输字节 / 任务开始以来的时间
        let elapsed = started.elapsed().as_secs_f64().max(0.001);
        task.record_chunk(transferred, total, transferred as f64 / elapsed);
        Ok(transferred)
    }

    async fn fetch_delegated(
        &self,
        task: &DownloadTask,
        stream: &StreamDescriptor,
        template: &Path,
    ) -> DownloadResult<PathBuf> {
        if let Some(parent) = template.parent() {
            fs::create_dir_all(parent).await?;
        }
        let control = task.control();
        let (tx, mut rx) = mpsc::channel(1);
        let download = self.resolver.download(stream, template, tx);
        tokio::pin!(download);

        let result = loop {
            tokio::select! {
                result = &mut download => break result,
                Some(progress) = rx.recv() => {
                    // 等待期间不再轮询解析器，它的下载随之停住
                    if control.is_cancelled() || !control.wait_while_paused().await {
                        return Err(DownloadError::Cancelled);
                    }
                    task.record_chunk(progress.bytes_done, progress.bytes_total, progress.rate_bps);
                }
                _ = control.cancelled() => return Err(DownloadError::Cancelled),
            }
        };
        while let Ok(progress) = rx.try_recv() {
            task.record_chunk(progress.bytes_done, progress.bytes_total, progress.rate_bps);
        }

        let produced = result?;
        let committed = task.finish_completed(|| Ok(produced.clone()))?;
        if !committed {
            remove_if_exists(&produced).await;
            return Err(DownloadError::Cancelled);
        }
        Ok(produced)
    }
}

async fn remove_if_exists(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!("已删除临时文件 {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("删除文件 {} 失败: {}", path.display(), e),
    }
}
