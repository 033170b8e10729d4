use anyhow::Context;
use clap::Parser;
use crossterm::{
    cursor,
    event::{self, Event, KeyCode},
    execute, terminal,
};
use log::LevelFilter;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;

use socdl::cli::{self, Args};
use socdl::core::task::TaskEvent;
use socdl::ui::{self, DownloadSummary, ProgressManager};
use socdl::utils::logger::{init_file_logger, FlushLog};
use socdl::{Config, GenericResolver, QueueManager, TaskId};

const KEYBOARD_POLL_INTERVAL: Duration = Duration::from_millis(50);
const LOG_FILE_MAX_SIZE: u64 = 10 * 1024 * 1024;
/// 退出时等待下载器清理临时文件的最长时间
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// 离开作用域时恢复终端
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> std::io::Result<Self> {
        terminal::enable_raw_mode()?;
        execute!(std::io::stdout(), cursor::Hide)?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = execute!(std::io::stdout(), cursor::Show);
        let _ = terminal::disable_raw_mode();
    }
}

#[actix::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.edit_config {
        // 第一次编辑时先写出带说明的默认配置
        Config::load(&args.config).context("无法创建配置文件")?;
        cli::open_config_in_editor(&args.config);
        return Ok(());
    }

    let logger = match &args.log_file {
        Some(path) => Some(init_file_logger(path, LevelFilter::Info, LOG_FILE_MAX_SIZE).context("无法初始化日志文件")?),
        None => {
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
            None
        }
    };
    log::info!("程序启动");

    let result = run(&args).await;
    if let Some(logger) = &logger {
        let _ = logger.send(FlushLog).await;
    }
    result
}

async fn run(args: &Args) -> anyhow::Result<()> {
    let config = args.load_config().context("配置加载失败")?;
    let requests = args.get_requests().context("获取链接列表失败")?;
    log::info!("配置文件路径: {}", args.config);
    println!("{}", config.get_summary());

    let resolver = Arc::new(GenericResolver::new(config.platforms.clone()));
    let manager = QueueManager::start(config, resolver)?;
    let mut events = manager.subscribe();

    let mut submitted: Vec<TaskId> = Vec::new();
    for request in requests {
        let url = request.url.clone();
        match manager.submit_with(request).await {
            Ok(id) => {
                submitted.push(id);
                ui::print_success(&format!("已加入队列: {}", url));
            }
            Err(e) => {
                log::error!("提交任务失败: {} - {}", url, e);
                ui::print_error(&format!("提交任务失败: {} - {}", url, e));
            }
        }
    }
    if submitted.is_empty() {
        eprintln!("没有可下载的任务");
        return Ok(());
    }

    println!("\n开始下载... (按 'p' 暂停, 'r' 恢复, 'c' 取消, 'q' 退出)");
    let started = Instant::now();
    run_download_loop(&manager, &mut events).await?;

    let stats = manager.stats().await?;
    println!(
        "{}",
        DownloadSummary {
            stats: stats.clone(),
            elapsed_time: started.elapsed(),
        }
    );
    log::info!("下载结束 - 成功: {}, 失败: {}, 取消: {}", stats.completed, stats.failed, stats.cancelled);

    if args.json {
        let snapshots = manager.list().await?;
        println!("{}", serde_json::to_string_pretty(&snapshots)?);
    }

    Ok(())
}

/// 处理按键和进度刷新，直到所有任务进入终态或用户退出
async fn run_download_loop(
    manager: &QueueManager,
    events: &mut UnboundedReceiver<TaskEvent>,
) -> anyhow::Result<()> {
    let _raw_mode = RawModeGuard::enable()?;
    let mut progress = ProgressManager::new();
    for snapshot in manager.list().await? {
        progress.update(&snapshot);
    }

    loop {
        // 不阻塞：下载器和界面跑在同一个线程上
        while event::poll(Duration::ZERO)? {
            if let Event::Key(key_event) = event::read()? {
                match key_event.code {
                    KeyCode::Char('q') | KeyCode::Char('Q') => {
                        log::info!("用户主动退出");
                        if !manager.shutdown(SHUTDOWN_TIMEOUT).await? {
                            log::warn!("部分下载器没有在 {} 秒内退出", SHUTDOWN_TIMEOUT.as_secs());
                        }
                        drain_events(events, &mut progress);
                        progress.finish();
                        return Ok(());
                    }
                    KeyCode::Char('p') | KeyCode::Char('P') => {
                        let paused = manager.pause_all().await?;
                        log::info!("用户暂停了 {} 个任务", paused);
                    }
                    KeyCode::Char('r') | KeyCode::Char('R') => {
                        let resumed = manager.resume_all().await?;
                        log::info!("用户恢复了 {} 个任务", resumed);
                    }
                    KeyCode::Char('c') | KeyCode::Char('C') => {
                        let cancelled = manager.cancel_all().await?;
                        log::info!("用户取消了 {} 个下载任务", cancelled);
                    }
                    _ => {}
                }
            }
        }

        drain_events(events, &mut progress);

        let stats = manager.stats().await?;
        if stats.total > 0 && stats.pending + stats.downloading + stats.paused == 0 {
            break;
        }

        tokio::time::sleep(KEYBOARD_POLL_INTERVAL).await;
    }

    progress.finish();
    Ok(())
}

fn drain_events(events: &mut UnboundedReceiver<TaskEvent>, progress: &mut ProgressManager) {
    while let Ok(event) = events.try_recv() {
        match event {
            TaskEvent::Added(snapshot) | TaskEvent::Changed(snapshot) => progress.update(&snapshot),
            TaskEvent::Removed(id) => progress.remove(&id),
        }
    }
}
