use actix::prelude::*;
use chrono::Local; // 用于获取本地时间
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

/// 日志消息
pub struct LogMsg {
    pub level: Level,
    pub target: String,
    pub message: String,
}
impl Message for LogMsg {
    type Result = ();
}

/// 刷新缓冲区，退出前调用
pub struct FlushLog;
impl Message for FlushLog {
    type Result = ();
}

/// 日志Actor，写文件并按大小轮转到 `<文件>.backup`
pub struct LoggerActor {
    writer: BufWriter<File>,
    file_path: String,
    max_size: u64, // 最大文件大小 (bytes)
    current_size: u64,
}

impl LoggerActor {
    pub fn new(file_path: &str, max_size: u64) -> Result<Self, std::io::Error> {
        // 确保日志目录存在
        if let Some(parent) = Path::new(file_path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(file_path)?;
        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            writer: BufWriter::new(file),
            file_path: file_path.to_string(),
            max_size,
            current_size,
        })
    }

    /// 检查并执行日志轮转
    fn check_rotation(&mut self) -> Result<(), std::io::Error> {
        if self.current_size <= self.max_size {
            return Ok(());
        }
        self.writer.flush()?;

        let backup_path = format!("{}.backup", self.file_path);
        if Path::new(&backup_path).exists() {
            std::fs::remove_file(&backup_path)?;
        }
        std::fs::rename(&self.file_path, &backup_path)?;

        let file = OpenOptions::new().create(true).append(true).open(&self.file_path)?;
        self.writer = BufWriter::new(file);
        self.current_size = 0;
        Ok(())
    }

    fn write_log(&mut self, msg: &LogMsg) -> Result<(), std::io::Error> {
        let log_entry = format!(
            "{} [{}] {} - {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            msg.level,
            msg.target,
            msg.message
        );

        self.check_rotation()?;
        self.writer.write_all(log_entry.as_bytes())?;
        self.current_size += log_entry.len() as u64;

        // 警告以上立即落盘
        if msg.level <= Level::Warn {
            self.writer.flush()?;
        }
        Ok(())
    }
}

impl Actor for LoggerActor {
    type Context = Context<Self>;

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        let _ = self.writer.flush();
    }
}

impl Handler<LogMsg> for LoggerActor {
    type Result = ();
    fn handle(&mut self, msg: LogMsg, _ctx: &mut Self::Context) {
        if let Err(e) = self.write_log(&msg) {
            eprintln!("日志写入失败: {}", e);
        }
    }
}

impl Handler<FlushLog> for LoggerActor {
    type Result = ();
    fn handle(&mut self, _msg: FlushLog, _ctx: &mut Self::Context) {
        if let Err(e) = self.writer.flush() {
            eprintln!("日志刷新失败: {}", e);
        }
    }
}

/// 把 `log` 门面的记录转发给 `LoggerActor`
pub struct ActorLogger {
    addr: Addr<LoggerActor>,
    level: LevelFilter,
}

impl Log for ActorLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        self.addr.do_send(LogMsg {
            level: record.level(),
            target: record.target().to_string(),
            message: record.args().to_string(),
        });
    }

    fn flush(&self) {
        self.addr.do_send(FlushLog);
    }
}

/// 启动日志Actor并安装为全局 logger，需要在 actix System 内调用
pub fn init_file_logger(
    file_path: &str,
    level: LevelFilter,
    max_size: u64,
) -> Result<Addr<LoggerActor>, std::io::Error> {
    let addr = LoggerActor::new(file_path, max_size)?.start();
    let logger = ActorLogger {
        addr: addr.clone(),
        level,
    };
    log::set_logger(Box::leak(Box::new(logger)))
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::AlreadyExists, e.to_string()))?;
    log::set_max_level(level);
    Ok(addr)
}
