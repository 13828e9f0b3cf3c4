//! 控制台日志
//!
//! `log` 门面的进程级实现：输出到 stderr，同时在环形缓冲中保留最近的行，
//! 需要时写成 `<app-root>/logs/log_<label>_<YYYYmmdd_HHMMSS>.txt`。

use std::backtrace::Backtrace;
use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{LevelFilter, Log, Metadata, Record};
use once_cell::sync::Lazy;

use crate::{MmdError, Result};

/// 环形缓冲保留的行数
pub const DEFAULT_CAPACITY: usize = 2000;

/// stderr + 环形缓冲
pub struct ConsoleLogger {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
    echo: bool,
}

impl ConsoleLogger {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
            capacity: capacity.max(1),
            echo: true,
        }
    }

    /// 不输出到 stderr，只进缓冲
    pub fn quiet(capacity: usize) -> Self {
        Self {
            echo: false,
            ..Self::new(capacity)
        }
    }

    fn push(&self, line: String) {
        let mut lines = match self.lines.lock() {
            Ok(l) => l,
            Err(poisoned) => poisoned.into_inner(),
        };
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// 缓冲中的行（旧的在前）
    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(l) => l.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    pub fn clear(&self) {
        match self.lines.lock() {
            Ok(mut l) => l.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    /// 把缓冲写入 `<app_root>/logs/`，返回文件路径
    pub fn save_snapshot(&self, app_root: &Path, label: &str) -> Result<PathBuf> {
        let dir = app_root.join("logs");
        std::fs::create_dir_all(&dir)?;
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("log_{}_{}.txt", sanitize_label(label), stamp));

        let mut file = std::fs::File::create(&path)?;
        for line in self.lines() {
            writeln!(file, "{}", line)?;
        }
        Ok(path)
    }
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "{} {:<5} [{}] {}",
            chrono::Local::now().format("%H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        );
        if self.echo {
            eprintln!("{}", line);
        }
        self.push(line);
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// 文件名中只保留字母数字、`-` 与 `_`
fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "snapshot".to_string()
    } else {
        cleaned
    }
}

static LOGGER: Lazy<ConsoleLogger> = Lazy::new(|| ConsoleLogger::new(DEFAULT_CAPACITY));

/// 安装进程级日志；重复调用只更新级别
pub fn init(level: LevelFilter) {
    if log::set_logger(&*LOGGER).is_err() {
        log::debug!("日志已初始化，更新级别为 {}", level);
    }
    log::set_max_level(level);
}

pub fn logger() -> &'static ConsoleLogger {
    &LOGGER
}

/// 保存进程级日志的快照
pub fn save_snapshot(app_root: &Path, label: &str) -> Result<PathBuf> {
    let path = LOGGER.save_snapshot(app_root, label)?;
    log::info!("日志快照: {}", path.display());
    Ok(path)
}

/// 解析 `--log-level`
pub fn parse_level(value: &str) -> Result<LevelFilter> {
    value
        .parse::<LevelFilter>()
        .map_err(|_| MmdError::Validate(format!("未知的日志级别: {}", value)))
}

/// panic 时记录当前帧与调用栈
pub fn install_panic_hook<F>(current_frame: F)
where
    F: Fn() -> f32 + Send + Sync + 'static,
{
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        log::error!("panic @ 帧 {}: {}", current_frame(), info);
        log::error!("{}", Backtrace::force_capture());
        previous(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    fn record(logger: &ConsoleLogger, level: Level, msg: &str) {
        logger.log(
            &Record::builder()
                .level(level)
                .target("test")
                .args(format_args!("{}", msg))
                .build(),
        );
    }

    #[test]
    fn ring_buffer_keeps_latest_lines() {
        log::set_max_level(LevelFilter::Trace);
        let logger = ConsoleLogger::quiet(3);
        for i in 0..5 {
            record(&logger, Level::Info, &format!("line {}", i));
        }
        let lines = logger.lines();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("line 2"));
        assert!(lines[2].ends_with("line 4"));
    }

    #[test]
    fn snapshot_is_written_under_logs() {
        log::set_max_level(LevelFilter::Trace);
        let logger = ConsoleLogger::quiet(10);
        record(&logger, Level::Warn, "physics step failed");
        let dir = tempfile::tempdir().unwrap();

        let path = logger.save_snapshot(dir.path(), "crash/1").unwrap();
        assert_eq!(path.parent().unwrap(), dir.path().join("logs"));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("log_crash_1_"));
        assert!(name.ends_with(".txt"));
        // log_ + label + _ + YYYYmmdd_HHMMSS + .txt
        assert_eq!(name.len(), "log_crash_1_".len() + 15 + 4);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("physics step failed"));
    }

    #[test]
    fn level_parsing() {
        assert_eq!(parse_level("debug").unwrap(), LevelFilter::Debug);
        assert_eq!(parse_level("TRACE").unwrap(), LevelFilter::Trace);
        assert!(parse_level("loud").is_err());
    }
}
