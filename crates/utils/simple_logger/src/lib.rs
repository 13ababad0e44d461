//! 一个简单的 logger，输出到终端（带颜色）以及可选的日志文件
//!
//! 日志等级由环境变量决定：
//! - `VMSIM_CLOG`：终端日志等级
//! - `VMSIM_FLOG`：文件日志等级，文件路径由 `VMSIM_FLOG_PATH` 指定，默认 `vmsim.log`
//!
//! 取值为 `error`/`warn`/`info`/`debug`/`trace`/`off`，大小写不敏感，缺省为 `off`

use std::{
    env,
    fs::{File, OpenOptions},
    io::Write,
};

use anstyle::{AnsiColor, Color, Style};
use klocks::{Lazy, SpinMutex};
use log::{Level, LevelFilter, Log, Metadata, Record};

const DEFAULT_LOG_PATH: &str = "vmsim.log";

struct SimpleLogger {
    clog: LevelFilter,
    flog: LevelFilter,
    file: Option<SpinMutex<File>>,
}

impl SimpleLogger {
    fn from_env() -> Self {
        let clog = level_from_env("VMSIM_CLOG");
        let mut flog = level_from_env("VMSIM_FLOG");
        let file = if flog == LevelFilter::Off {
            None
        } else {
            let path = env::var("VMSIM_FLOG_PATH").unwrap_or_else(|_| DEFAULT_LOG_PATH.into());
            match OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => Some(SpinMutex::new(file)),
                Err(err) => {
                    eprintln!("cannot open log file {path}: {err}");
                    flog = LevelFilter::Off;
                    None
                }
            }
        };
        Self { clog, flog, file }
    }

    fn max_level(&self) -> LevelFilter {
        self.clog.max(self.flog)
    }
}

impl Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if self.clog >= record.level() {
            let style = level_style(record.level());
            eprintln!(
                "{style}[{:>5}] {}{style:#}",
                record.level(),
                record.args()
            );
        }
        if self.flog >= record.level() {
            if let Some(file) = &self.file {
                // 写日志失败时没有更好的报告途径，只能忽略
                let _ = writeln!(file.lock(), "[{:>5}] {}", record.level(), record.args());
            }
        }
    }

    fn flush(&self) {
        if let Some(file) = &self.file {
            let _ = file.lock().flush();
        }
    }
}

fn level_from_env(key: &str) -> LevelFilter {
    env::var(key)
        .ok()
        .and_then(|level| level.parse().ok())
        .unwrap_or(LevelFilter::Off)
}

fn level_style(level: Level) -> Style {
    let color = match level {
        Level::Error => AnsiColor::Red,
        Level::Warn => AnsiColor::BrightYellow,
        Level::Info => AnsiColor::Blue,
        Level::Debug => AnsiColor::Green,
        Level::Trace => AnsiColor::BrightBlack,
    };
    Style::new().fg_color(Some(Color::Ansi(color)))
}

/// 初始化 logger。可以多次调用，只有第一次生效
pub fn init() {
    static LOGGER: Lazy<SimpleLogger> = Lazy::new(SimpleLogger::from_env);

    if log::set_logger(&*LOGGER).is_ok() {
        log::set_max_level(LOGGER.max_level());
    }
}

#[cfg(test)]
mod tests {
    use log::{Level, LevelFilter};

    use super::{level_style, SimpleLogger};

    #[test]
    fn enabled_follows_the_louder_sink() {
        let logger = SimpleLogger {
            clog: LevelFilter::Warn,
            flog: LevelFilter::Debug,
            file: None,
        };
        assert_eq!(logger.max_level(), LevelFilter::Debug);
        let metadata = |level| log::Metadata::builder().level(level).build();
        assert!(log::Log::enabled(&logger, &metadata(Level::Debug)));
        assert!(!log::Log::enabled(&logger, &metadata(Level::Trace)));
    }

    #[test]
    fn levels_have_distinct_colors() {
        let styles = [
            Level::Error,
            Level::Warn,
            Level::Info,
            Level::Debug,
            Level::Trace,
        ]
        .map(level_style);
        for (i, a) in styles.iter().enumerate() {
            for b in &styles[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn init_is_idempotent() {
        super::init();
        super::init();
    }
}
