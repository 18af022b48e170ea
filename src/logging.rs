use std::sync::OnceLock;

use chrono::Local;
use log::{LevelFilter, Metadata, Record, SetLoggerError};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

static LOGGER: OnceLock<SessionLogger> = OnceLock::new();

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub level: String,
    pub message: String,
    pub timestamp: String,
}

impl LogMessage {
    fn from_record(record: &Record) -> Self {
        Self {
            level: record.level().to_string(),
            message: record.args().to_string(),
            timestamp: Local::now().to_rfc3339(),
        }
    }

    /// Line written to stderr
    pub fn format_line(&self) -> String {
        format!("[{}] {} {}", self.level, self.timestamp, self.message)
    }
}

/// Logger that writes to stderr and optionally forwards every record to a
/// presentation layer.
pub struct SessionLogger {
    level: LevelFilter,
    sink: Option<UnboundedSender<LogMessage>>,
}

impl SessionLogger {
    pub fn new(level: LevelFilter, sink: Option<UnboundedSender<LogMessage>>) -> Self {
        Self { level, sink }
    }

    /// Installs the logger. Fails if any logger is already installed.
    pub fn init(
        level: LevelFilter,
        sink: Option<UnboundedSender<LogMessage>>,
    ) -> Result<(), SetLoggerError> {
        let logger = LOGGER.get_or_init(|| SessionLogger::new(level, sink));
        log::set_logger(logger).map(|()| log::set_max_level(logger.level))
    }

    fn emit_log(&self, message: LogMessage) {
        if let Some(sink) = &self.sink {
            // Receiver gone means nobody is displaying logs anymore.
            let _ = sink.send(message);
        }
    }
}

impl log::Log for SessionLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let message = LogMessage::from_record(record);
            eprintln!("{}", message.format_line());
            self.emit_log(message);
        }
    }

    fn flush(&self) {}
}

/// Installs `SessionLogger`, falling back to `env_logger` if that fails.
pub fn init(level: LevelFilter, sink: Option<UnboundedSender<LogMessage>>) {
    if SessionLogger::init(level, sink).is_err() {
        let _ = env_logger::builder().filter_level(level).try_init();
    }
}
