//! Logging seam used by the statement compiler and the migrator.

/// Sink for the ORM's log lines.
///
/// Every executed statement is reported through [`debug`](LoggerAdapter::debug)
/// as `SQL: <sql> [<ms>ms]`.
pub trait LoggerAdapter: Send + Sync {
    fn debug(&self, message: &str);
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Forwards to the `log` facade under the `cheetah_orm` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAdapter;

impl LoggerAdapter for LogAdapter {
    fn debug(&self, message: &str) {
        log::debug!(target: "cheetah_orm", "{message}");
    }

    fn info(&self, message: &str) {
        log::info!(target: "cheetah_orm", "{message}");
    }

    fn warn(&self, message: &str) {
        log::warn!(target: "cheetah_orm", "{message}");
    }

    fn error(&self, message: &str) {
        log::error!(target: "cheetah_orm", "{message}");
    }
}

/// Collects messages in memory. Handy for asserting on log output in tests.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    lines: std::sync::Mutex<Vec<(LogLevel, String)>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, level: LogLevel, message: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push((level, message.to_string()));
        }
    }

    /// Messages logged at `level`, oldest first.
    pub fn messages(&self, level: LogLevel) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| {
                lines
                    .iter()
                    .filter(|(l, _)| *l == level)
                    .map(|(_, m)| m.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl LoggerAdapter for MemoryLogger {
    fn debug(&self, message: &str) {
        self.push(LogLevel::Debug, message);
    }

    fn info(&self, message: &str) {
        self.push(LogLevel::Info, message);
    }

    fn warn(&self, message: &str) {
        self.push(LogLevel::Warn, message);
    }

    fn error(&self, message: &str) {
        self.push(LogLevel::Error, message);
    }
}
