use std::{
    collections::VecDeque,
    fmt,
    fs::{self, OpenOptions},
    path::Path,
};

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::error::{Error, Result};

/// Routes the `log` facade into an append-only file; the terminal belongs to the UI.
pub fn init(log_file: &Path) -> Result<()> {
    if let Some(parent) = log_file.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(log_file)?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .target(env_logger::Target::Pipe(Box::new(file)))
        .try_init()
        .map_err(|err| Error::Config(format!("logger already initialised: {err}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_log_level(&self) -> log::Level {
        match self {
            Self::Info | Self::Success => log::Level::Info,
            Self::Warning => log::Level::Warn,
            Self::Error => log::Level::Error,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Info => "INFO",
            Self::Success => "SUCCESS",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub text: String,
}

impl LogEntry {
    pub fn line(&self) -> String {
        format!(
            "[{}] [{}] {}",
            self.timestamp.format("%H:%M:%S"),
            self.level,
            self.text
        )
    }
}

/// Bounded list of recent messages, newest first.
pub struct LogPanel {
    capacity: usize,
    entries: VecDeque<LogEntry>,
}

impl LogPanel {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    pub fn push(&mut self, level: LogLevel, text: impl Into<String>) {
        self.entries.push_front(LogEntry {
            timestamp: Local::now(),
            level,
            text: text.into(),
        });
        self.entries.truncate(self.capacity);
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panel_keeps_newest_entries_first() {
        let mut panel = LogPanel::new(2);
        panel.push(LogLevel::Info, "one");
        panel.push(LogLevel::Warning, "two");
        panel.push(LogLevel::Error, "three");

        let texts: Vec<&str> = panel.entries().map(|entry| entry.text.as_str()).collect();
        assert_eq!(texts, vec!["three", "two"]);
        assert!(panel.entries().next().unwrap().line().contains("[ERROR] three"));
    }

    #[test]
    fn success_maps_to_info() {
        assert_eq!(LogLevel::Success.as_log_level(), log::Level::Info);
        assert_eq!(LogLevel::Warning.as_log_level(), log::Level::Warn);
    }
}
