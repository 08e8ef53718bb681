use std::{collections::BTreeMap, path::PathBuf};

use serde::{Deserialize, Serialize};

use super::LoggingError;

/// Формат вывода событий.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    #[default]
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            other => Err(LoggingError::InvalidConfig(format!(
                "unknown log format '{other}'"
            ))),
        }
    }
}

/// Период ротации файла логов.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    #[default]
    Daily,
    Hourly,
    Never,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    /// `None` — общий формат.
    pub format: Option<LogFormat>,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_line_numbers: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: None,
            with_ansi: true,
            with_target: true,
            with_thread_ids: false,
            with_line_numbers: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FileConfig {
    pub enabled: bool,
    pub filename: String,
    pub rotation: Rotation,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            filename: "fabric.log".to_string(),
            rotation: Rotation::Daily,
        }
    }
}

/// Настройки логирования узла.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Уровень по умолчанию (`trace`..`error`).
    pub level: String,
    pub format: LogFormat,
    pub log_dir: PathBuf,
    /// Переопределения уровня для модулей: `fabric::transport = "debug"`.
    pub modules: BTreeMap<String, String>,
    pub console: ConsoleConfig,
    pub file: FileConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            log_dir: PathBuf::from("logs"),
            modules: BTreeMap::new(),
            console: ConsoleConfig::default(),
            file: FileConfig::default(),
        }
    }
}

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl LoggingConfig {
    /// Директива `EnvFilter` из уровня и переопределений модулей.
    pub fn build_filter_directive(&self) -> String {
        std::iter::once(self.level.clone())
            .chain(self.modules.iter().map(|(m, l)| format!("{m}={l}")))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn console_format(&self) -> LogFormat {
        self.console.format.unwrap_or(self.format)
    }

    /// Переопределения из `FABRIC_LOG_*`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("FABRIC_LOG_LEVEL") {
            self.level = level;
        }
        if let Some(format) = std::env::var("FABRIC_LOG_FORMAT")
            .ok()
            .and_then(|f| f.parse().ok())
        {
            self.format = format;
        }
        if let Ok(dir) = std::env::var("FABRIC_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }
        if let Ok(flag) = std::env::var("FABRIC_LOG_FILE") {
            self.file.enabled = matches!(flag.as_str(), "1" | "true" | "yes");
        }
    }

    pub fn validate(&self) -> Result<(), LoggingError> {
        if !LEVELS.contains(&self.level.to_ascii_lowercase().as_str()) {
            return Err(LoggingError::InvalidConfig(format!(
                "unknown log level '{}'",
                self.level
            )));
        }
        if self.file.enabled && self.file.filename.trim().is_empty() {
            return Err(LoggingError::InvalidConfig(
                "file logging enabled without a file name".to_string(),
            ));
        }
        Ok(())
    }

    pub fn ensure_log_dir(&self) -> Result<(), LoggingError> {
        if self.file.enabled {
            std::fs::create_dir_all(&self.log_dir)?;
        }
        Ok(())
    }
}
