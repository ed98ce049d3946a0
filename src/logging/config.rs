use std::{collections::BTreeMap, fs, io, path::PathBuf};

use serde::{Deserialize, Serialize};

/// Формат вывода событий.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_line_numbers: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct FileConfig {
    pub enabled: bool,
    /// Префикс имени файла; к нему добавляется дата ротации.
    pub filename: String,
    pub format: LogFormat,
}

/// Конфигурация логирования.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Базовый уровень для крейта (`trace`..`error`).
    pub level: String,
    /// Уровни для отдельных целей, например `reqwest = "warn"`.
    pub module_levels: BTreeMap<String, String>,
    pub log_dir: PathBuf,
    pub console: ConsoleConfig,
    pub file: FileConfig,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: LogFormat::Compact,
            with_ansi: true,
            with_target: true,
            with_thread_ids: false,
            with_line_numbers: false,
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            filename: "ledger-pubsub.log".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let module_levels = BTreeMap::from([
            ("hyper".to_string(), "warn".to_string()),
            ("reqwest".to_string(), "warn".to_string()),
        ]);
        Self {
            level: "info".to_string(),
            module_levels,
            log_dir: PathBuf::from("logs"),
            console: ConsoleConfig::default(),
            file: FileConfig::default(),
        }
    }
}

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl LoggingConfig {
    /// Переопределения из окружения: `LEDGER_PUBSUB_LOG_LEVEL`,
    /// `LEDGER_PUBSUB_LOG_FORMAT`, `LEDGER_PUBSUB_LOG_DIR`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("LEDGER_PUBSUB_LOG_LEVEL") {
            self.level = level.to_lowercase();
        }
        if let Ok(format) = std::env::var("LEDGER_PUBSUB_LOG_FORMAT") {
            match format.to_lowercase().as_str() {
                "compact" => self.console.format = LogFormat::Compact,
                "pretty" => self.console.format = LogFormat::Pretty,
                "json" => self.console.format = LogFormat::Json,
                other => eprintln!("Unknown log format '{other}', keeping {:?}", self.console.format),
            }
        }
        if let Ok(dir) = std::env::var("LEDGER_PUBSUB_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let levels = std::iter::once(&self.level).chain(self.module_levels.values());
        for level in levels {
            if !LEVELS.contains(&level.as_str()) {
                return Err(format!("invalid log level '{level}'"));
            }
        }
        if self.file.enabled && self.file.filename.trim().is_empty() {
            return Err("file logging enabled with empty filename".to_string());
        }
        Ok(())
    }

    /// Директива для `EnvFilter`, например `ledger_pubsub=info,reqwest=warn`.
    pub fn build_filter_directive(&self) -> String {
        let mut parts = vec![format!("ledger_pubsub={}", self.level)];
        parts.extend(
            self.module_levels
                .iter()
                .map(|(target, level)| format!("{target}={level}")),
        );
        parts.join(",")
    }

    pub fn ensure_log_dir(&self) -> io::Result<()> {
        if self.file.enabled {
            fs::create_dir_all(&self.log_dir)?;
        }
        Ok(())
    }
}
