pub mod config;
mod filters;
mod formatter;
pub mod handle;
pub mod sinks;

pub use config::{ConsoleConfig, FileConfig, LogFormat, LoggingConfig};
pub use handle::LoggingHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Инициализация логирования с конфигурацией.
///
/// Устанавливает глобальный subscriber; повторный вызов возвращает ошибку.
pub fn init_logging(
    mut config: LoggingConfig
) -> Result<LoggingHandle, Box<dyn std::error::Error>> {
    config.apply_env_overrides();
    config.validate()?;
    config.ensure_log_dir()?;

    let env_filter = filters::build_filter_from_config(&config);
    let mut layers = Vec::new();

    // Console layer
    if config.console.enabled {
        layers.push(sinks::console::layer_with_config(&config));
    }

    // File layer
    let file_guard = if config.file.enabled {
        let (file_layer, guard) = sinks::file::layer_with_config(&config);
        layers.push(file_layer);
        Some(guard)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_level = %config.level,
        log_dir = %config.log_dir.display(),
        console_enabled = config.console.enabled,
        file_enabled = config.file.enabled,
        "Logging system initialized"
    );

    Ok(LoggingHandle::new(file_guard))
}
