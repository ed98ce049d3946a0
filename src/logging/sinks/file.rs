use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::registry::LookupSpan;

use crate::logging::{
    config::LoggingConfig,
    formatter::{self, BoxedLayer},
};

/// File layer с ежедневной ротацией и неблокирующей записью.
///
/// Guard нужно держать живым, пока нужен вывод в файл: при drop
/// он дописывает буфер.
pub fn layer_with_config<S>(config: &LoggingConfig) -> (BoxedLayer<S>, WorkerGuard)
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let appender = rolling::daily(&config.log_dir, &config.file.filename);
    let (writer, guard) = non_blocking(appender);

    let layer = formatter::build_formatter(config.file.format, writer, false, &config.console);
    (layer, guard)
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::{prelude::*, registry::Registry};

    use super::*;

    /// Тест проверяет, что события попадают в файл в каталоге логов.
    #[test]
    fn test_file_layer_writes_into_log_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = LoggingConfig {
            log_dir: tmp.path().to_path_buf(),
            ..Default::default()
        };
        cfg.file.enabled = true;
        cfg.file.filename = "sink-test.log".into();

        let (layer, guard) = layer_with_config::<Registry>(&cfg);
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(topic = "gossip", "written to file");
        });
        drop(guard);

        let files: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(Result::ok)
            .collect();
        assert_eq!(files.len(), 1);

        let contents = std::fs::read_to_string(files[0].path()).unwrap();
        assert!(contents.contains("written to file"));
    }
}
