use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tracing_appender::non_blocking::WorkerGuard;

/// Метрики для LoggingHandle.
#[derive(Debug, Default)]
pub struct LoggingMetrics {
    /// Флаг активного shutdown
    pub shutdown_in_progress: AtomicBool,
}

/// Handle для управления lifecycle логирования.
///
/// Держит guard файлового appender-а: пока handle жив, фоновый поток
/// записи работает.
#[derive(Debug)]
pub struct LoggingHandle {
    file_guard: Option<WorkerGuard>,
    pub metrics: Arc<LoggingMetrics>,
}

impl LoggingMetrics {
    pub fn is_shutdown_in_progress(&self) -> bool {
        self.shutdown_in_progress.load(Ordering::Acquire)
    }
}

impl LoggingHandle {
    pub fn new(file_guard: Option<WorkerGuard>) -> Self {
        Self {
            file_guard,
            metrics: Arc::new(LoggingMetrics::default()),
        }
    }

    /// Есть ли активный файловый вывод.
    pub fn has_file_sink(&self) -> bool {
        self.file_guard.is_some()
    }

    /// Graceful shutdown: дописывает файловый буфер.
    pub fn shutdown(mut self) {
        self.metrics.shutdown_in_progress.store(true, Ordering::Release);
        tracing::info!(file_sink = self.has_file_sink(), "Logging shutdown");

        let start = std::time::Instant::now();
        drop(self.file_guard.take());
        tracing::debug!(
            shutdown_duration_ms = start.elapsed().as_millis() as u64,
            "Logging shutdown completed"
        );
    }
}

impl Drop for LoggingHandle {
    fn drop(&mut self) {
        if self.file_guard.is_some() && !self.metrics.is_shutdown_in_progress() {
            eprintln!(
                "WARNING: LoggingHandle dropped without explicit shutdown(). \
                 Some logs may be lost."
            );
        }
    }
}
