use std::io::{self, Stdout};

use tracing_subscriber::{
    fmt::{self, format::FmtSpan, MakeWriter},
    layer::Layer as LayerTrait,
    registry::LookupSpan,
};

use crate::logging::config::{ConsoleConfig, LogFormat};

/// Boxed layer: стирает конкретный тип формата (json/pretty/compact).
pub type BoxedLayer<S> = Box<dyn LayerTrait<S> + Send + Sync>;

/// Console formatter на основе конфигурации.
pub fn build_console_formatter<S>(console: &ConsoleConfig) -> BoxedLayer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    // Явно указываем writer как fn() -> Stdout
    let writer: fn() -> Stdout = io::stdout;
    build_formatter(console.format, writer, console.with_ansi, console)
}

/// Собирает fmt-layer заданного формата поверх произвольного writer-а.
pub fn build_formatter<S, W>(
    format: LogFormat,
    writer: W,
    with_ansi: bool,
    opts: &ConsoleConfig,
) -> BoxedLayer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let base = fmt::layer()
        .with_writer(writer)
        .with_ansi(with_ansi)
        .with_target(opts.with_target)
        .with_thread_ids(opts.with_thread_ids)
        .with_line_number(opts.with_line_numbers);

    match format {
        LogFormat::Json => Box::new(
            base.event_format(fmt::format().json().with_current_span(true)),
        ),
        LogFormat::Pretty => Box::new(
            base.event_format(fmt::format().pretty())
                .with_span_events(FmtSpan::CLOSE),
        ),
        LogFormat::Compact => Box::new(base.event_format(fmt::format().compact())),
    }
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::{prelude::*, registry::Registry};

    use super::*;

    /// Тест проверят, что layer любого формата регистрируется и логирует
    /// без паники.
    #[test]
    fn test_every_format_builds_and_logs() {
        for format in [LogFormat::Compact, LogFormat::Pretty, LogFormat::Json] {
            let console = ConsoleConfig {
                format,
                with_ansi: false,
                ..Default::default()
            };
            let layer = build_console_formatter::<Registry>(&console);
            let subscriber = Registry::default().with(layer);

            tracing::subscriber::with_default(subscriber, || {
                tracing::info!(topic = "ledger-events", "formatter smoke test");
            });
        }
    }
}
