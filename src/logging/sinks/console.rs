use tracing_subscriber::registry::LookupSpan;

use crate::logging::{
    config::LoggingConfig,
    formatter::{self, BoxedLayer},
};

/// Console layer с конфигурацией.
pub fn layer_with_config<S>(config: &LoggingConfig) -> BoxedLayer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    formatter::build_console_formatter(&config.console)
}
