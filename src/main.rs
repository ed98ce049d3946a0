use anyhow::Context;
use ledger_pubsub::{init_logging, HttpPublisher, Publisher, Settings};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("failed to load settings")?;

    let logging = init_logging(settings.logging.clone())
        .map_err(|e| anyhow::anyhow!("failed to init logging: {e}"))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_commit = env!("GIT_COMMIT"),
        build_time = env!("BUILD_TIME"),
        "ledger-pubsub starting"
    );

    let publisher = HttpPublisher::new(settings.publish_settings(), &settings.http)
        .context("failed to build HTTP publisher")?;

    for name in &settings.topics {
        if let Err(e) = publisher.create_topic(name) {
            warn!(topic = %name, error = %e, "topic not created");
        }
    }

    info!(topics = ?publisher.topic_names(), "publisher ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("shutdown requested, flushing pending bundles");
    publisher.flush_all().await;

    logging.shutdown();
    Ok(())
}
