//! Fire detection server binary entry point

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fire_watch_server::{
    load_configured_class_names, load_detector, start_server, AppConfig, AppState,
};
use fire_watch_video::FfmpegBackend;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let default_filter = if AppConfig::debug_from_env() {
        "debug"
    } else {
        "fire_watch_server=info,fire_watch_pipeline=info,tower_http=debug"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();
    let detector = load_detector(&config);
    let class_names = load_configured_class_names(&config);
    let backend = Arc::new(FfmpegBackend::new(config.output_codec.clone()));
    let addr = config.bind_addr();

    let state = AppState::new(config, backend, detector, class_names);

    tracing::info!("Starting Fire Watch server");
    start_server(&addr, state).await?;

    Ok(())
}
