/// Child Account Scheduler
///
/// A service that runs AI-driven posting for child accounts across Twitter,
/// Instagram, TikTok and YouTube.
///
/// The service:
/// - Generates posts from each account's personality template
/// - Holds drafts for approval when an account requires it
/// - Publishes due posts on a fixed interval (simulated)
/// - Flags timing, content and tone conflicts between platforms
/// - Tunes generation from human training feedback

use anyhow::Result;
use child_account_scheduler::{
    config,
    content::ContentGenerator,
    http_server::{self, AppState},
    profile::{HttpProfileStore, InMemoryProfileStore, ProfileStore},
    scheduler::{Scheduler, SimulatedPublisher},
    store::InMemoryPostStore,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger
    pretty_env_logger::init();

    log::info!("Starting Child Account Scheduler...");

    // Load configuration from environment
    let cfg = config::Config::from_env()?;

    // Validate configuration and connections
    cfg.validate().await?;

    let profiles: Arc<dyn ProfileStore> = match &cfg.profile_api_url {
        Some(url) => {
            log::info!("Using profile backend at {}", url);
            Arc::new(HttpProfileStore::new(url.clone()))
        }
        None => {
            log::info!("No PROFILE_API_URL set - keeping profiles in memory");
            Arc::new(InMemoryProfileStore::new())
        }
    };

    let generator = Arc::new(ContentGenerator::from_config(&cfg)?);

    let scheduler = Scheduler::new(
        &cfg,
        Arc::new(InMemoryPostStore::new()),
        generator,
        profiles,
        Arc::new(SimulatedPublisher::new(cfg.publish_delay())),
    );

    let state = AppState::new(cfg.clone(), scheduler.clone());

    // Run the control API until Ctrl+C
    http_server::start_server(state, cfg.http_port).await?;

    scheduler.shutdown().await;
    log::info!("Child Account Scheduler stopped");

    Ok(())
}
