//! Idle loop feeding MPD events to the module registry

use std::time::Duration;

use tracing::{debug, info, warn};

use super::MpdClient;
use crate::config::MpdConfig;
use crate::error::Result;
use crate::module::{EventResult, ModuleRegistry, Snapshot, Subsystem};

/// Keeps an idle connection to MPD and reconnects when it drops.
pub struct Watcher {
    config: MpdConfig,
    reconnect: Duration,
    modules: ModuleRegistry,
}

impl Watcher {
    #[must_use]
    pub const fn new(config: MpdConfig, reconnect: Duration, modules: ModuleRegistry) -> Self {
        Self {
            config,
            reconnect,
            modules,
        }
    }

    /// Watch MPD forever. Cancel the future to stop, then call
    /// [`Watcher::shutdown`].
    pub async fn run(&mut self) {
        loop {
            match MpdClient::connect(&self.config).await {
                Ok(mut client) => {
                    info!(
                        "Connected to MPD at {}:{} (protocol {})",
                        self.config.host,
                        self.config.port,
                        client.version()
                    );
                    match self.watch(&mut client).await {
                        Ok(EventResult::ReconnectNow) => {
                            info!("Reconnecting to MPD");
                            continue;
                        }
                        Ok(_) => info!("Reconnect requested"),
                        Err(e) => warn!("Lost connection to MPD: {}", e),
                    }
                }
                Err(e) => warn!(
                    "Failed to connect to MPD at {}:{}: {}",
                    self.config.host, self.config.port, e
                ),
            }
            debug!("Retrying in {}", humantime::format_duration(self.reconnect));
            tokio::time::sleep(self.reconnect).await;
        }
    }

    /// Destroy all modules.
    pub async fn shutdown(&mut self) {
        self.modules.destroy_all().await;
    }

    /// Run the idle loop until the connection fails or a module asks for a
    /// reconnect.
    async fn watch(&mut self, client: &mut MpdClient) -> Result<EventResult> {
        // Pick up whatever is already playing.
        let snapshot = fetch_snapshot(client).await?;
        let result = self.modules.dispatch(Subsystem::Player, &snapshot).await;
        if result != EventResult::Success {
            return Ok(result);
        }

        loop {
            let changed = client.idle().await?;
            let subsystems: Vec<Subsystem> = changed
                .iter()
                .filter_map(|name| Subsystem::parse(name))
                .collect();
            if subsystems.is_empty() {
                continue;
            }
            debug!("MPD changed: {}", changed.join(", "));

            let snapshot = fetch_snapshot(client).await?;
            let mut outcome = EventResult::Success;
            for subsystem in subsystems {
                outcome = outcome.max(self.modules.dispatch(subsystem, &snapshot).await);
            }
            if outcome != EventResult::Success {
                return Ok(outcome);
            }
        }
    }
}

async fn fetch_snapshot(client: &mut MpdClient) -> Result<Snapshot> {
    Ok(Snapshot {
        status: client.status().await?,
        song: client.current_song().await?,
    })
}
