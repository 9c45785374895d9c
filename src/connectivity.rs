//! Network reachability.
//!
//! "Connected" means validated internet: a probe URL answered with a 2xx
//! status within the timeout. A link that is up but captive or offline
//! counts as disconnected.
//!
//! [`Connectivity::spawn_monitor`] polls in the background and publishes on
//! a `watch` channel only when the answer changes, so subscribers are pushed
//! transitions instead of polling themselves.

use crate::config::StudyConfig;
use crate::error::StudyError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct Connectivity {
    probe_url: String,
    client: reqwest::Client,
    state: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(probe_url: impl Into<String>, timeout: Duration) -> Result<Self, StudyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StudyError::Internal(format!("http client: {e}")))?;
        let (state, _) = watch::channel(false);
        Ok(Self {
            probe_url: probe_url.into(),
            client,
            state: Arc::new(state),
        })
    }

    pub fn from_config(config: &StudyConfig) -> Result<Self, StudyError> {
        Self::new(
            config.connectivity_probe_url.clone(),
            Duration::from_secs(config.connectivity_timeout_secs),
        )
    }

    /// Probe once and publish the result.
    pub async fn is_connected(&self) -> bool {
        let connected = match self.client.get(&self.probe_url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("Connectivity probe failed: {e}");
                false
            }
        };
        self.publish(connected);
        connected
    }

    /// Fails with [`StudyError::NotConnected`] unless a probe succeeds now.
    pub async fn require_connected(&self) -> Result<(), StudyError> {
        if self.is_connected().await {
            Ok(())
        } else {
            Err(StudyError::NotConnected)
        }
    }

    /// Last known state plus future transitions.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Poll every `interval` until every subscriber and this handle's clones
    /// are gone, or the task is aborted.
    pub fn spawn_monitor(&self, interval: Duration) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                this.is_connected().await;
                if this.state.receiver_count() == 0 && Arc::strong_count(&this.state) == 1 {
                    debug!("Connectivity monitor stopping: no listeners left");
                    break;
                }
            }
        })
    }

    fn publish(&self, connected: bool) {
        let changed = self.state.send_if_modified(|current| {
            if *current == connected {
                false
            } else {
                *current = connected;
                true
            }
        });
        if changed {
            if connected {
                info!("Network connected");
            } else {
                warn!("Network lost");
            }
        }
    }
}
