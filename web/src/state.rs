//! Application state shared by every handler.

use flash_sale_runtime::{AdmissionGate, RelayHealth, SubscriberRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default per-viewer outbound queue length.
pub const DEFAULT_SUBSCRIBER_QUEUE_CAPACITY: usize = 64;

/// Default bound on a single socket write to a viewer.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Tunables for the HTTP surface.
#[derive(Debug, Clone)]
pub struct WebSettings {
    /// Outbound queue length per live-update viewer
    pub subscriber_queue_capacity: usize,
    /// Bound on one socket write; a viewer that exceeds it is disconnected
    pub write_timeout: Duration,
    /// Demo page served at `/`
    pub static_index: Option<PathBuf>,
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            subscriber_queue_capacity: DEFAULT_SUBSCRIBER_QUEUE_CAPACITY,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            static_index: None,
        }
    }
}

/// Application state shared across all HTTP handlers.
///
/// The registry is the same instance the stock relay broadcasts into; it is
/// constructed once by the binary and injected here.
#[derive(Clone)]
pub struct AppState {
    /// Admission fast path
    pub gate: AdmissionGate,
    /// Live-update viewers
    pub registry: Arc<SubscriberRegistry>,
    /// HTTP tunables
    pub settings: Arc<WebSettings>,
    /// Subscription state of the stock relay feeding `registry`
    pub relay: Option<RelayHealth>,
}

impl AppState {
    /// Create state with default settings.
    #[must_use]
    pub fn new(gate: AdmissionGate, registry: Arc<SubscriberRegistry>) -> Self {
        Self {
            gate,
            registry,
            settings: Arc::new(WebSettings::default()),
            relay: None,
        }
    }

    /// Report the relay's subscription state on `/ready`.
    #[must_use]
    pub fn with_relay_health(mut self, health: RelayHealth) -> Self {
        self.relay = Some(health);
        self
    }

    /// Replace the settings.
    #[must_use]
    pub fn with_settings(mut self, settings: WebSettings) -> Self {
        self.settings = Arc::new(settings);
        self
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("gate", &self.gate)
            .field("settings", &self.settings)
            .field("relay", &self.relay)
            .finish_non_exhaustive()
    }
}
