//! Shared services and per-forecast session context.
//!
//! [`Services`] is built once per process: settings, the named semaphores,
//! the TTL cache, the metrics collector, and the platform/archive clients.
//! Concurrent sub-forecasts share it, so they contend for the same rate
//! limits and hit the same cache.
//!
//! [`Session`] is one forecast run: a short session id, the shared services,
//! and the retrodict cutoff. The cutoff is an explicit immutable value
//! threaded from the orchestrator through the policy into the tools — never
//! a process-wide global.

use crate::cache::TtlCache;
use crate::history::ForecastStore;
use crate::limits::RateLimits;
use crate::metaculus::MetaculusClient;
use crate::metrics::MetricsCollector;
use crate::retrodict::RetrodictCutoff;
use crate::wayback::WaybackClient;
use crate::Settings;
use std::path::PathBuf;
use std::sync::Arc;

/// Process-wide shared services.
pub struct Services {
    pub settings: Settings,
    pub limits: RateLimits,
    pub cache: Arc<TtlCache>,
    pub metrics: Arc<MetricsCollector>,
    pub metaculus: MetaculusClient,
    pub wayback: WaybackClient,
    pub store: ForecastStore,
}

impl Services {
    pub fn new(settings: Settings) -> Arc<Self> {
        let limits = RateLimits::from_settings(&settings);
        let cache = Arc::new(TtlCache::default());
        let wayback = WaybackClient::new(limits.clone(), cache.clone());
        let metaculus = MetaculusClient::new(&settings);
        let store = ForecastStore::new(settings.notes_path.clone());
        Arc::new(Self {
            settings,
            limits,
            cache,
            metrics: Arc::new(MetricsCollector::new()),
            metaculus,
            wayback,
            store,
        })
    }
}

/// One forecast run.
#[derive(Clone)]
pub struct Session {
    pub services: Arc<Services>,
    pub cutoff: Option<RetrodictCutoff>,
    pub session_id: String,
}

impl Session {
    pub fn new(services: Arc<Services>, cutoff: Option<RetrodictCutoff>) -> Self {
        Self {
            services,
            cutoff,
            session_id: generate_session_id(),
        }
    }

    pub fn is_retrodict(&self) -> bool {
        self.cutoff.is_some()
    }

    /// Base directory for the notes tool. Retrodict sessions get a
    /// session-scoped temporary tree so notes written by future-dated
    /// sessions cannot influence past-date reasoning.
    pub fn notes_base(&self) -> PathBuf {
        if self.is_retrodict() {
            std::env::temp_dir()
                .join("forecast-notes")
                .join(&self.session_id)
        } else {
            self.services.settings.notes_path.clone()
        }
    }
}

/// Short random hex identifier for one forecast session.
fn generate_session_id() -> String {
    let bytes: [u8; 4] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
