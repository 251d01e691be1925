//! Aggregated subsystem health.
//!
//! Subsystems register a named poller; a status check runs every poller
//! and aggregates into a single verdict with the first failing
//! subsystem called out.

use std::sync::RwLock;

/// One subsystem's verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubsystemStatus {
    /// Subsystem name.
    pub name: String,
    /// Whether the subsystem considers itself serviceable.
    pub ok: bool,
    /// Optional operator-facing detail.
    pub status: String,
}

/// Aggregated process verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemStatus {
    /// True when every subsystem reported ok.
    pub healthy: bool,
    /// The first failing subsystem, if any.
    pub first_failure: Option<SubsystemStatus>,
    /// Every subsystem verdict, in registration order.
    pub subsystems: Vec<SubsystemStatus>,
}

type Poller = Box<dyn Fn() -> SubsystemStatus + Send + Sync>;

/// Registry of subsystem health pollers.
#[derive(Default)]
pub struct HealthRegistry {
    pollers: RwLock<Vec<Poller>>,
}

impl HealthRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a poller producing a full [`SubsystemStatus`].
    pub fn register(&self, poller: impl Fn() -> SubsystemStatus + Send + Sync + 'static) {
        let mut pollers = match self.pollers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        pollers.push(Box::new(poller));
    }

    /// Registers a boolean poller under `name`.
    pub fn register_fn(&self, name: &str, poller: impl Fn() -> bool + Send + Sync + 'static) {
        let name = name.to_string();
        self.register(move || {
            let ok = poller();
            SubsystemStatus {
                name: name.clone(),
                ok,
                status: if ok { "ok" } else { "failing" }.to_string(),
            }
        });
    }

    /// Polls every subsystem and aggregates.
    #[must_use]
    pub fn check(&self) -> SystemStatus {
        let pollers = match self.pollers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let subsystems: Vec<SubsystemStatus> = pollers.iter().map(|p| p()).collect();
        drop(pollers);
        let first_failure = subsystems.iter().find(|s| !s.ok).cloned();
        SystemStatus {
            healthy: first_failure.is_none(),
            first_failure,
            subsystems,
        }
    }
}
