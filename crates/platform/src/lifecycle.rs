//! Lifecycle host: drives registered services through init → start → stop.

use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tracing::{error, info};

use billforge_core::{BoxError, Service};

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecyclePhase {
    Registered,
    Initialized,
    Started,
    Stopped,
}

#[derive(Debug, Error)]
pub enum LifecycleRunError {
    #[error("service {service} failed during {phase:?}: {source}")]
    ServiceFailed {
        service: String,
        phase: LifecyclePhase,
        #[source]
        source: BoxError,
    },
    #[error("lifecycle phase {requested:?} requested while in {current:?}")]
    OutOfOrder {
        current: LifecyclePhase,
        requested: LifecyclePhase,
    },
}

/// Ordered set of services owned by the host process.
///
/// Initialization and start run in registration order and abort on the first
/// failure. Stop runs in reverse order and keeps going past failures.
pub struct Lifecycle {
    services: Vec<Arc<dyn Service>>,
    phase: Mutex<LifecyclePhase>,
}

impl core::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Lifecycle")
            .field("services", &self.service_names())
            .field("phase", &self.phase())
            .finish()
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            services: Vec::new(),
            phase: Mutex::new(LifecyclePhase::Registered),
        }
    }

    pub fn register(&mut self, service: Arc<dyn Service>) {
        self.services.push(service);
    }

    /// Registration order, which is also init and start order.
    pub fn service_names(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.name()).collect()
    }

    pub fn phase(&self) -> LifecyclePhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn initialize_all(&self) -> Result<(), LifecycleRunError> {
        self.run_forward(LifecyclePhase::Registered, LifecyclePhase::Initialized, |s| {
            s.initialize()
        })
    }

    pub fn start_all(&self) -> Result<(), LifecycleRunError> {
        self.run_forward(LifecyclePhase::Initialized, LifecyclePhase::Started, |s| s.start())
    }

    /// Stop every service, last registered first. Returns the failures seen.
    pub fn stop_all(&self) -> Vec<LifecycleRunError> {
        {
            let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
            if *phase == LifecyclePhase::Stopped {
                return Vec::new();
            }
            *phase = LifecyclePhase::Stopped;
        }

        let mut failures = Vec::new();
        for service in self.services.iter().rev() {
            match service.stop() {
                Ok(()) => info!(service = service.name(), "service stopped"),
                Err(source) => {
                    error!(service = service.name(), error = %source, "service failed to stop");
                    failures.push(LifecycleRunError::ServiceFailed {
                        service: service.name().to_string(),
                        phase: LifecyclePhase::Stopped,
                        source,
                    });
                }
            }
        }
        failures
    }

    fn run_forward(
        &self,
        expected: LifecyclePhase,
        next: LifecyclePhase,
        step: impl Fn(&dyn Service) -> Result<(), BoxError>,
    ) -> Result<(), LifecycleRunError> {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if *phase >= next {
            return Ok(());
        }
        if *phase != expected {
            return Err(LifecycleRunError::OutOfOrder {
                current: *phase,
                requested: next,
            });
        }

        for service in &self.services {
            step(service.as_ref()).map_err(|source| {
                error!(service = service.name(), phase = ?next, error = %source, "lifecycle step failed");
                LifecycleRunError::ServiceFailed {
                    service: service.name().to_string(),
                    phase: next,
                    source,
                }
            })?;
            info!(service = service.name(), phase = ?next, "lifecycle step completed");
        }

        *phase = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_on_stop: bool,
    }

    impl Service for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn initialize(&self) -> Result<(), BoxError> {
            self.log.lock().unwrap().push(format!("init:{}", self.name));
            Ok(())
        }

        fn start(&self) -> Result<(), BoxError> {
            self.log.lock().unwrap().push(format!("start:{}", self.name));
            Ok(())
        }

        fn stop(&self) -> Result<(), BoxError> {
            self.log.lock().unwrap().push(format!("stop:{}", self.name));
            if self.fail_on_stop {
                return Err("boom".into());
            }
            Ok(())
        }
    }

    fn lifecycle(log: &Arc<Mutex<Vec<String>>>) -> Lifecycle {
        let mut lifecycle = Lifecycle::new();
        for (name, fail_on_stop) in [("a", true), ("b", false)] {
            lifecycle.register(Arc::new(Recorder {
                name,
                log: log.clone(),
                fail_on_stop,
            }));
        }
        lifecycle
    }

    #[test]
    fn phases_run_in_order_and_stop_reverses() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let lifecycle = lifecycle(&log);

        lifecycle.initialize_all().unwrap();
        lifecycle.start_all().unwrap();
        let failures = lifecycle.stop_all();

        assert_eq!(failures.len(), 1);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["init:a", "init:b", "start:a", "start:b", "stop:b", "stop:a"]
        );
    }

    #[test]
    fn phases_run_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let lifecycle = lifecycle(&log);

        lifecycle.initialize_all().unwrap();
        lifecycle.initialize_all().unwrap();
        lifecycle.stop_all();
        assert!(lifecycle.stop_all().is_empty());

        assert_eq!(log.lock().unwrap().len(), 4);
    }

    #[test]
    fn start_requires_initialization() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let lifecycle = lifecycle(&log);

        assert!(matches!(
            lifecycle.start_all(),
            Err(LifecycleRunError::OutOfOrder { .. })
        ));
        assert!(log.lock().unwrap().is_empty());
    }
}
