//! # tether-adapter-virtual
//!
//! Virtual/demo bridge that simulates physical devices for testing and
//! demonstration.
//!
//! ## Behaviour
//!
//! The exemplar surfaces a configurable number of instances on every
//! nearby discovery round, with identities `serial=virtual-000`,
//! `virtual-001`, …. Each instance keeps its device state in memory:
//! a `push` merges the values and echoes the full state back through
//! the sink (the way real hardware confirms a command), a `pull`
//! replays the current state, and `disconnect` flips reachability and
//! signals a metadata change.
//!
//! ## Dependency rule
//!
//! Depends on `tether-app` (port traits) and `tether-domain` only.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use tether_app::ports::bridge::{
    Bridge, BridgeError, BridgeSetup, DiscoverParams, DiscoveredBridge, PullSink,
};
use tether_domain::band::StateMap;
use tether_domain::identity::BridgeIdentity;

/// Driver name carried in every virtual identity.
pub const DRIVER: &str = "virtual";

/// Configuration for the virtual exemplar.
#[derive(Debug, Clone, Copy)]
pub struct VirtualConfig {
    /// How many simulated devices to surface on discovery.
    pub count: u16,
}

impl Default for VirtualConfig {
    fn default() -> Self {
        Self { count: 1 }
    }
}

/// Simulated bridge; acts as the exemplar and as surfaced instances.
pub struct VirtualBridge {
    identity: BridgeIdentity,
    count: u16,
    device: Mutex<StateMap>,
    sink: Mutex<Option<PullSink>>,
    reachable: AtomicBool,
}

impl VirtualBridge {
    /// The registered exemplar, carrying only the driver identity.
    #[must_use]
    pub fn exemplar(config: VirtualConfig) -> Self {
        Self {
            identity: BridgeIdentity::for_driver(DRIVER),
            count: config.count,
            device: Mutex::new(StateMap::new()),
            sink: Mutex::new(None),
            reachable: AtomicBool::new(true),
        }
    }

    fn instance(serial: String) -> Self {
        Self {
            identity: BridgeIdentity::for_driver(DRIVER).with_field("serial", serial),
            count: 0,
            device: Mutex::new(StateMap::new()),
            sink: Mutex::new(None),
            reachable: AtomicBool::new(true),
        }
    }

    fn signal_pulled(&self, data: StateMap) {
        if let Some(sink) = &*self.sink.lock().expect("virtual sink lock poisoned") {
            sink.pulled(data);
        }
    }

    fn signal_meta(&self) {
        if let Some(sink) = &*self.sink.lock().expect("virtual sink lock poisoned") {
            sink.meta_changed();
        }
    }
}

#[async_trait]
impl Bridge for VirtualBridge {
    fn identity(&self) -> BridgeIdentity {
        self.identity.clone()
    }

    // targeted discovery surfaces the same simulated devices
    async fn discover(
        &self,
        _params: DiscoverParams,
        found: mpsc::Sender<DiscoveredBridge>,
    ) -> Result<(), BridgeError> {
        tracing::debug!(count = self.count, "virtual discovery");
        for index in 0..self.count {
            let serial = format!("virtual-{index:03}");
            if found.send(Box::new(Self::instance(serial))).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    async fn setup(&self, setup: BridgeSetup) -> Result<(), BridgeError> {
        // seed the simulated device with the model's init data
        if !setup.initd.is_empty() {
            let mut device = self.device.lock().expect("virtual device lock poisoned");
            for (key, value) in &setup.initd {
                device.insert(key.clone(), value.clone());
            }
        }
        *self.sink.lock().expect("virtual sink lock poisoned") = Some(setup.sink);
        Ok(())
    }

    async fn connect(&self, _connectd: StateMap) -> Result<(), BridgeError> {
        self.reachable.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BridgeError> {
        self.reachable.store(false, Ordering::SeqCst);
        self.signal_meta();
        // dropping the sink lets the binding pump terminate
        self.sink.lock().expect("virtual sink lock poisoned").take();
        Ok(())
    }

    async fn push(&self, values: StateMap) -> Result<(), BridgeError> {
        if !self.reachable() {
            return Err(BridgeError::Unreachable);
        }
        let snapshot = {
            let mut device = self.device.lock().expect("virtual device lock poisoned");
            for (key, value) in values {
                device.insert(key, value);
            }
            device.clone()
        };
        tracing::debug!(identity = %self.identity, "virtual push applied");
        // hardware echo: confirm the new state through the sink
        self.signal_pulled(snapshot);
        Ok(())
    }

    async fn pull(&self) -> Result<(), BridgeError> {
        if !self.reachable() {
            return Err(BridgeError::Unreachable);
        }
        let snapshot = self
            .device
            .lock()
            .expect("virtual device lock poisoned")
            .clone();
        self.signal_pulled(snapshot);
        Ok(())
    }

    fn reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}
