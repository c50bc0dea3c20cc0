//! Bridge port — the contract between the engine and protocol adapters.
//!
//! A bridge performs the actual I/O (radio, HTTP, …) for exactly one
//! Thing. The engine never guarantees physical delivery; it only routes
//! pushes through the bridge's serializing queue and folds pulled data
//! back into the Thing's observed state.

use async_trait::async_trait;
use tokio::sync::mpsc;

use tether_domain::band::StateMap;
use tether_domain::identity::BridgeIdentity;

/// A discovered bridge instance, ready to be matched and bound.
pub type DiscoveredBridge = Box<dyn Bridge>;

/// Adapter-local errors. I/O failures stay local to the adapter that
/// produced them and never affect other Things.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The device cannot be reached.
    #[error("device unreachable")]
    Unreachable,

    /// Protocol-level failure.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The bridge was disconnected and can no longer be used.
    #[error("bridge closed")]
    Closed,
}

/// Parameters for a discovery round.
///
/// An empty `initd` means nearby discovery (scan whatever is around);
/// a populated one targets the model that supplied it.
#[derive(Debug, Clone, Default)]
pub struct DiscoverParams {
    pub initd: StateMap,
}

impl DiscoverParams {
    /// Nearby discovery, no targeting data.
    #[must_use]
    pub fn nearby() -> Self {
        Self::default()
    }

    /// Targeted discovery with a model's init data.
    #[must_use]
    pub fn targeted(initd: StateMap) -> Self {
        Self { initd }
    }

    /// Whether this is a nearby (untargeted) round.
    #[must_use]
    pub fn is_nearby(&self) -> bool {
        self.initd.is_empty()
    }
}

/// Inbound signal from a bridge.
#[derive(Debug)]
pub enum BridgeSignal {
    /// New values observed on the hardware.
    Pulled(StateMap),
    /// Reachability or metadata changed, no value update.
    Meta,
}

/// The bridge's channel back into the engine.
///
/// Handed to the bridge at [`setup`](Bridge::setup); every `push`/`pull`
/// must eventually signal it on success.
#[derive(Debug, Clone)]
pub struct PullSink {
    tx: mpsc::UnboundedSender<BridgeSignal>,
}

impl PullSink {
    /// Create a sink and the receiving half the binding pump drains.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BridgeSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Deliver observed values to the bound Thing.
    pub fn pulled(&self, data: StateMap) {
        let _ = self.tx.send(BridgeSignal::Pulled(data));
    }

    /// Signal a reachability/metadata change without a value update.
    pub fn meta_changed(&self) {
        let _ = self.tx.send(BridgeSignal::Meta);
    }
}

/// Setup data handed to a bridge exactly once, at bind time.
pub struct BridgeSetup {
    /// Model init data merged for this binding; the bridge records
    /// whatever subscription/init detail it needs later.
    pub initd: StateMap,
    /// Channel for inbound data and metadata signals.
    pub sink: PullSink,
}

/// A pluggable protocol adapter, bound 1:1 to a Thing.
///
/// The engine calls the lifecycle methods in order:
///
/// 1. [`discover`](Self::discover) — on the registered exemplar
/// 2. [`setup`](Self::setup) — on a surfaced instance, at bind time
/// 3. [`connect`](Self::connect) — after setup
/// 4. [`push`](Self::push) / [`pull`](Self::pull) — serialized through
///    the binding's queue
/// 5. [`disconnect`](Self::disconnect) — at teardown
#[async_trait]
pub trait Bridge: Send + Sync {
    /// Stable identity. Exemplars may carry only the driver name;
    /// surfaced instances carry the full field set.
    fn identity(&self) -> BridgeIdentity;

    /// How many operations may run concurrently against this adapter.
    fn queue_width(&self) -> usize {
        1
    }

    /// Discover instances, sending each through `found`. May send zero
    /// or more; returns when this discovery round is finished.
    async fn discover(
        &self,
        params: DiscoverParams,
        found: mpsc::Sender<DiscoveredBridge>,
    ) -> Result<(), BridgeError>;

    /// Called once at bind time. Must record any subscription/init data
    /// needed later, including the sink.
    async fn setup(&self, setup: BridgeSetup) -> Result<(), BridgeError>;

    /// Open the connection to the device.
    async fn connect(&self, _connectd: StateMap) -> Result<(), BridgeError> {
        Ok(())
    }

    /// Tear down the connection. Implementations should drop their
    /// stored sink here so the binding pump can terminate.
    async fn disconnect(&self) -> Result<(), BridgeError> {
        Ok(())
    }

    /// Send desired values to the hardware. Must eventually trigger the
    /// sink on success.
    async fn push(&self, values: StateMap) -> Result<(), BridgeError>;

    /// Ask the hardware for its current state. Must eventually trigger
    /// the sink on success.
    async fn pull(&self) -> Result<(), BridgeError>;

    /// Whether the device is currently reachable.
    fn reachable(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_domain::value::AttributeValue;

    #[test]
    fn should_detect_nearby_params() {
        assert!(DiscoverParams::nearby().is_nearby());

        let mut initd = StateMap::new();
        initd.insert("iri".to_string(), AttributeValue::from("http://x"));
        assert!(!DiscoverParams::targeted(initd).is_nearby());
    }

    #[tokio::test]
    async fn should_deliver_pulled_data_through_sink() {
        let (sink, mut rx) = PullSink::channel();
        let mut data = StateMap::new();
        data.insert("brightness".to_string(), AttributeValue::Int(42));
        sink.pulled(data);

        match rx.recv().await.unwrap() {
            BridgeSignal::Pulled(map) => {
                assert_eq!(map.get("brightness"), Some(&AttributeValue::Int(42)));
            }
            BridgeSignal::Meta => panic!("expected pulled data"),
        }
    }

    #[tokio::test]
    async fn should_deliver_meta_signal_through_sink() {
        let (sink, mut rx) = PullSink::channel();
        sink.meta_changed();
        assert!(matches!(rx.recv().await, Some(BridgeSignal::Meta)));
    }

    #[test]
    fn should_not_panic_when_sink_receiver_dropped() {
        let (sink, rx) = PullSink::channel();
        drop(rx);
        sink.pulled(StateMap::new());
        sink.meta_changed();
    }
}
