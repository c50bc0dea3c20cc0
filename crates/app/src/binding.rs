//! Thing ↔ Bridge hookup.
//!
//! A binding owns the per-adapter serializing queue and the inbound pump
//! that folds pulled data back into the Thing's observed band. Exactly
//! one binding exists per Thing and per bridge instance; the registry
//! enforces that invariant.

use std::sync::Arc;

use tokio::sync::mpsc;

use tether_domain::band::{Band, CONNECTION_REACHABLE, StateMap};
use tether_domain::id::ThingId;
use tether_domain::identity::BridgeIdentity;
use tether_domain::value::AttributeValue;

use crate::event_bus::EventBus;
use crate::ports::bridge::{Bridge, BridgeError, BridgeSetup, BridgeSignal, PullSink};
use crate::queue::{QueueItem, SerialQueue};
use crate::thing::Thing;

/// Live association between one Thing and one bridge instance.
///
/// Outbound traffic is serialized through the binding's queue; repeated
/// pulls coalesce under a single queue id.
#[derive(Clone)]
pub struct BridgeLink {
    identity: BridgeIdentity,
    bridge: Arc<dyn Bridge>,
    queue: SerialQueue,
}

impl BridgeLink {
    /// Identity of the bound bridge instance.
    #[must_use]
    pub fn identity(&self) -> &BridgeIdentity {
        &self.identity
    }

    /// The binding's serializing queue.
    #[must_use]
    pub fn queue(&self) -> &SerialQueue {
        &self.queue
    }

    /// Whether the bound device is currently reachable.
    #[must_use]
    pub fn reachable(&self) -> bool {
        self.bridge.reachable()
    }

    /// Enqueue a push of desired values.
    pub(crate) fn push(&self, values: StateMap) {
        let bridge = Arc::clone(&self.bridge);
        self.queue.add(QueueItem::new(move |token| {
            tokio::spawn(async move {
                if let Err(err) = bridge.push(values).await {
                    tracing::warn!(error = %err, "bridge push failed");
                }
                token.complete();
            });
        }));
    }

    /// Enqueue a pull; repeated pulls coalesce while queued.
    pub(crate) fn pull(&self) {
        let bridge = Arc::clone(&self.bridge);
        self.queue.add(QueueItem::keyed("pull", move |token| {
            tokio::spawn(async move {
                if let Err(err) = bridge.pull().await {
                    tracing::warn!(error = %err, "bridge pull failed");
                }
                token.complete();
            });
        }));
    }

    /// Close the connection to the device.
    pub(crate) async fn disconnect(&self) {
        if let Err(err) = self.bridge.disconnect().await {
            tracing::warn!(error = %err, "bridge disconnect failed");
        }
    }
}

impl std::fmt::Debug for BridgeLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeLink")
            .field("identity", &self.identity)
            .finish()
    }
}

/// Bind a Thing to a discovered bridge instance.
///
/// Creates the per-adapter queue (width from the bridge), runs bridge
/// setup with the model's init data and a fresh sink, assigns the
/// composed identity, spawns the inbound pump, connects, then requests
/// an initial pull.
///
/// # Errors
///
/// Propagates [`BridgeError`] from `setup` or `connect`; the Thing is
/// left unbound in that case.
pub async fn bind(
    thing: &Thing,
    bridge: Arc<dyn Bridge>,
    bus: EventBus,
) -> Result<ThingId, BridgeError> {
    let identity = bridge.identity();
    let queue = SerialQueue::new(identity.thing_id(), bridge.queue_width());

    let (sink, signals) = PullSink::channel();
    let initd = thing.descriptor().initd.clone();
    bridge.setup(BridgeSetup { initd, sink }).await?;

    let link = BridgeLink {
        identity,
        bridge: Arc::clone(&bridge),
        queue,
    };
    let thing_id = thing.bind_bridge(link, bus);

    spawn_pump(thing.clone(), Arc::clone(&bridge), signals);

    if let Err(err) = bridge.connect(StateMap::new()).await {
        thing.unbind();
        return Err(err);
    }
    thing.pull();

    Ok(thing_id)
}

/// Drain bridge signals into the Thing: pulled data lands in the
/// observed band; a bare meta signal refreshes the connection band from
/// the bridge's reachability.
fn spawn_pump(
    thing: Thing,
    bridge: Arc<dyn Bridge>,
    mut signals: mpsc::UnboundedReceiver<BridgeSignal>,
) {
    tokio::spawn(async move {
        while let Some(signal) = signals.recv().await {
            match signal {
                BridgeSignal::Pulled(data) => {
                    if let Err(err) = thing.update_band(Band::Istate, &data) {
                        tracing::warn!(error = %err, "inbound update failed");
                    }
                }
                BridgeSignal::Meta => {
                    let mut connection = StateMap::new();
                    connection.insert(
                        CONNECTION_REACHABLE.to_string(),
                        AttributeValue::Bool(bridge.reachable()),
                    );
                    if let Err(err) = thing.update_band(Band::Connection, &connection) {
                        tracing::warn!(error = %err, "connection update failed");
                    }
                }
            }
        }
    });
}
