//! The binding coordinator.
//!
//! An explicitly constructed context object owning the model descriptor
//! list, the bridge exemplar list, the bound-thing registry, and the
//! event bus. Discovery matches surfaced bridge instances against model
//! descriptors and binds each physical identity exactly once.
//!
//! The registry is keyed by the *bridge* thing-id, which is known before
//! a model is matched; the slot is reserved with a placeholder before
//! matching so two near-simultaneous discoveries of the same device
//! cannot both bind.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use tether_domain::error::{NotFoundError, TetherError, ValidationError};
use tether_domain::event::EngineEvent;
use tether_domain::identity::IdentityFilter;
use tether_domain::model::ModelDescriptor;
use tether_domain::validator::ValidatorRegistry;

use crate::binding;
use crate::event_bus::EventBus;
use crate::ports::bridge::{Bridge, DiscoverParams, DiscoveredBridge};
use crate::thing::Thing;

struct RegistryState {
    models: Vec<Arc<ModelDescriptor>>,
    bridges: Vec<Arc<dyn Bridge>>,
    /// Bound things keyed by bridge thing-id. `None` is a reservation:
    /// the identity was seen but no model accepted it (or binding is in
    /// flight).
    things: HashMap<String, Option<Thing>>,
}

struct RegistryInner {
    state: Mutex<RegistryState>,
    bus: EventBus,
    validators: ValidatorRegistry,
}

/// Context object coordinating discovery and binding.
///
/// Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// Create a registry resolving validators against `validators`.
    #[must_use]
    pub fn new(validators: ValidatorRegistry) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                state: Mutex::new(RegistryState {
                    models: Vec::new(),
                    bridges: Vec::new(),
                    things: HashMap::new(),
                }),
                bus: EventBus::default(),
                validators,
            }),
        }
    }

    /// The engine event bus.
    #[must_use]
    pub fn bus(&self) -> EventBus {
        self.inner.bus.clone()
    }

    /// Register a model descriptor. The first registration per code
    /// wins; later ones are logged and ignored.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::Validation`] when the descriptor is
    /// invalid.
    pub fn register_model(&self, descriptor: ModelDescriptor) -> Result<(), TetherError> {
        descriptor.validate()?;
        let mut state = self.lock();
        if state.models.iter().any(|model| model.code == descriptor.code) {
            tracing::warn!(code = %descriptor.code, "model already registered; ignored");
            return Ok(());
        }
        tracing::debug!(code = %descriptor.code, "model registered");
        state.models.push(Arc::new(descriptor));
        Ok(())
    }

    /// Register a bridge exemplar.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::Validation`] when the exemplar has no
    /// driver identity; the exemplar is ignored, the process keeps
    /// running.
    pub fn register_bridge<B>(&self, bridge: B) -> Result<(), TetherError>
    where
        B: Bridge + 'static,
    {
        let identity = bridge.identity();
        if identity.driver.is_empty() {
            tracing::error!("ignoring bridge exemplar with no driver identity");
            return Err(ValidationError::MissingDriverIdentity.into());
        }
        tracing::debug!(driver = %identity.driver, "bridge exemplar registered");
        self.lock().bridges.push(Arc::new(bridge));
        Ok(())
    }

    /// All bound things.
    #[must_use]
    pub fn things(&self) -> Vec<Thing> {
        self.lock()
            .things
            .values()
            .filter_map(Clone::clone)
            .collect()
    }

    /// Look up a bound thing by bridge thing-id.
    #[must_use]
    pub fn thing(&self, key: &str) -> Option<Thing> {
        self.lock().things.get(key).and_then(Clone::clone)
    }

    /// Ask every registered bridge exemplar to discover nearby devices
    /// and bind whatever matches a registered model.
    pub async fn discover(&self) {
        self.discover_matching(&IdentityFilter::any()).await;
    }

    /// Nearby discovery restricted to exemplars overlapping `filter`.
    pub async fn discover_matching(&self, filter: &IdentityFilter) {
        let exemplars: Vec<Arc<dyn Bridge>> = {
            let state = self.lock();
            state
                .bridges
                .iter()
                .filter(|bridge| bridge.identity().overlaps(filter))
                .cloned()
                .collect()
        };

        for exemplar in exemplars {
            let (tx, mut rx) = mpsc::channel::<DiscoveredBridge>(16);
            let discovery = async {
                if let Err(err) = exemplar.discover(DiscoverParams::nearby(), tx).await {
                    tracing::warn!(
                        driver = %exemplar.identity().driver,
                        error = %err,
                        "nearby discovery failed"
                    );
                }
            };
            let adoption = async {
                while let Some(candidate) = rx.recv().await {
                    self.adopt_nearby(candidate).await;
                }
            };
            tokio::join!(discovery, adoption);
        }
    }

    /// Targeted discovery for one registered model: ask each supporting
    /// exemplar to discover with the model's init data; the first
    /// exemplar yielding a compatible adapter wins.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::NotFound`] when no model with `code` is
    /// registered.
    pub async fn discover_model(&self, code: &str) -> Result<(), TetherError> {
        let (model, exemplars) = {
            let state = self.lock();
            let Some(model) = state
                .models
                .iter()
                .find(|model| model.code == code)
                .cloned()
            else {
                return Err(NotFoundError {
                    kind: "Model",
                    key: code.to_string(),
                }
                .into());
            };
            let exemplars: Vec<Arc<dyn Bridge>> = state
                .bridges
                .iter()
                .filter(|bridge| model.supports(&bridge.identity()))
                .cloned()
                .collect();
            (model, exemplars)
        };

        for exemplar in exemplars {
            let (tx, mut rx) = mpsc::channel::<DiscoveredBridge>(16);
            let params = DiscoverParams::targeted(model.initd.clone());
            let mut bound = 0usize;

            let discovery = async {
                if let Err(err) = exemplar.discover(params, tx).await {
                    tracing::warn!(
                        driver = %exemplar.identity().driver,
                        error = %err,
                        "targeted discovery failed"
                    );
                }
            };
            let adoption = async {
                while let Some(candidate) = rx.recv().await {
                    if self.adopt_targeted(candidate, &model).await {
                        bound += 1;
                    }
                }
            };
            tokio::join!(discovery, adoption);

            if bound > 0 {
                return Ok(());
            }
        }

        tracing::warn!(code, "no driver found for model");
        Ok(())
    }

    /// Unbind and drop a thing by bridge thing-id.
    pub async fn remove(&self, key: &str) {
        let thing = self.lock().things.remove(key).flatten();
        if let Some(thing) = thing {
            self.teardown(&thing).await;
        }
    }

    /// Unbind every bound thing, e.g. at shutdown.
    pub async fn disconnect_all(&self) {
        let things: Vec<Thing> = {
            let mut state = self.lock();
            let things = state.things.values().filter_map(Clone::clone).collect();
            state.things.clear();
            things
        };
        for thing in things {
            self.teardown(&thing).await;
        }
    }

    /// Handle one surfaced instance from nearby discovery.
    async fn adopt_nearby(&self, candidate: DiscoveredBridge) {
        let identity = candidate.identity();
        self.inner.bus.publish(EngineEvent::Discovered {
            identity: identity.clone(),
        });

        let key = identity.thing_id();
        let model = {
            let mut state = self.lock();
            match state.things.entry(key.clone()) {
                Entry::Occupied(_) => {
                    tracing::warn!(%identity, key = %key, "thing already exists; candidate dropped");
                    return;
                }
                // reserve before matching to close the concurrent-discovery race
                Entry::Vacant(slot) => {
                    slot.insert(None);
                }
            }
            state
                .models
                .iter()
                .find(|model| model.supports(&identity))
                .cloned()
        };

        let Some(model) = model else {
            tracing::info!(%identity, "no registered model accepts this bridge");
            self.inner.bus.publish(EngineEvent::Ignored { identity });
            // the reserved slot stays; rediscovery of this identity is a no-op
            return;
        };

        let thing = match Thing::new(Arc::clone(&model), &self.inner.validators) {
            Ok(thing) => thing,
            Err(err) => {
                tracing::error!(code = %model.code, error = %err, "thing construction failed");
                self.lock().things.remove(&key);
                return;
            }
        };

        let bridge: Arc<dyn Bridge> = Arc::from(candidate);
        match binding::bind(&thing, bridge, self.inner.bus.clone()).await {
            Ok(thing_id) => {
                self.lock().things.insert(key, Some(thing));
                tracing::info!(%thing_id, "new thing bound");
                self.inner.bus.publish(EngineEvent::NewThing { thing_id });
            }
            Err(err) => {
                tracing::warn!(%identity, error = %err, "binding failed; candidate dropped");
                self.lock().things.remove(&key);
            }
        }
    }

    /// Handle one surfaced instance from targeted discovery. Identity
    /// is only fully known post-bind, so compatibility and duplicates
    /// are re-checked afterwards.
    async fn adopt_targeted(&self, candidate: DiscoveredBridge, model: &Arc<ModelDescriptor>) -> bool {
        let thing = match Thing::new(Arc::clone(model), &self.inner.validators) {
            Ok(thing) => thing,
            Err(err) => {
                tracing::error!(code = %model.code, error = %err, "thing construction failed");
                return false;
            }
        };

        let bridge: Arc<dyn Bridge> = Arc::from(candidate);
        self.inner.bus.publish(EngineEvent::Discovered {
            identity: bridge.identity(),
        });

        let thing_id = match binding::bind(&thing, Arc::clone(&bridge), self.inner.bus.clone()).await
        {
            Ok(thing_id) => thing_id,
            Err(err) => {
                tracing::warn!(error = %err, "binding failed; candidate dropped");
                return false;
            }
        };

        let identity = bridge.identity();
        if !model.supports(&identity) {
            tracing::info!(%identity, "ignoring this driver (not a real issue)");
            self.inner.bus.publish(EngineEvent::Ignored { identity });
            self.teardown(&thing).await;
            return false;
        }

        let key = identity.thing_id();
        let duplicate = {
            let mut state = self.lock();
            match state.things.entry(key.clone()) {
                Entry::Occupied(_) => true,
                Entry::Vacant(slot) => {
                    slot.insert(Some(thing.clone()));
                    false
                }
            }
        };
        if duplicate {
            tracing::warn!(%identity, key = %key, "thing already registered; candidate dropped");
            self.teardown(&thing).await;
            return false;
        }

        tracing::info!(%thing_id, "new thing bound");
        self.inner.bus.publish(EngineEvent::NewThing { thing_id });
        true
    }

    async fn teardown(&self, thing: &Thing) {
        let thing_id = thing.identity();
        if let Some(link) = thing.unbind() {
            link.disconnect().await;
        }
        if let Some(thing_id) = thing_id {
            self.inner
                .bus
                .publish(EngineEvent::Disconnected { thing_id });
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.inner.state.lock().expect("registry lock poisoned")
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(ValidatorRegistry::with_builtins())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Registry")
            .field("models", &state.models.len())
            .field("bridges", &state.bridges.len())
            .field("things", &state.things.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::time::timeout;

    use tether_domain::attribute::{AttributeSpec, ROLE_CONTROL, ROLE_READING};
    use tether_domain::band::StateMap;
    use tether_domain::identity::BridgeIdentity;

    use crate::ports::bridge::{BridgeError, BridgeSetup, PullSink};

    /// Exemplar double surfacing a scripted list of instances on every
    /// discovery round.
    struct ScriptedBridge {
        identity: BridgeIdentity,
        instances: Vec<BridgeIdentity>,
        sink: StdMutex<Option<PullSink>>,
    }

    impl ScriptedBridge {
        fn exemplar(driver: &str, instances: Vec<BridgeIdentity>) -> Self {
            Self {
                identity: BridgeIdentity::for_driver(driver),
                instances,
                sink: StdMutex::new(None),
            }
        }

        fn instance(identity: BridgeIdentity) -> Self {
            Self {
                identity,
                instances: Vec::new(),
                sink: StdMutex::new(None),
            }
        }
    }

    #[async_trait]
    impl Bridge for ScriptedBridge {
        fn identity(&self) -> BridgeIdentity {
            self.identity.clone()
        }

        async fn discover(
            &self,
            _params: DiscoverParams,
            found: mpsc::Sender<DiscoveredBridge>,
        ) -> Result<(), BridgeError> {
            for identity in self.instances.clone() {
                let _ = found.send(Box::new(Self::instance(identity))).await;
            }
            Ok(())
        }

        async fn setup(&self, setup: BridgeSetup) -> Result<(), BridgeError> {
            *self.sink.lock().unwrap() = Some(setup.sink);
            Ok(())
        }

        async fn push(&self, _values: StateMap) -> Result<(), BridgeError> {
            Ok(())
        }

        async fn pull(&self) -> Result<(), BridgeError> {
            Ok(())
        }

        fn reachable(&self) -> bool {
            true
        }
    }

    fn demo_model(driver: &str) -> ModelDescriptor {
        ModelDescriptor::builder("demo-light")
            .attribute(
                AttributeSpec::builder("brightness")
                    .purpose("level")
                    .role(ROLE_READING)
                    .role(ROLE_CONTROL)
                    .build()
                    .unwrap(),
            )
            .bridge_filter(IdentityFilter::for_driver(driver))
            .build()
            .unwrap()
    }

    fn lamp(serial: &str) -> BridgeIdentity {
        BridgeIdentity::for_driver("virtual").with_field("serial", serial)
    }

    #[tokio::test]
    async fn should_bind_discovered_instance_to_matching_model() {
        let registry = Registry::default();
        registry.register_model(demo_model("virtual")).unwrap();
        registry
            .register_bridge(ScriptedBridge::exemplar("virtual", vec![lamp("001")]))
            .unwrap();

        registry.discover().await;

        let things = registry.things();
        assert_eq!(things.len(), 1);
        assert_eq!(things[0].code(), "demo-light");
        assert!(things[0].identity().is_some());
    }

    #[tokio::test]
    async fn should_bind_exactly_once_for_duplicate_identities() {
        let registry = Registry::default();
        registry.register_model(demo_model("virtual")).unwrap();
        registry
            .register_bridge(ScriptedBridge::exemplar(
                "virtual",
                vec![lamp("001"), lamp("001")],
            ))
            .unwrap();

        registry.discover().await;

        assert_eq!(registry.things().len(), 1);
    }

    #[tokio::test]
    async fn should_be_idempotent_across_discovery_rounds() {
        let registry = Registry::default();
        registry.register_model(demo_model("virtual")).unwrap();
        registry
            .register_bridge(ScriptedBridge::exemplar("virtual", vec![lamp("001")]))
            .unwrap();

        registry.discover().await;
        registry.discover().await;

        assert_eq!(registry.things().len(), 1);
    }

    #[tokio::test]
    async fn should_emit_new_thing_event() {
        let registry = Registry::default();
        let mut events = registry.bus().subscribe();
        registry.register_model(demo_model("virtual")).unwrap();
        registry
            .register_bridge(ScriptedBridge::exemplar("virtual", vec![lamp("001")]))
            .unwrap();

        registry.discover().await;

        let mut saw_new_thing = false;
        while let Ok(Ok(event)) =
            timeout(Duration::from_millis(200), events.recv()).await
        {
            if matches!(event, EngineEvent::NewThing { .. }) {
                saw_new_thing = true;
                break;
            }
        }
        assert!(saw_new_thing);
    }

    #[tokio::test]
    async fn should_emit_ignored_when_no_model_matches() {
        let registry = Registry::default();
        let mut events = registry.bus().subscribe();
        registry
            .register_bridge(ScriptedBridge::exemplar("virtual", vec![lamp("001")]))
            .unwrap();

        registry.discover().await;

        assert!(registry.things().is_empty());
        let mut saw_ignored = false;
        while let Ok(Ok(event)) =
            timeout(Duration::from_millis(200), events.recv()).await
        {
            if matches!(event, EngineEvent::Ignored { .. }) {
                saw_ignored = true;
                break;
            }
        }
        assert!(saw_ignored);
    }

    #[tokio::test]
    async fn should_keep_reservation_for_unmatched_identity() {
        let registry = Registry::default();
        registry
            .register_bridge(ScriptedBridge::exemplar("virtual", vec![lamp("001")]))
            .unwrap();

        // no model registered yet: identity is reserved but nothing binds
        registry.discover().await;
        assert!(registry.things().is_empty());

        // the reservation holds even once a model appears; rediscovery
        // of the same identity is treated as a duplicate
        registry.register_model(demo_model("virtual")).unwrap();
        registry
            .register_bridge(ScriptedBridge::exemplar("virtual", vec![lamp("001")]))
            .unwrap();
        registry.discover().await;
        assert!(registry.things().is_empty());
    }

    #[tokio::test]
    async fn should_reject_bridge_without_driver_identity() {
        let registry = Registry::default();
        let result =
            registry.register_bridge(ScriptedBridge::exemplar("", Vec::new()));
        assert!(matches!(
            result,
            Err(TetherError::Validation(
                ValidationError::MissingDriverIdentity
            ))
        ));
    }

    #[tokio::test]
    async fn should_filter_exemplars_in_matching_discovery() {
        let registry = Registry::default();
        registry.register_model(demo_model("virtual")).unwrap();
        registry
            .register_bridge(ScriptedBridge::exemplar("virtual", vec![lamp("001")]))
            .unwrap();
        registry
            .register_bridge(ScriptedBridge::exemplar(
                "rest",
                vec![BridgeIdentity::for_driver("rest").with_field("iri", "http://x")],
            ))
            .unwrap();

        registry
            .discover_matching(&IdentityFilter::for_driver("rest"))
            .await;

        // the rest instance matched no model; the virtual exemplar was
        // never asked
        assert!(registry.things().is_empty());

        registry
            .discover_matching(&IdentityFilter::for_driver("virtual"))
            .await;
        assert_eq!(registry.things().len(), 1);
    }

    #[tokio::test]
    async fn should_discover_model_through_supporting_exemplar() {
        let registry = Registry::default();
        registry.register_model(demo_model("virtual")).unwrap();
        registry
            .register_bridge(ScriptedBridge::exemplar("virtual", vec![lamp("001")]))
            .unwrap();

        registry.discover_model("demo-light").await.unwrap();

        assert_eq!(registry.things().len(), 1);
    }

    #[tokio::test]
    async fn should_fail_targeted_discovery_for_unknown_model() {
        let registry = Registry::default();
        let result = registry.discover_model("missing").await;
        assert!(matches!(result, Err(TetherError::NotFound(_))));
    }

    #[tokio::test]
    async fn should_drop_duplicate_in_targeted_discovery() {
        let registry = Registry::default();
        registry.register_model(demo_model("virtual")).unwrap();
        registry
            .register_bridge(ScriptedBridge::exemplar(
                "virtual",
                vec![lamp("001"), lamp("001")],
            ))
            .unwrap();

        registry.discover_model("demo-light").await.unwrap();

        assert_eq!(registry.things().len(), 1);
    }

    #[tokio::test]
    async fn should_keep_first_model_registration_per_code() {
        let registry = Registry::default();
        registry.register_model(demo_model("virtual")).unwrap();
        // same code, different filter: ignored
        registry.register_model(demo_model("rest")).unwrap();
        registry
            .register_bridge(ScriptedBridge::exemplar("virtual", vec![lamp("001")]))
            .unwrap();

        registry.discover().await;
        assert_eq!(registry.things().len(), 1);
    }

    #[tokio::test]
    async fn should_remove_thing_and_emit_disconnected() {
        let registry = Registry::default();
        registry.register_model(demo_model("virtual")).unwrap();
        registry
            .register_bridge(ScriptedBridge::exemplar("virtual", vec![lamp("001")]))
            .unwrap();
        registry.discover().await;

        let key = lamp("001").thing_id();
        assert!(registry.thing(&key).is_some());

        let mut events = registry.bus().subscribe();
        registry.remove(&key).await;

        assert!(registry.thing(&key).is_none());
        let mut saw_disconnected = false;
        while let Ok(Ok(event)) =
            timeout(Duration::from_millis(200), events.recv()).await
        {
            if matches!(event, EngineEvent::Disconnected { .. }) {
                saw_disconnected = true;
                break;
            }
        }
        assert!(saw_disconnected);
    }

    #[tokio::test]
    async fn should_disconnect_all_things() {
        let registry = Registry::default();
        registry.register_model(demo_model("virtual")).unwrap();
        registry
            .register_bridge(ScriptedBridge::exemplar(
                "virtual",
                vec![lamp("001"), lamp("002")],
            ))
            .unwrap();
        registry.discover().await;
        assert_eq!(registry.things().len(), 2);

        registry.disconnect_all().await;
        assert!(registry.things().is_empty());
    }
}
