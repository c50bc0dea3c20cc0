//! The Thing — a transactional state store for one device.
//!
//! Owns per-attribute observed (hardware) and reported (caller intent)
//! values, resolved through the semantic resolver. Mutations run inside
//! explicit start/end brackets that batch validation, notification, and
//! push; outside a bracket each `set` flushes immediately.
//!
//! `Thing` is a cheap-clone handle; all clones share state. The handle
//! is not a synchronization primitive: a start/end bracket must not be
//! held across suspension points, and overlapping brackets fail with
//! [`InvariantError::NestedTransaction`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use tether_domain::band::{Band, CONNECTION_REACHABLE, META_THING_ID, META_UPDATED, StateMap};
use tether_domain::error::{InvariantError, NotFoundError, TetherError};
use tether_domain::event::EngineEvent;
use tether_domain::id::ThingId;
use tether_domain::model::ModelDescriptor;
use tether_domain::resolver::{AttrRef, Intent, resolve};
use tether_domain::time::now_rfc3339;
use tether_domain::validator::{Validation, ValidatorFn, ValidatorRegistry};
use tether_domain::value::AttributeValue;

use crate::binding::BridgeLink;
use crate::event_bus::EventBus;

/// Per-attribute change callback: `(code, current value)`.
pub type StateCallback = Arc<dyn Fn(&str, Option<&AttributeValue>) + Send + Sync>;
/// Thing-level change callback: the codes mutated in the flush.
pub type ChangeCallback = Arc<dyn Fn(&[String]) + Send + Sync>;
/// Metadata/reachability change callback.
pub type MetaCallback = Arc<dyn Fn() + Send + Sync>;

/// Flags batched over one start/end bracket.
#[derive(Debug, Clone, Copy)]
pub struct TransactionOptions {
    /// Run callbacks/events at `end`.
    pub notify: bool,
    /// Run validators on each `set`.
    pub validate: bool,
    /// Push mutated values to the bound adapter at `end`.
    pub push: bool,
    /// Apply mutations even when the value is unchanged.
    pub force: bool,
}

impl Default for TransactionOptions {
    /// Defaults for an explicit `start` bracket.
    fn default() -> Self {
        Self {
            notify: false,
            validate: true,
            push: true,
            force: true,
        }
    }
}

impl TransactionOptions {
    /// Defaults for `update`: notifying, non-forcing.
    #[must_use]
    pub fn update() -> Self {
        Self {
            notify: true,
            validate: true,
            push: true,
            force: false,
        }
    }

    /// Inbound adapter data: notify only, never validated, never
    /// pushed back.
    pub(crate) fn inbound() -> Self {
        Self {
            notify: true,
            validate: false,
            push: false,
            force: false,
        }
    }
}

struct Transaction {
    opts: TransactionOptions,
    band: Band,
    notifyd: BTreeSet<String>,
    pushd: BTreeSet<String>,
}

struct AttributeState {
    observed: Option<AttributeValue>,
    reported: Option<AttributeValue>,
    validator: Option<ValidatorFn>,
}

struct ThingState {
    descriptor: Arc<ModelDescriptor>,
    attributes: Vec<AttributeState>,
    meta: StateMap,
    connection: StateMap,
    transaction: Option<Transaction>,
    link: Option<BridgeLink>,
    identity: Option<ThingId>,
    state_callbacks: BTreeMap<String, Vec<StateCallback>>,
    any_callbacks: Vec<StateCallback>,
    change_callbacks: Vec<ChangeCallback>,
    meta_callbacks: Vec<MetaCallback>,
    bus: Option<EventBus>,
}

/// Side effects computed under the lock, applied outside it so
/// callbacks may call back into the Thing.
#[derive(Default)]
struct Effects {
    notify: Vec<(String, Option<AttributeValue>)>,
    push: Option<StateMap>,
    meta: bool,
}

impl Effects {
    fn is_empty(&self) -> bool {
        self.notify.is_empty() && self.push.is_none() && !self.meta
    }
}

/// Handle to one logical device instance.
#[derive(Clone)]
pub struct Thing {
    inner: Arc<Mutex<ThingState>>,
}

impl Thing {
    /// Build a Thing from its model descriptor, resolving named
    /// validators against the registry.
    ///
    /// An unknown validator name is a configuration error: logged, the
    /// attribute is left unvalidated.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::Validation`] when the descriptor is
    /// invalid.
    pub fn new(
        descriptor: Arc<ModelDescriptor>,
        validators: &ValidatorRegistry,
    ) -> Result<Self, TetherError> {
        descriptor.validate()?;
        let attributes = descriptor
            .attributes
            .iter()
            .map(|spec| AttributeState {
                observed: None,
                reported: None,
                validator: spec.validator.as_ref().and_then(|name| {
                    let found = validators.get(name);
                    if found.is_none() {
                        tracing::warn!(
                            model = %descriptor.code,
                            attribute = %spec.code,
                            validator = %name,
                            "unknown validator; attribute left unvalidated"
                        );
                    }
                    found
                }),
            })
            .collect();

        Ok(Self {
            inner: Arc::new(Mutex::new(ThingState {
                descriptor,
                attributes,
                meta: StateMap::new(),
                connection: StateMap::new(),
                transaction: None,
                link: None,
                identity: None,
                state_callbacks: BTreeMap::new(),
                any_callbacks: Vec::new(),
                change_callbacks: Vec::new(),
                meta_callbacks: Vec::new(),
                bus: None,
            })),
        })
    }

    /// The model type code.
    #[must_use]
    pub fn code(&self) -> String {
        self.lock().descriptor.code.clone()
    }

    /// The model descriptor this Thing was built from.
    #[must_use]
    pub fn descriptor(&self) -> Arc<ModelDescriptor> {
        Arc::clone(&self.lock().descriptor)
    }

    /// The composed identity; only defined once bound to a bridge.
    #[must_use]
    pub fn identity(&self) -> Option<ThingId> {
        self.lock().identity.clone()
    }

    /// Whether the bound device is reachable; false when unbound.
    #[must_use]
    pub fn reachable(&self) -> bool {
        self.lock()
            .connection
            .get(CONNECTION_REACHABLE)
            .is_some_and(AttributeValue::truthy)
    }

    /// Resolve `key` and return the current value: observed, else
    /// reported, else `None`.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::NotFound`] when the reference does not
    /// resolve.
    pub fn get(&self, key: &str) -> Result<Option<AttributeValue>, TetherError> {
        let state = self.lock();
        let Some(index) = resolve_index(&state, &AttrRef::parse(key), Intent::Get) else {
            tracing::warn!(model = %state.descriptor.code, key, "cannot resolve attribute");
            return Err(NotFoundError {
                kind: "Attribute",
                key: key.to_string(),
            }
            .into());
        };
        let attribute = &state.attributes[index];
        Ok(attribute.observed.clone().or_else(|| attribute.reported.clone()))
    }

    /// Set a desired value.
    ///
    /// Resolution failure logs and drops the mutation. Outside a
    /// bracket the mutation skips all side effects when the value
    /// equals the current reported value, otherwise it validates,
    /// notifies, and pushes immediately. Inside a bracket the
    /// transaction's flags apply and notify/push defer to `end`.
    pub fn set(&self, key: &str, value: impl Into<AttributeValue>) {
        let effects = {
            let mut state = self.lock();
            do_set(&mut state, key, value.into())
        };
        self.apply(effects);
    }

    /// Open a mutation bracket.
    ///
    /// # Errors
    ///
    /// Returns [`InvariantError::NestedTransaction`] when a bracket is
    /// already open; no side effects in that case.
    pub fn start(&self, opts: TransactionOptions) -> Result<(), TetherError> {
        let mut state = self.lock();
        open_transaction(&mut state, opts, Band::Ostate)
    }

    /// Close the bracket, flushing batched notifications, then at most
    /// one fan-in push. A no-op when no bracket is open.
    pub fn end(&self) {
        let effects = {
            let mut state = self.lock();
            match state.transaction.take() {
                Some(transaction) => flush(&state, &transaction),
                None => Effects::default(),
            }
        };
        self.apply(effects);
    }

    /// Set many desired values in one bracket with
    /// [`TransactionOptions::update`] semantics.
    ///
    /// # Errors
    ///
    /// Returns [`InvariantError::NestedTransaction`] when a bracket is
    /// already open.
    pub fn update(&self, values: &StateMap) -> Result<(), TetherError> {
        self.update_in_band(values, TransactionOptions::update(), Band::Ostate)
    }

    /// Set many desired values in one bracket with explicit options.
    ///
    /// # Errors
    ///
    /// Returns [`InvariantError::NestedTransaction`] when a bracket is
    /// already open.
    pub fn update_with(
        &self,
        values: &StateMap,
        opts: TransactionOptions,
    ) -> Result<(), TetherError> {
        self.update_in_band(values, opts, Band::Ostate)
    }

    /// Snapshot a band.
    #[must_use]
    pub fn state(&self, band: Band) -> StateMap {
        let state = self.lock();
        match band {
            Band::Istate => collect_values(&state, |attribute| attribute.observed.clone()),
            Band::Ostate => collect_values(&state, |attribute| attribute.reported.clone()),
            Band::Meta => state.meta.clone(),
            Band::Connection => state.connection.clone(),
            Band::Model => {
                let mut map = StateMap::new();
                map.insert(
                    "code".to_string(),
                    AttributeValue::from(state.descriptor.code.clone()),
                );
                if let Some(name) = &state.descriptor.name {
                    map.insert("name".to_string(), AttributeValue::from(name.clone()));
                }
                let codes: Vec<serde_json::Value> = state
                    .descriptor
                    .attributes
                    .iter()
                    .map(|spec| serde_json::Value::String(spec.code.clone()))
                    .collect();
                map.insert(
                    "attributes".to_string(),
                    AttributeValue::Json(serde_json::Value::Array(codes)),
                );
                map
            }
        }
    }

    /// Update one band.
    ///
    /// Ostate runs through `update`; istate through the inbound
    /// (notify-only) path; meta/connection merge and emit a meta
    /// change. The model band is read-only.
    ///
    /// # Errors
    ///
    /// Returns [`InvariantError::NestedTransaction`] when a bracket is
    /// already open and the band is istate/ostate.
    pub fn update_band(&self, band: Band, values: &StateMap) -> Result<(), TetherError> {
        match band {
            Band::Ostate => self.update(values),
            Band::Istate => self.update_in_band(values, TransactionOptions::inbound(), Band::Istate),
            Band::Meta | Band::Connection => {
                let effects = {
                    let mut state = self.lock();
                    let target = match band {
                        Band::Meta => &mut state.meta,
                        _ => &mut state.connection,
                    };
                    for (key, value) in values {
                        target.insert(key.clone(), value.clone());
                    }
                    target.insert(
                        META_UPDATED.to_string(),
                        AttributeValue::from(now_rfc3339()),
                    );
                    Effects {
                        meta: true,
                        ..Effects::default()
                    }
                };
                self.apply(effects);
                Ok(())
            }
            Band::Model => {
                tracing::warn!(model = %self.code(), "model band is read-only; update ignored");
                Ok(())
            }
        }
    }

    /// Ask the bound adapter to refresh its view; a no-op if unbound.
    pub fn pull(&self) {
        let link = self.lock().link.clone();
        match link {
            Some(link) => link.pull(),
            None => tracing::debug!(model = %self.code(), "pull ignored; unbound"),
        }
    }

    /// Register a per-attribute change callback.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::NotFound`] when the reference does not
    /// resolve; no callback is registered in that case.
    pub fn on<F>(&self, key: &str, callback: F) -> Result<(), TetherError>
    where
        F: Fn(&str, Option<&AttributeValue>) + Send + Sync + 'static,
    {
        let mut state = self.lock();
        let Some(index) = resolve_index(&state, &AttrRef::parse(key), Intent::Subscribe) else {
            tracing::warn!(model = %state.descriptor.code, key, "cannot resolve attribute");
            return Err(NotFoundError {
                kind: "Attribute",
                key: key.to_string(),
            }
            .into());
        };
        let code = state.descriptor.attributes[index].code.clone();
        state
            .state_callbacks
            .entry(code)
            .or_default()
            .push(Arc::new(callback));
        Ok(())
    }

    /// Register a wildcard callback, used for attributes with no
    /// per-code callbacks.
    pub fn on_any<F>(&self, callback: F)
    where
        F: Fn(&str, Option<&AttributeValue>) + Send + Sync + 'static,
    {
        self.lock().any_callbacks.push(Arc::new(callback));
    }

    /// Register a Thing-level change callback, run once per flush that
    /// mutated at least one attribute.
    pub fn on_change<F>(&self, callback: F)
    where
        F: Fn(&[String]) + Send + Sync + 'static,
    {
        self.lock().change_callbacks.push(Arc::new(callback));
    }

    /// Register a metadata/reachability change callback.
    pub fn on_meta<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.lock().meta_callbacks.push(Arc::new(callback));
    }

    /// Signal a metadata change to callbacks and the bus.
    pub fn meta_changed(&self) {
        self.apply(Effects {
            meta: true,
            ..Effects::default()
        });
    }

    /// Attach a bridge link, assigning the composed identity.
    pub(crate) fn bind_bridge(&self, link: BridgeLink, bus: EventBus) -> ThingId {
        let (thing_id, effects) = {
            let mut state = self.lock();
            let thing_id = ThingId::compose(&link.identity().thing_id(), &state.descriptor.code);
            state.identity = Some(thing_id.clone());
            state.meta.insert(
                META_THING_ID.to_string(),
                AttributeValue::from(thing_id.as_str()),
            );
            state
                .meta
                .insert(META_UPDATED.to_string(), AttributeValue::from(now_rfc3339()));
            state.connection.insert(
                CONNECTION_REACHABLE.to_string(),
                AttributeValue::Bool(link.reachable()),
            );
            state.link = Some(link);
            state.bus = Some(bus);
            (
                thing_id,
                Effects {
                    meta: true,
                    ..Effects::default()
                },
            )
        };
        self.apply(effects);
        thing_id
    }

    /// Detach the bridge link, marking the Thing unreachable. Returns
    /// the link so the caller can disconnect the bridge.
    pub(crate) fn unbind(&self) -> Option<BridgeLink> {
        let (link, effects) = {
            let mut state = self.lock();
            let link = state.link.take();
            if link.is_some() {
                state.connection.insert(
                    CONNECTION_REACHABLE.to_string(),
                    AttributeValue::Bool(false),
                );
            }
            (
                link,
                Effects {
                    meta: true,
                    ..Effects::default()
                },
            )
        };
        if link.is_some() {
            self.apply(effects);
        }
        link
    }

    fn update_in_band(
        &self,
        values: &StateMap,
        opts: TransactionOptions,
        band: Band,
    ) -> Result<(), TetherError> {
        let effects = {
            let mut state = self.lock();
            open_transaction(&mut state, opts, band)?;
            for (key, value) in values {
                let deferred = do_set(&mut state, key, value.clone());
                // every set inside a bracket defers its effects
                debug_assert!(deferred.is_empty());
            }
            match state.transaction.take() {
                Some(transaction) => flush(&state, &transaction),
                None => Effects::default(),
            }
        };
        self.apply(effects);
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ThingState> {
        self.inner.lock().expect("thing lock poisoned")
    }

    /// Run computed side effects outside the lock: per-attribute
    /// callbacks, the Thing-level change event, one fan-in push, then
    /// meta callbacks.
    fn apply(&self, effects: Effects) {
        if effects.is_empty() {
            return;
        }

        let (per_code, change_callbacks, meta_callbacks, link, bus, identity) = {
            let state = self.lock();
            let per_code: Vec<_> = effects
                .notify
                .iter()
                .map(|(code, value)| {
                    let callbacks = state
                        .state_callbacks
                        .get(code)
                        .filter(|callbacks| !callbacks.is_empty())
                        .cloned()
                        .unwrap_or_else(|| state.any_callbacks.clone());
                    (code.clone(), value.clone(), callbacks)
                })
                .collect();
            (
                per_code,
                state.change_callbacks.clone(),
                state.meta_callbacks.clone(),
                state.link.clone(),
                state.bus.clone(),
                state.identity.clone(),
            )
        };

        for (code, value, callbacks) in &per_code {
            for callback in callbacks {
                callback(code, value.as_ref());
            }
            if let (Some(bus), Some(thing_id)) = (&bus, &identity) {
                bus.publish(EngineEvent::State {
                    thing_id: thing_id.clone(),
                    code: code.clone(),
                    value: value.clone(),
                });
            }
        }

        if !per_code.is_empty() {
            let codes: Vec<String> = per_code.iter().map(|(code, ..)| code.clone()).collect();
            for callback in &change_callbacks {
                callback(&codes);
            }
        }

        if let Some(push) = effects.push {
            match &link {
                Some(link) => link.push(push),
                None => tracing::debug!("push skipped; unbound"),
            }
        }

        if effects.meta {
            for callback in &meta_callbacks {
                callback();
            }
            if let (Some(bus), Some(thing_id)) = (&bus, &identity) {
                bus.publish(EngineEvent::Meta {
                    thing_id: thing_id.clone(),
                });
            }
        }
    }
}

impl std::fmt::Debug for Thing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Thing")
            .field("code", &state.descriptor.code)
            .field("identity", &state.identity)
            .finish()
    }
}

fn open_transaction(
    state: &mut ThingState,
    opts: TransactionOptions,
    band: Band,
) -> Result<(), TetherError> {
    if state.transaction.is_some() {
        return Err(InvariantError::NestedTransaction.into());
    }
    state.transaction = Some(Transaction {
        opts,
        band,
        notifyd: BTreeSet::new(),
        pushd: BTreeSet::new(),
    });
    Ok(())
}

fn resolve_index(state: &ThingState, reference: &AttrRef, intent: Intent) -> Option<usize> {
    let spec = resolve(&state.descriptor.attributes, reference, intent)?;
    state
        .descriptor
        .attributes
        .iter()
        .position(|candidate| candidate.code == spec.code)
}

/// Resolve and write one mutation. Returns the immediate effects;
/// empty when deferred into an open transaction or dropped.
fn do_set(state: &mut ThingState, key: &str, value: AttributeValue) -> Effects {
    let Some(index) = resolve_index(state, &AttrRef::parse(key), Intent::Set) else {
        tracing::warn!(
            model = %state.descriptor.code,
            key,
            "attribute not found; mutation dropped"
        );
        return Effects::default();
    };
    set_at(state, index, value)
}

fn set_at(state: &mut ThingState, index: usize, value: AttributeValue) -> Effects {
    let code = state.descriptor.attributes[index].code.clone();
    let (band, validate, force, in_transaction) = match &state.transaction {
        Some(transaction) => (
            transaction.band,
            transaction.opts.validate,
            transaction.opts.force,
            true,
        ),
        None => (Band::Ostate, true, false, false),
    };

    let current = match band {
        Band::Istate => &state.attributes[index].observed,
        _ => &state.attributes[index].reported,
    };
    if !force && current.as_ref() == Some(&value) {
        return Effects::default();
    }

    // validators only guard the desired band
    let value = if validate && band == Band::Ostate {
        match state.attributes[index].validator.clone() {
            Some(validator) => {
                let mut validation = Validation {
                    code: code.clone(),
                    value: Some(value),
                };
                validator(&mut validation);
                match validation.value {
                    Some(replaced) => replaced,
                    None => {
                        tracing::debug!(attribute = %code, "validator discarded mutation");
                        return Effects::default();
                    }
                }
            }
            None => value,
        }
    } else {
        value
    };

    match band {
        Band::Istate => state.attributes[index].observed = Some(value),
        _ => state.attributes[index].reported = Some(value),
    }

    if in_transaction {
        if let Some(transaction) = state.transaction.as_mut() {
            transaction.notifyd.insert(code.clone());
            transaction.pushd.insert(code);
        }
        Effects::default()
    } else {
        let mut push = StateMap::new();
        if let Some(reported) = &state.attributes[index].reported {
            push.insert(code.clone(), reported.clone());
        }
        Effects {
            notify: vec![(code, effective_value(state, index))],
            push: Some(push),
            meta: false,
        }
    }
}

/// Build the flush effects for a closing transaction.
fn flush(state: &ThingState, transaction: &Transaction) -> Effects {
    let mut effects = Effects::default();

    if transaction.opts.notify {
        for code in &transaction.notifyd {
            if let Some(index) = index_of(state, code) {
                effects.notify.push((code.clone(), effective_value(state, index)));
            }
        }
    }

    if transaction.opts.push && !transaction.pushd.is_empty() {
        let mut push = StateMap::new();
        for code in &transaction.pushd {
            if let Some(index) = index_of(state, code)
                && let Some(reported) = &state.attributes[index].reported
            {
                push.insert(code.clone(), reported.clone());
            }
        }
        effects.push = Some(push);
    }

    effects
}

fn index_of(state: &ThingState, code: &str) -> Option<usize> {
    state
        .descriptor
        .attributes
        .iter()
        .position(|spec| spec.code == code)
}

/// Observed, else reported, else `None`.
fn effective_value(state: &ThingState, index: usize) -> Option<AttributeValue> {
    let attribute = &state.attributes[index];
    attribute.observed.clone().or_else(|| attribute.reported.clone())
}

fn collect_values<F>(state: &ThingState, pick: F) -> StateMap
where
    F: Fn(&AttributeState) -> Option<AttributeValue>,
{
    state
        .descriptor
        .attributes
        .iter()
        .zip(&state.attributes)
        .filter_map(|(spec, attribute)| pick(attribute).map(|value| (spec.code.clone(), value)))
        .collect()
}
