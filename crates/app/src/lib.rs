//! # tether-app
//!
//! Engine layer — the transactional state store, the binding
//! coordinator, the per-adapter serializing queue, and the **port
//! definitions** (traits) adapters implement.
//!
//! ## Responsibilities
//! - Define the [`Bridge`](ports::bridge::Bridge) port that protocol
//!   adapters implement (driven/outbound port)
//! - Own [`Thing`](thing::Thing) — attribute values behind explicit
//!   start/end mutation brackets batching validation, notification, and
//!   push
//! - Own the [`Registry`](registry::Registry) — discovery, identity
//!   reservation, and exactly-once Thing ↔ Bridge binding
//! - Serialize adapter I/O through [`SerialQueue`](queue::SerialQueue)
//! - Provide in-process infrastructure (event bus, readiness gate)
//!
//! ## Dependency rule
//! Depends on `tether-domain` only (plus `tokio::sync` for channels).
//! Never imports adapter crates. Adapters depend on *this* crate, not
//! the reverse.

pub mod binding;
pub mod event_bus;
pub mod ports;
pub mod queue;
pub mod ready;
pub mod registry;
pub mod thing;
