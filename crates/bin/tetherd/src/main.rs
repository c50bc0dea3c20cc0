//! # tetherd — tether daemon
//!
//! Composition root that wires the engine together and runs it.
//!
//! ## Responsibilities
//! - Parse configuration (TOML file, env vars)
//! - Construct the registry, validators, and event bus
//! - Register model descriptors (from config, or the built-in demo)
//! - Register enabled bridge adapters
//! - Run auto-discovery once setup completes
//! - Log engine events
//! - Handle graceful shutdown (SIGINT)
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer — no engine logic belongs here.

mod config;

use tether_adapter_virtual::{VirtualBridge, VirtualConfig};
use tether_app::ready::ReadyGate;
use tether_app::registry::Registry;
use tether_domain::attribute::{AttributeSpec, ROLE_CONTROL, ROLE_READING};
use tether_domain::event::EngineEvent;
use tether_domain::identity::IdentityFilter;
use tether_domain::model::ModelDescriptor;

use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&config.logging.filter))
        .init();

    let registry = Registry::default();
    let gate = ReadyGate::new();

    gate.delta("models", 1);
    let models = if config.models.is_empty() {
        vec![demo_model()?]
    } else {
        config.models.clone()
    };
    for descriptor in models {
        let code = descriptor.code.clone();
        if let Err(err) = registry.register_model(descriptor) {
            tracing::warn!(code = %code, error = %err, "model registration failed");
        }
    }
    gate.delta("models", -1);

    gate.delta("bridges", 1);
    if config.virtual_devices.enabled {
        let exemplar = VirtualBridge::exemplar(VirtualConfig {
            count: config.virtual_devices.count,
        });
        if let Err(err) = registry.register_bridge(exemplar) {
            tracing::warn!(error = %err, "virtual adapter registration failed");
        }
    }
    gate.delta("bridges", -1);

    gate.wait_ready().await;

    spawn_event_logger(&registry);

    if config.discovery.auto {
        registry.discover().await;
    }

    tracing::info!(things = registry.things().len(), "tetherd running");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    registry.disconnect_all().await;

    Ok(())
}

/// Built-in demo model bound to the virtual adapter: a dimmable light.
fn demo_model() -> anyhow::Result<ModelDescriptor> {
    let descriptor = ModelDescriptor::builder("demo-light")
        .name("Demo Light")
        .attribute(
            AttributeSpec::builder("on")
                .purpose("on")
                .role(ROLE_READING)
                .role(ROLE_CONTROL)
                .validator("boolean")
                .build()?,
        )
        .attribute(
            AttributeSpec::builder("brightness")
                .purpose("level")
                .role(ROLE_READING)
                .role(ROLE_CONTROL)
                .validator("percent")
                .build()?,
        )
        .bridge_filter(IdentityFilter::for_driver(tether_adapter_virtual::DRIVER))
        .build()?;
    Ok(descriptor)
}

/// Forward engine events to the log.
fn spawn_event_logger(registry: &Registry) {
    let mut events = registry.bus().subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(EngineEvent::NewThing { thing_id }) => {
                    tracing::info!(%thing_id, "new thing");
                }
                Ok(EngineEvent::Discovered { identity }) => {
                    tracing::debug!(%identity, "discovered");
                }
                Ok(EngineEvent::Ignored { identity }) => {
                    tracing::debug!(%identity, "ignored");
                }
                Ok(EngineEvent::Disconnected { thing_id }) => {
                    tracing::info!(%thing_id, "disconnected");
                }
                Ok(EngineEvent::State {
                    thing_id,
                    code,
                    value,
                }) => {
                    tracing::debug!(%thing_id, code, ?value, "state changed");
                }
                Ok(EngineEvent::Meta { thing_id }) => {
                    tracing::debug!(%thing_id, "meta changed");
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event logger lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
