//! MeshCore to MQTT relay.
//!
//! Reads hex-framed packets from a companion radio's serial console, decodes
//! them with [`meshcore_wire`] and publishes JSON envelopes to an MQTT
//! broker. Both links are independently enabled, reconnected and
//! reconfigured at runtime by the [`relay::Relay`] loop.

pub mod channel;
pub mod config;
pub mod envelope;
pub mod pipeline;
pub mod relay;
pub mod state;
pub mod stats;
