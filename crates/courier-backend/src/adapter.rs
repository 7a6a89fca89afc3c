//! Adapter capabilities consumed by the core (spec §6)
//!
//! Each channel type registers a handler exposing these hooks. The
//! core invokes them on tasks it owns; implementations must be
//! concurrency-safe (`Send + Sync`).

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Channel, ChannelLog, Msg, MsgStatus, Urn};

/// Capability an adapter may expose to describe a new URN's owner
/// (e.g. fetch a display name from the vendor's API) before a contact
/// is created for it.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn channel_type(&self) -> &'static str;

    /// Register HTTP routes on the shared mux. Out of scope for the
    /// core's own HTTP surface (spec §1); adapters own their webhook
    /// routes entirely.
    fn initialize(&self) {}

    /// Render and dispatch `msg`, returning the status to persist.
    /// Exchanges and errors are appended to `clog` as they happen.
    async fn send(&self, msg: &Msg, clog: &mut ChannelLog) -> Result<MsgStatus>;

    /// Optional: ask the vendor for attributes describing a URN's
    /// owner (e.g. a WhatsApp profile name) before contact creation.
    async fn describe_urn(&self, _channel: &Channel, _urn: &Urn, _clog: &mut ChannelLog) -> Option<String> {
        None
    }

    /// Optional: build an authenticated request to fetch channel-hosted
    /// media. Default clients fetch the URL unauthenticated.
    fn build_attachment_request(&self, _channel: &Channel, url: &str) -> String {
        url.to_string()
    }

    /// Optional: strings (tokens, secrets) to redact from channel logs
    /// before they are persisted.
    fn redact_values(&self, _channel: &Channel) -> Vec<String> {
        Vec::new()
    }
}
