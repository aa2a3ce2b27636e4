//! The capability interface an accessory implementation supplies.
//!
//! Instead of subclassing, an accessory author implements
//! [`AccessoryHandler`] and attaches it with `Accessory::set_handler`. The
//! runtime calls into the handler for identify routines, read/write hooks
//! and lifecycle events. Callbacks are async; synchronous work simply runs
//! inline on the session scheduler.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

/// A server-originated value change flowing from an accessory to the
/// runtime, which applies it to the tree and fans it out to subscribers.
#[derive(Debug, Clone)]
pub struct ValueUpdate {
    pub aid: u64,
    pub iid: u64,
    pub value: Value,
}

/// Handle given to an accessory when it starts.
///
/// The handle is cheap to clone and can be moved into tasks the accessory
/// spawns for periodic work.
#[derive(Debug, Clone)]
pub struct AccessoryContext {
    aid: u64,
    updates: mpsc::UnboundedSender<ValueUpdate>,
    shutdown: watch::Receiver<bool>,
}

impl AccessoryContext {
    pub fn new(
        aid: u64,
        updates: mpsc::UnboundedSender<ValueUpdate>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            aid,
            updates,
            shutdown,
        }
    }

    /// AID of the accessory this context belongs to.
    pub fn aid(&self) -> u64 {
        self.aid
    }

    /// Push a server-originated value change. Subscribed sessions are
    /// notified; the value is clamped to the characteristic constraints.
    pub fn set_value(&self, iid: u64, value: Value) {
        let _ = self.updates.send(ValueUpdate {
            aid: self.aid,
            iid,
            value,
        });
    }

    /// Receiver that flips to `true` when the server shuts down. Periodic
    /// tasks select on this alongside their tick interval.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.clone()
    }
}

/// Behavior an accessory implementation plugs into the runtime.
///
/// All methods have no-op defaults so simple accessories only implement
/// what they need.
#[async_trait]
pub trait AccessoryHandler: Send + Sync {
    /// Called for the `Identify` routine (unpaired `POST /identify` or a
    /// write to the Identify characteristic).
    async fn identify(&self) {}

    /// Read hook: return `Some` to refresh the stored value before it is
    /// reported to the controller.
    async fn on_value_get(&self, _iid: u64) -> Option<Value> {
        None
    }

    /// Write hook, invoked after a controller write has been coerced and
    /// committed.
    async fn on_value_set(&self, _iid: u64, _value: &Value) {}

    /// Called once when the server starts. Spawn periodic work here using
    /// the context's shutdown signal.
    async fn on_start(&self, _ctx: AccessoryContext) {}

    /// Called once during server shutdown.
    async fn on_stop(&self) {}

    /// Camera snapshot hook for `POST /resource`; `None` means the
    /// accessory cannot produce snapshots.
    async fn snapshot(&self, _width: u32, _height: u32) -> Option<Vec<u8>> {
        None
    }
}
