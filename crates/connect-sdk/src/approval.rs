//! Suspension of a page request until the approval UI reports a decision.
//!
//! Each [`ApprovalKind`] owns one slot. A request registers its waiter, opens
//! the UI, then parks until the matching `*_RESPONSE` handler calls
//! [`ApprovalBridge::decide`]. A second wait on an occupied slot is refused.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::protocol::Operation;

/// Outcome delivered to a waiting request: the produced encoding on success.
pub type Decision = std::result::Result<Option<String>, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApprovalKind {
    Enable,
    SignTransaction,
    SendTransaction,
}

impl ApprovalKind {
    /// Route of the approval screen inside the UI.
    pub fn route(self) -> &'static str {
        match self {
            ApprovalKind::Enable => "connect/enable",
            ApprovalKind::SignTransaction => "connect/spend-pset",
            ApprovalKind::SendTransaction => "connect/spend",
        }
    }

    /// Name of the operation whose decision resolves this slot.
    pub fn response_operation(self) -> Operation {
        match self {
            ApprovalKind::Enable => Operation::EnableResponse,
            ApprovalKind::SignTransaction => Operation::SignTransactionResponse,
            ApprovalKind::SendTransaction => Operation::SendTransactionResponse,
        }
    }
}

impl std::fmt::Display for ApprovalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.response_operation().name())
    }
}

/// Opens the approval UI at a route. Must not block on the user.
#[async_trait]
pub trait ApprovalLauncher: Send + Sync {
    async fn open(&self, route: &str) -> Result<()>;
}

struct Slot {
    generation: u64,
    tx: oneshot::Sender<Decision>,
}

pub struct ApprovalBridge {
    launcher: std::sync::Arc<dyn ApprovalLauncher>,
    slots: Mutex<HashMap<ApprovalKind, Slot>>,
    generation: AtomicU64,
    timeout: Option<Duration>,
}

impl ApprovalBridge {
    pub fn new(launcher: std::sync::Arc<dyn ApprovalLauncher>, timeout: Option<Duration>) -> Self {
        Self {
            launcher,
            slots: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            timeout,
        }
    }

    /// Register a waiter, open the UI and park until decided.
    pub async fn request(&self, kind: ApprovalKind) -> Result<Option<String>> {
        self.request_with(kind, || Ok(())).await
    }

    /// Like [`request`](Self::request), running `prepare` once the slot is
    /// claimed and before the UI opens. Nothing runs if the slot is taken.
    pub async fn request_with<F>(&self, kind: ApprovalKind, prepare: F) -> Result<Option<String>>
    where
        F: FnOnce() -> Result<()>,
    {
        let waiter = self.register(kind)?;
        prepare()?;
        self.launcher.open(kind.route()).await?;
        log::debug!("awaiting {kind} decision");
        waiter.wait(self.timeout).await
    }

    /// Claim the slot of `kind`. Fails when a wait is already outstanding.
    pub fn register(&self, kind: ApprovalKind) -> Result<Waiter<'_>> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| Error::Task("approval slots poisoned".into()))?;
        if let Some(slot) = slots.get(&kind) {
            if !slot.tx.is_closed() {
                return Err(Error::ApprovalPending(kind.to_string()));
            }
        }
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        slots.insert(kind, Slot { generation, tx });
        Ok(Waiter {
            bridge: self,
            kind,
            generation,
            rx,
        })
    }

    /// Resolve the waiter of `kind`. Returns `false` when nobody was waiting,
    /// in which case the decision is dropped.
    pub fn decide(&self, kind: ApprovalKind, decision: Decision) -> bool {
        let slot = match self.slots.lock() {
            Ok(mut slots) => slots.remove(&kind),
            Err(_) => None,
        };
        match slot {
            Some(slot) => slot.tx.send(decision).is_ok(),
            None => {
                log::debug!("dropping {kind} decision: no waiter");
                false
            }
        }
    }

    pub fn is_waiting(&self, kind: ApprovalKind) -> bool {
        self.slots
            .lock()
            .map(|slots| slots.get(&kind).is_some_and(|slot| !slot.tx.is_closed()))
            .unwrap_or(false)
    }

    fn release(&self, kind: ApprovalKind, generation: u64) {
        if let Ok(mut slots) = self.slots.lock() {
            if slots.get(&kind).is_some_and(|slot| slot.generation == generation) {
                slots.remove(&kind);
            }
        }
    }
}

/// A claimed slot. Dropping it frees the slot.
pub struct Waiter<'a> {
    bridge: &'a ApprovalBridge,
    kind: ApprovalKind,
    generation: u64,
    rx: oneshot::Receiver<Decision>,
}

impl Waiter<'_> {
    pub async fn wait(mut self, timeout: Option<Duration>) -> Result<Option<String>> {
        let kind = self.kind;
        let received = match timeout {
            Some(limit) => tokio::time::timeout(limit, &mut self.rx)
                .await
                .map_err(|_| Error::ApprovalTimeout(kind.to_string()))?,
            None => (&mut self.rx).await,
        };
        received.map_err(|_| Error::ApprovalAbandoned(kind.to_string()))?
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        self.bridge.release(self.kind, self.generation);
    }
}
