//! Per-network site authorization and the pending-transaction slot.
//!
//! Everything here goes through [`Repository::update`], so concurrent requests
//! never lose each other's writes.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::approval::ApprovalKind;
use crate::error::{Error, Result};
use crate::kv::{KeyValueStore, Repository};
use crate::network::Network;

pub const CONNECT_KEY: &str = "connect";

/// A spend awaiting (or undergoing) user approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PendingTransaction {
    /// Raw PSET submitted by the page, base64.
    Pset { origin: String, pset: String },
    /// Wallet-built spend.
    Send {
        origin: String,
        recipient: String,
        amount: u64,
        asset: String,
    },
}

impl PendingTransaction {
    /// Approval whose response completes this record.
    pub fn kind(&self) -> ApprovalKind {
        match self {
            PendingTransaction::Pset { .. } => ApprovalKind::SignTransaction,
            PendingTransaction::Send { .. } => ApprovalKind::SendTransaction,
        }
    }

    pub fn origin(&self) -> &str {
        match self {
            PendingTransaction::Pset { origin, .. } | PendingTransaction::Send { origin, .. } => {
                origin
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectData {
    #[serde(default)]
    pub enabled_sites: Vec<String>,
    #[serde(default)]
    pub enable_site_pending: Option<String>,
    #[serde(default)]
    pub tx: Option<PendingTransaction>,
}

type ConnectByNetwork = BTreeMap<Network, ConnectData>;

#[derive(Clone)]
pub struct AuthorizationStore {
    repo: Repository<ConnectByNetwork>,
}

impl AuthorizationStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            repo: Repository::new(store, CONNECT_KEY),
        }
    }

    pub fn get(&self, network: Network) -> Result<ConnectData> {
        Ok(self.repo.get()?.remove(&network).unwrap_or_default())
    }

    fn modify<F>(&self, network: Network, f: F) -> Result<ConnectData>
    where
        F: FnOnce(&mut ConnectData) -> Result<()>,
    {
        let all = self.repo.update(|mut all| {
            f(all.entry(network).or_default())?;
            Ok(all)
        })?;
        Ok(all.get(&network).cloned().unwrap_or_default())
    }

    pub fn is_enabled(&self, network: Network, origin: &str) -> Result<bool> {
        Ok(self
            .get(network)?
            .enabled_sites
            .iter()
            .any(|site| site == origin))
    }

    /// Mark `origin` as awaiting an enable decision. A later request replaces
    /// an earlier one.
    pub fn set_pending(&self, network: Network, origin: &str) -> Result<()> {
        self.modify(network, |data| {
            data.enable_site_pending = Some(origin.to_string());
            Ok(())
        })?;
        Ok(())
    }

    /// Move the pending origin into the enabled set. Returns the origin.
    pub fn approve_pending(&self, network: Network) -> Result<String> {
        let mut approved = None;
        self.modify(network, |data| {
            let origin = data.enable_site_pending.take().ok_or_else(|| {
                Error::MissingPendingData("No pending site to enable".to_string())
            })?;
            if !data.enabled_sites.contains(&origin) {
                data.enabled_sites.push(origin.clone());
            }
            approved = Some(origin);
            Ok(())
        })?;
        approved.ok_or_else(|| Error::MissingPendingData("No pending site to enable".into()))
    }

    pub fn clear_pending(&self, network: Network) -> Result<()> {
        self.modify(network, |data| {
            data.enable_site_pending = None;
            Ok(())
        })?;
        Ok(())
    }

    /// Remove `origin` from the enabled set. Absent origins are a no-op.
    pub fn disable(&self, network: Network, origin: &str) -> Result<()> {
        self.modify(network, |data| {
            data.enabled_sites.retain(|site| site != origin);
            Ok(())
        })?;
        Ok(())
    }

    pub fn set_pending_tx(&self, network: Network, tx: PendingTransaction) -> Result<()> {
        self.modify(network, |data| {
            data.tx = Some(tx);
            Ok(())
        })?;
        Ok(())
    }

    pub fn pending_tx(&self, network: Network) -> Result<Option<PendingTransaction>> {
        Ok(self.get(network)?.tx)
    }

    pub fn clear_pending_tx(&self, network: Network) -> Result<()> {
        self.modify(network, |data| {
            data.tx = None;
            Ok(())
        })?;
        Ok(())
    }

    /// Remove the pending transaction if it belongs to `kind` and return it.
    /// A record of the other kind is left in place.
    pub fn take_pending_tx(
        &self,
        network: Network,
        kind: ApprovalKind,
    ) -> Result<Option<PendingTransaction>> {
        let mut taken = None;
        self.modify(network, |data| {
            if data.tx.as_ref().is_some_and(|tx| tx.kind() == kind) {
                taken = data.tx.take();
            }
            Ok(())
        })?;
        Ok(taken)
    }
}
