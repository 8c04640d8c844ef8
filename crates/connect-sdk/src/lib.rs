//! Wallet-side engine of a Liquid dApp connector.
//!
//! Pages ask for site access, addresses and spends over [`protocol`] frames;
//! the [`router::Router`] parks each sensitive request on the
//! [`approval::ApprovalBridge`] until the approval UI decides, then builds,
//! blinds, signs and finalizes through the [`identity`] traits.

pub mod approval;
pub mod assets;
pub mod authorization;
pub mod blinding;
pub mod builder;
pub mod chain;
pub mod credentials;
pub mod error;
pub mod identity;
pub mod kv;
pub mod network;
pub mod protocol;
pub mod pset;
pub mod reconcile;
pub mod repos;
pub mod restorer;
pub mod router;
pub mod signer;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod wallet;

pub use approval::{ApprovalBridge, ApprovalKind, ApprovalLauncher};
pub use assets::update_asset_infos;
pub use authorization::{AuthorizationStore, ConnectData, PendingTransaction};
pub use chain::{ChainSource, SkipOutpoint};
pub use credentials::EncryptedMnemonic;
pub use error::{Error, Result};
pub use identity::{
    IdentityProvider, SpendingIdentity, WalletIdentityProvider, WatchOnlyIdentity, create_wallet,
};
pub use kv::{KeyValueStore, MemoryStore, StoreError, Transform};
pub use network::Network;
pub use protocol::{Hello, Operation, RequestFrame, ResponseFrame};
pub use reconcile::update_utxos;
pub use repos::{AppRepository, AssetRepository, WalletRepository};
pub use router::{RequestContext, Router, RouterOptions};
pub use wallet::{AddressRecord, AssetInfo, Utxo, UtxoMap, WalletData, balances};

// Re-export LWK for the host crate
pub use lwk_wollet;
