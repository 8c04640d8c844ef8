//! Wallet identities: the capability objects that derive addresses and
//! blind, sign and finalize PSETs.
//!
//! The engine only talks to the traits below. [`WalletIdentityProvider`] is
//! the software implementation backed by the stored account xpub (watch-only)
//! and the decrypted mnemonic (spending).

mod mnemonic;
mod watch_only;

use std::collections::BTreeMap;

use lwk_wollet::elements::Transaction;
use lwk_wollet::elements::pset::PartiallySignedTransaction;
use lwk_wollet::elements::secp256k1_zkp::PublicKey;

use crate::error::Result;
use crate::network::Network;
use crate::wallet::{AddressRecord, WalletData};

pub use mnemonic::{MnemonicIdentity, create_wallet};
pub use watch_only::XpubIdentity;

pub trait WatchOnlyIdentity: Send {
    /// Every address derived so far.
    fn addresses(&self) -> Result<Vec<AddressRecord>>;

    /// Next unused receive address. Not persisted by the identity.
    fn next_address(&self) -> Result<AddressRecord>;

    /// Next unused change address. Not persisted by the identity.
    fn next_change_address(&self) -> Result<AddressRecord>;
}

pub trait SpendingIdentity: Send {
    /// Blind the outputs at `indices`. Outputs present in `keys` use that
    /// blinding key; the rest use the wallet's own key for their script.
    fn blind_pset(
        &self,
        pset: &mut PartiallySignedTransaction,
        indices: &[usize],
        keys: &BTreeMap<usize, PublicKey>,
    ) -> Result<()>;

    /// Sign every input owned by the wallet. Returns the number of
    /// signatures added.
    fn sign_pset(&self, pset: &mut PartiallySignedTransaction) -> Result<u32>;

    /// `true` iff every input carries at least one signature and all
    /// signatures verify.
    fn validate_signatures(&self, pset: &PartiallySignedTransaction) -> Result<bool>;

    fn finalize(&self, pset: PartiallySignedTransaction) -> Result<Transaction>;
}

pub trait IdentityProvider: Send + Sync {
    fn watch_only(&self, wallet: &WalletData, network: Network)
    -> Result<Box<dyn WatchOnlyIdentity>>;

    /// Unlock the wallet with `password`. A wrong password yields
    /// [`crate::Error::InvalidCredential`].
    fn spending(
        &self,
        wallet: &WalletData,
        network: Network,
        password: &str,
    ) -> Result<Box<dyn SpendingIdentity>>;
}

/// Software identities derived from the stored wallet record.
#[derive(Debug, Clone, Copy, Default)]
pub struct WalletIdentityProvider;

impl IdentityProvider for WalletIdentityProvider {
    fn watch_only(
        &self,
        wallet: &WalletData,
        network: Network,
    ) -> Result<Box<dyn WatchOnlyIdentity>> {
        Ok(Box::new(XpubIdentity::from_wallet(wallet, network)?))
    }

    fn spending(
        &self,
        wallet: &WalletData,
        network: Network,
        password: &str,
    ) -> Result<Box<dyn SpendingIdentity>> {
        let mnemonic = wallet.encrypted_mnemonic.open(password)?;
        Ok(Box::new(MnemonicIdentity::new(&mnemonic, wallet, network)?))
    }
}
