//! Fakes and fixtures for exercising the engine without a chain, a UI or a
//! real mnemonic.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use lwk_wollet::elements::confidential::{Asset, Nonce, Value as ConfValue};
use lwk_wollet::elements::hashes::Hash;
use lwk_wollet::elements::pset::PartiallySignedTransaction;
use lwk_wollet::elements::secp256k1_zkp::{PublicKey, Secp256k1, SecretKey};
use lwk_wollet::elements::{Address, AssetId, Script, Transaction, TxOut, TxOutWitness, Txid};

use crate::approval::ApprovalLauncher;
use crate::chain::{ChainSource, SkipOutpoint};
use crate::credentials::EncryptedMnemonic;
use crate::error::{Error, Result};
use crate::identity::{IdentityProvider, SpendingIdentity, WatchOnlyIdentity};
use crate::network::Network;
use crate::pset::encode_txout;
use crate::restorer::{EXTERNAL_CHAIN, INTERNAL_CHAIN, RestorerState};
use crate::wallet::{AddressRecord, AssetInfo, Utxo, UtxoMap, WalletData};

/// Deterministic confidential P2WPKH address. `seed` must be non-zero.
pub fn confidential_address(network: Network, seed: u8) -> Address {
    let secp = Secp256k1::new();
    let spend = SecretKey::from_slice(&[seed; 32]).expect("valid key");
    let blind = SecretKey::from_slice(&[seed.wrapping_add(100).max(1); 32]).expect("valid key");
    let public_key =
        lwk_wollet::elements::bitcoin::PublicKey::new(PublicKey::from_secret_key(&secp, &spend));
    Address::p2wpkh(
        &public_key,
        Some(PublicKey::from_secret_key(&secp, &blind)),
        network.address_params(),
    )
}

/// Explicit output paying `script_pubkey`.
pub fn explicit_txout(asset: AssetId, value: u64, script_pubkey: Script) -> TxOut {
    TxOut {
        asset: Asset::Explicit(asset),
        value: ConfValue::Explicit(value),
        nonce: Nonce::Null,
        script_pubkey,
        witness: TxOutWitness::default(),
    }
}

/// Unblinded, explicit wallet UTXO with txid `[n; 32]`, paying `script_pubkey`.
pub fn explicit_utxo_to(
    n: u8,
    vout: u32,
    asset: AssetId,
    value: u64,
    script_pubkey: Script,
) -> Utxo {
    Utxo {
        txid: Txid::from_byte_array([n; 32]).to_string(),
        vout,
        asset: Some(asset.to_string()),
        value: Some(value),
        blinding: None,
        prevout: Some(encode_txout(&explicit_txout(asset, value, script_pubkey))),
    }
}

/// Like [`explicit_utxo_to`] with a throwaway script.
pub fn explicit_utxo(network: Network, n: u8, vout: u32, asset: AssetId, value: u64) -> Utxo {
    explicit_utxo_to(
        n,
        vout,
        asset,
        value,
        confidential_address(network, 200).script_pubkey(),
    )
}

/// Wallet record without keys, for store-level tests.
pub fn empty_wallet() -> WalletData {
    WalletData {
        encrypted_mnemonic: EncryptedMnemonic {
            salt: String::new(),
            nonce: String::new(),
            ciphertext: String::new(),
        },
        master_xpub: String::new(),
        master_blinding_key: String::new(),
        confidential_addresses: Vec::new(),
        utxo_map: UtxoMap::new(),
    }
}

/// Launcher that records every opened route.
#[derive(Default)]
pub struct RecordingLauncher {
    routes: Mutex<Vec<String>>,
}

impl RecordingLauncher {
    pub fn routes(&self) -> Vec<String> {
        self.routes.lock().expect("launcher lock").clone()
    }
}

#[async_trait]
impl ApprovalLauncher for RecordingLauncher {
    async fn open(&self, route: &str) -> Result<()> {
        self.routes.lock().expect("launcher lock").push(route.to_string());
        Ok(())
    }
}

/// Chain source serving a fixed UTXO list and asset table.
#[derive(Default)]
pub struct StaticChainSource {
    utxos: Mutex<Vec<Utxo>>,
    assets: BTreeMap<String, AssetInfo>,
    asset_lookups: Mutex<Vec<String>>,
}

impl StaticChainSource {
    pub fn new(utxos: Vec<Utxo>) -> Self {
        Self {
            utxos: Mutex::new(utxos),
            ..Default::default()
        }
    }

    pub fn with_asset(mut self, asset: &str, info: AssetInfo) -> Self {
        self.assets.insert(asset.to_string(), info);
        self
    }

    pub fn set_utxos(&self, utxos: Vec<Utxo>) {
        *self.utxos.lock().expect("chain lock") = utxos;
    }

    pub fn asset_lookups(&self) -> Vec<String> {
        self.asset_lookups.lock().expect("chain lock").clone()
    }
}

#[async_trait]
impl ChainSource for StaticChainSource {
    async fn fetch_utxos(
        &self,
        _network: Network,
        _addresses: &[AddressRecord],
        skip: &SkipOutpoint<'_>,
    ) -> Result<Vec<Utxo>> {
        let utxos = self.utxos.lock().expect("chain lock").clone();
        Ok(utxos
            .into_iter()
            .map(|utxo| {
                if skip(&utxo.outpoint()) {
                    Utxo {
                        asset: None,
                        value: None,
                        blinding: None,
                        prevout: None,
                        ..utxo
                    }
                } else {
                    utxo
                }
            })
            .collect())
    }

    async fn fetch_asset_info(&self, _network: Network, asset: &str) -> Result<AssetInfo> {
        self.asset_lookups
            .lock()
            .expect("chain lock")
            .push(asset.to_string());
        self.assets
            .get(asset)
            .cloned()
            .ok_or_else(|| Error::Chain(format!("unknown asset {asset}")))
    }
}

/// Identity provider with deterministic addresses and a plain-text password.
pub struct FakeIdentityProvider {
    pub password: String,
    /// When set, signature validation reports failure.
    pub invalid_signatures: bool,
}

impl FakeIdentityProvider {
    pub fn new(password: &str) -> Self {
        Self {
            password: password.to_string(),
            invalid_signatures: false,
        }
    }
}

struct FakeWatchOnly {
    network: Network,
    addresses: Vec<AddressRecord>,
}

impl FakeWatchOnly {
    fn next_on(&self, chain: u32) -> Result<AddressRecord> {
        let index = RestorerState::from_addresses(&self.addresses).next_index(chain);
        let seed = u8::try_from(1 + chain * 100 + index)
            .map_err(|_| Error::Identity("fake identity exhausted".into()))?;
        Ok(AddressRecord {
            confidential_address: confidential_address(self.network, seed).to_string(),
            derivation_path: Some(format!("m/84'/1'/0'/{chain}/{index}")),
            blinding_private_key: None,
        })
    }
}

impl WatchOnlyIdentity for FakeWatchOnly {
    fn addresses(&self) -> Result<Vec<AddressRecord>> {
        Ok(self.addresses.clone())
    }

    fn next_address(&self) -> Result<AddressRecord> {
        self.next_on(EXTERNAL_CHAIN)
    }

    fn next_change_address(&self) -> Result<AddressRecord> {
        self.next_on(INTERNAL_CHAIN)
    }
}

struct FakeSpending {
    invalid_signatures: bool,
}

impl SpendingIdentity for FakeSpending {
    fn blind_pset(
        &self,
        _pset: &mut PartiallySignedTransaction,
        _indices: &[usize],
        _keys: &BTreeMap<usize, PublicKey>,
    ) -> Result<()> {
        Ok(())
    }

    fn sign_pset(&self, pset: &mut PartiallySignedTransaction) -> Result<u32> {
        Ok(pset.inputs().len() as u32)
    }

    fn validate_signatures(&self, _pset: &PartiallySignedTransaction) -> Result<bool> {
        Ok(!self.invalid_signatures)
    }

    fn finalize(&self, pset: PartiallySignedTransaction) -> Result<Transaction> {
        pset.extract_tx().map_err(|e| Error::Finalize(e.to_string()))
    }
}

impl IdentityProvider for FakeIdentityProvider {
    fn watch_only(
        &self,
        wallet: &WalletData,
        network: Network,
    ) -> Result<Box<dyn WatchOnlyIdentity>> {
        Ok(Box::new(FakeWatchOnly {
            network,
            addresses: wallet.confidential_addresses.clone(),
        }))
    }

    fn spending(
        &self,
        _wallet: &WalletData,
        _network: Network,
        password: &str,
    ) -> Result<Box<dyn SpendingIdentity>> {
        if password != self.password {
            return Err(Error::InvalidCredential);
        }
        Ok(Box::new(FakeSpending {
            invalid_signatures: self.invalid_signatures,
        }))
    }
}
