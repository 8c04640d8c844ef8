use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::credentials::EncryptedMnemonic;
use crate::network::Network;

/// Store key of the wallet record.
pub const WALLET_KEY: &str = "wallet";
/// Store key of the per-network asset-info cache.
pub const ASSETS_KEY: &str = "assets";
/// Store key of the application record (current network).
pub const APP_KEY: &str = "app";

/// UTXO set keyed by `txid:vout`. Iteration order is the key order, which
/// makes coin selection deterministic.
pub type UtxoMap = BTreeMap<String, Utxo>;

/// Blinding factors revealed when an output was unblinded (hex encoded).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlindingData {
    pub asset_blinding_factor: String,
    pub value_blinding_factor: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    /// Asset id hex; absent while the output is still blinded.
    pub asset: Option<String>,
    /// Value in satoshis; absent while the output is still blinded.
    pub value: Option<u64>,
    pub blinding: Option<BlindingData>,
    /// Consensus-encoded previous `TxOut` (hex), used as PSET witness UTXO.
    pub prevout: Option<String>,
}

impl Utxo {
    pub fn outpoint(&self) -> String {
        outpoint_key(&self.txid, self.vout)
    }

    pub fn is_blinded(&self) -> bool {
        self.asset.is_none() || self.value.is_none()
    }
}

pub fn outpoint_key(txid: &str, vout: u32) -> String {
    format!("{txid}:{vout}")
}

/// A derived wallet address as persisted in the wallet record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressRecord {
    pub confidential_address: String,
    /// Full BIP32 path, e.g. `m/84'/1'/0'/1/3`.
    pub derivation_path: Option<String>,
    /// Hex secret key able to unblind outputs sent to this address.
    pub blinding_private_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletData {
    pub encrypted_mnemonic: EncryptedMnemonic,
    /// Account-level extended public key.
    pub master_xpub: String,
    /// SLIP-77 master blinding key (hex).
    pub master_blinding_key: String,
    #[serde(default)]
    pub confidential_addresses: Vec<AddressRecord>,
    #[serde(default)]
    pub utxo_map: UtxoMap,
}

impl WalletData {
    /// Add an address unless it is already known. Returns whether it was new.
    pub fn add_address(&mut self, address: AddressRecord) -> bool {
        if self
            .confidential_addresses
            .iter()
            .any(|a| a.confidential_address == address.confidential_address)
        {
            return false;
        }
        self.confidential_addresses.push(address);
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetInfo {
    pub name: String,
    pub ticker: String,
    pub precision: u8,
}

/// Asset metadata cache: network → asset id → info.
pub type AssetsByNetwork = BTreeMap<Network, BTreeMap<String, AssetInfo>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppData {
    pub network: Network,
}

impl Default for AppData {
    fn default() -> Self {
        Self {
            network: Network::Liquid,
        }
    }
}

/// Per-asset balance of every unblinded UTXO. The policy asset is always
/// present, with zero when the wallet holds none.
pub fn balances<'a>(
    utxos: impl IntoIterator<Item = &'a Utxo>,
    network: Network,
) -> BTreeMap<String, u64> {
    let mut balances: BTreeMap<String, u64> = BTreeMap::new();
    for utxo in utxos {
        if let (Some(asset), Some(value)) = (&utxo.asset, utxo.value) {
            let entry = balances.entry(asset.clone()).or_default();
            *entry = entry.saturating_add(value);
        }
    }
    balances
        .entry(network.policy_asset().to_string())
        .or_insert(0);
    balances
}
