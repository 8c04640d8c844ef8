use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use connect_sdk::chain::{ChainSource, SkipOutpoint};
use lwk_wollet::elements::confidential::{Asset, Value};
use lwk_wollet::elements::secp256k1_zkp::{Secp256k1, SecretKey};
use lwk_wollet::elements::{Address, Script, Transaction, TxOut};
use connect_sdk::pset::encode_txout;
use connect_sdk::wallet::BlindingData;
use connect_sdk::{AddressRecord, AssetInfo, Network, Utxo};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::AppConfig;

const HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ChainAdapterError {
    #[error("electrum error: {0}")]
    Electrum(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("task error: {0}")]
    Task(String),
}

impl From<ChainAdapterError> for connect_sdk::Error {
    fn from(e: ChainAdapterError) -> Self {
        connect_sdk::Error::Chain(e.to_string())
    }
}

/// Endpoints of one network.
#[derive(Debug, Clone)]
struct Endpoints {
    electrum_url: String,
    esplora_url: String,
}

/// One `listunspent` entry, tied back to the address it was found on.
#[derive(Debug, Clone)]
struct Listed {
    txid: String,
    vout: u32,
    address: usize,
}

/// [`ChainSource`] over Electrum (UTXOs, transactions) and Esplora REST
/// (asset metadata).
pub struct ElectrumChainAdapter {
    endpoints: BTreeMap<Network, Endpoints>,
    http: reqwest::Client,
}

impl ElectrumChainAdapter {
    pub fn new(config: &AppConfig) -> Result<Self, ChainAdapterError> {
        let endpoints = Network::ALL
            .into_iter()
            .map(|network| {
                (
                    network,
                    Endpoints {
                        electrum_url: config.electrum_url(network),
                        esplora_url: config.esplora_url(network),
                    },
                )
            })
            .collect();
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self { endpoints, http })
    }

    fn endpoints(&self, network: Network) -> Result<&Endpoints, ChainAdapterError> {
        self.endpoints
            .get(&network)
            .ok_or_else(|| ChainAdapterError::Parse(format!("no endpoints for {network}")))
    }

    fn script_hash_hex(script_pubkey: &[u8]) -> String {
        let mut hash = Sha256::digest(script_pubkey).to_vec();
        hash.reverse();
        hex::encode(&hash)
    }
}

fn client(electrum_url: &str) -> Result<electrum_client::Client, ChainAdapterError> {
    electrum_client::Client::new(electrum_url).map_err(|e| ChainAdapterError::Electrum(e.to_string()))
}

/// Unspent outputs of every script, in script order.
fn list_unspent(electrum_url: &str, scripts: &[Script]) -> Result<Vec<Listed>, ChainAdapterError> {
    use electrum_client::ElectrumApi;

    let client = client(electrum_url)?;
    let mut results = Vec::new();
    for (address, script) in scripts.iter().enumerate() {
        let resp = client
            .raw_call(
                "blockchain.scripthash.listunspent",
                [electrum_client::Param::String(
                    ElectrumChainAdapter::script_hash_hex(script.as_bytes()),
                )],
            )
            .map_err(|e| ChainAdapterError::Electrum(e.to_string()))?;

        let entries = resp
            .as_array()
            .ok_or_else(|| ChainAdapterError::Parse("expected array response".into()))?;
        for entry in entries {
            let txid = entry["tx_hash"]
                .as_str()
                .ok_or_else(|| ChainAdapterError::Parse("missing tx_hash".into()))?;
            let vout = entry["tx_pos"]
                .as_u64()
                .and_then(|pos| u32::try_from(pos).ok())
                .ok_or_else(|| ChainAdapterError::Parse("missing tx_pos".into()))?;
            results.push(Listed {
                txid: txid.to_string(),
                vout,
                address,
            });
        }
    }
    Ok(results)
}

fn get_transaction(
    client: &electrum_client::Client,
    txid: &str,
) -> Result<Transaction, ChainAdapterError> {
    use electrum_client::ElectrumApi;

    let resp = client
        .raw_call(
            "blockchain.transaction.get",
            [electrum_client::Param::String(txid.to_string())],
        )
        .map_err(|e| ChainAdapterError::Electrum(e.to_string()))?;
    let hex_str = resp
        .as_str()
        .ok_or_else(|| ChainAdapterError::Parse("expected string response".into()))?;
    let bytes =
        hex::decode(hex_str).map_err(|e| ChainAdapterError::Parse(format!("hex decode: {e}")))?;
    lwk_wollet::elements::encode::deserialize(&bytes)
        .map_err(|e| ChainAdapterError::Parse(format!("tx deserialize: {e}")))
}

/// Fetch and unblind each `(entry, blinding key)`. Transactions are fetched
/// once even when several outputs of one transaction belong to the wallet.
fn fetch_outputs(
    electrum_url: &str,
    wanted: Vec<(Listed, Option<String>)>,
) -> Result<Vec<Utxo>, ChainAdapterError> {
    let client = client(electrum_url)?;
    let mut txs: HashMap<String, Transaction> = HashMap::new();
    let mut utxos = Vec::with_capacity(wanted.len());
    for (listed, blinding_key) in wanted {
        if !txs.contains_key(&listed.txid) {
            let tx = get_transaction(&client, &listed.txid)?;
            txs.insert(listed.txid.clone(), tx);
        }
        let txout = txs
            .get(&listed.txid)
            .and_then(|tx| tx.output.get(listed.vout as usize))
            .ok_or_else(|| ChainAdapterError::Parse(format!("vout {} out of range", listed.vout)))?;
        utxos.push(utxo_from_txout(
            &listed.txid,
            listed.vout,
            txout,
            blinding_key.as_deref(),
        ));
    }
    Ok(utxos)
}

fn blinded(txid: &str, vout: u32) -> Utxo {
    Utxo {
        txid: txid.to_string(),
        vout,
        asset: None,
        value: None,
        blinding: None,
        prevout: None,
    }
}

/// Turn a fetched output into a wallet UTXO. Explicit outputs need no key;
/// confidential ones are unblinded with `blinding_key` (hex) and stay
/// blinded when that fails.
fn utxo_from_txout(txid: &str, vout: u32, txout: &TxOut, blinding_key: Option<&str>) -> Utxo {
    if let (Asset::Explicit(asset), Value::Explicit(value)) = (txout.asset, txout.value) {
        return Utxo {
            txid: txid.to_string(),
            vout,
            asset: Some(asset.to_string()),
            value: Some(value),
            blinding: None,
            prevout: Some(encode_txout(txout)),
        };
    }

    let secp = Secp256k1::new();
    let secrets = blinding_key
        .and_then(|hex| SecretKey::from_str(hex).ok())
        .and_then(|sk| txout.unblind(&secp, sk).ok());
    match secrets {
        Some(secrets) => Utxo {
            txid: txid.to_string(),
            vout,
            asset: Some(secrets.asset.to_string()),
            value: Some(secrets.value),
            blinding: Some(BlindingData {
                asset_blinding_factor: hex::encode(secrets.asset_bf.into_inner().as_ref()),
                value_blinding_factor: hex::encode(secrets.value_bf.into_inner().as_ref()),
            }),
            prevout: Some(encode_txout(txout)),
        },
        None => {
            log::warn!("could not unblind {txid}:{vout}");
            blinded(txid, vout)
        }
    }
}

/// Esplora `/asset/{id}` body. Only issued assets carry a name and ticker.
#[derive(Debug, Deserialize)]
struct EsploraAsset {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    ticker: Option<String>,
    #[serde(default)]
    precision: Option<u8>,
}

impl EsploraAsset {
    fn into_info(self, asset: &str) -> AssetInfo {
        AssetInfo {
            name: self.name.unwrap_or_else(|| asset.to_string()),
            ticker: self
                .ticker
                .unwrap_or_else(|| asset.chars().take(4).collect::<String>().to_uppercase()),
            precision: self.precision.unwrap_or(8),
        }
    }
}

#[async_trait]
impl ChainSource for ElectrumChainAdapter {
    async fn fetch_utxos(
        &self,
        network: Network,
        addresses: &[AddressRecord],
        skip: &SkipOutpoint<'_>,
    ) -> connect_sdk::Result<Vec<Utxo>> {
        let scripts = addresses
            .iter()
            .map(|record| {
                Address::from_str(&record.confidential_address)
                    .map(|address| address.script_pubkey())
                    .map_err(|e| ChainAdapterError::Parse(format!("address: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let electrum_url = self.endpoints(network)?.electrum_url.clone();

        let listed = {
            let electrum_url = electrum_url.clone();
            tokio::task::spawn_blocking(move || list_unspent(&electrum_url, &scripts))
                .await
                .map_err(|e| ChainAdapterError::Task(e.to_string()))??
        };

        let mut utxos = Vec::with_capacity(listed.len());
        let mut wanted = Vec::new();
        for entry in listed {
            if skip(&connect_sdk::wallet::outpoint_key(&entry.txid, entry.vout)) {
                utxos.push(blinded(&entry.txid, entry.vout));
            } else {
                let key = addresses[entry.address].blinding_private_key.clone();
                wanted.push((entry, key));
            }
        }
        log::debug!(
            "{} unspent on {network}, {} to fetch",
            utxos.len() + wanted.len(),
            wanted.len()
        );

        if !wanted.is_empty() {
            let fetched = tokio::task::spawn_blocking(move || fetch_outputs(&electrum_url, wanted))
                .await
                .map_err(|e| ChainAdapterError::Task(e.to_string()))??;
            utxos.extend(fetched);
        }
        Ok(utxos)
    }

    async fn fetch_asset_info(&self, network: Network, asset: &str) -> connect_sdk::Result<AssetInfo> {
        let url = format!("{}/asset/{asset}", self.endpoints(network)?.esplora_url);
        let body: EsploraAsset = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(ChainAdapterError::from)?
            .json()
            .await
            .map_err(ChainAdapterError::from)?;
        Ok(body.into_info(asset))
    }
}
