//! Encoding helpers for PSETs and transaction data crossing the wire.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use lwk_wollet::elements::encode::{deserialize, serialize, serialize_hex};
use lwk_wollet::elements::pset::{self, PartiallySignedTransaction};
use lwk_wollet::elements::{AssetId, Script, Sequence, Transaction, TxOut, Txid};

use crate::error::{Error, Result};

pub fn decode_pset(b64: &str) -> Result<PartiallySignedTransaction> {
    let bytes = BASE64
        .decode(b64.trim())
        .map_err(|e| Error::InvalidRequest(format!("invalid PSET encoding: {e}")))?;
    deserialize(&bytes).map_err(|e| Error::InvalidRequest(format!("invalid PSET: {e}")))
}

pub fn encode_pset(pset: &PartiallySignedTransaction) -> String {
    BASE64.encode(serialize(pset))
}

pub fn tx_hex(tx: &Transaction) -> String {
    serialize_hex(tx)
}

/// Decode a stored `prevout` (hex consensus encoding of a `TxOut`).
pub fn decode_txout(hex_str: &str) -> Result<TxOut> {
    let bytes = hex::decode(hex_str).map_err(|e| Error::Pset(format!("prevout hex: {e}")))?;
    deserialize(&bytes).map_err(|e| Error::Pset(format!("prevout: {e}")))
}

pub fn encode_txout(txout: &TxOut) -> String {
    hex::encode(serialize(txout))
}

pub(crate) fn add_input(
    pset: &mut PartiallySignedTransaction,
    txid: Txid,
    vout: u32,
    witness_utxo: TxOut,
) {
    let input = pset::Input {
        previous_txid: txid,
        previous_output_index: vout,
        witness_utxo: Some(witness_utxo),
        sequence: Some(Sequence::ENABLE_LOCKTIME_NO_RBF),
        ..Default::default()
    };
    pset.add_input(input);
}

/// Add an explicit output. An empty `script_pubkey` makes it a fee output.
pub(crate) fn add_output(
    pset: &mut PartiallySignedTransaction,
    asset: AssetId,
    amount: u64,
    script_pubkey: Script,
) {
    let output = pset::Output {
        amount: Some(amount),
        asset: Some(asset),
        script_pubkey,
        ..Default::default()
    };
    pset.add_output(output);
}
