//! Signing pipelines run once the user approved a spend.

use lwk_wollet::elements::pset::PartiallySignedTransaction;

use crate::blinding::BlindingSelection;
use crate::error::{Error, Result};
use crate::identity::SpendingIdentity;
use crate::pset::{decode_pset, encode_pset, tx_hex};

/// Blind, sign, validate and finalize a wallet-built spend. Returns the
/// transaction hex. One bad or missing input signature fails the whole spend.
pub fn sign_spend(
    identity: &dyn SpendingIdentity,
    mut pset: PartiallySignedTransaction,
    selection: &BlindingSelection,
) -> Result<String> {
    identity.blind_pset(&mut pset, &selection.indices, &selection.keys)?;
    let signed = identity.sign_pset(&mut pset)?;
    log::debug!("added {signed} signatures");
    if !identity.validate_signatures(&pset)? {
        return Err(Error::SignatureValidationFailed);
    }
    let tx = identity.finalize(pset)?;
    log::info!("finalized transaction {}", tx.txid());
    Ok(tx_hex(&tx))
}

/// Sign the wallet inputs of a page-supplied PSET and return it re-encoded.
/// Foreign inputs are left for other signers.
pub fn sign_raw(identity: &dyn SpendingIdentity, pset_b64: &str) -> Result<String> {
    let mut pset = decode_pset(pset_b64)?;
    let signed = identity.sign_pset(&mut pset)?;
    log::info!("signed {signed} inputs of submitted PSET");
    Ok(encode_pset(&pset))
}

/// Run a CPU-bound or store-holding job on the blocking pool.
pub async fn run_blocking<T, F>(job: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| Error::Task(e.to_string()))?
}
