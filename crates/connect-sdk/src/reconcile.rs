//! Synchronization of the stored UTXO set with the chain.

use crate::chain::ChainSource;
use crate::error::Result;
use crate::network::Network;
use crate::repos::WalletRepository;
use crate::wallet::{Utxo, UtxoMap};

/// Compute the next UTXO set from the stored one and a fresh fetch.
///
/// The result holds exactly the fetched outpoints. Entries already stored
/// keep their stored data, since the fetch skipped them. Returns `None` when
/// nothing needs writing: either every fetched entry is still blinded and the
/// counts match, or the result equals the stored set.
pub fn reconcile(existing: &UtxoMap, fetched: &[Utxo]) -> Option<UtxoMap> {
    if fetched.iter().all(Utxo::is_blinded) && fetched.len() == existing.len() {
        return None;
    }

    let next: UtxoMap = fetched
        .iter()
        .map(|utxo| {
            let key = utxo.outpoint();
            let entry = existing.get(&key).cloned().unwrap_or_else(|| utxo.clone());
            (key, entry)
        })
        .collect();

    (next != *existing).then_some(next)
}

/// Fetch the wallet's UTXOs and store the reconciled set. Returns whether
/// anything was written.
pub async fn update_utxos(
    wallets: &WalletRepository,
    chain: &dyn ChainSource,
    network: Network,
) -> Result<bool> {
    let wallet = wallets.get(network)?;
    let existing = wallet.utxo_map;
    let skip = |outpoint: &str| existing.contains_key(outpoint);

    let fetched = chain
        .fetch_utxos(network, &wallet.confidential_addresses, &skip)
        .await?;

    let Some(next) = reconcile(&existing, &fetched) else {
        log::debug!("utxo set of {network} unchanged");
        return Ok(false);
    };

    let (before, after) = (existing.len(), next.len());
    // Apply against the current set: another writer may have run meanwhile.
    wallets.update(network, |wallet| {
        if let Some(next) = reconcile(&wallet.utxo_map, &fetched) {
            wallet.utxo_map = next;
        }
        Ok(())
    })?;
    log::info!("utxo set of {network}: {before} -> {after} entries");
    Ok(true)
}
