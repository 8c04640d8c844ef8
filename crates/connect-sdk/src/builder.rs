//! Coin selection and unsigned spend construction.

use std::collections::BTreeMap;
use std::str::FromStr;

use lwk_wollet::elements::pset::PartiallySignedTransaction;
use lwk_wollet::elements::{Address, AssetId, Script, TxOut, Txid};

use crate::error::{Error, Result};
use crate::network::Network;
use crate::pset::{add_input, add_output, decode_txout};
use crate::wallet::UtxoMap;

/// Fixed part of a segwit Elements transaction, in vbytes.
const TX_OVERHEAD_VB: u64 = 11;
/// P2WPKH input including its witness.
const INPUT_VB: u64 = 68;
/// Commitments and nonce of a blinded output, plus its proofs.
const BLINDED_OUTPUT_VB: u64 = 99 + 1062;
/// Explicit asset, value and null nonce of the fee output.
const FEE_OUTPUT_VB: u64 = 45;
const MAX_FEE_ROUNDS: usize = 8;

/// Parse a spend recipient. It must be confidential and belong to `network`.
pub fn parse_recipient(address: &str, network: Network) -> Result<Address> {
    let parsed = Address::parse_with_params(address, network.address_params())
        .map_err(|e| Error::InvalidAddress(format!("{address}: {e}")))?;
    if parsed.blinding_pubkey.is_none() {
        return Err(Error::InvalidAddress(format!(
            "{address} is not a confidential address"
        )));
    }
    Ok(parsed)
}

/// Wallet output usable as input: unblinded and with a known prevout.
#[derive(Debug, Clone)]
struct Coin {
    key: String,
    txid: Txid,
    vout: u32,
    asset: String,
    value: u64,
    prevout: TxOut,
}

fn spendable_coins(utxos: &UtxoMap) -> Vec<Coin> {
    utxos
        .iter()
        .filter_map(|(key, utxo)| {
            let (Some(asset), Some(value), Some(prevout)) =
                (utxo.asset.as_ref(), utxo.value, utxo.prevout.as_deref())
            else {
                return None;
            };
            let parsed = Txid::from_str(&utxo.txid)
                .map_err(|e| Error::Pset(e.to_string()))
                .and_then(|txid| Ok((txid, decode_txout(prevout)?)));
            match parsed {
                Ok((txid, prevout)) => Some(Coin {
                    key: key.clone(),
                    txid,
                    vout: utxo.vout,
                    asset: asset.clone(),
                    value,
                    prevout,
                }),
                Err(e) => {
                    log::warn!("skipping unusable utxo {key}: {e}");
                    None
                }
            }
        })
        .collect()
}

/// Amount needed per asset. The fee is always paid in the policy asset.
fn demand_per_asset(asset: &str, amount: u64, policy: &str, fee: u64) -> Result<BTreeMap<String, u64>> {
    let mut demand = BTreeMap::new();
    demand.insert(asset.to_string(), amount);
    let entry = demand.entry(policy.to_string()).or_insert(0);
    *entry = entry.checked_add(fee).ok_or(Error::AmountOverflow)?;
    Ok(demand)
}

struct Selection<'a> {
    coins: Vec<&'a Coin>,
    /// Surplus per asset, only for assets with something left over.
    change: BTreeMap<String, u64>,
}

/// Greedy pass in snapshot order, one asset at a time.
fn select<'a>(coins: &'a [Coin], demand: &BTreeMap<String, u64>) -> Result<Selection<'a>> {
    let mut picked = vec![false; coins.len()];
    let mut change = BTreeMap::new();

    for (asset, &needed) in demand {
        if needed == 0 {
            continue;
        }
        let mut total: u64 = 0;
        for (i, coin) in coins.iter().enumerate() {
            if total >= needed {
                break;
            }
            if &coin.asset == asset {
                picked[i] = true;
                total = total.checked_add(coin.value).ok_or(Error::AmountOverflow)?;
            }
        }
        if total < needed {
            let available = coins
                .iter()
                .filter(|c| &c.asset == asset)
                .fold(0u64, |acc, c| acc.saturating_add(c.value));
            return Err(Error::InsufficientFunds {
                asset: asset.clone(),
                needed,
                available,
            });
        }
        if total > needed {
            change.insert(asset.clone(), total - needed);
        }
    }

    Ok(Selection {
        coins: coins
            .iter()
            .zip(picked)
            .filter_map(|(coin, picked)| picked.then_some(coin))
            .collect(),
        change,
    })
}

fn output_vb(script: &Script) -> u64 {
    BLINDED_OUTPUT_VB + 1 + script.len() as u64
}

fn estimate_fee(
    fee_rate: f64,
    n_inputs: usize,
    recipient: &Script,
    n_change: usize,
    change: &Script,
) -> u64 {
    let vsize = TX_OVERHEAD_VB
        + INPUT_VB * n_inputs as u64
        + output_vb(recipient)
        + output_vb(change) * n_change as u64
        + FEE_OUTPUT_VB;
    (fee_rate * vsize as f64).ceil() as u64
}

/// Unsigned spend ready for blinding.
#[derive(Debug)]
pub struct UnsignedSpend {
    pub pset: PartiallySignedTransaction,
    /// Outpoint keys of the spent UTXOs, in input order.
    pub inputs: Vec<String>,
    pub fee: u64,
    /// Change amount per asset.
    pub change: BTreeMap<String, u64>,
}

/// A spend request resolved against a network.
#[derive(Debug, Clone)]
pub struct SpendIntent {
    pub recipient: Address,
    pub amount: u64,
    pub asset: AssetId,
}

/// Build the unsigned spend: recipient output, one change output per asset
/// with surplus (all paying `change_address`), then the explicit fee output.
///
/// Selection repeats until the fee computed for the selected inputs no
/// longer exceeds the fee it was selected for.
pub fn build_spend(
    utxos: &UtxoMap,
    intent: &SpendIntent,
    change_address: &Address,
    network: Network,
    fee_rate: f64,
) -> Result<UnsignedSpend> {
    if intent.amount == 0 {
        return Err(Error::InvalidRequest("amount must be positive".into()));
    }
    let policy = network.policy_asset();
    let policy_hex = policy.to_string();
    let asset_hex = intent.asset.to_string();
    let recipient_script = intent.recipient.script_pubkey();
    let change_script = change_address.script_pubkey();

    let coins = spendable_coins(utxos);
    let mut fee = estimate_fee(fee_rate, 1, &recipient_script, 0, &change_script);

    for _ in 0..MAX_FEE_ROUNDS {
        let demand = demand_per_asset(&asset_hex, intent.amount, &policy_hex, fee)?;
        let selection = select(&coins, &demand)?;
        let needed = estimate_fee(
            fee_rate,
            selection.coins.len(),
            &recipient_script,
            selection.change.len(),
            &change_script,
        );
        if needed > fee {
            log::debug!("fee estimate grew from {fee} to {needed}, reselecting");
            fee = needed;
            continue;
        }

        let mut pset = PartiallySignedTransaction::new_v2();
        for coin in &selection.coins {
            add_input(&mut pset, coin.txid, coin.vout, coin.prevout.clone());
        }
        add_output(&mut pset, intent.asset, intent.amount, recipient_script.clone());
        for (asset, amount) in &selection.change {
            let asset = AssetId::from_str(asset).map_err(|e| Error::Pset(e.to_string()))?;
            add_output(&mut pset, asset, *amount, change_script.clone());
        }
        add_output(&mut pset, policy, fee, Script::new());

        log::info!(
            "built spend of {} {} with {} inputs, fee {fee}",
            intent.amount,
            asset_hex,
            selection.coins.len()
        );
        return Ok(UnsignedSpend {
            pset,
            inputs: selection.coins.iter().map(|c| c.key.clone()).collect(),
            fee,
            change: selection.change,
        });
    }

    Err(Error::Pset("fee estimate did not settle".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{confidential_address, explicit_utxo};

    const NET: Network = Network::LiquidRegtest;
    const RATE: f64 = 0.1;

    fn policy() -> AssetId {
        NET.policy_asset()
    }

    fn other_asset() -> AssetId {
        AssetId::from_slice(&[7u8; 32]).unwrap()
    }

    fn map(utxos: Vec<crate::wallet::Utxo>) -> UtxoMap {
        utxos.into_iter().map(|u| (u.outpoint(), u)).collect()
    }

    fn intent(amount: u64, asset: AssetId) -> SpendIntent {
        SpendIntent {
            recipient: confidential_address(NET, 1),
            amount,
            asset,
        }
    }

    #[test]
    fn single_policy_utxo_pays_recipient_change_and_fee() {
        let utxos = map(vec![explicit_utxo(NET, 1, 0, policy(), 100_000)]);
        let change = confidential_address(NET, 2);
        let spend = build_spend(&utxos, &intent(50_000, policy()), &change, NET, RATE).unwrap();

        let outputs = spend.pset.outputs();
        assert_eq!(spend.pset.inputs().len(), 1);
        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs[0].amount, Some(50_000));
        assert_eq!(outputs[1].script_pubkey, change.script_pubkey());
        assert_eq!(outputs[1].amount, Some(50_000 - spend.fee));
        assert!(outputs[2].script_pubkey.is_empty());
        assert_eq!(outputs[2].amount, Some(spend.fee));
        assert!(spend.fee > 0);
    }

    #[test]
    fn selection_follows_outpoint_order() {
        let utxos = map(vec![
            explicit_utxo(NET, 3, 0, policy(), 80_000),
            explicit_utxo(NET, 1, 0, policy(), 80_000),
            explicit_utxo(NET, 2, 0, policy(), 80_000),
        ]);
        let change = confidential_address(NET, 2);
        let spend = build_spend(&utxos, &intent(100_000, policy()), &change, NET, RATE).unwrap();
        let mut expected: Vec<String> = utxos.keys().take(2).cloned().collect();
        expected.sort();
        assert_eq!(spend.inputs, expected);
    }

    #[test]
    fn non_policy_asset_selects_fee_coins_separately() {
        let utxos = map(vec![
            explicit_utxo(NET, 1, 0, other_asset(), 10),
            explicit_utxo(NET, 2, 0, policy(), 5_000),
        ]);
        let change = confidential_address(NET, 2);
        let spend = build_spend(&utxos, &intent(10, other_asset()), &change, NET, RATE).unwrap();
        assert_eq!(spend.inputs.len(), 2);
        // exact asset amount leaves only policy change
        assert_eq!(spend.change.len(), 1);
        assert_eq!(spend.change[&policy().to_string()], 5_000 - spend.fee);
    }

    #[test]
    fn insufficient_funds_reports_asset() {
        let utxos = map(vec![explicit_utxo(NET, 1, 0, policy(), 1_000)]);
        let change = confidential_address(NET, 2);
        let err = build_spend(&utxos, &intent(5_000, policy()), &change, NET, RATE).unwrap_err();
        match err {
            Error::InsufficientFunds { asset, available, .. } => {
                assert_eq!(asset, policy().to_string());
                assert_eq!(available, 1_000);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn missing_fee_coins_is_insufficient_policy() {
        let utxos = map(vec![explicit_utxo(NET, 1, 0, other_asset(), 10)]);
        let change = confidential_address(NET, 2);
        let err = build_spend(&utxos, &intent(10, other_asset()), &change, NET, RATE).unwrap_err();
        assert!(matches!(err, Error::InsufficientFunds { asset, .. } if asset == policy().to_string()));
    }

    #[test]
    fn blinded_utxos_are_not_spendable() {
        let mut blinded = explicit_utxo(NET, 1, 0, policy(), 100_000);
        blinded.value = None;
        let utxos = map(vec![blinded]);
        let change = confidential_address(NET, 2);
        assert!(matches!(
            build_spend(&utxos, &intent(1, policy()), &change, NET, RATE),
            Err(Error::InsufficientFunds { available: 0, .. })
        ));
    }

    #[test]
    fn recipient_must_be_confidential_and_on_network() {
        let confidential = confidential_address(NET, 1);
        assert!(parse_recipient(&confidential.to_string(), NET).is_ok());
        assert!(matches!(
            parse_recipient(&confidential.to_string(), Network::Liquid),
            Err(Error::InvalidAddress(_))
        ));
        let unconfidential = confidential.to_unconfidential();
        assert!(matches!(
            parse_recipient(&unconfidential.to_string(), NET),
            Err(Error::InvalidAddress(_))
        ));
        assert!(matches!(
            parse_recipient("not-an-address", NET),
            Err(Error::InvalidAddress(_))
        ));
    }
}
