use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use lwk_common::Signer;
use lwk_signer::SwSigner;
use lwk_wollet::elements::bitcoin::bip32::{DerivationPath, Fingerprint, Xpub};
use lwk_wollet::elements::confidential::{AssetBlindingFactor, ValueBlindingFactor};
use lwk_wollet::elements::hashes::Hash as _;
use lwk_wollet::elements::pset::PartiallySignedTransaction;
use lwk_wollet::elements::secp256k1_zkp::{self, Message, PublicKey, Secp256k1};
use lwk_wollet::elements::sighash::SighashCache;
use lwk_wollet::elements::{
    Address, AssetId, EcdsaSighashType, Script, Transaction, TxOutSecrets,
};
use lwk_wollet::elements_miniscript::confidential::slip77::MasterBlindingKey;
use rand::thread_rng;

use super::SpendingIdentity;
use super::watch_only::{account_path, parse_master_blinding_key};
use crate::credentials::EncryptedMnemonic;
use crate::error::{Error, Result};
use crate::network::Network;
use crate::wallet::{UtxoMap, WalletData, outpoint_key};

type BitcoinPublicKey = lwk_wollet::elements::bitcoin::PublicKey;

fn derive_account_xpub(signer: &SwSigner, network: Network) -> Result<Xpub> {
    let path = DerivationPath::from_str(&account_path(network))
        .map_err(|e| Error::Identity(e.to_string()))?;
    let xprv = signer
        .derive_xprv(&path)
        .map_err(|e| Error::Signer(format!("{e:?}")))?;
    Ok(Xpub::from_priv(&Secp256k1::new(), &xprv))
}

/// Build a fresh wallet record for `network` from a mnemonic. The mnemonic
/// is sealed with `password`; only the account xpub and the SLIP-77 master
/// blinding key are kept in clear.
pub fn create_wallet(mnemonic: &str, password: &str, network: Network) -> Result<WalletData> {
    let signer =
        SwSigner::new(mnemonic, network.is_mainnet()).map_err(|e| Error::Signer(e.to_string()))?;
    let master_blinding_key = signer
        .slip77_master_blinding_key()
        .map_err(|e| Error::Signer(e.to_string()))?;

    Ok(WalletData {
        encrypted_mnemonic: EncryptedMnemonic::seal(mnemonic, password)?,
        master_xpub: derive_account_xpub(&signer, network)?.to_string(),
        master_blinding_key: master_blinding_key.to_string(),
        confidential_addresses: Vec::new(),
        utxo_map: UtxoMap::new(),
    })
}

fn decode_factor(hex_str: &str) -> Result<Vec<u8>> {
    hex::decode(hex_str).map_err(|e| Error::Blinding(format!("blinding factor hex: {e}")))
}

/// Key material of one wallet-owned script.
struct OwnedKey {
    public_key: BitcoinPublicKey,
    path: DerivationPath,
}

/// Spending identity unlocked from the decrypted mnemonic.
pub struct MnemonicIdentity {
    signer: SwSigner,
    fingerprint: Fingerprint,
    master_blinding_key: MasterBlindingKey,
    network: Network,
    owned: HashMap<Script, OwnedKey>,
    utxos: UtxoMap,
}

impl MnemonicIdentity {
    pub fn new(mnemonic: &str, wallet: &WalletData, network: Network) -> Result<Self> {
        let signer = SwSigner::new(mnemonic, network.is_mainnet())
            .map_err(|e| Error::Signer(e.to_string()))?;

        if derive_account_xpub(&signer, network)?.to_string() != wallet.master_xpub {
            return Err(Error::Identity(
                "mnemonic does not match the stored account key".into(),
            ));
        }

        let secp = Secp256k1::new();
        let master = signer
            .derive_xprv(&DerivationPath::master())
            .map_err(|e| Error::Signer(format!("{e:?}")))?;
        let fingerprint = master.fingerprint(&secp);

        let mut owned = HashMap::new();
        for record in &wallet.confidential_addresses {
            let Some(path) = record.derivation_path.as_deref() else {
                continue;
            };
            let path =
                DerivationPath::from_str(path).map_err(|e| Error::Identity(e.to_string()))?;
            let xprv = signer
                .derive_xprv(&path)
                .map_err(|e| Error::Signer(format!("{e:?}")))?;
            let public_key = BitcoinPublicKey::new(xprv.private_key.public_key(&secp));
            let script = Address::p2wpkh(&public_key, None, network.address_params()).script_pubkey();
            owned.insert(script, OwnedKey { public_key, path });
        }

        Ok(Self {
            signer,
            fingerprint,
            master_blinding_key: parse_master_blinding_key(&wallet.master_blinding_key)?,
            network,
            owned,
            utxos: wallet.utxo_map.clone(),
        })
    }

    /// Unblinded secrets of every input, looked up in the wallet UTXO set.
    fn input_secrets(&self, pset: &PartiallySignedTransaction) -> Result<HashMap<usize, TxOutSecrets>> {
        let mut secrets = HashMap::new();
        for (idx, input) in pset.inputs().iter().enumerate() {
            let key = outpoint_key(&input.previous_txid.to_string(), input.previous_output_index);
            let utxo = self
                .utxos
                .get(&key)
                .ok_or_else(|| Error::Blinding(format!("input {key} is not a wallet utxo")))?;
            let (Some(asset), Some(value)) = (utxo.asset.as_deref(), utxo.value) else {
                return Err(Error::Blinding(format!("input {key} is still blinded")));
            };
            let asset = AssetId::from_str(asset).map_err(|e| Error::Blinding(e.to_string()))?;
            let (asset_bf, value_bf) = match &utxo.blinding {
                Some(b) => (
                    AssetBlindingFactor::from_slice(&decode_factor(&b.asset_blinding_factor)?)
                        .map_err(|e| Error::Blinding(format!("ABF: {e}")))?,
                    ValueBlindingFactor::from_slice(&decode_factor(&b.value_blinding_factor)?)
                        .map_err(|e| Error::Blinding(format!("VBF: {e}")))?,
                ),
                None => (AssetBlindingFactor::zero(), ValueBlindingFactor::zero()),
            };
            secrets.insert(
                idx,
                TxOutSecrets {
                    asset,
                    asset_bf,
                    value,
                    value_bf,
                },
            );
        }
        Ok(secrets)
    }

    /// Attach key origins to the inputs spending wallet scripts so the
    /// software signer can find their keys.
    fn add_key_origins(&self, pset: &mut PartiallySignedTransaction) -> usize {
        let mut found = 0;
        for input in pset.inputs_mut() {
            let Some(owned) = input
                .witness_utxo
                .as_ref()
                .and_then(|txout| self.owned.get(&txout.script_pubkey))
            else {
                continue;
            };
            input
                .bip32_derivation
                .insert(owned.public_key, (self.fingerprint, owned.path.clone()));
            found += 1;
        }
        found
    }
}

impl SpendingIdentity for MnemonicIdentity {
    fn blind_pset(
        &self,
        pset: &mut PartiallySignedTransaction,
        indices: &[usize],
        keys: &BTreeMap<usize, PublicKey>,
    ) -> Result<()> {
        let secp = Secp256k1::new();
        let n_outputs = pset.outputs().len();
        for &idx in indices {
            if idx >= n_outputs {
                return Err(Error::Blinding(format!("output index {idx} out of range")));
            }
            let key = match keys.get(&idx) {
                Some(key) => *key,
                None => {
                    let script = &pset.outputs()[idx].script_pubkey;
                    let sk: secp256k1_zkp::SecretKey =
                        self.master_blinding_key.blinding_private_key(script).into();
                    PublicKey::from_secret_key(&secp, &sk)
                }
            };
            let output = &mut pset.outputs_mut()[idx];
            output.blinding_key = Some(BitcoinPublicKey {
                inner: key,
                compressed: true,
            });
            output.blinder_index = Some(0);
        }

        let inp_txout_sec = self.input_secrets(pset)?;
        pset.blind_last(&mut thread_rng(), &secp, &inp_txout_sec)
            .map_err(|e| Error::Blinding(format!("{e:?}")))?;
        log::debug!("blinded {} outputs on {}", indices.len(), self.network);
        Ok(())
    }

    fn sign_pset(&self, pset: &mut PartiallySignedTransaction) -> Result<u32> {
        if self.add_key_origins(pset) == 0 {
            return Err(Error::Signer("no input spends a wallet address".into()));
        }
        self.signer
            .sign(pset)
            .map_err(|e| Error::Signer(format!("{e:?}")))
    }

    fn validate_signatures(&self, pset: &PartiallySignedTransaction) -> Result<bool> {
        let secp = Secp256k1::verification_only();
        let tx = pset
            .extract_tx()
            .map_err(|e| Error::Pset(e.to_string()))?;
        let mut cache = SighashCache::new(&tx);

        for (idx, input) in pset.inputs().iter().enumerate() {
            let Some(prevout) = input.witness_utxo.as_ref() else {
                return Ok(false);
            };
            if input.partial_sigs.is_empty() {
                return Ok(false);
            }
            for (public_key, raw_sig) in &input.partial_sigs {
                let Some((hash_ty, der)) = raw_sig.split_last() else {
                    return Ok(false);
                };
                let Ok(sig) = secp256k1_zkp::ecdsa::Signature::from_der(der) else {
                    return Ok(false);
                };
                let script_code =
                    Address::p2pkh(public_key, None, self.network.address_params()).script_pubkey();
                let sighash = cache.segwitv0_sighash(
                    idx,
                    &script_code,
                    prevout.value,
                    EcdsaSighashType::from_u32(u32::from(*hash_ty)),
                );
                let msg = Message::from_digest(sighash.to_byte_array());
                if secp.verify_ecdsa(&msg, &sig, &public_key.inner).is_err() {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    fn finalize(&self, mut pset: PartiallySignedTransaction) -> Result<Transaction> {
        for (idx, input) in pset.inputs_mut().iter_mut().enumerate() {
            let (public_key, sig) = input
                .partial_sigs
                .iter()
                .next()
                .map(|(pk, sig)| (*pk, sig.clone()))
                .ok_or_else(|| Error::Finalize(format!("input {idx} is not signed")))?;
            input.final_script_witness = Some(vec![sig, public_key.to_bytes()]);
            input.partial_sigs.clear();
            input.bip32_derivation.clear();
        }
        pset.extract_tx().map_err(|e| Error::Finalize(e.to_string()))
    }
}
