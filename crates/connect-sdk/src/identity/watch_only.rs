use std::str::FromStr;

use lwk_wollet::elements::Address;
use lwk_wollet::elements::bitcoin::bip32::{ChildNumber, Xpub};
use lwk_wollet::elements::secp256k1_zkp::{self, Secp256k1};
use lwk_wollet::elements_miniscript::confidential::slip77::MasterBlindingKey;

use super::WatchOnlyIdentity;
use crate::error::{Error, Result};
use crate::network::Network;
use crate::restorer::{EXTERNAL_CHAIN, INTERNAL_CHAIN, RestorerState};
use crate::wallet::{AddressRecord, WalletData};

/// BIP84 account path for `network`.
pub(crate) fn account_path(network: Network) -> String {
    format!("m/84'/{}'/0'", network.coin_type())
}

pub(crate) fn parse_master_blinding_key(hex: &str) -> Result<MasterBlindingKey> {
    MasterBlindingKey::from_str(hex)
        .map_err(|e| Error::Identity(format!("bad master blinding key: {e}")))
}

/// Derive the confidential P2WPKH address at `chain/index` below the account.
pub(crate) fn derive_address(
    account_xpub: &Xpub,
    master_blinding_key: &MasterBlindingKey,
    network: Network,
    chain: u32,
    index: u32,
) -> Result<AddressRecord> {
    let secp = Secp256k1::new();
    let children = [
        ChildNumber::from_normal_idx(chain).map_err(|e| Error::Identity(e.to_string()))?,
        ChildNumber::from_normal_idx(index).map_err(|e| Error::Identity(e.to_string()))?,
    ];
    let child = account_xpub
        .derive_pub(&secp, &children)
        .map_err(|e| Error::Identity(format!("derive {chain}/{index}: {e}")))?;
    let public_key = lwk_wollet::elements::bitcoin::PublicKey::new(child.public_key);

    let params = network.address_params();
    let script = Address::p2wpkh(&public_key, None, params).script_pubkey();
    let blinding_sk: secp256k1_zkp::SecretKey =
        master_blinding_key.blinding_private_key(&script).into();
    let blinding_pk = secp256k1_zkp::PublicKey::from_secret_key(&secp, &blinding_sk);
    let address = Address::p2wpkh(&public_key, Some(blinding_pk), params);

    Ok(AddressRecord {
        confidential_address: address.to_string(),
        derivation_path: Some(format!("{}/{chain}/{index}", account_path(network))),
        blinding_private_key: Some(hex::encode(blinding_sk.secret_bytes())),
    })
}

/// Watch-only identity over the stored account xpub.
pub struct XpubIdentity {
    account_xpub: Xpub,
    master_blinding_key: MasterBlindingKey,
    network: Network,
    addresses: Vec<AddressRecord>,
    restorer: RestorerState,
}

impl XpubIdentity {
    pub fn from_wallet(wallet: &WalletData, network: Network) -> Result<Self> {
        let account_xpub = Xpub::from_str(&wallet.master_xpub)
            .map_err(|e| Error::Identity(format!("bad account xpub: {e}")))?;
        Ok(Self {
            account_xpub,
            master_blinding_key: parse_master_blinding_key(&wallet.master_blinding_key)?,
            network,
            restorer: RestorerState::from_addresses(&wallet.confidential_addresses),
            addresses: wallet.confidential_addresses.clone(),
        })
    }

    fn next_on_chain(&self, chain: u32) -> Result<AddressRecord> {
        derive_address(
            &self.account_xpub,
            &self.master_blinding_key,
            self.network,
            chain,
            self.restorer.next_index(chain),
        )
    }
}

impl WatchOnlyIdentity for XpubIdentity {
    fn addresses(&self) -> Result<Vec<AddressRecord>> {
        Ok(self.addresses.clone())
    }

    fn next_address(&self) -> Result<AddressRecord> {
        self.next_on_chain(EXTERNAL_CHAIN)
    }

    fn next_change_address(&self) -> Result<AddressRecord> {
        self.next_on_chain(INTERNAL_CHAIN)
    }
}
