use std::sync::Arc;

use connect_sdk::{AppRepository, KeyValueStore, Network, WalletRepository, create_wallet};
use lwk_signer::SwSigner;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalletSetupError {
    #[error("a wallet already exists on {0}")]
    AlreadyInitialized(Network),

    #[error("password must not be empty")]
    EmptyPassword,

    #[error("mnemonic generation failed: {0}")]
    Generate(String),

    #[error(transparent)]
    Sdk(#[from] connect_sdk::Error),
}

/// What `init_wallet` did. `generated_mnemonic` is set only when no mnemonic
/// was supplied, so the caller can show it once for backup.
#[derive(Debug)]
pub struct WalletSetup {
    pub network: Network,
    pub generated_mnemonic: Option<String>,
}

/// Seal `mnemonic` (or a fresh one) under `password` and store a wallet for
/// every network, then make `network` current.
pub fn init_wallet(
    store: Arc<dyn KeyValueStore>,
    mnemonic: Option<&str>,
    password: &str,
    network: Network,
) -> Result<WalletSetup, WalletSetupError> {
    if password.is_empty() {
        return Err(WalletSetupError::EmptyPassword);
    }
    let wallets = WalletRepository::new(store.clone());
    for net in Network::ALL {
        if wallets.exists(net)? {
            return Err(WalletSetupError::AlreadyInitialized(net));
        }
    }

    let (mnemonic, generated) = match mnemonic {
        Some(words) => (words.trim().to_string(), false),
        None => {
            let (_, mnemonic) = SwSigner::random(network.is_mainnet())
                .map_err(|e| WalletSetupError::Generate(e.to_string()))?;
            (mnemonic.to_string(), true)
        }
    };

    for net in Network::ALL {
        wallets.put(net, create_wallet(&mnemonic, password, net)?)?;
    }
    AppRepository::new(store).set_network(network)?;
    log::info!("wallet initialized, current network {network}");

    Ok(WalletSetup {
        network,
        generated_mnemonic: generated.then_some(mnemonic),
    })
}

/// Make `network` current. Its wallet must exist.
pub fn set_network(store: Arc<dyn KeyValueStore>, network: Network) -> Result<(), WalletSetupError> {
    if !WalletRepository::new(store.clone()).exists(network)? {
        return Err(connect_sdk::Error::WalletNotFound.into());
    }
    AppRepository::new(store).set_network(network)?;
    Ok(())
}
