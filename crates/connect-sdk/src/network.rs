use lwk_wollet::ElementsNetwork;
use lwk_wollet::elements::{AddressParams, AssetId};
use serde::{Deserialize, Serialize};

/// Network variants for Liquid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Liquid,
    LiquidTestnet,
    LiquidRegtest,
}

impl Network {
    pub const ALL: [Network; 3] = [
        Network::Liquid,
        Network::LiquidTestnet,
        Network::LiquidRegtest,
    ];

    pub fn into_lwk(self) -> ElementsNetwork {
        match self {
            Network::Liquid => ElementsNetwork::Liquid,
            Network::LiquidTestnet => ElementsNetwork::LiquidTestnet,
            Network::LiquidRegtest => ElementsNetwork::default_regtest(),
        }
    }

    pub fn is_mainnet(self) -> bool {
        matches!(self, Network::Liquid)
    }

    /// The L-BTC asset of this network. Fees are always paid in it.
    pub fn policy_asset(self) -> AssetId {
        self.into_lwk().policy_asset()
    }

    pub fn default_electrum_url(self) -> &'static str {
        match self {
            Network::Liquid => "ssl://blockstream.info:995",
            Network::LiquidTestnet => "ssl://blockstream.info:465",
            Network::LiquidRegtest => "tcp://localhost:50001",
        }
    }

    pub fn esplora_url(self) -> &'static str {
        match self {
            Network::Liquid => "https://blockstream.info/liquid/api",
            Network::LiquidTestnet => "https://blockstream.info/liquidtestnet/api",
            Network::LiquidRegtest => "http://localhost:3000",
        }
    }

    pub fn address_params(self) -> &'static AddressParams {
        match self {
            Network::Liquid => &AddressParams::LIQUID,
            Network::LiquidTestnet => &AddressParams::LIQUID_TESTNET,
            Network::LiquidRegtest => &AddressParams::ELEMENTS,
        }
    }

    /// BIP44 coin type used for the wallet account path.
    pub fn coin_type(self) -> u32 {
        if self.is_mainnet() { 1776 } else { 1 }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Network::Liquid => "liquid",
            Network::LiquidTestnet => "liquidtestnet",
            Network::LiquidRegtest => "liquidregtest",
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" | "liquid" => Ok(Network::Liquid),
            "testnet" | "liquid-testnet" | "liquidtestnet" => Ok(Network::LiquidTestnet),
            "regtest" | "liquid-regtest" | "liquidregtest" => Ok(Network::LiquidRegtest),
            _ => Err(format!("invalid network: {}", s)),
        }
    }
}
