//! liquid-connect CLI
//!
//!   liquid-connect init [--mnemonic <words>] --password <pw> [--network <net>]
//!   liquid-connect serve
//!   liquid-connect sync
//!   liquid-connect set-network <net>
//!   liquid-connect balances
//!
//! Every command takes `--data-dir <path>` (env: LIQUID_CONNECT_DATA_DIR).

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use connect_sdk::{AppRepository, AssetRepository, Network, WalletRepository, balances};
use liquid_connect::chain_adapter::ElectrumChainAdapter;
use liquid_connect::config::AppConfig;
use liquid_connect::logging::init_logging;
use liquid_connect::scheduler::SyncScheduler;
use liquid_connect::{open_store, run, setup};
use serde_json::{Value, json};

fn main() {
    init_logging();
    let _ = rustls::crypto::ring::default_provider().install_default();

    let args: Vec<String> = env::args().collect();
    let opts = ParsedArgs::parse(args.get(1..).unwrap_or_default());

    if opts.help {
        print_usage();
        return;
    }

    let result = match opts.command.as_deref() {
        Some("init") => cmd_init(&opts),
        Some("serve") => cmd_serve(&opts),
        Some("sync") => cmd_sync(&opts),
        Some("set-network") => cmd_set_network(&opts),
        Some("balances") => cmd_balances(&opts),
        Some(cmd) => Err(format!("Unknown command: {cmd}")),
        None => {
            print_usage();
            return;
        }
    };

    match result {
        Ok(Value::Null) => {}
        Ok(output) => println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_else(|_| output.to_string())
        ),
        Err(e) => {
            eprintln!("{}", json!({ "error": e }));
            std::process::exit(1);
        }
    }
}

#[derive(Default)]
struct ParsedArgs {
    command: Option<String>,
    positional: Option<String>,
    mnemonic: Option<String>,
    password: Option<String>,
    network: Option<String>,
    data_dir: Option<String>,
    help: bool,
}

impl ParsedArgs {
    fn parse(args: &[String]) -> Self {
        let mut opts = ParsedArgs::default();
        let mut positional = Vec::new();
        let mut i = 0;

        while i < args.len() {
            let arg = &args[i];
            let value = args.get(i + 1).cloned();
            match arg.as_str() {
                "--help" | "-h" => opts.help = true,
                "--mnemonic" | "-m" => {
                    opts.mnemonic = value;
                    i += 1;
                }
                "--password" | "-p" => {
                    opts.password = value;
                    i += 1;
                }
                "--network" | "-n" => {
                    opts.network = value;
                    i += 1;
                }
                "--data-dir" | "-d" => {
                    opts.data_dir = value;
                    i += 1;
                }
                _ if !arg.starts_with('-') => positional.push(arg.clone()),
                _ => {} // Ignore unknown flags
            }
            i += 1;
        }

        let mut positional = positional.into_iter();
        opts.command = positional.next();
        opts.positional = positional.next();

        // Environment fills what the command line left out
        if opts.password.is_none() {
            opts.password = env::var("LIQUID_CONNECT_PASSWORD").ok().filter(|s| !s.is_empty());
        }
        if opts.data_dir.is_none() {
            opts.data_dir = env::var("LIQUID_CONNECT_DATA_DIR").ok().filter(|s| !s.is_empty());
        }
        opts
    }

    fn data_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => PathBuf::from(dir),
            None => env::var("HOME")
                .map(|home| PathBuf::from(home).join(".liquid-connect"))
                .unwrap_or_else(|_| PathBuf::from(".liquid-connect")),
        }
    }
}

fn print_usage() {
    println!(
        r#"liquid-connect - dApp connector for a Liquid wallet

USAGE:
    liquid-connect <command> [options]

COMMANDS:
    init                    Create the wallet (all networks)
    serve                   Run the page/UI transport and background sync
    sync                    Reconcile UTXOs and asset infos once
    set-network <net>       Switch the current network
    balances                Print per-asset balances

OPTIONS:
    --mnemonic, -m <words>  BIP39 mnemonic for init (generated when absent)
    --password, -p <pw>     Wallet password (env: LIQUID_CONNECT_PASSWORD)
    --network, -n <net>     liquid|liquidtestnet|liquidregtest
    --data-dir, -d <path>   Data directory (env: LIQUID_CONNECT_DATA_DIR)
"#
    );
}

fn parse_network(raw: &str) -> Result<Network, String> {
    raw.parse::<Network>().map_err(|e| e.to_string())
}

fn runtime() -> Result<tokio::runtime::Runtime, String> {
    tokio::runtime::Runtime::new().map_err(|e| format!("Failed to create runtime: {e}"))
}

fn cmd_init(opts: &ParsedArgs) -> Result<Value, String> {
    let data_dir = opts.data_dir();
    let config = AppConfig::load_or_create(&data_dir).map_err(|e| e.to_string())?;
    let password = opts
        .password
        .as_deref()
        .ok_or("--password is required for init")?;
    let network = match opts.network.as_deref() {
        Some(raw) => parse_network(raw)?,
        None => config.network,
    };

    let store = open_store(&data_dir).map_err(|e| e.to_string())?;
    let done = setup::init_wallet(store, opts.mnemonic.as_deref(), password, network)
        .map_err(|e| e.to_string())?;
    Ok(json!({
        "network": done.network,
        "dataDir": data_dir,
        "mnemonic": done.generated_mnemonic,
    }))
}

fn cmd_serve(opts: &ParsedArgs) -> Result<Value, String> {
    let data_dir = opts.data_dir();
    let config = AppConfig::load_or_create(&data_dir).map_err(|e| e.to_string())?;
    let store = open_store(&data_dir).map_err(|e| e.to_string())?;

    runtime()?.block_on(async {
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("signal handler failed: {e}");
            }
        };
        run(config, store, shutdown).await.map_err(|e| e.to_string())
    })?;
    Ok(Value::Null)
}

fn cmd_sync(opts: &ParsedArgs) -> Result<Value, String> {
    let data_dir = opts.data_dir();
    let config = AppConfig::load_or_create(&data_dir).map_err(|e| e.to_string())?;
    let store = open_store(&data_dir).map_err(|e| e.to_string())?;
    let chain = ElectrumChainAdapter::new(&config).map_err(|e| e.to_string())?;

    runtime()?.block_on(async {
        SyncScheduler::new(store.clone(), Arc::new(chain))
            .sync_once()
            .await
            .map_err(|e| e.to_string())
    })?;
    cmd_balances(opts)
}

fn cmd_set_network(opts: &ParsedArgs) -> Result<Value, String> {
    let raw = opts
        .positional
        .as_deref()
        .or(opts.network.as_deref())
        .ok_or("usage: set-network <net>")?;
    let network = parse_network(raw)?;
    let store = open_store(&opts.data_dir()).map_err(|e| e.to_string())?;
    setup::set_network(store, network).map_err(|e| e.to_string())?;
    Ok(json!({ "network": network }))
}

fn cmd_balances(opts: &ParsedArgs) -> Result<Value, String> {
    let store = open_store(&opts.data_dir()).map_err(|e| e.to_string())?;
    let network = AppRepository::new(store.clone())
        .network()
        .map_err(|e| e.to_string())?;
    let wallet = WalletRepository::new(store.clone())
        .get(network)
        .map_err(|e| e.to_string())?;
    let infos = AssetRepository::new(store)
        .get(network)
        .map_err(|e| e.to_string())?;

    let rows: Vec<Value> = balances(wallet.utxo_map.values(), network)
        .into_iter()
        .map(|(asset, value)| {
            let info = infos.get(&asset);
            json!({
                "asset": asset,
                "value": value,
                "ticker": info.map(|i| i.ticker.as_str()),
                "precision": info.map(|i| i.precision),
            })
        })
        .collect();
    Ok(json!({ "network": network, "balances": rows }))
}
