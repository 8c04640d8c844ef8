use std::sync::Arc;

use connect_sdk::testing::{
    FakeIdentityProvider, RecordingLauncher, confidential_address, empty_wallet, explicit_utxo,
};
use connect_sdk::{
    ApprovalKind, AppRepository, MemoryStore, Network, PendingTransaction, RequestContext,
    RequestFrame, ResponseFrame, Router, RouterOptions, UtxoMap, WalletRepository,
};
use serde_json::{Value, json};

const NET: Network = Network::LiquidRegtest;
const SITE: &str = "https://dapp.example";
const PASSWORD: &str = "hunter2";

struct Harness {
    router: Arc<Router>,
    launcher: Arc<RecordingLauncher>,
}

fn setup_with(identities: FakeIdentityProvider, utxos: UtxoMap) -> Harness {
    let store = Arc::new(MemoryStore::new());
    AppRepository::new(store.clone()).set_network(NET).unwrap();
    let mut wallet = empty_wallet();
    wallet.utxo_map = utxos;
    WalletRepository::new(store.clone()).put(NET, wallet).unwrap();

    let launcher = Arc::new(RecordingLauncher::default());
    let router = Router::new(
        store,
        launcher.clone(),
        Arc::new(identities),
        RouterOptions::default(),
    );
    Harness {
        router: Arc::new(router),
        launcher,
    }
}

fn setup() -> Harness {
    setup_with(FakeIdentityProvider::new(PASSWORD), UtxoMap::new())
}

fn funded(value: u64) -> UtxoMap {
    let utxo = explicit_utxo(NET, 1, 0, NET.policy_asset(), value);
    [(utxo.outpoint(), utxo)].into_iter().collect()
}

fn authorize(h: &Harness) {
    let auth = h.router.authorizations();
    auth.set_pending(NET, SITE).unwrap();
    auth.approve_pending(NET).unwrap();
}

async fn call(h: &Harness, ctx: RequestContext, name: &str, params: Vec<Value>) -> ResponseFrame {
    h.router.handle(&ctx, RequestFrame::new("req", name, params)).await
}

/// Start a page request that suspends on an approval, and return once it is
/// parked.
async fn start(
    h: &Harness,
    name: &str,
    params: Vec<Value>,
    kind: ApprovalKind,
) -> tokio::task::JoinHandle<ResponseFrame> {
    let router = h.router.clone();
    let frame = RequestFrame::new("page", name, params);
    let task = tokio::spawn(async move { router.handle(&RequestContext::page(SITE), frame).await });
    while !h.router.approvals().is_waiting(kind) {
        tokio::task::yield_now().await;
    }
    task
}

fn error_of(response: &ResponseFrame) -> &str {
    assert!(!response.payload.success, "expected failure: {response:?}");
    response.payload.error.as_deref().unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn get_network_and_unknown_method() {
    let h = setup();

    let response = call(&h, RequestContext::page(SITE), "getNetwork", vec![]).await;
    assert!(response.payload.success);
    assert_eq!(response.payload.data, Some(json!("liquidregtest")));
    assert_eq!(response.id, "req");

    let response = call(&h, RequestContext::page(SITE), "getnetwork", vec![]).await;
    assert_eq!(error_of(&response), "Method not implemented.");
}

#[tokio::test]
async fn reads_require_authorization() {
    let h = setup();
    for name in ["getAddresses", "getNextAddress", "getNextChangeAddress"] {
        let response = call(&h, RequestContext::page(SITE), name, vec![]).await;
        assert_eq!(error_of(&response), "User must authorize the current website");
    }

    let response = call(&h, RequestContext::approval_ui(), "isEnabled", vec![]).await;
    assert_eq!(error_of(&response), "No active tab available");
}

#[tokio::test]
async fn pages_cannot_answer_approvals() {
    let h = setup();
    let auth = h.router.authorizations();
    auth.set_pending(NET, SITE).unwrap();

    let response = call(&h, RequestContext::page(SITE), "ENABLE_RESPONSE", vec![json!(true)]).await;
    assert!(!response.payload.success);
    assert!(!auth.is_enabled(NET, SITE).unwrap());
}

// ---------------------------------------------------------------------------
// Site authorization
// ---------------------------------------------------------------------------

#[tokio::test]
async fn enable_then_approve() {
    let h = setup();
    let page = start(&h, "enable", vec![], ApprovalKind::Enable).await;

    let auth = h.router.authorizations();
    assert_eq!(auth.get(NET).unwrap().enable_site_pending.as_deref(), Some(SITE));
    assert_eq!(h.launcher.routes(), vec!["connect/enable".to_string()]);

    let ui = call(&h, RequestContext::approval_ui(), "ENABLE_RESPONSE", vec![json!(true)]).await;
    assert!(ui.payload.success);

    let page = page.await.unwrap();
    assert!(page.payload.success);
    assert_eq!(page.id, "page");

    let data = auth.get(NET).unwrap();
    assert_eq!(data.enabled_sites, vec![SITE.to_string()]);
    assert_eq!(data.enable_site_pending, None);

    let response = call(&h, RequestContext::page(SITE), "isEnabled", vec![]).await;
    assert_eq!(response.payload.data, Some(json!(true)));
}

#[tokio::test]
async fn enable_then_reject() {
    let h = setup();
    let page = start(&h, "enable", vec![], ApprovalKind::Enable).await;

    let ui = call(&h, RequestContext::approval_ui(), "ENABLE_RESPONSE", vec![json!(false)]).await;
    assert!(ui.payload.success);

    let page = page.await.unwrap();
    assert_eq!(error_of(&page), "User rejected the connection request");

    let data = h.router.authorizations().get(NET).unwrap();
    assert!(data.enabled_sites.is_empty());
    assert_eq!(data.enable_site_pending, None);
}

#[tokio::test]
async fn second_enable_while_waiting_is_refused() {
    let h = setup();
    let first = start(&h, "enable", vec![], ApprovalKind::Enable).await;

    let second = call(&h, RequestContext::page("https://other.example"), "enable", vec![]).await;
    assert!(!second.payload.success);
    // the first request's pending origin is untouched
    let pending = h.router.authorizations().get(NET).unwrap().enable_site_pending;
    assert_eq!(pending.as_deref(), Some(SITE));

    call(&h, RequestContext::approval_ui(), "ENABLE_RESPONSE", vec![json!(true)]).await;
    assert!(first.await.unwrap().payload.success);
}

#[tokio::test]
async fn approve_without_pending_site_fails() {
    let h = setup();
    let ui = call(&h, RequestContext::approval_ui(), "ENABLE_RESPONSE", vec![json!(true)]).await;
    assert_eq!(error_of(&ui), "No pending site to enable");
}

#[tokio::test]
async fn disable_is_idempotent() {
    let h = setup();
    authorize(&h);

    for _ in 0..2 {
        let response = call(&h, RequestContext::page(SITE), "disable", vec![]).await;
        assert!(response.payload.success);
    }
    let response = call(&h, RequestContext::page(SITE), "isEnabled", vec![]).await;
    assert_eq!(response.payload.data, Some(json!(false)));
}

// ---------------------------------------------------------------------------
// Addresses
// ---------------------------------------------------------------------------

#[tokio::test]
async fn next_address_is_persisted_before_response() {
    let h = setup();
    authorize(&h);

    let first = call(&h, RequestContext::page(SITE), "getNextAddress", vec![]).await;
    let second = call(&h, RequestContext::page(SITE), "getNextAddress", vec![]).await;
    let change = call(&h, RequestContext::page(SITE), "getNextChangeAddress", vec![]).await;

    let address = |r: &ResponseFrame| r.payload.data.as_ref().unwrap()["confidentialAddress"].clone();
    assert_ne!(address(&first), address(&second));
    assert_eq!(
        change.payload.data.as_ref().unwrap()["derivationPath"],
        json!("m/84'/1'/0'/1/0")
    );

    let listed = call(&h, RequestContext::page(SITE), "getAddresses", vec![]).await;
    let listed = listed.payload.data.unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 3);
    assert_eq!(listed[0]["confidentialAddress"], address(&first));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_next_addresses_are_distinct() {
    let h = setup();
    authorize(&h);

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let router = h.router.clone();
            tokio::spawn(async move {
                let frame = RequestFrame::new(i.to_string(), "getNextAddress", vec![]);
                router.handle(&RequestContext::page(SITE), frame).await
            })
        })
        .collect();

    let mut addresses = Vec::new();
    for task in tasks {
        let response = task.await.unwrap();
        assert!(response.payload.success, "{response:?}");
        addresses.push(response.payload.data.unwrap()["confidentialAddress"].clone());
    }
    addresses.sort_by_key(|a| a.to_string());
    addresses.dedup();
    assert_eq!(addresses.len(), 8);
    assert_eq!(h.router.wallets().get(NET).unwrap().confidential_addresses.len(), 8);
}

// ---------------------------------------------------------------------------
// Spends
// ---------------------------------------------------------------------------

#[tokio::test]
async fn arity_errors_leave_no_pending_state() {
    let h = setup_with(FakeIdentityProvider::new(PASSWORD), funded(100_000));
    authorize(&h);
    let recipient = confidential_address(NET, 7).to_string();
    let asset = NET.policy_asset().to_string();

    let cases = [
        ("sendTransaction", vec![json!(recipient), json!(1000)]),
        ("sendTransaction", vec![json!(recipient), Value::Null, json!(asset)]),
        ("sendTransaction", vec![json!(recipient), json!(1), json!(asset), json!(1)]),
        ("signTransaction", vec![]),
        ("signTransaction", vec![Value::Null]),
    ];
    for (name, params) in cases {
        let response = call(&h, RequestContext::page(SITE), name, params).await;
        assert_eq!(error_of(&response), "Missing params");
    }

    assert_eq!(h.router.authorizations().pending_tx(NET).unwrap(), None);
    assert!(h.launcher.routes().is_empty());
}

#[tokio::test]
async fn send_requires_authorization() {
    let h = setup_with(FakeIdentityProvider::new(PASSWORD), funded(100_000));
    let params = vec![
        json!(confidential_address(NET, 7).to_string()),
        json!(1000),
        json!(NET.policy_asset().to_string()),
    ];
    let response = call(&h, RequestContext::page(SITE), "sendTransaction", params).await;
    assert_eq!(error_of(&response), "User must authorize the current website");
}

#[tokio::test]
async fn send_end_to_end() {
    let h = setup_with(FakeIdentityProvider::new(PASSWORD), funded(100_000));
    authorize(&h);
    let recipient = confidential_address(NET, 7).to_string();
    let asset = NET.policy_asset().to_string();

    let page = start(
        &h,
        "sendTransaction",
        vec![json!(recipient), json!("10000"), json!(asset)],
        ApprovalKind::SendTransaction,
    )
    .await;

    let pending = h.router.authorizations().pending_tx(NET).unwrap();
    assert_eq!(
        pending,
        Some(PendingTransaction::Send {
            origin: SITE.to_string(),
            recipient: recipient.clone(),
            amount: 10_000,
            asset: asset.clone(),
        })
    );
    assert_eq!(h.launcher.routes(), vec!["connect/spend".to_string()]);

    let ui = call(
        &h,
        RequestContext::approval_ui(),
        "SEND_TRANSACTION_RESPONSE",
        vec![json!(true), json!(PASSWORD)],
    )
    .await;
    assert!(ui.payload.success, "{ui:?}");

    let page = page.await.unwrap();
    assert!(page.payload.success, "{page:?}");
    let tx_hex = page.payload.data.unwrap();
    let tx_hex = tx_hex.as_str().unwrap();
    assert!(!tx_hex.is_empty());
    assert!(tx_hex.bytes().all(|b| b.is_ascii_hexdigit()));

    assert_eq!(h.router.authorizations().pending_tx(NET).unwrap(), None);
    // the change address used by the spend is now part of the wallet
    let wallet = h.router.wallets().get(NET).unwrap();
    assert_eq!(wallet.confidential_addresses.len(), 1);
    assert_eq!(
        wallet.confidential_addresses[0].derivation_path.as_deref(),
        Some("m/84'/1'/0'/1/0")
    );
}

#[tokio::test]
async fn wrong_password_keeps_request_open() {
    let h = setup_with(FakeIdentityProvider::new(PASSWORD), funded(100_000));
    authorize(&h);
    let page = start(
        &h,
        "sendTransaction",
        vec![
            json!(confidential_address(NET, 7).to_string()),
            json!(5000),
            json!(NET.policy_asset().to_string()),
        ],
        ApprovalKind::SendTransaction,
    )
    .await;

    let ui = call(
        &h,
        RequestContext::approval_ui(),
        "SEND_TRANSACTION_RESPONSE",
        vec![json!(true), json!("wrong")],
    )
    .await;
    assert_eq!(error_of(&ui), "Invalid password");
    assert!(h.router.approvals().is_waiting(ApprovalKind::SendTransaction));
    assert!(h.router.authorizations().pending_tx(NET).unwrap().is_some());

    let ui = call(
        &h,
        RequestContext::approval_ui(),
        "SEND_TRANSACTION_RESPONSE",
        vec![json!(false)],
    )
    .await;
    assert!(ui.payload.success);
    assert_eq!(error_of(&page.await.unwrap()), "User rejected the spend request");
    assert_eq!(h.router.authorizations().pending_tx(NET).unwrap(), None);
}

#[tokio::test]
async fn pipeline_failure_clears_pending() {
    // nothing to spend
    let h = setup();
    authorize(&h);
    let page = start(
        &h,
        "sendTransaction",
        vec![
            json!(confidential_address(NET, 7).to_string()),
            json!(5000),
            json!(NET.policy_asset().to_string()),
        ],
        ApprovalKind::SendTransaction,
    )
    .await;

    let ui = call(
        &h,
        RequestContext::approval_ui(),
        "SEND_TRANSACTION_RESPONSE",
        vec![json!(true), json!(PASSWORD)],
    )
    .await;
    let ui_error = error_of(&ui).to_string();
    assert!(ui_error.starts_with("insufficient funds"), "{ui_error}");

    let page = page.await.unwrap();
    assert_eq!(error_of(&page), ui_error);
    assert_eq!(h.router.authorizations().pending_tx(NET).unwrap(), None);
    assert!(!h.router.approvals().is_waiting(ApprovalKind::SendTransaction));
    // no change address is kept for a failed spend
    assert!(h.router.wallets().get(NET).unwrap().confidential_addresses.is_empty());
}

#[tokio::test]
async fn invalid_signatures_fail_the_spend() {
    let identities = FakeIdentityProvider {
        invalid_signatures: true,
        ..FakeIdentityProvider::new(PASSWORD)
    };
    let h = setup_with(identities, funded(100_000));
    authorize(&h);
    let page = start(
        &h,
        "sendTransaction",
        vec![
            json!(confidential_address(NET, 7).to_string()),
            json!(5000),
            json!(NET.policy_asset().to_string()),
        ],
        ApprovalKind::SendTransaction,
    )
    .await;

    call(
        &h,
        RequestContext::approval_ui(),
        "SEND_TRANSACTION_RESPONSE",
        vec![json!(true), json!(PASSWORD)],
    )
    .await;
    assert_eq!(
        error_of(&page.await.unwrap()),
        "Transaction contains invalid signatures"
    );
    assert_eq!(h.router.authorizations().pending_tx(NET).unwrap(), None);
}

#[tokio::test]
async fn send_rejects_bad_recipient_before_prompting() {
    let h = setup_with(FakeIdentityProvider::new(PASSWORD), funded(100_000));
    authorize(&h);
    let unconfidential = confidential_address(NET, 7).to_unconfidential().to_string();
    let wrong_network = confidential_address(Network::Liquid, 7).to_string();

    for recipient in [unconfidential, wrong_network, "not an address".to_string()] {
        let params = vec![json!(recipient), json!(5000), json!(NET.policy_asset().to_string())];
        let response = call(&h, RequestContext::page(SITE), "sendTransaction", params).await;
        assert!(!response.payload.success);
    }
    assert!(h.launcher.routes().is_empty());
    assert_eq!(h.router.authorizations().pending_tx(NET).unwrap(), None);
}

#[tokio::test]
async fn sign_transaction_round_trip() {
    let h = setup_with(FakeIdentityProvider::new(PASSWORD), funded(100_000));
    authorize(&h);

    let wallet = h.router.wallets().get(NET).unwrap();
    let intent = connect_sdk::builder::SpendIntent {
        recipient: confidential_address(NET, 7),
        amount: 1000,
        asset: NET.policy_asset(),
    };
    let unsigned = connect_sdk::builder::build_spend(
        &wallet.utxo_map,
        &intent,
        &confidential_address(NET, 8),
        NET,
        0.1,
    )
    .unwrap();
    let pset = connect_sdk::pset::encode_pset(&unsigned.pset);

    let page = start(
        &h,
        "signTransaction",
        vec![json!(pset)],
        ApprovalKind::SignTransaction,
    )
    .await;
    assert_eq!(h.launcher.routes(), vec!["connect/spend-pset".to_string()]);
    assert!(matches!(
        h.router.authorizations().pending_tx(NET).unwrap(),
        Some(PendingTransaction::Pset { .. })
    ));

    let ui = call(
        &h,
        RequestContext::approval_ui(),
        "SIGN_TRANSACTION_RESPONSE",
        vec![json!(true), json!(PASSWORD)],
    )
    .await;
    assert!(ui.payload.success, "{ui:?}");

    let page = page.await.unwrap();
    assert!(page.payload.success, "{page:?}");
    assert!(page.payload.data.unwrap().as_str().is_some_and(|s| !s.is_empty()));
    assert_eq!(h.router.authorizations().pending_tx(NET).unwrap(), None);
}

#[tokio::test]
async fn sign_response_without_pending_data() {
    let h = setup();
    let ui = call(
        &h,
        RequestContext::approval_ui(),
        "SIGN_TRANSACTION_RESPONSE",
        vec![json!(true), json!(PASSWORD)],
    )
    .await;
    assert_eq!(error_of(&ui), "Transaction data are missing");
}

#[tokio::test]
async fn sign_response_leaves_a_parked_send_alone() {
    let h = setup_with(FakeIdentityProvider::new(PASSWORD), funded(100_000));
    authorize(&h);
    let page = start(
        &h,
        "sendTransaction",
        vec![
            json!(confidential_address(NET, 7).to_string()),
            json!(5000),
            json!(NET.policy_asset().to_string()),
        ],
        ApprovalKind::SendTransaction,
    )
    .await;
    let parked = h.router.authorizations().pending_tx(NET).unwrap();
    assert!(matches!(parked, Some(PendingTransaction::Send { .. })));

    for params in [vec![json!(true), json!(PASSWORD)], vec![json!(false)]] {
        let ui = call(&h, RequestContext::approval_ui(), "SIGN_TRANSACTION_RESPONSE", params).await;
        assert_eq!(error_of(&ui), "Transaction data are missing");
        assert_eq!(h.router.authorizations().pending_tx(NET).unwrap(), parked);
        assert!(h.router.approvals().is_waiting(ApprovalKind::SendTransaction));
    }

    let ui = call(
        &h,
        RequestContext::approval_ui(),
        "SEND_TRANSACTION_RESPONSE",
        vec![json!(true), json!(PASSWORD)],
    )
    .await;
    assert!(ui.payload.success, "{ui:?}");
    let page = page.await.unwrap();
    assert!(page.payload.success, "{page:?}");
    assert_eq!(h.router.authorizations().pending_tx(NET).unwrap(), None);
}

#[tokio::test]
async fn sign_request_cannot_replace_a_parked_send() {
    let h = setup_with(FakeIdentityProvider::new(PASSWORD), funded(100_000));
    authorize(&h);
    let page = start(
        &h,
        "sendTransaction",
        vec![
            json!(confidential_address(NET, 7).to_string()),
            json!(5000),
            json!(NET.policy_asset().to_string()),
        ],
        ApprovalKind::SendTransaction,
    )
    .await;
    let parked = h.router.authorizations().pending_tx(NET).unwrap();

    let sign = call(&h, RequestContext::page(SITE), "signTransaction", vec![json!("cHNldP8=")]).await;
    assert_eq!(
        error_of(&sign),
        "a decision for SEND_TRANSACTION_RESPONSE is already awaited"
    );
    assert_eq!(h.router.authorizations().pending_tx(NET).unwrap(), parked);
    assert_eq!(h.launcher.routes(), vec!["connect/spend".to_string()]);

    call(&h, RequestContext::approval_ui(), "SEND_TRANSACTION_RESPONSE", vec![json!(false)]).await;
    assert_eq!(error_of(&page.await.unwrap()), "User rejected the spend request");
}
