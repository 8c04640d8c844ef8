use std::sync::Arc;
use std::time::Duration;

use connect_sdk::testing::{FakeIdentityProvider, RecordingLauncher, empty_wallet};
use connect_sdk::{
    ApprovalKind, AppRepository, MemoryStore, Network, ResponseFrame, Router, RouterOptions,
    WalletRepository,
};
use liquid_connect::server;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

const NET: Network = Network::LiquidRegtest;
const SITE: &str = "https://dapp.example";
const UI_TOKEN: &str = "0f1e2d3c";

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    router: Arc<Router>,
    addr: std::net::SocketAddr,
    _stop: oneshot::Sender<()>,
}

async fn start_server() -> Harness {
    let store = Arc::new(MemoryStore::new());
    AppRepository::new(store.clone()).set_network(NET).unwrap();
    WalletRepository::new(store.clone())
        .put(NET, empty_wallet())
        .unwrap();
    let router = Arc::new(Router::new(
        store,
        Arc::new(RecordingLauncher::default()),
        Arc::new(FakeIdentityProvider::new("pw")),
        RouterOptions::default(),
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(server::serve(listener, router.clone(), UI_TOKEN.into(), async move {
        let _ = stopped.await;
    }));
    Harness {
        router,
        addr,
        _stop: stop,
    }
}

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
}

impl Client {
    async fn connect(h: &Harness, hello: Value) -> Self {
        let stream = TcpStream::connect(h.addr).await.unwrap();
        let (read, write) = stream.into_split();
        let mut client = Client {
            lines: BufReader::new(read).lines(),
            write,
        };
        client.send_line(&hello.to_string()).await;
        client
    }

    async fn send_line(&mut self, line: &str) {
        self.write.write_all(line.as_bytes()).await.unwrap();
        self.write.write_all(b"\n").await.unwrap();
    }

    async fn request(&mut self, id: &str, name: &str, params: Value) {
        let frame = json!({ "id": id, "name": name, "params": params });
        self.send_line(&frame.to_string()).await;
    }

    async fn response(&mut self) -> ResponseFrame {
        let line = self.lines.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn page_gets_answers_by_id() {
    let h = start_server().await;
    let mut page = Client::connect(&h, json!({ "origin": SITE })).await;

    page.request("1", "getNetwork", json!([])).await;
    let response = page.response().await;
    assert_eq!(response.id, "1");
    assert_eq!(response.payload.data, Some(json!("liquidregtest")));

    page.request("2", "isEnabled", json!([])).await;
    let response = page.response().await;
    assert_eq!(response.id, "2");
    assert_eq!(response.payload.data, Some(json!(false)));
}

#[tokio::test]
async fn malformed_frame_with_id_is_answered() {
    let h = start_server().await;
    let mut page = Client::connect(&h, json!({ "origin": SITE })).await;

    page.send_line("not json").await;
    page.send_line(r#"{"id":"7","params":"oops"}"#).await;
    let response = page.response().await;
    assert_eq!(response.id, "7");
    assert!(!response.payload.success);
}

#[tokio::test]
async fn enable_is_decided_from_the_ui_connection() {
    let h = start_server().await;
    let mut page = Client::connect(&h, json!({ "origin": SITE })).await;
    let mut ui = Client::connect(&h, json!({ "token": UI_TOKEN })).await;

    page.request("e", "enable", json!([])).await;
    while !h.router.approvals().is_waiting(ApprovalKind::Enable) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // a page cannot answer its own prompt
    page.request("x", "ENABLE_RESPONSE", json!([true])).await;
    let refused = page.response().await;
    assert_eq!(refused.id, "x");
    assert!(!refused.payload.success);

    ui.request("u", "ENABLE_RESPONSE", json!([true])).await;
    assert!(ui.response().await.payload.success);

    let enabled = page.response().await;
    assert_eq!(enabled.id, "e");
    assert!(enabled.payload.success);

    page.request("3", "isEnabled", json!([])).await;
    assert_eq!(page.response().await.payload.data, Some(json!(true)));
}

#[tokio::test]
async fn empty_origin_closes_the_connection() {
    let h = start_server().await;
    let mut page = Client::connect(&h, json!({ "origin": "" })).await;
    assert!(page.lines.next_line().await.unwrap_or(None).is_none());
}

#[tokio::test]
async fn tokenless_ui_cannot_approve() {
    let h = start_server().await;
    let mut page = Client::connect(&h, json!({ "origin": SITE })).await;

    page.request("e", "enable", json!([])).await;
    while !h.router.approvals().is_waiting(ApprovalKind::Enable) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    for hello in [json!({}), json!({ "token": "guess" })] {
        let mut impostor = Client::connect(&h, hello).await;
        // closed right after the hello, before any frame is read
        assert!(impostor.lines.next_line().await.unwrap_or(None).is_none());
    }

    assert!(h.router.approvals().is_waiting(ApprovalKind::Enable));
    page.request("3", "isEnabled", json!([])).await;
    assert_eq!(page.response().await.payload.data, Some(json!(false)));
}
