//! Newline-delimited JSON transport for pages and the approval UI.
//!
//! Each connection opens with a [`Hello`] line. A hello carrying an origin
//! makes the connection a page. A hello without one must present the
//! per-run UI token to become the approval UI; otherwise it is closed.
//! Every following line is a [`RequestFrame`]; responses are written back as
//! [`ResponseFrame`] lines in completion order, matched by `id`.

use std::future::Future;
use std::sync::Arc;

use connect_sdk::{Error, Hello, RequestContext, RequestFrame, ResponseFrame, Router};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

const FRAME_QUEUE: usize = 32;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bad hello: {0}")]
    Hello(String),
}

/// Accept connections until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    router: Arc<Router>,
    ui_token: Arc<str>,
    shutdown: impl Future<Output = ()>,
) -> Result<(), ServerError> {
    log::info!("listening on {}", listener.local_addr()?);
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                log::info!("transport shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                log::debug!("connection from {peer}");
                let router = router.clone();
                let ui_token = ui_token.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(router, &ui_token, stream).await {
                        log::warn!("connection from {peer} ended: {e}");
                    }
                });
            }
        }
    }
}

fn context_of(hello: Hello, ui_token: &str) -> Result<RequestContext, ServerError> {
    match hello.origin {
        None if hello.token.as_deref() == Some(ui_token) => Ok(RequestContext::approval_ui()),
        None => Err(ServerError::Hello("approval UI token missing or wrong".into())),
        Some(origin) if origin.trim().is_empty() => {
            Err(ServerError::Hello("origin must not be empty".into()))
        }
        Some(origin) => Ok(RequestContext::page(origin)),
    }
}

async fn handle_connection(
    router: Arc<Router>,
    ui_token: &str,
    stream: TcpStream,
) -> Result<(), ServerError> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    let Some(first) = lines.next_line().await? else {
        return Ok(());
    };
    let hello: Hello =
        serde_json::from_str(&first).map_err(|e| ServerError::Hello(e.to_string()))?;
    let ctx = context_of(hello, ui_token)?;
    match &ctx.origin {
        Some(origin) => log::info!("page connected: {origin}"),
        None => log::info!("approval UI connected"),
    }

    let (requests, request_rx) = mpsc::channel(FRAME_QUEUE);
    let (responses, mut response_rx) = mpsc::channel::<ResponseFrame>(FRAME_QUEUE);
    tokio::spawn(router.serve(ctx, request_rx, responses.clone()));

    let writer = tokio::spawn(async move {
        while let Some(response) = response_rx.recv().await {
            let mut line = serde_json::to_string(&response)?;
            line.push('\n');
            write.write_all(line.as_bytes()).await?;
        }
        Ok::<_, ServerError>(())
    });

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RequestFrame>(&line) {
            Ok(frame) => {
                if requests.send(frame).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                // Answer when the id can still be recovered, otherwise drop.
                let id = serde_json::from_str::<Value>(&line)
                    .ok()
                    .and_then(|v| v.get("id").and_then(Value::as_str).map(str::to_string));
                match id {
                    Some(id) => {
                        let error = Error::InvalidRequest(format!("malformed request: {e}"));
                        if responses.send(ResponseFrame::err(id, &error)).await.is_err() {
                            break;
                        }
                    }
                    None => log::warn!("dropping malformed frame: {e}"),
                }
            }
        }
    }

    // Requests still parked on an approval keep the writer alive until they
    // are decided.
    drop(requests);
    drop(responses);
    match writer.await {
        Ok(result) => result,
        Err(e) => Err(ServerError::Io(std::io::Error::other(e.to_string()))),
    }
}
