//! `Router`: dispatch of request frames to the wallet engine.
//!
//! Every frame is answered exactly once. Handler errors are converted into
//! `{success: false, error}` at the single-request boundary in
//! [`Router::handle`]; nothing below it writes a response.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use lwk_wollet::elements::{Address, AssetId};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::approval::{ApprovalBridge, ApprovalKind, ApprovalLauncher};
use crate::authorization::{AuthorizationStore, PendingTransaction};
use crate::blinding::select_outputs;
use crate::builder::{SpendIntent, build_spend, parse_recipient};
use crate::error::{Error, Result};
use crate::identity::IdentityProvider;
use crate::kv::KeyValueStore;
use crate::network::Network;
use crate::protocol::{Operation, RequestFrame, ResponseFrame};
use crate::repos::{AppRepository, WalletRepository};
use crate::signer::{run_blocking, sign_raw, sign_spend};
use crate::wallet::AddressRecord;

const CONNECTION_REJECTED: &str = "User rejected the connection request";
const SPEND_REJECTED: &str = "User rejected the spend request";

/// Default fee rate in sat/vbyte.
pub const DEFAULT_FEE_RATE: f64 = 0.1;

// ── Options & context ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouterOptions {
    pub fee_rate: f64,
    /// Give up on an approval after this long. `None` waits forever.
    pub approval_timeout: Option<Duration>,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            fee_rate: DEFAULT_FEE_RATE,
            approval_timeout: None,
        }
    }
}

/// Who sent a frame. Pages carry their origin; the approval UI carries none.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub origin: Option<String>,
}

impl RequestContext {
    pub fn page(origin: impl Into<String>) -> Self {
        Self {
            origin: Some(origin.into()),
        }
    }

    pub fn approval_ui() -> Self {
        Self { origin: None }
    }

    fn origin(&self) -> Result<&str> {
        self.origin.as_deref().ok_or(Error::NoOrigin)
    }
}

// ── Struct ──────────────────────────────────────────────────────────────────

pub struct Router {
    auth: AuthorizationStore,
    app: AppRepository,
    wallets: WalletRepository,
    approvals: ApprovalBridge,
    identities: Arc<dyn IdentityProvider>,
    fee_rate: f64,
}

impl Router {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        launcher: Arc<dyn ApprovalLauncher>,
        identities: Arc<dyn IdentityProvider>,
        options: RouterOptions,
    ) -> Self {
        Self {
            auth: AuthorizationStore::new(store.clone()),
            app: AppRepository::new(store.clone()),
            wallets: WalletRepository::new(store),
            approvals: ApprovalBridge::new(launcher, options.approval_timeout),
            identities,
            fee_rate: options.fee_rate,
        }
    }

    pub fn approvals(&self) -> &ApprovalBridge {
        &self.approvals
    }

    pub fn authorizations(&self) -> &AuthorizationStore {
        &self.auth
    }

    pub fn wallets(&self) -> &WalletRepository {
        &self.wallets
    }

    // ── Dispatch ────────────────────────────────────────────────────────

    /// Answer one frame. Never fails: errors become error payloads.
    pub async fn handle(&self, ctx: &RequestContext, frame: RequestFrame) -> ResponseFrame {
        let RequestFrame { id, name, params } = frame;
        match self.dispatch(ctx, &name, &params).await {
            Ok(data) => ResponseFrame::ok(id, data),
            Err(e) => {
                log::debug!("{name} ({id}) failed: {e}");
                ResponseFrame::err(id, &e)
            }
        }
    }

    /// Answer every frame from `requests` on its own task, so a request
    /// parked on an approval never holds up the ones behind it.
    pub async fn serve(
        self: Arc<Self>,
        ctx: RequestContext,
        mut requests: mpsc::Receiver<RequestFrame>,
        responses: mpsc::Sender<ResponseFrame>,
    ) {
        let ctx = Arc::new(ctx);
        while let Some(frame) = requests.recv().await {
            let router = self.clone();
            let ctx = ctx.clone();
            let responses = responses.clone();
            tokio::spawn(async move {
                let response = router.handle(&ctx, frame).await;
                if responses.send(response).await.is_err() {
                    log::debug!("connection closed before its response was sent");
                }
            });
        }
    }

    async fn dispatch(
        &self,
        ctx: &RequestContext,
        name: &str,
        params: &[Value],
    ) -> Result<Option<Value>> {
        let network = self.app.network()?;
        let op = Operation::from_name(name)
            .ok_or_else(|| Error::UnknownOperation(name.to_string()))?;
        let from_ui = matches!(
            op,
            Operation::EnableResponse
                | Operation::SignTransactionResponse
                | Operation::SendTransactionResponse
        );
        if from_ui && ctx.origin.is_some() {
            return Err(Error::InvalidRequest(format!(
                "{op} is reserved for the approval UI"
            )));
        }

        match op {
            Operation::GetNetwork => Ok(Some(Value::String(network.as_str().to_string()))),
            Operation::IsEnabled => {
                let enabled = self.auth.is_enabled(network, ctx.origin()?)?;
                Ok(Some(Value::Bool(enabled)))
            }
            Operation::Enable => self.enable(network, ctx.origin()?).await,
            Operation::EnableResponse => self.enable_response(network, params),
            Operation::Disable => {
                self.auth.disable(network, ctx.origin()?)?;
                Ok(None)
            }
            Operation::GetAddresses => {
                self.require_enabled(network, ctx)?;
                let wallet = self.wallets.get(network)?;
                let addresses = self.identities.watch_only(&wallet, network)?.addresses()?;
                to_data(&addresses)
            }
            Operation::GetNextAddress => {
                self.require_enabled(network, ctx)?;
                let record = self.persist_next_address(network, false).await?;
                to_data(&record)
            }
            Operation::GetNextChangeAddress => {
                self.require_enabled(network, ctx)?;
                let record = self.persist_next_address(network, true).await?;
                to_data(&record)
            }
            Operation::SignTransaction => self.sign_transaction(network, ctx, params).await,
            Operation::SignTransactionResponse => {
                self.sign_transaction_response(network, params).await
            }
            Operation::SendTransaction => self.send_transaction(network, ctx, params).await,
            Operation::SendTransactionResponse => {
                self.send_transaction_response(network, params).await
            }
        }
    }

    fn require_enabled(&self, network: Network, ctx: &RequestContext) -> Result<()> {
        if self.auth.is_enabled(network, ctx.origin()?)? {
            Ok(())
        } else {
            Err(Error::AuthorizationRequired)
        }
    }

    /// Derive the next address and store it in the same update, so two
    /// concurrent calls never hand out the same index. Runs on the blocking
    /// pool: the update holds the store while keys are derived.
    async fn persist_next_address(&self, network: Network, change: bool) -> Result<AddressRecord> {
        let wallets = self.wallets.clone();
        let identities = self.identities.clone();
        let record = run_blocking(move || {
            wallets.update(network, |wallet| {
                let identity = identities.watch_only(wallet, network)?;
                let record = if change {
                    identity.next_change_address()?
                } else {
                    identity.next_address()?
                };
                wallet.add_address(record.clone());
                Ok(record)
            })
        })
        .await?;
        log::info!("derived address {}", record.confidential_address);
        Ok(record)
    }

    // ── Site authorization ──────────────────────────────────────────────

    async fn enable(&self, network: Network, origin: &str) -> Result<Option<Value>> {
        let outcome = self
            .approvals
            .request_with(ApprovalKind::Enable, || self.auth.set_pending(network, origin))
            .await;
        match outcome {
            Ok(_) => {
                log::info!("{origin} enabled on {network}");
                Ok(None)
            }
            // The slot belongs to another enable: its pending origin stays.
            Err(e @ Error::ApprovalPending(_)) => Err(e),
            Err(e) => {
                if let Err(clear) = self.auth.clear_pending(network) {
                    log::warn!("could not clear pending site: {clear}");
                }
                Err(e)
            }
        }
    }

    fn enable_response(&self, network: Network, params: &[Value]) -> Result<Option<Value>> {
        let (accepted, _) = decision_params(params);
        if !accepted {
            self.auth.clear_pending(network)?;
            self.approvals.decide(
                ApprovalKind::Enable,
                Err(Error::UserRejected(CONNECTION_REJECTED.into())),
            );
            return Ok(None);
        }

        match self.auth.approve_pending(network) {
            Ok(origin) => {
                log::debug!("approved {origin}");
                self.approvals.decide(ApprovalKind::Enable, Ok(None));
                Ok(None)
            }
            Err(e) => {
                let reply = e.relay();
                self.approvals.decide(ApprovalKind::Enable, Err(e));
                Err(reply)
            }
        }
    }

    // ── Raw PSET signing ────────────────────────────────────────────────

    async fn sign_transaction(
        &self,
        network: Network,
        ctx: &RequestContext,
        params: &[Value],
    ) -> Result<Option<Value>> {
        self.require_enabled(network, ctx)?;
        let origin = ctx.origin()?;
        let [pset] = exact_params::<1>(params)?;
        let pset = pset
            .as_str()
            .ok_or_else(|| Error::InvalidRequest("PSET must be a base64 string".into()))?
            .to_string();

        let pending = PendingTransaction::Pset {
            origin: origin.to_string(),
            pset,
        };
        let outcome = self
            .approvals
            .request_with(ApprovalKind::SignTransaction, || {
                self.claim_pending_tx(network, pending)
            })
            .await;
        self.finish_pending(network, ApprovalKind::SignTransaction, outcome)
    }

    async fn sign_transaction_response(
        &self,
        network: Network,
        params: &[Value],
    ) -> Result<Option<Value>> {
        self.ensure_own_pending(network, ApprovalKind::SignTransaction)?;
        let (accepted, password) = decision_params(params);
        if !accepted {
            return self.reject_spend(network, ApprovalKind::SignTransaction);
        }
        let outcome = self.complete_sign(network, password).await;
        self.deliver(network, ApprovalKind::SignTransaction, outcome)
    }

    async fn complete_sign(&self, network: Network, password: String) -> Result<String> {
        let Some(PendingTransaction::Pset { pset, .. }) = self.auth.pending_tx(network)? else {
            return Err(Error::MissingPendingData("Transaction data are missing".into()));
        };
        let wallet = self.wallets.get(network)?;
        let identities = self.identities.clone();
        run_blocking(move || {
            let identity = identities.spending(&wallet, network, &password)?;
            sign_raw(identity.as_ref(), &pset)
        })
        .await
    }

    // ── Wallet-built spends ─────────────────────────────────────────────

    async fn send_transaction(
        &self,
        network: Network,
        ctx: &RequestContext,
        params: &[Value],
    ) -> Result<Option<Value>> {
        self.require_enabled(network, ctx)?;
        let origin = ctx.origin()?;
        let [recipient, amount, asset] = exact_params::<3>(params)?;
        let recipient = recipient
            .as_str()
            .ok_or_else(|| Error::InvalidRequest("recipient must be an address".into()))?;
        parse_recipient(recipient, network)?;
        let amount = parse_amount(amount)?;
        let asset = asset
            .as_str()
            .and_then(|hex| AssetId::from_str(hex).ok())
            .ok_or_else(|| Error::InvalidRequest("asset must be a 32-byte hex id".into()))?;

        let pending = PendingTransaction::Send {
            origin: origin.to_string(),
            recipient: recipient.to_string(),
            amount,
            asset: asset.to_string(),
        };
        let outcome = self
            .approvals
            .request_with(ApprovalKind::SendTransaction, || {
                self.claim_pending_tx(network, pending)
            })
            .await;
        self.finish_pending(network, ApprovalKind::SendTransaction, outcome)
    }

    async fn send_transaction_response(
        &self,
        network: Network,
        params: &[Value],
    ) -> Result<Option<Value>> {
        self.ensure_own_pending(network, ApprovalKind::SendTransaction)?;
        let (accepted, password) = decision_params(params);
        if !accepted {
            return self.reject_spend(network, ApprovalKind::SendTransaction);
        }
        let outcome = self.complete_send(network, password).await;
        self.deliver(network, ApprovalKind::SendTransaction, outcome)
    }

    async fn complete_send(&self, network: Network, password: String) -> Result<String> {
        let Some(PendingTransaction::Send {
            recipient,
            amount,
            asset,
            ..
        }) = self.auth.pending_tx(network)?
        else {
            return Err(Error::MissingPendingData("Transaction data are missing".into()));
        };

        let wallet = self.wallets.get(network)?;
        let change_record = self
            .identities
            .watch_only(&wallet, network)?
            .next_change_address()?;
        let change_address = Address::from_str(&change_record.confidential_address)
            .map_err(|e| Error::InvalidAddress(e.to_string()))?;
        let intent = SpendIntent {
            recipient: parse_recipient(&recipient, network)?,
            amount,
            asset: AssetId::from_str(&asset)
                .map_err(|e| Error::InvalidRequest(e.to_string()))?,
        };

        let unsigned = build_spend(
            &wallet.utxo_map,
            &intent,
            &change_address,
            network,
            self.fee_rate,
        )?;
        let selection = select_outputs(&unsigned.pset, Some(&intent.recipient));

        let identities = self.identities.clone();
        let tx_hex = run_blocking(move || {
            let identity = identities.spending(&wallet, network, &password)?;
            sign_spend(identity.as_ref(), unsigned.pset, &selection)
        })
        .await?;

        self.wallets.update(network, |wallet| {
            wallet.add_address(change_record);
            Ok(())
        })?;
        Ok(tx_hex)
    }

    // ── Shared pending-slot handling ────────────────────────────────────
    //
    // Both spend kinds share one pending-transaction slot. Each request only
    // ever clears a record of its own kind.

    /// Store `pending` unless a live request of the other kind holds the
    /// slot. A leftover record nobody waits on is replaced.
    fn claim_pending_tx(&self, network: Network, pending: PendingTransaction) -> Result<()> {
        if let Some(current) = self.auth.pending_tx(network)? {
            let other = current.kind();
            if other != pending.kind() && self.approvals.is_waiting(other) {
                return Err(Error::ApprovalPending(other.to_string()));
            }
        }
        self.auth.set_pending_tx(network, pending)
    }

    /// Refuse a response whose kind does not match the stored record,
    /// leaving that record and its waiter untouched.
    fn ensure_own_pending(&self, network: Network, kind: ApprovalKind) -> Result<()> {
        match self.auth.pending_tx(network)? {
            Some(tx) if tx.kind() != kind => Err(Error::MissingPendingData(
                "Transaction data are missing".into(),
            )),
            _ => Ok(()),
        }
    }

    /// Map the waiter's outcome to the page's response, clearing the pending
    /// transaction on every failure this request owns.
    fn finish_pending(
        &self,
        network: Network,
        kind: ApprovalKind,
        outcome: Result<Option<String>>,
    ) -> Result<Option<Value>> {
        match outcome {
            Ok(encoded) => Ok(encoded.map(Value::String)),
            // Another request holds the slot and its pending data.
            Err(e @ Error::ApprovalPending(_)) => Err(e),
            Err(e) => {
                self.release_pending_tx(network, kind);
                Err(e)
            }
        }
    }

    fn reject_spend(&self, network: Network, kind: ApprovalKind) -> Result<Option<Value>> {
        if let Some(tx) = self.auth.take_pending_tx(network, kind)? {
            log::info!("{kind} from {} rejected", tx.origin());
        }
        self.approvals
            .decide(kind, Err(Error::UserRejected(SPEND_REJECTED.into())));
        Ok(None)
    }

    /// Report a completed pipeline to the waiting page; the UI gets `Ok`
    /// or the same error. A wrong password keeps the request open so the
    /// user can retry.
    fn deliver(
        &self,
        network: Network,
        kind: ApprovalKind,
        outcome: Result<String>,
    ) -> Result<Option<Value>> {
        match outcome {
            Ok(encoded) => {
                self.release_pending_tx(network, kind);
                self.approvals.decide(kind, Ok(Some(encoded)));
                Ok(None)
            }
            Err(Error::InvalidCredential) => Err(Error::InvalidCredential),
            Err(e) => {
                log::warn!("{kind} failed: {e}");
                self.release_pending_tx(network, kind);
                let reply = e.relay();
                self.approvals.decide(kind, Err(e));
                Err(reply)
            }
        }
    }

    fn release_pending_tx(&self, network: Network, kind: ApprovalKind) {
        if let Err(e) = self.auth.take_pending_tx(network, kind) {
            log::warn!("could not clear pending transaction: {e}");
        }
    }
}

// ── Parameter helpers ───────────────────────────────────────────────────────

/// Exactly `N` non-null parameters.
fn exact_params<const N: usize>(params: &[Value]) -> Result<[&Value; N]> {
    if params.len() != N || params.iter().any(Value::is_null) {
        return Err(Error::missing_params());
    }
    let mut out = [&Value::Null; N];
    for (slot, value) in out.iter_mut().zip(params) {
        *slot = value;
    }
    Ok(out)
}

/// `(accepted, password)` of a response operation. Anything but a literal
/// `true` counts as a rejection.
fn decision_params(params: &[Value]) -> (bool, String) {
    let accepted = params.first().and_then(Value::as_bool).unwrap_or(false);
    let password = params
        .get(1)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    (accepted, password)
}

/// Positive satoshi amount, as a JSON integer or a decimal digit string.
fn parse_amount(value: &Value) -> Result<u64> {
    let amount = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
            s.parse().ok()
        }
        _ => None,
    };
    match amount {
        Some(amount) if amount > 0 => Ok(amount),
        _ => Err(Error::InvalidRequest("amount must be a positive integer".into())),
    }
}

fn to_data<T: serde::Serialize>(value: &T) -> Result<Option<Value>> {
    serde_json::to_value(value)
        .map(Some)
        .map_err(|e| Error::InvalidRequest(e.to_string()))
}
