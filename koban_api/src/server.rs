// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::auth::{self, AuthError};
use koban_transfers::{
    ChainRecorder, LedgerStore, StoreError, Tokens, TransactionFilter, TransactionRecord,
    TransferCoordinator, TransferError, UserRecord,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::info;
use warp::{
    http::{header::CONTENT_TYPE, HeaderValue, Response, StatusCode},
    Filter, Rejection, Reply,
};

/// Transactions returned by the history endpoint when no limit is given.
const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Everything a request handler needs, shared across request tasks.
pub struct AppContext<S, C> {
    pub coordinator: TransferCoordinator<S, C>,
    pub store: Arc<S>,
    pub starting_balance: Tokens,
}

impl<S, C> Clone for AppContext<S, C> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            store: Arc::clone(&self.store),
            starting_balance: self.starting_balance,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    user_id: Option<String>,
    display_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    sender_id: Option<String>,
    recipient_id: Option<String>,
    /// Exact decimal string; a JSON number would go through a float.
    amount: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    transfer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    chain_ref: Option<String>,
}

impl ErrorBody {
    fn new(error: &'static str, message: impl Into<String>) -> Self {
        Self {
            error,
            message: message.into(),
            transfer_id: None,
            chain_ref: None,
        }
    }
}

/// Public projection of a user document: no credential, no version stamp.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserView {
    user_id: String,
    display_name: String,
    balance: String,
    total_sent: String,
}

impl From<&UserRecord> for UserView {
    fn from(user: &UserRecord) -> Self {
        Self {
            user_id: user.user_id.clone(),
            display_name: user.display_name.clone(),
            balance: user.balance.to_string(),
            total_sent: user.total_sent.to_string(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LeaderboardEntry {
    user_id: String,
    display_name: String,
    total_sent: String,
}

impl From<&UserRecord> for LeaderboardEntry {
    fn from(user: &UserRecord) -> Self {
        Self {
            user_id: user.user_id.clone(),
            display_name: user.display_name.clone(),
            total_sent: user.total_sent.to_string(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterResponse {
    message: String,
    user: UserView,
    api_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TransferResponse {
    message: String,
    transfer_id: String,
    transaction_reference: String,
    new_sender_balance: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserInfoResponse {
    user_info: UserView,
    all_users: Vec<LeaderboardEntry>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionView {
    transaction_id: String,
    sender_id: String,
    recipient_id: String,
    amount: String,
    timestamp: String,
    transaction_hash: String,
}

impl From<&TransactionRecord> for TransactionView {
    fn from(tx: &TransactionRecord) -> Self {
        Self {
            transaction_id: tx.id.to_string(),
            sender_id: tx.sender_id.clone(),
            recipient_id: tx.recipient_id.clone(),
            amount: tx.amount.to_string(),
            timestamp: tx.timestamp.to_rfc3339(),
            transaction_hash: tx.chain_ref.to_string(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionsResponse {
    transactions: Vec<TransactionView>,
}

fn json_reply(status: StatusCode, body: &impl Serialize) -> Response<String> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    let mut response = Response::new(json);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn error_reply(error: &TransferError) -> Response<String> {
    let status = match error {
        TransferError::AmountNotPositive
        | TransferError::SelfTransfer
        | TransferError::MissingField(_)
        | TransferError::LossOfTokenPrecision
        | TransferError::ExcessiveTokenValue
        | TransferError::FailedToParseTokens(_)
        | TransferError::HexDeserializationFailed(_)
        | TransferError::NumericOverflow => StatusCode::BAD_REQUEST,
        TransferError::UnknownUser(_) | TransferError::UnknownSettlement(_) => {
            StatusCode::NOT_FOUND
        }
        TransferError::NotEnoughBalance(..) | TransferError::Conflict => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let mut body = ErrorBody::new(error.kind(), error.to_string());
    if let TransferError::SettlementIncomplete { id, chain_ref } = error {
        // Enough context for an operator to drive the idempotent re-commit.
        body.transfer_id = Some(id.to_string());
        body.chain_ref = Some(chain_ref.to_string());
    }
    json_reply(status, &body)
}

fn auth_error_reply(error: &AuthError) -> Response<String> {
    match error {
        AuthError::MissingCredential | AuthError::UnknownCredential => json_reply(
            StatusCode::UNAUTHORIZED,
            &ErrorBody::new("unauthorized", error.to_string()),
        ),
        AuthError::Store(_) => json_reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            &ErrorBody::new("store", error.to_string()),
        ),
    }
}

fn generate_api_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

async fn handle_register<S, C>(
    ctx: AppContext<S, C>,
    req: RegisterRequest,
) -> Result<Response<String>, Infallible>
where
    S: LedgerStore + 'static,
    C: ChainRecorder + 'static,
{
    let Some(user_id) = req.user_id.filter(|id| !id.is_empty()) else {
        return Ok(error_reply(&TransferError::MissingField("userId")));
    };
    let Some(display_name) = req.display_name.filter(|name| !name.is_empty()) else {
        return Ok(error_reply(&TransferError::MissingField("displayName")));
    };

    let api_token = generate_api_token();
    let user = UserRecord::new(user_id, display_name, api_token.clone(), ctx.starting_balance);

    match ctx.store.create_user(user.clone()).await {
        Ok(()) => {
            info!("Registered user {}", user.user_id);
            Ok(json_reply(
                StatusCode::CREATED,
                &RegisterResponse {
                    message: "user registered".to_string(),
                    user: UserView::from(&user),
                    api_token,
                },
            ))
        }
        Err(StoreError::UserExists(id)) => Ok(json_reply(
            StatusCode::CONFLICT,
            &ErrorBody::new("conflict", format!("User {id} already exists")),
        )),
        Err(error) => Ok(error_reply(&TransferError::Store(error))),
    }
}

async fn handle_transfer<S, C>(
    ctx: AppContext<S, C>,
    authorization: Option<String>,
    req: TransferRequest,
) -> Result<Response<String>, Infallible>
where
    S: LedgerStore + 'static,
    C: ChainRecorder + 'static,
{
    let caller = match auth::resolve_bearer(ctx.store.as_ref(), authorization.as_deref()).await {
        Ok(user) => user,
        Err(error) => return Ok(auth_error_reply(&error)),
    };

    let Some(sender_id) = req.sender_id.filter(|id| !id.is_empty()) else {
        return Ok(error_reply(&TransferError::MissingField("senderId")));
    };
    let Some(recipient_id) = req.recipient_id.filter(|id| !id.is_empty()) else {
        return Ok(error_reply(&TransferError::MissingField("recipientId")));
    };
    let Some(amount) = req.amount.filter(|amount| !amount.is_empty()) else {
        return Ok(error_reply(&TransferError::MissingField("amount")));
    };
    let amount = match amount.parse::<Tokens>() {
        Ok(amount) => amount,
        Err(error) => return Ok(error_reply(&error)),
    };

    if caller.user_id != sender_id {
        return Ok(json_reply(
            StatusCode::BAD_REQUEST,
            &ErrorBody::new(
                "validation",
                "senderId does not match the authenticated caller",
            ),
        ));
    }

    match ctx.coordinator.transfer(&sender_id, &recipient_id, amount).await {
        Ok(receipt) => Ok(json_reply(
            StatusCode::OK,
            &TransferResponse {
                message: "transfer complete".to_string(),
                transfer_id: receipt.transfer_id.to_string(),
                transaction_reference: receipt.chain_ref.to_string(),
                new_sender_balance: receipt.new_sender_balance.to_string(),
            },
        )),
        Err(error) => Ok(error_reply(&error)),
    }
}

async fn handle_user_info<S, C>(
    ctx: AppContext<S, C>,
    user_id: String,
) -> Result<Response<String>, Infallible>
where
    S: LedgerStore + 'static,
    C: ChainRecorder + 'static,
{
    let user = match ctx.store.get_user(&user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return Ok(error_reply(&TransferError::UnknownUser(user_id))),
        Err(error) => return Ok(error_reply(&TransferError::Store(error))),
    };

    let mut all = match ctx.store.list_users().await {
        Ok(users) => users,
        Err(error) => return Ok(error_reply(&TransferError::Store(error))),
    };
    all.sort_by(|a, b| {
        b.total_sent
            .cmp(&a.total_sent)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });

    Ok(json_reply(
        StatusCode::OK,
        &UserInfoResponse {
            user_info: UserView::from(&user),
            all_users: all.iter().map(LeaderboardEntry::from).collect(),
        },
    ))
}

async fn handle_transactions<S, C>(
    ctx: AppContext<S, C>,
    query: HashMap<String, String>,
) -> Result<Response<String>, Infallible>
where
    S: LedgerStore + 'static,
    C: ChainRecorder + 'static,
{
    let filter = TransactionFilter {
        user_id: query.get("userId").cloned().filter(|id| !id.is_empty()),
        limit: query
            .get("limit")
            .and_then(|value| value.parse().ok())
            .or(Some(DEFAULT_HISTORY_LIMIT)),
    };

    match ctx.store.query_transactions(filter).await {
        Ok(transactions) => Ok(json_reply(
            StatusCode::OK,
            &TransactionsResponse {
                transactions: transactions.iter().map(TransactionView::from).collect(),
            },
        )),
        Err(error) => Ok(error_reply(&TransferError::Store(error))),
    }
}

/// Assemble the route tree.
pub fn routes<S, C>(
    ctx: AppContext<S, C>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone
where
    S: LedgerStore + 'static,
    C: ChainRecorder + 'static,
{
    // POST /register
    let register_ctx = ctx.clone();
    let register = warp::path!("register")
        .and(warp::post())
        .and(warp::body::json())
        .and_then(move |req: RegisterRequest| {
            let ctx = register_ctx.clone();
            async move { handle_register(ctx, req).await }
        });

    // POST /transfer
    let transfer_ctx = ctx.clone();
    let transfer = warp::path!("transfer")
        .and(warp::post())
        .and(warp::header::optional::<String>("authorization"))
        .and(warp::body::json())
        .and_then(move |authorization: Option<String>, req: TransferRequest| {
            let ctx = transfer_ctx.clone();
            async move { handle_transfer(ctx, authorization, req).await }
        });

    // GET /users/:id
    let user_info_ctx = ctx.clone();
    let user_info = warp::path!("users" / String)
        .and(warp::get())
        .and_then(move |user_id: String| {
            let ctx = user_info_ctx.clone();
            async move { handle_user_info(ctx, user_id).await }
        });

    // GET /transactions?userId=..&limit=..
    let transactions = warp::path!("transactions")
        .and(warp::get())
        .and(warp::query::<HashMap<String, String>>())
        .and_then(move |query: HashMap<String, String>| {
            let ctx = ctx.clone();
            async move { handle_transactions(ctx, query).await }
        });

    // GET /health
    let health = warp::path!("health").and(warp::get()).map(|| "OK");

    register
        .or(transfer)
        .or(user_info)
        .or(transactions)
        .or(health)
}
