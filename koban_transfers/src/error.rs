// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::{ChainRef, Tokens, TransferId};
use thiserror::Error;

/// Specialisation of `std::Result`.
pub type Result<T, E = TransferError> = std::result::Result<T, E>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
/// Transfer errors
pub enum TransferError {
    #[error("Transfer amount must be greater than zero")]
    AmountNotPositive,
    #[error("Sender and recipient are the same user")]
    SelfTransfer,
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Lost precision on the number of tokens during parsing")]
    LossOfTokenPrecision,
    #[error("The token amount would exceed the maximum value (u64::MAX)")]
    ExcessiveTokenValue,
    #[error("Failed to parse: {0}")]
    FailedToParseTokens(String),
    #[error("Could not deserialize specified hex string to a TransferId: {0}")]
    HexDeserializationFailed(String),
    #[error("Unknown user {0}")]
    UnknownUser(String),
    #[error("No settlement found for transfer {0}")]
    UnknownSettlement(TransferId),
    #[error("Not enough balance, {0} available, {1} required")]
    NotEnoughBalance(Tokens, Tokens),
    #[error("Overflow occurred while adding values")]
    NumericOverflow,
    #[error("Chain write failed: {0}")]
    Chain(#[from] ChainError),
    #[error(
        "Settlement incomplete for transfer {id}: chain ref {chain_ref} is \
         confirmed but the ledger commit failed"
    )]
    SettlementIncomplete { id: TransferId, chain_ref: ChainRef },
    #[error("Concurrent update on a balance record, transfer aborted")]
    Conflict,
    #[error("Ledger store error: {0}")]
    Store(#[from] StoreError),
    #[error("Transfer task aborted: {0}")]
    Internal(String),
}

impl TransferError {
    /// Stable machine-readable error kind, used as the `error` field on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AmountNotPositive
            | Self::SelfTransfer
            | Self::MissingField(_)
            | Self::LossOfTokenPrecision
            | Self::ExcessiveTokenValue
            | Self::FailedToParseTokens(_)
            | Self::HexDeserializationFailed(_)
            | Self::NumericOverflow => "validation",
            Self::UnknownUser(_) | Self::UnknownSettlement(_) => "not_found",
            Self::NotEnoughBalance(..) => "insufficient_balance",
            Self::Chain(_) => "chain",
            Self::SettlementIncomplete { .. } => "settlement",
            Self::Conflict => "conflict",
            Self::Store(_) => "store",
            Self::Internal(_) => "internal",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
/// Failures reported by the external chain ledger.
///
/// `Rejected` and `Reverted` are definitive: nothing was written, so the whole
/// transfer may be retried from scratch. `TimedOut` is ambiguous: the write may
/// still land, which is why retries must reuse the original idempotency token.
pub enum ChainError {
    #[error("Chain ledger rejected the transfer: {0}")]
    Rejected(String),
    #[error("Chain confirmation timed out after {0}s")]
    TimedOut(u64),
    #[error("Chain transaction reverted: {0}")]
    Reverted(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
/// Failures reported by the ledger store.
pub enum StoreError {
    #[error("User {0} already exists")]
    UserExists(String),
    #[error("Version conflict writing record for {0}")]
    VersionConflict(String),
    #[error("Record not found: {0}")]
    RecordNotFound(String),
    #[error("Io error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serde(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<std::io::Error> for StoreError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serde(error.to_string())
    }
}
