// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

#[macro_use]
extern crate tracing;

mod coordinator;
mod error;
mod ledger;
mod store;
mod tokens;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

/// Types used in the public API
pub use crate::{
    coordinator::{ChainRecorder, TransferCoordinator, TransferReceipt, DEFAULT_COMMIT_ATTEMPTS},
    error::{ChainError, Result, StoreError, TransferError},
    ledger::{
        ChainRef, PendingSettlement, SettlementStatus, TransactionRecord, TransferId, UserRecord,
    },
    store::{FileStore, LedgerStore, MemoryStore, StoreResult, TransactionFilter},
    tokens::Tokens,
};
