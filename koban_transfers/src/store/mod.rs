// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::StoreError;
use crate::ledger::{PendingSettlement, TransactionRecord, TransferId, UserRecord};
use crate::tokens::Tokens;
use async_trait::async_trait;

/// Specialisation of `std::Result` for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Filter for the transaction history read path.
#[derive(Clone, Debug, Default)]
pub struct TransactionFilter {
    /// Only transactions where this user is sender or recipient.
    pub user_id: Option<String>,
    /// Cap on returned records, newest first.
    pub limit: Option<usize>,
}

/// Durable document storage for the ledger.
///
/// Owns the user and transaction records; callers hold only transient copies.
/// Reads are per-document consistent. The one multi-document operation is
/// [`commit_transfer`](Self::commit_transfer), which is atomic and guarded by
/// a compare-and-swap on each balance record's `version`.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Fetch a user document. Absence is `Ok(None)`, never an error.
    async fn get_user(&self, user_id: &str) -> StoreResult<Option<UserRecord>>;

    /// Create a user document, failing with [`StoreError::UserExists`] if the
    /// id is already taken.
    async fn create_user(&self, user: UserRecord) -> StoreResult<()>;

    /// All user documents. Eventually-consistent view for the leaderboard;
    /// callers project the fields they expose.
    async fn list_users(&self) -> StoreResult<Vec<UserRecord>>;

    /// Resolve a bearer credential to its user document.
    async fn find_user_by_token(&self, api_token: &str) -> StoreResult<Option<UserRecord>>;

    /// Write (or overwrite) a settlement journal entry.
    async fn put_settlement(&self, settlement: PendingSettlement) -> StoreResult<()>;

    /// Fetch a settlement journal entry.
    async fn get_settlement(&self, id: &TransferId) -> StoreResult<Option<PendingSettlement>>;

    /// An open settlement matching this logical transfer, if one exists.
    /// Used to reuse the idempotency token when a transfer is retried after an
    /// ambiguous chain timeout.
    async fn find_open_settlement(
        &self,
        sender_id: &str,
        recipient_id: &str,
        amount: Tokens,
    ) -> StoreResult<Option<PendingSettlement>>;

    /// All settlements that are chain-confirmed but not yet committed.
    async fn list_confirmed_settlements(&self) -> StoreResult<Vec<PendingSettlement>>;

    /// Drop a settlement journal entry.
    async fn remove_settlement(&self, id: &TransferId) -> StoreResult<()>;

    /// Fetch a transaction document.
    async fn get_transaction(&self, id: &TransferId) -> StoreResult<Option<TransactionRecord>>;

    /// Transaction history, newest first.
    async fn query_transactions(
        &self,
        filter: TransactionFilter,
    ) -> StoreResult<Vec<TransactionRecord>>;

    /// The single atomic unit of a transfer: both balance documents, the
    /// transaction document and completion of the settlement entry, all or
    /// nothing.
    ///
    /// `sender` and `recipient` carry the already-applied balances and the
    /// `version` of the snapshot they were derived from; a mismatch against
    /// the stored version fails with [`StoreError::VersionConflict`] and
    /// writes nothing. If the transaction id already exists the call is an
    /// idempotent no-op. Returns the post-commit sender document.
    async fn commit_transfer(
        &self,
        sender: UserRecord,
        recipient: UserRecord,
        tx: TransactionRecord,
    ) -> StoreResult<UserRecord>;
}
