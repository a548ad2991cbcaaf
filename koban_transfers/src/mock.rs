// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Test doubles for the coordinator's collaborators.

use crate::coordinator::ChainRecorder;
use crate::error::{ChainError, StoreError};
use crate::ledger::{ChainRef, PendingSettlement, TransactionRecord, TransferId, UserRecord};
use crate::store::{LedgerStore, StoreResult, TransactionFilter};
use crate::tokens::Tokens;
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct ScriptedFailure {
    error: ChainError,
    /// Whether the write still lands on the mock chain despite the reported
    /// failure, as a real write can after an ambiguous timeout.
    lands: bool,
}

#[derive(Default)]
struct MockChainState {
    recorded: BTreeMap<TransferId, ChainRef>,
    failures: VecDeque<ScriptedFailure>,
    calls: u64,
}

/// In-memory stand-in for the chain ledger.
///
/// Idempotent per transfer id like the real recorder: a repeated id returns
/// the original proof and records nothing new.
#[derive(Default)]
pub struct MockChainRecorder {
    state: Mutex<MockChainState>,
    latency: Option<Duration>,
}

impl MockChainRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold each confirmation for `latency`, so concurrent callers genuinely
    /// overlap in tests.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Script the next call to fail; nothing lands on the mock chain.
    pub fn fail_next(&self, error: ChainError) {
        self.state
            .lock()
            .expect("mock chain state poisoned")
            .failures
            .push_back(ScriptedFailure {
                error,
                lands: false,
            });
    }

    /// Script the next call to fail even though the write lands, the worst
    /// case of a confirmation timeout.
    pub fn fail_next_landing(&self, error: ChainError) {
        self.state
            .lock()
            .expect("mock chain state poisoned")
            .failures
            .push_back(ScriptedFailure { error, lands: true });
    }

    /// Total calls made, including failed ones.
    pub fn calls(&self) -> u64 {
        self.state.lock().expect("mock chain state poisoned").calls
    }

    /// Distinct entries on the mock chain.
    pub fn recorded_count(&self) -> usize {
        self.state
            .lock()
            .expect("mock chain state poisoned")
            .recorded
            .len()
    }

    fn chain_ref_for(id: TransferId) -> ChainRef {
        ChainRef::new(format!("0x{}", id.to_hex()))
    }
}

#[async_trait]
impl ChainRecorder for MockChainRecorder {
    async fn record_transfer(
        &self,
        transfer_id: TransferId,
        _sender_id: &str,
        _recipient_id: &str,
        _amount: Tokens,
    ) -> Result<ChainRef, ChainError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock().expect("mock chain state poisoned");
        state.calls += 1;

        if let Some(existing) = state.recorded.get(&transfer_id) {
            return Ok(existing.clone());
        }

        if let Some(failure) = state.failures.pop_front() {
            if failure.lands {
                let chain_ref = Self::chain_ref_for(transfer_id);
                state.recorded.insert(transfer_id, chain_ref);
            }
            return Err(failure.error);
        }

        let chain_ref = Self::chain_ref_for(transfer_id);
        state.recorded.insert(transfer_id, chain_ref.clone());
        Ok(chain_ref)
    }
}

/// Wraps a [`LedgerStore`] and fails a scripted number of calls, for
/// exercising the partial-failure windows.
pub struct FlakyStore<S> {
    inner: Arc<S>,
    fail_commits: Mutex<u32>,
    fail_reads: Mutex<u32>,
}

impl<S> FlakyStore<S> {
    pub fn new(inner: Arc<S>) -> Self {
        Self {
            inner,
            fail_commits: Mutex::new(0),
            fail_reads: Mutex::new(0),
        }
    }

    /// Fail the next `count` calls to `commit_transfer`.
    pub fn fail_commits(&self, count: u32) {
        *self.fail_commits.lock().expect("flaky store poisoned") = count;
    }

    /// Fail the next `count` calls to `get_user`.
    pub fn fail_reads(&self, count: u32) {
        *self.fail_reads.lock().expect("flaky store poisoned") = count;
    }

    fn take_failure(counter: &Mutex<u32>) -> bool {
        let mut remaining = counter.lock().expect("flaky store poisoned");
        if *remaining > 0 {
            *remaining -= 1;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl<S: LedgerStore> LedgerStore for FlakyStore<S> {
    async fn get_user(&self, user_id: &str) -> StoreResult<Option<UserRecord>> {
        if Self::take_failure(&self.fail_reads) {
            return Err(StoreError::Unavailable("scripted read failure".to_string()));
        }
        self.inner.get_user(user_id).await
    }

    async fn create_user(&self, user: UserRecord) -> StoreResult<()> {
        self.inner.create_user(user).await
    }

    async fn list_users(&self) -> StoreResult<Vec<UserRecord>> {
        self.inner.list_users().await
    }

    async fn find_user_by_token(&self, api_token: &str) -> StoreResult<Option<UserRecord>> {
        self.inner.find_user_by_token(api_token).await
    }

    async fn put_settlement(&self, settlement: PendingSettlement) -> StoreResult<()> {
        self.inner.put_settlement(settlement).await
    }

    async fn get_settlement(&self, id: &TransferId) -> StoreResult<Option<PendingSettlement>> {
        self.inner.get_settlement(id).await
    }

    async fn find_open_settlement(
        &self,
        sender_id: &str,
        recipient_id: &str,
        amount: Tokens,
    ) -> StoreResult<Option<PendingSettlement>> {
        self.inner
            .find_open_settlement(sender_id, recipient_id, amount)
            .await
    }

    async fn list_confirmed_settlements(&self) -> StoreResult<Vec<PendingSettlement>> {
        self.inner.list_confirmed_settlements().await
    }

    async fn remove_settlement(&self, id: &TransferId) -> StoreResult<()> {
        self.inner.remove_settlement(id).await
    }

    async fn get_transaction(&self, id: &TransferId) -> StoreResult<Option<TransactionRecord>> {
        self.inner.get_transaction(id).await
    }

    async fn query_transactions(
        &self,
        filter: TransactionFilter,
    ) -> StoreResult<Vec<TransactionRecord>> {
        self.inner.query_transactions(filter).await
    }

    async fn commit_transfer(
        &self,
        sender: UserRecord,
        recipient: UserRecord,
        tx: TransactionRecord,
    ) -> StoreResult<UserRecord> {
        if Self::take_failure(&self.fail_commits) {
            return Err(StoreError::Unavailable(
                "scripted commit failure".to_string(),
            ));
        }
        self.inner.commit_transfer(sender, recipient, tx).await
    }
}
