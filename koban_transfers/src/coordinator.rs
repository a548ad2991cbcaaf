// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::error::{ChainError, Result, TransferError};
use crate::ledger::{
    ChainRef, PendingSettlement, SettlementStatus, TransactionRecord, TransferId, UserRecord,
};
use crate::store::LedgerStore;
use crate::tokens::Tokens;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

/// Write side of the external chain ledger.
///
/// Blocks until the record is network confirmed, or fails with a
/// distinguishable [`ChainError`]. Implementations MUST be idempotent per
/// `transfer_id`: when the ledger already holds an entry for the id, the
/// existing proof is returned and no second entry is created.
#[async_trait]
pub trait ChainRecorder: Send + Sync {
    async fn record_transfer(
        &self,
        transfer_id: TransferId,
        sender_id: &str,
        recipient_id: &str,
        amount: Tokens,
    ) -> std::result::Result<ChainRef, ChainError>;
}

/// Outcome of a settled transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferReceipt {
    pub transfer_id: TransferId,
    pub chain_ref: ChainRef,
    pub new_sender_balance: Tokens,
}

/// How often a commit that lost a version race is retried from a fresh read
/// before the transfer gives up with [`TransferError::Conflict`].
pub const DEFAULT_COMMIT_ATTEMPTS: usize = 3;

/// Orchestrates one transfer: validation, the chain write and the store
/// commit, with the failure and retry semantics of each stage pinned down.
///
/// Shared across request tasks; the only mutual exclusion is inside the
/// store's `commit_transfer`.
pub struct TransferCoordinator<S, C> {
    store: Arc<S>,
    chain: Arc<C>,
    commit_attempts: usize,
}

impl<S, C> Clone for TransferCoordinator<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            chain: Arc::clone(&self.chain),
            commit_attempts: self.commit_attempts,
        }
    }
}

impl<S, C> TransferCoordinator<S, C>
where
    S: LedgerStore + 'static,
    C: ChainRecorder + 'static,
{
    pub fn new(store: Arc<S>, chain: Arc<C>) -> Self {
        Self {
            store,
            chain,
            commit_attempts: DEFAULT_COMMIT_ATTEMPTS,
        }
    }

    pub fn with_commit_attempts(mut self, commit_attempts: usize) -> Self {
        self.commit_attempts = commit_attempts;
        self
    }

    /// Move `amount` from `sender_id` to `recipient_id`.
    ///
    /// The chain write happens before the store commit: the chain entry is the
    /// externally auditable proof and cannot be rolled back once accepted, so
    /// balances only move for transfers the chain already vouches for.
    pub async fn transfer(
        &self,
        sender_id: &str,
        recipient_id: &str,
        amount: Tokens,
    ) -> Result<TransferReceipt> {
        if sender_id.is_empty() {
            return Err(TransferError::MissingField("senderId"));
        }
        if recipient_id.is_empty() {
            return Err(TransferError::MissingField("recipientId"));
        }
        if amount.is_zero() {
            return Err(TransferError::AmountNotPositive);
        }
        if sender_id == recipient_id {
            return Err(TransferError::SelfTransfer);
        }

        // Fresh parallel read of both parties; nothing external has happened
        // yet, so any failure up to here leaves zero side effects.
        let (sender, recipient) = tokio::try_join!(
            self.store.get_user(sender_id),
            self.store.get_user(recipient_id)
        )?;
        let sender = sender.ok_or_else(|| TransferError::UnknownUser(sender_id.to_string()))?;
        let _recipient =
            recipient.ok_or_else(|| TransferError::UnknownUser(recipient_id.to_string()))?;

        if sender.balance < amount {
            return Err(TransferError::NotEnoughBalance(sender.balance, amount));
        }

        // Reuse the journal entry of an earlier attempt at this same transfer,
        // so a retry after an ambiguous timeout carries the same idempotency
        // token to the chain instead of minting a second entry.
        let settlement = match self
            .store
            .find_open_settlement(sender_id, recipient_id, amount)
            .await?
        {
            Some(settlement) => {
                debug!(
                    "Resuming settlement {} for {sender_id} -> {recipient_id}",
                    settlement.id
                );
                settlement
            }
            None => {
                let settlement = PendingSettlement::new(
                    TransferId::random(&mut rand::thread_rng()),
                    sender_id,
                    recipient_id,
                    amount,
                );
                self.store.put_settlement(settlement.clone()).await?;
                settlement
            }
        };

        // The chain write cannot be abandoned mid flight: run the rest of the
        // operation on its own task so caller cancellation doesn't drop it,
        // and the outcome is always recorded or logged.
        let coordinator = self.clone();
        let task = tokio::spawn(async move { coordinator.execute_settlement(settlement).await });
        match task.await {
            Ok(result) => result,
            Err(error) => {
                error!("Transfer task for {sender_id} -> {recipient_id} aborted: {error}");
                Err(TransferError::Internal(error.to_string()))
            }
        }
    }

    /// Retry an incomplete settlement.
    ///
    /// Idempotent: an already committed transfer returns its recorded state
    /// without touching balances; a `Confirmed` settlement re-commits with the
    /// existing chain ref and never triggers a second chain write; a retained
    /// `Submitted` settlement re-drives the (idempotent) chain write first.
    pub async fn retry_settlement(&self, transfer_id: TransferId) -> Result<TransferReceipt> {
        if let Some(tx) = self.store.get_transaction(&transfer_id).await? {
            let sender = self
                .store
                .get_user(&tx.sender_id)
                .await?
                .ok_or_else(|| TransferError::UnknownUser(tx.sender_id.clone()))?;
            return Ok(TransferReceipt {
                transfer_id,
                chain_ref: tx.chain_ref,
                new_sender_balance: sender.balance,
            });
        }

        let settlement = self
            .store
            .get_settlement(&transfer_id)
            .await?
            .ok_or(TransferError::UnknownSettlement(transfer_id))?;
        self.execute_settlement(settlement).await
    }

    /// Sweep all chain-confirmed-but-uncommitted settlements, retrying each.
    /// Returns how many were settled. Run at startup and by the background
    /// reconciler so the chain-confirmed-but-uncommitted window heals without
    /// operator action.
    pub async fn settle_confirmed(&self) -> Result<usize> {
        let pending = self.store.list_confirmed_settlements().await?;
        let mut settled = 0;
        for settlement in pending {
            let id = settlement.id;
            match self.execute_settlement(settlement).await {
                Ok(_) => {
                    info!("Recovered settlement for transfer {id}");
                    settled += 1;
                }
                Err(error) => {
                    warn!("Settlement for transfer {id} still incomplete: {error}");
                }
            }
        }
        Ok(settled)
    }

    /// Chain write (unless already confirmed) followed by the atomic commit.
    async fn execute_settlement(
        &self,
        mut settlement: PendingSettlement,
    ) -> Result<TransferReceipt> {
        let chain_ref = match settlement.chain_ref.clone() {
            Some(chain_ref) => chain_ref,
            None => {
                let recorded = self
                    .chain
                    .record_transfer(
                        settlement.id,
                        &settlement.sender_id,
                        &settlement.recipient_id,
                        settlement.amount,
                    )
                    .await;
                match recorded {
                    Ok(chain_ref) => chain_ref,
                    Err(error @ ChainError::TimedOut(_)) => {
                        // The write may still land; keep the journal entry so a
                        // retry reuses the token.
                        warn!(
                            "Chain confirmation timed out for transfer {}, token retained",
                            settlement.id
                        );
                        return Err(error.into());
                    }
                    Err(error) => {
                        // Definitive rejection: nothing on chain, the journal
                        // entry can go.
                        if let Err(cleanup) = self.store.remove_settlement(&settlement.id).await {
                            warn!(
                                "Could not drop settlement {} after chain rejection: {cleanup}",
                                settlement.id
                            );
                        }
                        return Err(error.into());
                    }
                }
            }
        };

        if settlement.status != SettlementStatus::Confirmed {
            settlement.mark_confirmed(chain_ref.clone());
            if let Err(error) = self.store.put_settlement(settlement.clone()).await {
                error!(
                    "Transfer {} confirmed on chain as {chain_ref} but journalling failed: {error}",
                    settlement.id
                );
                return Err(TransferError::SettlementIncomplete {
                    id: settlement.id,
                    chain_ref,
                });
            }
        }

        self.commit(settlement, chain_ref).await
    }

    /// The store commit, retried from a fresh read when a concurrent transfer
    /// won the version race.
    async fn commit(
        &self,
        settlement: PendingSettlement,
        chain_ref: ChainRef,
    ) -> Result<TransferReceipt> {
        let mut attempts = 0;
        loop {
            attempts += 1;

            // Fresh read every attempt: the precondition read happened before
            // the chain wait and may be stale by now.
            let (sender, recipient) = tokio::try_join!(
                self.store.get_user(&settlement.sender_id),
                self.store.get_user(&settlement.recipient_id)
            )?;
            let sender = sender
                .ok_or_else(|| TransferError::UnknownUser(settlement.sender_id.clone()))?;
            let recipient = recipient
                .ok_or_else(|| TransferError::UnknownUser(settlement.recipient_id.clone()))?;

            if sender.balance < settlement.amount {
                error!(
                    "Chain ref {chain_ref} is recorded for transfer {} ({} -> {}, amount {}) but \
                     the sender balance no longer covers it; orphaned chain record needs manual \
                     reconciliation",
                    settlement.id,
                    settlement.sender_id,
                    settlement.recipient_id,
                    settlement.amount
                );
                if let Err(cleanup) = self.store.remove_settlement(&settlement.id).await {
                    warn!(
                        "Could not drop settlement {} after failed re-validation: {cleanup}",
                        settlement.id
                    );
                }
                return Err(TransferError::NotEnoughBalance(
                    sender.balance,
                    settlement.amount,
                ));
            }

            let updated_sender = sender.debited(settlement.amount)?;
            let updated_recipient = recipient.credited(settlement.amount)?;
            let tx = TransactionRecord {
                id: settlement.id,
                sender_id: settlement.sender_id.clone(),
                recipient_id: settlement.recipient_id.clone(),
                amount: settlement.amount,
                timestamp: Utc::now(),
                chain_ref: chain_ref.clone(),
            };

            match self
                .store
                .commit_transfer(updated_sender, updated_recipient, tx)
                .await
            {
                Ok(sender_after) => {
                    info!(
                        "Transfer {} settled: {} -> {}, amount {}, chain ref {chain_ref}",
                        settlement.id,
                        settlement.sender_id,
                        settlement.recipient_id,
                        settlement.amount
                    );
                    return Ok(TransferReceipt {
                        transfer_id: settlement.id,
                        chain_ref,
                        new_sender_balance: sender_after.balance,
                    });
                }
                Err(crate::StoreError::VersionConflict(user_id)) => {
                    if attempts < self.commit_attempts {
                        debug!(
                            "Commit of transfer {} raced on {user_id}, retrying from a fresh read",
                            settlement.id
                        );
                        continue;
                    }
                    return Err(TransferError::Conflict);
                }
                Err(error) => {
                    error!(
                        "Settlement incomplete for transfer {}: chain ref {chain_ref}, \
                         {} -> {}, amount {}: {error}",
                        settlement.id,
                        settlement.sender_id,
                        settlement.recipient_id,
                        settlement.amount
                    );
                    return Err(TransferError::SettlementIncomplete {
                        id: settlement.id,
                        chain_ref,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{FlakyStore, MockChainRecorder};
    use crate::store::{MemoryStore, TransactionFilter};
    use crate::StoreError;
    use eyre::Result;
    use std::time::Duration;

    fn tokens(whole: u64) -> Tokens {
        Tokens::from_whole(whole).expect("amount fits")
    }

    async fn seeded_store(balances: &[(&str, u64)]) -> Result<Arc<MemoryStore>> {
        let store = Arc::new(MemoryStore::new());
        for (id, balance) in balances {
            store
                .create_user(UserRecord::new(*id, *id, format!("token-{id}"), tokens(*balance)))
                .await?;
        }
        Ok(store)
    }

    async fn total_held<S: LedgerStore>(store: &S) -> Result<u64> {
        let mut sum = 0u64;
        for user in store.list_users().await? {
            sum += user.balance.as_nanos();
        }
        Ok(sum)
    }

    #[tokio::test]
    async fn transfer_moves_balance_and_records_history() -> Result<()> {
        let store = seeded_store(&[("A", 10), ("B", 0)]).await?;
        let chain = Arc::new(MockChainRecorder::new());
        let coordinator = TransferCoordinator::new(Arc::clone(&store), Arc::clone(&chain));

        let held_before = total_held(store.as_ref()).await?;
        let receipt = coordinator.transfer("A", "B", tokens(4)).await?;

        assert_eq!(receipt.new_sender_balance, tokens(6));

        let sender = store.get_user("A").await?.expect("sender");
        let recipient = store.get_user("B").await?.expect("recipient");
        assert_eq!(sender.balance, tokens(6));
        assert_eq!(sender.total_sent, tokens(4));
        assert_eq!(recipient.balance, tokens(4));
        assert_eq!(recipient.total_sent, Tokens::zero());

        // Conservation: the system-wide sum is untouched.
        assert_eq!(total_held(store.as_ref()).await?, held_before);

        let history = store
            .query_transactions(TransactionFilter::default())
            .await?;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, receipt.transfer_id);
        assert_eq!(history[0].chain_ref, receipt.chain_ref);
        assert_eq!(chain.recorded_count(), 1);

        // The journal entry is gone once settled.
        assert_eq!(store.get_settlement(&receipt.transfer_id).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn invalid_requests_never_reach_chain_or_store() -> Result<()> {
        let store = seeded_store(&[("A", 10), ("B", 0)]).await?;
        let chain = Arc::new(MockChainRecorder::new());
        let coordinator = TransferCoordinator::new(Arc::clone(&store), Arc::clone(&chain));

        assert_eq!(
            coordinator.transfer("A", "B", Tokens::zero()).await,
            Err(TransferError::AmountNotPositive)
        );
        assert_eq!(
            coordinator.transfer("A", "A", tokens(1)).await,
            Err(TransferError::SelfTransfer)
        );
        assert_eq!(
            coordinator.transfer("", "B", tokens(1)).await,
            Err(TransferError::MissingField("senderId"))
        );
        assert_eq!(
            coordinator.transfer("A", "", tokens(1)).await,
            Err(TransferError::MissingField("recipientId"))
        );
        assert_eq!(
            coordinator.transfer("A", "ghost", tokens(1)).await,
            Err(TransferError::UnknownUser("ghost".to_string()))
        );
        assert_eq!(
            coordinator.transfer("ghost", "B", tokens(1)).await,
            Err(TransferError::UnknownUser("ghost".to_string()))
        );

        assert_eq!(chain.calls(), 0);
        assert_eq!(store.get_user("A").await?.expect("sender").balance, tokens(10));
        Ok(())
    }

    #[tokio::test]
    async fn insufficient_balance_is_rejected_without_side_effects() -> Result<()> {
        let store = seeded_store(&[("A", 3), ("B", 0)]).await?;
        let chain = Arc::new(MockChainRecorder::new());
        let coordinator = TransferCoordinator::new(Arc::clone(&store), Arc::clone(&chain));

        assert_eq!(
            coordinator.transfer("A", "B", tokens(5)).await,
            Err(TransferError::NotEnoughBalance(tokens(3), tokens(5)))
        );

        assert_eq!(chain.calls(), 0);
        assert_eq!(store.get_user("A").await?.expect("sender").balance, tokens(3));
        assert!(store
            .query_transactions(TransactionFilter::default())
            .await?
            .is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn chain_rejection_leaves_ledger_untouched_and_retry_succeeds() -> Result<()> {
        let store = seeded_store(&[("A", 10), ("B", 0)]).await?;
        let chain = Arc::new(MockChainRecorder::new());
        let coordinator = TransferCoordinator::new(Arc::clone(&store), Arc::clone(&chain));

        chain.fail_next(ChainError::Rejected("nonce too low".to_string()));
        let rejected = coordinator.transfer("A", "B", tokens(4)).await;
        assert_eq!(
            rejected,
            Err(TransferError::Chain(ChainError::Rejected(
                "nonce too low".to_string()
            )))
        );

        assert_eq!(store.get_user("A").await?.expect("sender").balance, tokens(10));
        assert!(store
            .query_transactions(TransactionFilter::default())
            .await?
            .is_empty());
        // Definitive rejection drops the journal entry.
        assert_eq!(
            store.find_open_settlement("A", "B", tokens(4)).await?,
            None
        );

        // Once the chain recovers, the identical request goes through.
        let receipt = coordinator.transfer("A", "B", tokens(4)).await?;
        assert_eq!(receipt.new_sender_balance, tokens(6));
        assert_eq!(chain.recorded_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn timed_out_retry_reuses_the_same_chain_entry() -> Result<()> {
        let store = seeded_store(&[("A", 10), ("B", 0)]).await?;
        let chain = Arc::new(MockChainRecorder::new());
        let coordinator = TransferCoordinator::new(Arc::clone(&store), Arc::clone(&chain));

        // The confirmation wait times out but the write still lands on chain.
        chain.fail_next_landing(ChainError::TimedOut(60));
        let timed_out = coordinator.transfer("A", "B", tokens(4)).await;
        assert_eq!(
            timed_out,
            Err(TransferError::Chain(ChainError::TimedOut(60)))
        );
        assert_eq!(store.get_user("A").await?.expect("sender").balance, tokens(10));

        // The retry picks up the retained token: one chain entry, one
        // transaction, one balance adjustment.
        let receipt = coordinator.transfer("A", "B", tokens(4)).await?;
        assert_eq!(chain.recorded_count(), 1);
        assert_eq!(receipt.new_sender_balance, tokens(6));

        let history = store
            .query_transactions(TransactionFilter::default())
            .await?;
        assert_eq!(history.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn failed_commit_recovers_through_settlement_retry() -> Result<()> {
        let inner = seeded_store(&[("A", 10), ("B", 0)]).await?;
        let store = Arc::new(FlakyStore::new(Arc::clone(&inner)));
        let chain = Arc::new(MockChainRecorder::new());
        let coordinator = TransferCoordinator::new(Arc::clone(&store), Arc::clone(&chain));

        store.fail_commits(1);
        let incomplete = coordinator.transfer("A", "B", tokens(4)).await;
        let (id, chain_ref) = match incomplete {
            Err(TransferError::SettlementIncomplete { id, chain_ref }) => (id, chain_ref),
            other => panic!("expected SettlementIncomplete, got {other:?}"),
        };
        assert_eq!(inner.get_user("A").await?.expect("sender").balance, tokens(10));

        // Idempotent re-commit with the existing chain ref; no second chain
        // write is allowed.
        let receipt = coordinator.retry_settlement(id).await?;
        assert_eq!(receipt.chain_ref, chain_ref);
        assert_eq!(receipt.new_sender_balance, tokens(6));
        assert_eq!(chain.recorded_count(), 1);
        assert_eq!(chain.calls(), 1);

        // Replaying the retry changes nothing further.
        let replay = coordinator.retry_settlement(id).await?;
        assert_eq!(replay.new_sender_balance, tokens(6));
        let history = inner
            .query_transactions(TransactionFilter::default())
            .await?;
        assert_eq!(history.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn startup_sweep_settles_confirmed_leftovers() -> Result<()> {
        let inner = seeded_store(&[("A", 10), ("B", 0)]).await?;
        let store = Arc::new(FlakyStore::new(Arc::clone(&inner)));
        let chain = Arc::new(MockChainRecorder::new());
        let coordinator = TransferCoordinator::new(Arc::clone(&store), Arc::clone(&chain));

        store.fail_commits(1);
        let incomplete = coordinator.transfer("A", "B", tokens(4)).await;
        assert!(matches!(
            incomplete,
            Err(TransferError::SettlementIncomplete { .. })
        ));

        assert_eq!(coordinator.settle_confirmed().await?, 1);
        assert_eq!(inner.get_user("A").await?.expect("sender").balance, tokens(6));
        assert_eq!(inner.get_user("B").await?.expect("recipient").balance, tokens(4));

        // Nothing left to sweep.
        assert_eq!(coordinator.settle_confirmed().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_transfers_cannot_double_spend() -> Result<()> {
        let store = seeded_store(&[("A", 10), ("B", 0), ("C", 0)]).await?;
        // Latency keeps both requests in flight past each other's precondition
        // read, forcing the race to resolve at commit time.
        let chain = Arc::new(
            MockChainRecorder::new().with_latency(Duration::from_millis(10)),
        );
        let coordinator = TransferCoordinator::new(Arc::clone(&store), Arc::clone(&chain));

        let first = coordinator.transfer("A", "B", tokens(7));
        let second = coordinator.transfer("A", "C", tokens(7));
        let (first, second) = tokio::join!(first, second);

        let successes = [&first, &second]
            .iter()
            .filter(|outcome| outcome.is_ok())
            .count();
        assert_eq!(successes, 1, "exactly one transfer may win: {first:?} / {second:?}");

        let loser = if first.is_ok() { second } else { first };
        assert!(matches!(
            loser,
            Err(TransferError::NotEnoughBalance(..)) | Err(TransferError::Conflict)
        ));

        let sender = store.get_user("A").await?.expect("sender");
        assert_eq!(sender.balance, tokens(3));
        assert_eq!(sender.total_sent, tokens(7));
        Ok(())
    }

    #[tokio::test]
    async fn retry_settlement_for_unknown_transfer_fails() -> Result<()> {
        let store = seeded_store(&[]).await?;
        let chain = Arc::new(MockChainRecorder::new());
        let coordinator = TransferCoordinator::new(store, chain);

        let id = TransferId::from([0u8; 32]);
        assert_eq!(
            coordinator.retry_settlement(id).await,
            Err(TransferError::UnknownSettlement(id))
        );
        Ok(())
    }

    #[tokio::test]
    async fn store_outage_during_precondition_read_is_a_store_error() -> Result<()> {
        let inner = seeded_store(&[("A", 10), ("B", 0)]).await?;
        let store = Arc::new(FlakyStore::new(Arc::clone(&inner)));
        let chain = Arc::new(MockChainRecorder::new());
        let coordinator = TransferCoordinator::new(Arc::clone(&store), chain);

        store.fail_reads(1);
        assert!(matches!(
            coordinator.transfer("A", "B", tokens(4)).await,
            Err(TransferError::Store(StoreError::Unavailable(_)))
        ));
        Ok(())
    }
}
