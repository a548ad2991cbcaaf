// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use super::{LedgerStore, StoreResult, TransactionFilter};
use crate::error::StoreError;
use crate::ledger::{PendingSettlement, SettlementStatus, TransactionRecord, TransferId, UserRecord};
use crate::tokens::Tokens;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Collections {
    users: BTreeMap<String, UserRecord>,
    transactions: BTreeMap<TransferId, TransactionRecord>,
    settlements: BTreeMap<TransferId, PendingSettlement>,
}

/// In-process [`LedgerStore`], used by tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<Collections>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn get_user(&self, user_id: &str) -> StoreResult<Option<UserRecord>> {
        Ok(self.lock()?.users.get(user_id).cloned())
    }

    async fn create_user(&self, user: UserRecord) -> StoreResult<()> {
        let mut inner = self.lock()?;
        if inner.users.contains_key(&user.user_id) {
            return Err(StoreError::UserExists(user.user_id));
        }
        inner.users.insert(user.user_id.clone(), user);
        Ok(())
    }

    async fn list_users(&self) -> StoreResult<Vec<UserRecord>> {
        Ok(self.lock()?.users.values().cloned().collect())
    }

    async fn find_user_by_token(&self, api_token: &str) -> StoreResult<Option<UserRecord>> {
        Ok(self
            .lock()?
            .users
            .values()
            .find(|user| user.api_token == api_token)
            .cloned())
    }

    async fn put_settlement(&self, settlement: PendingSettlement) -> StoreResult<()> {
        self.lock()?.settlements.insert(settlement.id, settlement);
        Ok(())
    }

    async fn get_settlement(&self, id: &TransferId) -> StoreResult<Option<PendingSettlement>> {
        Ok(self.lock()?.settlements.get(id).cloned())
    }

    async fn find_open_settlement(
        &self,
        sender_id: &str,
        recipient_id: &str,
        amount: Tokens,
    ) -> StoreResult<Option<PendingSettlement>> {
        Ok(self
            .lock()?
            .settlements
            .values()
            .find(|s| {
                s.sender_id == sender_id && s.recipient_id == recipient_id && s.amount == amount
            })
            .cloned())
    }

    async fn list_confirmed_settlements(&self) -> StoreResult<Vec<PendingSettlement>> {
        Ok(self
            .lock()?
            .settlements
            .values()
            .filter(|s| s.status == SettlementStatus::Confirmed)
            .cloned()
            .collect())
    }

    async fn remove_settlement(&self, id: &TransferId) -> StoreResult<()> {
        self.lock()?.settlements.remove(id);
        Ok(())
    }

    async fn get_transaction(&self, id: &TransferId) -> StoreResult<Option<TransactionRecord>> {
        Ok(self.lock()?.transactions.get(id).cloned())
    }

    async fn query_transactions(
        &self,
        filter: TransactionFilter,
    ) -> StoreResult<Vec<TransactionRecord>> {
        let inner = self.lock()?;
        let mut records: Vec<_> = inner
            .transactions
            .values()
            .filter(|tx| match &filter.user_id {
                Some(user_id) => &tx.sender_id == user_id || &tx.recipient_id == user_id,
                None => true,
            })
            .cloned()
            .collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        if let Some(limit) = filter.limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    async fn commit_transfer(
        &self,
        mut sender: UserRecord,
        mut recipient: UserRecord,
        tx: TransactionRecord,
    ) -> StoreResult<UserRecord> {
        let mut inner = self.lock()?;

        // Idempotent re-commit: the transfer already settled.
        if inner.transactions.contains_key(&tx.id) {
            let current = inner
                .users
                .get(&sender.user_id)
                .cloned()
                .ok_or_else(|| StoreError::RecordNotFound(sender.user_id.clone()))?;
            return Ok(current);
        }

        let stored_sender = inner
            .users
            .get(&sender.user_id)
            .ok_or_else(|| StoreError::RecordNotFound(sender.user_id.clone()))?;
        if stored_sender.version != sender.version {
            return Err(StoreError::VersionConflict(sender.user_id));
        }
        let stored_recipient = inner
            .users
            .get(&recipient.user_id)
            .ok_or_else(|| StoreError::RecordNotFound(recipient.user_id.clone()))?;
        if stored_recipient.version != recipient.version {
            return Err(StoreError::VersionConflict(recipient.user_id));
        }

        sender.version += 1;
        recipient.version += 1;
        inner.users.insert(sender.user_id.clone(), sender.clone());
        inner
            .users
            .insert(recipient.user_id.clone(), recipient);
        inner.settlements.remove(&tx.id);
        inner.transactions.insert(tx.id, tx);
        Ok(sender)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use eyre::Result;

    fn user(id: &str, balance: u64) -> UserRecord {
        UserRecord::new(id, id, format!("token-{id}"), Tokens::from_nanos(balance))
    }

    fn tx_record(id: TransferId, sender: &str, recipient: &str, amount: u64) -> TransactionRecord {
        TransactionRecord {
            id,
            sender_id: sender.to_string(),
            recipient_id: recipient.to_string(),
            amount: Tokens::from_nanos(amount),
            timestamp: Utc::now(),
            chain_ref: crate::ChainRef::new(format!("0x{}", id.to_hex())),
        }
    }

    #[tokio::test]
    async fn create_user_rejects_duplicates() -> Result<()> {
        let store = MemoryStore::new();
        store.create_user(user("U1", 10)).await?;

        assert_eq!(
            store.create_user(user("U1", 10)).await,
            Err(StoreError::UserExists("U1".to_string()))
        );
        Ok(())
    }

    #[tokio::test]
    async fn commit_applies_all_three_writes() -> Result<()> {
        let store = MemoryStore::new();
        store.create_user(user("U1", 10)).await?;
        store.create_user(user("U2", 0)).await?;

        let sender = store.get_user("U1").await?.expect("sender");
        let recipient = store.get_user("U2").await?.expect("recipient");
        let id = TransferId::from([1u8; 32]);

        let committed = store
            .commit_transfer(
                sender.debited(Tokens::from_nanos(4))?,
                recipient.credited(Tokens::from_nanos(4))?,
                tx_record(id, "U1", "U2", 4),
            )
            .await?;

        assert_eq!(committed.balance, Tokens::from_nanos(6));
        assert_eq!(committed.version, 1);
        assert_eq!(
            store.get_user("U2").await?.expect("recipient").balance,
            Tokens::from_nanos(4)
        );
        assert!(store.get_transaction(&id).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn commit_rejects_stale_version() -> Result<()> {
        let store = MemoryStore::new();
        store.create_user(user("U1", 10)).await?;
        store.create_user(user("U2", 0)).await?;
        store.create_user(user("U3", 0)).await?;

        // Both transfers derive their updates from the same snapshot.
        let sender = store.get_user("U1").await?.expect("sender");
        let first_recipient = store.get_user("U2").await?.expect("recipient");
        let second_recipient = store.get_user("U3").await?.expect("recipient");

        store
            .commit_transfer(
                sender.debited(Tokens::from_nanos(7))?,
                first_recipient.credited(Tokens::from_nanos(7))?,
                tx_record(TransferId::from([1u8; 32]), "U1", "U2", 7),
            )
            .await?;

        let stale = store
            .commit_transfer(
                sender.debited(Tokens::from_nanos(7))?,
                second_recipient.credited(Tokens::from_nanos(7))?,
                tx_record(TransferId::from([2u8; 32]), "U1", "U3", 7),
            )
            .await;

        assert_eq!(stale, Err(StoreError::VersionConflict("U1".to_string())));
        assert_eq!(
            store.get_user("U1").await?.expect("sender").balance,
            Tokens::from_nanos(3)
        );
        Ok(())
    }

    #[tokio::test]
    async fn commit_is_idempotent_per_transfer_id() -> Result<()> {
        let store = MemoryStore::new();
        store.create_user(user("U1", 10)).await?;
        store.create_user(user("U2", 0)).await?;

        let sender = store.get_user("U1").await?.expect("sender");
        let recipient = store.get_user("U2").await?.expect("recipient");
        let id = TransferId::from([9u8; 32]);
        let record = tx_record(id, "U1", "U2", 4);

        store
            .commit_transfer(
                sender.debited(Tokens::from_nanos(4))?,
                recipient.credited(Tokens::from_nanos(4))?,
                record.clone(),
            )
            .await?;

        // Replaying the same commit must not move any balance again.
        let replay = store
            .commit_transfer(
                sender.debited(Tokens::from_nanos(4))?,
                recipient.credited(Tokens::from_nanos(4))?,
                record,
            )
            .await?;

        assert_eq!(replay.balance, Tokens::from_nanos(6));
        assert_eq!(
            store.get_user("U2").await?.expect("recipient").balance,
            Tokens::from_nanos(4)
        );
        Ok(())
    }

    #[tokio::test]
    async fn history_is_newest_first_and_limited() -> Result<()> {
        let store = MemoryStore::new();
        store.create_user(user("U1", 100)).await?;
        store.create_user(user("U2", 0)).await?;

        for i in 1..=3u8 {
            let sender = store.get_user("U1").await?.expect("sender");
            let recipient = store.get_user("U2").await?.expect("recipient");
            store
                .commit_transfer(
                    sender.debited(Tokens::from_nanos(1))?,
                    recipient.credited(Tokens::from_nanos(1))?,
                    tx_record(TransferId::from([i; 32]), "U1", "U2", 1),
                )
                .await?;
        }

        let all = store
            .query_transactions(TransactionFilter {
                user_id: Some("U2".to_string()),
                limit: Some(2),
            })
            .await?;
        assert_eq!(all.len(), 2);
        assert!(all[0].timestamp >= all[1].timestamp);

        let none = store
            .query_transactions(TransactionFilter {
                user_id: Some("U3".to_string()),
                limit: None,
            })
            .await?;
        assert!(none.is_empty());
        Ok(())
    }
}
