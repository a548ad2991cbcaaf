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
use fs2::FileExt;
use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const USERS_DIR_NAME: &str = "users";
const TRANSACTIONS_DIR_NAME: &str = "transactions";
const SETTLEMENTS_DIR_NAME: &str = "settlements";
const LOCK_FILE_NAME: &str = "ledger.lock";

/// A locked file handle, that when dropped releases the lock.
type StoreExclusiveAccess = File;

/// Durable [`LedgerStore`] keeping one JSON document per record on disk.
///
/// Reads are lock free (per-document consistency only); every write section
/// takes an exclusive lock on the store dir, which also serialises commits
/// across processes sharing the same data dir.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (or create) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        for dir in [USERS_DIR_NAME, TRANSACTIONS_DIR_NAME, SETTLEMENTS_DIR_NAME] {
            fs::create_dir_all(root.join(dir))?;
        }
        Ok(Self { root })
    }

    /// Locks the store and returns exclusive access to it.
    /// This lock prevents any other process from locking the store dir,
    /// effectively acts as a mutex for the write sections.
    fn lock(&self) -> StoreResult<StoreExclusiveAccess> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(self.root.join(LOCK_FILE_NAME))?;
        file.lock_exclusive()?;
        Ok(file)
    }

    fn user_path(&self, user_id: &str) -> PathBuf {
        // Ids are caller supplied; hex keeps the filename path safe.
        self.root
            .join(USERS_DIR_NAME)
            .join(format!("{}.json", hex::encode(user_id)))
    }

    fn transaction_path(&self, id: &TransferId) -> PathBuf {
        self.root
            .join(TRANSACTIONS_DIR_NAME)
            .join(format!("{}.json", id.to_hex()))
    }

    fn settlement_path(&self, id: &TransferId) -> PathBuf {
        self.root
            .join(SETTLEMENTS_DIR_NAME)
            .join(format!("{}.json", id.to_hex()))
    }

    fn read_doc<T: DeserializeOwned>(path: &Path) -> StoreResult<Option<T>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        Ok(Some(serde_json::from_reader(file)?))
    }

    fn write_doc<T: Serialize>(&self, dir_name: &str, path: &Path, value: &T) -> StoreResult<()> {
        // Temp file + rename so a crash mid-write never leaves a torn document.
        let mut tmp = NamedTempFile::new_in(self.root.join(dir_name))?;
        serde_json::to_writer(tmp.as_file_mut(), value)?;
        tmp.persist(path)
            .map_err(|error| StoreError::Io(error.to_string()))?;
        Ok(())
    }

    fn read_dir_docs<T: DeserializeOwned>(&self, dir_name: &str) -> StoreResult<Vec<T>> {
        let mut docs = Vec::new();
        for entry in fs::read_dir(self.root.join(dir_name))? {
            let path = entry?.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            if let Some(doc) = Self::read_doc(&path)? {
                docs.push(doc);
            }
        }
        Ok(docs)
    }
}

#[async_trait]
impl LedgerStore for FileStore {
    async fn get_user(&self, user_id: &str) -> StoreResult<Option<UserRecord>> {
        Self::read_doc(&self.user_path(user_id))
    }

    async fn create_user(&self, user: UserRecord) -> StoreResult<()> {
        let _exclusive = self.lock()?;
        let path = self.user_path(&user.user_id);
        if path.exists() {
            return Err(StoreError::UserExists(user.user_id));
        }
        self.write_doc(USERS_DIR_NAME, &path, &user)
    }

    async fn list_users(&self) -> StoreResult<Vec<UserRecord>> {
        self.read_dir_docs(USERS_DIR_NAME)
    }

    async fn find_user_by_token(&self, api_token: &str) -> StoreResult<Option<UserRecord>> {
        let users: Vec<UserRecord> = self.read_dir_docs(USERS_DIR_NAME)?;
        Ok(users.into_iter().find(|user| user.api_token == api_token))
    }

    async fn put_settlement(&self, settlement: PendingSettlement) -> StoreResult<()> {
        let _exclusive = self.lock()?;
        self.write_doc(
            SETTLEMENTS_DIR_NAME,
            &self.settlement_path(&settlement.id),
            &settlement,
        )
    }

    async fn get_settlement(&self, id: &TransferId) -> StoreResult<Option<PendingSettlement>> {
        Self::read_doc(&self.settlement_path(id))
    }

    async fn find_open_settlement(
        &self,
        sender_id: &str,
        recipient_id: &str,
        amount: Tokens,
    ) -> StoreResult<Option<PendingSettlement>> {
        let settlements: Vec<PendingSettlement> = self.read_dir_docs(SETTLEMENTS_DIR_NAME)?;
        Ok(settlements.into_iter().find(|s| {
            s.sender_id == sender_id && s.recipient_id == recipient_id && s.amount == amount
        }))
    }

    async fn list_confirmed_settlements(&self) -> StoreResult<Vec<PendingSettlement>> {
        let settlements: Vec<PendingSettlement> = self.read_dir_docs(SETTLEMENTS_DIR_NAME)?;
        Ok(settlements
            .into_iter()
            .filter(|s| s.status == SettlementStatus::Confirmed)
            .collect())
    }

    async fn remove_settlement(&self, id: &TransferId) -> StoreResult<()> {
        let _exclusive = self.lock()?;
        match fs::remove_file(self.settlement_path(id)) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    async fn get_transaction(&self, id: &TransferId) -> StoreResult<Option<TransactionRecord>> {
        Self::read_doc(&self.transaction_path(id))
    }

    async fn query_transactions(
        &self,
        filter: TransactionFilter,
    ) -> StoreResult<Vec<TransactionRecord>> {
        let mut records: Vec<TransactionRecord> = self
            .read_dir_docs(TRANSACTIONS_DIR_NAME)?
            .into_iter()
            .filter(|tx: &TransactionRecord| match &filter.user_id {
                Some(user_id) => &tx.sender_id == user_id || &tx.recipient_id == user_id,
                None => true,
            })
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
        let _exclusive = self.lock()?;

        // Idempotent re-commit: the transfer already settled.
        if self.transaction_path(&tx.id).exists() {
            return Self::read_doc(&self.user_path(&sender.user_id))?
                .ok_or_else(|| StoreError::RecordNotFound(sender.user_id.clone()));
        }

        let stored_sender: UserRecord = Self::read_doc(&self.user_path(&sender.user_id))?
            .ok_or_else(|| StoreError::RecordNotFound(sender.user_id.clone()))?;
        if stored_sender.version != sender.version {
            return Err(StoreError::VersionConflict(sender.user_id));
        }
        let stored_recipient: UserRecord = Self::read_doc(&self.user_path(&recipient.user_id))?
            .ok_or_else(|| StoreError::RecordNotFound(recipient.user_id.clone()))?;
        if stored_recipient.version != recipient.version {
            return Err(StoreError::VersionConflict(recipient.user_id));
        }

        sender.version += 1;
        recipient.version += 1;

        // The transaction document is written last: its presence is what marks
        // the transfer as settled, so a crash in between replays cleanly.
        self.write_doc(USERS_DIR_NAME, &self.user_path(&sender.user_id), &sender)?;
        self.write_doc(
            USERS_DIR_NAME,
            &self.user_path(&recipient.user_id),
            &recipient,
        )?;
        self.write_doc(TRANSACTIONS_DIR_NAME, &self.transaction_path(&tx.id), &tx)?;
        let _ = fs::remove_file(self.settlement_path(&tx.id));

        Ok(sender)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChainRef;
    use chrono::Utc;
    use eyre::Result;

    fn store() -> Result<(tempfile::TempDir, FileStore)> {
        let dir = tempfile::tempdir()?;
        let store = FileStore::new(dir.path())?;
        Ok((dir, store))
    }

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
            chain_ref: ChainRef::new(format!("0x{}", id.to_hex())),
        }
    }

    #[tokio::test]
    async fn documents_survive_reopen() -> Result<()> {
        let (dir, store) = store()?;
        store.create_user(user("U1", 10)).await?;
        drop(store);

        let reopened = FileStore::new(dir.path())?;
        let loaded = reopened.get_user("U1").await?.expect("user");
        assert_eq!(loaded.balance, Tokens::from_nanos(10));
        assert_eq!(reopened.get_user("missing").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn commit_moves_balances_once() -> Result<()> {
        let (_dir, store) = store()?;
        store.create_user(user("U1", 10)).await?;
        store.create_user(user("U2", 0)).await?;

        let sender = store.get_user("U1").await?.expect("sender");
        let recipient = store.get_user("U2").await?.expect("recipient");
        let id = TransferId::from([3u8; 32]);
        let record = tx_record(id, "U1", "U2", 4);

        let committed = store
            .commit_transfer(
                sender.debited(Tokens::from_nanos(4))?,
                recipient.credited(Tokens::from_nanos(4))?,
                record.clone(),
            )
            .await?;
        assert_eq!(committed.balance, Tokens::from_nanos(6));

        // Replay: no further balance movement.
        let replay = store
            .commit_transfer(
                sender.debited(Tokens::from_nanos(4))?,
                recipient.credited(Tokens::from_nanos(4))?,
                record,
            )
            .await?;
        assert_eq!(replay.balance, Tokens::from_nanos(6));
        assert_eq!(replay.version, 1);
        Ok(())
    }

    #[tokio::test]
    async fn stale_commit_is_rejected() -> Result<()> {
        let (_dir, store) = store()?;
        store.create_user(user("U1", 10)).await?;
        store.create_user(user("U2", 0)).await?;
        store.create_user(user("U3", 0)).await?;

        let sender = store.get_user("U1").await?.expect("sender");
        let recipient = store.get_user("U2").await?.expect("recipient");
        let other = store.get_user("U3").await?.expect("recipient");

        store
            .commit_transfer(
                sender.debited(Tokens::from_nanos(7))?,
                recipient.credited(Tokens::from_nanos(7))?,
                tx_record(TransferId::from([1u8; 32]), "U1", "U2", 7),
            )
            .await?;

        let stale = store
            .commit_transfer(
                sender.debited(Tokens::from_nanos(7))?,
                other.credited(Tokens::from_nanos(7))?,
                tx_record(TransferId::from([2u8; 32]), "U1", "U3", 7),
            )
            .await;
        assert_eq!(stale, Err(StoreError::VersionConflict("U1".to_string())));
        Ok(())
    }

    #[tokio::test]
    async fn settlement_journal_roundtrip() -> Result<()> {
        let (_dir, store) = store()?;
        let id = TransferId::from([5u8; 32]);
        let mut settlement =
            PendingSettlement::new(id, "U1", "U2", Tokens::from_nanos(4));
        store.put_settlement(settlement.clone()).await?;

        assert!(store.list_confirmed_settlements().await?.is_empty());
        let found = store
            .find_open_settlement("U1", "U2", Tokens::from_nanos(4))
            .await?
            .expect("settlement");
        assert_eq!(found.id, id);

        settlement.mark_confirmed(ChainRef::new("0xabc"));
        store.put_settlement(settlement).await?;
        assert_eq!(store.list_confirmed_settlements().await?.len(), 1);

        store.remove_settlement(&id).await?;
        assert_eq!(store.get_settlement(&id).await?, None);
        Ok(())
    }
}
