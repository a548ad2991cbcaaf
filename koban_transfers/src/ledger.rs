// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::error::{Result, TransferError};
use crate::tokens::Tokens;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Identifier of one logical transfer.
///
/// Generated once per transfer and reused across every retry of it: it keys
/// the transaction document in the store and doubles as the idempotency token
/// handed to the chain ledger, so no retry path can produce a second on-chain
/// entry or a second balance adjustment for the same transfer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct TransferId([u8; 32]);

impl TransferId {
    /// A fresh random id.
    pub fn random(rng: &mut impl RngCore) -> Self {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Access the 32 byte slice of the id
    pub fn slice(&self) -> &[u8; 32] {
        &self.0
    }

    /// The raw bytes, by value.
    pub fn into_bytes(self) -> [u8; 32] {
        self.0
    }

    /// Deserializes a `TransferId` represented as a hex string.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let mut id = Self::default();
        hex::decode_to_slice(hex, &mut id.0)
            .map_err(|e| TransferError::HexDeserializationFailed(e.to_string()))?;
        Ok(id)
    }

    /// Serialize this `TransferId` instance to a hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for TransferId {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self> {
        TransferId::from_hex(s)
    }
}

impl From<[u8; 32]> for TransferId {
    fn from(val: [u8; 32]) -> TransferId {
        TransferId(val)
    }
}

// Display TransferId value as hex in Debug output.
impl fmt::Debug for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TransferId").field(&self.to_hex()).finish()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl AsRef<[u8]> for TransferId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// The chain ledger's proof-of-write identifier for a recorded transfer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainRef(String);

impl ChainRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChainRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user's balance document.
///
/// Mutated only through [`crate::store::LedgerStore::commit_transfer`], which
/// compares `version` against the stored copy before writing, so a transfer
/// whose precondition read has gone stale fails at commit time instead of
/// double spending.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    pub display_name: String,
    /// Bearer credential resolved by the identity gateway.
    pub api_token: String,
    /// Amount available to send. Never negative: stored as raw nanos and only
    /// mutated through checked arithmetic.
    pub balance: Tokens,
    /// Cumulative amount ever sent. Only grows, by exactly the amount of each
    /// completed outgoing transfer.
    pub total_sent: Tokens,
    /// Optimistic concurrency stamp, bumped on every committed mutation.
    pub version: u64,
}

impl UserRecord {
    pub fn new(
        user_id: impl Into<String>,
        display_name: impl Into<String>,
        api_token: impl Into<String>,
        starting_balance: Tokens,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            api_token: api_token.into(),
            balance: starting_balance,
            total_sent: Tokens::zero(),
            version: 0,
        }
    }

    /// A copy of this record with an outgoing transfer applied.
    pub fn debited(&self, amount: Tokens) -> Result<Self> {
        let balance = self
            .balance
            .checked_sub(amount)
            .ok_or(TransferError::NumericOverflow)?;
        let total_sent = self
            .total_sent
            .checked_add(amount)
            .ok_or(TransferError::NumericOverflow)?;
        Ok(Self {
            balance,
            total_sent,
            ..self.clone()
        })
    }

    /// A copy of this record with an incoming transfer applied.
    pub fn credited(&self, amount: Tokens) -> Result<Self> {
        let balance = self
            .balance
            .checked_add(amount)
            .ok_or(TransferError::NumericOverflow)?;
        Ok(Self {
            balance,
            ..self.clone()
        })
    }
}

/// A completed transfer, as persisted in the store.
///
/// Exists if and only if the matching balance mutation was committed; the
/// atomic commit in the store guarantees both or neither. Never mutated or
/// deleted once written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TransferId,
    pub sender_id: String,
    pub recipient_id: String,
    pub amount: Tokens,
    pub timestamp: DateTime<Utc>,
    pub chain_ref: ChainRef,
}

/// Lifecycle of a journalled settlement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementStatus {
    /// Submitted (or about to be submitted) to the chain ledger; no proof yet.
    Submitted,
    /// Chain-confirmed but not yet committed to the store.
    Confirmed,
}

/// Write-ahead journal entry for an in-flight transfer.
///
/// Written before the chain call so that the chain-confirmed-but-uncommitted
/// window is always recoverable: the entry carries the idempotency token and,
/// once confirmed, the chain ref needed for an idempotent re-commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSettlement {
    pub id: TransferId,
    pub sender_id: String,
    pub recipient_id: String,
    pub amount: Tokens,
    pub chain_ref: Option<ChainRef>,
    pub status: SettlementStatus,
    pub created_at: DateTime<Utc>,
}

impl PendingSettlement {
    pub fn new(
        id: TransferId,
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        amount: Tokens,
    ) -> Self {
        Self {
            id,
            sender_id: sender_id.into(),
            recipient_id: recipient_id.into(),
            amount,
            chain_ref: None,
            status: SettlementStatus::Submitted,
            created_at: Utc::now(),
        }
    }

    /// Attach the proof-of-write and move to `Confirmed`.
    pub fn mark_confirmed(&mut self, chain_ref: ChainRef) {
        self.chain_ref = Some(chain_ref);
        self.status = SettlementStatus::Confirmed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_id_hex_roundtrip() -> Result<()> {
        let id = TransferId::from([7u8; 32]);
        let hex = id.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(TransferId::from_hex(&hex)?, id);

        let too_short = &hex[..10];
        assert!(matches!(
            TransferId::from_hex(too_short),
            Err(TransferError::HexDeserializationFailed(_))
        ));
        Ok(())
    }

    #[test]
    fn debit_updates_balance_and_total() -> Result<()> {
        let user = UserRecord::new("U1", "alice", "token", Tokens::from_nanos(10));
        let debited = user.debited(Tokens::from_nanos(4))?;

        assert_eq!(debited.balance, Tokens::from_nanos(6));
        assert_eq!(debited.total_sent, Tokens::from_nanos(4));
        assert_eq!(debited.version, user.version);

        assert_eq!(
            user.debited(Tokens::from_nanos(11)),
            Err(TransferError::NumericOverflow)
        );
        Ok(())
    }

    #[test]
    fn credit_leaves_total_untouched() -> Result<()> {
        let user = UserRecord::new("U2", "bob", "token", Tokens::zero());
        let credited = user.credited(Tokens::from_nanos(4))?;

        assert_eq!(credited.balance, Tokens::from_nanos(4));
        assert_eq!(credited.total_sent, Tokens::zero());
        Ok(())
    }
}
