// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::common::{Hash, TransferKey, TxHash, U256};
use crate::contract::koban_ledger::KobanLedgerContract;
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;

pub(crate) const TRANSFER_RECORDED_EVENT_SIGNATURE: Hash =
    KobanLedgerContract::TransferRecorded::SIGNATURE_HASH;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Topics amount is unexpected. Was expecting 2")]
    TopicsAmountUnexpected,
    #[error("Event signature is missing")]
    EventSignatureMissing,
    #[error("Event signature does not match")]
    EventSignatureDoesNotMatch,
    #[error("Event is not attached to a transaction")]
    TransactionHashMissing,
}

/// Struct for the TransferRecorded event emitted by the KobanLedger smart contract.
#[derive(Debug)]
pub(crate) struct TransferRecordedEvent {
    pub transfer_id: TransferKey,
    pub amount: U256,
    pub tx_hash: TxHash,
}

impl TryFrom<Log> for TransferRecordedEvent {
    type Error = Error;

    fn try_from(log: Log) -> Result<Self, Self::Error> {
        // Verify the amount of topics
        if log.topics().len() != 2 {
            error!("Topics amount is unexpected. Was expecting 2");
            return Err(Error::TopicsAmountUnexpected);
        }

        let topic0 = log.topics().first().ok_or(Error::EventSignatureMissing)?;

        // Verify the event signature
        if topic0 != &TRANSFER_RECORDED_EVENT_SIGNATURE {
            error!(
                "Event signature does not match. Expected: {:?}, got: {:?}",
                TRANSFER_RECORDED_EVENT_SIGNATURE, topic0
            );
            return Err(Error::EventSignatureDoesNotMatch);
        }

        // Extract the data
        let transfer_id = log.topics()[1];
        let amount = U256::from_be_slice(&log.inner.data.data);
        let tx_hash = log.transaction_hash.ok_or(Error::TransactionHashMissing)?;

        Ok(Self {
            transfer_id,
            amount,
            tx_hash,
        })
    }
}
