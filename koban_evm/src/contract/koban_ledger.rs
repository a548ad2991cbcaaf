// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::common::{Address, TransferKey, TxHash, U256};
use crate::contract::koban_ledger::KobanLedgerContract::KobanLedgerContractInstance;
use alloy::providers::{Network, Provider};
use alloy::sol;
use alloy::transports::{RpcError, Transport, TransportErrorKind};

sol!(
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract KobanLedgerContract {
        event TransferRecorded(bytes32 indexed transferId, uint256 amount);

        function recordTransfer(
            bytes32 transferId,
            string calldata senderId,
            string calldata recipientId,
            uint256 amount
        ) external;

        function isRecorded(bytes32 transferId) external view returns (bool);
    }
);

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    ContractError(#[from] alloy::contract::Error),
    #[error(transparent)]
    RpcError(#[from] RpcError<TransportErrorKind>),
    #[error(transparent)]
    PendingTransactionError(#[from] alloy::providers::PendingTransactionError),
}

pub struct KobanLedgerHandler<T: Transport + Clone, P: Provider<T, N>, N: Network> {
    pub contract: KobanLedgerContractInstance<T, P, N>,
}

impl<T, P, N> KobanLedgerHandler<T, P, N>
where
    T: Transport + Clone,
    P: Provider<T, N>,
    N: Network,
{
    /// Create a new KobanLedger contract instance.
    pub fn new(contract_address: Address, provider: P) -> Self {
        let contract = KobanLedgerContract::new(contract_address, provider);
        KobanLedgerHandler { contract }
    }

    pub fn set_provider(&mut self, provider: P) {
        let address = *self.contract.address();
        self.contract = KobanLedgerContract::new(address, provider);
    }

    /// Submit a record-of-transfer call and wait until it is confirmed.
    pub async fn record_transfer(
        &self,
        transfer_id: TransferKey,
        sender_id: &str,
        recipient_id: &str,
        amount: U256,
        gas_limit: u64,
        required_confirmations: u64,
    ) -> Result<TxHash, Error> {
        debug!("Recording transfer {transfer_id:?} of raw amount {amount} on the ledger");
        let call = self
            .contract
            .recordTransfer(
                transfer_id,
                sender_id.to_string(),
                recipient_id.to_string(),
                amount,
            )
            .gas(gas_limit.into());

        let pending_tx_builder = call.send().await.inspect_err(|err| {
            error!("Error submitting record of transfer {transfer_id:?}: {err:?}")
        })?;

        let pending_tx_hash = *pending_tx_builder.tx_hash();
        debug!("Record of transfer {transfer_id:?} is pending with tx hash: {pending_tx_hash:?}");

        let tx_hash = pending_tx_builder
            .with_required_confirmations(required_confirmations)
            .watch()
            .await
            .inspect_err(|err| {
                error!("Error watching record tx with hash {pending_tx_hash:?}: {err:?}")
            })?;

        debug!("Record tx with hash {tx_hash:?} is confirmed");

        Ok(tx_hash)
    }

    /// Whether the ledger already holds an entry for this transfer id.
    pub async fn is_recorded(&self, transfer_id: TransferKey) -> Result<bool, Error> {
        let recorded = self
            .contract
            .isRecorded(transfer_id)
            .call()
            .await
            .inspect_err(|err| {
                error!("Error checking for a record of transfer {transfer_id:?}: {err:?}")
            })?
            ._0;
        Ok(recorded)
    }
}
