// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::common::{EthereumWallet, TransferKey, TxHash, U256};
use crate::contract::koban_ledger::{Error as LedgerContractError, KobanLedgerHandler};
use crate::event::{TransferRecordedEvent, TRANSFER_RECORDED_EVENT_SIGNATURE};
use crate::Network;
use alloy::eips::BlockNumberOrTag;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::Filter;
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::{RpcError, TransportErrorKind};
use async_trait::async_trait;
use koban_transfers::{ChainError, ChainRecorder, ChainRef, Tokens, TransferId};
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid signer key: {0}")]
    InvalidSignerKey(String),
    #[error(transparent)]
    RpcError(#[from] RpcError<TransportErrorKind>),
    #[error(transparent)]
    Contract(#[from] LedgerContractError),
}

/// Tuning for the chain write path.
#[derive(Clone, Debug)]
pub struct RecorderConfig {
    /// Fixed gas limit for each record-of-transfer call.
    pub gas_limit: u64,
    /// Upper bound on the wait for network confirmation.
    pub confirmation_timeout: Duration,
    /// Confirmations required before a record counts as settled.
    pub required_confirmations: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            gas_limit: 100_000,
            confirmation_timeout: Duration::from_secs(60),
            required_confirmations: 1,
        }
    }
}

/// [`ChainRecorder`] backed by the KobanLedger contract.
pub struct EvmRecorder {
    network: Network,
    wallet: EthereumWallet,
    config: RecorderConfig,
}

impl EvmRecorder {
    pub fn new(network: Network, wallet: EthereumWallet, config: RecorderConfig) -> Self {
        Self {
            network,
            wallet,
            config,
        }
    }

    /// Build a recorder from a hex-encoded signer key.
    pub fn from_private_key(
        network: Network,
        private_key: &str,
        config: RecorderConfig,
    ) -> Result<Self, Error> {
        let signer: PrivateKeySigner = private_key
            .trim_start_matches("0x")
            .parse()
            .map_err(|err| Error::InvalidSignerKey(format!("{err}")))?;
        Ok(Self::new(network, EthereumWallet::from(signer), config))
    }

    /// Look up an earlier TransferRecorded event for this id.
    ///
    /// This is what makes the recorder idempotent: a retry after a lost
    /// receipt recovers the original tx hash from the logs.
    async fn find_recorded(
        &self,
        transfer_id: TransferKey,
    ) -> Result<Option<TransferRecordedEvent>, Error> {
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .on_http(self.network.rpc_url().clone());

        let filter = Filter::new()
            .address(*self.network.ledger_address())
            .event_signature(TRANSFER_RECORDED_EVENT_SIGNATURE)
            .topic1(transfer_id)
            .from_block(BlockNumberOrTag::Earliest);

        let logs = provider.get_logs(&filter).await?;
        for log in logs {
            if let Ok(event) = TransferRecordedEvent::try_from(log) {
                if event.transfer_id == transfer_id {
                    return Ok(Some(event));
                }
            }
        }
        Ok(None)
    }

    /// Fetch the receipt status for a confirmed transaction.
    async fn receipt_status(&self, tx_hash: TxHash) -> Result<Option<bool>, Error> {
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .on_http(self.network.rpc_url().clone());
        let maybe_receipt = provider.get_transaction_receipt(tx_hash).await?;
        Ok(maybe_receipt.map(|receipt| receipt.status()))
    }
}

#[async_trait]
impl ChainRecorder for EvmRecorder {
    async fn record_transfer(
        &self,
        transfer_id: TransferId,
        sender_id: &str,
        recipient_id: &str,
        amount: Tokens,
    ) -> Result<ChainRef, ChainError> {
        let key = TransferKey::from(transfer_id.into_bytes());

        // A retried token may already be on the ledger; reuse its proof
        // instead of minting a second entry.
        match self.find_recorded(key).await {
            Ok(Some(event)) => {
                debug!(
                    "Transfer {transfer_id} already recorded on chain in tx {:?}",
                    event.tx_hash
                );
                return Ok(ChainRef::new(event.tx_hash.to_string()));
            }
            Ok(None) => {}
            Err(err) => {
                // If the chain is unreachable the submission below reports the
                // failure properly.
                warn!("Could not check for a prior record of transfer {transfer_id}: {err}");
            }
        }

        let wallet_provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(self.wallet.clone())
            .on_http(self.network.rpc_url().clone());
        let ledger = KobanLedgerHandler::new(*self.network.ledger_address(), wallet_provider);

        let submit = ledger.record_transfer(
            key,
            sender_id,
            recipient_id,
            U256::from(amount.as_nanos()),
            self.config.gas_limit,
            self.config.required_confirmations,
        );
        let tx_hash = match tokio::time::timeout(self.config.confirmation_timeout, submit).await {
            Err(_elapsed) => {
                return Err(ChainError::TimedOut(
                    self.config.confirmation_timeout.as_secs(),
                ));
            }
            Ok(Err(err)) => return Err(ChainError::Rejected(err.to_string())),
            Ok(Ok(tx_hash)) => tx_hash,
        };

        // Watching stops at inclusion; the receipt status is what tells a
        // successful call from a reverted one.
        match self.receipt_status(tx_hash).await {
            Ok(Some(true)) => Ok(ChainRef::new(tx_hash.to_string())),
            Ok(Some(false)) => Err(ChainError::Reverted(format!(
                "transaction {tx_hash} reverted on chain"
            ))),
            Ok(None) | Err(_) => {
                // Inclusion was observed but cannot be re-verified right now;
                // ambiguous, so the caller must retry with the same token.
                warn!("Could not verify receipt status of confirmed tx {tx_hash:?}");
                Err(ChainError::TimedOut(
                    self.config.confirmation_timeout.as_secs(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // First default Anvil dev account key; nothing sensitive.
    const DEV_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn network() -> Network {
        Network::new(
            "http://localhost:8545",
            "0x5FbDB2315678afecb367f032d93F642f64180aa3",
        )
    }

    #[test]
    fn builds_from_a_hex_key_with_or_without_prefix() {
        assert!(
            EvmRecorder::from_private_key(network(), DEV_KEY, RecorderConfig::default()).is_ok()
        );
        assert!(EvmRecorder::from_private_key(
            network(),
            &format!("0x{DEV_KEY}"),
            RecorderConfig::default()
        )
        .is_ok());
    }

    #[test]
    fn rejects_a_malformed_key() {
        assert!(matches!(
            EvmRecorder::from_private_key(network(), "not-a-key", RecorderConfig::default()),
            Err(Error::InvalidSignerKey(_))
        ));
    }

    #[test]
    fn amounts_map_to_raw_token_units() {
        let four = Tokens::from_nanos(4_000_000_000);
        assert_eq!(U256::from(four.as_nanos()), U256::from(4_000_000_000u64));
    }
}
