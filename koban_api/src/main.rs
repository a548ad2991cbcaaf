// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

mod auth;
mod log;
mod server;

use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use koban_evm::{EvmRecorder, Network, RecorderConfig};
use koban_transfers::{FileStore, Tokens, TransferCoordinator};
use server::AppContext;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const SIGNER_KEY_ENV: &str = "KOBAN_SECRET_KEY";

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let opt = Opt::parse();
    log::init_logging();

    let signer_key = std::env::var(SIGNER_KEY_ENV)
        .map_err(|_| eyre!("{SIGNER_KEY_ENV} must be set to the hex-encoded chain signer key"))?;

    let network = Network::new(&opt.rpc_url, &opt.ledger_address);
    let recorder = EvmRecorder::from_private_key(
        network,
        &signer_key,
        RecorderConfig {
            gas_limit: opt.gas_limit,
            confirmation_timeout: Duration::from_secs(opt.confirmation_timeout),
            required_confirmations: opt.required_confirmations,
        },
    )?;

    let store = Arc::new(FileStore::new(&opt.data_dir)?);
    let coordinator = TransferCoordinator::new(Arc::clone(&store), Arc::new(recorder));

    // Heal any transfer the chain already vouches for but a previous run
    // failed to commit.
    let recovered = coordinator.settle_confirmed().await?;
    if recovered > 0 {
        info!("Recovered {recovered} incomplete settlements from a previous run");
    }

    let reconciler = coordinator.clone();
    let reconcile_interval = Duration::from_secs(opt.reconcile_interval);
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(reconcile_interval).await;
            match reconciler.settle_confirmed().await {
                Ok(0) => {}
                Ok(settled) => info!("Reconciled {settled} incomplete settlements"),
                Err(err) => error!("Settlement reconciliation sweep failed: {err}"),
            }
        }
    });

    let ctx = AppContext {
        coordinator,
        store,
        starting_balance: opt.starting_balance,
    };

    info!("Koban API listening on {}", opt.listen);
    warp::serve(server::routes(ctx)).run(opt.listen).await;

    Ok(())
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Opt {
    /// Socket address for the HTTP listener.
    #[clap(long, default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    /// HTTP JSON-RPC endpoint of the chain hosting the Koban ledger contract.
    #[clap(long)]
    rpc_url: String,

    /// Address of the deployed KobanLedger contract.
    #[clap(long)]
    ledger_address: String,

    /// Directory holding the ledger documents.
    #[clap(long)]
    data_dir: PathBuf,

    /// Balance granted to newly registered users, in whole koban.
    #[clap(long, default_value = "10")]
    starting_balance: Tokens,

    /// Fixed gas limit for each chain write.
    #[clap(long, default_value_t = 100_000)]
    gas_limit: u64,

    /// Seconds to wait for chain confirmation before reporting a timeout.
    #[clap(long, default_value_t = 60)]
    confirmation_timeout: u64,

    /// Confirmations required before a chain write counts as settled.
    #[clap(long, default_value_t = 1)]
    required_confirmations: u64,

    /// Seconds between background settlement reconciliation sweeps.
    #[clap(long, default_value_t = 60)]
    reconcile_interval: u64,
}
