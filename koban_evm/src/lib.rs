// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

#[macro_use]
extern crate tracing;

use crate::common::Address;
use alloy::transports::http::reqwest;
use std::str::FromStr;

pub mod common;
pub mod contract;
pub(crate) mod event;
pub mod recorder;

pub use recorder::{EvmRecorder, RecorderConfig};

/// Target chain hosting the Koban ledger contract.
///
/// There is no canonical public deployment; the target always comes from
/// configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct Network {
    rpc_url_http: reqwest::Url,
    ledger_address: Address,
}

impl Network {
    pub fn new(rpc_url: &str, ledger_addr: &str) -> Self {
        Self {
            rpc_url_http: reqwest::Url::parse(rpc_url).expect("Invalid RPC URL"),
            ledger_address: Address::from_str(ledger_addr).expect("Invalid ledger address"),
        }
    }

    pub fn rpc_url(&self) -> &reqwest::Url {
        &self.rpc_url_http
    }

    pub fn ledger_address(&self) -> &Address {
        &self.ledger_address
    }
}
