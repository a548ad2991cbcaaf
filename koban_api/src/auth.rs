// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use koban_transfers::{LedgerStore, StoreError, UserRecord};

/// Failures resolving the bearer credential.
#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("Authentication required")]
    MissingCredential,
    #[error("Invalid bearer token")]
    UnknownCredential,
    #[error("Ledger store error: {0}")]
    Store(#[from] StoreError),
}

/// The identity gateway: resolve an `Authorization: Bearer <token>` header to
/// the ledger user it belongs to. The credential is opaque here; it is minted
/// at registration and only ever compared by the store.
pub async fn resolve_bearer<S: LedgerStore>(
    store: &S,
    header: Option<&str>,
) -> Result<UserRecord, AuthError> {
    let token = header
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::MissingCredential)?;

    store
        .find_user_by_token(token)
        .await?
        .ok_or(AuthError::UnknownCredential)
}
