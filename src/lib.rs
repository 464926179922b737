//! # bankcore
//!
//! The two parts of a banking backend that carry real design stakes:
//!
//! ### Atomic fund transfers
//! [`LedgerStore::transfer_tx`] moves money between two accounts as one unit
//! of work: a transfer row, two entries summing to zero, and both balance
//! updates commit together or not at all. Balance rows are always locked in
//! ascending account id order, so concurrent transfers over the same accounts
//! never deadlock and never lose an update.
//!
//! ```rust,ignore
//! let store = LedgerStore::new(Box::new(PostgresAdapter::from_pool(pool)));
//! let receipt = store
//!     .transfer_tx(TransferTxParams::new(alice.id, bob.id, 100_00))
//!     .await?;
//! assert_eq!(receipt.from_entry.amount, -100_00);
//! ```
//!
//! ### Tokens and sessions
//! A [`token::Maker`] issues and verifies tokens, either HMAC-signed claims
//! ([`token::JwtMaker`]) or a sealed XChaCha20-Poly1305 payload
//! ([`token::SealedMaker`]). Refresh tokens are backed by a persisted
//! [`Session`] that can be blocked; [`AuthService::renew_access_token`]
//! checks the token and the session before minting a new access token.
//!
//! ## Feature flags
//!
//! | Flag       | Default | Description                  |
//! |------------|---------|------------------------------|
//! | `postgres` | ✓       | PostgreSQL adapter via sqlx  |

pub mod account;
pub mod adapters;
pub mod auth;
pub mod config;
pub mod entry;
pub mod error;
pub mod session;
pub mod store;
pub mod token;
pub mod transfer;
pub mod user;

pub use account::{Account, CreateAccountParams, Page};
pub use auth::{
    AuthService, ClientMetadata, LoginRequest, LoginResponse, PasswordHasher, RenewedAccessToken,
    TokenDurations, authorize_bearer,
};
pub use config::Config;
pub use entry::Entry;
pub use error::Error;
pub use session::{CreateSessionParams, Session};
pub use store::LedgerStore;
pub use token::{Maker, Payload, TokenBackend};
pub use transfer::{Transfer, TransferTxParams, TransferTxResult};
pub use user::{CreateUserParams, CreateUserRequest, User};

use async_trait::async_trait;
use tokio::time::Instant;
use uuid::Uuid;

/// Storage for accounts, entries and transfers.
#[async_trait]
pub trait LedgerAdapter: Send + Sync {
    /// Execute a transfer atomically.
    /// Implementors MUST:
    /// 1. BEGIN a unit of work
    /// 2. Resolve both accounts, `NotFound` if either is missing
    /// 3. Insert the transfer row and its two entries
    /// 4. Update balances in `params.balance_deltas()` order, lowest id first
    /// 5. ROLLBACK and return `Cancelled` if `deadline` passes before COMMIT
    ///    is issued. Once issued, COMMIT runs to completion regardless.
    /// 6. COMMIT on success, ROLLBACK on any error or if dropped before commit
    async fn transfer_tx(
        &self,
        params: &TransferTxParams,
        deadline: Option<Instant>,
    ) -> Result<TransferTxResult, Error>;

    // ACCOUNTS
    async fn create_account(&self, params: CreateAccountParams) -> Result<Account, Error>;
    async fn get_account(&self, id: i64) -> Result<Account, Error>;
    async fn list_accounts(&self, owner: &str, page: Page) -> Result<Vec<Account>, Error>;
    /// Administrative. Fails with `Conflict` once the account has ledger history.
    async fn delete_account(&self, id: i64) -> Result<(), Error>;

    // READ OPERATIONS
    async fn get_transfer(&self, id: i64) -> Result<Transfer, Error>;
    /// Transfers where `account_id` is either side, oldest first.
    async fn list_transfers(&self, account_id: i64, page: Page) -> Result<Vec<Transfer>, Error>;
    async fn get_entry(&self, id: i64) -> Result<Entry, Error>;
    async fn list_entries(&self, account_id: i64, page: Page) -> Result<Vec<Entry>, Error>;
}

/// Storage for registered users, keyed by username.
#[async_trait]
pub trait UserAdapter: Send + Sync {
    /// `Conflict` if the username or email is taken.
    async fn create_user(&self, params: CreateUserParams) -> Result<User, Error>;
    async fn get_user(&self, username: &str) -> Result<User, Error>;
}

/// Storage for refresh-token sessions.
#[async_trait]
pub trait SessionAdapter: Send + Sync {
    /// `Conflict` if the id or the refresh token already exists.
    async fn create_session(&self, params: CreateSessionParams) -> Result<Session, Error>;
    async fn get_session(&self, id: Uuid) -> Result<Session, Error>;
    /// Idempotent. There is no unblock.
    async fn block_session(&self, id: Uuid) -> Result<(), Error>;
}
