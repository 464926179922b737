use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, postgres::PgRow};
use tokio::time::Instant;
use uuid::Uuid;

use crate::{
    Account, CreateAccountParams, CreateSessionParams, CreateUserParams, Entry, Error,
    LedgerAdapter, Page, Session, SessionAdapter, Transfer, TransferTxParams, TransferTxResult,
    User, UserAdapter,
    transfer::{before_deadline, ensure_same_currency},
};

/// PostgreSQL adapter.
///
/// Schema:
/// ```sql
/// CREATE TABLE accounts (
///     id BIGSERIAL PRIMARY KEY,
///     owner TEXT NOT NULL,
///     balance BIGINT NOT NULL,
///     currency TEXT NOT NULL,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     UNIQUE (owner, currency)
/// );
/// CREATE TABLE entries (
///     id BIGSERIAL PRIMARY KEY,
///     account_id BIGINT NOT NULL REFERENCES accounts(id),
///     amount BIGINT NOT NULL,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// CREATE TABLE transfers (
///     id BIGSERIAL PRIMARY KEY,
///     from_account_id BIGINT NOT NULL REFERENCES accounts(id),
///     to_account_id BIGINT NOT NULL REFERENCES accounts(id),
///     amount BIGINT NOT NULL CHECK (amount > 0),
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// CREATE TABLE users (
///     username TEXT PRIMARY KEY,
///     hashed_password TEXT NOT NULL,
///     full_name TEXT NOT NULL,
///     email TEXT NOT NULL UNIQUE,
///     password_changed_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// CREATE TABLE sessions (
///     id UUID PRIMARY KEY,
///     username TEXT NOT NULL,
///     refresh_token TEXT NOT NULL UNIQUE,
///     user_agent TEXT NOT NULL,
///     client_ip TEXT NOT NULL,
///     is_blocked BOOLEAN NOT NULL DEFAULT FALSE,
///     expires_at TIMESTAMPTZ NOT NULL,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```
pub struct PostgresAdapter {
    pool: PgPool,
}

impl PostgresAdapter {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<(), Error> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id BIGSERIAL PRIMARY KEY,
                owner TEXT NOT NULL,
                balance BIGINT NOT NULL,
                currency TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                CONSTRAINT owner_currency_key UNIQUE (owner, currency)
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_accounts_owner ON accounts(owner)
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                id BIGSERIAL PRIMARY KEY,
                account_id BIGINT NOT NULL REFERENCES accounts(id),
                amount BIGINT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_entries_account ON entries(account_id)
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transfers (
                id BIGSERIAL PRIMARY KEY,
                from_account_id BIGINT NOT NULL REFERENCES accounts(id),
                to_account_id BIGINT NOT NULL REFERENCES accounts(id),
                amount BIGINT NOT NULL CHECK (amount > 0),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_transfers_from ON transfers(from_account_id)
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_transfers_to ON transfers(to_account_id)
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                username TEXT PRIMARY KEY,
                hashed_password TEXT NOT NULL,
                full_name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                password_changed_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id UUID PRIMARY KEY,
                username TEXT NOT NULL,
                refresh_token TEXT NOT NULL UNIQUE,
                user_agent TEXT NOT NULL,
                client_ip TEXT NOT NULL,
                is_blocked BOOLEAN NOT NULL DEFAULT FALSE,
                expires_at TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        tx.commit().await.map_err(storage_error)?;
        Ok(())
    }
}

/// Maps driver errors onto the crate taxonomy. Unique violations are
/// conflicts; a foreign key violation means a referenced account is gone.
fn storage_error(err: sqlx::Error) -> Error {
    match &err {
        sqlx::Error::RowNotFound => Error::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            Error::Conflict(db.message().to_string())
        }
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => Error::NotFound,
        _ => Error::Internal(err.to_string()),
    }
}

fn account_from_row(row: &PgRow) -> Result<Account, Error> {
    Ok(Account {
        id: row.try_get("id").map_err(storage_error)?,
        owner: row.try_get("owner").map_err(storage_error)?,
        balance: row.try_get("balance").map_err(storage_error)?,
        currency: row.try_get("currency").map_err(storage_error)?,
        created_at: row.try_get("created_at").map_err(storage_error)?,
    })
}

fn entry_from_row(row: &PgRow) -> Result<Entry, Error> {
    Ok(Entry {
        id: row.try_get("id").map_err(storage_error)?,
        account_id: row.try_get("account_id").map_err(storage_error)?,
        amount: row.try_get("amount").map_err(storage_error)?,
        created_at: row.try_get("created_at").map_err(storage_error)?,
    })
}

fn transfer_from_row(row: &PgRow) -> Result<Transfer, Error> {
    Ok(Transfer {
        id: row.try_get("id").map_err(storage_error)?,
        from_account_id: row.try_get("from_account_id").map_err(storage_error)?,
        to_account_id: row.try_get("to_account_id").map_err(storage_error)?,
        amount: row.try_get("amount").map_err(storage_error)?,
        created_at: row.try_get("created_at").map_err(storage_error)?,
    })
}

fn user_from_row(row: &PgRow) -> Result<User, Error> {
    Ok(User {
        username: row.try_get("username").map_err(storage_error)?,
        hashed_password: row.try_get("hashed_password").map_err(storage_error)?,
        full_name: row.try_get("full_name").map_err(storage_error)?,
        email: row.try_get("email").map_err(storage_error)?,
        password_changed_at: row.try_get("password_changed_at").map_err(storage_error)?,
        created_at: row.try_get("created_at").map_err(storage_error)?,
    })
}

fn session_from_row(row: &PgRow) -> Result<Session, Error> {
    Ok(Session {
        id: row.try_get("id").map_err(storage_error)?,
        username: row.try_get("username").map_err(storage_error)?,
        refresh_token: row.try_get("refresh_token").map_err(storage_error)?,
        client_ip: row.try_get("client_ip").map_err(storage_error)?,
        user_agent: row.try_get("user_agent").map_err(storage_error)?,
        is_blocked: row.try_get("is_blocked").map_err(storage_error)?,
        expires_at: row.try_get("expires_at").map_err(storage_error)?,
        created_at: row.try_get("created_at").map_err(storage_error)?,
    })
}

async fn create_entry_tx(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    account_id: i64,
    amount: i64,
) -> Result<Entry, Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO entries (account_id, amount)
        VALUES ($1, $2)
        RETURNING id, account_id, amount, created_at
        "#,
    )
    .bind(account_id)
    .bind(amount)
    .fetch_one(&mut **tx)
    .await
    .map_err(storage_error)?;

    entry_from_row(&row)
}

/// Takes the row lock on the account and applies the delta.
async fn add_account_balance_tx(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    account_id: i64,
    amount: i64,
) -> Result<Account, Error> {
    let row = sqlx::query(
        r#"
        UPDATE accounts
        SET balance = balance + $2
        WHERE id = $1
        RETURNING id, owner, balance, currency, created_at
        "#,
    )
    .bind(account_id)
    .bind(amount)
    .fetch_optional(&mut **tx)
    .await
    .map_err(storage_error)?
    .ok_or(Error::NotFound)?;

    account_from_row(&row)
}

/// Everything a transfer writes, short of COMMIT.
async fn transfer_tx_unit(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    params: &TransferTxParams,
) -> Result<TransferTxResult, Error> {
    // ── Phase 1: Resolve ───────────────────────────────────────────────────
    let rows = sqlx::query(
        r#"
        SELECT id, owner, balance, currency, created_at
        FROM accounts
        WHERE id = ANY($1)
        "#,
    )
    .bind(vec![params.from_account_id, params.to_account_id])
    .fetch_all(&mut **tx)
    .await
    .map_err(storage_error)?;

    let accounts = rows
        .iter()
        .map(account_from_row)
        .collect::<Result<Vec<_>, _>>()?;
    let from = accounts
        .iter()
        .find(|a| a.id == params.from_account_id)
        .ok_or(Error::NotFound)?;
    let to = accounts
        .iter()
        .find(|a| a.id == params.to_account_id)
        .ok_or(Error::NotFound)?;
    ensure_same_currency(from, to)?;

    // ── Phase 2: Record ────────────────────────────────────────────────────
    let row = sqlx::query(
        r#"
        INSERT INTO transfers (from_account_id, to_account_id, amount)
        VALUES ($1, $2, $3)
        RETURNING id, from_account_id, to_account_id, amount, created_at
        "#,
    )
    .bind(params.from_account_id)
    .bind(params.to_account_id)
    .bind(params.amount)
    .fetch_one(&mut **tx)
    .await
    .map_err(storage_error)?;
    let transfer = transfer_from_row(&row)?;

    let from_entry = create_entry_tx(tx, params.from_account_id, -params.amount).await?;
    let to_entry = create_entry_tx(tx, params.to_account_id, params.amount).await?;

    // ── Phase 3: Balances, lowest account id first ─────────────────────────
    let mut updated = Vec::with_capacity(2);
    for delta in params.balance_deltas() {
        updated.push(add_account_balance_tx(tx, delta.account_id, delta.amount).await?);
    }

    TransferTxResult::assemble(params, transfer, from_entry, to_entry, updated)
}

#[async_trait]
impl LedgerAdapter for PostgresAdapter {
    async fn transfer_tx(
        &self,
        params: &TransferTxParams,
        deadline: Option<Instant>,
    ) -> Result<TransferTxResult, Error> {
        params.validate()?;

        // Dropping `tx` on any early return, deadline included, rolls the
        // whole unit back.
        let (tx, receipt) = before_deadline(deadline, async {
            let mut tx = self.pool.begin().await.map_err(storage_error)?;
            let receipt = transfer_tx_unit(&mut tx, params).await?;
            Ok((tx, receipt))
        })
        .await?;

        // Not bounded by the deadline: COMMIT may already be durable
        // server-side before its acknowledgement arrives.
        tx.commit().await.map_err(storage_error)?;

        Ok(receipt)
    }

    async fn create_account(&self, params: CreateAccountParams) -> Result<Account, Error> {
        let row = sqlx::query(
            r#"
            INSERT INTO accounts (owner, balance, currency)
            VALUES ($1, $2, $3)
            RETURNING id, owner, balance, currency, created_at
            "#,
        )
        .bind(&params.owner)
        .bind(params.balance)
        .bind(&params.currency)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error)?;

        account_from_row(&row)
    }

    async fn get_account(&self, id: i64) -> Result<Account, Error> {
        let row = sqlx::query(
            r#"
            SELECT id, owner, balance, currency, created_at
            FROM accounts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?
        .ok_or(Error::NotFound)?;

        account_from_row(&row)
    }

    async fn list_accounts(&self, owner: &str, page: Page) -> Result<Vec<Account>, Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner, balance, currency, created_at
            FROM accounts
            WHERE owner = $1
            ORDER BY id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(owner)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.iter().map(account_from_row).collect()
    }

    async fn delete_account(&self, id: i64) -> Result<(), Error> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|err| {
                if let sqlx::Error::Database(db) = &err {
                    if db.is_foreign_key_violation() {
                        return Error::Conflict(format!("account {} has ledger history", id));
                    }
                }
                storage_error(err)
            })?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    async fn get_transfer(&self, id: i64) -> Result<Transfer, Error> {
        let row = sqlx::query(
            r#"
            SELECT id, from_account_id, to_account_id, amount, created_at
            FROM transfers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?
        .ok_or(Error::NotFound)?;

        transfer_from_row(&row)
    }

    async fn list_transfers(&self, account_id: i64, page: Page) -> Result<Vec<Transfer>, Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, from_account_id, to_account_id, amount, created_at
            FROM transfers
            WHERE from_account_id = $1 OR to_account_id = $1
            ORDER BY id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(account_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.iter().map(transfer_from_row).collect()
    }

    async fn get_entry(&self, id: i64) -> Result<Entry, Error> {
        let row = sqlx::query(
            r#"
            SELECT id, account_id, amount, created_at
            FROM entries
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?
        .ok_or(Error::NotFound)?;

        entry_from_row(&row)
    }

    async fn list_entries(&self, account_id: i64, page: Page) -> Result<Vec<Entry>, Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, amount, created_at
            FROM entries
            WHERE account_id = $1
            ORDER BY id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(account_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.iter().map(entry_from_row).collect()
    }
}

#[async_trait]
impl UserAdapter for PostgresAdapter {
    async fn create_user(&self, params: CreateUserParams) -> Result<User, Error> {
        let row = sqlx::query(
            r#"
            INSERT INTO users (username, hashed_password, full_name, email)
            VALUES ($1, $2, $3, $4)
            RETURNING username, hashed_password, full_name, email, password_changed_at, created_at
            "#,
        )
        .bind(&params.username)
        .bind(&params.hashed_password)
        .bind(&params.full_name)
        .bind(&params.email)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error)?;

        user_from_row(&row)
    }

    async fn get_user(&self, username: &str) -> Result<User, Error> {
        let row = sqlx::query(
            r#"
            SELECT username, hashed_password, full_name, email, password_changed_at, created_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?
        .ok_or(Error::NotFound)?;

        user_from_row(&row)
    }
}

#[async_trait]
impl SessionAdapter for PostgresAdapter {
    async fn create_session(&self, params: CreateSessionParams) -> Result<Session, Error> {
        let row = sqlx::query(
            r#"
            INSERT INTO sessions (id, username, refresh_token, user_agent, client_ip, is_blocked, expires_at)
            VALUES ($1, $2, $3, $4, $5, FALSE, $6)
            RETURNING id, username, refresh_token, user_agent, client_ip, is_blocked, expires_at, created_at
            "#,
        )
        .bind(params.id)
        .bind(&params.username)
        .bind(&params.refresh_token)
        .bind(&params.user_agent)
        .bind(&params.client_ip)
        .bind(params.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error)?;

        session_from_row(&row)
    }

    async fn get_session(&self, id: Uuid) -> Result<Session, Error> {
        let row = sqlx::query(
            r#"
            SELECT id, username, refresh_token, user_agent, client_ip, is_blocked, expires_at, created_at
            FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?
        .ok_or(Error::NotFound)?;

        session_from_row(&row)
    }

    async fn block_session(&self, id: Uuid) -> Result<(), Error> {
        let result = sqlx::query("UPDATE sessions SET is_blocked = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }
}
