use crate::{
    Account, CreateAccountParams, CreateSessionParams, CreateUserParams, Entry, Error,
    LedgerAdapter, Page, Session, SessionAdapter, Transfer, TransferTxParams, TransferTxResult,
    User, UserAdapter,
    transfer::{apply_delta, before_deadline, ensure_same_currency},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

/// One account row. The balance is the only mutable column and sits behind
/// its own lock, the in-memory stand-in for a row lock.
struct AccountRow {
    id: i64,
    owner: String,
    currency: String,
    created_at: DateTime<Utc>,
    balance: tokio::sync::Mutex<i64>,
}

impl AccountRow {
    fn snapshot(&self, balance: i64) -> Account {
        Account {
            id: self.id,
            owner: self.owner.clone(),
            balance,
            currency: self.currency.clone(),
            created_at: self.created_at,
        }
    }
}

#[derive(Clone)]
struct MemoryStore {
    accounts: Arc<RwLock<BTreeMap<i64, Arc<AccountRow>>>>,
    entries: Arc<Mutex<Vec<Entry>>>,
    transfers: Arc<Mutex<Vec<Transfer>>>,
    sessions: Arc<Mutex<HashMap<Uuid, Session>>>,
    users: Arc<Mutex<HashMap<String, User>>>,
    account_seq: Arc<AtomicI64>,
    entry_seq: Arc<AtomicI64>,
    transfer_seq: Arc<AtomicI64>,
}

impl MemoryStore {
    fn new() -> Self {
        Self {
            accounts: Arc::new(RwLock::new(BTreeMap::new())),
            entries: Arc::new(Mutex::new(Vec::new())),
            transfers: Arc::new(Mutex::new(Vec::new())),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            users: Arc::new(Mutex::new(HashMap::new())),
            account_seq: Arc::new(AtomicI64::new(0)),
            entry_seq: Arc::new(AtomicI64::new(0)),
            transfer_seq: Arc::new(AtomicI64::new(0)),
        }
    }
}

fn next_id(seq: &AtomicI64) -> i64 {
    seq.fetch_add(1, Ordering::SeqCst) + 1
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, Error> {
    mutex
        .lock()
        .map_err(|_| Error::Internal("memory store lock poisoned".to_string()))
}

/// In-process adapter with the same transactional guarantees as the
/// Postgres one. Used by tests and embedded setups.
#[derive(Clone)]
pub struct MemoryAdapter {
    store: MemoryStore,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self {
            store: MemoryStore::new(),
        }
    }

    fn account_row(&self, id: i64) -> Result<Arc<AccountRow>, Error> {
        let accounts = self
            .store
            .accounts
            .read()
            .map_err(|_| Error::Internal("memory store lock poisoned".to_string()))?;
        accounts.get(&id).cloned().ok_or(Error::NotFound)
    }

    fn account_exists(&self, id: i64) -> Result<bool, Error> {
        let accounts = self
            .store
            .accounts
            .read()
            .map_err(|_| Error::Internal("memory store lock poisoned".to_string()))?;
        Ok(accounts.contains_key(&id))
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerAdapter for MemoryAdapter {
    async fn transfer_tx(
        &self,
        params: &TransferTxParams,
        deadline: Option<Instant>,
    ) -> Result<TransferTxResult, Error> {
        params.validate()?;

        let from = self.account_row(params.from_account_id)?;
        let to = self.account_row(params.to_account_id)?;
        ensure_same_currency(&from.snapshot(0), &to.snapshot(0))?;

        // Step 1: Lock both balance rows, lowest id first. The only waiting
        // happens here, so this is all the deadline bounds.
        let deltas = params.balance_deltas();
        let locked = before_deadline(deadline, async {
            let mut locked = Vec::with_capacity(deltas.len());
            for delta in deltas {
                let row = if delta.account_id == from.id { &from } else { &to };
                let guard = row.balance.lock().await;
                locked.push((row, delta, guard));
            }
            Ok(locked)
        })
        .await?;

        // A concurrent delete removes the row while holding its lock
        for (row, _, _) in &locked {
            if !self.account_exists(row.id)? {
                return Err(Error::NotFound);
            }
        }

        // Step 2: Compute everything that can fail before the first write
        let mut balances = Vec::with_capacity(locked.len());
        for (_, delta, guard) in &locked {
            balances.push(apply_delta(**guard, delta.amount)?);
        }

        let mut transfers = lock(&self.store.transfers)?;
        let mut entries = lock(&self.store.entries)?;

        // Step 3: Write. No await from here to the end of the unit of work.
        let now = Utc::now();
        let transfer = Transfer {
            id: next_id(&self.store.transfer_seq),
            from_account_id: params.from_account_id,
            to_account_id: params.to_account_id,
            amount: params.amount,
            created_at: now,
        };
        let from_entry = Entry {
            id: next_id(&self.store.entry_seq),
            account_id: params.from_account_id,
            amount: -params.amount,
            created_at: now,
        };
        let to_entry = Entry {
            id: next_id(&self.store.entry_seq),
            account_id: params.to_account_id,
            amount: params.amount,
            created_at: now,
        };
        transfers.push(transfer.clone());
        entries.push(from_entry.clone());
        entries.push(to_entry.clone());

        let mut updated = Vec::with_capacity(locked.len());
        for ((row, _, mut guard), balance) in locked.into_iter().zip(balances) {
            *guard = balance;
            updated.push(row.snapshot(balance));
        }

        TransferTxResult::assemble(params, transfer, from_entry, to_entry, updated)
    }

    async fn create_account(&self, params: CreateAccountParams) -> Result<Account, Error> {
        let mut accounts = self
            .store
            .accounts
            .write()
            .map_err(|_| Error::Internal("memory store lock poisoned".to_string()))?;

        if accounts
            .values()
            .any(|row| row.owner == params.owner && row.currency == params.currency)
        {
            return Err(Error::Conflict(format!(
                "{} already holds a {} account",
                params.owner, params.currency
            )));
        }

        let row = Arc::new(AccountRow {
            id: next_id(&self.store.account_seq),
            owner: params.owner,
            currency: params.currency,
            created_at: Utc::now(),
            balance: tokio::sync::Mutex::new(params.balance),
        });
        let account = row.snapshot(params.balance);
        accounts.insert(row.id, row);
        Ok(account)
    }

    async fn get_account(&self, id: i64) -> Result<Account, Error> {
        let row = self.account_row(id)?;
        let balance = *row.balance.lock().await;
        Ok(row.snapshot(balance))
    }

    async fn list_accounts(&self, owner: &str, page: Page) -> Result<Vec<Account>, Error> {
        let rows: Vec<Arc<AccountRow>> = {
            let accounts = self
                .store
                .accounts
                .read()
                .map_err(|_| Error::Internal("memory store lock poisoned".to_string()))?;
            accounts
                .values()
                .filter(|row| row.owner == owner)
                .skip(page.offset as usize)
                .take(page.limit as usize)
                .cloned()
                .collect()
        };

        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            let balance = *row.balance.lock().await;
            result.push(row.snapshot(balance));
        }
        Ok(result)
    }

    async fn delete_account(&self, id: i64) -> Result<(), Error> {
        let row = self.account_row(id)?;
        let _guard = row.balance.lock().await;

        let has_history = lock(&self.store.entries)?
            .iter()
            .any(|entry| entry.account_id == id);
        if has_history {
            return Err(Error::Conflict(format!(
                "account {} has ledger history",
                id
            )));
        }

        let mut accounts = self
            .store
            .accounts
            .write()
            .map_err(|_| Error::Internal("memory store lock poisoned".to_string()))?;
        accounts.remove(&id).map(|_| ()).ok_or(Error::NotFound)
    }

    async fn get_transfer(&self, id: i64) -> Result<Transfer, Error> {
        let transfers = lock(&self.store.transfers)?;
        transfers
            .iter()
            .find(|transfer| transfer.id == id)
            .cloned()
            .ok_or(Error::NotFound)
    }

    async fn list_transfers(&self, account_id: i64, page: Page) -> Result<Vec<Transfer>, Error> {
        let transfers = lock(&self.store.transfers)?;
        Ok(transfers
            .iter()
            .filter(|t| t.from_account_id == account_id || t.to_account_id == account_id)
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .cloned()
            .collect())
    }

    async fn get_entry(&self, id: i64) -> Result<Entry, Error> {
        let entries = lock(&self.store.entries)?;
        entries
            .iter()
            .find(|entry| entry.id == id)
            .cloned()
            .ok_or(Error::NotFound)
    }

    async fn list_entries(&self, account_id: i64, page: Page) -> Result<Vec<Entry>, Error> {
        let entries = lock(&self.store.entries)?;
        Ok(entries
            .iter()
            .filter(|entry| entry.account_id == account_id)
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl UserAdapter for MemoryAdapter {
    async fn create_user(&self, params: CreateUserParams) -> Result<User, Error> {
        let mut users = lock(&self.store.users)?;

        if users.contains_key(&params.username) {
            return Err(Error::Conflict(format!(
                "username {} already exists",
                params.username
            )));
        }
        if users.values().any(|user| user.email == params.email) {
            return Err(Error::Conflict(format!("email {} already in use", params.email)));
        }

        let user = params.into_user(Utc::now());
        users.insert(user.username.clone(), user.clone());
        Ok(user)
    }

    async fn get_user(&self, username: &str) -> Result<User, Error> {
        let users = lock(&self.store.users)?;
        users.get(username).cloned().ok_or(Error::NotFound)
    }
}

#[async_trait]
impl SessionAdapter for MemoryAdapter {
    async fn create_session(&self, params: CreateSessionParams) -> Result<Session, Error> {
        let mut sessions = lock(&self.store.sessions)?;

        if sessions.contains_key(&params.id) {
            return Err(Error::Conflict(format!("session {} already exists", params.id)));
        }
        if sessions
            .values()
            .any(|session| session.refresh_token == params.refresh_token)
        {
            return Err(Error::Conflict("refresh token already in use".to_string()));
        }

        let session = params.into_session(Utc::now());
        sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: Uuid) -> Result<Session, Error> {
        let sessions = lock(&self.store.sessions)?;
        sessions.get(&id).cloned().ok_or(Error::NotFound)
    }

    async fn block_session(&self, id: Uuid) -> Result<(), Error> {
        let mut sessions = lock(&self.store.sessions)?;
        let session = sessions.get_mut(&id).ok_or(Error::NotFound)?;
        session.is_blocked = true;
        Ok(())
    }
}
