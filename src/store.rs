use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::{
    Account, CreateAccountParams, Entry, Error, LedgerAdapter, Page, Payload, Transfer,
    TransferTxParams, TransferTxResult,
};

/// Entry point for ledger operations over any [`LedgerAdapter`].
#[derive(Clone)]
pub struct LedgerStore {
    adapter: Arc<dyn LedgerAdapter>,
}

impl LedgerStore {
    pub fn new(adapter: Box<dyn LedgerAdapter>) -> Self {
        Self {
            adapter: adapter.into(),
        }
    }

    pub fn from_arc(adapter: Arc<dyn LedgerAdapter>) -> Self {
        Self { adapter }
    }

    /// Get adapter reference
    pub fn adapter(&self) -> &dyn LedgerAdapter {
        self.adapter.as_ref()
    }

    /// Moves `amount` from one account to another in a single unit of work.
    ///
    /// Rejects non-positive amounts, self-transfers and currency mismatches;
    /// `NotFound` if either account is missing. On any error nothing is
    /// written. Never retries.
    pub async fn transfer_tx(&self, params: TransferTxParams) -> Result<TransferTxResult, Error> {
        self.execute_transfer(params, None).await
    }

    /// [`transfer_tx`](Self::transfer_tx) that gives up with `Cancelled`
    /// if `timeout` elapses before the unit of work reaches COMMIT. A
    /// transfer whose COMMIT has been issued always reports its real
    /// outcome, however long the acknowledgement takes.
    pub async fn transfer_tx_within(
        &self,
        params: TransferTxParams,
        timeout: Duration,
    ) -> Result<TransferTxResult, Error> {
        self.execute_transfer(params, Some(Instant::now() + timeout))
            .await
    }

    #[tracing::instrument(
        name = "transfer_tx",
        skip_all,
        fields(
            from = params.from_account_id,
            to = params.to_account_id,
            amount = params.amount,
            label = params.label.as_deref().unwrap_or(""),
        )
    )]
    async fn execute_transfer(
        &self,
        params: TransferTxParams,
        deadline: Option<Instant>,
    ) -> Result<TransferTxResult, Error> {
        params.validate()?;

        let result = self.adapter.transfer_tx(&params, deadline).await;

        let status = match &result {
            Ok(_) => "success",
            Err(Error::Cancelled) => "cancelled",
            Err(_) => "failed",
        };
        counter!("bank.transfers.total", "status" => status).increment(1);

        match &result {
            Ok(receipt) => {
                histogram!("bank.transfer.amount", "currency" => receipt.from_account.currency.clone())
                    .record(params.amount as f64);
                tracing::debug!(transfer_id = receipt.transfer.id, "transfer committed");
            }
            Err(Error::Cancelled) => tracing::warn!("transfer abandoned at deadline"),
            Err(err) => tracing::warn!(error = %err, "transfer rolled back"),
        }

        result
    }

    /// Transfer on behalf of an authenticated caller. Both accounts must
    /// exist and hold `currency`; only then is the source account checked
    /// to belong to `payload.username`.
    pub async fn transfer_as(
        &self,
        payload: &Payload,
        params: TransferTxParams,
        currency: &str,
    ) -> Result<TransferTxResult, Error> {
        params.validate()?;

        let from = self.valid_account(params.from_account_id, currency).await?;
        self.valid_account(params.to_account_id, currency).await?;

        if from.owner != payload.username {
            return Err(Error::Permission(format!(
                "account {} does not belong to {}",
                from.id, payload.username
            )));
        }

        self.transfer_tx(params).await
    }

    async fn valid_account(&self, id: i64, currency: &str) -> Result<Account, Error> {
        let account = self.adapter.get_account(id).await?;
        if account.currency != currency {
            return Err(Error::InvalidArgument(format!(
                "account {} currency mismatch: {} vs {}",
                account.id, account.currency, currency
            )));
        }
        Ok(account)
    }

    pub async fn create_account(&self, params: CreateAccountParams) -> Result<Account, Error> {
        let account = self.adapter.create_account(params).await?;
        tracing::debug!(account_id = account.id, owner = %account.owner, "account created");
        Ok(account)
    }

    pub async fn get_account(&self, id: i64) -> Result<Account, Error> {
        self.adapter.get_account(id).await
    }

    pub async fn list_accounts(&self, owner: &str, page: Page) -> Result<Vec<Account>, Error> {
        page.validate()?;
        self.adapter.list_accounts(owner, page).await
    }

    pub async fn delete_account(&self, id: i64) -> Result<(), Error> {
        self.adapter.delete_account(id).await?;
        tracing::info!(account_id = id, "account deleted");
        Ok(())
    }

    pub async fn get_transfer(&self, id: i64) -> Result<Transfer, Error> {
        self.adapter.get_transfer(id).await
    }

    pub async fn list_transfers(&self, account_id: i64, page: Page) -> Result<Vec<Transfer>, Error> {
        page.validate()?;
        self.adapter.list_transfers(account_id, page).await
    }

    pub async fn get_entry(&self, id: i64) -> Result<Entry, Error> {
        self.adapter.get_entry(id).await
    }

    pub async fn list_entries(&self, account_id: i64, page: Page) -> Result<Vec<Entry>, Error> {
        page.validate()?;
        self.adapter.list_entries(account_id, page).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryAdapter;
    use async_trait::async_trait;

    fn store() -> LedgerStore {
        LedgerStore::new(Box::new(MemoryAdapter::new()))
    }

    /// Commits through the memory adapter, then holds the acknowledgement
    /// back for `ack_delay`, like a COMMIT whose reply is slow to arrive.
    struct SlowAckAdapter {
        inner: MemoryAdapter,
        ack_delay: Duration,
    }

    #[async_trait]
    impl LedgerAdapter for SlowAckAdapter {
        async fn transfer_tx(
            &self,
            params: &TransferTxParams,
            deadline: Option<Instant>,
        ) -> Result<TransferTxResult, Error> {
            let result = self.inner.transfer_tx(params, deadline).await;
            tokio::time::sleep(self.ack_delay).await;
            result
        }

        async fn create_account(&self, params: CreateAccountParams) -> Result<Account, Error> {
            self.inner.create_account(params).await
        }

        async fn get_account(&self, id: i64) -> Result<Account, Error> {
            self.inner.get_account(id).await
        }

        async fn list_accounts(&self, owner: &str, page: Page) -> Result<Vec<Account>, Error> {
            self.inner.list_accounts(owner, page).await
        }

        async fn delete_account(&self, id: i64) -> Result<(), Error> {
            self.inner.delete_account(id).await
        }

        async fn get_transfer(&self, id: i64) -> Result<Transfer, Error> {
            self.inner.get_transfer(id).await
        }

        async fn list_transfers(&self, account_id: i64, page: Page) -> Result<Vec<Transfer>, Error> {
            self.inner.list_transfers(account_id, page).await
        }

        async fn get_entry(&self, id: i64) -> Result<Entry, Error> {
            self.inner.get_entry(id).await
        }

        async fn list_entries(&self, account_id: i64, page: Page) -> Result<Vec<Entry>, Error> {
            self.inner.list_entries(account_id, page).await
        }
    }

    #[tokio::test]
    async fn test_invalid_page() {
        let store = store();
        assert!(matches!(
            store.list_accounts("alice", Page::new(0, 0)).await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            store.list_entries(1, Page::new(5, -1)).await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_transfer_within_deadline() {
        let store = store();
        let a = store
            .create_account(CreateAccountParams::new("alice", 100, "USD"))
            .await
            .unwrap();
        let b = store
            .create_account(CreateAccountParams::new("bob", 0, "USD"))
            .await
            .unwrap();

        let receipt = store
            .transfer_tx_within(TransferTxParams::new(a.id, b.id, 40), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(receipt.from_account.balance, 60);
        assert_eq!(receipt.to_account.balance, 40);
    }

    #[tokio::test]
    async fn test_deadline_during_commit_reports_commit() {
        let store = LedgerStore::new(Box::new(SlowAckAdapter {
            inner: MemoryAdapter::new(),
            ack_delay: Duration::from_millis(100),
        }));
        let a = store
            .create_account(CreateAccountParams::new("alice", 100, "USD"))
            .await
            .unwrap();
        let b = store
            .create_account(CreateAccountParams::new("bob", 0, "USD"))
            .await
            .unwrap();

        // The deadline passes while the acknowledgement is pending.
        let receipt = store
            .transfer_tx_within(
                TransferTxParams::new(a.id, b.id, 40),
                Duration::from_millis(10),
            )
            .await
            .unwrap();
        assert_eq!(receipt.from_account.balance, 60);

        assert_eq!(store.get_account(a.id).await.unwrap().balance, 60);
        assert_eq!(store.get_account(b.id).await.unwrap().balance, 40);
        assert_eq!(
            store.list_transfers(a.id, Page::default()).await.unwrap(),
            vec![receipt.transfer]
        );
    }

    #[tokio::test]
    async fn test_transfer_as_checks_accounts_before_owner() {
        let store = store();
        let bob_eur = store
            .create_account(CreateAccountParams::new("bob", 100, "EUR"))
            .await
            .unwrap();
        let alice_usd = store
            .create_account(CreateAccountParams::new("alice", 100, "USD"))
            .await
            .unwrap();
        let payload = Payload::new("alice", chrono::Duration::minutes(5)).unwrap();

        // Foreign source in the wrong currency: the currency is reported.
        assert!(matches!(
            store
                .transfer_as(
                    &payload,
                    TransferTxParams::new(bob_eur.id, alice_usd.id, 10),
                    "USD"
                )
                .await,
            Err(Error::InvalidArgument(_))
        ));
        // Missing destination is reported before ownership.
        assert_eq!(
            store
                .transfer_as(
                    &payload,
                    TransferTxParams::new(bob_eur.id, 9_999, 10),
                    "EUR"
                )
                .await,
            Err(Error::NotFound)
        );
        assert_eq!(store.get_account(bob_eur.id).await.unwrap().balance, 100);
    }
}
