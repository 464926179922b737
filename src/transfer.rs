//! Transfer rows and the ordering rules shared by every adapter's
//! `transfer_tx`.
//!
//! A transfer is one unit of work: insert the transfer, insert its two
//! entries, then apply both balance deltas. Balance rows are always
//! updated in ascending account id order, whichever side is paying. Two
//! transfers touching the same pair of accounts therefore queue on the
//! same first row instead of each holding the row the other needs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::{Account, Entry, Error};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: i64,
    pub from_account_id: i64,
    pub to_account_id: i64,
    /// Always positive.
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferTxParams {
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: i64,
    /// Correlation label, recorded on the transfer span only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl TransferTxParams {
    pub fn new(from_account_id: i64, to_account_id: i64, amount: i64) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Checks that hold before any row is touched.
    pub fn validate(&self) -> Result<(), Error> {
        if self.amount <= 0 {
            return Err(Error::InvalidArgument(format!(
                "transfer amount must be positive, got {}",
                self.amount
            )));
        }
        if self.from_account_id == self.to_account_id {
            return Err(Error::InvalidArgument(format!(
                "cannot transfer from account {} to itself",
                self.from_account_id
            )));
        }
        Ok(())
    }

    /// Signed deltas for both sides, in the order they must be applied.
    pub fn balance_deltas(&self) -> Vec<BalanceDelta> {
        lock_order(vec![
            BalanceDelta::new(self.from_account_id, -self.amount),
            BalanceDelta::new(self.to_account_id, self.amount),
        ])
    }
}

/// Everything a caller needs to render a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTxResult {
    pub transfer: Transfer,
    pub from_entry: Entry,
    pub to_entry: Entry,
    pub from_account: Account,
    pub to_account: Account,
}

impl TransferTxResult {
    /// Builds the result from accounts returned in lock order.
    pub(crate) fn assemble(
        params: &TransferTxParams,
        transfer: Transfer,
        from_entry: Entry,
        to_entry: Entry,
        updated: Vec<Account>,
    ) -> Result<Self, Error> {
        let mut from_account = None;
        let mut to_account = None;
        for account in updated {
            if account.id == params.from_account_id {
                from_account = Some(account);
            } else if account.id == params.to_account_id {
                to_account = Some(account);
            }
        }

        match (from_account, to_account) {
            (Some(from_account), Some(to_account)) => Ok(Self {
                transfer,
                from_entry,
                to_entry,
                from_account,
                to_account,
            }),
            _ => Err(Error::Internal(
                "balance update did not return both accounts".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceDelta {
    pub account_id: i64,
    pub amount: i64,
}

impl BalanceDelta {
    pub fn new(account_id: i64, amount: i64) -> Self {
        Self { account_id, amount }
    }
}

/// Sorts participants by account id, the single global order in which
/// balance rows are locked. Holds for any number of participants.
pub fn lock_order(mut deltas: Vec<BalanceDelta>) -> Vec<BalanceDelta> {
    deltas.sort_by_key(|delta| delta.account_id);
    deltas
}

/// Both legs of a transfer must be in one currency.
pub(crate) fn ensure_same_currency(from: &Account, to: &Account) -> Result<(), Error> {
    if from.currency != to.currency {
        return Err(Error::InvalidArgument(format!(
            "currency mismatch: account {} is {}, account {} is {}",
            from.id, from.currency, to.id, to.currency
        )));
    }
    Ok(())
}

/// Runs the part of a unit of work that precedes COMMIT, giving up with
/// `Cancelled` once `deadline` passes. COMMIT itself is never raced against
/// the deadline: once issued it may already be durable.
pub(crate) async fn before_deadline<T, F>(deadline: Option<Instant>, work: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, work)
            .await
            .map_err(|_| Error::Cancelled)?,
        None => work.await,
    }
}

/// Applies a delta, refusing to wrap.
pub(crate) fn apply_delta(balance: i64, delta: i64) -> Result<i64, Error> {
    balance
        .checked_add(delta)
        .ok_or_else(|| Error::Internal("balance overflow".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lower_id_is_updated_first() {
        let forward = TransferTxParams::new(1, 2, 10).balance_deltas();
        assert_eq!(
            forward,
            vec![BalanceDelta::new(1, -10), BalanceDelta::new(2, 10)]
        );

        let backward = TransferTxParams::new(2, 1, 10).balance_deltas();
        assert_eq!(
            backward,
            vec![BalanceDelta::new(1, 10), BalanceDelta::new(2, -10)]
        );
    }

    #[test]
    fn test_lock_order_sorts_any_number_of_participants() {
        let ordered = lock_order(vec![
            BalanceDelta::new(9, 1),
            BalanceDelta::new(3, 1),
            BalanceDelta::new(7, -2),
        ]);
        let ids: Vec<i64> = ordered.iter().map(|d| d.account_id).collect();
        assert_eq!(ids, vec![3, 7, 9]);
    }

    #[test]
    fn test_validate_rejects_non_positive_amounts() {
        assert!(matches!(
            TransferTxParams::new(1, 2, 0).validate(),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            TransferTxParams::new(1, 2, -5).validate(),
            Err(Error::InvalidArgument(_))
        ));
        assert!(TransferTxParams::new(1, 2, 1).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_self_transfer() {
        assert!(matches!(
            TransferTxParams::new(4, 4, 100).validate(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_apply_delta_overflow() {
        assert_eq!(apply_delta(10, -3), Ok(7));
        assert!(matches!(apply_delta(i64::MAX, 1), Err(Error::Internal(_))));
    }

    #[tokio::test]
    async fn test_before_deadline() {
        let on_time = before_deadline(Some(Instant::now() + std::time::Duration::from_secs(5)), async {
            Ok(7)
        })
        .await;
        assert_eq!(on_time, Ok(7));

        let late: Result<(), Error> = before_deadline(
            Some(Instant::now() + std::time::Duration::from_millis(10)),
            std::future::pending(),
        )
        .await;
        assert_eq!(late, Err(Error::Cancelled));

        assert_eq!(before_deadline(None, async { Ok(1) }).await, Ok(1));
    }

    #[test]
    fn test_currency_must_match() {
        let usd = Account {
            id: 1,
            owner: "alice".to_string(),
            balance: 0,
            currency: "USD".to_string(),
            created_at: Utc::now(),
        };
        let eur = Account {
            id: 2,
            currency: "EUR".to_string(),
            ..usd.clone()
        };
        assert!(ensure_same_currency(&usd, &usd).is_ok());
        assert!(matches!(
            ensure_same_currency(&usd, &eur),
            Err(Error::InvalidArgument(_))
        ));
    }
}
