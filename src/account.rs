use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub owner: String,
    /// Minor units of `currency`.
    pub balance: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountParams {
    pub owner: String,
    /// Opening balance. Not backed by an entry.
    pub balance: i64,
    pub currency: String,
}

impl CreateAccountParams {
    pub fn new(owner: impl Into<String>, balance: i64, currency: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            balance,
            currency: currency.into(),
        }
    }
}

/// Page of rows for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    pub fn new(limit: i64, offset: i64) -> Self {
        Self { limit, offset }
    }

    pub(crate) fn validate(&self) -> Result<(), crate::Error> {
        if self.limit <= 0 || self.offset < 0 {
            return Err(crate::Error::InvalidArgument(format!(
                "invalid page: limit={} offset={}",
                self.limit, self.offset
            )));
        }
        Ok(())
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(100, 0)
    }
}
