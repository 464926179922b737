use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One signed leg of a transfer. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: i64,
    pub account_id: i64,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}
