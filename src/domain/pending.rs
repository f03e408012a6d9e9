use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingStatus {
    Pending,
    Completed,
    Failed,
}

impl PendingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingStatus::Pending => "pending",
            PendingStatus::Completed => "completed",
            PendingStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PendingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PendingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PendingStatus::Pending),
            "completed" => Ok(PendingStatus::Completed),
            "failed" => Ok(PendingStatus::Failed),
            other => Err(format!("unknown pending status: {other}")),
        }
    }
}

/// Bridges a supplier-issued request id to the order waiting on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAsyncOrder {
    pub request_id: String,
    pub order_id: String,
    pub provider_id: String,
    pub status: PendingStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl PendingAsyncOrder {
    pub fn new(
        request_id: impl Into<String>,
        order_id: impl Into<String>,
        provider_id: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            order_id: order_id.into(),
            provider_id: provider_id.into(),
            status: PendingStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }
}
