//! Audit log entity (§3, §4.8). Append-only: never mutated after enqueue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum AuditAction {
    LoginSuccess,
    LoginFailed,
    BalanceInquiry,
    Withdrawal,
    Deposit,
    Transfer,
    Sweep,
    PayrollBatch,
    TransactionHistory,
    SessionEnded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

/// One append-only audit record. Built via the factory API in
/// [`crate::audit::AuditWriter::audit`] and its `with_*` option setters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub customer_id: Option<Id>,
    pub employee_id: Option<Id>,
    pub session_id: String,
    pub action: AuditAction,
    pub outcome: AuditOutcome,
    pub channel: super::TransactionChannel,
    pub branch_id: Option<Id>,
    pub atm_id: Option<Id>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub account_id: Option<Id>,
    pub transaction_id: Option<Id>,
    pub beneficiary_id: Option<Id>,
    pub description: Option<String>,
    pub failure_reason: Option<String>,
    pub risk_score: Option<f64>,
    pub request_id: String,
    pub metadata: Value,
    pub timestamp: DateTime<Utc>,
}
