//! Transaction entity.
//!
//! §3 invariants this type exists to uphold:
//! 1. Every completed monetary operation writes ≥1 row; transfers/sweeps
//!    write exactly two, linked symmetrically by `linked_transaction_id`.
//! 2. `amount > 0`; sign is implied by `transaction_type`.
//! 3. `balance_after` equals the account's post-update balance.
//! 5. `reference_number` is unique across all transactions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Cents, Id};

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    TransferOut,
    TransferIn,
    PayrollBatch,
    Fee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Reversed,
    Declined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum TransactionChannel {
    Online,
    Atm,
    Branch,
    Pos,
    Ach,
    Wire,
    Internal,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Id,
    pub reference_number: String,
    pub account_id: Id,
    pub counterparty_account_id: Option<Id>,
    pub beneficiary_id: Option<Id>,
    #[sqlx(rename = "type")]
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub channel: TransactionChannel,
    pub amount: Cents,
    pub balance_after: Cents,
    pub linked_transaction_id: Option<Id>,
    pub timestamp: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
    pub value_date: DateTime<Utc>,
}
