//! Account entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Cents, Id};

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum AccountType {
    Checking,
    Savings,
    CreditCard,
    Loan,
    Mortgage,
    Investment,
    Business,
    Merchant,
    Payroll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Inactive,
    Suspended,
    Closed,
}

/// A customer-owned account. Balance may be negative for liability products
/// (credit card, loan, mortgage).
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Account {
    pub id: Id,
    pub customer_id: Id,
    #[sqlx(rename = "type")]
    pub account_type: AccountType,
    pub status: AccountStatus,
    pub currency: String,
    pub balance: Cents,
    pub daily_limit: Cents,
    pub branch_id: Id,
    pub overdraft_limit: Cents,
    pub credit_limit: Cents,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// §3 invariant 4: a withdrawal/debit must never push a checking
    /// account below `-overdraft_limit`, nor a credit-card account beyond
    /// its `credit_limit`.
    pub fn can_debit(&self, amount: Cents) -> bool {
        match self.account_type {
            AccountType::CreditCard => self.balance - amount >= -self.credit_limit,
            AccountType::Checking => self.balance - amount >= -self.overdraft_limit,
            _ => self.balance - amount >= 0,
        }
    }

    pub fn supports_atm(&self) -> bool {
        matches!(
            self.account_type,
            AccountType::Checking | AccountType::Savings
        )
    }
}
