//! Beneficiary entity — an external payee owned by a customer.

use serde::{Deserialize, Serialize};

use super::Id;

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Beneficiary {
    pub id: Id,
    pub customer_id: Id,
    pub name: String,
    pub external_account_id: String,
}
