//! ATM entity.

use serde::{Deserialize, Serialize};

use super::Id;

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Atm {
    pub id: Id,
    pub branch_id: Id,
    pub country: String,
    pub timezone: String,
    pub is_operational: bool,
    pub supports_deposit: bool,
}
