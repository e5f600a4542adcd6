//! Branch entity.

use serde::{Deserialize, Serialize};

use super::Id;

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Branch {
    pub id: Id,
    pub name: String,
    pub country: String,
    pub timezone: String,
    pub is_operational: bool,
}
