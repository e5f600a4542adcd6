//! Customer entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Id;

/// Segment drives both the activity-calculator weighting (§4.3) and the
/// transfer-amount range a session workflow draws from (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum CustomerSegment {
    Regular,
    Premium,
    Private,
    Business,
    Corporate,
}

impl CustomerSegment {
    /// Segment modifier in the activity-probability formula (§4.3).
    pub fn activity_modifier(self) -> f64 {
        match self {
            CustomerSegment::Corporate => 1.5,
            CustomerSegment::Business => 1.3,
            CustomerSegment::Private => 1.2,
            CustomerSegment::Premium => 1.1,
            CustomerSegment::Regular => 1.0,
        }
    }

    /// Transfer amount range in cents, by segment (§4.9).
    pub fn transfer_amount_range(self) -> (i64, i64) {
        match self {
            CustomerSegment::Private => (100_000, 5_000_000),
            CustomerSegment::Premium => (10_000, 500_000),
            CustomerSegment::Corporate => (500_000, 10_000_000),
            CustomerSegment::Business => (50_000, 2_000_000),
            CustomerSegment::Regular => (500, 50_000),
        }
    }

    /// Business/corporate customers always run the business session type.
    pub fn forces_business_channel(self) -> bool {
        matches!(self, CustomerSegment::Business | CustomerSegment::Corporate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum CustomerStatus {
    Active,
    Inactive,
    Suspended,
    Closed,
}

/// A customer (virtual end user) the engine drives sessions for.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Customer {
    pub id: Id,
    pub first_name: String,
    pub last_name: String,
    pub timezone: String,
    pub home_branch_id: Id,
    pub segment: CustomerSegment,
    pub status: CustomerStatus,
    pub activity_score: f64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn is_active(&self) -> bool {
        self.status == CustomerStatus::Active
    }
}
