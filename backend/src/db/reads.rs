//! Read-only queries (§4.7).

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::model::{Account, Atm, Cents, Customer, Id, Transaction};

use super::pool::Database;
use super::OpError;
use super::OpResult;

impl Database {
    pub async fn random_customer(&self, timeout: Duration, cancel: &CancellationToken) -> OpResult<Customer> {
        let work = async {
            sqlx::query_as::<_, Customer>(
                "SELECT id, first_name, last_name, timezone, home_branch_id, segment, status, \
                 activity_score, username, password_hash, created_at, updated_at \
                 FROM customers WHERE status = 'active' ORDER BY random() LIMIT 1",
            )
            .fetch_one(&self.pool)
            .await
            .map_err(|e| OpError::Infra(EngineError::from(e)))
        };
        self.timed(timeout, cancel, work).await
    }

    pub async fn customer_by_id(&self, id: Id, timeout: Duration, cancel: &CancellationToken) -> OpResult<Customer> {
        let work = async {
            sqlx::query_as::<_, Customer>(
                "SELECT id, first_name, last_name, timezone, home_branch_id, segment, status, \
                 activity_score, username, password_hash, created_at, updated_at \
                 FROM customers WHERE id = $1",
            )
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| OpError::Infra(EngineError::from(e)))
        };
        self.timed(timeout, cancel, work).await
    }

    /// Returns `None` on a credential mismatch rather than a business error:
    /// the simulated `failed_login_rate` draw happens upstream in the
    /// session workflow before this call is ever made.
    pub async fn authenticate(
        &self,
        username: &str,
        password_hash: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> OpResult<Option<Customer>> {
        let work = async {
            sqlx::query_as::<_, Customer>(
                "SELECT id, first_name, last_name, timezone, home_branch_id, segment, status, \
                 activity_score, username, password_hash, created_at, updated_at \
                 FROM customers WHERE username = $1 AND password_hash = $2 AND status = 'active'",
            )
            .bind(username)
            .bind(password_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| OpError::Infra(EngineError::from(e)))
        };
        self.timed(timeout, cancel, work).await
    }

    pub async fn all_customer_timezones(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> OpResult<Vec<(Id, String)>> {
        let work = async {
            let rows: Vec<(Id, String)> =
                sqlx::query_as("SELECT id, timezone FROM customers WHERE status = 'active'")
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| OpError::Infra(EngineError::from(e)))?;
            Ok(rows)
        };
        self.timed(timeout, cancel, work).await
    }

    pub async fn random_atm(
        &self,
        country: Option<&str>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> OpResult<Atm> {
        let work = async {
            let result = if let Some(country) = country {
                sqlx::query_as::<_, Atm>(
                    "SELECT id, branch_id, country, timezone, is_operational, supports_deposit \
                     FROM atms WHERE is_operational AND country = $1 ORDER BY random() LIMIT 1",
                )
                .bind(country)
                .fetch_one(&self.pool)
                .await
            } else {
                sqlx::query_as::<_, Atm>(
                    "SELECT id, branch_id, country, timezone, is_operational, supports_deposit \
                     FROM atms WHERE is_operational ORDER BY random() LIMIT 1",
                )
                .fetch_one(&self.pool)
                .await
            };
            result.map_err(|e| OpError::Infra(EngineError::from(e)))
        };
        self.timed(timeout, cancel, work).await
    }

    pub async fn customer_accounts(
        &self,
        customer_id: Id,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> OpResult<Vec<Account>> {
        let work = async {
            sqlx::query_as::<_, Account>(
                "SELECT id, customer_id, type, status, currency, balance, daily_limit, branch_id, \
                 overdraft_limit, credit_limit, created_at, updated_at \
                 FROM accounts WHERE customer_id = $1",
            )
            .bind(customer_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| OpError::Infra(EngineError::from(e)))
        };
        self.timed(timeout, cancel, work).await
    }

    pub async fn random_business_account(&self, timeout: Duration, cancel: &CancellationToken) -> OpResult<Account> {
        let work = async {
            sqlx::query_as::<_, Account>(
                "SELECT id, customer_id, type, status, currency, balance, daily_limit, branch_id, \
                 overdraft_limit, credit_limit, created_at, updated_at \
                 FROM accounts WHERE type = 'business' AND status = 'active' ORDER BY random() LIMIT 1",
            )
            .fetch_one(&self.pool)
            .await
            .map_err(|e| OpError::Infra(EngineError::from(e)))
        };
        self.timed(timeout, cancel, work).await
    }

    /// Payroll source accounts to draw destination employee accounts from.
    pub async fn employee_account_ids(
        &self,
        limit: i64,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> OpResult<Vec<Id>> {
        let work = async {
            let rows: Vec<(Id,)> = sqlx::query_as(
                "SELECT id FROM accounts WHERE type = 'payroll' AND status = 'active' \
                 ORDER BY random() LIMIT $1",
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| OpError::Infra(EngineError::from(e)))?;
            Ok(rows.into_iter().map(|(id,)| id).collect())
        };
        self.timed(timeout, cancel, work).await
    }

    pub async fn balance(&self, account_id: Id, timeout: Duration, cancel: &CancellationToken) -> OpResult<Cents> {
        let work = async {
            let row: (Cents,) = sqlx::query_as("SELECT balance FROM accounts WHERE id = $1")
                .bind(account_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| OpError::Infra(EngineError::from(e)))?;
            Ok(row.0)
        };
        self.timed(timeout, cancel, work).await
    }

    pub async fn transaction_history(
        &self,
        account_id: Id,
        limit: i64,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> OpResult<Vec<Transaction>> {
        let work = async {
            sqlx::query_as::<_, Transaction>(
                "SELECT id, reference_number, account_id, counterparty_account_id, beneficiary_id, \
                 type, status, channel, amount, balance_after, linked_transaction_id, timestamp, \
                 posted_at, value_date \
                 FROM transactions WHERE account_id = $1 ORDER BY timestamp DESC LIMIT $2",
            )
            .bind(account_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| OpError::Infra(EngineError::from(e)))
        };
        self.timed(timeout, cancel, work).await
    }
}
