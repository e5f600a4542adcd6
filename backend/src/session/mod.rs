//! Session workflows (C9).
//!
//! A [`Session`] is a transient, per-iteration object: a worker creates one,
//! drives it through exactly one channel workflow (ATM / Online / Business),
//! then drops it. All shared collaborators (database, audit writer, error
//! simulator) are reached through [`SessionServices`], which workers clone
//! cheaply (every field is an `Arc`).

mod atm_workflow;
mod business_workflow;
mod online_workflow;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::activity::{ActivityCalculator, SessionType};
use crate::audit::AuditWriter;
use crate::db::{Database, OpError, OpResult};
use crate::error::EngineError;
use crate::error_sim::{BusinessError, ErrorKind, ErrorSimulator};
use crate::model::{Account, Atm, AuditAction, AuditOutcome, Customer, Id, TransactionChannel};
use crate::rng::RngManager;
use crate::timezone::TimezoneManager;

pub use atm_workflow::run_atm_workflow;
pub use business_workflow::run_business_workflow;
pub use online_workflow::run_online_workflow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initialized,
    Authenticating,
    Authenticated,
    Browsing,
    Transacting,
    Ended,
    Failed,
}

/// Pacing and mix knobs a session needs beyond the shared services (§6).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub min_think_time: Duration,
    pub max_think_time: Duration,
    /// Probability of a read action in the online workflow is
    /// `read_write_ratio / (read_write_ratio + 1)` (§4.9).
    pub read_write_ratio: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_think_time: Duration::from_millis(500),
            max_think_time: Duration::from_secs(3),
            read_write_ratio: 2.0,
        }
    }
}

/// Shared collaborators every workflow needs, cloned cheaply per worker.
#[derive(Clone)]
pub struct SessionServices {
    pub db: Arc<Database>,
    pub audit: Arc<AuditWriter>,
    pub error_sim: Arc<ErrorSimulator>,
    pub tz_mgr: Arc<TimezoneManager>,
    pub activity: Arc<ActivityCalculator>,
    pub config: Arc<SessionConfig>,
}

/// One virtual customer's short interaction: authenticate, run a handful of
/// operations, end (§4.9).
pub struct Session {
    pub id: String,
    pub customer: Customer,
    pub accounts: Vec<Account>,
    pub session_type: SessionType,
    pub state: SessionState,
    pub start_time: std::time::Instant,
    pub atm: Option<Atm>,
    pub rng: RngManager,
}

impl Session {
    pub fn new(
        customer: Customer,
        accounts: Vec<Account>,
        session_type: SessionType,
        atm: Option<Atm>,
        rng: RngManager,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            customer,
            accounts,
            session_type,
            state: SessionState::Initialized,
            start_time: std::time::Instant::now(),
            atm,
            rng,
        }
    }

    /// The account a workflow treats as primary: the first one returned by
    /// the account listing query. The schema has no designated-primary flag.
    pub fn primary_account(&self) -> Option<&Account> {
        self.accounts.first()
    }

    pub fn channel(&self) -> TransactionChannel {
        match self.session_type {
            SessionType::Atm => TransactionChannel::Atm,
            SessionType::Online => TransactionChannel::Online,
            // Business customers transact through the same online banking
            // front door as retail customers; only the workflow differs.
            SessionType::Business => TransactionChannel::Online,
        }
    }

    /// Sleep a uniform duration in `[min_think_time, max_think_time]`,
    /// honoring cancellation (§4.9 "think time").
    pub async fn think(&mut self, services: &SessionServices, cancel: &CancellationToken) {
        let dur = self
            .rng
            .duration_in(services.config.min_think_time, services.config.max_think_time);
        tokio::select! {
            _ = tokio::time::sleep(dur) => {}
            _ = cancel.cancelled() => {}
        }
    }
}

/// With `failed_login_rate` probability, record a failed login and end the
/// session; otherwise record success. Returns `true` if authentication
/// succeeded (§4.9 "Authenticate").
pub async fn authenticate(
    session: &mut Session,
    services: &SessionServices,
    cancel: &CancellationToken,
) -> Result<bool, EngineError> {
    session.state = SessionState::Authenticating;

    if services.error_sim.should_fail_login(&mut session.rng) {
        services.error_sim.record_error(ErrorKind::Auth);
        services
            .audit
            .audit(
                Some(session.customer.id),
                &session.id,
                AuditAction::LoginFailed,
                AuditOutcome::Failure,
                session.channel(),
            )
            .with_failure_reason("simulated authentication failure")
            .send();
        session.state = SessionState::Failed;
        session.think(services, cancel).await;
        return Ok(false);
    }

    services
        .audit
        .audit(
            Some(session.customer.id),
            &session.id,
            AuditAction::LoginSuccess,
            AuditOutcome::Success,
            session.channel(),
        )
        .send();
    session.state = SessionState::Authenticated;
    session.think(services, cancel).await;
    Ok(true)
}

fn random_account<'a>(accounts: &'a [Account], rng: &mut RngManager) -> &'a Account {
    rng.pick(accounts)
}

/// Maps a [`BusinessError`] to the audit outcome it should be recorded with.
fn outcome_for(err: &BusinessError) -> AuditOutcome {
    match err.kind() {
        ErrorKind::Auth | ErrorKind::AccountLock | ErrorKind::Beneficiary => AuditOutcome::Denied,
        _ => AuditOutcome::Failure,
    }
}

/// Only debit-shaped ops can plausibly be simulated as insufficient funds.
fn is_debit_action(action: AuditAction) -> bool {
    matches!(
        action,
        AuditAction::Withdrawal | AuditAction::Transfer | AuditAction::Sweep | AuditAction::PayrollBatch
    )
}

/// Draw the pre-call simulated failures (§4.9 "sample potential simulated
/// errors first"): insufficient funds for debit-shaped ops, then a
/// simulated timeout for anything.
async fn sample_simulated_failure(
    action: AuditAction,
    services: &SessionServices,
    rng: &mut RngManager,
    cancel: &CancellationToken,
) -> Option<BusinessError> {
    if is_debit_action(action) && services.error_sim.should_fail_insufficient_funds(rng) {
        services.error_sim.record_error(ErrorKind::Funds);
        return Some(BusinessError::InsufficientFunds);
    }
    if services.error_sim.should_timeout(rng) {
        return Some(services.error_sim.simulate_timeout(rng, cancel).await);
    }
    None
}

/// Records the audit entry for a finished op and turns an infrastructure
/// error into the `Err` that halts the worker (§7).
async fn record_outcome<T>(
    session: &Session,
    services: &SessionServices,
    action: AuditAction,
    account_id: Option<Id>,
    result: OpResult<T>,
) -> Result<Option<T>, EngineError> {
    match result {
        Ok(value) => {
            let mut builder = services.audit.audit(
                Some(session.customer.id),
                &session.id,
                action,
                AuditOutcome::Success,
                session.channel(),
            );
            if let Some(id) = account_id {
                builder = builder.with_account(id);
            }
            builder.send();
            Ok(Some(value))
        }
        Err(OpError::Business(err)) => {
            services.error_sim.record_error(err.kind());
            let mut builder = services
                .audit
                .audit(Some(session.customer.id), &session.id, action, outcome_for(&err), session.channel())
                .with_failure_reason(err.to_string());
            if let Some(id) = account_id {
                builder = builder.with_account(id);
            }
            builder.send();
            Ok(None)
        }
        Err(OpError::Infra(err)) => {
            error!(session_id = %session.id, error = %err, "infrastructure error, halting");
            Err(err)
        }
    }
}

/// Runs one transactional/read op through the full contract (§4.9): sample
/// simulated failures, make the real call only if none fired, classify and
/// audit the outcome, propagate infrastructure errors. `real_call` is a
/// not-yet-polled future so it never executes when a simulated failure
/// short-circuits it.
async fn execute<T, Fut>(
    session: &mut Session,
    services: &SessionServices,
    cancel: &CancellationToken,
    action: AuditAction,
    account_id: Option<Id>,
    real_call: Fut,
) -> Result<Option<T>, EngineError>
where
    Fut: Future<Output = OpResult<T>>,
{
    if let Some(simulated) = sample_simulated_failure(action, services, &mut session.rng, cancel).await {
        return record_outcome(session, services, action, account_id, Err(OpError::Business(simulated))).await;
    }
    let result = real_call.await;
    record_outcome(session, services, action, account_id, result).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AccountStatus, AccountType, CustomerSegment, CustomerStatus};
    use chrono::Utc;

    fn test_customer() -> Customer {
        Customer {
            id: 1,
            first_name: "Jane".into(),
            last_name: "Doe".into(),
            timezone: "UTC".into(),
            home_branch_id: 1,
            segment: CustomerSegment::Regular,
            status: CustomerStatus::Active,
            activity_score: 0.5,
            username: "jane".into(),
            password_hash: "x".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn test_account(id: Id) -> Account {
        Account {
            id,
            customer_id: 1,
            account_type: AccountType::Checking,
            status: AccountStatus::Active,
            currency: "USD".into(),
            balance: 100_000,
            daily_limit: 50_000,
            branch_id: 1,
            overdraft_limit: 0,
            credit_limit: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn channel_follows_session_type() {
        let session = Session::new(test_customer(), vec![test_account(1)], SessionType::Atm, None, RngManager::new(1));
        assert_eq!(session.channel(), TransactionChannel::Atm);
        let session = Session::new(test_customer(), vec![test_account(1)], SessionType::Business, None, RngManager::new(1));
        assert_eq!(session.channel(), TransactionChannel::Online);
    }

    #[test]
    fn primary_account_is_first_in_list() {
        let accounts = vec![test_account(7), test_account(8)];
        let session = Session::new(test_customer(), accounts, SessionType::Online, None, RngManager::new(1));
        assert_eq!(session.primary_account().unwrap().id, 7);
    }

    #[test]
    fn outcome_for_auth_and_account_lock_is_denied() {
        assert_eq!(outcome_for(&BusinessError::AuthFailed), AuditOutcome::Denied);
        assert_eq!(outcome_for(&BusinessError::AccountLocked), AuditOutcome::Denied);
        assert_eq!(outcome_for(&BusinessError::InsufficientFunds), AuditOutcome::Failure);
    }

    #[test]
    fn is_debit_action_covers_the_four_money_movement_ops() {
        assert!(is_debit_action(AuditAction::Withdrawal));
        assert!(is_debit_action(AuditAction::Transfer));
        assert!(is_debit_action(AuditAction::Sweep));
        assert!(is_debit_action(AuditAction::PayrollBatch));
        assert!(!is_debit_action(AuditAction::BalanceInquiry));
    }
}
