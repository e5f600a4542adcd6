//! Business workflow (§4.9): balance all accounts, view primary history,
//! payroll/sweep, then vendor transfers.

use tokio_util::sync::CancellationToken;

use crate::db::{OpError, BALANCE_TIMEOUT, BATCH_PAYROLL_TIMEOUT, DEFAULT_OP_TIMEOUT};
use crate::error::EngineError;
use crate::model::{AuditAction, AuditOutcome};

use super::{execute, Session, SessionServices, SessionState};

/// Per-employee payroll payment range: no figure is given in the source
/// spec, so this sits comfortably inside the business segment's own
/// transfer-amount range ($500-$20k) as a representative paycheck.
const PAYROLL_PAYMENT_MIN_CENTS: i64 = 100_000;
const PAYROLL_PAYMENT_MAX_CENTS: i64 = 500_000;
const PAYROLL_HEADCOUNT_MIN: i64 = 3;
const PAYROLL_HEADCOUNT_MAX: i64 = 11;

pub async fn run_business_workflow(
    session: &mut Session,
    services: &SessionServices,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    session.state = SessionState::Browsing;

    let account_ids: Vec<_> = session.accounts.iter().map(|account| account.id).collect();
    for account_id in &account_ids {
        let call = services.db.balance(*account_id, BALANCE_TIMEOUT, cancel);
        execute(session, services, cancel, AuditAction::BalanceInquiry, Some(*account_id), call).await?;
    }

    if let Some(primary_id) = session.primary_account().map(|account| account.id) {
        let call = services.db.transaction_history(primary_id, 20, DEFAULT_OP_TIMEOUT, cancel);
        execute(session, services, cancel, AuditAction::TransactionHistory, Some(primary_id), call).await?;
    }
    session.think(services, cancel).await;

    let in_payroll_period = services.activity.is_payroll_period(&services.tz_mgr, &session.customer.timezone);
    if in_payroll_period && session.rng.bool_with_probability(0.4) {
        run_payroll(session, services, cancel).await?;
    } else if !in_payroll_period && session.rng.bool_with_probability(0.3) {
        run_sweep(session, services, cancel).await?;
    }
    session.think(services, cancel).await;

    let vendor_transfer_count = 1 + session.rng.int_in_range(0, 4);
    for _ in 0..vendor_transfer_count {
        run_vendor_transfer(session, services, cancel).await?;
        session.think(services, cancel).await;
    }

    services
        .audit
        .audit(
            Some(session.customer.id),
            &session.id,
            AuditAction::SessionEnded,
            AuditOutcome::Success,
            session.channel(),
        )
        .send();
    session.state = SessionState::Ended;
    Ok(())
}

async fn run_payroll(
    session: &mut Session,
    services: &SessionServices,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    session.state = SessionState::Transacting;
    let Some(source_id) = session.primary_account().map(|account| account.id) else {
        return Ok(());
    };

    let headcount = session.rng.int_in_range(PAYROLL_HEADCOUNT_MIN, PAYROLL_HEADCOUNT_MAX);
    let employee_ids = match services.db.employee_account_ids(headcount, DEFAULT_OP_TIMEOUT, cancel).await {
        Ok(ids) => ids,
        Err(OpError::Infra(e)) => return Err(e),
        Err(OpError::Business(_)) => return Ok(()),
    };
    if employee_ids.is_empty() {
        return Ok(());
    }

    let payments: Vec<(i64, i64)> = employee_ids
        .into_iter()
        .map(|dest| {
            let amount = session.rng.int_in_range(PAYROLL_PAYMENT_MIN_CENTS, PAYROLL_PAYMENT_MAX_CENTS);
            (dest, amount)
        })
        .collect();

    let call = services.db.batch_payroll(source_id, &payments, BATCH_PAYROLL_TIMEOUT, cancel);
    execute(session, services, cancel, AuditAction::PayrollBatch, Some(source_id), call).await?;
    session.state = SessionState::Browsing;
    Ok(())
}

/// Sweeps the primary account down to its configured daily limit, treated
/// here as the working-capital floor a cash-concentration sweep preserves.
async fn run_sweep(
    session: &mut Session,
    services: &SessionServices,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    session.state = SessionState::Transacting;
    let Some(primary) = session.primary_account() else {
        return Ok(());
    };
    let from_id = primary.id;
    let target_balance = primary.daily_limit;

    let to_id = if session.accounts.len() >= 2 {
        session.accounts[1].id
    } else {
        match services.db.random_business_account(DEFAULT_OP_TIMEOUT, cancel).await {
            Ok(account) => account.id,
            Err(OpError::Infra(e)) => return Err(e),
            Err(OpError::Business(_)) => return Ok(()),
        }
    };

    let call = services.db.sweep(from_id, to_id, target_balance, DEFAULT_OP_TIMEOUT, cancel);
    execute(session, services, cancel, AuditAction::Sweep, Some(from_id), call).await?;
    session.state = SessionState::Browsing;
    Ok(())
}

async fn run_vendor_transfer(
    session: &mut Session,
    services: &SessionServices,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    session.state = SessionState::Transacting;
    let Some(from_id) = session.primary_account().map(|account| account.id) else {
        return Ok(());
    };
    let vendor = match services.db.random_business_account(DEFAULT_OP_TIMEOUT, cancel).await {
        Ok(account) => account,
        Err(OpError::Infra(e)) => return Err(e),
        Err(OpError::Business(_)) => return Ok(()),
    };
    if vendor.id == from_id {
        return Ok(());
    }

    let (min, max) = session.customer.segment.transfer_amount_range();
    let amount = session.rng.int_in_range(min, max);
    let call = services.db.transfer(from_id, vendor.id, amount, session.channel(), DEFAULT_OP_TIMEOUT, cancel);
    execute(session, services, cancel, AuditAction::Transfer, Some(from_id), call).await?;
    session.state = SessionState::Browsing;
    Ok(())
}
