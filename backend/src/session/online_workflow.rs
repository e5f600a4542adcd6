//! Online workflow (§4.9): `2 + uniform[0,4]` actions, each read or write.

use tokio_util::sync::CancellationToken;

use crate::db::{OpError, BALANCE_TIMEOUT, DEFAULT_OP_TIMEOUT};
use crate::error::EngineError;
use crate::model::{AuditAction, AuditOutcome};

use super::{execute, random_account, Session, SessionServices, SessionState};

pub async fn run_online_workflow(
    session: &mut Session,
    services: &SessionServices,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    session.state = SessionState::Browsing;

    let action_count = 2 + session.rng.int_in_range(0, 5);
    let read_probability = services.config.read_write_ratio / (services.config.read_write_ratio + 1.0);

    for _ in 0..action_count {
        if session.rng.float_unit() < read_probability {
            run_read_action(session, services, cancel).await?;
        } else {
            run_write_action(session, services, cancel).await?;
        }
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

async fn run_read_action(
    session: &mut Session,
    services: &SessionServices,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    session.state = SessionState::Browsing;
    let account_id = random_account(&session.accounts, &mut session.rng).id;
    if session.rng.bool_with_probability(0.5) {
        let call = services.db.balance(account_id, BALANCE_TIMEOUT, cancel);
        execute(session, services, cancel, AuditAction::BalanceInquiry, Some(account_id), call).await?;
    } else {
        let call = services.db.transaction_history(account_id, 20, DEFAULT_OP_TIMEOUT, cancel);
        execute(session, services, cancel, AuditAction::TransactionHistory, Some(account_id), call).await?;
    }
    Ok(())
}

/// A write is a transfer off the primary account. With a single account on
/// file it targets a random business account as a stand-in payee, since
/// there's no beneficiary catalog wired into this workflow.
async fn run_write_action(
    session: &mut Session,
    services: &SessionServices,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    session.state = SessionState::Transacting;
    let Some(from_id) = session.primary_account().map(|account| account.id) else {
        return Ok(());
    };
    let to_id = if session.accounts.len() >= 2 {
        session.accounts[1].id
    } else {
        match services.db.random_business_account(DEFAULT_OP_TIMEOUT, cancel).await {
            Ok(account) => account.id,
            Err(OpError::Infra(e)) => return Err(e),
            Err(OpError::Business(_)) => return Ok(()),
        }
    };

    let (min, max) = session.customer.segment.transfer_amount_range();
    let amount = session.rng.int_in_range(min, max);
    let call = services.db.transfer(from_id, to_id, amount, session.channel(), DEFAULT_OP_TIMEOUT, cancel);
    execute(session, services, cancel, AuditAction::Transfer, Some(from_id), call).await?;
    session.state = SessionState::Browsing;
    Ok(())
}
