//! ATM workflow (§4.9): balance inquiry, then withdraw / deposit / leave.

use tokio_util::sync::CancellationToken;

use crate::db::{BALANCE_TIMEOUT, DEFAULT_OP_TIMEOUT};
use crate::model::{AuditAction, AuditOutcome};

use super::{execute, random_account, Session, SessionServices, SessionState};

const WITHDRAWAL_AMOUNTS_CENTS: [i64; 6] = [2_000, 4_000, 6_000, 8_000, 10_000, 20_000];
const DEPOSIT_AMOUNTS_CENTS: [i64; 7] = [5_000, 10_000, 20_000, 50_000, 10_000, 25_000, 50_000];

pub async fn run_atm_workflow(
    session: &mut Session,
    services: &SessionServices,
    cancel: &CancellationToken,
) -> Result<(), crate::error::EngineError> {
    session.state = SessionState::Transacting;

    let account_id = random_account(&session.accounts, &mut session.rng).id;
    let atm_id = session.atm.as_ref().map(|atm| atm.id);

    let balance_call = services.db.balance(account_id, BALANCE_TIMEOUT, cancel);
    execute(session, services, cancel, AuditAction::BalanceInquiry, Some(account_id), balance_call).await?;
    session.think(services, cancel).await;

    let supports_deposit = session.atm.as_ref().map(|atm| atm.supports_deposit).unwrap_or(false);
    let roll = session.rng.float_unit();

    if roll < 0.75 {
        let amount = *session.rng.pick(&WITHDRAWAL_AMOUNTS_CENTS);
        let withdraw_call = services.db.withdraw(account_id, amount, atm_id, DEFAULT_OP_TIMEOUT, cancel);
        execute(session, services, cancel, AuditAction::Withdrawal, Some(account_id), withdraw_call).await?;
    } else if roll < 0.85 && supports_deposit {
        let amount = *session.rng.pick(&DEPOSIT_AMOUNTS_CENTS);
        let deposit_call = services
            .db
            .deposit(account_id, amount, atm_id, session.channel(), DEFAULT_OP_TIMEOUT, cancel);
        execute(session, services, cancel, AuditAction::Deposit, Some(account_id), deposit_call).await?;
    }
    // else: 15% (or the deposit share when unsupported) leaves without a
    // further operation.

    session.think(services, cancel).await;
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
