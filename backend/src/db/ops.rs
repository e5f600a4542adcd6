//! Transactional operations (§4.7): withdraw, deposit, transfer, sweep,
//! batch payroll. Each opens a database transaction and relies on sqlx's
//! rollback-on-drop behavior whenever a step returns an error before commit.

use std::time::Duration;

use sqlx::Acquire;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::error_sim::BusinessError;
use crate::model::{Account, Cents, Id, TransactionChannel, TransactionType};

use super::pool::Database;
use super::OpError;
use super::OpResult;

struct NewTransaction<'a> {
    reference_number: &'a str,
    account_id: Id,
    counterparty_account_id: Option<Id>,
    transaction_type: TransactionType,
    channel: TransactionChannel,
    amount: Cents,
    balance_after: Cents,
    linked_transaction_id: Option<Id>,
}

async fn lock_account<'c, E>(executor: E, account_id: Id) -> OpResult<Account>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    sqlx::query_as::<_, Account>(
        "SELECT id, customer_id, type, status, currency, balance, daily_limit, branch_id, \
         overdraft_limit, credit_limit, created_at, updated_at \
         FROM accounts WHERE id = $1 FOR UPDATE",
    )
    .bind(account_id)
    .fetch_one(executor)
    .await
    .map_err(|e| OpError::Infra(EngineError::from(e)))
}

async fn update_balance<'c, E>(executor: E, account_id: Id, new_balance: Cents) -> OpResult<()>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    sqlx::query("UPDATE accounts SET balance = $1, updated_at = now() WHERE id = $2")
        .bind(new_balance)
        .bind(account_id)
        .execute(executor)
        .await
        .map_err(|e| OpError::Infra(EngineError::from(e)))?;
    Ok(())
}

async fn insert_transaction<'c, E>(executor: E, new: NewTransaction<'_>) -> OpResult<Id>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    let now = chrono::Utc::now();
    let row: (Id,) = sqlx::query_as(
        "INSERT INTO transactions \
         (reference_number, account_id, counterparty_account_id, beneficiary_id, type, status, \
          channel, amount, balance_after, linked_transaction_id, timestamp, posted_at, value_date) \
         VALUES ($1, $2, $3, NULL, $4, 'completed', $5, $6, $7, $8, $9, $9, $9) \
         RETURNING id",
    )
    .bind(new.reference_number)
    .bind(new.account_id)
    .bind(new.counterparty_account_id)
    .bind(new.transaction_type)
    .bind(new.channel)
    .bind(new.amount)
    .bind(new.balance_after)
    .bind(new.linked_transaction_id)
    .bind(now)
    .fetch_one(executor)
    .await
    .map_err(|e| OpError::Infra(EngineError::from(e)))?;
    Ok(row.0)
}

async fn backfill_linked<'c, E>(executor: E, debit_id: Id, credit_id: Id) -> OpResult<()>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    sqlx::query("UPDATE transactions SET linked_transaction_id = $1 WHERE id = $2")
        .bind(credit_id)
        .bind(debit_id)
        .execute(executor)
        .await
        .map_err(|e| OpError::Infra(EngineError::from(e)))?;
    Ok(())
}

/// Both sides of a completed transfer/sweep (§8 property 1).
#[derive(Debug, Clone, Copy)]
pub struct TransferOutcome {
    pub debit_transaction_id: Id,
    pub credit_transaction_id: Id,
    pub new_from_balance: Cents,
    pub new_to_balance: Cents,
}

#[derive(Debug, Clone, Copy)]
pub struct PayrollPaymentOutcome {
    pub destination: Id,
    pub amount: Cents,
    pub succeeded: bool,
}

#[derive(Debug, Clone)]
pub struct BatchPayrollOutcome {
    pub last_source_txn_id: Option<Id>,
    pub success_count: u32,
    pub failure_count: u32,
    pub total_amount: Cents,
    pub new_source_balance: Cents,
    pub payments: Vec<PayrollPaymentOutcome>,
}

impl Database {
    /// Lock `account`, fail with `InsufficientFunds` if `balance < amount`,
    /// otherwise debit and insert one transaction row.
    pub async fn withdraw(
        &self,
        account_id: Id,
        amount: Cents,
        atm_id: Option<Id>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> OpResult<Id> {
        let work = async {
            let mut tx = self.pool.begin().await.map_err(|e| OpError::Infra(EngineError::from(e)))?;
            let account = lock_account(&mut *tx, account_id).await?;
            if !account.can_debit(amount) {
                return Err(OpError::Business(BusinessError::InsufficientFunds));
            }
            let new_balance = account.balance - amount;
            update_balance(&mut *tx, account_id, new_balance).await?;
            let reference = self.refnum.next(account_id);
            let channel = if atm_id.is_some() {
                TransactionChannel::Atm
            } else {
                TransactionChannel::Branch
            };
            let txn_id = insert_transaction(
                &mut *tx,
                NewTransaction {
                    reference_number: &reference,
                    account_id,
                    counterparty_account_id: None,
                    transaction_type: TransactionType::Withdrawal,
                    channel,
                    amount,
                    balance_after: new_balance,
                    linked_transaction_id: None,
                },
            )
            .await?;
            tx.commit().await.map_err(|e| OpError::Infra(EngineError::from(e)))?;
            Ok(txn_id)
        };
        self.timed(timeout, cancel, work).await
    }

    pub async fn deposit(
        &self,
        account_id: Id,
        amount: Cents,
        atm_id: Option<Id>,
        channel: TransactionChannel,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> OpResult<Id> {
        let work = async {
            let mut tx = self.pool.begin().await.map_err(|e| OpError::Infra(EngineError::from(e)))?;
            let account = lock_account(&mut *tx, account_id).await?;
            let new_balance = account.balance + amount;
            update_balance(&mut *tx, account_id, new_balance).await?;
            let reference = self.refnum.next(account_id);
            let channel = if atm_id.is_some() { TransactionChannel::Atm } else { channel };
            let txn_id = insert_transaction(
                &mut *tx,
                NewTransaction {
                    reference_number: &reference,
                    account_id,
                    counterparty_account_id: None,
                    transaction_type: TransactionType::Deposit,
                    channel,
                    amount,
                    balance_after: new_balance,
                    linked_transaction_id: None,
                },
            )
            .await?;
            tx.commit().await.map_err(|e| OpError::Infra(EngineError::from(e)))?;
            Ok(txn_id)
        };
        self.timed(timeout, cancel, work).await
    }

    /// §5 lock-ordering contract: acquire row locks in ascending account-id
    /// order regardless of logical from/to role, so concurrent `{A→B}` and
    /// `{B→A}` transfers can't deadlock.
    pub async fn transfer(
        &self,
        from: Id,
        to: Id,
        amount: Cents,
        channel: TransactionChannel,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> OpResult<TransferOutcome> {
        let work = async {
            let mut tx = self.pool.begin().await.map_err(|e| OpError::Infra(EngineError::from(e)))?;
            let (first_id, second_id) = if from <= to { (from, to) } else { (to, from) };
            let first = lock_account(&mut *tx, first_id).await?;
            let second = lock_account(&mut *tx, second_id).await?;
            let (from_acct, to_acct) = if first.id == from { (first, second) } else { (second, first) };

            if !from_acct.can_debit(amount) {
                return Err(OpError::Business(BusinessError::InsufficientFunds));
            }
            let new_from_balance = from_acct.balance - amount;
            let new_to_balance = to_acct.balance + amount;
            update_balance(&mut *tx, from_acct.id, new_from_balance).await?;
            update_balance(&mut *tx, to_acct.id, new_to_balance).await?;

            let debit_reference = self.refnum.next(from_acct.id);
            let debit_id = insert_transaction(
                &mut *tx,
                NewTransaction {
                    reference_number: &debit_reference,
                    account_id: from_acct.id,
                    counterparty_account_id: Some(to_acct.id),
                    transaction_type: TransactionType::TransferOut,
                    channel,
                    amount,
                    balance_after: new_from_balance,
                    linked_transaction_id: None,
                },
            )
            .await?;
            let credit_reference = self.refnum.next(to_acct.id);
            let credit_id = insert_transaction(
                &mut *tx,
                NewTransaction {
                    reference_number: &credit_reference,
                    account_id: to_acct.id,
                    counterparty_account_id: Some(from_acct.id),
                    transaction_type: TransactionType::TransferIn,
                    channel,
                    amount,
                    balance_after: new_to_balance,
                    linked_transaction_id: Some(debit_id),
                },
            )
            .await?;
            backfill_linked(&mut *tx, debit_id, credit_id).await?;

            tx.commit().await.map_err(|e| OpError::Infra(EngineError::from(e)))?;
            Ok(TransferOutcome {
                debit_transaction_id: debit_id,
                credit_transaction_id: credit_id,
                new_from_balance,
                new_to_balance,
            })
        };
        self.timed(timeout, cancel, work).await
    }

    /// Locks `from` first to evaluate the excess-funds check; only locks
    /// `to` once an excess is confirmed. This differs from `transfer`'s
    /// strict ascending-id lock order — a preserved fidelity choice, not a
    /// deadlock-freedom guarantee for sweep vs transfer.
    pub async fn sweep(
        &self,
        from: Id,
        to: Id,
        target_balance: Cents,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> OpResult<TransferOutcome> {
        let work = async {
            let mut tx = self.pool.begin().await.map_err(|e| OpError::Infra(EngineError::from(e)))?;
            let from_acct = lock_account(&mut *tx, from).await?;
            let sweep_amount = from_acct.balance - target_balance;
            if sweep_amount <= 0 {
                return Err(OpError::Business(BusinessError::NoExcessFunds));
            }
            let to_acct = lock_account(&mut *tx, to).await?;
            let new_from_balance = target_balance;
            let new_to_balance = to_acct.balance + sweep_amount;
            update_balance(&mut *tx, from_acct.id, new_from_balance).await?;
            update_balance(&mut *tx, to_acct.id, new_to_balance).await?;

            let debit_reference = self.refnum.next(from_acct.id);
            let debit_id = insert_transaction(
                &mut *tx,
                NewTransaction {
                    reference_number: &debit_reference,
                    account_id: from_acct.id,
                    counterparty_account_id: Some(to_acct.id),
                    transaction_type: TransactionType::TransferOut,
                    channel: TransactionChannel::Internal,
                    amount: sweep_amount,
                    balance_after: new_from_balance,
                    linked_transaction_id: None,
                },
            )
            .await?;
            let credit_reference = self.refnum.next(to_acct.id);
            let credit_id = insert_transaction(
                &mut *tx,
                NewTransaction {
                    reference_number: &credit_reference,
                    account_id: to_acct.id,
                    counterparty_account_id: Some(from_acct.id),
                    transaction_type: TransactionType::TransferIn,
                    channel: TransactionChannel::Internal,
                    amount: sweep_amount,
                    balance_after: new_to_balance,
                    linked_transaction_id: Some(debit_id),
                },
            )
            .await?;
            backfill_linked(&mut *tx, debit_id, credit_id).await?;

            tx.commit().await.map_err(|e| OpError::Infra(EngineError::from(e)))?;
            Ok(TransferOutcome {
                debit_transaction_id: debit_id,
                credit_transaction_id: credit_id,
                new_from_balance,
                new_to_balance,
            })
        };
        self.timed(timeout, cancel, work).await
    }

    /// Locks `source` once; each payment runs in its own savepoint so a
    /// single payment's failure doesn't abort the batch. The running
    /// balance advances even on a failed source-debit insert — a literal
    /// preservation of the source behavior (§9 open question b), confirmed
    /// in the design ledger. Destinations are updated without `FOR UPDATE`:
    /// credit-only updates commute, and the source lock already serializes
    /// the batch against concurrent payroll runs touching the same source.
    pub async fn batch_payroll(
        &self,
        source: Id,
        payments: &[(Id, Cents)],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> OpResult<BatchPayrollOutcome> {
        let work = async {
            let mut tx = self.pool.begin().await.map_err(|e| OpError::Infra(EngineError::from(e)))?;
            let source_acct = lock_account(&mut *tx, source).await?;
            let total: Cents = payments.iter().map(|(_, amount)| *amount).sum();
            if total > source_acct.balance {
                return Err(OpError::Business(BusinessError::InsufficientFunds));
            }

            let mut running_balance = source_acct.balance;
            let mut last_source_txn_id = None;
            let mut success_count = 0u32;
            let mut failure_count = 0u32;
            let mut total_amount: Cents = 0;
            let mut outcomes = Vec::with_capacity(payments.len());

            for &(dest, amount) in payments {
                let tentative_balance = running_balance - amount;
                let mut savepoint = match tx.begin().await {
                    Ok(sp) => sp,
                    Err(e) => return Err(OpError::Infra(EngineError::from(e))),
                };

                let debit_reference = self.refnum.next(source);
                let debit_result = insert_transaction(
                    &mut *savepoint,
                    NewTransaction {
                        reference_number: &debit_reference,
                        account_id: source,
                        counterparty_account_id: Some(dest),
                        transaction_type: TransactionType::PayrollBatch,
                        channel: TransactionChannel::Ach,
                        amount,
                        balance_after: tentative_balance,
                        linked_transaction_id: None,
                    },
                )
                .await;

                running_balance = tentative_balance;

                let payment_succeeded = match debit_result {
                    Ok(debit_id) => {
                        let credit_ok = async {
                            let dest_acct = lock_account(&mut *savepoint, dest).await?;
                            let new_dest_balance = dest_acct.balance + amount;
                            update_balance(&mut *savepoint, dest, new_dest_balance).await?;
                            let credit_reference = self.refnum.next(dest);
                            insert_transaction(
                                &mut *savepoint,
                                NewTransaction {
                                    reference_number: &credit_reference,
                                    account_id: dest,
                                    counterparty_account_id: Some(source),
                                    transaction_type: TransactionType::Deposit,
                                    channel: TransactionChannel::Ach,
                                    amount,
                                    balance_after: new_dest_balance,
                                    linked_transaction_id: Some(debit_id),
                                },
                            )
                            .await?;
                            OpResult::Ok(())
                        }
                        .await;

                        if credit_ok.is_ok() {
                            last_source_txn_id = Some(debit_id);
                            true
                        } else {
                            false
                        }
                    }
                    Err(_) => false,
                };

                if payment_succeeded {
                    savepoint.commit().await.map_err(|e| OpError::Infra(EngineError::from(e)))?;
                    success_count += 1;
                    total_amount += amount;
                } else {
                    drop(savepoint); // rolls back the savepoint on drop
                    failure_count += 1;
                }
                outcomes.push(PayrollPaymentOutcome {
                    destination: dest,
                    amount,
                    succeeded: payment_succeeded,
                });
            }

            update_balance(&mut *tx, source, running_balance).await?;
            tx.commit().await.map_err(|e| OpError::Infra(EngineError::from(e)))?;

            Ok(BatchPayrollOutcome {
                last_source_txn_id,
                success_count,
                failure_count,
                total_amount,
                new_source_balance: running_balance,
                payments: outcomes,
            })
        };
        self.timed(timeout, cancel, work).await
    }
}
