//! Connection pool + the per-operation timing/timeout wrapper shared by
//! `ops` and `reads`.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;

use super::refnum::ReferenceNumberGenerator;
use super::OpError;

/// Recommended per-call timeouts (§5): balance reads are cheap, most
/// transactional ops get a generous window, batch payroll gets the longest
/// since it serializes N payments inside one SQL transaction.
pub const BALANCE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(10);
pub const BATCH_PAYROLL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub dsn: String,
    /// Accepted for a driver-agnostic DSN surface; only `"postgres"` is
    /// implemented.
    pub driver: String,
    pub max_open_conns: u32,
    pub max_idle_conns: u32,
    pub conn_max_lifetime: Duration,
    pub conn_max_idle_time: Duration,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueryStats {
    pub query_count: u64,
    pub query_errors: u64,
    pub avg_latency_micros: u64,
}

/// Owns the pool, the reference-number counter, and query-count/latency
/// counters (§4.7 "wraps query/exec with query-count and latency counters").
pub struct Database {
    pub(super) pool: PgPool,
    pub(super) refnum: ReferenceNumberGenerator,
    query_count: AtomicU64,
    query_errors: AtomicU64,
    total_latency_micros: AtomicU64,
}

impl Database {
    pub async fn connect(config: &PoolConfig) -> Result<Self, EngineError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_open_conns)
            .min_connections(config.max_idle_conns)
            .max_lifetime(config.conn_max_lifetime)
            .idle_timeout(config.conn_max_idle_time)
            .connect(&config.dsn)
            .await?;
        Ok(Self {
            pool,
            refnum: ReferenceNumberGenerator::new(),
            query_count: AtomicU64::new(0),
            query_errors: AtomicU64::new(0),
            total_latency_micros: AtomicU64::new(0),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn stats(&self) -> QueryStats {
        let count = self.query_count.load(Ordering::Relaxed);
        let avg = if count == 0 {
            0
        } else {
            self.total_latency_micros.load(Ordering::Relaxed) / count
        };
        QueryStats {
            query_count: count,
            query_errors: self.query_errors.load(Ordering::Relaxed),
            avg_latency_micros: avg,
        }
    }

    /// Races `fut` against `timeout` and the cancellation token, recording a
    /// query-count and latency sample either way. Used by every `ops`/`reads`
    /// call as the single suspension point the cancellation contract (§5)
    /// requires.
    pub(super) async fn timed<T>(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
        fut: impl Future<Output = Result<T, OpError>>,
    ) -> Result<T, OpError> {
        self.query_count.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();
        let outcome = tokio::select! {
            res = tokio::time::timeout(timeout, fut) => res,
            _ = cancel.cancelled() => Ok(Err(OpError::Infra(EngineError::Timeout(timeout)))),
        };
        self.total_latency_micros
            .fetch_add(start.elapsed().as_micros() as u64, Ordering::Relaxed);

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(op_err)) => {
                if matches!(op_err, OpError::Infra(_)) {
                    self.query_errors.fetch_add(1, Ordering::Relaxed);
                }
                Err(op_err)
            }
            Err(_elapsed) => {
                self.query_errors.fetch_add(1, Ordering::Relaxed);
                Err(OpError::Infra(EngineError::Timeout(timeout)))
            }
        }
    }
}
