//! Database access layer (C7).
//!
//! Every call returns [`OpResult`], which keeps the eight simulated business
//! errors (insufficient funds, etc.) distinct from infrastructure failures
//! at the type level — callers classify with [`OpError::kind`] and act
//! per §7: continue on business errors, exit the process on infrastructure
//! ones.

mod ops;
mod pool;
mod reads;
mod refnum;

use thiserror::Error;

use crate::error::EngineError;
use crate::error_sim::{classify_engine_error, BusinessError, ErrorKind};

pub use ops::{BatchPayrollOutcome, PayrollPaymentOutcome, TransferOutcome};
pub use pool::{Database, PoolConfig, QueryStats, BALANCE_TIMEOUT, BATCH_PAYROLL_TIMEOUT, DEFAULT_OP_TIMEOUT};
pub use refnum::ReferenceNumberGenerator;

#[derive(Debug, Error)]
pub enum OpError {
    #[error(transparent)]
    Business(#[from] BusinessError),
    #[error(transparent)]
    Infra(#[from] EngineError),
}

impl OpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OpError::Business(b) => b.kind(),
            OpError::Infra(e) => classify_engine_error(e),
        }
    }

    pub fn is_business(&self) -> bool {
        matches!(self, OpError::Business(_))
    }
}

pub type OpResult<T> = Result<T, OpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_variant_classifies_as_business() {
        let err = OpError::Business(BusinessError::InsufficientFunds);
        assert!(err.is_business());
        assert_eq!(err.kind(), ErrorKind::Funds);
    }

    #[test]
    fn infra_variant_classifies_as_infrastructure() {
        let err = OpError::Infra(EngineError::Infrastructure("pool exhausted".into()));
        assert!(!err.is_business());
        assert!(!err.kind().is_business());
    }
}
