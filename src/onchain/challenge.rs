//! Challenge submission.
//!
//! Submits an opposing answer to a question with double the current bond.
//! Every step that can fail before broadcast (finality, simulation) aborts
//! without sending anything; only `send_and_confirm` commits funds.

use crate::onchain::ledger::{ChallengeTx, Ledger, LedgerError};

use alloy::primitives::{B256, U256};
use std::future::Future;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ChallengeError {
    #[error("question already finalized")]
    AlreadyFinalized,
    #[error("gas estimation failed, transaction would likely revert: {0}")]
    GasEstimationFailed(String),
    #[error("challenge transaction {tx_hash} reverted")]
    TransactionReverted { tx_hash: B256 },
    #[error("challenge submission failed: {0}")]
    SubmissionFailed(String),
}

/// Proof of a mined, successful challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeReceipt {
    pub question_id: B256,
    pub bond: U256,
    pub tx_hash: B256,
    pub block_number: Option<u64>,
    pub gas_used: u64,
}

pub trait ChallengeSubmitter {
    fn submit(
        &self,
        question_id: B256,
        current_bond: U256,
    ) -> impl Future<Output = Result<ChallengeReceipt, ChallengeError>> + Send;
}

/// Bond needed to out-stake `current_bond`; `min_bond` for unbonded questions.
pub fn required_bond(current_bond: U256, min_bond: U256) -> U256 {
    if current_bond.is_zero() {
        min_bond
    } else {
        current_bond.saturating_mul(U256::from(2))
    }
}

// 20% over the node's estimate.
fn gas_limit_with_headroom(estimate: u64) -> u64 {
    estimate.saturating_add(estimate / 5)
}

pub struct Challenger<L> {
    ledger: L,
    min_bond: U256,
    answer: B256,
}

impl<L: Ledger> Challenger<L> {
    pub fn new(ledger: L, min_bond: U256, answer: B256) -> Self {
        Self {
            ledger,
            min_bond,
            answer,
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }
}

impl<L: Ledger + Sync> ChallengeSubmitter for Challenger<L> {
    async fn submit(
        &self,
        question_id: B256,
        current_bond: U256,
    ) -> Result<ChallengeReceipt, ChallengeError> {
        // Freshness: the question may have finalized since it was polled.
        let finalized = self
            .ledger
            .is_finalized(question_id)
            .await
            .map_err(|e| ChallengeError::SubmissionFailed(format!("finality check: {}", e)))?;
        if finalized {
            info!(question_id = %question_id, "question finalized before challenge, skipping");
            return Err(ChallengeError::AlreadyFinalized);
        }

        // The subgraph lags the chain; out-bid whichever bond is higher.
        let live_bond = self
            .ledger
            .current_bond(question_id)
            .await
            .map_err(|e| ChallengeError::SubmissionFailed(format!("bond read: {}", e)))?;
        if live_bond > current_bond {
            info!(
                question_id = %question_id,
                polled_bond_wei = %current_bond,
                live_bond_wei = %live_bond,
                "bond moved since poll, using live bond"
            );
        }
        let current_bond = current_bond.max(live_bond);

        let bond = required_bond(current_bond, self.min_bond);
        let tx = ChallengeTx {
            question_id,
            answer: self.answer,
            max_previous: current_bond,
            bond,
        };

        let estimate = self
            .ledger
            .estimate_gas(&tx)
            .await
            .map_err(|e| ChallengeError::GasEstimationFailed(e.to_string()))?;
        let gas_limit = gas_limit_with_headroom(estimate);

        info!(
            question_id = %question_id,
            current_bond_wei = %current_bond,
            bond_wei = %bond,
            gas_estimate = estimate,
            gas_limit,
            "SUBMITTING CHALLENGE"
        );

        let mined = self
            .ledger
            .send_and_confirm(&tx, gas_limit)
            .await
            .map_err(|e| match e {
                LedgerError::Unconfirmed { tx_hash, reason } => {
                    ChallengeError::SubmissionFailed(format!(
                        "transaction {} broadcast but not confirmed: {}",
                        tx_hash, reason
                    ))
                }
                other => ChallengeError::SubmissionFailed(other.to_string()),
            })?;

        if !mined.success {
            warn!(
                question_id = %question_id,
                tx_hash = %mined.tx_hash,
                block = ?mined.block_number,
                "challenge transaction REVERTED"
            );
            return Err(ChallengeError::TransactionReverted { tx_hash: mined.tx_hash });
        }

        Ok(ChallengeReceipt {
            question_id,
            bond,
            tx_hash: mined.tx_hash,
            block_number: mined.block_number,
            gas_used: mined.gas_used,
        })
    }
}
