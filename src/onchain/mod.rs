//! On-chain side of the watcher: oracle bindings, the ledger RPC seam and
//! the challenge submitter built on top of it.
//!
//! Architecture:
//! - `abi`: `sol!` bindings for the oracle contract
//! - `ledger`: `Ledger` trait plus `AlloyLedger` (HTTP RPC + local key)
//! - `challenge`: `Challenger`, the freshness-check → live bond → simulate → send
//!   → confirm sequence, generic over any `Ledger`

pub mod abi;
pub mod challenge;
pub mod ledger;

pub use challenge::{
    required_bond, ChallengeError, ChallengeReceipt, ChallengeSubmitter, Challenger,
};
pub use ledger::{AlloyLedger, ChallengeTx, Ledger, LedgerError, MinedTx};
