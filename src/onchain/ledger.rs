//! Ledger RPC surface used by the challenger.
//!
//! `Ledger` is the seam between the challenge algorithm and the node:
//! `AlloyLedger` talks to a real JSON-RPC endpoint with a local signing key.

use crate::onchain::abi::IRealityETH;

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::http::reqwest::Url;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
    #[error("invalid rpc url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("connected to chain {actual}, expected {expected}")]
    ChainMismatch { expected: u64, actual: u64 },
    #[error("rpc call failed: {0}")]
    Rpc(String),
    #[error("transaction {tx_hash} not confirmed: {reason}")]
    Unconfirmed { tx_hash: B256, reason: String },
}

/// Parameters of one `submitAnswer` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChallengeTx {
    pub question_id: B256,
    pub answer: B256,
    /// Chain must reject the call if the live bond is above this.
    pub max_previous: U256,
    /// Sent as the transaction value.
    pub bond: U256,
}

/// A mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinedTx {
    pub tx_hash: B256,
    pub success: bool,
    pub block_number: Option<u64>,
    pub gas_used: u64,
}

pub trait Ledger {
    fn is_finalized(
        &self,
        question_id: B256,
    ) -> impl Future<Output = Result<bool, LedgerError>> + Send;

    /// Bond backing the current answer, as the contract sees it now.
    fn current_bond(
        &self,
        question_id: B256,
    ) -> impl Future<Output = Result<U256, LedgerError>> + Send;

    /// Simulate the call; an error usually means it would revert.
    fn estimate_gas(
        &self,
        tx: &ChallengeTx,
    ) -> impl Future<Output = Result<u64, LedgerError>> + Send;

    /// Sign, broadcast and block until mined.
    fn send_and_confirm(
        &self,
        tx: &ChallengeTx,
        gas_limit: u64,
    ) -> impl Future<Output = Result<MinedTx, LedgerError>> + Send;
}

/// HTTP JSON-RPC ledger with a local private key.
pub struct AlloyLedger {
    contract: IRealityETH::IRealityETHInstance<DynProvider>,
    signer_address: Address,
    receipt_timeout: Duration,
}

impl AlloyLedger {
    pub async fn connect(
        rpc_url: &str,
        private_key: &str,
        oracle: Address,
        expected_chain_id: Option<u64>,
        receipt_timeout: Duration,
    ) -> Result<Self, LedgerError> {
        let signer: PrivateKeySigner = private_key
            .trim()
            .parse()
            .map_err(|e: alloy::signers::local::LocalSignerError| {
                LedgerError::InvalidKey(e.to_string())
            })?;
        let signer_address = signer.address();

        let url = rpc_url.trim().parse::<Url>().map_err(|e| LedgerError::InvalidUrl {
            url: rpc_url.to_string(),
            reason: e.to_string(),
        })?;

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(url)
            .erased();

        let chain_id = provider
            .get_chain_id()
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))?;
        if let Some(expected) = expected_chain_id {
            if expected != chain_id {
                return Err(LedgerError::ChainMismatch { expected, actual: chain_id });
            }
        }

        let balance = provider
            .get_balance(signer_address)
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))?;

        info!(
            chain_id,
            oracle = %oracle,
            signer = %signer_address,
            balance_wei = %balance,
            "ledger connected"
        );

        Ok(Self {
            contract: IRealityETH::new(oracle, provider),
            signer_address,
            receipt_timeout,
        })
    }

    pub fn signer_address(&self) -> Address {
        self.signer_address
    }
}

impl Ledger for AlloyLedger {
    async fn is_finalized(&self, question_id: B256) -> Result<bool, LedgerError> {
        self.contract
            .isFinalized(question_id)
            .call()
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))
    }

    async fn current_bond(&self, question_id: B256) -> Result<U256, LedgerError> {
        self.contract
            .getBond(question_id)
            .call()
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))
    }

    async fn estimate_gas(&self, tx: &ChallengeTx) -> Result<u64, LedgerError> {
        self.contract
            .submitAnswer(tx.question_id, tx.answer, tx.max_previous)
            .value(tx.bond)
            .estimate_gas()
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))
    }

    async fn send_and_confirm(
        &self,
        tx: &ChallengeTx,
        gas_limit: u64,
    ) -> Result<MinedTx, LedgerError> {
        let pending = self
            .contract
            .submitAnswer(tx.question_id, tx.answer, tx.max_previous)
            .value(tx.bond)
            .gas(gas_limit)
            .send()
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))?;

        let tx_hash = *pending.tx_hash();
        info!(
            tx_hash = %tx_hash,
            question_id = %tx.question_id,
            bond_wei = %tx.bond,
            "challenge transaction broadcast, waiting for receipt"
        );

        let receipt = pending
            .with_timeout(Some(self.receipt_timeout))
            .get_receipt()
            .await
            .map_err(|e| LedgerError::Unconfirmed {
                tx_hash,
                reason: e.to_string(),
            })?;

        Ok(MinedTx {
            tx_hash: receipt.transaction_hash,
            success: receipt.status(),
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
        })
    }
}
