//! # Ledger Gateway
//!
//! The boundary between the submission pipeline and the remote EVM ledger.
//!
//! Everything the pipeline needs from the chain goes through the [`Ledger`] trait:
//! token reads, `eth_call`, gas estimation, nonce lookup, raw broadcast and receipt
//! lookup. The trait keeps no state beyond the connection handle of its implementor.
//!
//! Two operations are layered on top of the raw trait methods:
//! - [`Ledger::wait_for_receipt`] polls for a receipt until one appears or a bounded
//!   wait elapses. It never blocks indefinitely.
//! - [`try_read`] is the capability probe used for optional contract views. A view that
//!   reverts or returns undecodable data yields `Ok(None)` instead of an error, so callers
//!   can branch on the absence of the view explicitly.

use std::time::Duration;

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, BlockHash, Bytes, TxHash, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use log::{debug, warn};
use snafu::{ensure, ResultExt, Snafu};

use crate::contracts::IERC20;

#[cfg(test)]
pub(crate) mod mock;
pub mod rpc;

/// An encoded call against a single contract.
///
/// The same descriptor is used for read-only `eth_call`s, gas estimation and, once
/// the orchestrator has filled in nonce and gas, for the signed transaction itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    /// Human readable name of the call, used in logs and error context.
    pub label: String,
    /// The contract the call targets.
    pub to: Address,
    /// ABI-encoded calldata.
    pub input: Bytes,
}

impl ContractCall {
    /// Encodes a `sol!` call against `to`.
    pub fn encode<C: SolCall>(label: impl Into<String>, to: Address, call: &C) -> Self {
        Self {
            label: label.into(),
            to,
            input: call.abi_encode().into(),
        }
    }

    /// The 4-byte function selector of this call, if the calldata carries one.
    pub fn selector(&self) -> Option<[u8; 4]> {
        self.input.get(..4).and_then(|s| s.try_into().ok())
    }

    /// Builds an unsigned request for this call, optionally attributed to `from`.
    pub fn request(&self, from: Option<Address>) -> TransactionRequest {
        let request = TransactionRequest::default()
            .with_to(self.to)
            .with_input(self.input.clone());
        match from {
            Some(from) => request.with_from(from),
            None => request,
        }
    }
}

/// Terminal record of an included transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    /// Hash of the included transaction.
    pub tx_hash: TxHash,
    /// Whether execution succeeded (`status == 1`).
    pub success: bool,
    /// Number of the including block.
    pub block_number: Option<u64>,
    /// Hash of the including block.
    pub block_hash: Option<BlockHash>,
    /// Gas consumed by execution.
    pub gas_used: u64,
}

/// Errors surfaced by a [`Ledger`] implementation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum GatewayError {
    /// The endpoint could not be reached or the transport failed mid-request.
    #[snafu(display("ledger endpoint unreachable during {operation}: {message}"))]
    Unreachable {
        /// The RPC operation that was attempted.
        operation: &'static str,
        /// Transport error message.
        message: String,
    },

    /// The node answered with an error response.
    ///
    /// This covers reverted calls and estimations as well as broadcast refusals such as
    /// underpriced gas or a stale nonce.
    #[snafu(display("ledger rejected {operation}: {message}"))]
    Rejected {
        /// The RPC operation that was attempted.
        operation: &'static str,
        /// Error message returned by the node.
        message: String,
    },

    /// Return data did not match the expected ABI shape.
    #[snafu(display("could not decode {operation} return data: {source}"))]
    Decode {
        /// The call whose return data was decoded.
        operation: &'static str,
        /// The underlying ABI error.
        source: alloy::sol_types::Error,
    },

    /// The endpoint serves a different chain than the one configured.
    #[snafu(display("endpoint serves chain id {actual}, expected {expected}"))]
    ChainMismatch {
        /// Configured chain id.
        expected: u64,
        /// Chain id reported by the node.
        actual: u64,
    },
}

impl GatewayError {
    /// Whether the node itself refused the request (as opposed to a transport failure).
    pub fn is_rejection(&self) -> bool {
        matches!(self, GatewayError::Rejected { .. })
    }

    /// Whether the failure lies with the endpoint rather than with the request.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            GatewayError::Unreachable { .. } | GatewayError::ChainMismatch { .. }
        )
    }
}

/// Read and write primitives against the remote ledger.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Latest block number. Used as the liveness probe.
    async fn block_number(&self) -> Result<u64, GatewayError>;

    /// Chain id served by the endpoint.
    async fn chain_id(&self) -> Result<u64, GatewayError>;

    /// Executes `call` with `eth_call` against the latest block.
    async fn call(&self, from: Option<Address>, call: &ContractCall)
        -> Result<Bytes, GatewayError>;

    /// Estimates gas for `call` sent by `from`. A call that would revert is rejected.
    async fn estimate_gas(&self, from: Address, call: &ContractCall) -> Result<u64, GatewayError>;

    /// Current transaction count of `account`.
    async fn nonce(&self, account: Address) -> Result<u64, GatewayError>;

    /// Broadcasts an EIP-2718 encoded signed transaction and returns its hash.
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, GatewayError>;

    /// Looks up the receipt of `hash`; `None` until the transaction is included.
    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<Receipt>, GatewayError>;

    /// ERC20 `balanceOf(owner)` on `token`.
    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256, GatewayError> {
        let call = ContractCall::encode("balanceOf", token, &IERC20::balanceOfCall { owner });
        let data = self.call(None, &call).await?;
        let decoded = IERC20::balanceOfCall::abi_decode_returns(&data, true)
            .context(DecodeSnafu { operation: "balanceOf" })?;
        Ok(decoded.balance)
    }

    /// ERC20 `allowance(owner, spender)` on `token`.
    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, GatewayError> {
        let call = ContractCall::encode(
            "allowance",
            token,
            &IERC20::allowanceCall { owner, spender },
        );
        let data = self.call(None, &call).await?;
        let decoded = IERC20::allowanceCall::abi_decode_returns(&data, true)
            .context(DecodeSnafu { operation: "allowance" })?;
        Ok(decoded.remaining)
    }

    /// Polls for the receipt of `hash` every `poll_interval` until it is found or
    /// `timeout` elapses.
    ///
    /// Returns `Ok(None)` when the wait elapses. The transaction may still be included
    /// later; callers must treat that outcome as indeterminate. A transport failure on a
    /// single poll is logged and polling continues; the failure is returned only if the
    /// last poll before the deadline also failed.
    async fn wait_for_receipt(
        &self,
        hash: TxHash,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Option<Receipt>, GatewayError> {
        let mut last_failure = None;
        let poll = async {
            loop {
                match self.transaction_receipt(hash).await {
                    Ok(Some(receipt)) => return Ok::<_, GatewayError>(receipt),
                    Ok(None) => {
                        last_failure = None;
                        debug!("⏳ No receipt yet for {hash}");
                    }
                    Err(e @ GatewayError::Unreachable { .. }) => {
                        warn!("⚠️ Receipt poll for {hash} failed, retrying: {e}");
                        last_failure = Some(e);
                    }
                    Err(e) => return Err(e),
                }
                tokio::time::sleep(poll_interval).await;
            }
        };

        let outcome = tokio::time::timeout(timeout, poll).await;
        match (outcome, last_failure) {
            (Ok(result), _) => result.map(Some),
            (Err(_), Some(failure)) => Err(failure),
            (Err(_), None) => Ok(None),
        }
    }
}

/// Checks that `ledger` is live and serves `expected_chain_id`.
///
/// Returns the latest block number. Any transport failure surfaces as
/// [`GatewayError::Unreachable`], a foreign chain as [`GatewayError::ChainMismatch`].
pub async fn verify_connection<L>(ledger: &L, expected_chain_id: u64) -> Result<u64, GatewayError>
where
    L: Ledger + ?Sized,
{
    let block = ledger.block_number().await?;
    let chain_id = ledger.chain_id().await?;
    ensure!(
        chain_id == expected_chain_id,
        ChainMismatchSnafu {
            expected: expected_chain_id,
            actual: chain_id,
        }
    );
    debug!("chain id {chain_id} verified at block {block}");
    Ok(block)
}

/// Reads an optional view, returning `Ok(None)` when the target does not expose it.
///
/// A view counts as unavailable when the node rejects the call (revert, missing
/// function) or when the return data cannot be decoded. Transport failures are not
/// absorbed and still propagate.
pub async fn try_read<L, C>(ledger: &L, to: Address, call: C) -> Result<Option<C::Return>, GatewayError>
where
    L: Ledger + ?Sized,
    C: SolCall,
{
    let name = C::SIGNATURE;
    let contract_call = ContractCall::encode(name, to, &call);

    match ledger.call(None, &contract_call).await {
        Ok(data) => match C::abi_decode_returns(&data, true) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("⚠️ {name} on {to} returned undecodable data ({e}), treating it as unavailable");
                Ok(None)
            }
        },
        Err(GatewayError::Rejected { message, .. }) => {
            warn!("⚠️ {name} is not available on {to}: {message}");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
