//! # Transaction Orchestrator
//!
//! Drives a single contract call through
//! `Built → Estimated → Signed → Submitted → Confirmed | Failed`.
//!
//! - **Estimation** doubles as a dry run: a call that would revert is rejected by the
//!   node here, before any gas is spent.
//! - **Signing** pads the estimate with the configured [`GasMultiplier`], reads the
//!   signer's nonce immediately before building, and signs a legacy transaction with the
//!   configured gas price and chain id.
//! - **Submission** broadcasts the signed bytes exactly once. A broadcast transaction is
//!   never re-sent.
//! - **Confirmation** polls for the receipt for a bounded time. A receipt with failed
//!   status is reported as [`SubmitError::Reverted`]; no receipt within the bound is
//!   reported as [`SubmitError::Timeout`], which is indeterminate.
//!
//! [`GasMultiplier`]: crate::config::GasMultiplier

use std::sync::Arc;
use std::time::Duration;

use alloy::eips::eip2718::Encodable2718;
use alloy::network::{Ethereum, EthereumWallet, TransactionBuilder, TransactionBuilderError};
use alloy::primitives::{Address, Bytes, TxHash};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use log::{debug, error, info, warn};
use snafu::{ResultExt, Snafu};

use crate::config::PipelineConfig;
use crate::gateway::{ContractCall, GatewayError, Ledger, Receipt};

/// Stage of a single call inside the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TxStage {
    /// Calldata is encoded, nothing has been sent.
    Built,
    /// The gas limit is known.
    Estimated,
    /// The transaction is signed but not broadcast.
    Signed,
    /// The transaction was broadcast and has a hash.
    Submitted,
    /// A receipt with success status was observed.
    Confirmed,
}

/// How the gas limit of a call is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasPolicy {
    /// Estimate and pad with the configured multiplier.
    Estimate,
    /// Use a fixed limit and skip estimation.
    Fixed(u64),
}

/// An unsigned call descriptor with every field needed for signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransaction {
    /// Signer address.
    pub from: Address,
    /// Target contract.
    pub to: Address,
    /// Signer nonce read right before building.
    pub nonce: u64,
    /// Padded or fixed gas limit.
    pub gas_limit: u64,
    /// Legacy gas price in wei.
    pub gas_price: u128,
    /// Chain id for replay protection.
    pub chain_id: u64,
    /// ABI-encoded calldata.
    pub input: Bytes,
}

impl From<PendingTransaction> for TransactionRequest {
    fn from(pending: PendingTransaction) -> Self {
        TransactionRequest::default()
            .with_from(pending.from)
            .with_to(pending.to)
            .with_nonce(pending.nonce)
            .with_gas_limit(pending.gas_limit)
            .with_gas_price(pending.gas_price)
            .with_chain_id(pending.chain_id)
            .with_input(pending.input)
    }
}

/// A signed, EIP-2718 encoded transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    /// Hash the ledger will know the transaction by.
    pub hash: TxHash,
    /// Encoded bytes ready for broadcast.
    pub raw: Bytes,
}

/// A call that was included with success status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    /// Hash of the confirmed transaction.
    pub tx_hash: TxHash,
    /// Gas limit the transaction was signed with.
    pub gas_limit: u64,
    /// The success receipt.
    pub receipt: Receipt,
}

/// Failures of a single orchestrated call.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SubmitError {
    /// Gas estimation failed; the call would revert or the node is unreachable.
    #[snafu(display("gas estimation for {label} failed: {source}"))]
    Estimation {
        /// Call label.
        label: String,
        /// The gateway failure.
        source: GatewayError,
    },

    /// The signer's nonce could not be read.
    #[snafu(display("could not read nonce for {label}: {source}"))]
    Nonce {
        /// Call label.
        label: String,
        /// The gateway failure.
        source: GatewayError,
    },

    /// The transaction could not be signed.
    #[snafu(display("signing {label} failed: {source}"))]
    Signing {
        /// Call label.
        label: String,
        /// The builder failure.
        source: TransactionBuilderError<Ethereum>,
    },

    /// The node refused the signed transaction or was unreachable at broadcast.
    #[snafu(display("broadcast of {label} failed: {source}"))]
    Broadcast {
        /// Call label.
        label: String,
        /// The gateway failure.
        source: GatewayError,
    },

    /// Receipt polling failed after broadcast; the transaction may still confirm.
    #[snafu(display("lost track of {label} ({tx_hash}) while waiting for its receipt: {source}"))]
    ReceiptPoll {
        /// Call label.
        label: String,
        /// The broadcast hash.
        tx_hash: TxHash,
        /// The gateway failure.
        source: GatewayError,
    },

    /// The transaction was included but execution reverted.
    #[snafu(display("{label} ({tx_hash}) was included in block {block_number:?} but reverted"))]
    Reverted {
        /// Call label.
        label: String,
        /// The included hash.
        tx_hash: TxHash,
        /// Including block, if reported.
        block_number: Option<u64>,
    },

    /// No receipt appeared within the bound. The transaction may still confirm.
    #[snafu(display("no receipt for {label} ({tx_hash}) after {waited:?}; it may still confirm"))]
    Timeout {
        /// Call label.
        label: String,
        /// The broadcast hash.
        tx_hash: TxHash,
        /// How long the orchestrator waited.
        waited: Duration,
    },
}

impl SubmitError {
    /// The last stage the call reached before failing.
    pub fn stage(&self) -> TxStage {
        match self {
            SubmitError::Estimation { .. } => TxStage::Built,
            SubmitError::Nonce { .. } | SubmitError::Signing { .. } => TxStage::Estimated,
            SubmitError::Broadcast { .. } => TxStage::Signed,
            SubmitError::ReceiptPoll { .. }
            | SubmitError::Reverted { .. }
            | SubmitError::Timeout { .. } => TxStage::Submitted,
        }
    }

    /// The broadcast hash, if the call got that far.
    pub fn tx_hash(&self) -> Option<TxHash> {
        match self {
            SubmitError::ReceiptPoll { tx_hash, .. }
            | SubmitError::Reverted { tx_hash, .. }
            | SubmitError::Timeout { tx_hash, .. } => Some(*tx_hash),
            _ => None,
        }
    }

    /// Whether the final fate of a broadcast transaction is unknown.
    pub fn is_indeterminate(&self) -> bool {
        matches!(
            self,
            SubmitError::Timeout { .. } | SubmitError::ReceiptPoll { .. }
        )
    }
}

/// Estimates, signs, broadcasts and confirms calls for one signer.
pub struct Orchestrator<L: ?Sized> {
    ledger: Arc<L>,
    wallet: EthereumWallet,
    sender: Address,
    config: PipelineConfig,
}

impl<L: Ledger + ?Sized> Orchestrator<L> {
    /// Creates an orchestrator that signs with `signer`.
    pub fn new(ledger: Arc<L>, signer: PrivateKeySigner, config: PipelineConfig) -> Self {
        let sender = signer.address();
        Self {
            ledger,
            wallet: EthereumWallet::from(signer),
            sender,
            config,
        }
    }

    /// The signer address.
    pub fn sender(&self) -> Address {
        self.sender
    }

    /// The ledger the orchestrator submits to.
    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// The deployment configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs `call` through every stage until it is confirmed or fails.
    pub async fn submit(
        &self,
        call: &ContractCall,
        gas: GasPolicy,
    ) -> Result<Confirmation, SubmitError> {
        let label = call.label.as_str();
        let mut stage = TxStage::Built;

        let gas_limit = self.gas_limit(call, gas).await?;
        advance(label, &mut stage, TxStage::Estimated);

        let nonce = self
            .ledger
            .nonce(self.sender)
            .await
            .context(NonceSnafu { label })?;
        let pending = PendingTransaction {
            from: self.sender,
            to: call.to,
            nonce,
            gas_limit,
            gas_price: self.config.gas_price,
            chain_id: self.config.chain_id,
            input: call.input.clone(),
        };
        debug!(
            "{label}: nonce {nonce}, gas limit {gas_limit}, gas price {} wei, chain id {}",
            pending.gas_price, pending.chain_id
        );
        let signed = self.sign(label, pending).await?;
        advance(label, &mut stage, TxStage::Signed);

        let tx_hash = match self.ledger.send_raw_transaction(&signed.raw).await {
            Ok(tx_hash) => tx_hash,
            Err(source) => {
                error!("❌ {label}: broadcast refused: {source}");
                return Err(SubmitError::Broadcast {
                    label: label.to_string(),
                    source,
                });
            }
        };
        if tx_hash != signed.hash {
            warn!(
                "⚠️ {label}: node reported hash {tx_hash}, locally computed {}",
                signed.hash
            );
        }
        advance(label, &mut stage, TxStage::Submitted);
        info!("📡 {label} broadcast: {tx_hash}");

        let receipt = self
            .ledger
            .wait_for_receipt(
                tx_hash,
                self.config.confirmation_timeout,
                self.config.poll_interval,
            )
            .await
            .context(ReceiptPollSnafu { label, tx_hash })?;

        match receipt {
            None => {
                warn!(
                    "⏱️ {label}: no receipt for {tx_hash} after {:?}; it may still confirm",
                    self.config.confirmation_timeout
                );
                Err(SubmitError::Timeout {
                    label: label.to_string(),
                    tx_hash,
                    waited: self.config.confirmation_timeout,
                })
            }
            Some(receipt) if !receipt.success => {
                error!(
                    "❌ {label}: {tx_hash} reverted in block {:?}",
                    receipt.block_number
                );
                Err(SubmitError::Reverted {
                    label: label.to_string(),
                    tx_hash,
                    block_number: receipt.block_number,
                })
            }
            Some(receipt) => {
                advance(label, &mut stage, TxStage::Confirmed);
                info!(
                    "✅ {label} confirmed in block {:?}: {tx_hash} (gas used {})",
                    receipt.block_number, receipt.gas_used
                );
                Ok(Confirmation {
                    tx_hash,
                    gas_limit,
                    receipt,
                })
            }
        }
    }

    async fn gas_limit(&self, call: &ContractCall, gas: GasPolicy) -> Result<u64, SubmitError> {
        let label = call.label.as_str();
        match gas {
            GasPolicy::Fixed(limit) => Ok(limit),
            GasPolicy::Estimate => {
                let estimate = match self.ledger.estimate_gas(self.sender, call).await {
                    Ok(estimate) => estimate,
                    Err(source) => {
                        error!("❌ {label}: gas estimation failed, the call would not succeed: {source}");
                        return Err(SubmitError::Estimation {
                            label: label.to_string(),
                            source,
                        });
                    }
                };
                let padded = self.config.gas_multiplier.apply(estimate);
                debug!(
                    "{label}: estimated gas {estimate}, padded by {} to {padded}",
                    self.config.gas_multiplier
                );
                Ok(padded)
            }
        }
    }

    async fn sign(
        &self,
        label: &str,
        pending: PendingTransaction,
    ) -> Result<SignedTransaction, SubmitError> {
        let request: TransactionRequest = pending.into();
        let envelope = request
            .build(&self.wallet)
            .await
            .context(SigningSnafu { label })?;

        Ok(SignedTransaction {
            hash: *envelope.tx_hash(),
            raw: envelope.encoded_2718().into(),
        })
    }
}

fn advance(label: &str, stage: &mut TxStage, next: TxStage) {
    debug!("{label}: {stage:?} -> {next:?}");
    *stage = next;
}
