//! Crate-level errors of a guarded run.

use alloy::primitives::{Address, TxHash, U256};
use snafu::Snafu;

use crate::gateway::GatewayError;
use crate::orchestrator::SubmitError;

/// Result alias used throughout the pipeline.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse classification of a failed run, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The ledger could not be reached, or answered for the wrong chain.
    Connectivity,
    /// Zero, too small or structurally malformed input, including a target address that
    /// does not answer the reads a token or staking contract must.
    InvalidAmount,
    /// The signer does not hold enough of a token.
    InsufficientBalance,
    /// A protocol limit would be exceeded, or the protocol refuses deposits.
    LimitExceeded,
    /// An approval was not submitted, not confirmed or not effective.
    Approval,
    /// The primary call would revert.
    Estimation,
    /// The primary call was signed but never broadcast.
    Submission,
    /// The primary call was included with failure status.
    Reverted,
    /// No receipt arrived in time. The transaction may still confirm.
    Timeout,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Connectivity => "ConnectivityError",
            ErrorKind::InvalidAmount => "InvalidAmountError",
            ErrorKind::InsufficientBalance => "InsufficientBalanceError",
            ErrorKind::LimitExceeded => "LimitExceededError",
            ErrorKind::Approval => "ApprovalError",
            ErrorKind::Estimation => "EstimationError",
            ErrorKind::Submission => "SubmissionError",
            ErrorKind::Reverted => "RevertedError",
            ErrorKind::Timeout => "TimeoutError",
        };
        f.write_str(name)
    }
}

/// Errors of a guarded run.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// The endpoint could not be reached or serves another chain.
    #[snafu(display("could not connect to {endpoint}: {source}"))]
    Connectivity {
        /// Configured endpoint.
        endpoint: String,
        /// The gateway failure.
        source: GatewayError,
    },

    /// A chain read failed.
    #[snafu(display("failed to read {subject}: {source}"))]
    Read {
        /// What was being read, and for which leg.
        subject: String,
        /// The gateway failure.
        source: GatewayError,
    },

    /// An amount is zero or below the operation's minimum.
    #[snafu(display("{leg} amount {amount} is invalid: must be at least {minimum}"))]
    InvalidAmount {
        /// The offending leg.
        leg: String,
        /// The requested amount.
        amount: U256,
        /// The smallest accepted amount.
        minimum: U256,
    },

    /// Operation parameters are structurally malformed, e.g. a swap route whose hops
    /// do not chain.
    #[snafu(display("malformed {operation} parameters: {reason}"))]
    MalformedInput {
        /// The operation name.
        operation: &'static str,
        /// What is wrong with the parameters.
        reason: String,
    },

    /// The signer holds less than a leg requires.
    #[snafu(display(
        "insufficient {leg} balance of token {token}: have {balance}, need {required}"
    ))]
    InsufficientBalance {
        /// The leg that is underfunded.
        leg: String,
        /// The token of that leg.
        token: Address,
        /// Balance at read time.
        balance: U256,
        /// Amount the leg requires.
        required: U256,
    },

    /// The per-account ceiling would be exceeded.
    #[snafu(display(
        "stake of {requested} exceeds the remaining limit {remaining} (limit {cap}, already staked {committed})"
    ))]
    LimitExceeded {
        /// Amount about to be staked.
        requested: U256,
        /// Per-account ceiling.
        cap: U256,
        /// Amount already staked by the signer.
        committed: U256,
        /// Room left under the ceiling, clamped at zero.
        remaining: U256,
    },

    /// The contract reports itself paused.
    #[snafu(display("{contract} is paused"))]
    Paused {
        /// The paused contract.
        contract: Address,
    },

    /// The staking contract accepts a different token.
    #[snafu(display("{staking} stakes token {actual}, not {expected}"))]
    StakingTokenMismatch {
        /// The staking contract.
        staking: Address,
        /// Token the caller meant to stake.
        expected: Address,
        /// Token the contract reports.
        actual: Address,
    },

    /// The approval transaction failed at some stage.
    #[snafu(display("approval of {required} on {token} for {spender} failed: {source}"))]
    Approval {
        /// The token being approved.
        token: Address,
        /// The approved spender.
        spender: Address,
        /// The amount being approved.
        required: U256,
        /// The orchestrator failure.
        source: SubmitError,
    },

    /// The approval confirmed but the allowance is still too low.
    #[snafu(display(
        "approval {tx_hash} on {token} confirmed but allowance is {allowance}, need {required}"
    ))]
    ApprovalNotEffective {
        /// The token that was approved.
        token: Address,
        /// The confirmed approval.
        tx_hash: TxHash,
        /// Allowance read after confirmation.
        allowance: U256,
        /// Amount the leg requires.
        required: U256,
    },

    /// The primary call failed at some stage.
    #[snafu(display("{operation} failed: {source}"))]
    Submit {
        /// The operation name.
        operation: &'static str,
        /// The orchestrator failure.
        source: SubmitError,
    },
}

impl Error {
    /// The coarse classification of this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connectivity { .. } => ErrorKind::Connectivity,
            Error::Read { source, .. } if source.is_connectivity() => ErrorKind::Connectivity,
            Error::Read { .. } => ErrorKind::InvalidAmount,
            Error::InvalidAmount { .. }
            | Error::MalformedInput { .. }
            | Error::StakingTokenMismatch { .. } => ErrorKind::InvalidAmount,
            Error::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            Error::LimitExceeded { .. } | Error::Paused { .. } => ErrorKind::LimitExceeded,
            Error::Approval { .. } | Error::ApprovalNotEffective { .. } => ErrorKind::Approval,
            Error::Submit { source, .. } => match source {
                SubmitError::Estimation { source, .. } if source.is_rejection() => {
                    ErrorKind::Estimation
                }
                SubmitError::Signing { .. } => ErrorKind::Submission,
                SubmitError::Broadcast { source, .. } if source.is_rejection() => {
                    ErrorKind::Submission
                }
                SubmitError::Estimation { .. }
                | SubmitError::Broadcast { .. }
                | SubmitError::Nonce { .. }
                | SubmitError::ReceiptPoll { .. } => ErrorKind::Connectivity,
                SubmitError::Reverted { .. } => ErrorKind::Reverted,
                SubmitError::Timeout { .. } => ErrorKind::Timeout,
            },
        }
    }

    /// The transaction hash a caller should follow up on, if one was broadcast.
    pub fn tx_hash(&self) -> Option<TxHash> {
        match self {
            Error::Approval { source, .. } | Error::Submit { source, .. } => source.tx_hash(),
            Error::ApprovalNotEffective { tx_hash, .. } => Some(*tx_hash),
            _ => None,
        }
    }

    /// Whether a broadcast transaction may still confirm after this failure.
    pub fn is_indeterminate(&self) -> bool {
        match self {
            Error::Approval { source, .. } | Error::Submit { source, .. } => {
                source.is_indeterminate()
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use alloy::primitives::{address, b256};

    use super::*;

    const HASH: TxHash = b256!("5c504ed432cb51138bcf09aa5e8a410dd4a1e204ef84bfed1be16dfba1b22060");

    #[test]
    fn primary_call_failures_map_to_their_kinds() {
        let submit = |source| Error::Submit {
            operation: "deposit",
            source,
        };

        let estimation = submit(SubmitError::Estimation {
            label: "deposit".into(),
            source: GatewayError::Rejected {
                operation: "eth_estimateGas",
                message: "execution reverted".into(),
            },
        });
        assert_eq!(estimation.kind(), ErrorKind::Estimation);
        assert_eq!(estimation.tx_hash(), None);

        let refused = submit(SubmitError::Broadcast {
            label: "deposit".into(),
            source: GatewayError::Rejected {
                operation: "eth_sendRawTransaction",
                message: "nonce too low".into(),
            },
        });
        assert_eq!(refused.kind(), ErrorKind::Submission);

        let reverted = submit(SubmitError::Reverted {
            label: "deposit".into(),
            tx_hash: HASH,
            block_number: Some(7),
        });
        assert_eq!(reverted.kind(), ErrorKind::Reverted);
        assert_eq!(reverted.tx_hash(), Some(HASH));
        assert!(!reverted.is_indeterminate());

        let timeout = submit(SubmitError::Timeout {
            label: "deposit".into(),
            tx_hash: HASH,
            waited: Duration::from_secs(120),
        });
        assert_eq!(timeout.kind(), ErrorKind::Timeout);
        assert_eq!(timeout.tx_hash(), Some(HASH));
        assert!(timeout.is_indeterminate());
    }

    #[test]
    fn a_lost_receipt_poll_is_indeterminate_connectivity() {
        let err = Error::Submit {
            operation: "swap",
            source: SubmitError::ReceiptPoll {
                label: "swap".into(),
                tx_hash: HASH,
                source: GatewayError::Unreachable {
                    operation: "eth_getTransactionReceipt",
                    message: "connection reset".into(),
                },
            },
        };
        assert_eq!(err.kind(), ErrorKind::Connectivity);
        assert_eq!(err.tx_hash(), Some(HASH));
        assert!(err.is_indeterminate());
    }

    #[test]
    fn an_estimation_cut_off_by_the_endpoint_is_connectivity() {
        let err = Error::Submit {
            operation: "deposit",
            source: SubmitError::Estimation {
                label: "deposit".into(),
                source: GatewayError::Unreachable {
                    operation: "eth_estimateGas",
                    message: "connection refused".into(),
                },
            },
        };
        assert_eq!(err.kind(), ErrorKind::Connectivity);
        assert!(!err.is_indeterminate());
    }

    #[test]
    fn read_failures_split_between_endpoint_and_input() {
        let read = |source| Error::Read {
            subject: "tokenA balance".into(),
            source,
        };

        let offline = read(GatewayError::Unreachable {
            operation: "eth_call",
            message: "connection refused".into(),
        });
        assert_eq!(offline.kind(), ErrorKind::Connectivity);

        let reverted = read(GatewayError::Rejected {
            operation: "eth_call",
            message: "execution reverted".into(),
        });
        assert_eq!(reverted.kind(), ErrorKind::InvalidAmount);

        let no_code = read(GatewayError::Decode {
            operation: "balanceOf",
            source: alloy::sol_types::Error::Overrun,
        });
        assert_eq!(no_code.kind(), ErrorKind::InvalidAmount);
    }

    #[test]
    fn approval_failures_carry_the_approval_hash() {
        let err = Error::Approval {
            token: address!("2d65b197f04109724dfac2ec74775190eac7af7d"),
            spender: address!("91ad32cc40e14c3e2d843aaaa51635a11a022465"),
            required: U256::from(500),
            source: SubmitError::Reverted {
                label: "approve".into(),
                tx_hash: HASH,
                block_number: None,
            },
        };
        assert_eq!(err.kind(), ErrorKind::Approval);
        assert_eq!(err.tx_hash(), Some(HASH));
        assert_eq!(err.kind().to_string(), "ApprovalError");
    }
}
