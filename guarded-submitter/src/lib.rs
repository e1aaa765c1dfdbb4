//! # Guarded Submitter Library
//!
//! Submits state-changing calls to an EVM ledger only after the preconditions they need
//! hold, and reports them as successful only once they are confirmed.
//!
//! A run goes through precondition verification, exact-amount approvals, gas estimation,
//! signing, broadcast and bounded confirmation polling. Approval, liquidity addition,
//! swaps and staking deposits all share that one pipeline.
//!
//! ## Modules
//! - [`gateway`]: the [`Ledger`](gateway::Ledger) boundary and its JSON-RPC implementation.
//! - [`verifier`]: balance, amount and protocol-limit checks.
//! - [`allowance`]: idempotent exact-amount approvals.
//! - [`orchestrator`]: the per-call state machine from estimation to confirmation.
//! - [`operations`]: the approve, addLiquidity, swap and deposit drivers.
//! - [`pipeline`]: runs a driver end to end under a per-signer lock.

/// Contract bindings built with the sol macro.
pub mod contracts;

/// Ledger access: reads, estimation, broadcast and receipt polling.
pub mod gateway;

/// Deployment configuration, CLI argument groups and signer loading.
pub mod config;

/// Crate error type and its coarse [`ErrorKind`](error::ErrorKind) classification.
pub mod error;

/// Precondition checks run before any write.
pub mod verifier;

/// Approval of exactly the amount a leg requires.
pub mod allowance;

/// Estimates, signs, broadcasts and confirms a single call.
///
/// Each submission re-reads the signer's nonce right before signing and is broadcast at
/// most once. A missing receipt after the bounded wait is reported as indeterminate.
pub mod orchestrator;

/// Parameter sets of the supported operations.
pub mod operations;

/// End-to-end runs of an operation.
pub mod pipeline;
