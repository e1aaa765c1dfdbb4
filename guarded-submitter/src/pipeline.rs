//! # Guarded Pipeline
//!
//! Runs an [`Operation`] end to end:
//!
//! 1. structural validation of the parameters,
//! 2. amount and balance verification of every leg, then the protocol checks,
//! 3. an exact-amount approval per leg whose allowance is short,
//! 4. the primary call through the [`Orchestrator`].
//!
//! Every leg and check is verified before the first approval is sent. The signer's lock
//! is held for the whole run, so two runs for one signer never race for a nonce.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use alloy::primitives::{Address, TxHash};
use alloy::signers::local::PrivateKeySigner;
use log::{debug, info};
use snafu::ResultExt;
use tokio::sync::OwnedMutexGuard;

use crate::allowance::ensure_allowance;
use crate::config::PipelineConfig;
use crate::error::{ConnectivitySnafu, Result, SubmitSnafu};
use crate::gateway::rpc::RpcLedger;
use crate::gateway::{verify_connection, Ledger};
use crate::operations::{unix_now, Operation};
use crate::orchestrator::{Confirmation, GasPolicy, Orchestrator};
use crate::verifier::{verify_leg, verify_protocol};

/// Registry of per-signer locks serializing nonce-dependent writes.
#[derive(Debug, Default)]
pub struct SignerLocks {
    locks: Mutex<HashMap<Address, Arc<tokio::sync::Mutex<()>>>>,
}

impl SignerLocks {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive use of `signer`. The signer is released when the guard drops.
    ///
    /// Entries that no run holds or waits on are pruned, so the registry only tracks
    /// signers in use.
    pub async fn acquire(&self, signer: Address) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(signer).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct OperationOutcome {
    /// The operation name.
    pub operation: &'static str,
    /// Approvals sent during the run, in order.
    pub approvals: Vec<TxHash>,
    /// The confirmed primary call, absent for approval-only operations.
    pub primary: Option<Confirmation>,
}

impl OperationOutcome {
    /// Every transaction the run confirmed, approvals first.
    pub fn tx_hashes(&self) -> Vec<TxHash> {
        self.approvals
            .iter()
            .copied()
            .chain(self.primary.as_ref().map(|c| c.tx_hash))
            .collect()
    }
}

/// Runs guarded operations for a single signer.
pub struct GuardedPipeline<L: ?Sized> {
    orchestrator: Orchestrator<L>,
    locks: Arc<SignerLocks>,
}

impl GuardedPipeline<RpcLedger> {
    /// Connects to `config.endpoint`, verifying liveness and chain id before returning.
    pub async fn connect(signer: PrivateKeySigner, config: PipelineConfig) -> Result<Self> {
        let ledger = RpcLedger::new(config.endpoint.clone());
        Self::open(Arc::new(ledger), signer, config).await
    }
}

impl<L: Ledger + ?Sized> GuardedPipeline<L> {
    /// Verifies that `ledger` is live and serves `config.chain_id`, then creates a
    /// pipeline over it. Fails with [`ErrorKind::Connectivity`](crate::error::ErrorKind)
    /// before any operation can run.
    pub async fn open(
        ledger: Arc<L>,
        signer: PrivateKeySigner,
        config: PipelineConfig,
    ) -> Result<Self> {
        let block = verify_connection(ledger.as_ref(), config.chain_id)
            .await
            .context(ConnectivitySnafu {
                endpoint: config.endpoint.to_string(),
            })?;
        info!(
            "🔗 Connected to {} (chain id {}, latest block {block})",
            config.endpoint, config.chain_id
        );
        Ok(Self::new(ledger, signer, config))
    }

    /// Creates a pipeline over an already connected ledger.
    pub fn new(ledger: Arc<L>, signer: PrivateKeySigner, config: PipelineConfig) -> Self {
        Self {
            orchestrator: Orchestrator::new(ledger, signer, config),
            locks: Arc::default(),
        }
    }

    /// Shares `locks` with other pipelines that may use the same signer.
    pub fn with_locks(mut self, locks: Arc<SignerLocks>) -> Self {
        self.locks = locks;
        self
    }

    /// The signer address.
    pub fn signer(&self) -> Address {
        self.orchestrator.sender()
    }

    /// Runs `operation` to completion.
    ///
    /// Nothing is retried. After a failure the caller may re-run the whole operation;
    /// approvals that already landed are then detected and not repeated.
    pub async fn run(&self, operation: &dyn Operation) -> Result<OperationOutcome> {
        let name = operation.name();
        let signer = self.signer();
        operation.validate()?;

        let _guard = self.locks.acquire(signer).await;
        info!("🚀 Running {name} as {signer}");

        let ledger = self.orchestrator.ledger();
        let legs = operation.legs();
        for leg in &legs {
            verify_leg(ledger, signer, leg).await?;
        }
        for check in operation.protocol_checks() {
            verify_protocol(ledger, signer, &check).await?;
        }
        debug!("{name}: preconditions hold for {} leg(s)", legs.len());

        let mut approvals = Vec::new();
        for leg in &legs {
            if let Some(tx_hash) =
                ensure_allowance(&self.orchestrator, leg.token, leg.spender, leg.amount).await?
            {
                approvals.push(tx_hash);
            }
        }

        let primary = match operation.primary_call(unix_now()) {
            Some(call) => Some(
                self.orchestrator
                    .submit(&call, GasPolicy::Estimate)
                    .await
                    .context(SubmitSnafu { operation: name })?,
            ),
            None => None,
        };

        info!("✅ {name} complete");
        Ok(OperationOutcome {
            operation: name,
            approvals,
            primary,
        })
    }
}
