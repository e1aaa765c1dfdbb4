//! In-memory [`Ledger`] used by unit tests.
//!
//! Signed transactions are decoded and applied to local state: approvals update the
//! allowance table, deposits update the staked balance, and every accepted transaction
//! consumes the sender's nonce. Estimation reverts, failed inclusions, withheld
//! receipts, dropped receipt polls, refused broadcasts and a foreign chain id can be
//! scripted.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use alloy::consensus::{Transaction, TxEnvelope};
use alloy::eips::eip2718::Decodable2718;
use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::sol_types::{SolCall, SolValue};
use async_trait::async_trait;

use super::{ContractCall, GatewayError, Ledger, Receipt};
use crate::config::PipelineConfig;
use crate::contracts::{IERC20, IStaking};

/// A transaction accepted by [`MockLedger::send_raw_transaction`].
#[derive(Debug, Clone)]
pub(crate) struct SubmittedTx {
    pub hash: TxHash,
    pub to: Option<Address>,
    pub selector: [u8; 4],
    pub input: Bytes,
    pub nonce: u64,
    pub gas_limit: u64,
    pub gas_price: Option<u128>,
    pub chain_id: Option<u64>,
}

#[derive(Default)]
struct State {
    balances: HashMap<(Address, Address), U256>,
    allowances: HashMap<(Address, Address, Address), U256>,
    views: HashMap<(Address, [u8; 4]), Bytes>,
    nonce: u64,
    block: u64,
    chain_id: u64,
    gas_estimate: u64,
    estimations: usize,
    revert_estimation: HashSet<[u8; 4]>,
    fail_inclusion: HashSet<[u8; 4]>,
    withhold_receipts: bool,
    dropped_receipt_polls: usize,
    ignore_approvals: bool,
    refuse_broadcasts: Option<String>,
    unreachable: bool,
    submitted: Vec<SubmittedTx>,
    receipts: HashMap<TxHash, Receipt>,
}

/// A scripted single-signer ledger.
pub(crate) struct MockLedger {
    owner: Address,
    state: Mutex<State>,
}

impl MockLedger {
    /// Creates an empty ledger whose transactions are all attributed to `owner`.
    pub fn new(owner: Address) -> Self {
        Self {
            owner,
            state: Mutex::new(State {
                block: 1_000,
                chain_id: Self::config().chain_id,
                gas_estimate: 50_000,
                ..State::default()
            }),
        }
    }

    /// Configuration matching the mock's chain.
    pub fn config() -> PipelineConfig {
        PipelineConfig {
            chain_id: 43113,
            gas_price: 2,
            confirmation_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(500),
            ..PipelineConfig::default()
        }
    }

    pub fn set_balance(&self, token: Address, holder: Address, amount: U256) {
        self.lock().balances.insert((token, holder), amount);
    }

    pub fn set_allowance(&self, token: Address, owner: Address, spender: Address, amount: U256) {
        self.lock().allowances.insert((token, owner, spender), amount);
    }

    pub fn allowance_of(&self, token: Address, owner: Address, spender: Address) -> U256 {
        self.lock()
            .allowances
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or_default()
    }

    /// Makes `contract` answer the view with `selector` with `returns`.
    pub fn expose_view(&self, contract: Address, selector: [u8; 4], returns: Vec<u8>) {
        self.lock()
            .views
            .insert((contract, selector), returns.into());
    }

    pub fn set_gas_estimate(&self, gas: u64) {
        self.lock().gas_estimate = gas;
    }

    pub fn revert_estimation_of(&self, selector: [u8; 4]) {
        self.lock().revert_estimation.insert(selector);
    }

    pub fn fail_inclusion_of(&self, selector: [u8; 4]) {
        self.lock().fail_inclusion.insert(selector);
    }

    /// Includes approvals successfully without updating the allowance table.
    pub fn ignore_approvals(&self) {
        self.lock().ignore_approvals = true;
    }

    pub fn withhold_receipts(&self) {
        self.lock().withhold_receipts = true;
    }

    /// Fails the next `count` receipt lookups with a transport error.
    pub fn drop_receipt_polls(&self, count: usize) {
        self.lock().dropped_receipt_polls = count;
    }

    /// Answers `eth_chainId` with `chain_id` instead of the configured chain.
    pub fn serve_chain(&self, chain_id: u64) {
        self.lock().chain_id = chain_id;
    }

    pub fn refuse_broadcasts(&self, message: &str) {
        self.lock().refuse_broadcasts = Some(message.to_string());
    }

    pub fn go_offline(&self) {
        self.lock().unreachable = true;
    }

    pub fn submitted(&self) -> Vec<SubmittedTx> {
        self.lock().submitted.clone()
    }

    pub fn estimations(&self) -> usize {
        self.lock().estimations
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("mock ledger state poisoned")
    }

    fn ensure_reachable(&self, operation: &'static str) -> Result<(), GatewayError> {
        if self.lock().unreachable {
            return Err(GatewayError::Unreachable {
                operation,
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

fn reverted(operation: &'static str) -> GatewayError {
    GatewayError::Rejected {
        operation,
        message: "execution reverted".to_string(),
    }
}

#[async_trait]
impl Ledger for MockLedger {
    async fn block_number(&self) -> Result<u64, GatewayError> {
        self.ensure_reachable("eth_blockNumber")?;
        Ok(self.lock().block)
    }

    async fn chain_id(&self) -> Result<u64, GatewayError> {
        self.ensure_reachable("eth_chainId")?;
        Ok(self.lock().chain_id)
    }

    async fn call(
        &self,
        _from: Option<Address>,
        call: &ContractCall,
    ) -> Result<Bytes, GatewayError> {
        self.ensure_reachable("eth_call")?;
        let selector = call.selector().ok_or_else(|| reverted("eth_call"))?;
        let state = self.lock();

        if selector == IERC20::balanceOfCall::SELECTOR {
            let decoded = IERC20::balanceOfCall::abi_decode(&call.input, true)
                .map_err(|_| reverted("eth_call"))?;
            let balance = state
                .balances
                .get(&(call.to, decoded.owner))
                .copied()
                .unwrap_or_default();
            return Ok(balance.abi_encode().into());
        }

        if selector == IERC20::allowanceCall::SELECTOR {
            let decoded = IERC20::allowanceCall::abi_decode(&call.input, true)
                .map_err(|_| reverted("eth_call"))?;
            let allowance = state
                .allowances
                .get(&(call.to, decoded.owner, decoded.spender))
                .copied()
                .unwrap_or_default();
            return Ok(allowance.abi_encode().into());
        }

        state
            .views
            .get(&(call.to, selector))
            .cloned()
            .ok_or_else(|| reverted("eth_call"))
    }

    async fn estimate_gas(&self, _from: Address, call: &ContractCall) -> Result<u64, GatewayError> {
        self.ensure_reachable("eth_estimateGas")?;
        let mut state = self.lock();
        state.estimations += 1;
        match call.selector() {
            Some(selector) if !state.revert_estimation.contains(&selector) => {
                Ok(state.gas_estimate)
            }
            _ => Err(reverted("eth_estimateGas")),
        }
    }

    async fn nonce(&self, account: Address) -> Result<u64, GatewayError> {
        self.ensure_reachable("eth_getTransactionCount")?;
        let state = self.lock();
        Ok(if account == self.owner { state.nonce } else { 0 })
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, GatewayError> {
        self.ensure_reachable("eth_sendRawTransaction")?;
        let mut state = self.lock();
        if let Some(message) = &state.refuse_broadcasts {
            return Err(GatewayError::Rejected {
                operation: "eth_sendRawTransaction",
                message: message.clone(),
            });
        }

        let envelope =
            TxEnvelope::decode_2718(&mut &raw[..]).map_err(|e| GatewayError::Rejected {
                operation: "eth_sendRawTransaction",
                message: e.to_string(),
            })?;
        if envelope.nonce() != state.nonce {
            return Err(GatewayError::Rejected {
                operation: "eth_sendRawTransaction",
                message: format!("nonce too low: expected {}", state.nonce),
            });
        }

        let hash = *envelope.tx_hash();
        let input = envelope.input().clone();
        let selector: [u8; 4] = input
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .unwrap_or_default();
        let to = envelope.to();
        let success = !state.fail_inclusion.contains(&selector);

        state.nonce += 1;
        state.block += 1;
        state.submitted.push(SubmittedTx {
            hash,
            to,
            selector,
            input: input.clone(),
            nonce: envelope.nonce(),
            gas_limit: envelope.gas_limit(),
            gas_price: envelope.gas_price(),
            chain_id: envelope.chain_id(),
        });

        if success && !state.ignore_approvals && selector == IERC20::approveCall::SELECTOR {
            if let (Some(token), Ok(approve)) = (to, IERC20::approveCall::abi_decode(&input, true))
            {
                state
                    .allowances
                    .insert((token, self.owner, approve.spender), approve.value);
            }
        }

        if success && selector == IStaking::depositCall::SELECTOR {
            if let (Some(staking), Ok(deposit)) = (to, IStaking::depositCall::abi_decode(&input, true))
            {
                let staked = state.balances.entry((staking, self.owner)).or_default();
                *staked = staked.saturating_add(deposit.amount);
            }
        }

        if !state.withhold_receipts {
            let receipt = Receipt {
                tx_hash: hash,
                success,
                block_number: Some(state.block),
                block_hash: None,
                gas_used: envelope.gas_limit() / 2,
            };
            state.receipts.insert(hash, receipt);
        }

        Ok(hash)
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<Receipt>, GatewayError> {
        self.ensure_reachable("eth_getTransactionReceipt")?;
        let mut state = self.lock();
        if state.dropped_receipt_polls > 0 {
            state.dropped_receipt_polls -= 1;
            return Err(GatewayError::Unreachable {
                operation: "eth_getTransactionReceipt",
                message: "connection reset".to_string(),
            });
        }
        Ok(state.receipts.get(&hash).cloned())
    }
}
