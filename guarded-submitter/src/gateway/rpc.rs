//! JSON-RPC implementation of the [`Ledger`] trait over HTTP.

use alloy::network::{Ethereum, ReceiptResponse};
use alloy::primitives::{Address, Bytes, TxHash};
use alloy::providers::{Provider, RootProvider};
use alloy::transports::http::reqwest::Url;
use alloy::transports::{RpcError, TransportError};
use async_trait::async_trait;

use super::{ContractCall, GatewayError, Ledger, Receipt};

/// A [`Ledger`] backed by an HTTP JSON-RPC endpoint.
///
/// The provider carries no fillers: nonce, gas and chain id are chosen by the
/// orchestrator, and transactions are broadcast pre-signed.
#[derive(Clone)]
pub struct RpcLedger {
    provider: RootProvider<Ethereum>,
}

impl RpcLedger {
    /// Creates a ledger handle without contacting the endpoint. Use
    /// [`verify_connection`](super::verify_connection) before relying on it.
    pub fn new(endpoint: Url) -> Self {
        Self {
            provider: RootProvider::new_http(endpoint),
        }
    }
}

/// Splits transport failures from node-side error responses.
fn classify(operation: &'static str, err: TransportError) -> GatewayError {
    match err {
        RpcError::ErrorResp(payload) => GatewayError::Rejected {
            operation,
            message: payload.to_string(),
        },
        other => GatewayError::Unreachable {
            operation,
            message: other.to_string(),
        },
    }
}

#[async_trait]
impl Ledger for RpcLedger {
    async fn block_number(&self) -> Result<u64, GatewayError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| classify("eth_blockNumber", e))
    }

    async fn chain_id(&self) -> Result<u64, GatewayError> {
        self.provider
            .get_chain_id()
            .await
            .map_err(|e| classify("eth_chainId", e))
    }

    async fn call(
        &self,
        from: Option<Address>,
        call: &ContractCall,
    ) -> Result<Bytes, GatewayError> {
        let request = call.request(from);
        self.provider
            .call(&request)
            .await
            .map_err(|e| classify("eth_call", e))
    }

    async fn estimate_gas(&self, from: Address, call: &ContractCall) -> Result<u64, GatewayError> {
        let request = call.request(Some(from));
        self.provider
            .estimate_gas(&request)
            .await
            .map_err(|e| classify("eth_estimateGas", e))
    }

    async fn nonce(&self, account: Address) -> Result<u64, GatewayError> {
        self.provider
            .get_transaction_count(account)
            .await
            .map_err(|e| classify("eth_getTransactionCount", e))
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, GatewayError> {
        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(|e| classify("eth_sendRawTransaction", e))?;
        Ok(*pending.tx_hash())
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<Receipt>, GatewayError> {
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| classify("eth_getTransactionReceipt", e))?;

        Ok(receipt.map(|receipt| Receipt {
            tx_hash: receipt.transaction_hash(),
            success: receipt.status(),
            block_number: receipt.block_number(),
            block_hash: receipt.block_hash(),
            gas_used: receipt.gas_used(),
        }))
    }
}
