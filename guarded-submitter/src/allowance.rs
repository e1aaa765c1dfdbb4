//! # Allowance Guard
//!
//! Makes sure a spender may pull at least the required amount of a token before the
//! primary call runs. The guard is idempotent: when the current allowance already
//! covers the requirement nothing is sent.
//!
//! Approvals are for exactly the required amount, never an unlimited allowance, and use
//! the fixed approval gas limit from the configuration.

use alloy::primitives::{Address, TxHash, U256};
use log::{info, warn};
use snafu::ResultExt;

use crate::contracts::IERC20;
use crate::error::{ApprovalNotEffectiveSnafu, ApprovalSnafu, ReadSnafu, Result};
use crate::gateway::{ContractCall, Ledger};
use crate::orchestrator::{GasPolicy, Orchestrator};

/// Ensures `spender` may pull `required` of `token` from the orchestrator's signer.
///
/// Returns the approval hash when an approval was sent, `None` when the existing
/// allowance was sufficient.
pub async fn ensure_allowance<L: Ledger + ?Sized>(
    orchestrator: &Orchestrator<L>,
    token: Address,
    spender: Address,
    required: U256,
) -> Result<Option<TxHash>> {
    let owner = orchestrator.sender();
    let ledger = orchestrator.ledger();

    let current = ledger
        .allowance(token, owner, spender)
        .await
        .context(ReadSnafu {
            subject: format!("allowance of {spender} on {token}"),
        })?;
    if current >= required {
        info!("✅ Allowance of {spender} on {token} is {current}, no approval needed");
        return Ok(None);
    }

    info!("🔓 Approving {spender} to spend {required} of {token} (current allowance {current})");
    let call = ContractCall::encode(
        format!("approve({token})"),
        token,
        &IERC20::approveCall {
            spender,
            value: required,
        },
    );
    let confirmation = orchestrator
        .submit(&call, GasPolicy::Fixed(orchestrator.config().approval_gas_limit))
        .await
        .context(ApprovalSnafu {
            token,
            spender,
            required,
        })?;

    let allowance = ledger
        .allowance(token, owner, spender)
        .await
        .context(ReadSnafu {
            subject: format!("allowance of {spender} on {token} after approval"),
        })?;
    if allowance < required {
        warn!(
            "⚠️ Approval {} confirmed but allowance is still {allowance}",
            confirmation.tx_hash
        );
        return ApprovalNotEffectiveSnafu {
            token,
            tx_hash: confirmation.tx_hash,
            allowance,
            required,
        }
        .fail();
    }

    Ok(Some(confirmation.tx_hash))
}
