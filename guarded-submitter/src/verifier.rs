//! # Precondition Verifier
//!
//! Read-and-decide checks that run before any write call of a guarded operation:
//! amount sanity, balance sufficiency and protocol-specific limits.
//!
//! Protocol views such as `maxStakePerUser()` or `paused()` are optional. When the
//! target contract does not expose one, [`try_read`] returns `None` and the check is
//! skipped with a warning. Transport failures are never skipped.

use alloy::primitives::utils::format_units;
use alloy::primitives::{Address, U256};
use log::{info, warn};
use snafu::ResultExt;

use crate::contracts::{IERC20, IStaking};
use crate::error::{
    InsufficientBalanceSnafu,
    InvalidAmountSnafu,
    LimitExceededSnafu,
    PausedSnafu,
    ReadSnafu,
    Result,
    StakingTokenMismatchSnafu,
};
use crate::gateway::{try_read, Ledger};

/// Decimals assumed when a token does not expose `decimals()`.
pub const DEFAULT_DECIMALS: u8 = 18;

/// One token that must be funded and approved before the primary call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenLeg {
    /// Name of the leg used in logs and errors, e.g. `tokenA`.
    pub label: String,
    /// The ERC20 token.
    pub token: Address,
    /// The contract that will pull the tokens.
    pub spender: Address,
    /// Required amount in base units.
    pub amount: U256,
    /// Smallest acceptable amount. Never below 1.
    pub minimum: U256,
    /// Whether the signer must hold `amount` before the run.
    pub requires_balance: bool,
}

impl TokenLeg {
    /// A leg that must be funded and approved for exactly `amount`.
    pub fn new(label: impl Into<String>, token: Address, spender: Address, amount: U256) -> Self {
        Self {
            label: label.into(),
            token,
            spender,
            amount,
            minimum: U256::from(1),
            requires_balance: true,
        }
    }

    /// Rejects amounts below `minimum` (zero is always rejected).
    pub fn with_minimum(mut self, minimum: U256) -> Self {
        self.minimum = minimum.max(U256::from(1));
        self
    }

    /// Skips the balance check; used when only an approval is wanted.
    pub fn without_balance_check(mut self) -> Self {
        self.requires_balance = false;
        self
    }
}

/// A protocol-specific condition checked against optional contract views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolCheck {
    /// `amount` must fit under `maxStakePerUser() - balanceOf(signer)` on `staking`.
    StakeCeiling {
        /// The staking contract.
        staking: Address,
        /// Amount about to be staked.
        amount: U256,
    },
    /// `paused()` on `contract` must not be true.
    NotPaused {
        /// The contract to probe.
        contract: Address,
    },
    /// `stakingToken()` on `staking` must equal `expected`.
    StakingToken {
        /// The staking contract.
        staking: Address,
        /// Token the caller intends to stake.
        expected: Address,
    },
}

/// Renders `amount` in base units, plus human units when `decimals` is known.
pub(crate) fn describe_amount(amount: U256, decimals: Option<u8>) -> String {
    match decimals.and_then(|d| format_units(amount, d).ok()) {
        Some(human) => format!("{amount} ({human} tokens)"),
        None => amount.to_string(),
    }
}

/// Probes `decimals()` on `token`; `None` when the token does not expose it.
pub async fn token_decimals<L: Ledger + ?Sized>(ledger: &L, token: Address) -> Result<Option<u8>> {
    let decimals = try_read(ledger, token, IERC20::decimalsCall {})
        .await
        .context(ReadSnafu {
            subject: format!("decimals() of {token}"),
        })?;
    Ok(decimals.map(|d| d.places))
}

/// Verifies the amount and, if required, the balance of one leg.
pub async fn verify_leg<L: Ledger + ?Sized>(ledger: &L, owner: Address, leg: &TokenLeg) -> Result<()> {
    let minimum = leg.minimum.max(U256::from(1));
    if leg.amount < minimum {
        warn!(
            "❌ {} amount {} is below the minimum {minimum}",
            leg.label, leg.amount
        );
        return InvalidAmountSnafu {
            leg: leg.label.clone(),
            amount: leg.amount,
            minimum,
        }
        .fail();
    }

    if !leg.requires_balance {
        return Ok(());
    }

    let balance = ledger
        .balance_of(leg.token, owner)
        .await
        .context(ReadSnafu {
            subject: format!("balanceOf({owner}) on {} for {}", leg.token, leg.label),
        })?;
    let decimals = token_decimals(ledger, leg.token)
        .await?
        .or(Some(DEFAULT_DECIMALS));
    info!(
        "💰 {} balance: {} (required {})",
        leg.label,
        describe_amount(balance, decimals),
        describe_amount(leg.amount, decimals)
    );

    if balance < leg.amount {
        return InsufficientBalanceSnafu {
            leg: leg.label.clone(),
            token: leg.token,
            balance,
            required: leg.amount,
        }
        .fail();
    }
    Ok(())
}

/// Evaluates one protocol check, skipping it when its views are not exposed.
pub async fn verify_protocol<L: Ledger + ?Sized>(
    ledger: &L,
    owner: Address,
    check: &ProtocolCheck,
) -> Result<()> {
    match check {
        ProtocolCheck::StakeCeiling { staking, amount } => {
            verify_stake_ceiling(ledger, owner, *staking, *amount).await
        }
        ProtocolCheck::NotPaused { contract } => {
            let paused = try_read(ledger, *contract, IStaking::pausedCall {})
                .await
                .context(ReadSnafu {
                    subject: format!("paused() of {contract}"),
                })?;
            match paused.map(|p| p.isPaused) {
                Some(true) => PausedSnafu {
                    contract: *contract,
                }
                .fail(),
                Some(false) => {
                    info!("▶️ {contract} is not paused");
                    Ok(())
                }
                None => {
                    warn!("⚠️ Could not query paused() on {contract}, skipping pause check");
                    Ok(())
                }
            }
        }
        ProtocolCheck::StakingToken { staking, expected } => {
            let token = try_read(ledger, *staking, IStaking::stakingTokenCall {})
                .await
                .context(ReadSnafu {
                    subject: format!("stakingToken() of {staking}"),
                })?;
            match token.map(|t| t.token) {
                Some(actual) if actual != *expected => StakingTokenMismatchSnafu {
                    staking: *staking,
                    expected: *expected,
                    actual,
                }
                .fail(),
                Some(actual) => {
                    info!("🪙 {staking} accepts {actual}");
                    Ok(())
                }
                None => {
                    warn!("⚠️ Could not query stakingToken() on {staking}, skipping token check");
                    Ok(())
                }
            }
        }
    }
}

/// Best-effort per-account ceiling check.
///
/// Remaining room is `cap - committed`, clamped at zero. The check reflects state at
/// read time only; it is not repeated after the approval transaction lands.
async fn verify_stake_ceiling<L: Ledger + ?Sized>(
    ledger: &L,
    owner: Address,
    staking: Address,
    amount: U256,
) -> Result<()> {
    let read = |what: &str| ReadSnafu {
        subject: format!("{what} of {staking}"),
    };

    if let Some(total) = try_read(ledger, staking, IStaking::totalStakedCall {})
        .await
        .context(read("totalStaked()"))?
    {
        info!("📊 Total staked on {staking}: {}", total.total);
    }

    let cap = try_read(ledger, staking, IStaking::maxStakePerUserCall {})
        .await
        .context(read("maxStakePerUser()"))?;
    let committed = try_read(ledger, staking, IStaking::balanceOfCall { account: owner })
        .await
        .context(read("balanceOf(signer)"))?;

    let (Some(cap), Some(committed)) = (cap, committed) else {
        warn!("⚠️ Could not verify the per-user stake limit on {staking}, skipping this check");
        return Ok(());
    };
    let (cap, committed) = (cap.cap, committed.staked);
    let remaining = cap.saturating_sub(committed);
    info!("📏 Stake limit {cap}, already staked {committed}, remaining {remaining}");

    if amount > remaining {
        return LimitExceededSnafu {
            requested: amount,
            cap,
            committed,
            remaining,
        }
        .fail();
    }
    Ok(())
}
