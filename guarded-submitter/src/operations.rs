//! # Operation Drivers
//!
//! Each guarded operation is a parameter set: the token legs that must be funded and
//! approved, the protocol checks to run, and the primary call. Drivers carry no
//! orchestration logic of their own; [`GuardedPipeline`](crate::pipeline::GuardedPipeline)
//! runs all of them the same way.

use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use alloy::primitives::{Address, U256};
use log::warn;
use serde::Deserialize;
use snafu::{ensure, ResultExt, Snafu};

use crate::contracts::{IRouter, IStaking};
use crate::error::{MalformedInputSnafu, Result};
use crate::gateway::ContractCall;
use crate::verifier::{ProtocolCheck, TokenLeg};

/// Window used when no deadline is given.
pub const DEFAULT_DEADLINE_WINDOW: Duration = Duration::from_secs(30 * 60);

/// Smallest deposit accepted by default, in base units (0.001 of an 18-decimal token).
pub const DEFAULT_MINIMUM_STAKE: U256 = U256::from_limbs([1_000_000_000_000_000, 0, 0, 0]);

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

/// The deadline passed to router calls.
///
/// A relative window is resolved when the primary call is built, which happens only
/// after every approval has confirmed. Expired deadlines are left for the router to
/// reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// Absolute unix timestamp in seconds.
    At(u64),
    /// Seconds after the primary call is built.
    Within(Duration),
}

impl Default for Deadline {
    fn default() -> Self {
        Deadline::Within(DEFAULT_DEADLINE_WINDOW)
    }
}

impl Deadline {
    /// The unix timestamp this deadline denotes at time `now`.
    pub fn resolve(&self, now: u64) -> U256 {
        match self {
            Deadline::At(timestamp) => U256::from(*timestamp),
            Deadline::Within(window) => U256::from(now.saturating_add(window.as_secs())),
        }
    }
}

/// A guarded operation.
pub trait Operation: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Structural validation of the parameters. Runs before any chain read.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Token legs to verify and approve, in approval order.
    fn legs(&self) -> Vec<TokenLeg>;

    /// Protocol checks to run after the legs are verified.
    fn protocol_checks(&self) -> Vec<ProtocolCheck> {
        Vec::new()
    }

    /// The primary call, built at unix time `now`. `None` when the approvals are the
    /// whole operation.
    fn primary_call(&self, now: u64) -> Option<ContractCall>;
}

/// A standalone exact-amount approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApproveOperation {
    /// The token to approve.
    pub token: Address,
    /// The spender to approve.
    pub spender: Address,
    /// Exact allowance to grant.
    pub amount: U256,
}

impl Operation for ApproveOperation {
    fn name(&self) -> &'static str {
        "approve"
    }

    fn legs(&self) -> Vec<TokenLeg> {
        vec![TokenLeg::new("approval", self.token, self.spender, self.amount).without_balance_check()]
    }

    fn primary_call(&self, _now: u64) -> Option<ContractCall> {
        None
    }
}

/// Two-sided liquidity addition through the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddLiquidityOperation {
    /// The router contract; spender of both legs.
    pub router: Address,
    /// First token of the pair.
    pub token_a: Address,
    /// Second token of the pair.
    pub token_b: Address,
    /// Whether the pool is a stable pool.
    pub stable: bool,
    /// Amount of `token_a` to provide.
    pub amount_a_desired: U256,
    /// Amount of `token_b` to provide.
    pub amount_b_desired: U256,
    /// Least amount of `token_a` the router may use.
    pub amount_a_min: U256,
    /// Least amount of `token_b` the router may use.
    pub amount_b_min: U256,
    /// Receiver of the liquidity tokens.
    pub to: Address,
    /// Router deadline.
    pub deadline: Deadline,
}

impl Operation for AddLiquidityOperation {
    fn name(&self) -> &'static str {
        "addLiquidity"
    }

    fn validate(&self) -> Result<()> {
        let malformed = |reason: &'static str| MalformedInputSnafu {
            operation: self.name(),
            reason,
        };
        ensure!(
            self.token_a != self.token_b,
            malformed("tokenA and tokenB are the same token")
        );
        ensure!(
            self.amount_a_min <= self.amount_a_desired,
            malformed("amountAMin exceeds amountADesired")
        );
        ensure!(
            self.amount_b_min <= self.amount_b_desired,
            malformed("amountBMin exceeds amountBDesired")
        );
        if self.token_a > self.token_b {
            warn!(
                "⚠️ tokenA {} sorts after tokenB {}; some routers expect sorted pairs",
                self.token_a, self.token_b
            );
        }
        Ok(())
    }

    fn legs(&self) -> Vec<TokenLeg> {
        vec![
            TokenLeg::new("tokenA", self.token_a, self.router, self.amount_a_desired),
            TokenLeg::new("tokenB", self.token_b, self.router, self.amount_b_desired),
        ]
    }

    fn primary_call(&self, now: u64) -> Option<ContractCall> {
        Some(ContractCall::encode(
            self.name(),
            self.router,
            &IRouter::addLiquidityCall {
                tokenA: self.token_a,
                tokenB: self.token_b,
                stable: self.stable,
                amountADesired: self.amount_a_desired,
                amountBDesired: self.amount_b_desired,
                amountAMin: self.amount_a_min,
                amountBMin: self.amount_b_min,
                to: self.to,
                deadline: self.deadline.resolve(now),
            },
        ))
    }
}

/// Errors parsing a route hop from the command line or a routes file.
#[derive(Debug, Snafu)]
pub enum RouteParseError {
    /// The hop does not have exactly six comma separated fields.
    #[snafu(display("expected pair,from,to,stable,concentrated,receiver but got {input:?}"))]
    FieldCount {
        /// The offending input.
        input: String,
    },

    /// An address field is not a valid address.
    #[snafu(display("invalid {field} address {value:?}: {source}"))]
    BadAddress {
        /// The field name.
        field: &'static str,
        /// The offending value.
        value: String,
        /// The hex parse failure.
        source: alloy::hex::FromHexError,
    },

    /// A flag field is not `true` or `false`.
    #[snafu(display("invalid {field} flag {value:?}: {source}"))]
    BadFlag {
        /// The field name.
        field: &'static str,
        /// The offending value.
        value: String,
        /// The bool parse failure.
        source: std::str::ParseBoolError,
    },

    /// The routes file could not be read.
    #[snafu(display("could not read routes file {}: {source}", path.display()))]
    RoutesFileRead {
        /// The routes file.
        path: std::path::PathBuf,
        /// The io failure.
        source: std::io::Error,
    },

    /// The routes file is not a JSON array of hops.
    #[snafu(display("routes file is not a JSON array of hops: {source}"))]
    RoutesJson {
        /// The JSON failure.
        source: serde_json::Error,
    },
}

/// One hop of a swap route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteHop {
    /// The pool of this hop.
    pub pair: Address,
    /// Token sold at this hop.
    pub from: Address,
    /// Token bought at this hop.
    pub to: Address,
    /// Whether the pool is a stable pool.
    pub stable: bool,
    /// Whether the pool is a concentrated liquidity pool.
    pub concentrated: bool,
    /// Receiver of this hop's output.
    pub receiver: Address,
}

fn parse_address(field: &'static str, value: &str) -> Result<Address, RouteParseError> {
    let value = value.trim();
    Address::from_str(value).context(BadAddressSnafu { field, value })
}

fn parse_flag(field: &'static str, value: &str) -> Result<bool, RouteParseError> {
    let value = value.trim();
    value.parse().context(BadFlagSnafu { field, value })
}

impl FromStr for RouteHop {
    type Err = RouteParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(',').collect();
        let &[pair, from, to, stable, concentrated, receiver] = fields.as_slice() else {
            return FieldCountSnafu { input: s }.fail();
        };
        Ok(RouteHop {
            pair: parse_address("pair", pair)?,
            from: parse_address("from", from)?,
            to: parse_address("to", to)?,
            stable: parse_flag("stable", stable)?,
            concentrated: parse_flag("concentrated", concentrated)?,
            receiver: parse_address("receiver", receiver)?,
        })
    }
}

#[derive(Deserialize)]
struct RawHop {
    pair: String,
    from: String,
    to: String,
    stable: bool,
    #[serde(default)]
    concentrated: bool,
    receiver: String,
}

impl TryFrom<RawHop> for RouteHop {
    type Error = RouteParseError;

    fn try_from(raw: RawHop) -> Result<Self, Self::Error> {
        Ok(RouteHop {
            pair: parse_address("pair", &raw.pair)?,
            from: parse_address("from", &raw.from)?,
            to: parse_address("to", &raw.to)?,
            stable: raw.stable,
            concentrated: raw.concentrated,
            receiver: parse_address("receiver", &raw.receiver)?,
        })
    }
}

impl From<RouteHop> for IRouter::Route {
    fn from(hop: RouteHop) -> Self {
        IRouter::Route {
            pair: hop.pair,
            from: hop.from,
            to: hop.to,
            stable: hop.stable,
            concentrated: hop.concentrated,
            receiver: hop.receiver,
        }
    }
}

/// Parses a JSON array of `{pair, from, to, stable, concentrated, receiver}` objects.
pub fn parse_routes_json(json: &str) -> Result<Vec<RouteHop>, RouteParseError> {
    let raw: Vec<RawHop> = serde_json::from_str(json).context(RoutesJsonSnafu)?;
    raw.into_iter().map(RouteHop::try_from).collect()
}

/// Reads a routes file in the format accepted by [`parse_routes_json`].
pub async fn load_routes_file(path: &Path) -> Result<Vec<RouteHop>, RouteParseError> {
    let json = tokio::fs::read_to_string(path)
        .await
        .context(RoutesFileReadSnafu { path })?;
    parse_routes_json(&json)
}

/// Exact-input multi-hop swap through the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapOperation {
    /// The router contract; spender of the input leg.
    pub router: Address,
    /// Amount of the first hop's `from` token to sell.
    pub amount_in: U256,
    /// Least amount of the last hop's `to` token to accept.
    pub amount_out_min: U256,
    /// Ordered hops.
    pub routes: Vec<RouteHop>,
    /// Receiver of the output.
    pub to: Address,
    /// Router deadline.
    pub deadline: Deadline,
}

impl Operation for SwapOperation {
    fn name(&self) -> &'static str {
        "swap"
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            !self.routes.is_empty(),
            MalformedInputSnafu {
                operation: self.name(),
                reason: "route has no hops",
            }
        );
        for (index, pair) in self.routes.windows(2).enumerate() {
            ensure!(
                pair[0].to == pair[1].from,
                MalformedInputSnafu {
                    operation: self.name(),
                    reason: format!(
                        "hop {} sells {} but hop {} bought {}",
                        index + 1,
                        pair[1].from,
                        index,
                        pair[0].to
                    ),
                }
            );
        }
        if self.amount_out_min.is_zero() {
            warn!("⚠️ amountOutMin is 0, the swap has no slippage protection");
        }
        Ok(())
    }

    fn legs(&self) -> Vec<TokenLeg> {
        self.routes
            .first()
            .map(|hop| TokenLeg::new("swap input", hop.from, self.router, self.amount_in))
            .into_iter()
            .collect()
    }

    fn primary_call(&self, now: u64) -> Option<ContractCall> {
        Some(ContractCall::encode(
            self.name(),
            self.router,
            &IRouter::swapExactTokensForTokensCall {
                amountIn: self.amount_in,
                amountOutMin: self.amount_out_min,
                routes: self.routes.iter().copied().map(Into::into).collect(),
                to: self.to,
                deadline: self.deadline.resolve(now),
            },
        ))
    }
}

/// Deposit into a single-token staking pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositOperation {
    /// The staking contract; spender of the stake leg.
    pub staking: Address,
    /// The token being staked.
    pub token: Address,
    /// Amount to stake.
    pub amount: U256,
    /// Smallest accepted stake.
    pub minimum_stake: U256,
}

impl DepositOperation {
    /// A deposit of `amount` with the default minimum stake.
    pub fn new(staking: Address, token: Address, amount: U256) -> Self {
        Self {
            staking,
            token,
            amount,
            minimum_stake: DEFAULT_MINIMUM_STAKE,
        }
    }
}

impl Operation for DepositOperation {
    fn name(&self) -> &'static str {
        "deposit"
    }

    fn legs(&self) -> Vec<TokenLeg> {
        vec![TokenLeg::new("stake", self.token, self.staking, self.amount)
            .with_minimum(self.minimum_stake)]
    }

    fn protocol_checks(&self) -> Vec<ProtocolCheck> {
        vec![
            ProtocolCheck::NotPaused {
                contract: self.staking,
            },
            ProtocolCheck::StakingToken {
                staking: self.staking,
                expected: self.token,
            },
            ProtocolCheck::StakeCeiling {
                staking: self.staking,
                amount: self.amount,
            },
        ]
    }

    fn primary_call(&self, _now: u64) -> Option<ContractCall> {
        Some(ContractCall::encode(
            self.name(),
            self.staking,
            &IStaking::depositCall {
                amount: self.amount,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;
    use alloy::sol_types::SolCall;

    use super::*;
    use crate::error::ErrorKind;

    const ROUTER: Address = address!("1b6814f3227a246f62bc47b148b3d288dbc85715");
    const PAIR: Address = address!("91ad32cc40e14c3e2d843aaaa51635a11a022465");
    const BLACK: Address = address!("2d65b197f04109724dfac2ec74775190eac7af7d");
    const SUPER: Address = address!("a981371a120b0e1bbdcd0abab1ed509c1084fe5f");
    const WAVAX: Address = address!("d00ae08403b9bbb9124bb305c09058e32c39a48c");
    const ME: Address = address!("00000000000000000000000000000000000000aa");

    fn hop(from: Address, to: Address) -> RouteHop {
        RouteHop {
            pair: PAIR,
            from,
            to,
            stable: false,
            concentrated: false,
            receiver: ME,
        }
    }

    fn swap(routes: Vec<RouteHop>) -> SwapOperation {
        SwapOperation {
            router: ROUTER,
            amount_in: U256::from(1_000),
            amount_out_min: U256::ZERO,
            routes,
            to: ME,
            deadline: Deadline::default(),
        }
    }

    #[test]
    fn we_can_parse_a_route_hop_from_the_command_line() {
        let input = format!("{PAIR},{BLACK}, {SUPER},false,true,{ME}");
        let parsed: RouteHop = input.parse().unwrap();
        assert_eq!(
            parsed,
            RouteHop {
                concentrated: true,
                ..hop(BLACK, SUPER)
            }
        );
    }

    #[test]
    fn we_cannot_parse_malformed_route_hops() {
        assert!(matches!(
            format!("{PAIR},{BLACK},{SUPER},false").parse::<RouteHop>(),
            Err(RouteParseError::FieldCount { .. })
        ));
        assert!(matches!(
            format!("{PAIR},0x1234,{SUPER},false,false,{ME}").parse::<RouteHop>(),
            Err(RouteParseError::BadAddress { field: "from", .. })
        ));
        assert!(matches!(
            format!("{PAIR},{BLACK},{SUPER},maybe,false,{ME}").parse::<RouteHop>(),
            Err(RouteParseError::BadFlag { field: "stable", .. })
        ));
    }

    #[test]
    fn we_can_parse_routes_from_json() {
        let json = format!(
            r#"[
                {{"pair": "{PAIR}", "from": "{BLACK}", "to": "{SUPER}", "stable": false, "concentrated": false, "receiver": "{ME}"}},
                {{"pair": "{PAIR}", "from": "{SUPER}", "to": "{WAVAX}", "stable": true, "receiver": "{ME}"}}
            ]"#
        );
        let routes = parse_routes_json(&json).unwrap();
        assert_eq!(
            routes,
            vec![
                hop(BLACK, SUPER),
                RouteHop {
                    stable: true,
                    ..hop(SUPER, WAVAX)
                }
            ]
        );

        assert!(matches!(
            parse_routes_json(r#"{"pair": "0x"}"#),
            Err(RouteParseError::RoutesJson { .. })
        ));
    }

    #[test]
    fn swap_routes_must_chain() {
        swap(vec![hop(BLACK, SUPER), hop(SUPER, WAVAX)])
            .validate()
            .unwrap();

        let err = swap(vec![hop(BLACK, SUPER), hop(WAVAX, BLACK)])
            .validate()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidAmount);

        let err = swap(Vec::new()).validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidAmount);
    }

    #[test]
    fn the_swap_input_leg_is_the_first_hop_token() {
        let legs = swap(vec![hop(BLACK, SUPER), hop(SUPER, WAVAX)]).legs();
        assert_eq!(legs.len(), 1);
        assert_eq!(legs[0].token, BLACK);
        assert_eq!(legs[0].spender, ROUTER);
        assert_eq!(legs[0].amount, U256::from(1_000));
    }

    #[test]
    fn the_swap_call_carries_every_hop() {
        let call = swap(vec![hop(BLACK, SUPER), hop(SUPER, WAVAX)])
            .primary_call(1_700_000_000)
            .unwrap();
        let decoded = IRouter::swapExactTokensForTokensCall::abi_decode(&call.input, true).unwrap();
        assert_eq!(call.to, ROUTER);
        assert_eq!(decoded.routes.len(), 2);
        assert_eq!(decoded.routes[1].to, WAVAX);
        assert_eq!(decoded.deadline, U256::from(1_700_000_000 + 1_800));
    }

    #[test]
    fn deadlines_resolve_relative_to_the_build_time() {
        assert_eq!(Deadline::At(42).resolve(1_000), U256::from(42));
        assert_eq!(
            Deadline::Within(Duration::from_secs(60)).resolve(1_000),
            U256::from(1_060)
        );
        assert_eq!(
            Deadline::Within(Duration::from_secs(60)).resolve(u64::MAX),
            U256::from(u64::MAX)
        );
    }

    #[test]
    fn liquidity_addition_guards_both_legs() {
        let operation = AddLiquidityOperation {
            router: ROUTER,
            token_a: BLACK,
            token_b: SUPER,
            stable: false,
            amount_a_desired: U256::from(10),
            amount_b_desired: U256::from(20),
            amount_a_min: U256::from(9),
            amount_b_min: U256::from(18),
            to: ME,
            deadline: Deadline::At(1_800_000_000),
        };
        operation.validate().unwrap();

        let legs = operation.legs();
        assert_eq!(legs.len(), 2);
        assert_eq!((legs[0].token, legs[0].amount), (BLACK, U256::from(10)));
        assert_eq!((legs[1].token, legs[1].amount), (SUPER, U256::from(20)));

        let call = operation.primary_call(0).unwrap();
        let decoded = IRouter::addLiquidityCall::abi_decode(&call.input, true).unwrap();
        assert_eq!(decoded.amountBMin, U256::from(18));
        assert_eq!(decoded.deadline, U256::from(1_800_000_000));

        let same_token = AddLiquidityOperation {
            token_b: BLACK,
            ..operation.clone()
        };
        assert_eq!(same_token.validate().unwrap_err().kind(), ErrorKind::InvalidAmount);

        let min_above_desired = AddLiquidityOperation {
            amount_a_min: U256::from(11),
            ..operation
        };
        assert!(min_above_desired.validate().is_err());
    }

    #[test]
    fn deposits_enforce_the_minimum_stake_and_protocol_checks() {
        let deposit = DepositOperation::new(PAIR, BLACK, U256::from(5));
        let legs = deposit.legs();
        assert_eq!(legs[0].minimum, DEFAULT_MINIMUM_STAKE);
        assert_eq!(DEFAULT_MINIMUM_STAKE, U256::from(10u64.pow(15)));
        assert_eq!(deposit.protocol_checks().len(), 3);
        assert_eq!(
            deposit.primary_call(0).unwrap().selector(),
            Some(IStaking::depositCall::SELECTOR)
        );
    }

    #[test]
    fn approvals_have_no_primary_call() {
        let approve = ApproveOperation {
            token: BLACK,
            spender: ROUTER,
            amount: U256::from(7),
        };
        assert!(approve.primary_call(0).is_none());
        assert!(!approve.legs()[0].requires_balance);
    }
}
