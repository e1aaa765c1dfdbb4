//! Command-line front-end for the guarded submission pipeline.
//!
//! Each subcommand builds one operation, connects to the ledger, verifies the endpoint
//! is live, and runs the operation through the pipeline. On success the confirmed
//! transaction hashes are printed; on failure the error kind, message and any broadcast
//! hash are printed and the process exits non-zero.
//!
//! ## Usage
//! ```sh
//! PRIVATE_KEY=0x... guarded-submitter deposit \
//!     --staking 0x91Ad32cC40E14c3E2d843aAAA51635a11a022465 \
//!     --token 0x2d65b197f04109724dfac2ec74775190eac7af7d \
//!     --amount 500000000000000000000
//! ```
//!
//! Settings may also come from a `.env` file in the working directory. `deposit` falls
//! back to `STAKING_CONTRACT_ADDRESS` and `TOKEN_ADDRESS` for its addresses.
//!
//! Swaps take their route as repeated `--route pair,from,to,stable,concentrated,receiver`
//! values or from a JSON file given with `--routes-file`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use alloy::primitives::{address, Address, U256};
use clap::{Args, Parser, Subcommand};
use dotenv::dotenv;
use guarded_submitter::config::{ConfigError, LedgerArgs, PipelineConfig, SignerArgs};
use guarded_submitter::error::{Error as PipelineError, ErrorKind};
use guarded_submitter::operations::{
    load_routes_file,
    AddLiquidityOperation,
    ApproveOperation,
    Deadline,
    DepositOperation,
    Operation,
    RouteHop,
    RouteParseError,
    SwapOperation,
    DEFAULT_MINIMUM_STAKE,
};
use guarded_submitter::pipeline::{GuardedPipeline, OperationOutcome};
use log::{error, info};
use snafu::{ResultExt, Snafu};

/// Staking contract used when neither `--staking` nor `STAKING_CONTRACT_ADDRESS` is set.
const DEFAULT_STAKING_CONTRACT: Address = address!("91Ad32cC40E14c3E2d843aAAA51635a11a022465");

/// Token staked when neither `--token` nor `TOKEN_ADDRESS` is set.
const DEFAULT_STAKING_TOKEN: Address = address!("2d65b197f04109724dfac2ec74775190eac7af7d");

#[derive(Debug, Snafu)]
enum CliError {
    #[snafu(display("could not load the signer: {source}"))]
    Signer { source: ConfigError },

    #[snafu(display("could not read the swap route: {source}"))]
    Routes { source: RouteParseError },

    #[snafu(display("{source}"))]
    Pipeline { source: PipelineError },
}

/// Type alias for results in the binary.
type Result<T, E = CliError> = std::result::Result<T, E>;

/// CLI arguments parser using `clap` derive syntax
#[derive(Parser, Debug)]
#[command(
    name = "guarded-submitter",
    version,
    about = "Submits approvals, liquidity additions, swaps and staking deposits only after their preconditions hold"
)]
struct Cli {
    #[command(flatten)]
    ledger: LedgerArgs,

    #[command(flatten)]
    signer: SignerArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Router deadline, absolute or relative to when the call is built.
#[derive(Args, Debug)]
struct DeadlineArgs {
    /// Absolute deadline as a unix timestamp in seconds.
    #[arg(long, conflicts_with = "deadline_window_secs")]
    deadline: Option<u64>,

    /// Deadline as seconds after the call is built.
    #[arg(long, default_value_t = 1800)]
    deadline_window_secs: u64,
}

impl From<&DeadlineArgs> for Deadline {
    fn from(args: &DeadlineArgs) -> Self {
        match args.deadline {
            Some(timestamp) => Deadline::At(timestamp),
            None => Deadline::Within(Duration::from_secs(args.deadline_window_secs)),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Approves a spender for exactly the given amount
    Approve {
        /// The ERC20 token.
        #[arg(long)]
        token: Address,
        /// The spender to approve.
        #[arg(long)]
        spender: Address,
        /// Amount in base units.
        #[arg(long)]
        amount: U256,
    },

    /// Adds two-sided liquidity through the router
    AddLiquidity {
        /// The router contract.
        #[arg(long)]
        router: Address,
        /// First token of the pair.
        #[arg(long)]
        token_a: Address,
        /// Second token of the pair.
        #[arg(long)]
        token_b: Address,
        /// Use the stable pool.
        #[arg(long)]
        stable: bool,
        /// Amount of token A in base units.
        #[arg(long)]
        amount_a: U256,
        /// Amount of token B in base units.
        #[arg(long)]
        amount_b: U256,
        /// Least amount of token A the router may use.
        #[arg(long, default_value_t = U256::ZERO)]
        amount_a_min: U256,
        /// Least amount of token B the router may use.
        #[arg(long, default_value_t = U256::ZERO)]
        amount_b_min: U256,
        /// Receiver of the liquidity tokens. Defaults to the signer.
        #[arg(long)]
        to: Option<Address>,
        #[command(flatten)]
        deadline: DeadlineArgs,
    },

    /// Swaps an exact input amount along a route
    Swap {
        /// The router contract.
        #[arg(long)]
        router: Address,
        /// Amount of the first hop's input token in base units.
        #[arg(long)]
        amount_in: U256,
        /// Least output amount to accept.
        #[arg(long, default_value_t = U256::ZERO)]
        amount_out_min: U256,
        /// A hop as pair,from,to,stable,concentrated,receiver. Repeat for multi-hop routes.
        #[arg(long = "route", required_unless_present = "routes_file")]
        routes: Vec<RouteHop>,
        /// JSON file holding an array of hops.
        #[arg(long, conflicts_with = "routes")]
        routes_file: Option<PathBuf>,
        /// Receiver of the output. Defaults to the signer.
        #[arg(long)]
        to: Option<Address>,
        #[command(flatten)]
        deadline: DeadlineArgs,
    },

    /// Stakes tokens into a staking contract
    Deposit {
        /// The staking contract.
        #[arg(long, env = "STAKING_CONTRACT_ADDRESS", default_value_t = DEFAULT_STAKING_CONTRACT)]
        staking: Address,
        /// The token to stake.
        #[arg(long, env = "TOKEN_ADDRESS", default_value_t = DEFAULT_STAKING_TOKEN)]
        token: Address,
        /// Amount in base units.
        #[arg(long)]
        amount: U256,
        /// Smallest accepted stake in base units.
        #[arg(long, default_value_t = DEFAULT_MINIMUM_STAKE)]
        min_stake: U256,
    },
}

impl Commands {
    async fn into_operation(self, signer: Address) -> Result<Box<dyn Operation>> {
        let operation: Box<dyn Operation> = match self {
            Commands::Approve {
                token,
                spender,
                amount,
            } => Box::new(ApproveOperation {
                token,
                spender,
                amount,
            }),
            Commands::AddLiquidity {
                router,
                token_a,
                token_b,
                stable,
                amount_a,
                amount_b,
                amount_a_min,
                amount_b_min,
                to,
                deadline,
            } => Box::new(AddLiquidityOperation {
                router,
                token_a,
                token_b,
                stable,
                amount_a_desired: amount_a,
                amount_b_desired: amount_b,
                amount_a_min,
                amount_b_min,
                to: to.unwrap_or(signer),
                deadline: Deadline::from(&deadline),
            }),
            Commands::Swap {
                router,
                amount_in,
                amount_out_min,
                routes,
                routes_file,
                to,
                deadline,
            } => {
                let routes = match routes_file {
                    Some(path) => load_routes_file(&path).await.context(RoutesSnafu)?,
                    None => routes,
                };
                Box::new(SwapOperation {
                    router,
                    amount_in,
                    amount_out_min,
                    routes,
                    to: to.unwrap_or(signer),
                    deadline: Deadline::from(&deadline),
                })
            }
            Commands::Deposit {
                staking,
                token,
                amount,
                min_stake,
            } => Box::new(DepositOperation {
                staking,
                token,
                amount,
                minimum_stake: min_stake,
            }),
        };
        Ok(operation)
    }
}

async fn run(cli: Cli) -> Result<OperationOutcome> {
    let signer = cli.signer.load().await.context(SignerSnafu)?;
    let config = PipelineConfig::from(&cli.ledger);
    info!("🔑 Signer {}", signer.address());

    let operation = cli.command.into_operation(signer.address()).await?;
    let pipeline = GuardedPipeline::connect(signer, config)
        .await
        .context(PipelineSnafu)?;
    pipeline
        .run(operation.as_ref())
        .await
        .context(PipelineSnafu)
}

fn report(err: &CliError) {
    let CliError::Pipeline { source } = err else {
        error!("❌ {err}");
        eprintln!("error: {err}");
        return;
    };

    error!("❌ {}: {source}", source.kind());
    eprintln!("error kind: {}", source.kind());
    eprintln!("message: {source}");
    if let Some(tx_hash) = source.tx_hash() {
        eprintln!("transaction: {tx_hash}");
    }
    if source.is_indeterminate() || source.kind() == ErrorKind::Timeout {
        eprintln!("the transaction may still confirm; check its status before re-running");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(outcome) => {
            for tx_hash in &outcome.approvals {
                println!("approval: {tx_hash}");
            }
            if let Some(primary) = &outcome.primary {
                println!("{}: {}", outcome.operation, primary.tx_hash);
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            report(&err);
            ExitCode::FAILURE
        }
    }
}
