//! Deployment configuration and signer loading.
//!
//! [`PipelineConfig`] is built once at startup and handed to the orchestrator. The
//! defaults describe the reference deployment, a low-congestion test network where a
//! minimal gas price is accepted.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use alloy::signers::local::PrivateKeySigner;
use alloy::transports::http::reqwest::Url;
use clap::Args;
use hex::FromHex;
use k256::ecdsa::SigningKey;
use snafu::{ensure, OptionExt, ResultExt, Snafu};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Avalanche Fuji C-chain public endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.avax-test.network/ext/bc/C/rpc";
/// Avalanche Fuji C-chain id.
pub const DEFAULT_CHAIN_ID: u64 = 43113;
/// Gas price in wei applied to every transaction.
pub const DEFAULT_GAS_PRICE: u128 = 1;
/// How long to wait for a receipt after broadcast.
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(120);
/// Interval between receipt lookups.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Fixed gas limit for ERC20 approvals.
pub const DEFAULT_APPROVAL_GAS_LIMIT: u64 = 100_000;

/// Fractional digits accepted by [`GasMultiplier`].
const MULTIPLIER_SCALE_DIGITS: usize = 4;
/// `10^MULTIPLIER_SCALE_DIGITS`.
const MULTIPLIER_SCALE: u64 = 10_000;

/// Errors raised while reading configuration or key material.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// The multiplier string is not a decimal number.
    #[snafu(display("invalid gas multiplier '{input}': expected a decimal such as 1.2"))]
    MalformedMultiplier {
        /// The rejected input.
        input: String,
    },

    /// The multiplier has more fractional digits than supported.
    #[snafu(display("gas multiplier '{input}' has more than {MULTIPLIER_SCALE_DIGITS} fractional digits"))]
    MultiplierPrecision {
        /// The rejected input.
        input: String,
    },

    /// The multiplier would shrink the estimate.
    #[snafu(display("gas multiplier '{input}' must be at least 1"))]
    MultiplierBelowOne {
        /// The rejected input.
        input: String,
    },

    /// Neither a key file nor a key value was supplied.
    #[snafu(display("no signing key supplied: pass --eth-key-path or set PRIVATE_KEY"))]
    MissingKey,

    /// The key file could not be read.
    #[snafu(display("Failed to read Ethereum key from file '{}': {}", path.display(), source))]
    KeyFileRead {
        /// Path of the key file.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The key is not valid hex.
    #[snafu(display("Failed to parse Ethereum key as hex: {}", source))]
    KeyParse {
        /// The underlying hex error.
        source: hex::FromHexError,
    },

    /// The key is not 32 bytes long.
    #[snafu(display("Invalid key length: expected 32 bytes, got {}", length))]
    InvalidKeyLength {
        /// Length of the decoded key.
        length: usize,
    },

    /// The key bytes are not a valid secp256k1 scalar.
    #[snafu(display("Key is not a valid secp256k1 secret: {source}"))]
    InvalidKey {
        /// The underlying signature error.
        source: k256::ecdsa::Error,
    },
}

/// Safety margin applied to gas estimates.
///
/// Stored as an exact decimal with four fractional digits so that
/// [`GasMultiplier::apply`] is `ceil(estimate × multiplier)` without floating point error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GasMultiplier {
    /// Multiplier scaled by `MULTIPLIER_SCALE`.
    scaled: u64,
}

impl GasMultiplier {
    /// A multiplier of exactly 1.
    pub const ONE: Self = Self {
        scaled: MULTIPLIER_SCALE,
    };

    /// Pads `estimate`, rounding up. Saturates at `u64::MAX`.
    pub fn apply(&self, estimate: u64) -> u64 {
        let scale = u128::from(MULTIPLIER_SCALE);
        let padded = (u128::from(estimate) * u128::from(self.scaled)).div_ceil(scale);
        u64::try_from(padded).unwrap_or(u64::MAX)
    }
}

impl Default for GasMultiplier {
    fn default() -> Self {
        Self { scaled: 12_000 }
    }
}

impl FromStr for GasMultiplier {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        let malformed = || MalformedMultiplierSnafu { input }.build();

        let (whole, fraction) = input.split_once('.').unwrap_or((input, ""));
        if whole.is_empty() && fraction.is_empty() {
            return Err(malformed());
        }
        let all_digits = |part: &str| part.chars().all(|c| c.is_ascii_digit());
        ensure!(
            all_digits(whole) && all_digits(fraction),
            MalformedMultiplierSnafu { input }
        );
        ensure!(
            fraction.len() <= MULTIPLIER_SCALE_DIGITS,
            MultiplierPrecisionSnafu { input }
        );

        let whole: u64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| malformed())?
        };
        let padded_fraction = format!("{fraction:0<MULTIPLIER_SCALE_DIGITS$}");
        let fraction: u64 = padded_fraction.parse().map_err(|_| malformed())?;

        let scaled = whole
            .checked_mul(MULTIPLIER_SCALE)
            .and_then(|w| w.checked_add(fraction))
            .context(MalformedMultiplierSnafu { input })?;
        ensure!(scaled >= MULTIPLIER_SCALE, MultiplierBelowOneSnafu { input });

        Ok(Self { scaled })
    }
}

impl fmt::Display for GasMultiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.scaled / MULTIPLIER_SCALE;
        let fraction = self.scaled % MULTIPLIER_SCALE;
        if fraction == 0 {
            return write!(f, "{whole}");
        }
        let digits = format!("{fraction:0MULTIPLIER_SCALE_DIGITS$}");
        write!(f, "{whole}.{}", digits.trim_end_matches('0'))
    }
}

/// Settings shared by every submission of a run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// JSON-RPC endpoint of the ledger.
    pub endpoint: Url,
    /// Chain id signed into every transaction.
    pub chain_id: u64,
    /// Legacy gas price in wei.
    pub gas_price: u128,
    /// Margin applied to gas estimates.
    pub gas_multiplier: GasMultiplier,
    /// Bound on the receipt wait after broadcast.
    pub confirmation_timeout: Duration,
    /// Interval between receipt lookups.
    pub poll_interval: Duration,
    /// Fixed gas limit for approvals.
    pub approval_gas_limit: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            endpoint: Url::parse(DEFAULT_ENDPOINT).expect("default endpoint is a valid url"),
            chain_id: DEFAULT_CHAIN_ID,
            gas_price: DEFAULT_GAS_PRICE,
            gas_multiplier: GasMultiplier::default(),
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            approval_gas_limit: DEFAULT_APPROVAL_GAS_LIMIT,
        }
    }
}

/// CLI args describing the ledger connection and gas policy.
#[derive(Debug, Args)]
pub struct LedgerArgs {
    /// JSON-RPC endpoint of the ledger.
    #[arg(long, env = "LEDGER_RPC_URL", default_value = DEFAULT_ENDPOINT)]
    pub rpc_url: Url,

    /// Chain id the endpoint must serve; signed into every transaction.
    #[arg(long, env = "LEDGER_CHAIN_ID", default_value_t = DEFAULT_CHAIN_ID)]
    pub chain_id: u64,

    /// Legacy gas price in wei.
    #[arg(long, env = "LEDGER_GAS_PRICE", default_value_t = DEFAULT_GAS_PRICE)]
    pub gas_price: u128,

    /// Multiplier applied to gas estimates, e.g. 1.2.
    #[arg(long, env = "LEDGER_GAS_MULTIPLIER", default_value_t = GasMultiplier::default())]
    pub gas_multiplier: GasMultiplier,

    /// Seconds to wait for a receipt after broadcast.
    #[arg(long, env = "LEDGER_CONFIRMATION_TIMEOUT_SECS", default_value_t = 120)]
    pub confirmation_timeout_secs: u64,

    /// Milliseconds between receipt lookups.
    #[arg(long, env = "LEDGER_POLL_INTERVAL_MS", default_value_t = 500)]
    pub poll_interval_ms: u64,

    /// Gas limit used for approvals instead of estimation.
    #[arg(long, env = "LEDGER_APPROVAL_GAS_LIMIT", default_value_t = DEFAULT_APPROVAL_GAS_LIMIT)]
    pub approval_gas_limit: u64,
}

impl From<&LedgerArgs> for PipelineConfig {
    fn from(args: &LedgerArgs) -> Self {
        Self {
            endpoint: args.rpc_url.clone(),
            chain_id: args.chain_id,
            gas_price: args.gas_price,
            gas_multiplier: args.gas_multiplier,
            confirmation_timeout: Duration::from_secs(args.confirmation_timeout_secs),
            poll_interval: Duration::from_millis(args.poll_interval_ms),
            approval_gas_limit: args.approval_gas_limit,
        }
    }
}

/// CLI args locating the signer's private key.
#[derive(Args)]
pub struct SignerArgs {
    /// Hex encoded private key.
    #[arg(long, env = "PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,

    /// Path to a file holding the hex encoded private key. Takes precedence over
    /// `--private-key`.
    #[arg(long, env = "ETH_KEY_PATH")]
    pub eth_key_path: Option<PathBuf>,
}

impl fmt::Debug for SignerArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignerArgs")
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("eth_key_path", &self.eth_key_path)
            .finish()
    }
}

impl SignerArgs {
    /// Loads the signer from the key file, falling back to the inline key.
    pub async fn load(&self) -> Result<PrivateKeySigner, ConfigError> {
        if let Some(path) = &self.eth_key_path {
            return load_ethereum_key(path).await;
        }
        let key = self.private_key.as_deref().context(MissingKeySnafu)?;
        parse_signing_key(key)
    }
}

/// Reads a hex encoded private key from `path`.
pub async fn load_ethereum_key(path: &Path) -> Result<PrivateKeySigner, ConfigError> {
    let mut file = File::open(path)
        .await
        .context(KeyFileReadSnafu { path })?;
    let mut hex_string = String::new();
    file.read_to_string(&mut hex_string)
        .await
        .context(KeyFileReadSnafu { path })?;

    parse_signing_key(&hex_string)
}

/// Parses a hex encoded private key, with or without a `0x` prefix.
pub fn parse_signing_key(hex_string: &str) -> Result<PrivateKeySigner, ConfigError> {
    let trimmed = hex_string.trim();
    let trimmed = trimmed.strip_prefix("0x").unwrap_or(trimmed);

    let key_bytes = Vec::from_hex(trimmed).context(KeyParseSnafu)?;
    ensure!(
        key_bytes.len() == 32,
        InvalidKeyLengthSnafu {
            length: key_bytes.len()
        }
    );

    let signing_key = SigningKey::from_slice(&key_bytes).context(InvalidKeySnafu)?;
    Ok(PrivateKeySigner::from_signing_key(signing_key))
}
