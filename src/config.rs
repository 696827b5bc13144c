//! Keeper configuration.
//!
//! Every knob is a clap flag bound to the environment variable of the same
//! name, so `kusd-keeper --help` documents the deployment interface. The
//! collateral set is variable per deployment and is read straight from the
//! environment: `COLLATERALS` lists ilk names, and each name contributes
//! `<PREFIX>_PIP_ADDRESS` and optional `<PREFIX>_CLIPPER` variables, where
//! the prefix is the name uppercased with `-` replaced by `_`.

use alloy::primitives::{Address, B256, U256};
use clap::{ArgAction, Parser, ValueEnum};

use crate::contracts::ilk_from_name;
use crate::error::{KeeperError, Result};
use crate::math::percent_to_bps;

/// Which monitors the orchestrator runs each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Everything: vault scans, auction bidding, peg arbitrage.
    Full,
    /// Vault scans and liquidations only.
    Kick,
    /// Collateral-auction bidding only.
    Bid,
    /// Peg arbitrage only.
    Peg,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "kusd-keeper", about = "Autonomous keeper for the KUSD stablecoin protocol")]
pub struct KeeperConfig {
    /// Hex-encoded signing key for the keeper wallet.
    #[arg(long, env = "PRIVATE_KEY", hide_env_values = true)]
    pub private_key: String,

    /// HTTP JSON-RPC endpoint.
    #[arg(long, env = "RPC_URL")]
    pub rpc_url: String,

    /// EIP-155 chain id.
    #[arg(long, env = "CHAIN_ID")]
    pub chain_id: u64,

    #[arg(long, env = "MODE", value_enum, default_value_t = Mode::Full)]
    pub mode: Mode,

    /// Orchestrator tick period in milliseconds.
    #[arg(long, env = "CHECK_INTERVAL", default_value_t = 30_000)]
    pub check_interval: u64,

    /// Minimum auction discount to act on, in percent.
    #[arg(long, env = "MIN_PROFIT_PERCENTAGE", default_value_t = 5.0)]
    pub min_profit_percentage: f64,

    /// Refuse to start if the fixed gas price exceeds this (wei).
    #[arg(long, env = "MAX_GAS_PRICE", default_value_t = 500_000_000_000)]
    pub max_gas_price: u128,

    /// Fixed gas price for every transaction (wei); the chain has stable gas.
    #[arg(long, env = "GAS_PRICE", default_value_t = 1_000_000_000)]
    pub gas_price: u128,

    /// Gas limit for every transaction.
    #[arg(long, env = "GAS_LIMIT", default_value_t = 1_500_000)]
    pub gas_limit: u64,

    /// Cap on collateral taken from a single auction, in whole tokens.
    #[arg(long, env = "MAX_COLLATERAL_PER_AUCTION", default_value_t = 1_000_000.0)]
    pub max_collateral_per_auction: f64,

    /// Refuse every dispatch when set.
    #[arg(long, env = "EMERGENCY_STOP", action = ArgAction::Set, default_value_t = false)]
    pub emergency_stop: bool,

    // ── core deployment addresses ────────────────────────────────────────
    #[arg(long, env = "VAT_ADDRESS")]
    pub vat_address: Address,

    #[arg(long, env = "DOG_ADDRESS")]
    pub dog_address: Address,

    /// KUSD ERC-20 token.
    #[arg(long, env = "KUSD_ADDRESS")]
    pub kusd_address: Address,

    /// Join adapter between the KUSD ERC-20 and internal Vat balances.
    #[arg(long, env = "KUSD_JOIN_ADDRESS")]
    pub kusd_join_address: Address,

    /// sKLC governance token (surplus-auction bid asset).
    #[arg(long, env = "SKLC_ADDRESS")]
    pub sklc_address: Option<Address>,

    #[arg(long, env = "FLAPPER_ADDRESS")]
    pub flapper_address: Option<Address>,

    #[arg(long, env = "FLOPPER_ADDRESS")]
    pub flopper_address: Option<Address>,

    /// Bid in surplus auctions. The rational-bidding policy is external;
    /// this flag is the keeper's `profitable` input.
    #[arg(long, env = "FLAP_BIDDING", action = ArgAction::Set, default_value_t = false)]
    pub flap_bidding: bool,

    /// Bid in debt auctions; same policy input as `flap_bidding`.
    #[arg(long, env = "FLOP_BIDDING", action = ArgAction::Set, default_value_t = false)]
    pub flop_bidding: bool,

    // ── peg arbitrage ────────────────────────────────────────────────────
    #[arg(long, env = "PSM_ADDRESS")]
    pub psm_address: Option<Address>,

    #[arg(long, env = "DEX_ROUTER_ADDRESS")]
    pub dex_router_address: Option<Address>,

    #[arg(long, env = "DEX_PAIR_ADDRESS")]
    pub dex_pair_address: Option<Address>,

    /// Upper peg band, e.g. 1.005.
    #[arg(long, env = "PEG_UPPER_LIMIT", default_value_t = 1.005)]
    pub peg_upper_limit: f64,

    /// Lower peg band, e.g. 0.995.
    #[arg(long, env = "PEG_LOWER_LIMIT", default_value_t = 0.995)]
    pub peg_lower_limit: f64,

    /// Largest nominal arb trade, in whole gem tokens.
    #[arg(long, env = "MAX_ARB_AMOUNT", default_value_t = 1_000.0)]
    pub max_arb_amount: f64,

    /// Minimum simulated round-trip profit to trade, in percent.
    #[arg(long, env = "MIN_ARB_PROFIT_PERCENTAGE", default_value_t = 0.5)]
    pub min_arb_profit_percentage: f64,

    /// Slippage tolerance applied to the DEX leg, e.g. 0.005.
    #[arg(long, env = "ARB_SLIPPAGE_TOLERANCE", default_value_t = 0.005)]
    pub arb_slippage_tolerance: f64,

    /// Cooldown between peg round-trips, in milliseconds.
    #[arg(long, env = "ARB_COOLDOWN_MS", default_value_t = 60_000)]
    pub arb_cooldown_ms: u64,

    /// Largest trade as a percentage of the pool's gem reserve.
    #[arg(long, env = "MAX_TRADE_PERCENT_OF_POOL", default_value_t = 10.0)]
    pub max_trade_percent_of_pool: f64,

    /// Skip peg checks when the pool's gem reserve is below this, in whole
    /// gem tokens.
    #[arg(long, env = "MIN_POOL_LIQUIDITY", default_value_t = 5.0)]
    pub min_pool_liquidity: f64,

    /// tracing env-filter directive.
    #[arg(long, env = "LOG_FILTER", default_value = "info")]
    pub log_filter: String,
}

/// One enabled collateral type.
#[derive(Debug, Clone)]
pub struct CollateralConfig {
    pub name: String,
    pub ilk: B256,
    /// Price feed for this collateral.
    pub pip: Address,
    /// Clipper address; read from `dog.ilks` when absent.
    pub clipper: Option<Address>,
}

impl KeeperConfig {
    /// Validate cross-field constraints that clap cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.gas_price > self.max_gas_price {
            return Err(KeeperError::Config(format!(
                "GAS_PRICE {} exceeds MAX_GAS_PRICE {}",
                self.gas_price, self.max_gas_price
            )));
        }
        if self.peg_lower_limit >= self.peg_upper_limit {
            return Err(KeeperError::Config(format!(
                "PEG_LOWER_LIMIT {} must be below PEG_UPPER_LIMIT {}",
                self.peg_lower_limit, self.peg_upper_limit
            )));
        }
        if !(0.0..1.0).contains(&self.arb_slippage_tolerance) {
            return Err(KeeperError::Config(format!(
                "ARB_SLIPPAGE_TOLERANCE {} must be in [0, 1)",
                self.arb_slippage_tolerance
            )));
        }
        if self.peg_enabled() {
            for (name, set) in [
                ("PSM_ADDRESS", self.psm_address.is_some()),
                ("DEX_ROUTER_ADDRESS", self.dex_router_address.is_some()),
                ("DEX_PAIR_ADDRESS", self.dex_pair_address.is_some()),
            ] {
                if !set {
                    return Err(KeeperError::Config(format!(
                        "{name} is required in mode {:?}",
                        self.mode
                    )));
                }
            }
        }
        if (self.flap_bidding && self.flapper_address.is_none())
            || (self.flop_bidding && self.flopper_address.is_none())
        {
            return Err(KeeperError::Config(
                "FLAP_BIDDING/FLOP_BIDDING require the auction house address".into(),
            ));
        }
        Ok(())
    }

    /// Read the enabled collateral set from the environment.
    pub fn collaterals(&self) -> Result<Vec<CollateralConfig>> {
        let list = match std::env::var("COLLATERALS") {
            Ok(v) => v,
            Err(_) => return Ok(Vec::new()),
        };
        let mut out = Vec::new();
        for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let prefix = name.to_uppercase().replace('-', "_");
            let pip_var = format!("{prefix}_PIP_ADDRESS");
            let pip: Address = std::env::var(&pip_var)
                .map_err(|_| KeeperError::Config(format!("{pip_var} is not set")))?
                .parse()
                .map_err(|e| KeeperError::Config(format!("{pip_var}: {e}")))?;
            let clipper = match std::env::var(format!("{prefix}_CLIPPER")) {
                Ok(v) => Some(
                    v.parse()
                        .map_err(|e| KeeperError::Config(format!("{prefix}_CLIPPER: {e}")))?,
                ),
                Err(_) => None,
            };
            out.push(CollateralConfig {
                name: name.to_string(),
                ilk: ilk_from_name(name)?,
                pip,
                clipper,
            });
        }
        Ok(out)
    }

    pub fn kick_enabled(&self) -> bool {
        matches!(self.mode, Mode::Full | Mode::Kick)
    }

    pub fn bid_enabled(&self) -> bool {
        matches!(self.mode, Mode::Full | Mode::Bid)
    }

    pub fn peg_enabled(&self) -> bool {
        matches!(self.mode, Mode::Full | Mode::Peg)
    }

    pub fn min_profit_bps(&self) -> i64 {
        percent_to_bps(self.min_profit_percentage)
    }

    pub fn min_arb_profit_bps(&self) -> i64 {
        percent_to_bps(self.min_arb_profit_percentage)
    }

    /// Slippage tolerance in basis points, truncated toward zero.
    pub fn slippage_bps(&self) -> u64 {
        (self.arb_slippage_tolerance * 10_000.0) as u64
    }

    /// `MAX_COLLATERAL_PER_AUCTION` as a WAD amount.
    pub fn max_collateral_wad(&self) -> U256 {
        units_from_f64(self.max_collateral_per_auction, 18)
    }
}

/// Convert a whole-token config amount to base units at the given decimals.
///
/// Config values carry at most 6 fractional digits of intent; anything finer
/// is not a deployment knob.
pub fn units_from_f64(amount: f64, decimals: u8) -> U256 {
    let micro = (amount * 1e6).round().max(0.0) as u128;
    let micro = U256::from(micro);
    if decimals >= 6 {
        micro * U256::from(10u64).pow(U256::from(decimals as u64 - 6))
    } else {
        micro / U256::from(10u64).pow(U256::from(6 - decimals as u64))
    }
}

/// A peg-band limit (e.g. 1.005) as a WAD-scaled price.
pub fn limit_to_wad(limit: f64) -> U256 {
    units_from_f64(limit, 18)
}
