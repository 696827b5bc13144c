//! Peg arbitrage between the PSM and the DEX pool.
//!
//! When the pool prices KUSD outside the configured band, the keeper runs
//! a round-trip: mint at the PSM and sell on the DEX above peg, or buy on
//! the DEX and redeem at the PSM below peg. Every trade is simulated
//! against `getAmountsOut` and the PSM fee model first, sized against the
//! wallet, the configured cap, the pool depth, and (below peg) the PSM
//! pocket, and executed leg by leg on re-read balances.
//!
//! Planning is pure over snapshots; only `check_and_arbitrage` touches the
//! chain.

use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::{Address, U256};
use alloy::sol_types::SolCall;
use tracing::{debug, info, warn};

use crate::chain::ChainClient;
use crate::config::{limit_to_wad, units_from_f64, KeeperConfig};
use crate::contracts::{IErc20, IPair, IPsm, IRouter};
use crate::error::{KeeperError, Result};
use crate::math::{self, mul_div, to_wad, BPS, WAD};

/// DEX swap deadline margin, seconds.
const SWAP_DEADLINE: u64 = 300;

/// Pool reserves oriented as (gem, kusd), gem in native units, KUSD in WAD.
#[derive(Debug, Clone, Copy)]
pub struct PoolReserves {
    pub gem: U256,
    pub kusd: U256,
    pub last_ts: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbDirection {
    /// Price above peg: mint KUSD at the PSM, sell it on the DEX.
    MintAndSell,
    /// Price below peg: buy KUSD on the DEX, redeem it at the PSM.
    BuyAndRedeem,
}

/// Static planning inputs, snapshotted per tick.
#[derive(Debug, Clone, Copy)]
pub struct PegLimits {
    pub gem_decimals: u8,
    /// PSM fees, WAD.
    pub tin: U256,
    pub tout: U256,
    /// Peg band, WAD prices.
    pub upper_wad: U256,
    pub lower_wad: U256,
    pub min_arb_profit_bps: i64,
    pub slippage_bps: u64,
    /// Cap as a percentage of the pool's gem reserve.
    pub max_trade_pct: u64,
    /// Gem-reserve floor below which the pool is ignored, native units.
    pub min_pool_gem: U256,
    /// Configured nominal trade cap, native units.
    pub max_arb_gem: U256,
}

/// A fully simulated round-trip ready for execution.
#[derive(Debug, Clone, Copy)]
pub struct ArbPlan {
    pub direction: ArbDirection,
    /// Nominal trade size, gem native units.
    pub trade_gem: U256,
    pub spot_price_wad: U256,
    pub deviation_bps: i64,
    /// Simulated DEX-leg output (gem units above peg, KUSD WAD below).
    pub dex_out: U256,
    /// Slippage-bounded minimum for the DEX leg.
    pub min_out: U256,
    /// Simulated round-trip profit, gem native units.
    pub expected_profit_gem: U256,
    pub profit_bps: i64,
}

/// At most one round-trip per cooldown window.
pub fn cooldown_active(last_arb: Option<Instant>, cooldown: Duration) -> bool {
    matches!(last_arb, Some(last) if last.elapsed() < cooldown)
}

/// Spot price of KUSD in gem, WAD: `gem_normalized / kusd_normalized`.
pub fn spot_price_wad(reserves: &PoolReserves, gem_decimals: u8) -> U256 {
    math::wdiv(to_wad(reserves.gem, gem_decimals), reserves.kusd)
}

/// `|price − 1| · 10000`, basis points off peg.
pub fn deviation_bps(price_wad: U256) -> i64 {
    math::profit_bps(WAD, price_wad).abs()
}

/// KUSD minted by `sellGem`: `to_wad(gem) · (WAD − tin) / WAD`.
pub fn psm_kusd_out(gem_in: U256, tin: U256, gem_decimals: u8) -> U256 {
    math::wmul(to_wad(gem_in, gem_decimals), WAD.saturating_sub(tin))
}

/// Gem received for redeeming `kusd_in`: `K · WAD / (conversion · (WAD + tout))`.
///
/// This exact form under-rounds the fee side, so `buyGem` never reverts on
/// an under-paid fee.
pub fn psm_gem_out(kusd_in: U256, tout: U256, gem_decimals: u8) -> U256 {
    let conversion = U256::from(10u64).pow(U256::from(18 - gem_decimals.min(18) as u64));
    mul_div(kusd_in, WAD, conversion.saturating_mul(WAD + tout))
}

/// The KUSD `buyGem(gem_amt)` will pull, fee included.
pub fn psm_kusd_cost(gem_amt: U256, tout: U256, gem_decimals: u8) -> U256 {
    math::wmul(to_wad(gem_amt, gem_decimals), WAD + tout)
}

/// Floor an expected DEX output by the slippage tolerance.
pub fn apply_slippage(amount: U256, slippage_bps: u64) -> U256 {
    mul_div(amount, U256::from(BPS - slippage_bps.min(BPS)), U256::from(BPS))
}

/// Pool depth, spot price, and band membership in one gate.
pub fn check_band(limits: &PegLimits, reserves: &PoolReserves) -> Option<(ArbDirection, U256, i64)> {
    if reserves.gem < limits.min_pool_gem {
        return None;
    }
    let price = spot_price_wad(reserves, limits.gem_decimals);
    if price.is_zero() {
        return None;
    }
    let dev = deviation_bps(price);
    if dev < limits.min_arb_profit_bps {
        return None;
    }
    if price > limits.upper_wad {
        Some((ArbDirection::MintAndSell, price, dev))
    } else if price < limits.lower_wad {
        Some((ArbDirection::BuyAndRedeem, price, dev))
    } else {
        None
    }
}

/// Cap the nominal size by wallet, config, pool depth, and (below peg)
/// the PSM pocket. Zero means skip.
pub fn size_trade(
    limits: &PegLimits,
    reserves: &PoolReserves,
    direction: ArbDirection,
    wallet_gem: U256,
    pocket_gem: U256,
) -> U256 {
    let max_pool_trade = mul_div(
        reserves.gem,
        U256::from(limits.max_trade_pct),
        U256::from(100u64),
    );
    let mut size = wallet_gem.min(limits.max_arb_gem).min(max_pool_trade);
    if direction == ArbDirection::BuyAndRedeem {
        size = size.min(pocket_gem);
    }
    size
}

/// Fold the simulated DEX quote into a full plan, or reject the trade.
pub fn evaluate_roundtrip(
    limits: &PegLimits,
    direction: ArbDirection,
    trade_gem: U256,
    spot_price_wad: U256,
    dev_bps: i64,
    dex_out: U256,
) -> Option<ArbPlan> {
    let final_gem = match direction {
        // PSM mint happened before the quote; the quote is already gem out.
        ArbDirection::MintAndSell => dex_out,
        // The quote is KUSD out; redeem it through the PSM fee model.
        ArbDirection::BuyAndRedeem => psm_gem_out(dex_out, limits.tout, limits.gem_decimals),
    };
    if final_gem <= trade_gem {
        return None;
    }
    let expected_profit_gem = final_gem - trade_gem;
    let profit_bps = math::profit_bps(trade_gem, final_gem);
    if profit_bps < limits.min_arb_profit_bps {
        return None;
    }
    Some(ArbPlan {
        direction,
        trade_gem,
        spot_price_wad,
        deviation_bps: dev_bps,
        dex_out,
        min_out: apply_slippage(dex_out, limits.slippage_bps),
        expected_profit_gem,
        profit_bps,
    })
}

pub struct PegArbService {
    chain: Arc<ChainClient>,
    psm: Address,
    router: Address,
    pair: Address,
    gem: Address,
    kusd: Address,
    /// PSM gem custody address, read once at startup.
    pocket: Address,
    gem_decimals: u8,
    /// Pair orientation, determined once from `token0()`.
    gem_is_token0: bool,
    upper_wad: U256,
    lower_wad: U256,
    min_arb_profit_bps: i64,
    slippage_bps: u64,
    max_trade_pct: u64,
    min_pool_gem: U256,
    max_arb_gem: U256,
    cooldown: Duration,
    last_arb: Option<Instant>,
    /// Realized profit, gem native units.
    pub profit_gem: U256,
}

impl PegArbService {
    /// Resolve the PSM wiring (gem, kusd, pocket, decimals, orientation)
    /// from chain and freeze it for the life of the service.
    pub async fn init(chain: Arc<ChainClient>, config: &KeeperConfig) -> Result<Self> {
        let psm = config
            .psm_address
            .ok_or_else(|| KeeperError::Config("PSM_ADDRESS is not set".into()))?;
        let router = config
            .dex_router_address
            .ok_or_else(|| KeeperError::Config("DEX_ROUTER_ADDRESS is not set".into()))?;
        let pair = config
            .dex_pair_address
            .ok_or_else(|| KeeperError::Config("DEX_PAIR_ADDRESS is not set".into()))?;

        let gem = call_addr(&chain, psm, IPsm::gemCall {}, "psm.gem").await?;
        let kusd = call_addr(&chain, psm, IPsm::kusdCall {}, "psm.kusd").await?;
        let pocket = call_addr(&chain, psm, IPsm::pocketCall {}, "psm.pocket").await?;

        let ret = chain.call(gem, IErc20::decimalsCall {}.abi_encode()).await?;
        let gem_decimals = IErc20::decimalsCall::abi_decode_returns(&ret)
            .map_err(|e| KeeperError::ChainRpc(format!("gem.decimals decode: {e}")))?;

        let token0 = call_addr(&chain, pair, IPair::token0Call {}, "pair.token0").await?;
        let gem_is_token0 = token0 == gem;

        info!(
            gem = %gem,
            kusd = %kusd,
            pocket = %pocket,
            gem_decimals,
            gem_is_token0,
            "peg arbitrage service initialized"
        );

        Ok(PegArbService {
            chain,
            psm,
            router,
            pair,
            gem,
            kusd,
            pocket,
            gem_decimals,
            gem_is_token0,
            upper_wad: limit_to_wad(config.peg_upper_limit),
            lower_wad: limit_to_wad(config.peg_lower_limit),
            min_arb_profit_bps: config.min_arb_profit_bps(),
            slippage_bps: config.slippage_bps(),
            max_trade_pct: config.max_trade_percent_of_pool as u64,
            min_pool_gem: units_from_f64(config.min_pool_liquidity, gem_decimals),
            max_arb_gem: units_from_f64(config.max_arb_amount, gem_decimals),
            cooldown: Duration::from_millis(config.arb_cooldown_ms),
            last_arb: None,
            profit_gem: U256::ZERO,
        })
    }

    /// One pass of the arbitrage state machine: cooldown, band check,
    /// sizing, simulation, execution. Returns true iff a round-trip
    /// executed; the cooldown is updated only then.
    pub async fn check_and_arbitrage(&mut self) -> Result<bool> {
        if cooldown_active(self.last_arb, self.cooldown) {
            debug!("peg arbitrage cooling down");
            return Ok(false);
        }

        let limits = self.read_limits().await?;
        let reserves = self.read_reserves().await?;
        if reserves.gem < limits.min_pool_gem {
            warn!(
                gem_reserve = %reserves.gem,
                floor = %limits.min_pool_gem,
                "pool liquidity below floor, skipping peg check"
            );
            return Ok(false);
        }

        let (direction, price, dev_bps) = match check_band(&limits, &reserves) {
            Some(hit) => hit,
            None => return Ok(false),
        };
        info!(
            price = math::wad_to_f64(price),
            deviation_pct = math::bps_to_percent(dev_bps),
            ?direction,
            "peg deviation detected"
        );

        let wallet_gem = self.erc20_balance(self.gem, self.chain.signer_address()).await?;
        let pocket_gem = if direction == ArbDirection::BuyAndRedeem {
            let balance = self.erc20_balance(self.gem, self.pocket).await?;
            if balance.is_zero() {
                warn!("psm pocket is empty, cannot redeem below peg");
                return Ok(false);
            }
            balance
        } else {
            U256::ZERO
        };

        let trade_gem = size_trade(&limits, &reserves, direction, wallet_gem, pocket_gem);
        if trade_gem.is_zero() {
            warn!(
                wallet_gem = %wallet_gem,
                "trade size capped to zero, skipping"
            );
            return Ok(false);
        }

        let dex_out = self.quote(direction, trade_gem, &limits).await?;
        let plan = match evaluate_roundtrip(&limits, direction, trade_gem, price, dev_bps, dex_out)
        {
            Some(plan) => plan,
            None => {
                info!(
                    trade_gem = %trade_gem,
                    "simulated round-trip below profit gate, skipping"
                );
                return Ok(false);
            }
        };

        info!(
            trade_gem = %plan.trade_gem,
            expected_profit_gem = %plan.expected_profit_gem,
            profit_pct = math::bps_to_percent(plan.profit_bps),
            "executing peg arbitrage"
        );
        let realized = self.execute(&plan).await?;
        self.last_arb = Some(Instant::now());
        self.profit_gem = self.profit_gem.saturating_add(realized);
        Ok(true)
    }

    async fn read_limits(&self) -> Result<PegLimits> {
        let tin_ret = self.chain.call(self.psm, IPsm::tinCall {}.abi_encode()).await?;
        let tin = IPsm::tinCall::abi_decode_returns(&tin_ret)
            .map_err(|e| KeeperError::ChainRpc(format!("psm.tin decode: {e}")))?;
        let tout_ret = self.chain.call(self.psm, IPsm::toutCall {}.abi_encode()).await?;
        let tout = IPsm::toutCall::abi_decode_returns(&tout_ret)
            .map_err(|e| KeeperError::ChainRpc(format!("psm.tout decode: {e}")))?;
        Ok(PegLimits {
            gem_decimals: self.gem_decimals,
            tin,
            tout,
            upper_wad: self.upper_wad,
            lower_wad: self.lower_wad,
            min_arb_profit_bps: self.min_arb_profit_bps,
            slippage_bps: self.slippage_bps,
            max_trade_pct: self.max_trade_pct,
            min_pool_gem: self.min_pool_gem,
            max_arb_gem: self.max_arb_gem,
        })
    }

    async fn read_reserves(&self) -> Result<PoolReserves> {
        let ret = self
            .chain
            .call(self.pair, IPair::getReservesCall {}.abi_encode())
            .await?;
        let r = IPair::getReservesCall::abi_decode_returns(&ret)
            .map_err(|e| KeeperError::ChainRpc(format!("pair.getReserves decode: {e}")))?;
        let (gem, kusd) = if self.gem_is_token0 {
            (r.reserve0, r.reserve1)
        } else {
            (r.reserve1, r.reserve0)
        };
        Ok(PoolReserves {
            gem,
            kusd,
            last_ts: u64::try_from(r.blockTimestampLast).unwrap_or(0),
        })
    }

    /// Simulate the DEX leg of the round-trip.
    async fn quote(&self, direction: ArbDirection, trade_gem: U256, limits: &PegLimits) -> Result<U256> {
        let (amount_in, path) = match direction {
            ArbDirection::MintAndSell => (
                psm_kusd_out(trade_gem, limits.tin, limits.gem_decimals),
                vec![self.kusd, self.gem],
            ),
            ArbDirection::BuyAndRedeem => (trade_gem, vec![self.gem, self.kusd]),
        };
        let ret = self
            .chain
            .call(
                self.router,
                IRouter::getAmountsOutCall {
                    amountIn: amount_in,
                    path,
                }
                .abi_encode(),
            )
            .await?;
        let amounts = IRouter::getAmountsOutCall::abi_decode_returns(&ret)
            .map_err(|e| KeeperError::ChainRpc(format!("getAmountsOut decode: {e}")))?;
        amounts
            .last()
            .copied()
            .ok_or_else(|| KeeperError::ChainRpc("getAmountsOut returned empty path".into()))
    }

    /// Run both legs, re-reading the keeper balance between them so only
    /// received funds move, and approving the exact amount each leg needs.
    async fn execute(&mut self, plan: &ArbPlan) -> Result<U256> {
        let keeper = self.chain.signer_address();
        let gem_before = self.erc20_balance(self.gem, keeper).await?;
        let deadline = U256::from(self.chain.block_timestamp().await? + SWAP_DEADLINE);

        match plan.direction {
            ArbDirection::MintAndSell => {
                // Leg 1: mint KUSD at the PSM.
                let kusd_before = self.erc20_balance(self.kusd, keeper).await?;
                self.approve(self.gem, self.psm, plan.trade_gem).await?;
                self.chain
                    .send(
                        self.psm,
                        IPsm::sellGemCall {
                            usr: keeper,
                            gemAmt: plan.trade_gem,
                        }
                        .abi_encode(),
                    )
                    .await?;
                let kusd_after = self.erc20_balance(self.kusd, keeper).await?;
                let minted = kusd_after.saturating_sub(kusd_before);
                if minted.is_zero() {
                    return Err(KeeperError::ChainRpc(
                        "psm.sellGem confirmed but minted nothing".into(),
                    ));
                }

                // Leg 2: sell the minted KUSD on the DEX.
                self.approve(self.kusd, self.router, minted).await?;
                self.chain
                    .send(
                        self.router,
                        IRouter::swapExactTokensForTokensCall {
                            amountIn: minted,
                            amountOutMin: plan.min_out,
                            path: vec![self.kusd, self.gem],
                            to: keeper,
                            deadline,
                        }
                        .abi_encode(),
                    )
                    .await?;
            }
            ArbDirection::BuyAndRedeem => {
                // Leg 1: buy KUSD on the DEX.
                let kusd_before = self.erc20_balance(self.kusd, keeper).await?;
                self.approve(self.gem, self.router, plan.trade_gem).await?;
                self.chain
                    .send(
                        self.router,
                        IRouter::swapExactTokensForTokensCall {
                            amountIn: plan.trade_gem,
                            amountOutMin: plan.min_out,
                            path: vec![self.gem, self.kusd],
                            to: keeper,
                            deadline,
                        }
                        .abi_encode(),
                    )
                    .await?;
                let kusd_after = self.erc20_balance(self.kusd, keeper).await?;
                let bought = kusd_after.saturating_sub(kusd_before);
                if bought.is_zero() {
                    return Err(KeeperError::ChainRpc(
                        "dex swap confirmed but delivered nothing".into(),
                    ));
                }

                // Leg 2: redeem through the PSM at the fee-exact amount.
                let limits = self.read_limits().await?;
                let gem_amt = psm_gem_out(bought, limits.tout, self.gem_decimals);
                if gem_amt.is_zero() {
                    return Err(KeeperError::LimitExceeded(
                        "redeemable amount rounds to zero".into(),
                    ));
                }
                let kusd_cost = psm_kusd_cost(gem_amt, limits.tout, self.gem_decimals);
                self.approve(self.kusd, self.psm, kusd_cost).await?;
                self.chain
                    .send(
                        self.psm,
                        IPsm::buyGemCall {
                            usr: keeper,
                            gemAmt: gem_amt,
                        }
                        .abi_encode(),
                    )
                    .await?;
            }
        }

        let gem_after = self.erc20_balance(self.gem, keeper).await?;
        let realized = gem_after.saturating_sub(gem_before);
        info!(
            realized_gem = %realized,
            expected_gem = %plan.expected_profit_gem,
            "peg round-trip complete"
        );
        Ok(realized)
    }

    async fn approve(&self, token: Address, spender: Address, amount: U256) -> Result<()> {
        self.chain
            .send(
                token,
                IErc20::approveCall { spender, amount }.abi_encode(),
            )
            .await?;
        Ok(())
    }

    async fn erc20_balance(&self, token: Address, owner: Address) -> Result<U256> {
        let ret = self
            .chain
            .call(token, IErc20::balanceOfCall { owner }.abi_encode())
            .await?;
        IErc20::balanceOfCall::abi_decode_returns(&ret)
            .map_err(|e| KeeperError::ChainRpc(format!("balanceOf decode: {e}")))
    }
}

async fn call_addr<C>(chain: &ChainClient, to: Address, call: C, what: &str) -> Result<Address>
where
    C: SolCall<Return = Address>,
{
    let ret = chain.call(to, call.abi_encode()).await?;
    C::abi_decode_returns(&ret).map_err(|e| KeeperError::ChainRpc(format!("{what} decode: {e}")))
}
