//! Executors: the only components that spend gas.
//!
//! Each one re-checks capacity and balances against the chain immediately
//! before sending, builds the call, and records the outcome in the health
//! counters. Batches go out sequentially with a fixed gap between sends;
//! a revert is counted and abandoned for the cycle, because the usual
//! cause is a competing keeper winning the race.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;
use tracing::{error, info, warn};

use crate::auctions::BiddingOpportunity;
use crate::balance::VatBalanceManager;
use crate::chain::ChainClient;
use crate::contracts::{ilk_name, IClipper, IDog, IErc20, IFlapper, IFlopper};
use crate::english::{EnglishKind, EnglishOpportunity};
use crate::error::{KeeperError, Result};
use crate::health::KeeperHealth;
use crate::math::{self, wad_to_f64, RAD};
use crate::vaults::{read_dog_ilk, read_dog_params, DogIlk, DogParams, LiquidationOpportunity};

/// Gap between sequential dispatches within a batch.
pub const DISPATCH_GAP: Duration = Duration::from_secs(2);

/// Liquidation throttle preflight: either ceiling full means refuse.
pub fn ceiling_reached(global: &DogParams, ilk: &DogIlk) -> bool {
    global.dirt >= global.hole || ilk.dirt >= ilk.hole
}

/// Collateral a take may buy: the lot, capped by configuration and by what
/// the Vat balance affords at the current price.
///
/// `vat_balance / price` truncates toward zero, so the spent amount
/// `amount · price` never exceeds the balance.
pub fn take_amount(lot: U256, cap: U256, price_ray: U256, vat_balance_rad: U256) -> U256 {
    if price_ray.is_zero() {
        return U256::ZERO;
    }
    let affordable = vat_balance_rad / price_ray;
    lot.min(cap).min(affordable)
}

/// Estimated take profit in RAD: `amount · (market − current)`.
pub fn take_profit_rad(amount: U256, market_ray: U256, current_ray: U256) -> U256 {
    if market_ray <= current_ray {
        return U256::ZERO;
    }
    amount.saturating_mul(market_ray - current_ray)
}

async fn erc20_balance(chain: &ChainClient, token: Address, owner: Address) -> Result<U256> {
    let ret = chain
        .call(token, IErc20::balanceOfCall { owner }.abi_encode())
        .await?;
    IErc20::balanceOfCall::abi_decode_returns(&ret)
        .map_err(|e| KeeperError::ChainRpc(format!("balanceOf decode: {e}")))
}

// ─── Liquidations ───────────────────────────────────────────────────────

pub struct LiquidationExecutor {
    chain: Arc<ChainClient>,
    dog: Address,
    emergency_stop: bool,
    health: Arc<KeeperHealth>,
}

impl LiquidationExecutor {
    pub fn new(chain: Arc<ChainClient>, dog: Address, emergency_stop: bool, health: Arc<KeeperHealth>) -> Self {
        LiquidationExecutor {
            chain,
            dog,
            emergency_stop,
            health,
        }
    }

    /// Sequentially bark every opportunity that survives preflight.
    pub async fn dispatch(&self, batch: &[LiquidationOpportunity]) {
        for (i, opp) in batch.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(DISPATCH_GAP).await;
            }
            if let Err(e) = self.execute(opp).await {
                self.log_skip(opp, &e);
            }
        }
    }

    async fn execute(&self, opp: &LiquidationOpportunity) -> Result<()> {
        if self.emergency_stop {
            warn!("emergency stop set, refusing liquidation");
            return Ok(());
        }

        let global = read_dog_params(&self.chain, self.dog).await?;
        let ilk = read_dog_ilk(&self.chain, self.dog, opp.urn.ilk).await?;
        if ceiling_reached(&global, &ilk) {
            return Err(KeeperError::LimitExceeded(format!(
                "{}: liquidation ceilings full (Dirt {} / Hole {}, dirt {} / hole {})",
                ilk_name(opp.urn.ilk),
                math::rad_to_f64(global.dirt),
                math::rad_to_f64(global.hole),
                math::rad_to_f64(ilk.dirt),
                math::rad_to_f64(ilk.hole),
            )));
        }

        let receipt = self
            .chain
            .send(
                self.dog,
                IDog::barkCall {
                    ilk: opp.urn.ilk,
                    urn: opp.urn.urn,
                    kpr: self.chain.signer_address(),
                }
                .abi_encode(),
            )
            .await?;

        self.health.liquidations.fetch_add(1, Ordering::Relaxed);
        info!(
            ilk = %ilk_name(opp.urn.ilk),
            urn = %opp.urn.urn,
            ink = wad_to_f64(opp.urn.ink),
            art = wad_to_f64(opp.urn.art),
            ratio_pct = crate::vaults::ratio_percent(opp.ratio_bps),
            tx = %receipt.tx_hash,
            gas_used = receipt.gas_used,
            "vault liquidated"
        );
        Ok(())
    }

    fn log_skip(&self, opp: &LiquidationOpportunity, err: &KeeperError) {
        match err {
            KeeperError::LimitExceeded(msg) => {
                info!(urn = %opp.urn.urn, "{msg}");
            }
            KeeperError::TxReverted { tx_hash, reason } => {
                self.health.record_error();
                warn!(urn = %opp.urn.urn, tx = %tx_hash, reason = %reason, "bark reverted");
            }
            other => {
                if other.is_fatal() {
                    self.health.record_fatal();
                } else {
                    self.health.record_error();
                }
                error!(urn = %opp.urn.urn, error = %other, "liquidation failed");
            }
        }
    }
}

// ─── Collateral takes ───────────────────────────────────────────────────

pub struct TakeExecutor {
    chain: Arc<ChainClient>,
    balances: Arc<VatBalanceManager>,
    /// Per-auction collateral cap, WAD.
    max_collateral: U256,
    emergency_stop: bool,
    health: Arc<KeeperHealth>,
}

impl TakeExecutor {
    pub fn new(
        chain: Arc<ChainClient>,
        balances: Arc<VatBalanceManager>,
        max_collateral: U256,
        emergency_stop: bool,
        health: Arc<KeeperHealth>,
    ) -> Self {
        TakeExecutor {
            chain,
            balances,
            max_collateral,
            emergency_stop,
            health,
        }
    }

    /// Batch is already sorted by descending profit.
    pub async fn dispatch(&self, batch: &[BiddingOpportunity]) {
        for (i, opp) in batch.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(DISPATCH_GAP).await;
            }
            if let Err(e) = self.execute(opp).await {
                match &e {
                    KeeperError::InsufficientFunds(msg) => {
                        warn!(id = %opp.auction.id, "{msg}");
                    }
                    KeeperError::TxReverted { tx_hash, reason } => {
                        self.health.record_error();
                        warn!(id = %opp.auction.id, tx = %tx_hash, reason = %reason, "take reverted");
                    }
                    other => {
                        if other.is_fatal() {
                            self.health.record_fatal();
                        } else {
                            self.health.record_error();
                        }
                        error!(id = %opp.auction.id, error = %other, "take failed");
                    }
                }
            }
        }
    }

    async fn execute(&self, opp: &BiddingOpportunity) -> Result<()> {
        if self.emergency_stop {
            warn!("emergency stop set, refusing take");
            return Ok(());
        }

        let vat_balance = self.balances.vat_balance().await?;
        let amount = take_amount(
            opp.max_take,
            self.max_collateral,
            opp.current_price,
            vat_balance,
        );
        if amount.is_zero() {
            return Err(KeeperError::InsufficientFunds(format!(
                "vat balance {} KUSD affords none of auction {}",
                math::rad_to_f64(vat_balance),
                opp.auction.id
            )));
        }

        let receipt = self
            .chain
            .send(
                opp.auction.clipper,
                IClipper::takeCall {
                    id: opp.auction.id,
                    amt: amount,
                    max: opp.current_price,
                    who: self.chain.signer_address(),
                    data: Bytes::new(),
                }
                .abi_encode(),
            )
            .await?;

        let profit = take_profit_rad(amount, opp.market_price, opp.current_price);
        self.health.takes.fetch_add(1, Ordering::Relaxed);
        self.health.take_profit_micro_kusd.fetch_add(
            u64::try_from(profit / (RAD / U256::from(1_000_000u64))).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
        info!(
            ilk = %ilk_name(opp.auction.ilk),
            id = %opp.auction.id,
            amount = wad_to_f64(amount),
            max_price = math::ray_to_f64(opp.current_price),
            profit_kusd = math::rad_to_f64(profit),
            tx = %receipt.tx_hash,
            "collateral taken"
        );
        Ok(())
    }
}

// ─── Surplus auction bids (tend) ────────────────────────────────────────

pub struct FlapExecutor {
    chain: Arc<ChainClient>,
    flapper: Address,
    /// Bid asset.
    sklc: Address,
    emergency_stop: bool,
    health: Arc<KeeperHealth>,
}

impl FlapExecutor {
    pub fn new(
        chain: Arc<ChainClient>,
        flapper: Address,
        sklc: Address,
        emergency_stop: bool,
        health: Arc<KeeperHealth>,
    ) -> Self {
        FlapExecutor {
            chain,
            flapper,
            sklc,
            emergency_stop,
            health,
        }
    }

    pub async fn dispatch(&self, batch: &[EnglishOpportunity]) {
        for (i, opp) in batch.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(DISPATCH_GAP).await;
            }
            if let Err(e) = self.execute(opp).await {
                match &e {
                    KeeperError::InsufficientFunds(msg) => warn!(id = %opp.auction.id, "{msg}"),
                    other => {
                        if other.is_fatal() {
                            self.health.record_fatal();
                        } else {
                            self.health.record_error();
                        }
                        warn!(id = %opp.auction.id, error = %other, "tend failed");
                    }
                }
            }
        }
    }

    async fn execute(&self, opp: &EnglishOpportunity) -> Result<()> {
        debug_assert_eq!(opp.auction.kind, EnglishKind::Flap);
        if self.emergency_stop || !opp.profitable {
            return Ok(());
        }

        let min_bid = opp.next_amount;
        let balance = erc20_balance(&self.chain, self.sklc, self.chain.signer_address()).await?;
        if balance < min_bid {
            return Err(KeeperError::InsufficientFunds(format!(
                "tend needs {} sKLC, wallet holds {}",
                wad_to_f64(min_bid),
                wad_to_f64(balance)
            )));
        }

        // Fresh exact approval per bid bounds allowance exposure.
        self.chain
            .send(
                self.sklc,
                IErc20::approveCall {
                    spender: self.flapper,
                    amount: min_bid,
                }
                .abi_encode(),
            )
            .await?;
        let receipt = self
            .chain
            .send(
                self.flapper,
                IFlapper::tendCall {
                    id: opp.auction.id,
                    lot: opp.auction.lot,
                    bid: min_bid,
                }
                .abi_encode(),
            )
            .await?;

        self.health.flap_bids.fetch_add(1, Ordering::Relaxed);
        info!(
            id = %opp.auction.id,
            bid_sklc = wad_to_f64(min_bid),
            lot_kusd = math::rad_to_f64(opp.auction.lot),
            tx = %receipt.tx_hash,
            "surplus auction bid placed"
        );
        Ok(())
    }
}

// ─── Debt auction bids (dent) ───────────────────────────────────────────

pub struct FlopExecutor {
    chain: Arc<ChainClient>,
    flopper: Address,
    balances: Arc<VatBalanceManager>,
    emergency_stop: bool,
    health: Arc<KeeperHealth>,
}

impl FlopExecutor {
    pub fn new(
        chain: Arc<ChainClient>,
        flopper: Address,
        balances: Arc<VatBalanceManager>,
        emergency_stop: bool,
        health: Arc<KeeperHealth>,
    ) -> Self {
        FlopExecutor {
            chain,
            flopper,
            balances,
            emergency_stop,
            health,
        }
    }

    pub async fn dispatch(&self, batch: &[EnglishOpportunity]) {
        for (i, opp) in batch.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(DISPATCH_GAP).await;
            }
            if let Err(e) = self.execute(opp).await {
                match &e {
                    KeeperError::InsufficientFunds(msg) => warn!(id = %opp.auction.id, "{msg}"),
                    other => {
                        if other.is_fatal() {
                            self.health.record_fatal();
                        } else {
                            self.health.record_error();
                        }
                        warn!(id = %opp.auction.id, error = %other, "dent failed");
                    }
                }
            }
        }
    }

    async fn execute(&self, opp: &EnglishOpportunity) -> Result<()> {
        debug_assert_eq!(opp.auction.kind, EnglishKind::Flop);
        if self.emergency_stop || !opp.profitable {
            return Ok(());
        }

        // A dent pays the standing bid out of the Vat balance.
        let vat_balance = self.balances.vat_balance().await?;
        if vat_balance < opp.auction.bid {
            return Err(KeeperError::InsufficientFunds(format!(
                "dent needs {} KUSD in the vat, have {}",
                math::rad_to_f64(opp.auction.bid),
                math::rad_to_f64(vat_balance)
            )));
        }

        let max_lot = opp.next_amount;
        let receipt = self
            .chain
            .send(
                self.flopper,
                IFlopper::dentCall {
                    id: opp.auction.id,
                    lot: max_lot,
                    bid: opp.auction.bid,
                }
                .abi_encode(),
            )
            .await?;

        self.health.flop_bids.fetch_add(1, Ordering::Relaxed);
        info!(
            id = %opp.auction.id,
            lot_sklc = wad_to_f64(max_lot),
            bid_kusd = math::rad_to_f64(opp.auction.bid),
            tx = %receipt.tx_hash,
            "debt auction bid placed"
        );
        Ok(())
    }
}

