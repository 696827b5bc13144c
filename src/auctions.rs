//! Dutch collateral-auction tracking.
//!
//! `Bark` logs from the Dog open auctions; each tracked auction is re-read
//! from its Clipper every tick, priced on the linear decay curve, and
//! compared against the oracle price. Settled auctions (`tab = 0`) are
//! dropped. At most one opportunity per auction per tick.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{Address, B256, U256};
use alloy::sol_types::{SolCall, SolEvent};
use tracing::{debug, info, warn};

use crate::chain::{ChainClient, LogFilter};
use crate::contracts::{ilk_name, IClipper, IDog};
use crate::error::{KeeperError, Result};
use crate::math::{self, ray_to_f64, wad_to_f64};
use crate::price::PriceService;

/// Fixed auction duration τ: linear decay from `top` to zero over 6 hours.
pub const AUCTION_DURATION: u64 = 21_600;
/// Trailing window replayed at startup to pick up auctions already open.
const BARK_HYDRATION_BLOCKS: u64 = 10_000;
const LOG_CHUNK: u64 = 10_000;

/// Wire sentinel `tab = 0`, tagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuctionStatus {
    Active,
    Closed,
}

/// Snapshot of one Clipper sale.
#[derive(Debug, Clone)]
pub struct CollateralAuction {
    pub ilk: B256,
    pub id: U256,
    pub clipper: Address,
    pub pos: U256,
    /// Debt to recover, RAD.
    pub tab: U256,
    /// Collateral on sale, WAD.
    pub lot: U256,
    /// Collateral at kick time, WAD.
    pub tot: U256,
    /// Vault owner before liquidation.
    pub usr: Address,
    /// Auction start, Unix seconds.
    pub tic: u64,
    /// Starting price, RAY.
    pub top: U256,
}

impl CollateralAuction {
    pub fn status(&self) -> AuctionStatus {
        if self.tab.is_zero() {
            AuctionStatus::Closed
        } else {
            AuctionStatus::Active
        }
    }

    /// Price on the decay curve at `now`, RAY.
    pub fn current_price(&self, now: u64) -> U256 {
        math::auction_price(self.top, self.tic, AUCTION_DURATION, now)
    }
}

/// A profitable take, ordered by descending profit before dispatch.
#[derive(Debug, Clone)]
pub struct BiddingOpportunity {
    pub auction: CollateralAuction,
    /// Auction price at evaluation time, RAY.
    pub current_price: U256,
    /// Oracle price, RAY.
    pub market_price: U256,
    pub profit_bps: i64,
    /// Advisory cap: the full lot.
    pub max_take: U256,
}

/// Emit iff the auction is active, priced, and discounts the oracle price
/// by at least `min_profit_bps`. Pure over snapshots.
pub fn evaluate_auction(
    auction: &CollateralAuction,
    market_price: U256,
    now: u64,
    min_profit_bps: i64,
) -> Option<BiddingOpportunity> {
    if auction.status() == AuctionStatus::Closed {
        return None;
    }
    let current_price = auction.current_price(now);
    if current_price.is_zero() {
        // Expired curve; the auction needs a redo, not a take.
        return None;
    }
    let profit_bps = math::profit_bps(current_price, market_price);
    if profit_bps < min_profit_bps {
        return None;
    }
    Some(BiddingOpportunity {
        auction: auction.clone(),
        current_price,
        market_price,
        profit_bps,
        max_take: auction.lot,
    })
}

pub struct AuctionMonitor {
    chain: Arc<ChainClient>,
    dog: Address,
    /// ilk -> clipper for the enabled collateral set.
    clippers: HashMap<B256, Address>,
    /// Open auctions keyed by `(ilk, id)`.
    pub tracked: HashMap<(B256, U256), CollateralAuction>,
    last_synced_block: u64,
    min_profit_bps: i64,
}

impl AuctionMonitor {
    pub fn new(
        chain: Arc<ChainClient>,
        dog: Address,
        clippers: HashMap<B256, Address>,
        min_profit_bps: i64,
    ) -> Self {
        AuctionMonitor {
            chain,
            dog,
            clippers,
            tracked: HashMap::new(),
            last_synced_block: 0,
            min_profit_bps,
        }
    }

    /// Replay recent `Bark` logs so auctions opened before startup are
    /// tracked; anything already settled drops on the first sweep.
    pub async fn hydrate(&mut self) -> Result<()> {
        let head = self.chain.current_block().await?;
        let from = head.saturating_sub(BARK_HYDRATION_BLOCKS);
        self.drain_barks(from, head).await?;
        self.last_synced_block = head;
        info!(auctions = self.tracked.len(), "collateral auctions hydrated");
        Ok(())
    }

    /// Ingest `Bark` logs since the last sync.
    pub async fn sync(&mut self) -> Result<()> {
        let head = self.chain.current_block().await?;
        if head <= self.last_synced_block {
            return Ok(());
        }
        self.drain_barks(self.last_synced_block + 1, head).await?;
        self.last_synced_block = head;
        Ok(())
    }

    async fn drain_barks(&mut self, from: u64, to: u64) -> Result<()> {
        let filter = LogFilter {
            address: self.dog,
            topic0: Some(IDog::Bark::SIGNATURE_HASH),
        };
        let mut start = from;
        while start <= to {
            let end = (start + LOG_CHUNK - 1).min(to);
            let logs = self.chain.get_logs(&filter, start, end).await?;
            for log in logs {
                let bark = match IDog::Bark::decode_raw_log(log.topics.iter().copied(), &log.data)
                {
                    Ok(b) => b,
                    Err(e) => {
                        warn!(error = %e, "undecodable Bark log");
                        continue;
                    }
                };
                if !self.clippers.contains_key(&bark.ilk) {
                    continue;
                }
                if let Err(e) = self.track(bark.ilk, bark.id).await {
                    warn!(ilk = %ilk_name(bark.ilk), id = %bark.id, error = %e, "failed to track auction");
                }
            }
            start = end + 1;
        }
        Ok(())
    }

    /// Read `sales(id)` and start tracking the auction.
    pub async fn track(&mut self, ilk: B256, id: U256) -> Result<()> {
        let clipper = self.clippers.get(&ilk).copied().ok_or_else(|| {
            KeeperError::Config(format!("no clipper for {}", ilk_name(ilk)))
        })?;
        let auction = self.read_sale(clipper, ilk, id).await?;
        if auction.status() == AuctionStatus::Active {
            info!(
                ilk = %ilk_name(ilk),
                id = %id,
                lot = wad_to_f64(auction.lot),
                top = ray_to_f64(auction.top),
                "tracking collateral auction"
            );
            self.tracked.insert((ilk, id), auction);
        }
        Ok(())
    }

    pub async fn read_sale(&self, clipper: Address, ilk: B256, id: U256) -> Result<CollateralAuction> {
        let ret = self
            .chain
            .call(clipper, IClipper::salesCall { id }.abi_encode())
            .await?;
        let s = IClipper::salesCall::abi_decode_returns(&ret)
            .map_err(|e| KeeperError::ChainRpc(format!("clipper.sales decode: {e}")))?;
        Ok(CollateralAuction {
            ilk,
            id,
            clipper,
            pos: s.pos,
            tab: s.tab,
            lot: s.lot,
            tot: s.tot,
            usr: s.usr,
            tic: u64::try_from(s.tic).unwrap_or(u64::MAX),
            top: s.top,
        })
    }

    pub fn auction_count(&self) -> usize {
        self.tracked.len()
    }

    /// Re-read every tracked auction, drop settled ones, and emit the
    /// profitable takes sorted by descending profit.
    pub async fn sweep(&mut self, prices: &PriceService) -> Vec<BiddingOpportunity> {
        let now = match self.chain.block_timestamp().await {
            Ok(ts) => ts,
            Err(e) => {
                warn!(error = %e, "cannot read chain time; skipping auction sweep");
                return Vec::new();
            }
        };

        let keys: Vec<(B256, U256)> = self.tracked.keys().copied().collect();
        let mut out = Vec::new();
        for (ilk, id) in keys {
            let clipper = match self.clippers.get(&ilk) {
                Some(c) => *c,
                None => continue,
            };
            let auction = match self.read_sale(clipper, ilk, id).await {
                Ok(a) => a,
                Err(e) => {
                    debug!(ilk = %ilk_name(ilk), id = %id, error = %e, "auction re-read failed");
                    continue;
                }
            };
            if auction.status() == AuctionStatus::Closed {
                info!(ilk = %ilk_name(ilk), id = %id, "auction settled");
                self.tracked.remove(&(ilk, id));
                continue;
            }
            self.tracked.insert((ilk, id), auction.clone());

            let market_price = match prices.get_price(ilk).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(ilk = %ilk_name(ilk), error = %e, "market price unavailable");
                    continue;
                }
            };
            if let Some(opp) = evaluate_auction(&auction, market_price, now, self.min_profit_bps) {
                info!(
                    ilk = %ilk_name(ilk),
                    id = %id,
                    auction_price = ray_to_f64(opp.current_price),
                    market_price = ray_to_f64(opp.market_price),
                    profit_pct = math::bps_to_percent(opp.profit_bps),
                    "profitable take"
                );
                out.push(opp);
            }
        }
        out.sort_by(|a, b| b.profit_bps.cmp(&a.profit_bps));
        out
    }
}
