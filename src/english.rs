//! Surplus (Flap) and debt (Flop) auction tracking.
//!
//! Both are English auctions announced by `Kick` logs and re-read from
//! `bids(id)` each tick. The zero `guy` sentinel means the slot is vacant
//! or dealt; it surfaces here as `AuctionStatus::Closed`. The keeper never
//! prices these itself: each emitted opportunity carries the configured
//! `profitable` flag as an input, and the executors act only when it is set.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{Address, B256, U256};
use alloy::sol_types::{SolCall, SolEvent};
use tracing::{debug, info, warn};

use crate::auctions::AuctionStatus;
use crate::chain::{ChainClient, LogFilter};
use crate::contracts::{IFlapper, IFlopper};
use crate::error::{KeeperError, Result};
use crate::math::{rmul, RAY};

const KICK_HYDRATION_BLOCKS: u64 = 10_000;
const LOG_CHUNK: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnglishKind {
    /// Sells system KUSD surplus for sKLC; bids raise `bid`.
    Flap,
    /// Mints sKLC to cover system debt; bids lower `lot`.
    Flop,
}

impl EnglishKind {
    /// Fallback minimum-increment factor, RAY, when the `beg` read fails.
    pub fn default_beg(self) -> U256 {
        match self {
            // 1.05
            EnglishKind::Flap => RAY + RAY / U256::from(20),
            // 0.95
            EnglishKind::Flop => RAY - RAY / U256::from(20),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EnglishKind::Flap => "flap",
            EnglishKind::Flop => "flop",
        }
    }
}

/// Snapshot of one English auction slot.
#[derive(Debug, Clone)]
pub struct EnglishAuction {
    pub kind: EnglishKind,
    pub id: U256,
    /// Flap: sKLC offered, WAD. Flop: KUSD paid, RAD.
    pub bid: U256,
    /// Flap: KUSD on sale, RAD. Flop: sKLC demanded, WAD.
    pub lot: U256,
    /// Current high bidder; the zero address means inactive.
    pub guy: Address,
    /// Bid expiry, Unix seconds (zero until the first bid).
    pub tic: u64,
    /// Auction expiry, Unix seconds.
    pub end: u64,
}

impl EnglishAuction {
    pub fn status(&self) -> AuctionStatus {
        if self.guy == Address::ZERO {
            AuctionStatus::Closed
        } else {
            AuctionStatus::Active
        }
    }

    /// Whether a new bid can still land at `now`.
    pub fn biddable(&self, now: u64) -> bool {
        self.status() == AuctionStatus::Active
            && now < self.end
            && (self.tic == 0 || now < self.tic)
    }
}

/// Input to the Flap/Flop executors.
#[derive(Debug, Clone)]
pub struct EnglishOpportunity {
    pub auction: EnglishAuction,
    /// Flap: minimum next `bid` (`bid · beg`), WAD.
    /// Flop: maximum next `lot` (`lot · beg`), WAD.
    pub next_amount: U256,
    /// Caller-supplied policy verdict; never computed here.
    pub profitable: bool,
}

/// Minimum-increment arithmetic, shared with the tests.
pub fn next_amount(kind: EnglishKind, auction: &EnglishAuction, beg: U256) -> U256 {
    match kind {
        EnglishKind::Flap => rmul(auction.bid, beg),
        EnglishKind::Flop => rmul(auction.lot, beg),
    }
}

pub struct EnglishAuctionMonitor {
    chain: Arc<ChainClient>,
    address: Address,
    kind: EnglishKind,
    /// Minimum bid-improvement factor, RAY.
    pub beg: U256,
    pub tracked: HashMap<U256, EnglishAuction>,
    last_synced_block: u64,
    profitable: bool,
}

impl EnglishAuctionMonitor {
    pub fn new(chain: Arc<ChainClient>, address: Address, kind: EnglishKind, profitable: bool) -> Self {
        EnglishAuctionMonitor {
            chain,
            address,
            kind,
            beg: kind.default_beg(),
            tracked: HashMap::new(),
            last_synced_block: 0,
            profitable,
        }
    }

    /// Read `beg` and replay recent kicks. A failed `beg` read keeps the
    /// default factor rather than blocking startup.
    pub async fn hydrate(&mut self) -> Result<()> {
        match self.read_beg().await {
            Ok(beg) if !beg.is_zero() => self.beg = beg,
            Ok(_) => warn!(kind = self.kind.name(), "beg is zero on chain, keeping default"),
            Err(e) => {
                warn!(kind = self.kind.name(), error = %e, "beg read failed, keeping default")
            }
        }
        let head = self.chain.current_block().await?;
        let from = head.saturating_sub(KICK_HYDRATION_BLOCKS);
        self.drain_kicks(from, head).await?;
        self.last_synced_block = head;
        info!(
            kind = self.kind.name(),
            auctions = self.tracked.len(),
            "english auctions hydrated"
        );
        Ok(())
    }

    pub async fn sync(&mut self) -> Result<()> {
        let head = self.chain.current_block().await?;
        if head <= self.last_synced_block {
            return Ok(());
        }
        self.drain_kicks(self.last_synced_block + 1, head).await?;
        self.last_synced_block = head;
        Ok(())
    }

    async fn read_beg(&self) -> Result<U256> {
        let data = match self.kind {
            EnglishKind::Flap => IFlapper::begCall {}.abi_encode(),
            EnglishKind::Flop => IFlopper::begCall {}.abi_encode(),
        };
        let ret = self.chain.call(self.address, data).await?;
        IFlapper::begCall::abi_decode_returns(&ret)
            .map_err(|e| KeeperError::ChainRpc(format!("beg decode: {e}")))
    }

    fn kick_topic(&self) -> B256 {
        match self.kind {
            EnglishKind::Flap => IFlapper::Kick::SIGNATURE_HASH,
            EnglishKind::Flop => IFlopper::Kick::SIGNATURE_HASH,
        }
    }

    fn decode_kick_id(&self, topics: &[B256], data: &[u8]) -> Result<U256> {
        match self.kind {
            EnglishKind::Flap => IFlapper::Kick::decode_raw_log(topics.iter().copied(), data)
                .map(|k| k.id)
                .map_err(|e| KeeperError::ChainRpc(format!("flap kick decode: {e}"))),
            EnglishKind::Flop => IFlopper::Kick::decode_raw_log(topics.iter().copied(), data)
                .map(|k| k.id)
                .map_err(|e| KeeperError::ChainRpc(format!("flop kick decode: {e}"))),
        }
    }

    async fn drain_kicks(&mut self, from: u64, to: u64) -> Result<()> {
        let filter = LogFilter {
            address: self.address,
            topic0: Some(self.kick_topic()),
        };
        let mut start = from;
        while start <= to {
            let end = (start + LOG_CHUNK - 1).min(to);
            let logs = self.chain.get_logs(&filter, start, end).await?;
            for log in logs {
                let id = match self.decode_kick_id(&log.topics, &log.data) {
                    Ok(id) => id,
                    Err(e) => {
                        warn!(kind = self.kind.name(), error = %e, "undecodable kick log");
                        continue;
                    }
                };
                match self.read_bid(id).await {
                    Ok(auction) if auction.status() == AuctionStatus::Active => {
                        info!(kind = self.kind.name(), id = %id, "tracking english auction");
                        self.tracked.insert(id, auction);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(kind = self.kind.name(), id = %id, error = %e, "failed to track auction")
                    }
                }
            }
            start = end + 1;
        }
        Ok(())
    }

    pub async fn read_bid(&self, id: U256) -> Result<EnglishAuction> {
        let data = match self.kind {
            EnglishKind::Flap => IFlapper::bidsCall { id }.abi_encode(),
            EnglishKind::Flop => IFlopper::bidsCall { id }.abi_encode(),
        };
        let ret = self.chain.call(self.address, data).await?;
        let b = IFlapper::bidsCall::abi_decode_returns(&ret)
            .map_err(|e| KeeperError::ChainRpc(format!("bids decode: {e}")))?;
        Ok(EnglishAuction {
            kind: self.kind,
            id,
            bid: b.bid,
            lot: b.lot,
            guy: b.guy,
            tic: u64::try_from(b.tic).unwrap_or(u64::MAX),
            end: u64::try_from(b.end).unwrap_or(u64::MAX),
        })
    }

    pub fn auction_count(&self) -> usize {
        self.tracked.len()
    }

    /// Re-read every tracked slot, drop everything no longer biddable,
    /// and emit executor inputs.
    pub async fn sweep(&mut self) -> Vec<EnglishOpportunity> {
        let now = match self.chain.block_timestamp().await {
            Ok(ts) => ts,
            Err(e) => {
                warn!(kind = self.kind.name(), error = %e, "cannot read chain time");
                return Vec::new();
            }
        };

        let ids: Vec<U256> = self.tracked.keys().copied().collect();
        let mut out = Vec::new();
        for id in ids {
            let auction = match self.read_bid(id).await {
                Ok(a) => a,
                Err(e) => {
                    debug!(kind = self.kind.name(), id = %id, error = %e, "bid re-read failed");
                    continue;
                }
            };
            if !auction.biddable(now) {
                info!(kind = self.kind.name(), id = %id, "auction closed");
                self.tracked.remove(&id);
                continue;
            }
            self.tracked.insert(id, auction.clone());
            let next = next_amount(self.kind, &auction, self.beg);
            out.push(EnglishOpportunity {
                auction,
                next_amount: next,
                profitable: self.profitable,
            });
        }
        out
    }
}
