//! Keeper health: running state, per-tick gauges, and action counters.
//!
//! Executors bump counters without holding any monitor state; the
//! orchestrator sets the gauges and logs a summary each tick.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::Mode;

#[derive(Debug)]
pub struct KeeperHealth {
    pub mode: Mode,
    pub running: AtomicBool,
    pub last_tick_unix: AtomicU64,
    pub vaults_monitored: AtomicU64,
    pub auctions_active: AtomicU64,
    pub liquidations: AtomicU64,
    pub takes: AtomicU64,
    pub flap_bids: AtomicU64,
    pub flop_bids: AtomicU64,
    pub peg_arbs: AtomicU64,
    pub errors: AtomicU64,
    /// Set on an unrecoverable fault (signer rejected); the orchestrator
    /// stops and the process exits 2.
    pub fatal: AtomicBool,
    /// Realized peg profit, gem base units.
    pub profit_gem: AtomicU64,
    /// Estimated take profit, micro-KUSD.
    pub take_profit_micro_kusd: AtomicU64,
}

impl KeeperHealth {
    pub fn new(mode: Mode) -> Self {
        KeeperHealth {
            mode,
            running: AtomicBool::new(false),
            last_tick_unix: AtomicU64::new(0),
            vaults_monitored: AtomicU64::new(0),
            auctions_active: AtomicU64::new(0),
            liquidations: AtomicU64::new(0),
            takes: AtomicU64::new(0),
            flap_bids: AtomicU64::new(0),
            flop_bids: AtomicU64::new(0),
            peg_arbs: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            fatal: AtomicBool::new(false),
            profit_gem: AtomicU64::new(0),
            take_profit_micro_kusd: AtomicU64::new(0),
        }
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fatal(&self) {
        self.fatal.store(true, Ordering::Relaxed);
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::Relaxed)
    }

    pub fn mark_tick(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.last_tick_unix.store(now, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            running: self.running.load(Ordering::Relaxed),
            last_tick_unix: self.last_tick_unix.load(Ordering::Relaxed),
            vaults_monitored: self.vaults_monitored.load(Ordering::Relaxed),
            auctions_active: self.auctions_active.load(Ordering::Relaxed),
            liquidations: self.liquidations.load(Ordering::Relaxed),
            takes: self.takes.load(Ordering::Relaxed),
            flap_bids: self.flap_bids.load(Ordering::Relaxed),
            flop_bids: self.flop_bids.load(Ordering::Relaxed),
            peg_arbs: self.peg_arbs.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            profit_gem: self.profit_gem.load(Ordering::Relaxed),
            take_profit_micro_kusd: self.take_profit_micro_kusd.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HealthSnapshot {
    pub running: bool,
    pub last_tick_unix: u64,
    pub vaults_monitored: u64,
    pub auctions_active: u64,
    pub liquidations: u64,
    pub takes: u64,
    pub flap_bids: u64,
    pub flop_bids: u64,
    pub peg_arbs: u64,
    pub errors: u64,
    pub profit_gem: u64,
    pub take_profit_micro_kusd: u64,
}
