//! The orchestrator: owns the periodic tick, fans out to the monitors the
//! configured mode enables, and serializes every dispatch.
//!
//! Within a tick everything runs in one strict sequence, so there is never
//! more than one writer per monitor map and never more than one transaction
//! in flight. A tick may overrun the period; the next one then starts
//! immediately. SIGINT/SIGTERM let the current tick finish, then stop.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::auctions::AuctionMonitor;
use crate::balance::VatBalanceManager;
use crate::chain::ChainClient;
use crate::config::KeeperConfig;
use crate::english::{EnglishAuctionMonitor, EnglishKind};
use crate::error::{KeeperError, Result};
use crate::executors::{FlapExecutor, FlopExecutor, LiquidationExecutor, TakeExecutor};
use crate::health::KeeperHealth;
use crate::peg::PegArbService;
use crate::price::{PriceService, DEFAULT_PRICE_TTL};
use crate::vaults::{read_dog_ilk, VaultMonitor};

pub struct Keeper {
    config: KeeperConfig,
    health: Arc<KeeperHealth>,
    vaults: VaultMonitor,
    auctions: AuctionMonitor,
    prices: Arc<PriceService>,
    balances: Arc<VatBalanceManager>,
    liquidator: LiquidationExecutor,
    taker: TakeExecutor,
    flap: Option<(EnglishAuctionMonitor, FlapExecutor)>,
    flop: Option<(EnglishAuctionMonitor, FlopExecutor)>,
    peg: Option<PegArbService>,
}

impl Keeper {
    /// Build every component and hydrate the monitors. Any failure here is
    /// a fatal startup error; the process exits 1.
    pub async fn bootstrap(config: KeeperConfig) -> Result<Self> {
        config.validate()?;
        let chain = Arc::new(ChainClient::new(
            &config.rpc_url,
            &config.private_key,
            config.chain_id,
            config.gas_price,
            config.gas_limit,
        )?);
        let head = chain.current_block().await?;
        info!(
            keeper = %chain.signer_address(),
            chain_id = config.chain_id,
            head,
            mode = ?config.mode,
            "connected"
        );

        let collaterals = config.collaterals()?;
        if collaterals.is_empty() && (config.kick_enabled() || config.bid_enabled()) {
            warn!("COLLATERALS is empty; vault and auction monitors will idle");
        }

        // Resolve each collateral's clipper, preferring explicit config
        // over the on-chain registry.
        let mut clippers: HashMap<_, Address> = HashMap::new();
        let mut pips = HashMap::new();
        for collateral in &collaterals {
            pips.insert(collateral.ilk, collateral.pip);
            let clip = match collateral.clipper {
                Some(addr) => addr,
                None => read_dog_ilk(&chain, config.dog_address, collateral.ilk).await?.clip,
            };
            if clip == Address::ZERO {
                return Err(KeeperError::Config(format!(
                    "{}: no clipper configured or registered",
                    collateral.name
                )));
            }
            clippers.insert(collateral.ilk, clip);
        }

        let health = Arc::new(KeeperHealth::new(config.mode));
        let prices = Arc::new(PriceService::new(chain.clone(), pips, DEFAULT_PRICE_TTL));
        let balances = Arc::new(VatBalanceManager::new(
            chain.clone(),
            config.vat_address,
            config.kusd_address,
            config.kusd_join_address,
        ));

        let mut vaults = VaultMonitor::new(
            chain.clone(),
            config.vat_address,
            config.dog_address,
            collaterals.clone(),
        );
        let mut auctions = AuctionMonitor::new(
            chain.clone(),
            config.dog_address,
            clippers,
            config.min_profit_bps(),
        );
        if config.kick_enabled() {
            vaults.hydrate().await?;
        }
        if config.bid_enabled() {
            auctions.hydrate().await?;
        }

        let liquidator = LiquidationExecutor::new(
            chain.clone(),
            config.dog_address,
            config.emergency_stop,
            health.clone(),
        );
        let taker = TakeExecutor::new(
            chain.clone(),
            balances.clone(),
            config.max_collateral_wad(),
            config.emergency_stop,
            health.clone(),
        );

        let flap = match (config.flapper_address, config.sklc_address) {
            (Some(flapper), Some(sklc)) => {
                let mut monitor = EnglishAuctionMonitor::new(
                    chain.clone(),
                    flapper,
                    EnglishKind::Flap,
                    config.flap_bidding,
                );
                monitor.hydrate().await?;
                let exec = FlapExecutor::new(
                    chain.clone(),
                    flapper,
                    sklc,
                    config.emergency_stop,
                    health.clone(),
                );
                Some((monitor, exec))
            }
            (Some(_), None) => {
                return Err(KeeperError::Config(
                    "FLAPPER_ADDRESS requires SKLC_ADDRESS".into(),
                ))
            }
            _ => None,
        };
        let flop = match config.flopper_address {
            Some(flopper) => {
                let mut monitor = EnglishAuctionMonitor::new(
                    chain.clone(),
                    flopper,
                    EnglishKind::Flop,
                    config.flop_bidding,
                );
                monitor.hydrate().await?;
                let exec = FlopExecutor::new(
                    chain.clone(),
                    flopper,
                    balances.clone(),
                    config.emergency_stop,
                    health.clone(),
                );
                Some((monitor, exec))
            }
            None => None,
        };

        let peg = if config.peg_enabled() {
            Some(PegArbService::init(chain.clone(), &config).await?)
        } else {
            None
        };

        Ok(Keeper {
            config,
            health,
            vaults,
            auctions,
            prices,
            balances,
            liquidator,
            taker,
            flap,
            flop,
            peg,
        })
    }

    pub fn health(&self) -> Arc<KeeperHealth> {
        self.health.clone()
    }

    /// Tick until a shutdown signal arrives or a fatal fault is recorded.
    pub async fn run(&mut self) -> Result<()> {
        let period = Duration::from_millis(self.config.check_interval);
        let mut shutdown = shutdown_channel();
        self.health.running.store(true, Ordering::Relaxed);
        info!(period_ms = period.as_millis() as u64, "keeper started");

        loop {
            let started = tokio::time::Instant::now();
            self.tick().await;

            if self.health.is_fatal() {
                self.health.running.store(false, Ordering::Relaxed);
                return Err(KeeperError::Config("unrecoverable runtime fault".into()));
            }
            if *shutdown.borrow() {
                break;
            }
            let elapsed = started.elapsed();
            if elapsed < period {
                tokio::select! {
                    _ = tokio::time::sleep(period - elapsed) => {}
                    _ = shutdown.changed() => break,
                }
            }
            // An overrun tick rolls straight into the next one.
        }

        self.health.running.store(false, Ordering::Relaxed);
        info!("keeper stopped");
        Ok(())
    }

    /// One orchestration cycle: sync monitors, collect opportunities,
    /// dispatch serially.
    async fn tick(&mut self) {
        self.health.mark_tick();

        if self.config.kick_enabled() {
            if let Err(e) = self.vaults.sync().await {
                self.health.record_error();
                warn!(error = %e, "vault sync failed");
            }
            let unsafe_vaults = self.vaults.scan().await;
            if !unsafe_vaults.is_empty() {
                info!(count = unsafe_vaults.len(), "dispatching liquidations");
                self.liquidator.dispatch(&unsafe_vaults).await;
            }
        }

        if self.config.bid_enabled() {
            if let Err(e) = self.auctions.sync().await {
                self.health.record_error();
                warn!(error = %e, "auction sync failed");
            }
            let takes = self.auctions.sweep(&self.prices).await;
            if !takes.is_empty() {
                // Top the Vat up from the wallet so the best take is fully
                // funded; a shortfall is a warning, not a blocker, because
                // the executor re-sizes against what the Vat actually holds.
                if let Some(best) = takes.first() {
                    let amount = best.max_take.min(self.config.max_collateral_wad());
                    let needed_wad = crate::math::rmul(amount, best.current_price);
                    match self.balances.ensure_vat_balance(needed_wad).await {
                        Ok(()) => {}
                        Err(KeeperError::InsufficientFunds(msg)) => warn!("{msg}"),
                        Err(e) => {
                            self.health.record_error();
                            warn!(error = %e, "vat top-up failed");
                        }
                    }
                }
                info!(count = takes.len(), "dispatching takes");
                self.taker.dispatch(&takes).await;
            }
        }

        // Flap/Flop run in every mode: their inputs (sKLC, Vat balance)
        // are disjoint from collateral-auction capital.
        if let Some((monitor, exec)) = &mut self.flap {
            if let Err(e) = monitor.sync().await {
                self.health.record_error();
                warn!(error = %e, "flap sync failed");
            }
            let bids = monitor.sweep().await;
            exec.dispatch(&bids).await;
        }
        if let Some((monitor, exec)) = &mut self.flop {
            if let Err(e) = monitor.sync().await {
                self.health.record_error();
                warn!(error = %e, "flop sync failed");
            }
            let bids = monitor.sweep().await;
            exec.dispatch(&bids).await;
        }

        if let Some(peg) = &mut self.peg {
            match peg.check_and_arbitrage().await {
                Ok(true) => {
                    self.health.peg_arbs.fetch_add(1, Ordering::Relaxed);
                    self.health.profit_gem.store(
                        u64::try_from(peg.profit_gem).unwrap_or(u64::MAX),
                        Ordering::Relaxed,
                    );
                }
                Ok(false) => {}
                Err(e) => {
                    if e.is_fatal() {
                        self.health.record_fatal();
                    } else {
                        self.health.record_error();
                    }
                    error!(error = %e, "peg arbitrage failed");
                }
            }
        }

        self.health
            .vaults_monitored
            .store(self.vaults.vault_count() as u64, Ordering::Relaxed);
        let english_auctions = self.flap.as_ref().map_or(0, |(m, _)| m.auction_count())
            + self.flop.as_ref().map_or(0, |(m, _)| m.auction_count());
        self.health.auctions_active.store(
            (self.auctions.auction_count() + english_auctions) as u64,
            Ordering::Relaxed,
        );

        let snap = self.health.snapshot();
        info!(
            vaults = snap.vaults_monitored,
            auctions = snap.auctions_active,
            liquidations = snap.liquidations,
            takes = snap.takes,
            flap_bids = snap.flap_bids,
            flop_bids = snap.flop_bids,
            peg_arbs = snap.peg_arbs,
            errors = snap.errors,
            "tick complete"
        );
    }
}

/// Watch channel flipped to true on SIGINT or SIGTERM.
fn shutdown_channel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "cannot install SIGTERM handler");
                    let _ = ctrl_c.await;
                    let _ = tx.send(true);
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => info!("SIGINT received, finishing current tick"),
                _ = term.recv() => info!("SIGTERM received, finishing current tick"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("interrupt received, finishing current tick");
        }
        let _ = tx.send(true);
    });
    rx
}
