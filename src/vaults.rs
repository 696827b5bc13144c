//! Vault population and unsafe-vault scanning.
//!
//! The monitor reconstructs the vault set from `Frob` logs: a trailing
//! window on startup, then new logs each tick. Vaults are never removed
//! from the known set; an emptied vault may be refilled later. The scan
//! re-reads collateral and vault state from chain every cycle and emits
//! snapshots of vaults whose safety invariant `ink·spot >= art·rate` fails.

use std::collections::HashSet;
use std::sync::Arc;

use alloy::primitives::{Address, B256, U256};
use alloy::sol_types::{SolCall, SolEvent};
use tracing::{debug, info, warn};

use crate::chain::{ChainClient, LogFilter};
use crate::config::CollateralConfig;
use crate::contracts::{ilk_name, IDog, IVat};
use crate::error::{KeeperError, Result};
use crate::math::{self, RAY};

/// Trailing hydration window, in blocks.
pub const HYDRATION_BLOCKS: u64 = 100_000;
/// `eth_getLogs` range per request; providers cap wide ranges.
const LOG_CHUNK: u64 = 10_000;

/// Vault snapshot: `(ilk, urn)` identity plus collateral and debt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrnState {
    pub ilk: B256,
    pub urn: Address,
    /// Collateral, WAD.
    pub ink: U256,
    /// Normalized debt, WAD.
    pub art: U256,
}

/// Collateral-type snapshot, re-read once per scan cycle.
#[derive(Debug, Clone)]
pub struct IlkState {
    pub ilk: B256,
    /// Total normalized debt, WAD.
    pub total_art: U256,
    /// Accumulated debt multiplier, RAY.
    pub rate: U256,
    /// Oracle price divided by the liquidation ratio, RAY.
    pub spot: U256,
    /// Debt ceiling, RAD.
    pub line: U256,
    /// Minimum debt per vault, RAD.
    pub dust: U256,
}

/// Global liquidation throttle.
#[derive(Debug, Clone, Copy)]
pub struct DogParams {
    /// Global liquidation debt ceiling, RAD.
    pub hole: U256,
    /// In-flight liquidation debt, RAD.
    pub dirt: U256,
}

/// Per-collateral liquidation parameters.
#[derive(Debug, Clone)]
pub struct DogIlk {
    pub clip: Address,
    /// Liquidation penalty multiplier, RAY.
    pub chop: U256,
    /// Per-ilk liquidation debt ceiling, RAD.
    pub hole: U256,
    /// Per-ilk in-flight liquidation debt, RAD.
    pub dirt: U256,
}

/// An unsafe vault, ready for `bark`.
#[derive(Debug, Clone)]
pub struct LiquidationOpportunity {
    pub urn: UrnState,
    pub ilk_state: IlkState,
    pub dog_ilk: DogIlk,
    /// Collateralization ratio in basis points (10_000 = 100%).
    pub ratio_bps: U256,
    /// Liquidation penalty from `chop`, in basis points.
    pub penalty_bps: i64,
}

/// Emit a vault iff it carries debt and fails the safety inequality.
///
/// Pure over snapshots; the monitor and the tests share it.
pub fn evaluate_urn(urn: &UrnState, ilk: &IlkState, dog: &DogIlk) -> Option<LiquidationOpportunity> {
    if urn.art.is_zero() {
        return None;
    }
    if math::is_safe(urn.ink, urn.art, ilk.spot, ilk.rate) {
        return None;
    }
    let ratio_bps = math::ratio_bps(urn.ink, urn.art, ilk.spot, ilk.rate)?;
    let penalty_bps = math::profit_bps(RAY, dog.chop);
    Some(LiquidationOpportunity {
        urn: urn.clone(),
        ilk_state: ilk.clone(),
        dog_ilk: dog.clone(),
        ratio_bps,
        penalty_bps,
    })
}

pub struct VaultMonitor {
    chain: Arc<ChainClient>,
    vat: Address,
    dog: Address,
    collaterals: Vec<CollateralConfig>,
    /// Every `(ilk, urn)` ever observed. Grows monotonically.
    pub known: HashSet<(B256, Address)>,
    last_synced_block: u64,
    /// Urn reads that failed this scan; retried next tick.
    pub read_errors: u64,
}

impl VaultMonitor {
    pub fn new(
        chain: Arc<ChainClient>,
        vat: Address,
        dog: Address,
        collaterals: Vec<CollateralConfig>,
    ) -> Self {
        VaultMonitor {
            chain,
            vat,
            dog,
            collaterals,
            known: HashSet::new(),
            last_synced_block: 0,
            read_errors: 0,
        }
    }

    /// Replay the trailing `Frob` window and seed the known set.
    pub async fn hydrate(&mut self) -> Result<()> {
        let head = self.chain.current_block().await?;
        let from = head.saturating_sub(HYDRATION_BLOCKS);
        let filter = LogFilter {
            address: self.vat,
            topic0: Some(IVat::Frob::SIGNATURE_HASH),
        };
        let mut start = from;
        while start <= head {
            let end = (start + LOG_CHUNK - 1).min(head);
            let logs = self.chain.get_logs(&filter, start, end).await?;
            for log in &logs {
                self.ingest_frob(&log.topics);
            }
            start = end + 1;
        }
        self.last_synced_block = head;
        info!(
            vaults = self.known.len(),
            from, to = head, "vault set hydrated"
        );
        Ok(())
    }

    /// Drain `Frob` logs since the last sync. The polling half of the
    /// subscription contract.
    pub async fn sync(&mut self) -> Result<()> {
        let head = self.chain.current_block().await?;
        if head <= self.last_synced_block {
            return Ok(());
        }
        let filter = LogFilter {
            address: self.vat,
            topic0: Some(IVat::Frob::SIGNATURE_HASH),
        };
        let before = self.known.len();
        let mut start = self.last_synced_block + 1;
        while start <= head {
            let end = (start + LOG_CHUNK - 1).min(head);
            let logs = self.chain.get_logs(&filter, start, end).await?;
            for log in &logs {
                self.ingest_frob(&log.topics);
            }
            start = end + 1;
        }
        self.last_synced_block = head;
        if self.known.len() > before {
            debug!(new = self.known.len() - before, "new vaults observed");
        }
        Ok(())
    }

    /// Insert the `(ilk, urn)` pair carried in a `Frob` log's topics.
    /// Repeated logs are idempotent.
    pub fn ingest_frob(&mut self, topics: &[B256]) {
        if topics.len() < 3 || topics[0] != IVat::Frob::SIGNATURE_HASH {
            return;
        }
        let ilk = topics[1];
        let urn = Address::from_word(topics[2]);
        self.known.insert((ilk, urn));
    }

    pub fn vault_count(&self) -> usize {
        self.known.len()
    }

    /// Scan every known vault of every enabled collateral.
    ///
    /// Ilk or dog read failures abort that collateral (no partial
    /// emissions for it); per-urn failures are counted and the urn is
    /// retried next tick. Results are sorted most-underwater first.
    pub async fn scan(&mut self) -> Vec<LiquidationOpportunity> {
        let mut out = Vec::new();
        for collateral in self.collaterals.clone() {
            match self.scan_ilk(&collateral, &mut out).await {
                Ok(()) => {}
                Err(e) => {
                    warn!(ilk = %collateral.name, error = %e, "collateral scan aborted");
                }
            }
        }
        out.sort_by(|a, b| a.ratio_bps.cmp(&b.ratio_bps));
        out
    }

    async fn scan_ilk(
        &mut self,
        collateral: &CollateralConfig,
        out: &mut Vec<LiquidationOpportunity>,
    ) -> Result<()> {
        let ilk_state = self.read_ilk(collateral.ilk).await?;
        let dog_ilk = self.read_dog_ilk(collateral.ilk).await?;
        if ilk_state.rate.is_zero() {
            return Err(KeeperError::ChainRpc(format!(
                "{}: uninitialized ilk (rate = 0)",
                collateral.name
            )));
        }

        let urns: Vec<Address> = self
            .known
            .iter()
            .filter(|(ilk, _)| *ilk == collateral.ilk)
            .map(|(_, urn)| *urn)
            .collect();
        for urn in urns {
            let state = match self.read_urn(collateral.ilk, urn).await {
                Ok(s) => s,
                Err(e) => {
                    self.read_errors += 1;
                    debug!(ilk = %collateral.name, urn = %urn, error = %e, "urn read failed");
                    continue;
                }
            };
            if let Some(opp) = evaluate_urn(&state, &ilk_state, &dog_ilk) {
                info!(
                    ilk = %collateral.name,
                    urn = %state.urn,
                    ink = math::wad_to_f64(state.ink),
                    art = math::wad_to_f64(state.art),
                    ratio_pct = math::bps_to_percent(
                        i64::try_from(opp.ratio_bps).unwrap_or(i64::MAX)
                    ),
                    "unsafe vault"
                );
                out.push(opp);
            }
        }
        Ok(())
    }

    pub async fn read_ilk(&self, ilk: B256) -> Result<IlkState> {
        read_ilk(&self.chain, self.vat, ilk).await
    }

    pub async fn read_dog_ilk(&self, ilk: B256) -> Result<DogIlk> {
        read_dog_ilk(&self.chain, self.dog, ilk).await
    }

    pub async fn read_urn(&self, ilk: B256, urn: Address) -> Result<UrnState> {
        read_urn(&self.chain, self.vat, ilk, urn).await
    }

    /// The configured collateral set, for components that iterate it.
    pub fn collaterals(&self) -> &[CollateralConfig] {
        &self.collaterals
    }
}

/// Read global `Hole`/`Dirt`; the liquidation executor re-checks these
/// immediately before dispatch.
pub async fn read_dog_params(chain: &ChainClient, dog: Address) -> Result<DogParams> {
    let hole_ret = chain.call(dog, IDog::HoleCall {}.abi_encode()).await?;
    let hole = IDog::HoleCall::abi_decode_returns(&hole_ret)
        .map_err(|e| KeeperError::ChainRpc(format!("dog.Hole decode: {e}")))?;
    let dirt_ret = chain.call(dog, IDog::DirtCall {}.abi_encode()).await?;
    let dirt = IDog::DirtCall::abi_decode_returns(&dirt_ret)
        .map_err(|e| KeeperError::ChainRpc(format!("dog.Dirt decode: {e}")))?;
    Ok(DogParams { hole, dirt })
}

pub async fn read_dog_ilk(chain: &ChainClient, dog: Address, ilk: B256) -> Result<DogIlk> {
    let ret = chain.call(dog, IDog::ilksCall { ilk }.abi_encode()).await?;
    let decoded = IDog::ilksCall::abi_decode_returns(&ret)
        .map_err(|e| KeeperError::ChainRpc(format!("dog.ilks decode: {e}")))?;
    Ok(DogIlk {
        clip: decoded.clip,
        chop: decoded.chop,
        hole: decoded.hole,
        dirt: decoded.dirt,
    })
}

pub async fn read_ilk(chain: &ChainClient, vat: Address, ilk: B256) -> Result<IlkState> {
    let ret = chain.call(vat, IVat::ilksCall { ilk }.abi_encode()).await?;
    let decoded = IVat::ilksCall::abi_decode_returns(&ret)
        .map_err(|e| KeeperError::ChainRpc(format!("vat.ilks decode: {e}")))?;
    Ok(IlkState {
        ilk,
        total_art: decoded.Art,
        rate: decoded.rate,
        spot: decoded.spot,
        line: decoded.line,
        dust: decoded.dust,
    })
}

pub async fn read_urn(chain: &ChainClient, vat: Address, ilk: B256, urn: Address) -> Result<UrnState> {
    let ret = chain.call(vat, IVat::urnsCall { ilk, urn }.abi_encode()).await?;
    let decoded = IVat::urnsCall::abi_decode_returns(&ret)
        .map_err(|e| KeeperError::ChainRpc(format!("vat.urns decode: {e}")))?;
    Ok(UrnState {
        ilk,
        urn,
        ink: decoded.ink,
        art: decoded.art,
    })
}

/// Percent form of a ratio in bps, for display.
pub fn ratio_percent(ratio_bps: U256) -> f64 {
    u64::try_from(ratio_bps.min(U256::from(u64::MAX))).unwrap_or(u64::MAX) as f64 / 100.0
}
