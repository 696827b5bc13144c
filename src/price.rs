//! Oracle price cache.
//!
//! One `peek()`-style feed per collateral, cached for a short TTL so a scan
//! over many vaults of the same ilk costs one oracle read. Prices arrive as
//! WAD and are stored RAY-scaled, the scale the safety inequality runs at.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::{Address, B256, U256};
use alloy::sol_types::SolCall;
use tokio::sync::Mutex;
use tracing::debug;

use crate::chain::ChainClient;
use crate::contracts::{ilk_name, IPip};
use crate::error::{KeeperError, Result};

pub const DEFAULT_PRICE_TTL: Duration = Duration::from_secs(30);

struct CachedPrice {
    price_ray: U256,
    fetched_at: Instant,
}

pub struct PriceService {
    chain: Arc<ChainClient>,
    /// ilk -> price feed address.
    pips: HashMap<B256, Address>,
    ttl: Duration,
    cache: Mutex<HashMap<B256, CachedPrice>>,
}

impl PriceService {
    pub fn new(chain: Arc<ChainClient>, pips: HashMap<B256, Address>, ttl: Duration) -> Self {
        PriceService {
            chain,
            pips,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Market price of the collateral in RAY. Stale-but-within-TTL reads
    /// are served from cache; a feed reporting `valid = false` is
    /// `InvalidOracle` and nothing is cached.
    pub async fn get_price(&self, ilk: B256) -> Result<U256> {
        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(&ilk) {
                if entry.fetched_at.elapsed() < self.ttl {
                    return Ok(entry.price_ray);
                }
            }
        }

        let pip = self.pips.get(&ilk).copied().ok_or_else(|| {
            KeeperError::Config(format!("no price feed configured for {}", ilk_name(ilk)))
        })?;
        let ret = self.chain.call(pip, IPip::peekCall {}.abi_encode()).await?;
        let peeked = IPip::peekCall::abi_decode_returns(&ret)
            .map_err(|e| KeeperError::ChainRpc(format!("peek decode: {e}")))?;
        if !peeked.ok {
            return Err(KeeperError::InvalidOracle {
                ilk: ilk_name(ilk),
            });
        }
        let price_ray = crate::math::wad_to_ray(peeked.val);
        debug!(ilk = %ilk_name(ilk), price = crate::math::ray_to_f64(price_ray), "oracle price refreshed");

        let mut cache = self.cache.lock().await;
        cache.insert(
            ilk,
            CachedPrice {
                price_ray,
                fetched_at: Instant::now(),
            },
        );
        Ok(price_ray)
    }

    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }
}
