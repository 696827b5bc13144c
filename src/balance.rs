//! Keeper stablecoin balances across the ERC-20 / Vat boundary.
//!
//! Auction bids spend the internal (Vat) balance; arbitrage and wallet
//! operations spend the external ERC-20 balance. Moving in is approve +
//! join (two transactions); moving out is a single exit.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use alloy::sol_types::SolCall;
use tracing::info;

use crate::chain::ChainClient;
use crate::contracts::{IErc20, IKusdJoin, IVat};
use crate::error::{KeeperError, Result};
use crate::math::{wad_to_f64, RAY};

pub struct VatBalanceManager {
    chain: Arc<ChainClient>,
    vat: Address,
    kusd: Address,
    kusd_join: Address,
}

impl VatBalanceManager {
    pub fn new(chain: Arc<ChainClient>, vat: Address, kusd: Address, kusd_join: Address) -> Self {
        VatBalanceManager {
            chain,
            vat,
            kusd,
            kusd_join,
        }
    }

    /// Internal stablecoin balance, RAD.
    pub async fn vat_balance(&self) -> Result<U256> {
        let keeper = self.chain.signer_address();
        let ret = self
            .chain
            .call(self.vat, IVat::kusdCall { usr: keeper }.abi_encode())
            .await?;
        IVat::kusdCall::abi_decode_returns(&ret)
            .map_err(|e| KeeperError::ChainRpc(format!("vat.kusd decode: {e}")))
    }

    /// External ERC-20 balance, WAD.
    pub async fn wallet_balance(&self) -> Result<U256> {
        let keeper = self.chain.signer_address();
        let ret = self
            .chain
            .call(self.kusd, IErc20::balanceOfCall { owner: keeper }.abi_encode())
            .await?;
        IErc20::balanceOfCall::abi_decode_returns(&ret)
            .map_err(|e| KeeperError::ChainRpc(format!("balanceOf decode: {e}")))
    }

    /// Move `amount_wad` from the wallet into the Vat: approve the join
    /// adapter, then join. Both transactions must confirm; a partial
    /// failure names the step so the operator can reconcile allowances.
    pub async fn move_to_vat(&self, amount_wad: U256) -> Result<()> {
        let keeper = self.chain.signer_address();
        self.chain
            .send(
                self.kusd,
                IErc20::approveCall {
                    spender: self.kusd_join,
                    amount: amount_wad,
                }
                .abi_encode(),
            )
            .await
            .map_err(|e| step_failed("approve join", e))?;
        self.chain
            .send(
                self.kusd_join,
                IKusdJoin::joinCall {
                    usr: keeper,
                    wad: amount_wad,
                }
                .abi_encode(),
            )
            .await
            .map_err(|e| step_failed("join (approval already confirmed)", e))?;
        info!(amount = wad_to_f64(amount_wad), "moved KUSD into the Vat");
        Ok(())
    }

    /// Move `amount_wad` from the Vat back to the wallet.
    pub async fn move_to_wallet(&self, amount_wad: U256) -> Result<()> {
        let keeper = self.chain.signer_address();
        self.chain
            .send(
                self.kusd_join,
                IKusdJoin::exitCall {
                    usr: keeper,
                    wad: amount_wad,
                }
                .abi_encode(),
            )
            .await?;
        info!(amount = wad_to_f64(amount_wad), "moved KUSD out of the Vat");
        Ok(())
    }

    /// Top the Vat balance up to at least `min_wad`.
    ///
    /// No-op when already sufficient. When the wallet cannot cover the
    /// shortfall, fails with `InsufficientFunds` before sending anything.
    pub async fn ensure_vat_balance(&self, min_wad: U256) -> Result<()> {
        let current_wad = self.vat_balance().await? / RAY;
        if current_wad >= min_wad {
            return Ok(());
        }
        let shortfall = min_wad - current_wad;
        let wallet = self.wallet_balance().await?;
        if wallet < shortfall {
            return Err(KeeperError::InsufficientFunds(format!(
                "vat top-up needs {} KUSD, wallet holds {}",
                wad_to_f64(shortfall),
                wad_to_f64(wallet)
            )));
        }
        self.move_to_vat(shortfall).await
    }
}

fn step_failed(step: &str, err: KeeperError) -> KeeperError {
    match err {
        KeeperError::TxReverted { tx_hash, reason } => KeeperError::TxReverted {
            tx_hash,
            reason: format!("{step}: {reason}"),
        },
        KeeperError::ChainRpc(msg) => KeeperError::ChainRpc(format!("{step}: {msg}")),
        other => other,
    }
}
