use std::time::{Duration, Instant};

use alloy::primitives::U256;
use kusd_keeper::math::WAD;
use kusd_keeper::peg::{
    apply_slippage, check_band, cooldown_active, deviation_bps, evaluate_roundtrip, psm_gem_out,
    psm_kusd_cost, psm_kusd_out, size_trade, spot_price_wad, ArbDirection, PegLimits,
    PoolReserves,
};

/// USDC-style gem: 6 decimals.
const GEM_DECIMALS: u8 = 6;

fn usdc(n: u64) -> U256 {
    U256::from(n) * U256::from(1_000_000u64)
}

fn kusd(n: u64) -> U256 {
    U256::from(n) * WAD
}

fn limits() -> PegLimits {
    PegLimits {
        gem_decimals: GEM_DECIMALS,
        tin: U256::ZERO,
        tout: U256::ZERO,
        // 1.005 / 0.995
        upper_wad: WAD + WAD / U256::from(200),
        lower_wad: WAD - WAD / U256::from(200),
        min_arb_profit_bps: 50,
        slippage_bps: 50,
        max_trade_pct: 10,
        min_pool_gem: usdc(5),
        max_arb_gem: usdc(10),
    }
}

fn reserves(gem_whole: u64, kusd_whole: u64) -> PoolReserves {
    PoolReserves {
        gem: usdc(gem_whole),
        kusd: kusd(kusd_whole),
        last_ts: 0,
    }
}

// ─── Test 1: spot price after decimal normalization ─────────────────────

#[test]
fn test_spot_price_normalization() {
    // 1,000,000 USDC vs 980,000 KUSD: KUSD trades at ~1.0204 USDC.
    let price = spot_price_wad(&reserves(1_000_000, 980_000), GEM_DECIMALS);
    assert_eq!(price, U256::from(1_020_408_163_265_306_122u64));

    // Balanced pool sits exactly on peg.
    assert_eq!(spot_price_wad(&reserves(500, 500), GEM_DECIMALS), WAD);
}

#[test]
fn test_deviation_bps() {
    assert_eq!(deviation_bps(WAD), 0);
    let high = spot_price_wad(&reserves(1_000_000, 980_000), GEM_DECIMALS);
    assert_eq!(deviation_bps(high), 204);
    // 0.985: 150 bps under.
    let low = WAD - WAD * U256::from(15) / U256::from(1_000);
    assert_eq!(deviation_bps(low), 150);
}

// ─── Test 2: band check ─────────────────────────────────────────────────

#[test]
fn test_band_check_directions() {
    let limits = limits();

    // Above the band: mint at the PSM, sell on the DEX.
    let (dir, _, dev) = check_band(&limits, &reserves(1_000_000, 980_000)).unwrap();
    assert_eq!(dir, ArbDirection::MintAndSell);
    assert_eq!(dev, 204);

    // Below the band: buy on the DEX, redeem at the PSM.
    let (dir, _, _) = check_band(&limits, &reserves(980_000, 1_000_000)).unwrap();
    assert_eq!(dir, ArbDirection::BuyAndRedeem);

    // Inside the band: nothing to do.
    assert!(check_band(&limits, &reserves(1_000, 1_001)).is_none());
    assert!(check_band(&limits, &reserves(1_000, 1_000)).is_none());
}

#[test]
fn test_band_check_skips_shallow_pool() {
    // Gem reserve below the 5-unit floor: no trade however wide the peg.
    let limits = limits();
    assert!(check_band(&limits, &reserves(4, 100)).is_none());
}

// ─── Test 3: trade sizing ───────────────────────────────────────────────

#[test]
fn test_size_trade_caps() {
    let limits = limits();
    let pool = reserves(1_000_000, 980_000);

    // Pool depth allows 100,000; config caps at 10; wallet holds 1,000.
    let size = size_trade(&limits, &pool, ArbDirection::MintAndSell, usdc(1_000), U256::ZERO);
    assert_eq!(size, usdc(10));

    // A small wallet binds before the config cap.
    let size = size_trade(&limits, &pool, ArbDirection::MintAndSell, usdc(3), U256::ZERO);
    assert_eq!(size, usdc(3));

    // A shallow pool binds at 10% of the gem reserve.
    let shallow = reserves(50, 49);
    let size = size_trade(&limits, &shallow, ArbDirection::MintAndSell, usdc(1_000), U256::ZERO);
    assert_eq!(size, usdc(5));
}

#[test]
fn test_size_trade_empty_pocket_blocks_redeem() {
    // Below peg with nothing in the PSM pocket: size collapses to zero.
    let limits = limits();
    let pool = reserves(980_000, 1_000_000);
    let size = size_trade(&limits, &pool, ArbDirection::BuyAndRedeem, usdc(1_000), U256::ZERO);
    assert_eq!(size, U256::ZERO);

    // The pocket caps, not just gates.
    let size = size_trade(&limits, &pool, ArbDirection::BuyAndRedeem, usdc(1_000), usdc(4));
    assert_eq!(size, usdc(4));
}

// ─── Test 4: PSM fee model ──────────────────────────────────────────────

#[test]
fn test_psm_mint_fee() {
    // Feeless: 10 USDC mints exactly 10 KUSD.
    assert_eq!(psm_kusd_out(usdc(10), U256::ZERO, GEM_DECIMALS), kusd(10));

    // 0.1% tin: 10 USDC mints 9.99 KUSD.
    let tin = WAD / U256::from(1_000);
    assert_eq!(
        psm_kusd_out(usdc(10), tin, GEM_DECIMALS),
        kusd(10) - kusd(10) / U256::from(1_000)
    );
}

#[test]
fn test_psm_redeem_fee_never_overdraws() {
    // The exact redemption form: gem = K·WAD / (conversion·(WAD + tout)).
    let tout = WAD / U256::from(1_000);
    let k = kusd(10);
    let gem = psm_gem_out(k, tout, GEM_DECIMALS);
    assert_eq!(gem, U256::from(9_990_009u64));

    // What buyGem pulls for that amount stays within the KUSD we hold,
    // so the PSM leg cannot revert on an under-paid fee.
    assert!(psm_kusd_cost(gem, tout, GEM_DECIMALS) <= k);

    // Feeless round-trip is exact.
    assert_eq!(psm_gem_out(kusd(10), U256::ZERO, GEM_DECIMALS), usdc(10));
}

// ─── Test 5: round-trip evaluation gate ─────────────────────────────────

#[test]
fn test_roundtrip_profit_gate() {
    let limits = limits();
    let price = spot_price_wad(&reserves(1_000_000, 980_000), GEM_DECIMALS);

    // 1% better off: passes the 0.5% gate.
    let plan = evaluate_roundtrip(
        &limits,
        ArbDirection::MintAndSell,
        usdc(10),
        price,
        204,
        usdc(10) + usdc(10) / U256::from(100),
    )
    .expect("profitable plan expected");
    assert_eq!(plan.expected_profit_gem, usdc(10) / U256::from(100));
    assert_eq!(plan.profit_bps, 100);

    // 0.2% better off: simulation below the gate, no trade.
    assert!(evaluate_roundtrip(
        &limits,
        ArbDirection::MintAndSell,
        usdc(10),
        price,
        204,
        usdc(10) + usdc(10) / U256::from(500),
    )
    .is_none());

    // Break-even or worse: never trade.
    assert!(
        evaluate_roundtrip(&limits, ArbDirection::MintAndSell, usdc(10), price, 204, usdc(10))
            .is_none()
    );
    assert!(
        evaluate_roundtrip(&limits, ArbDirection::MintAndSell, usdc(10), price, 204, usdc(9))
            .is_none()
    );
}

#[test]
fn test_roundtrip_redeem_path_uses_psm_model() {
    // Below peg: the DEX leg returns KUSD, which redeems through the PSM
    // fee model before profit is judged.
    let limits = limits();
    let low = spot_price_wad(&reserves(980_000, 1_000_000), GEM_DECIMALS);

    // 10 USDC buys 10.2 KUSD; feeless redemption yields 10.2 USDC.
    let plan = evaluate_roundtrip(
        &limits,
        ArbDirection::BuyAndRedeem,
        usdc(10),
        low,
        204,
        kusd(10) + kusd(10) / U256::from(50),
    )
    .expect("profitable plan expected");
    assert_eq!(plan.expected_profit_gem, usdc(10) / U256::from(50));
}

// ─── Test 6: slippage and cooldown ──────────────────────────────────────

#[test]
fn test_apply_slippage() {
    // 50 bps off a 10-unit output.
    assert_eq!(apply_slippage(usdc(10), 50), U256::from(9_950_000u64));
    assert_eq!(apply_slippage(usdc(10), 0), usdc(10));
    // A tolerance past 100% floors at zero rather than underflowing.
    assert_eq!(apply_slippage(usdc(10), 20_000), U256::ZERO);
}

#[test]
fn test_cooldown_gate() {
    // Never traded: no cooldown.
    assert!(!cooldown_active(None, Duration::from_secs(60)));

    // Just traded: a second pass within the window is suppressed.
    assert!(cooldown_active(Some(Instant::now()), Duration::from_secs(60)));

    // Zero window never suppresses.
    assert!(!cooldown_active(Some(Instant::now()), Duration::ZERO));
}
