use alloy::primitives::U256;
use kusd_keeper::math::{
    auction_price, bps_to_percent, from_wad, is_safe, mul_div, percent_to_bps, profit_bps,
    ratio_bps, rdiv, rmul, to_wad, wad_to_ray, wdiv, wmul, RAD, RAY, WAD,
};

fn wad(n: u64) -> U256 {
    U256::from(n) * WAD
}

fn ray(n: u64) -> U256 {
    U256::from(n) * RAY
}

// ─── Test 1: scale constants ────────────────────────────────────────────

#[test]
fn test_scale_constants() {
    assert_eq!(WAD, U256::from(10u64).pow(U256::from(18u64)));
    assert_eq!(RAY, U256::from(10u64).pow(U256::from(27u64)));
    assert_eq!(RAD, U256::from(10u64).pow(U256::from(45u64)));
    assert_eq!(wad_to_ray(WAD), RAY);
    assert_eq!(WAD * RAY, RAD);
}

// ─── Test 2: multiply/divide round-trips ────────────────────────────────

#[test]
fn test_wmul_wdiv_round_trip() {
    // wdiv(wmul(x, RAY), RAY) = x for any WAD x
    for n in [1u64, 7, 1_000, 123_456_789] {
        let x = wad(n);
        assert_eq!(wdiv(wmul(x, RAY), RAY), x);
    }
    // and the RAY analogue
    for n in [1u64, 42, 999_999] {
        let x = ray(n);
        assert_eq!(rdiv(rmul(x, WAD), WAD), x);
    }
}

#[test]
fn test_truncation_toward_zero() {
    // 1 wei * 1 wei / WAD truncates to zero; no rounding up anywhere.
    assert_eq!(wmul(U256::from(1), U256::from(1)), U256::ZERO);
    // 3 / 2 at WAD scale keeps the full fractional part down to the wei.
    assert_eq!(
        wdiv(wad(3), wad(2)),
        U256::from(1_500_000_000_000_000_000u64)
    );
}

#[test]
fn test_mul_div_no_intermediate_overflow() {
    // tab (RAD scale) * chop (RAY scale) overflows 256 bits before the
    // division; the widened intermediate must carry it.
    let tab = U256::from(10_000_000u64) * RAD;
    let chop = RAY + RAY / U256::from(10); // 1.1
    let expected = U256::from(11_000_000u64) * RAD;
    assert_eq!(mul_div(tab, chop, RAY), expected);
}

#[test]
fn test_mul_div_zero_denominator() {
    assert_eq!(mul_div(wad(5), wad(5), U256::ZERO), U256::ZERO);
}

// ─── Test 3: safety inequality and ratio agree ──────────────────────────

#[test]
fn test_is_safe_matches_ratio() {
    let cases = [
        // (ink, art, spot whole-units, rate whole-units)
        (10u64, 200u64, 50u64, 1u64),
        (1, 21_000, 20_000, 1),
        (3, 100, 34, 1),
        (1, 1, 1, 1),
        (5, 500, 100, 1),
    ];
    for (ink, art, spot, rate) in cases {
        let (ink, art) = (wad(ink), wad(art));
        let (spot, rate) = (ray(spot), ray(rate));
        let safe = is_safe(ink, art, spot, rate);
        let ratio = ratio_bps(ink, art, spot, rate).unwrap();
        assert_eq!(
            safe,
            ratio >= U256::from(10_000u64),
            "is_safe and ratio disagree for ink={ink} art={art}"
        );
    }
}

#[test]
fn test_ratio_infinite_for_empty_vault() {
    assert!(ratio_bps(wad(10), U256::ZERO, ray(50), RAY).is_none());
    // An empty vault is trivially safe.
    assert!(is_safe(wad(10), U256::ZERO, ray(50), RAY));
    assert!(is_safe(U256::ZERO, U256::ZERO, ray(50), RAY));
}

// ─── Test 4: Dutch auction price curve ──────────────────────────────────

#[test]
fn test_auction_price_endpoints() {
    let top = ray(100);
    let (tic, tau) = (1_000u64, 21_600u64);

    assert_eq!(auction_price(top, tic, tau, 0), top);
    assert_eq!(auction_price(top, tic, tau, tic), top);
    assert_eq!(auction_price(top, tic, tau, tic + tau), U256::ZERO);
    assert_eq!(auction_price(top, tic, tau, tic + tau + 5_000), U256::ZERO);
}

#[test]
fn test_auction_price_halfway() {
    // top = 100 RAY, halfway through the 6-hour decay: exactly 50 RAY.
    let price = auction_price(ray(100), 1_000, 21_600, 1_000 + 10_800);
    assert_eq!(price, ray(50));
}

#[test]
fn test_auction_price_monotonic() {
    let top = ray(100);
    let (tic, tau) = (1_000u64, 21_600u64);
    let mut last = auction_price(top, tic, tau, 0);
    for now in (0..=tic + tau + 1_000).step_by(600) {
        let price = auction_price(top, tic, tau, now);
        assert!(price <= last, "price increased at now={now}");
        last = price;
    }
}

// ─── Test 5: profit percentage ──────────────────────────────────────────

#[test]
fn test_profit_bps() {
    // Buy at 50, market at 60: 20.00%.
    assert_eq!(profit_bps(ray(50), ray(60)), 2_000);
    assert_eq!(bps_to_percent(2_000), 20.0);

    // Losing trade is negative.
    assert_eq!(profit_bps(ray(60), ray(50)), -1_666);

    // Flat is zero, and a zero buy price is not a number we trade on.
    assert_eq!(profit_bps(ray(50), ray(50)), 0);
    assert_eq!(profit_bps(U256::ZERO, ray(50)), 0);
}

#[test]
fn test_percent_to_bps() {
    assert_eq!(percent_to_bps(5.0), 500);
    assert_eq!(percent_to_bps(0.5), 50);
    assert_eq!(percent_to_bps(20.0), 2_000);
    assert_eq!(percent_to_bps(0.0), 0);
}

// ─── Test 6: decimal normalization ──────────────────────────────────────

#[test]
fn test_to_wad_from_wad() {
    // 1,000,000 USDC at 6 decimals normalizes to 1e24.
    let usdc = U256::from(1_000_000u64) * U256::from(1_000_000u64);
    assert_eq!(to_wad(usdc, 6), U256::from(1_000_000u64) * WAD);
    assert_eq!(from_wad(U256::from(1_000_000u64) * WAD, 6), usdc);

    // 18-decimal tokens pass through.
    assert_eq!(to_wad(wad(7), 18), wad(7));
    assert_eq!(from_wad(wad(7), 18), wad(7));
}
