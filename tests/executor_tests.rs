use alloy::primitives::{Address, U256};
use kusd_keeper::auctions::AuctionStatus;
use kusd_keeper::english::{next_amount, EnglishAuction, EnglishKind};
use kusd_keeper::executors::{ceiling_reached, take_amount, take_profit_rad};
use kusd_keeper::math::{RAD, RAY, WAD};
use kusd_keeper::vaults::{DogIlk, DogParams};

fn rad(n: u64) -> U256 {
    U256::from(n) * RAD
}

fn ray(n: u64) -> U256 {
    U256::from(n) * RAY
}

fn wad(n: u64) -> U256 {
    U256::from(n) * WAD
}

// ─── Test 1: liquidation preflight ceilings ─────────────────────────────

#[test]
fn test_ceiling_preflight() {
    let open_ilk = DogIlk {
        clip: Address::repeat_byte(0xcc),
        chop: RAY,
        hole: rad(1_000),
        dirt: rad(100),
    };

    // Room on both: proceed.
    let global = DogParams {
        hole: rad(10_000),
        dirt: rad(500),
    };
    assert!(!ceiling_reached(&global, &open_ilk));

    // Global ceiling full: refuse.
    let global_full = DogParams {
        hole: rad(10_000),
        dirt: rad(10_000),
    };
    assert!(ceiling_reached(&global_full, &open_ilk));

    // Per-ilk ceiling full: refuse even with global room.
    let ilk_full = DogIlk {
        dirt: rad(1_000),
        ..open_ilk.clone()
    };
    assert!(ceiling_reached(&global, &ilk_full));

    // Over-full (dirt past hole) still refuses.
    let ilk_over = DogIlk {
        dirt: rad(1_500),
        ..open_ilk
    };
    assert!(ceiling_reached(&global, &ilk_over));
}

// ─── Test 2: take sizing is solvency-bounded ────────────────────────────

#[test]
fn test_take_amount_bounded_by_balance() {
    let lot = wad(2);
    let cap = wad(1_000_000);
    let price = ray(50);

    // Balance covers the whole lot: take it all.
    assert_eq!(take_amount(lot, cap, price, rad(100)), lot);

    // Balance covers 1.2 units at 50 each: the take shrinks.
    let amount = take_amount(lot, cap, price, rad(60));
    assert_eq!(amount, wad(1) + wad(1) / U256::from(5));

    // The solvency invariant: amount · price never exceeds the balance.
    for balance in [0u64, 1, 49, 50, 60, 99, 100, 250] {
        let amount = take_amount(lot, cap, price, rad(balance));
        assert!(
            amount * price <= rad(balance),
            "take of {amount} overspends balance {balance}"
        );
    }
}

#[test]
fn test_take_amount_respects_config_cap() {
    let amount = take_amount(wad(10), wad(3), ray(1), rad(1_000_000));
    assert_eq!(amount, wad(3));
}

#[test]
fn test_take_amount_zero_price() {
    assert_eq!(take_amount(wad(2), wad(10), U256::ZERO, rad(100)), U256::ZERO);
}

#[test]
fn test_take_profit_estimate() {
    // 1 unit bought at 50, worth 60: 10 KUSD of profit, RAD scale.
    assert_eq!(take_profit_rad(wad(1), ray(60), ray(50)), rad(10));
    // Market at or under the curve estimates zero, never underflows.
    assert_eq!(take_profit_rad(wad(1), ray(50), ray(50)), U256::ZERO);
    assert_eq!(take_profit_rad(wad(1), ray(40), ray(50)), U256::ZERO);
}

// ─── Test 3: english auction bid arithmetic ─────────────────────────────

fn flap_auction(bid_sklc: u64, lot_kusd: u64) -> EnglishAuction {
    EnglishAuction {
        kind: EnglishKind::Flap,
        id: U256::from(1u64),
        bid: wad(bid_sklc),
        lot: rad(lot_kusd),
        guy: Address::repeat_byte(2),
        tic: 0,
        end: 10_000,
    }
}

#[test]
fn test_flap_minimum_raise() {
    // beg = 1.05: the next tend must raise the sKLC bid by 5%.
    let auction = flap_auction(100, 50_000);
    let beg = EnglishKind::Flap.default_beg();
    assert_eq!(next_amount(EnglishKind::Flap, &auction, beg), wad(105));
}

#[test]
fn test_flop_minimum_drop() {
    // beg = 0.95: the next dent must shrink the sKLC lot by 5%.
    let auction = EnglishAuction {
        kind: EnglishKind::Flop,
        id: U256::from(2u64),
        bid: rad(500),
        lot: wad(100),
        guy: Address::repeat_byte(2),
        tic: 0,
        end: 10_000,
    };
    let beg = EnglishKind::Flop.default_beg();
    assert_eq!(next_amount(EnglishKind::Flop, &auction, beg), wad(95));
}

// ─── Test 4: auction liveness ───────────────────────────────────────────

#[test]
fn test_zero_guy_sentinel_is_closed() {
    let mut auction = flap_auction(100, 50_000);
    assert_eq!(auction.status(), AuctionStatus::Active);
    auction.guy = Address::ZERO;
    assert_eq!(auction.status(), AuctionStatus::Closed);
    assert!(!auction.biddable(0));
}

#[test]
fn test_biddable_windows() {
    let mut auction = flap_auction(100, 50_000);

    // No bid yet (tic = 0): open until `end`.
    assert!(auction.biddable(0));
    assert!(auction.biddable(9_999));
    assert!(!auction.biddable(10_000));

    // A standing bid sets tic; bidding closes at whichever comes first.
    auction.tic = 5_000;
    assert!(auction.biddable(4_999));
    assert!(!auction.biddable(5_000));
}
