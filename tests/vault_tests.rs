use std::sync::Arc;

use alloy::primitives::{Address, B256, U256};
use alloy::sol_types::SolEvent;
use kusd_keeper::chain::ChainClient;
use kusd_keeper::contracts::{ilk_from_name, ilk_name, IVat};
use kusd_keeper::math::{RAY, WAD};
use kusd_keeper::vaults::{evaluate_urn, DogIlk, IlkState, UrnState, VaultMonitor};

// Well-known throwaway key; no transaction is ever signed in these tests.
const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

fn test_monitor() -> VaultMonitor {
    let chain = Arc::new(
        ChainClient::new("http://localhost:8545", TEST_KEY, 31337, 1_000_000_000, 1_500_000)
            .unwrap(),
    );
    VaultMonitor::new(chain, Address::ZERO, Address::ZERO, Vec::new())
}

fn urn_addr(n: u8) -> Address {
    Address::repeat_byte(n)
}

fn frob_topics(ilk: B256, urn: Address) -> Vec<B256> {
    vec![IVat::Frob::SIGNATURE_HASH, ilk, urn.into_word()]
}

fn ilk_state(ilk: B256, spot_whole: u64) -> IlkState {
    IlkState {
        ilk,
        total_art: U256::ZERO,
        rate: RAY,
        spot: U256::from(spot_whole) * RAY,
        line: U256::ZERO,
        dust: U256::ZERO,
    }
}

fn dog_ilk() -> DogIlk {
    DogIlk {
        clip: urn_addr(0xcc),
        // 13% penalty
        chop: RAY + RAY * U256::from(13) / U256::from(100),
        hole: U256::MAX,
        dirt: U256::ZERO,
    }
}

// ─── Test 1: ilk name codec ─────────────────────────────────────────────

#[test]
fn test_ilk_name_round_trip() {
    for name in ["WBTC-A", "WETH-C", "X"] {
        let tag = ilk_from_name(name).unwrap();
        assert_eq!(ilk_name(tag), name);
        // Right-padded with zero bytes.
        assert_eq!(&tag.as_slice()[..name.len()], name.as_bytes());
        assert!(tag.as_slice()[name.len()..].iter().all(|&b| b == 0));
    }
}

#[test]
fn test_ilk_name_rejects_bad_lengths() {
    assert!(ilk_from_name("").is_err());
    assert!(ilk_from_name(&"A".repeat(33)).is_err());
    assert!(ilk_from_name(&"A".repeat(32)).is_ok());
}

// ─── Test 2: vault-set growth from Frob logs ────────────────────────────

#[test]
fn test_vault_set_growth() {
    let mut monitor = test_monitor();
    let wbtc = ilk_from_name("WBTC-A").unwrap();
    let weth = ilk_from_name("WETH-A").unwrap();

    monitor.ingest_frob(&frob_topics(wbtc, urn_addr(1)));
    monitor.ingest_frob(&frob_topics(wbtc, urn_addr(2)));
    monitor.ingest_frob(&frob_topics(weth, urn_addr(1)));
    assert_eq!(monitor.vault_count(), 3);

    // Repeated logs are idempotent: the set holds distinct pairs only.
    for _ in 0..5 {
        monitor.ingest_frob(&frob_topics(wbtc, urn_addr(1)));
    }
    assert_eq!(monitor.vault_count(), 3);

    // The same urn address under a different ilk is a different vault.
    monitor.ingest_frob(&frob_topics(weth, urn_addr(2)));
    assert_eq!(monitor.vault_count(), 4);
}

#[test]
fn test_ingest_ignores_foreign_topics() {
    let mut monitor = test_monitor();
    let wbtc = ilk_from_name("WBTC-A").unwrap();

    // Wrong signature topic.
    monitor.ingest_frob(&[B256::ZERO, wbtc, urn_addr(1).into_word()]);
    // Truncated topic list.
    monitor.ingest_frob(&[IVat::Frob::SIGNATURE_HASH, wbtc]);
    assert_eq!(monitor.vault_count(), 0);
}

// ─── Test 3: unsafe-vault detection ─────────────────────────────────────

#[test]
fn test_underwater_vault_emitted() {
    // WBTC-A at spot 20,000, rate 1.0; vault holds 1 WBTC against
    // 21,000 KUSD of debt. Ratio just above 95%.
    let wbtc = ilk_from_name("WBTC-A").unwrap();
    let ilk = ilk_state(wbtc, 20_000);
    let urn = UrnState {
        ilk: wbtc,
        urn: urn_addr(1),
        ink: WAD,
        art: U256::from(21_000u64) * WAD,
    };

    let opp = evaluate_urn(&urn, &ilk, &dog_ilk()).expect("vault should be emitted");
    assert_eq!(opp.ratio_bps, U256::from(9_523u64));
    assert_eq!(opp.penalty_bps, 1_300);
    assert_eq!(opp.urn, urn);
}

#[test]
fn test_safe_vault_not_emitted() {
    let wbtc = ilk_from_name("WBTC-A").unwrap();
    let ilk = ilk_state(wbtc, 20_000);
    let urn = UrnState {
        ilk: wbtc,
        urn: urn_addr(1),
        ink: WAD,
        art: U256::from(15_000u64) * WAD,
    };
    assert!(evaluate_urn(&urn, &ilk, &dog_ilk()).is_none());
}

#[test]
fn test_boundary_vault_is_safe() {
    // ink·spot exactly equals art·rate: the inequality holds, no emission.
    let wbtc = ilk_from_name("WBTC-A").unwrap();
    let ilk = ilk_state(wbtc, 20_000);
    let urn = UrnState {
        ilk: wbtc,
        urn: urn_addr(1),
        ink: WAD,
        art: U256::from(20_000u64) * WAD,
    };
    assert!(evaluate_urn(&urn, &ilk, &dog_ilk()).is_none());
}

#[test]
fn test_empty_vault_ignored() {
    // art = 0 is skipped even with zero collateral.
    let wbtc = ilk_from_name("WBTC-A").unwrap();
    let ilk = ilk_state(wbtc, 20_000);
    let urn = UrnState {
        ilk: wbtc,
        urn: urn_addr(1),
        ink: U256::ZERO,
        art: U256::ZERO,
    };
    assert!(evaluate_urn(&urn, &ilk, &dog_ilk()).is_none());
}

#[test]
fn test_emission_iff_invariant_fails() {
    // Exhaustive little grid: emitted exactly when ink·spot < art·rate
    // with art > 0.
    let wbtc = ilk_from_name("WBTC-A").unwrap();
    let dog = dog_ilk();
    for spot in [1u64, 10, 100] {
        for (ink, art) in [(0u64, 0u64), (1, 0), (1, 5), (1, 50), (2, 150), (10, 999)] {
            let ilk = ilk_state(wbtc, spot);
            let urn = UrnState {
                ilk: wbtc,
                urn: urn_addr(1),
                ink: U256::from(ink) * WAD,
                art: U256::from(art) * WAD,
            };
            let expect_emit = art > 0 && ink * spot < art;
            assert_eq!(
                evaluate_urn(&urn, &ilk, &dog).is_some(),
                expect_emit,
                "spot={spot} ink={ink} art={art}"
            );
        }
    }
}
