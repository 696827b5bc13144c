use alloy::primitives::{hex, U256};
use kusd_keeper::chain::decode_revert_string;
use kusd_keeper::config::{limit_to_wad, units_from_f64};
use kusd_keeper::math::WAD;

/// ABI-encode `Error(string)` the way a node returns revert data.
fn encode_revert(reason: &str) -> String {
    let mut bytes = vec![0x08, 0xc3, 0x79, 0xa0];
    let mut word = [0u8; 32];
    word[31] = 0x20;
    bytes.extend_from_slice(&word); // offset
    let mut len = [0u8; 32];
    len[24..].copy_from_slice(&(reason.len() as u64).to_be_bytes());
    bytes.extend_from_slice(&len);
    let mut data = reason.as_bytes().to_vec();
    data.resize(reason.len().div_ceil(32) * 32, 0);
    bytes.extend_from_slice(&data);
    format!("0x{}", hex::encode(bytes))
}

// ─── Test 1: revert reason decoding ─────────────────────────────────────

#[test]
fn test_decode_revert_reason() {
    let encoded = encode_revert("Dog/liquidation-limit-hit");
    assert_eq!(
        decode_revert_string(&encoded).as_deref(),
        Some("Dog/liquidation-limit-hit")
    );
}

#[test]
fn test_decode_revert_rejects_other_payloads() {
    // Not an Error(string) selector.
    assert!(decode_revert_string("0xdeadbeef").is_none());
    // Too short to carry a string.
    assert!(decode_revert_string("0x08c379a0").is_none());
    // Not hex at all.
    assert!(decode_revert_string("definitely not hex").is_none());
}

// ─── Test 2: config unit conversions ────────────────────────────────────

#[test]
fn test_units_from_f64() {
    // 10 USDC at 6 decimals.
    assert_eq!(units_from_f64(10.0, 6), U256::from(10_000_000u64));
    // 1.5 tokens at 18 decimals.
    assert_eq!(units_from_f64(1.5, 18), WAD + WAD / U256::from(2));
    // Fractional cents survive to 6 places.
    assert_eq!(units_from_f64(0.000001, 6), U256::from(1u64));
    // Negative inputs clamp to zero rather than wrapping.
    assert_eq!(units_from_f64(-3.0, 6), U256::ZERO);
}

#[test]
fn test_limit_to_wad() {
    assert_eq!(limit_to_wad(1.0), WAD);
    assert_eq!(
        limit_to_wad(1.005),
        WAD + WAD * U256::from(5u64) / U256::from(1_000)
    );
    assert_eq!(
        limit_to_wad(0.995),
        WAD - WAD * U256::from(5u64) / U256::from(1_000)
    );
}
