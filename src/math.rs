//! Fixed-point arithmetic at the three protocol scales.
//!
//! WAD = 10^18, RAY = 10^27, RAD = 10^45. All comparison and sizing math is
//! done on integers; intermediates widen to 512 bits so no product of two
//! in-range values can overflow. Truncation happens only in the final
//! division, toward zero. Floats exist solely for log formatting.

use alloy::primitives::{U256, U512};

/// 10^18
pub const WAD: U256 = U256::from_limbs([0x0de0b6b3a7640000, 0, 0, 0]);
/// 10^27
pub const RAY: U256 = U256::from_limbs([0x9fd0803ce8000000, 0x033b2e3c, 0, 0]);
/// 10^45
pub const RAD: U256 = U256::from_limbs([0x0b22a00000000000, 0xe086b93ce2f768a0, 0x2cd76f, 0]);
/// 10^9, the WAD→RAY scaling factor.
pub const WAD_TO_RAY: U256 = U256::from_limbs([1_000_000_000, 0, 0, 0]);

/// Basis points in 100%.
pub const BPS: u64 = 10_000;

fn widen(x: U256) -> U512 {
    let l = x.as_limbs();
    U512::from_limbs([l[0], l[1], l[2], l[3], 0, 0, 0, 0])
}

fn narrow(x: U512) -> U256 {
    let l = x.as_limbs();
    if l[4..].iter().any(|&w| w != 0) {
        return U256::MAX;
    }
    U256::from_limbs([l[0], l[1], l[2], l[3]])
}

/// `x * y / denom` with a 512-bit intermediate.
///
/// Saturates to `U256::MAX` if the quotient exceeds 256 bits, and returns
/// zero when `denom` is zero; callers that care guard the denominator.
pub fn mul_div(x: U256, y: U256, denom: U256) -> U256 {
    if denom.is_zero() {
        return U256::ZERO;
    }
    narrow(widen(x) * widen(y) / widen(denom))
}

/// `(x * y) / WAD`
pub fn wmul(x: U256, y: U256) -> U256 {
    mul_div(x, y, WAD)
}

/// `(x * y) / RAY`
pub fn rmul(x: U256, y: U256) -> U256 {
    mul_div(x, y, RAY)
}

/// `(x * WAD) / y`
pub fn wdiv(x: U256, y: U256) -> U256 {
    mul_div(x, WAD, y)
}

/// `(x * RAY) / y`
pub fn rdiv(x: U256, y: U256) -> U256 {
    mul_div(x, RAY, y)
}

/// Scale a WAD quantity up to RAY.
pub fn wad_to_ray(x: U256) -> U256 {
    x.saturating_mul(WAD_TO_RAY)
}

/// Normalize a token amount with `decimals` native decimals to 18 decimals.
pub fn to_wad(amount: U256, decimals: u8) -> U256 {
    if decimals >= 18 {
        return amount;
    }
    amount.saturating_mul(U256::from(10u64).pow(U256::from(18 - decimals as u64)))
}

/// Denormalize an 18-decimal amount back to `decimals` native decimals.
pub fn from_wad(amount: U256, decimals: u8) -> U256 {
    if decimals >= 18 {
        return amount;
    }
    amount / U256::from(10u64).pow(U256::from(18 - decimals as u64))
}

/// Safety test without division: `ink · spot >= art · rate`.
///
/// Both sides land at RAY·WAD = 10^45 scale.
pub fn is_safe(ink: U256, art: U256, spot: U256, rate: U256) -> bool {
    widen(ink) * widen(spot) >= widen(art) * widen(rate)
}

/// Collateralization ratio in basis points: `ink·spot·10000 / (art·rate)`.
///
/// 10_000 bps = 100%. Returns `None` for a debt-free vault (infinite ratio).
pub fn ratio_bps(ink: U256, art: U256, spot: U256, rate: U256) -> Option<U256> {
    if art.is_zero() {
        return None;
    }
    let num = widen(ink) * widen(spot) * widen(U256::from(BPS));
    let den = widen(art) * widen(rate);
    Some(narrow(num / den))
}

/// Dutch-auction price on the linear decay curve.
///
/// Equals `top` for `now <= tic`, zero for `now >= tic + tau`, and
/// `top · (tic + tau − now) / tau` in between.
pub fn auction_price(top: U256, tic: u64, tau: u64, now: u64) -> U256 {
    if now <= tic {
        return top;
    }
    let elapsed = now - tic;
    if elapsed >= tau || tau == 0 {
        return U256::ZERO;
    }
    mul_div(top, U256::from(tau - elapsed), U256::from(tau))
}

/// Profit of buying at `buy` and selling at `sell`, in signed basis points.
///
/// `(sell − buy) · 10000 / buy`; zero when `buy` is zero. Clamped to the
/// i64 range (a profit beyond that is not a number we trade on).
pub fn profit_bps(buy: U256, sell: U256) -> i64 {
    if buy.is_zero() {
        return 0;
    }
    let (diff, negative) = if sell >= buy {
        (sell - buy, false)
    } else {
        (buy - sell, true)
    };
    let bps = mul_div(diff, U256::from(BPS), buy);
    let bps = u64::try_from(bps).unwrap_or(u64::MAX).min(i64::MAX as u64) as i64;
    if negative {
        -bps
    } else {
        bps
    }
}

/// Convert a percentage (e.g. `5.0`, `0.5`) into basis points at config load.
pub fn percent_to_bps(percent: f64) -> i64 {
    (percent * 100.0).round() as i64
}

/// Format bps as a percentage with two decimals for logs.
pub fn bps_to_percent(bps: i64) -> f64 {
    bps as f64 / 100.0
}

fn scaled_to_f64(x: U256, scale: U256) -> f64 {
    let int = u128::try_from(x / scale).unwrap_or(u128::MAX) as f64;
    let frac = u128::try_from(x % scale).unwrap_or(0) as f64;
    let denom = u128::try_from(scale).unwrap_or(u128::MAX) as f64;
    int + frac / denom
}

/// WAD to float, for log formatting only.
pub fn wad_to_f64(x: U256) -> f64 {
    scaled_to_f64(x, WAD)
}

/// RAY to float, for log formatting only.
pub fn ray_to_f64(x: U256) -> f64 {
    scaled_to_f64(x, RAY)
}

/// RAD to float, for log formatting only.
pub fn rad_to_f64(x: U256) -> f64 {
    // RAD exceeds u128; drop to the RAY scale first.
    scaled_to_f64(x / WAD, RAY)
}
