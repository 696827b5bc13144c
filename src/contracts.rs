//! ABI bindings for the protocol surface the keeper consumes.
//!
//! Narrow-width fields (uint96/uint48/uint112) are declared as uint256:
//! ABI words are padded to 32 bytes, so the encodings are identical.

use alloy::primitives::B256;
use alloy::sol;

use crate::error::{KeeperError, Result};

sol! {
    /// Core accounting engine: vault and collateral-type state.
    interface IVat {
        function urns(bytes32 ilk, address urn) external view returns (uint256 ink, uint256 art);
        function ilks(bytes32 ilk) external view returns (uint256 Art, uint256 rate, uint256 spot, uint256 line, uint256 dust);
        function kusd(address usr) external view returns (uint256);

        event Frob(bytes32 indexed ilk, address indexed urn, uint256 dink, uint256 dart);
    }

    /// Liquidation module.
    interface IDog {
        function Hole() external view returns (uint256);
        function Dirt() external view returns (uint256);
        function ilks(bytes32 ilk) external view returns (address clip, uint256 chop, uint256 hole, uint256 dirt);
        function bark(bytes32 ilk, address urn, address kpr) external returns (uint256 id);

        event Bark(bytes32 indexed ilk, address indexed urn, uint256 ink, uint256 art, uint256 due, address clip, uint256 indexed id);
    }

    /// Dutch collateral auction.
    interface IClipper {
        function sales(uint256 id) external view returns (uint256 pos, uint256 tab, uint256 lot, uint256 tot, address usr, uint256 tic, uint256 top);
        function take(uint256 id, uint256 amt, uint256 max, address who, bytes calldata data) external;
    }

    /// Surplus auction: sells system KUSD surplus for sKLC.
    interface IFlapper {
        function beg() external view returns (uint256);
        function bids(uint256 id) external view returns (uint256 bid, uint256 lot, address guy, uint256 tic, uint256 end);
        function tend(uint256 id, uint256 lot, uint256 bid) external;

        event Kick(uint256 id, uint256 lot, uint256 bid);
    }

    /// Debt auction: mints sKLC to cover system debt.
    interface IFlopper {
        function beg() external view returns (uint256);
        function bids(uint256 id) external view returns (uint256 bid, uint256 lot, address guy, uint256 tic, uint256 end);
        function dent(uint256 id, uint256 lot, uint256 bid) external;

        event Kick(uint256 id, uint256 lot, uint256 bid, address indexed gal);
    }

    /// Price feed. `val` is an unsigned WAD interpreted verbatim.
    interface IPip {
        function peek() external view returns (uint256 val, bool ok);
    }

    /// Adapter between the external KUSD ERC-20 and internal Vat balances.
    interface IKusdJoin {
        function join(address usr, uint256 wad) external;
        function exit(address usr, uint256 wad) external;
    }

    /// Peg stability module: fee-bounded 1:1 gem<->KUSD mint/redeem.
    interface IPsm {
        function sellGem(address usr, uint256 gemAmt) external;
        function buyGem(address usr, uint256 gemAmt) external;
        function tin() external view returns (uint256);
        function tout() external view returns (uint256);
        function gem() external view returns (address);
        function kusd() external view returns (address);
        function pocket() external view returns (address);
    }

    /// Uniswap-V2-style router.
    interface IRouter {
        function getAmountsOut(uint256 amountIn, address[] calldata path) external view returns (uint256[] memory amounts);
        function swapExactTokensForTokens(uint256 amountIn, uint256 amountOutMin, address[] calldata path, address to, uint256 deadline) external returns (uint256[] memory amounts);
    }

    /// Uniswap-V2-style pair.
    interface IPair {
        function getReserves() external view returns (uint256 reserve0, uint256 reserve1, uint256 blockTimestampLast);
        function token0() external view returns (address);
        function token1() external view returns (address);
    }

    interface IErc20 {
        function approve(address spender, uint256 amount) external returns (bool);
        function balanceOf(address owner) external view returns (uint256);
        function decimals() external view returns (uint8);
    }
}

/// Encode a collateral name like `WBTC-A` as UTF-8 right-padded to 32 bytes.
pub fn ilk_from_name(name: &str) -> Result<B256> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > 32 {
        return Err(KeeperError::Config(format!(
            "ilk name '{name}' must be 1..=32 bytes"
        )));
    }
    let mut out = [0u8; 32];
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(B256::new(out))
}

/// Decode an ilk tag back to its name: drop trailing zero bytes, read UTF-8.
pub fn ilk_name(ilk: B256) -> String {
    let bytes = ilk.as_slice();
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
