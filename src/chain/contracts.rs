//! Contract bindings
//!
//! Human-readable ABI fragments for the contracts the trader touches. Only
//! the functions actually called are declared.

use ethers::contract::abigen;

abigen!(
    Erc20,
    r#"[
        function approve(address spender, uint256 amount) external returns (bool)
        function allowance(address owner, address spender) external view returns (uint256)
        function balanceOf(address account) external view returns (uint256)
        function decimals() external view returns (uint8)
        function symbol() external view returns (string)
    ]"#;

    UniswapV3Factory,
    r#"[
        function getPool(address tokenA, address tokenB, uint24 fee) external view returns (address)
    ]"#;

    UniswapV3Pool,
    r#"[
        function slot0() external view returns (uint160 sqrtPriceX96, int24 tick, uint16 observationIndex, uint16 observationCardinality, uint16 observationCardinalityNext, uint8 feeProtocol, bool unlocked)
        function token0() external view returns (address)
        function token1() external view returns (address)
    ]"#;

    PoolManager,
    r#"[
        function getSlot0(bytes32 id) external view returns (uint160 sqrtPriceX96, int24 tick, uint24 protocolFee, uint24 lpFee)
    ]"#;

    UniversalRouter,
    r#"[
        function execute(bytes commands, bytes[] inputs, uint256 deadline) external payable
    ]"#;

    Permit2,
    r#"[
        function approve(address token, address spender, uint160 amount, uint48 expiration) external
        function allowance(address owner, address token, address spender) external view returns (uint160 amount, uint48 expiration, uint48 nonce)
    ]"#
);
