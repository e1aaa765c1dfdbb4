#![allow(clippy::too_many_arguments)]
#![allow(missing_docs)]
#![allow(clippy::missing_docs_in_private_items)]

use alloy::sol;

sol! {
    /// ERC20 token surface used for balance, allowance and approval handling.
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256 balance);
        function allowance(address owner, address spender) external view returns (uint256 remaining);
        function approve(address spender, uint256 value) external returns (bool success);
        function decimals() external view returns (uint8 places);
    }

    /// Liquidity router with stable/volatile pools and multi-hop swaps.
    interface IRouter {
        struct Route {
            address pair;
            address from;
            address to;
            bool stable;
            bool concentrated;
            address receiver;
        }

        function addLiquidity(
            address tokenA,
            address tokenB,
            bool stable,
            uint256 amountADesired,
            uint256 amountBDesired,
            uint256 amountAMin,
            uint256 amountBMin,
            address to,
            uint256 deadline
        ) external returns (uint256 amountA, uint256 amountB, uint256 liquidity);

        function swapExactTokensForTokens(
            uint256 amountIn,
            uint256 amountOutMin,
            Route[] routes,
            address to,
            uint256 deadline
        ) external returns (uint256[] amounts);
    }

    /// Single-token staking pool.
    interface IStaking {
        function deposit(uint256 amount) external;
        function totalStaked() external view returns (uint256 total);
        function balanceOf(address account) external view returns (uint256 staked);
        function stakingToken() external view returns (address token);
        function maxStakePerUser() external view returns (uint256 cap);
        function paused() external view returns (bool isPaused);
    }
}
