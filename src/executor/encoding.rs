//! Universal-router V4 swap encoding
//!
//! One V4_SWAP command whose input is the ABI-encoded action list:
//! exact-in single swap, settle the input currency, take the output
//! currency. PoolKey currencies are sorted ascending by address.

use crate::pricing::tick_spacing_for_fee;
use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, U256};

pub const CMD_V4_SWAP: u8 = 0x10;
pub const ACTION_SWAP_EXACT_IN_SINGLE: u8 = 0x06;
pub const ACTION_SETTLE_ALL: u8 = 0x0c;
pub const ACTION_TAKE_ALL: u8 = 0x0f;

/// Encoded call pieces for `execute(commands, inputs, deadline)`.
#[derive(Debug, Clone)]
pub struct V4SwapCall {
    pub commands: Bytes,
    pub inputs: Vec<Bytes>,
}

fn pool_key_token(currency0: Address, currency1: Address, fee: u32, hooks: Address) -> Token {
    Token::Tuple(vec![
        Token::Address(currency0),
        Token::Address(currency1),
        Token::Uint(U256::from(fee)),
        Token::Int(U256::from(tick_spacing_for_fee(fee) as u64)),
        Token::Address(hooks),
    ])
}

/// Build the command/input pair for a single exact-in swap.
pub fn encode_v4_swap(
    token_in: Address,
    token_out: Address,
    amount_in: U256,
    min_amount_out: U256,
    fee: u32,
    hooks: Address,
) -> V4SwapCall {
    let (currency0, currency1, zero_for_one) = if token_in < token_out {
        (token_in, token_out, true)
    } else {
        (token_out, token_in, false)
    };

    let actions = vec![
        ACTION_SWAP_EXACT_IN_SINGLE,
        ACTION_SETTLE_ALL,
        ACTION_TAKE_ALL,
    ];

    // ExactInputSingleParams: (PoolKey, zeroForOne, amountIn,
    //                          amountOutMinimum, hookData)
    let swap_params = encode(&[
        pool_key_token(currency0, currency1, fee, hooks),
        Token::Bool(zero_for_one),
        Token::Uint(amount_in),
        Token::Uint(min_amount_out),
        Token::Bytes(Vec::new()),
    ]);

    // SETTLE_ALL: (currency, maxAmount); TAKE_ALL: (currency, minAmount)
    let settle_params = encode(&[Token::Address(token_in), Token::Uint(amount_in)]);
    let take_params = encode(&[Token::Address(token_out), Token::Uint(min_amount_out)]);

    let v4_input = encode(&[
        Token::Bytes(actions),
        Token::Array(vec![
            Token::Bytes(swap_params),
            Token::Bytes(settle_params),
            Token::Bytes(take_params),
        ]),
    ]);

    V4SwapCall {
        commands: Bytes::from(vec![CMD_V4_SWAP]),
        inputs: vec![Bytes::from(v4_input)],
    }
}
