//! Unit tests for swap encoding and the gas-reserve projection

use super::encoding::*;
use super::reserve_allows_swap;
use ethers::abi::{decode, ParamType, Token};
use ethers::types::{Address, U256};
use rust_decimal_macros::dec;

#[test]
fn test_reserve_projection_refuses_breach() {
    // 0.012 native, swap costs ~0.003 → projected 0.009 < 0.01 reserve
    assert!(!reserve_allows_swap(dec!(0.012), dec!(0.003), dec!(0.01)));
}

#[test]
fn test_reserve_projection_allows_exact_floor() {
    // Projection landing exactly on the reserve is allowed
    assert!(reserve_allows_swap(dec!(0.013), dec!(0.003), dec!(0.01)));
    assert!(reserve_allows_swap(dec!(1.0), dec!(0.002), dec!(0.01)));
}

#[test]
fn test_reserve_projection_refuses_when_already_below() {
    assert!(!reserve_allows_swap(dec!(0.004), dec!(0.0), dec!(0.01)));
}

fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

#[test]
fn test_swap_command_byte() {
    let call = encode_v4_swap(
        addr(0x01),
        addr(0x02),
        U256::from(1000u64),
        U256::zero(),
        3000,
        Address::zero(),
    );
    assert_eq!(call.commands.to_vec(), vec![CMD_V4_SWAP]);
    assert_eq!(call.inputs.len(), 1);
}

fn decode_v4_input(input: &[u8]) -> (Vec<u8>, Vec<Vec<u8>>) {
    let tokens = decode(
        &[
            ParamType::Bytes,
            ParamType::Array(Box::new(ParamType::Bytes)),
        ],
        input,
    )
    .unwrap();
    let actions = match &tokens[0] {
        Token::Bytes(b) => b.clone(),
        other => panic!("expected bytes, got {other:?}"),
    };
    let params = match &tokens[1] {
        Token::Array(items) => items
            .iter()
            .map(|t| match t {
                Token::Bytes(b) => b.clone(),
                other => panic!("expected bytes, got {other:?}"),
            })
            .collect(),
        other => panic!("expected array, got {other:?}"),
    };
    (actions, params)
}

#[test]
fn test_swap_action_sequence() {
    let call = encode_v4_swap(
        addr(0x01),
        addr(0x02),
        U256::from(1000u64),
        U256::zero(),
        3000,
        Address::zero(),
    );
    let (actions, params) = decode_v4_input(&call.inputs[0]);
    assert_eq!(
        actions,
        vec![ACTION_SWAP_EXACT_IN_SINGLE, ACTION_SETTLE_ALL, ACTION_TAKE_ALL]
    );
    assert_eq!(params.len(), 3);
}

#[test]
fn test_swap_params_roundtrip() {
    let token_in = addr(0x01);
    let token_out = addr(0x02);
    let amount = U256::from(123_456u64);
    let min_out = U256::from(7u64);
    let call = encode_v4_swap(token_in, token_out, amount, min_out, 3000, Address::zero());
    let (_, params) = decode_v4_input(&call.inputs[0]);

    let pool_key = ParamType::Tuple(vec![
        ParamType::Address,
        ParamType::Address,
        ParamType::Uint(24),
        ParamType::Int(24),
        ParamType::Address,
    ]);
    let swap = decode(
        &[
            pool_key,
            ParamType::Bool,
            ParamType::Uint(128),
            ParamType::Uint(128),
            ParamType::Bytes,
        ],
        &params[0],
    )
    .unwrap();

    // token_in (0x01...) < token_out (0x02...) → it is currency0, zeroForOne
    match &swap[0] {
        Token::Tuple(key) => {
            assert_eq!(key[0], Token::Address(token_in));
            assert_eq!(key[1], Token::Address(token_out));
            assert_eq!(key[2], Token::Uint(U256::from(3000u64)));
            // fee 3000 → tick spacing 60
            assert_eq!(key[3], Token::Int(U256::from(60u64)));
        }
        other => panic!("expected pool key tuple, got {other:?}"),
    }
    assert_eq!(swap[1], Token::Bool(true));
    assert_eq!(swap[2], Token::Uint(amount));
    assert_eq!(swap[3], Token::Uint(min_out));

    // Settle carries the input currency and amount, take the output side
    let settle = decode(&[ParamType::Address, ParamType::Uint(128)], &params[1]).unwrap();
    assert_eq!(settle[0], Token::Address(token_in));
    assert_eq!(settle[1], Token::Uint(amount));
    let take = decode(&[ParamType::Address, ParamType::Uint(128)], &params[2]).unwrap();
    assert_eq!(take[0], Token::Address(token_out));
    assert_eq!(take[1], Token::Uint(min_out));
}

#[test]
fn test_swap_direction_flips_when_unsorted() {
    // token_in (0x05...) > token_out (0x03...) → token_out is currency0,
    // so the swap runs one-for-zero
    let call = encode_v4_swap(
        addr(0x05),
        addr(0x03),
        U256::from(10u64),
        U256::zero(),
        500,
        Address::zero(),
    );
    let (_, params) = decode_v4_input(&call.inputs[0]);
    let pool_key = ParamType::Tuple(vec![
        ParamType::Address,
        ParamType::Address,
        ParamType::Uint(24),
        ParamType::Int(24),
        ParamType::Address,
    ]);
    let swap = decode(
        &[
            pool_key,
            ParamType::Bool,
            ParamType::Uint(128),
            ParamType::Uint(128),
            ParamType::Bytes,
        ],
        &params[0],
    )
    .unwrap();
    match &swap[0] {
        Token::Tuple(key) => {
            assert_eq!(key[0], Token::Address(addr(0x03)));
            assert_eq!(key[1], Token::Address(addr(0x05)));
        }
        other => panic!("expected pool key tuple, got {other:?}"),
    }
    assert_eq!(swap[1], Token::Bool(false));
}
