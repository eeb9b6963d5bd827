//! Fixtures shared by the storage tests

use alloy_primitives::U256;

use crate::{
    config::Config,
    models::{PendingTx, TxBody},
    storage::Storage,
    types::{Signature, UserState},
};

pub(crate) fn user_state(pub_key_id: u32, balance: u64, nonce: u64) -> UserState {
    UserState {
        pub_key_id,
        token_id: U256::ZERO,
        balance: U256::from(balance),
        nonce: U256::from(nonce),
    }
}

/// Transfer whose hash encodes sender and nonce
pub(crate) fn transfer(from: u32, to: u32, nonce: u64, amount: u64, fee: u64) -> PendingTx {
    let mut hash = [0u8; 32];
    hash[..4].copy_from_slice(&from.to_be_bytes());
    hash[4..12].copy_from_slice(&nonce.to_be_bytes());
    PendingTx {
        hash,
        from_state_id: from,
        amount: U256::from(amount),
        fee: U256::from(fee),
        nonce: U256::from(nonce),
        signature: Signature::default(),
        receive_time: Some(1_000 + nonce),
        body: TxBody::Transfer { to_state_id: to },
    }
}

/// Storage with one leaf per `(state_id, balance)`, all at nonce 0
pub(crate) fn storage_with_balances(balances: &[(u32, u64)]) -> Storage {
    let storage = Storage::new(&Config::default()).unwrap();
    for &(state_id, balance) in balances {
        storage
            .state_tree
            .set(state_id, &user_state(state_id, balance, 0))
            .unwrap();
    }
    storage
}
