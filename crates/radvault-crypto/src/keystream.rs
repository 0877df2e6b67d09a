//! Address-keyed keystream.
//!
//! The keystream byte for flash address `A` is byte `A % 64` of the block
//! with counter `A / 64` under the record key and an all-zero nonce, so any
//! sub-range of a record can be transformed independently of its neighbours.

use crate::cipher::ChaChaState;
use crate::{BLOCK_SIZE, KEY_SIZE, NONCE_SIZE};

const ADDRESS_NONCE: [u8; NONCE_SIZE] = [0u8; NONCE_SIZE];

/// XOR the keystream for `address..address + buf.len()` into `buf`.
///
/// Encryption and decryption are the same operation.
pub fn apply_at(key: &[u8; KEY_SIZE], address: u32, buf: &mut [u8]) {
    let mut state = ChaChaState::new(key, &ADDRESS_NONCE, address / BLOCK_SIZE as u32);
    let mut skip = (address % BLOCK_SIZE as u32) as usize;
    let mut rest = buf;

    while !rest.is_empty() {
        let ks = state.block();
        state.advance();
        let take = rest.len().min(BLOCK_SIZE - skip);
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(take);
        for (b, k) in head.iter_mut().zip(&ks[skip..skip + take]) {
            *b ^= k;
        }
        rest = tail;
        skip = 0;
    }
}
