//! ChaCha20 block function over a 16-word state.
//!
//! Layout: words 0..3 constants, 4..11 key, 12 block counter, 13..15 nonce.

use zeroize::{Zeroize, Zeroizing};

use crate::{BLOCK_SIZE, KEY_SIZE, NONCE_SIZE};

/// "expand 32-byte k"
const SIGMA: [u32; 4] = [0x6170_7865, 0x3320_646e, 0x7962_2d32, 0x6b20_6574];

pub(crate) const KEY_WORDS: std::ops::Range<usize> = 4..12;
pub(crate) const COUNTER_WORD: usize = 12;

const DOUBLE_ROUNDS: usize = 10;

/// A ChaCha20 input state. Zeroized on drop.
#[derive(Clone)]
pub struct ChaChaState {
    words: [u32; 16],
}

impl ChaChaState {
    pub fn new(key: &[u8; KEY_SIZE], nonce: &[u8; NONCE_SIZE], counter: u32) -> Self {
        let mut words = [0u32; 16];
        words[..4].copy_from_slice(&SIGMA);
        for (w, chunk) in words[KEY_WORDS].iter_mut().zip(key.chunks_exact(4)) {
            *w = le_word(chunk);
        }
        words[COUNTER_WORD] = counter;
        for (w, chunk) in words[13..].iter_mut().zip(nonce.chunks_exact(4)) {
            *w = le_word(chunk);
        }
        Self { words }
    }

    /// A state with the constants set and every other word zero.
    pub(crate) fn blank() -> Self {
        let mut words = [0u32; 16];
        words[..4].copy_from_slice(&SIGMA);
        Self { words }
    }

    pub fn counter(&self) -> u32 {
        self.words[COUNTER_WORD]
    }

    pub fn set_counter(&mut self, counter: u32) {
        self.words[COUNTER_WORD] = counter;
    }

    /// Step to the next block. The 32-bit counter wraps.
    pub fn advance(&mut self) {
        self.words[COUNTER_WORD] = self.words[COUNTER_WORD].wrapping_add(1);
    }

    pub(crate) fn words(&self) -> &[u32; 16] {
        &self.words
    }

    pub(crate) fn words_mut(&mut self) -> &mut [u32; 16] {
        &mut self.words
    }

    /// Run 20 rounds and add the input back in. Does not advance the counter.
    pub fn block_words(&self) -> Zeroizing<[u32; 16]> {
        let mut x = Zeroizing::new(self.words);
        for _ in 0..DOUBLE_ROUNDS {
            quarter_round(&mut x, 0, 4, 8, 12);
            quarter_round(&mut x, 1, 5, 9, 13);
            quarter_round(&mut x, 2, 6, 10, 14);
            quarter_round(&mut x, 3, 7, 11, 15);
            quarter_round(&mut x, 0, 5, 10, 15);
            quarter_round(&mut x, 1, 6, 11, 12);
            quarter_round(&mut x, 2, 7, 8, 13);
            quarter_round(&mut x, 3, 4, 9, 14);
        }
        for (out, input) in x.iter_mut().zip(self.words.iter()) {
            *out = out.wrapping_add(*input);
        }
        x
    }

    /// One keystream block, serialized little-endian.
    pub fn block(&self) -> Zeroizing<[u8; BLOCK_SIZE]> {
        let words = self.block_words();
        let mut out = Zeroizing::new([0u8; BLOCK_SIZE]);
        for (chunk, w) in out.chunks_exact_mut(4).zip(words.iter()) {
            chunk.copy_from_slice(&w.to_le_bytes());
        }
        out
    }

    /// XOR keystream over `buf` in place, advancing one block per 64 bytes.
    pub fn apply_keystream(&mut self, buf: &mut [u8]) {
        for chunk in buf.chunks_mut(BLOCK_SIZE) {
            let ks = self.block();
            for (b, k) in chunk.iter_mut().zip(ks.iter()) {
                *b ^= k;
            }
            self.advance();
        }
    }

    /// Encrypt (or decrypt) `input` into `output`. Only the common prefix
    /// of the two buffers is processed; returns its length.
    pub fn encrypt(&mut self, input: &[u8], output: &mut [u8]) -> usize {
        let n = input.len().min(output.len());
        let out = &mut output[..n];
        out.copy_from_slice(&input[..n]);
        self.apply_keystream(out);
        n
    }
}

impl Zeroize for ChaChaState {
    fn zeroize(&mut self) {
        self.words.zeroize();
    }
}

impl Drop for ChaChaState {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl std::fmt::Debug for ChaChaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaChaState")
            .field("words", &"[REDACTED]")
            .field("counter", &self.counter())
            .finish()
    }
}

#[inline(always)]
fn quarter_round(x: &mut [u32; 16], a: usize, b: usize, c: usize, d: usize) {
    x[a] = x[a].wrapping_add(x[b]);
    x[d] = (x[d] ^ x[a]).rotate_left(16);
    x[c] = x[c].wrapping_add(x[d]);
    x[b] = (x[b] ^ x[c]).rotate_left(12);
    x[a] = x[a].wrapping_add(x[b]);
    x[d] = (x[d] ^ x[a]).rotate_left(8);
    x[c] = x[c].wrapping_add(x[d]);
    x[b] = (x[b] ^ x[c]).rotate_left(7);
}

pub(crate) fn le_word(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chacha20::cipher::{KeyIvInit, StreamCipher};
    use proptest::prelude::*;

    fn rfc_key() -> [u8; KEY_SIZE] {
        std::array::from_fn(|i| i as u8)
    }

    #[test]
    fn test_rfc8439_block_vector() {
        // RFC 8439 section 2.3.2
        let nonce = [0, 0, 0, 0x09, 0, 0, 0, 0x4a, 0, 0, 0, 0];
        let state = ChaChaState::new(&rfc_key(), &nonce, 1);
        let expected: [u8; 64] = [
            0x10, 0xf1, 0xe7, 0xe4, 0xd1, 0x3b, 0x59, 0x15, 0x50, 0x0f, 0xdd, 0x1f, 0xa3, 0x20,
            0x71, 0xc4, 0xc7, 0xd1, 0xf4, 0xc7, 0x33, 0xc0, 0x68, 0x03, 0x04, 0x22, 0xaa, 0x9a,
            0xc3, 0xd4, 0x6c, 0x4e, 0xd2, 0x82, 0x64, 0x46, 0x07, 0x9f, 0xaa, 0x09, 0x14, 0xc2,
            0xd7, 0x05, 0xd9, 0x8b, 0x02, 0xa2, 0xb5, 0x12, 0x9c, 0xd1, 0xde, 0x16, 0x4e, 0xb9,
            0xcb, 0xd0, 0x83, 0xe8, 0xa2, 0x50, 0x3c, 0x4e,
        ];
        assert_eq!(*state.block(), expected);
        assert_eq!(state.block_words()[0], 0xe4e7_f110);
    }

    #[test]
    fn test_block_does_not_advance() {
        let state = ChaChaState::new(&rfc_key(), &[0u8; NONCE_SIZE], 7);
        let a = state.block();
        let b = state.block();
        assert_eq!(*a, *b);
        assert_eq!(state.counter(), 7);
    }

    #[test]
    fn test_counter_wraps() {
        let mut state = ChaChaState::new(&rfc_key(), &[0u8; NONCE_SIZE], u32::MAX);
        state.advance();
        assert_eq!(state.counter(), 0);
    }

    #[test]
    fn test_encrypt_is_involution() {
        let nonce = [3u8; NONCE_SIZE];
        let plaintext = b"Ladies and Gentlemen of the class of '99: If I could offer you only one tip";
        let mut ct = vec![0u8; plaintext.len()];
        ChaChaState::new(&rfc_key(), &nonce, 1).encrypt(plaintext, &mut ct);
        assert_ne!(&ct[..], &plaintext[..]);

        let mut pt = vec![0u8; ct.len()];
        ChaChaState::new(&rfc_key(), &nonce, 1).encrypt(&ct, &mut pt);
        assert_eq!(&pt[..], &plaintext[..]);
    }

    #[test]
    fn test_encrypt_mismatched_lengths_uses_common_prefix() {
        let nonce = [5u8; NONCE_SIZE];
        let input = [0x5Au8; 40];
        let mut full = [0u8; 40];
        assert_eq!(ChaChaState::new(&rfc_key(), &nonce, 0).encrypt(&input, &mut full), 40);

        let mut short = [0u8; 24];
        assert_eq!(ChaChaState::new(&rfc_key(), &nonce, 0).encrypt(&input, &mut short), 24);
        assert_eq!(short[..], full[..24]);

        let mut long = [0xEEu8; 64];
        assert_eq!(ChaChaState::new(&rfc_key(), &nonce, 0).encrypt(&input[..8], &mut long), 8);
        assert_eq!(long[..8], full[..8]);
        assert_eq!(long[8..], [0xEEu8; 56]);
    }

    #[test]
    fn test_debug_redacts_words() {
        let state = ChaChaState::new(&[0x41; KEY_SIZE], &[0u8; NONCE_SIZE], 0);
        let s = format!("{state:?}");
        assert!(s.contains("[REDACTED]"));
        assert!(!s.contains("1094795585"));
    }

    proptest! {
        #[test]
        fn matches_reference_chacha20(
            key in any::<[u8; 32]>(),
            nonce in any::<[u8; 12]>(),
            data in proptest::collection::vec(any::<u8>(), 0..300),
        ) {
            let mut ours = data.clone();
            ChaChaState::new(&key, &nonce, 0).apply_keystream(&mut ours);

            let mut reference = data.clone();
            let mut rc = chacha20::ChaCha20::new(&key.into(), &nonce.into());
            rc.apply_keystream(&mut reference);

            prop_assert_eq!(ours, reference);
        }
    }
}
