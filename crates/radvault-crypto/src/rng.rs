//! Forward-secret deterministic random bit generator.
//!
//! A ChaCha20 state seeded from the hardware ID and the system timer, with
//! hardware noise folded into the key words on every draw. After each output
//! the key words are replaced by part of the block just produced, so a later
//! state capture does not reveal earlier outputs.

use rand::{CryptoRng, RngCore};
use zeroize::Zeroize;

use crate::cipher::{le_word, ChaChaState, COUNTER_WORD, KEY_WORDS};
use crate::HARDWARE_ID_SIZE;

/// Mixes performed when the state is first seeded
const SEED_MIXES: usize = 32;

/// Analog inputs sampled for entropy, in the order they are cycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalogChannel {
    TempSensor,
    VrefInt,
    Vcca,
}

impl AnalogChannel {
    const CYCLE: [AnalogChannel; 3] = [Self::TempSensor, Self::VrefInt, Self::Vcca];
}

/// Hardware noise inputs for the generator.
pub trait EntropySource {
    /// Radio receiver noise indicator (only the low 16 bits are used)
    fn radio_noise(&mut self) -> u16;
    /// Raw ADC conversion of `channel`
    fn analog(&mut self, channel: AnalogChannel) -> u16;
    /// Free-running system timer
    fn timer(&mut self) -> u32;
}

pub struct ForwardSecretRng<E> {
    entropy: E,
    hardware_id: [u8; HARDWARE_ID_SIZE],
    state: Option<ChaChaState>,
    mix_index: usize,
    channel: usize,
}

impl<E: EntropySource> ForwardSecretRng<E> {
    /// The state is seeded lazily on the first draw.
    pub fn new(hardware_id: [u8; HARDWARE_ID_SIZE], entropy: E) -> Self {
        Self {
            entropy,
            hardware_id,
            state: None,
            mix_index: 0,
            channel: 0,
        }
    }

    pub fn is_seeded(&self) -> bool {
        self.state.is_some()
    }

    fn sample(&mut self) -> u32 {
        let noise = self.entropy.radio_noise() as u32;
        let channel = AnalogChannel::CYCLE[self.channel];
        self.channel = (self.channel + 1) % AnalogChannel::CYCLE.len();
        let analog = self.entropy.analog(channel) as u32;
        let timer = self.entropy.timer();
        noise ^ (analog << 16) ^ timer
    }

    fn mix(&mut self, state: &mut ChaChaState) {
        let e = self.sample();
        let w = &mut state.words_mut()[KEY_WORDS.start + self.mix_index];
        *w = (*w ^ e).rotate_left(13);
        self.mix_index = (self.mix_index + 1) % KEY_WORDS.len();
    }

    fn seed(&mut self) -> ChaChaState {
        let mut state = ChaChaState::blank();
        {
            let words = state.words_mut();
            for (w, chunk) in words[4..7].iter_mut().zip(self.hardware_id.chunks_exact(4)) {
                *w = le_word(chunk);
            }
            for w in words[7..].iter_mut() {
                *w = self.entropy.timer();
            }
        }
        for _ in 0..SEED_MIXES {
            self.mix(&mut state);
        }
        tracing::trace!("forward-secret rng seeded");
        state
    }

    pub fn next_u32(&mut self) -> u32 {
        let mut state = match self.state.take() {
            Some(state) => state,
            None => self.seed(),
        };
        let block = state.block_words();
        {
            let words = state.words_mut();
            words[KEY_WORDS].copy_from_slice(&block[KEY_WORDS]);
            words[COUNTER_WORD] = words[COUNTER_WORD].wrapping_add(1);
        }
        let out = block[0];
        drop(block);
        self.mix(&mut state);
        self.state = Some(state);
        out
    }

    /// Fill `buf` from whole output words, then a partial tail word.
    pub fn fill(&mut self, buf: &mut [u8]) {
        let mut chunks = buf.chunks_exact_mut(4);
        for chunk in &mut chunks {
            chunk.copy_from_slice(&self.next_u32().to_le_bytes());
        }
        let tail = chunks.into_remainder();
        if !tail.is_empty() {
            let mut word = self.next_u32().to_le_bytes();
            tail.copy_from_slice(&word[..tail.len()]);
            word.zeroize();
        }
    }

    pub fn entropy_mut(&mut self) -> &mut E {
        &mut self.entropy
    }

    #[cfg(test)]
    fn key_words(&self) -> Option<[u32; 8]> {
        let mut key = [0u32; 8];
        key.copy_from_slice(&self.state.as_ref()?.words()[KEY_WORDS]);
        Some(key)
    }
}

impl<E: EntropySource> RngCore for ForwardSecretRng<E> {
    fn next_u32(&mut self) -> u32 {
        ForwardSecretRng::next_u32(self)
    }

    fn next_u64(&mut self) -> u64 {
        let lo = ForwardSecretRng::next_u32(self) as u64;
        let hi = ForwardSecretRng::next_u32(self) as u64;
        (hi << 32) | lo
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.fill(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill(dest);
        Ok(())
    }
}

impl<E: EntropySource> CryptoRng for ForwardSecretRng<E> {}

impl<E> std::fmt::Debug for ForwardSecretRng<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwardSecretRng")
            .field("seeded", &self.state.is_some())
            .finish_non_exhaustive()
    }
}
