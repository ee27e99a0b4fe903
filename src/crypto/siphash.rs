//! SipHash-2-4 keyed PRF
//!
//! 64-bit state words, two compression rounds per 8-byte block, four
//! finalization rounds, with the input length folded into the last block.
//! All arithmetic wraps.
//!
//! The block loop has a fixed upper bound so the hash runs in bounded time on
//! the packet path. The bound covers the largest buffer the packet MAC ever
//! hashes (a full 1400-byte payload); longer inputs are refused instead of
//! being hashed partially.

use crate::error::CryptoError;

/// Key length in bytes (128-bit key)
pub const KEY_LEN: usize = 16;

/// Block size in bytes
pub const BLOCK_LEN: usize = 8;

/// Upper bound on full blocks processed per call: ceil(1400 / 8)
pub const MAX_BLOCKS: usize = 175;

/// Longest input accepted by [`siphash24`]
pub const MAX_INPUT_LEN: usize = MAX_BLOCKS * BLOCK_LEN;

const C_ROUNDS: usize = 2;
const D_ROUNDS: usize = 4;

#[derive(Clone, Copy)]
struct State {
    v0: u64,
    v1: u64,
    v2: u64,
    v3: u64,
}

impl State {
    fn new(key: &[u8; KEY_LEN]) -> Self {
        let k0 = u64::from_le_bytes(read_word(&key[..8]));
        let k1 = u64::from_le_bytes(read_word(&key[8..]));
        Self {
            v0: k0 ^ 0x736f_6d65_7073_6575,
            v1: k1 ^ 0x646f_7261_6e64_6f6d,
            v2: k0 ^ 0x6c79_6765_6e65_7261,
            v3: k1 ^ 0x7465_6462_7974_6573,
        }
    }

    #[inline(always)]
    fn round(&mut self) {
        self.v0 = self.v0.wrapping_add(self.v1);
        self.v1 = self.v1.rotate_left(13);
        self.v1 ^= self.v0;
        self.v0 = self.v0.rotate_left(32);

        self.v2 = self.v2.wrapping_add(self.v3);
        self.v3 = self.v3.rotate_left(16);
        self.v3 ^= self.v2;

        self.v0 = self.v0.wrapping_add(self.v3);
        self.v3 = self.v3.rotate_left(21);
        self.v3 ^= self.v0;

        self.v2 = self.v2.wrapping_add(self.v1);
        self.v1 = self.v1.rotate_left(17);
        self.v1 ^= self.v2;
        self.v2 = self.v2.rotate_left(32);
    }

    #[inline(always)]
    fn compress(&mut self, m: u64) {
        self.v3 ^= m;
        for _ in 0..C_ROUNDS {
            self.round();
        }
        self.v0 ^= m;
    }

    fn finish(mut self) -> u64 {
        self.v2 ^= 0xff;
        for _ in 0..D_ROUNDS {
            self.round();
        }
        self.v0 ^ self.v1 ^ self.v2 ^ self.v3
    }
}

/// Copy up to 8 bytes into a zero-padded word buffer.
#[inline(always)]
fn read_word(bytes: &[u8]) -> [u8; BLOCK_LEN] {
    let mut word = [0u8; BLOCK_LEN];
    let n = bytes.len().min(BLOCK_LEN);
    word[..n].copy_from_slice(&bytes[..n]);
    word
}

/// SipHash-2-4 of `data` under `key`.
///
/// Returns [`CryptoError::InputTooLong`] when `data` is longer than
/// [`MAX_INPUT_LEN`].
pub fn siphash24(key: &[u8; KEY_LEN], data: &[u8]) -> Result<u64, CryptoError> {
    if data.len() > MAX_INPUT_LEN {
        return Err(CryptoError::InputTooLong {
            len: data.len(),
            max: MAX_INPUT_LEN,
        });
    }

    let mut state = State::new(key);

    let blocks = data.chunks_exact(BLOCK_LEN);
    let tail = blocks.remainder();
    for block in blocks.take(MAX_BLOCKS) {
        state.compress(u64::from_le_bytes(read_word(block)));
    }

    // Final block: trailing bytes, length (mod 256) in the top byte
    let last = u64::from_le_bytes(read_word(tail)) | ((data.len() as u64) << 56);
    state.compress(last);

    Ok(state.finish())
}
