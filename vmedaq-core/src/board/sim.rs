//! In-process waveform simulator, used in place of real VME hardware.
//!
//! The original shares one pseudo-random waveform generator across every
//! simulated board instance. Modeled here as an explicit [`Generator`]
//! singleton (a `Mutex` behind a `OnceLock`) rather than letting each `Board`
//! own independent ambient state, matching the "global simulator state"
//! design note: init is explicit ([`Generator::init`]), and every simulated
//! board's block read goes through the same shared stream.

use std::sync::{Mutex, OnceLock};

use crate::board::{BoardFamily, EventHeader};

const EVENT_HEADER_WORDS: usize = 4;
const CHANNEL_HEADER_WORDS: usize = 2;

fn generator() -> &'static Mutex<Generator> {
    static GEN: OnceLock<Mutex<Generator>> = OnceLock::new();
    GEN.get_or_init(|| Mutex::new(Generator::new(0x2545_F491_4F6C_DD1D)))
}

/// Deterministic xorshift64* stream shared by every simulated board.
///
/// Not cryptographic, not even statistically rigorous — just good enough to
/// produce varied-looking waveforms without pulling in a dependency this
/// crate has no other use for.
pub struct Generator {
    state: u64,
    next_header_ts: u32,
}

impl Generator {
    fn new(seed: u64) -> Self {
        Self {
            state: seed | 1,
            next_header_ts: 0,
        }
    }

    /// Reset the shared generator to a fixed seed. Intended for test setup,
    /// so a suite can get a reproducible sequence across simulated boards.
    pub fn init(seed: u64) {
        *generator().lock().unwrap() = Generator::new(seed);
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    fn next_sample(&mut self, baseline: u16) -> u16 {
        let noise = (self.next_u64() % 32) as i32 - 16;
        (baseline as i32 + noise).clamp(0, 0x3FFF) as u16
    }
}

/// Synthesize one raw event block for a simulated board: a standard 4-word
/// event header (family `Ns10_8ch` layout) followed by a 2-word channel
/// header and `n_samples` 16-bit samples for each channel set in `mask`.
pub fn synthesize_block(mask: u32, n_channels: u16, n_samples: u32, clock_cycle_ns: u32) -> Vec<u8> {
    let mut gen = generator().lock().unwrap();
    let header_ts = gen.next_header_ts;
    gen.next_header_ts = header_ts.wrapping_add((n_samples * clock_cycle_ns).max(1));

    let active: Vec<u16> = (0..n_channels).filter(|c| mask & (1 << c) != 0).collect();
    let channel_words = CHANNEL_HEADER_WORDS as u32 + (n_samples + 1) / 2;
    let event_words = EVENT_HEADER_WORDS as u32 + channel_words * active.len() as u32;

    let mut words = Vec::with_capacity(event_words as usize);
    words.push(0xA000_0000 | (event_words & 0x0FFF_FFFF));
    words.push(mask & 0xFF);
    words.push(0);
    words.push(header_ts & 0x7FFF_FFFF);

    for _ in &active {
        words.push(channel_words & 0x7FFF_FF);
        words.push(0);
        let mut samples = Vec::with_capacity(n_samples as usize);
        for _ in 0..n_samples {
            samples.push(gen.next_sample(0x2000));
        }
        for pair in samples.chunks(2) {
            let lo = pair[0] as u32;
            let hi = pair.get(1).copied().unwrap_or(0) as u32;
            words.push(lo | (hi << 16));
        }
    }

    let mut bytes = Vec::with_capacity(words.len() * 4);
    for w in words {
        bytes.extend_from_slice(&w.to_le_bytes());
    }
    bytes
}

/// Parse the event header this module's own blocks use, shared with
/// [`BoardFamily::Ns10_8ch`]'s decoder since the simulator writes the same
/// layout.
pub fn unpack_event_header(words: &[u32]) -> Option<EventHeader> {
    crate::board::unpack_event_header_common(words, BoardFamily::Ns10_8ch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesized_block_round_trips_through_the_common_header_decoder() {
        Generator::init(42);
        let bytes = synthesize_block(0b0000_0011, 8, 10, 10);
        let words: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        let header = unpack_event_header(&words).expect("valid header");
        assert_eq!(header.channel_mask, 0b0000_0011);
        assert_eq!(header.words_this_event as usize, words.len());
        assert!(!header.board_fail);
    }

    #[test]
    fn shared_generator_advances_across_calls() {
        Generator::init(7);
        let a = synthesize_block(0b1, 8, 4, 10);
        let b = synthesize_block(0b1, 8, 4, 10);
        assert_ne!(a, b, "successive blocks should differ");
    }
}
