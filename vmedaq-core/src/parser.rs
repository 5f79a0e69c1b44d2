//! Event parser / fragment formatter.
//!
//! Turns one board's [`RawBlock`] into a stream of [`Fragment`]s. Stateless
//! across events — the only state touched is the board's clock, which the
//! pool's per-board work partition guarantees is only ever touched from one
//! thread at a time (spec §4.3, §5).

use crate::board::{unpack_channel_header, unpack_event_header_common, Board, ChannelCtx};
use crate::config::Options;
use crate::error::{Error, Result};
use crate::fragment::{Fragment, ProtoFragment};
use crate::log::{log_entry, Level, Log};

/// One board's raw readout, still in board-native word format.
///
/// Carries a rollover snapshot as of when the block was pulled off the bus,
/// per the "back-reference from blocks to boards" design note — the actual
/// clock reconstruction happens against the board's live `ClockState` when
/// the block is parsed, not when it was read.
pub struct RawBlock<'a> {
    pub board: &'a mut Board,
    pub bytes: Vec<u8>,
}

impl<'a> RawBlock<'a> {
    pub fn new(board: &'a mut Board, bytes: Vec<u8>) -> Self {
        Self { board, bytes }
    }

    fn words(&self) -> Vec<u32> {
        self.bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }
}

/// Parse one raw block into the fixed-length fragments it contains.
///
/// Tolerates `0xFFFFFFFF` padding between events (spec §4.3 step 1): a word
/// that doesn't look like an event header is skipped one word at a time
/// until either a header is found or the block is exhausted.
pub fn parse_block(block: RawBlock<'_>, options: &Options, log: &Log) -> Result<Vec<Fragment>> {
    let words = block.words();
    let RawBlock { board, .. } = block;

    let mut fragments = Vec::new();
    let mut cursor = 0usize;
    while cursor < words.len() {
        if (words[cursor] >> 28) != 0xA {
            cursor += 1;
            continue;
        }
        let event = match unpack_event_header_common(&words[cursor..], board.family) {
            Some(e) => e,
            None => {
                cursor += 1;
                continue;
            }
        };
        if event.words_this_event == 0 {
            cursor += 1;
            continue;
        }
        let event_end = cursor + event.words_this_event as usize;
        if event_end > words.len() {
            // truncated event at the end of the block; nothing more to parse
            break;
        }

        if event.board_fail {
            log_entry!(log, Level::Warning, "board {}: event marked board_fail, dropped", board.bid);
            cursor = event_end;
            continue;
        }

        let event_abs_ns =
            crate::clock::ClockState::to_ns(board.clock.observe(event.header_ts), board.clock_cycle_ns());

        let n_active = event.channel_mask.count_ones();
        let mut channel_cursor = cursor + 4;
        for local_ch in 0..board.n_channels() {
            if event.channel_mask & (1 << local_ch) == 0 {
                continue;
            }
            let global_ch = match options.global_channel(board.bid, local_ch) {
                Some(ch) => ch as u16,
                None => {
                    return Err(Error::UnmappedChannel {
                        board: board.bid,
                        channel: local_ch,
                    })
                }
            };

            let ctx = ChannelCtx {
                event: &event,
                event_abs_ns,
                local_ch,
                n_active_channels: n_active,
            };
            let remaining = &words[channel_cursor..event_end];
            let ch_header = unpack_channel_header(board.family, remaining, &ctx);

            let waveform_words = &remaining[ch_header.sample_offset
                ..(ch_header.words_this_channel as usize).min(remaining.len())];

            let mut waveform = Vec::with_capacity(waveform_words.len() * 2);
            for &w in waveform_words {
                waveform.push((w & 0xFFFF) as u16);
                waveform.push(((w >> 16) & 0xFFFF) as u16);
            }

            let proto = ProtoFragment {
                global_ch,
                board_id: board.bid,
                abs_ns: ch_header.abs_ns,
                sample_width_ns: board.sample_width_ns(),
                baseline: ch_header.baseline,
                waveform,
            };
            fragments.extend(Fragment::split_pulse(&proto, options.strax_fragment_payload_bytes));

            channel_cursor += ch_header.words_this_channel as usize;
        }

        cursor = event_end;
    }

    Ok(fragments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::BoardFamily;

    fn options_with_map() -> Options {
        let json = r#"{
            "strax_chunk_length": 5.0,
            "strax_chunk_overlap": 0.5,
            "strax_fragment_payload_bytes": 220,
            "channels": {"0": [100, 101, 102, 103, 104, 105, 106, 107]},
            "boards": [{"link":0,"crate_":0,"board":0,"type":"ns10_8ch","vme_address":0,"host":"h"}]
        }"#;
        Options::from_json(json).unwrap()
    }

    /// Scenario 6: a block consisting solely of padding is consumed without
    /// emitting fragments and without mutating board state.
    #[test]
    fn padding_only_block_emits_nothing() {
        let mut board = Board::new(0, 0, 0, 0, BoardFamily::Sim);
        let rollovers_before = board.clock.rollovers();
        let words = vec![0xFFFF_FFFFu32; 8];
        let mut bytes = Vec::new();
        for w in words {
            bytes.extend_from_slice(&w.to_le_bytes());
        }
        let options = options_with_map();
        let log = Log::new("test");
        let block = RawBlock::new(&mut board, bytes);
        let frags = parse_block(block, &options, &log).unwrap();
        assert!(frags.is_empty());
        assert_eq!(board.clock.rollovers(), rollovers_before);
    }

    #[test]
    fn single_channel_event_produces_fragments_with_correct_channel_id() {
        crate::board::sim::Generator::init(1);
        let mut board = Board::new(0, 0, 0, 0, BoardFamily::Sim);
        let bytes = crate::board::sim::synthesize_block(0b0000_0010, 8, 300, 10);
        let options = options_with_map();
        let log = Log::new("test");
        let block = RawBlock::new(&mut board, bytes);
        let frags = parse_block(block, &options, &log).unwrap();
        assert!(!frags.is_empty());
        assert!(frags.iter().all(|f| f.global_channel == 101));
    }

    #[test]
    fn unmapped_channel_is_fatal() {
        let mut board = Board::new(9, 0, 0, 0, BoardFamily::Sim);
        crate::board::sim::Generator::init(2);
        let bytes = crate::board::sim::synthesize_block(0b1, 8, 10, 10);
        let options = options_with_map(); // no entry for board 9
        let log = Log::new("test");
        let block = RawBlock::new(&mut board, bytes);
        let err = parse_block(block, &options, &log).unwrap_err();
        assert!(matches!(err, Error::UnmappedChannel { board: 9, channel: 0 }));
    }
}
