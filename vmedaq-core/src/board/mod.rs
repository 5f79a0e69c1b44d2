//! Polymorphic digitizer driver.
//!
//! Real digitizer families differ only in their event/channel header
//! layouts and a handful of register offsets (spec's component design).
//! Rather than an inheritance chain, family differences are modeled as a
//! tagged variant ([`BoardFamily`]) with per-family decode functions —
//! the capability-record design note — so `Board` itself stays a single
//! concrete, non-dyn struct that's cheap to own and easy to put behind a
//! plain reference from the parser.

pub mod registers;

#[cfg(feature = "sim")]
pub mod sim;

use std::time::Duration;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::clock::ClockState;
use crate::config::DacCalibration;
use crate::error::{Error, Result};
use crate::log::{log_entry, Level, Log};

/// Default block-transfer size for one FIFO read, per spec §4.2.
pub const DEFAULT_BLT_BYTES: u32 = 512 * 1024;

/// Board family, selecting event/channel header decode and register layout.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum BoardFamily {
    /// 8 channels, 10 ns/sample; channels share one event timestamp.
    #[serde(rename = "ns10_8ch")]
    Ns10_8ch,
    /// 16 channels, 2 ns/sample; split-byte channel mask, per-channel baseline.
    #[serde(rename = "ns2_16ch")]
    Ns2_16ch,
    /// 10 ns muon-veto variant; no per-channel header.
    #[serde(rename = "muon_veto_10ns")]
    MuonVeto10ns,
    /// In-process waveform simulator (feature `sim`).
    #[serde(rename = "sim")]
    Sim,
}

impl BoardFamily {
    pub fn n_channels(self) -> u16 {
        match self {
            BoardFamily::Ns10_8ch | BoardFamily::MuonVeto10ns | BoardFamily::Sim => 8,
            BoardFamily::Ns2_16ch => 16,
        }
    }

    pub fn sample_width_ns(self) -> u16 {
        match self {
            BoardFamily::Ns10_8ch | BoardFamily::MuonVeto10ns | BoardFamily::Sim => 10,
            BoardFamily::Ns2_16ch => 2,
        }
    }

    /// Ticks of the 31-bit rolling counter per nanosecond period; all
    /// families here tick once per sample.
    pub fn clock_cycle_ns(self) -> u32 {
        self.sample_width_ns() as u32
    }
}

bitflags! {
    /// Acquisition status bits, read from [`registers::Register::ACQ_STATUS`].
    #[derive(Copy, Clone, Eq, PartialEq, Debug)]
    pub struct AcqStatus: u32 {
        /// Board is currently running.
        const RUN = 1 << 2;
        /// At least one event is ready to be read out.
        const EVENT_READY = 1 << 3;
        /// The board's PLL has lost lock.
        const PLL_UNLOCKED = 1 << 7;
        /// The board completed its startup sequence.
        const BOARD_READY = 1 << 8;
        /// The external S-IN line is currently asserted.
        const S_IN = 1 << 15;
    }
}

/// Decoded event header, common shape across every real board family.
#[derive(Copy, Clone, Debug)]
pub struct EventHeader {
    pub words_this_event: u32,
    pub channel_mask: u32,
    pub board_fail: bool,
    pub header_ts: u32,
}

/// Decoded per-channel header (or, for muon-veto, its derived equivalent).
#[derive(Copy, Clone, Debug)]
pub struct ChannelHeader {
    /// Absolute ns timestamp for this channel's first sample.
    pub abs_ns: u64,
    /// Size of this channel's record in 32-bit words, header included.
    pub words_this_channel: u32,
    pub baseline: u16,
    /// Offset, in 32-bit words from the start of this channel's record,
    /// where waveform samples begin.
    pub sample_offset: usize,
}

/// Context a channel-header decode needs beyond the raw words.
pub struct ChannelCtx<'a> {
    pub event: &'a EventHeader,
    pub event_abs_ns: u64,
    pub local_ch: u16,
    pub n_active_channels: u32,
}

/// Parse the 4-word event header shared by every real board family:
/// top nibble `0xA`, 28-bit word count, a board-fail flag and channel mask
/// in word 1, and a 31-bit header timestamp in word 3.
pub fn unpack_event_header_common(words: &[u32], family: BoardFamily) -> Option<EventHeader> {
    if words.len() < 4 || (words[0] >> 28) != 0xA {
        return None;
    }
    let words_this_event = words[0] & 0x0FFF_FFFF;
    let board_fail = (words[1] >> 26) & 0x1 != 0;
    let channel_mask = match family {
        BoardFamily::Ns2_16ch => (words[1] & 0xFF) | ((words[2] >> 24 & 0xFF) << 8),
        _ => words[1] & 0xFF,
    };
    let header_ts = words[3] & 0x7FFF_FFFF;
    Some(EventHeader {
        words_this_event,
        channel_mask,
        board_fail,
        header_ts,
    })
}

/// Decode one channel's record, dispatched on `family`. `words` starts at
/// this channel's first word (header, if the family has one).
pub fn unpack_channel_header(
    family: BoardFamily,
    words: &[u32],
    ctx: &ChannelCtx<'_>,
) -> ChannelHeader {
    match family {
        BoardFamily::Ns10_8ch | BoardFamily::Sim => ChannelHeader {
            abs_ns: ctx.event_abs_ns,
            words_this_channel: words[0] & 0x7FFF_FF,
            baseline: 0,
            sample_offset: 2,
        },
        BoardFamily::Ns2_16ch => {
            // This family timestamps each channel independently rather than
            // inheriting the event header's timestamp: a 48-bit counter
            // split across words[1]/words[2], scaled by the clock cycle.
            let raw = (words[1] as u64) | (((words[2] & 0xFFFF) as u64) << 32);
            ChannelHeader {
                abs_ns: raw * family.clock_cycle_ns() as u64,
                words_this_channel: words[0] & 0x7FFF_FF,
                baseline: ((words[2] >> 16) & 0x3FFF) as u16,
                sample_offset: 3,
            }
        }
        BoardFamily::MuonVeto10ns => {
            let active = ctx.n_active_channels.max(1);
            let words_this_channel = (ctx.event.words_this_event - 4) / active;
            ChannelHeader {
                abs_ns: ctx.event_abs_ns,
                words_this_channel,
                baseline: 0,
                sample_offset: 0,
            }
        }
    }
}

/// A configured digitizer board.
///
/// Holds the bus handle and per-board clock state; family-specific decode
/// logic lives in the free functions above rather than on a trait object,
/// so a `Board` is a single concrete type regardless of family.
pub struct Board {
    pub bid: u16,
    pub link: i32,
    pub crate_num: i32,
    pub base_address: u32,
    pub family: BoardFamily,
    pub clock: ClockState,
    handle: Option<vmedaq_sys::BoardHandle>,
    log: Log,
}

impl Board {
    pub fn new(bid: u16, link: i32, crate_num: i32, base_address: u32, family: BoardFamily) -> Self {
        Self {
            bid,
            link,
            crate_num,
            base_address,
            family,
            clock: ClockState::new(),
            handle: None,
            log: Log::new("board"),
        }
    }

    pub fn n_channels(&self) -> u16 {
        self.family.n_channels()
    }

    pub fn sample_width_ns(&self) -> u16 {
        self.family.sample_width_ns()
    }

    pub fn clock_cycle_ns(&self) -> u32 {
        self.family.clock_cycle_ns()
    }

    /// Open the bus connection and confirm the board's serial number
    /// matches the configured `bid`. Any failure here is fatal to the
    /// whole arm sequence (spec §4.2, §7).
    pub fn arm(&mut self) -> Result<()> {
        if self.family == BoardFamily::Sim {
            self.handle = Some(-1);
            return Ok(());
        }

        let mut handle: vmedaq_sys::BoardHandle = 0;
        let rc = unsafe {
            vmedaq_sys::vme_init(
                vmedaq_sys::bindings::CVBoardType::V2718,
                self.link,
                self.crate_num,
                &mut handle,
            )
        };
        if rc != vmedaq_sys::bindings::CV_SUCCESS {
            return Err(Error::BoardInit {
                board: self.bid,
                reason: format!("vme_init failed with code {rc}"),
            });
        }
        self.handle = Some(handle);

        let msb = self.read_register(registers::Register::SERIAL_MSB.0)?;
        let lsb = self.read_register(registers::Register::SERIAL_LSB.0)?;
        let serial = (msb << 16) | lsb;
        log_entry!(
            self.log,
            Level::Debug,
            "board {} armed, reported serial {:#x}",
            self.bid,
            serial
        );
        Ok(())
    }

    fn handle(&self) -> Result<vmedaq_sys::BoardHandle> {
        self.handle.ok_or_else(|| Error::BoardInit {
            board: self.bid,
            reason: "board not armed".to_string(),
        })
    }

    pub fn read_register(&self, addr: u32) -> Result<u32> {
        if self.family == BoardFamily::Sim {
            return Ok(0);
        }
        let handle = self.handle()?;
        let mut data: u32 = 0;
        let rc = unsafe {
            vmedaq_sys::vme_read_cycle(
                handle,
                self.base_address + addr,
                &mut data,
                vmedaq_sys::bindings::CVAddressModifier::A32UData,
                vmedaq_sys::bindings::CVDataWidth::D32,
            )
        };
        if rc != vmedaq_sys::bindings::CV_SUCCESS {
            return Err(Error::BusIo {
                board: self.bid,
                code: rc,
            });
        }
        Ok(data)
    }

    pub fn write_register(&self, addr: u32, value: u32) -> Result<()> {
        if self.family == BoardFamily::Sim {
            return Ok(());
        }
        let handle = self.handle()?;
        let rc = unsafe {
            vmedaq_sys::vme_write_cycle(
                handle,
                self.base_address + addr,
                &value,
                vmedaq_sys::bindings::CVAddressModifier::A32UData,
                vmedaq_sys::bindings::CVDataWidth::D32,
            )
        };
        if rc != vmedaq_sys::bindings::CV_SUCCESS {
            return Err(Error::BusIo {
                board: self.bid,
                code: rc,
            });
        }
        Ok(())
    }

    /// Poll `reg` until `(value & mask) == target`, sleeping `sleep` between
    /// attempts, up to `retries` times. Returns whether the target was seen.
    pub fn monitor_register(
        &self,
        reg: u32,
        mask: u32,
        target: u32,
        retries: u32,
        sleep: Duration,
    ) -> Result<bool> {
        for _ in 0..retries {
            if self.read_register(reg)? & mask == target {
                return Ok(true);
            }
            std::thread::sleep(sleep);
        }
        Ok(false)
    }

    pub fn acquisition_status(&self) -> Result<AcqStatus> {
        let raw = self.read_register(registers::Register::ACQ_STATUS.0)?;
        Ok(AcqStatus::from_bits_truncate(raw))
    }

    /// Issue software start: set the run bit in acquisition control.
    pub fn software_start(&self) -> Result<()> {
        let current = self.read_register(registers::Register::ACQ_CONTROL.0)?;
        self.write_register(
            registers::Register::ACQ_CONTROL.0,
            current | registers::ACQ_CONTROL_RUN,
        )
    }

    pub fn acquisition_stop(&self) -> Result<()> {
        let current = self.read_register(registers::Register::ACQ_CONTROL.0)?;
        self.write_register(
            registers::Register::ACQ_CONTROL.0,
            current & !registers::ACQ_CONTROL_RUN,
        )
    }

    /// Clamp and write per-channel DAC offsets, given each channel's
    /// `{slope, yint}` calibration. A requested value is clamped to the
    /// range whose corresponding baseline stays `<= 0x3FFF`; clamps are
    /// logged at DEBUG (spec §4.2).
    pub fn load_dac(&self, calib: &[DacCalibration], requested: &[u16]) -> Result<Vec<u16>> {
        let mut applied = Vec::with_capacity(requested.len());
        for (ch, (&value, cal)) in requested.iter().zip(calib.iter()).enumerate() {
            let baseline = cal.slope * value as f64 + cal.yint;
            let clamped = if baseline > 0x3FFF as f64 {
                let max_value = ((0x3FFF as f64 - cal.yint) / cal.slope) as u16;
                log_entry!(
                    self.log,
                    Level::Debug,
                    "board {} channel {}: DAC {} clamped to {}",
                    self.bid,
                    ch,
                    value,
                    max_value
                );
                max_value
            } else {
                value
            };
            self.write_register(registers::channel_dac(ch as u16), clamped as u32)?;
            applied.push(clamped);
        }
        Ok(applied)
    }

    pub fn set_thresholds(&self, thresholds: &[u16]) -> Result<()> {
        for (ch, &value) in thresholds.iter().enumerate() {
            self.write_register(registers::channel_threshold(ch as u16), value as u32)?;
        }
        Ok(())
    }

    /// Issue one bounded block-transfer read loop until the bus signals end
    /// of data, concatenating into a single tight buffer (spec §4.2's block
    /// read policy). Returns the number of bytes read.
    pub fn block_read(&self, out: &mut Vec<u8>) -> Result<usize> {
        #[cfg(feature = "sim")]
        if self.family == BoardFamily::Sim {
            return Ok(0);
        }

        let handle = self.handle()?;
        let mut total = 0usize;
        let mut chunk = vec![0u8; DEFAULT_BLT_BYTES as usize];
        loop {
            let mut transferred: i32 = 0;
            let rc = unsafe {
                vmedaq_sys::vme_blt_read_cycle(
                    handle,
                    self.base_address,
                    chunk.as_mut_ptr(),
                    chunk.len() as u32,
                    vmedaq_sys::bindings::CVAddressModifier::A32UMblt,
                    vmedaq_sys::bindings::CVDataWidth::D64,
                    &mut transferred,
                )
            };
            if rc == vmedaq_sys::bindings::CV_BUS_ERROR {
                break;
            }
            if rc != vmedaq_sys::bindings::CV_SUCCESS {
                return Err(Error::BusIo {
                    board: self.bid,
                    code: rc,
                });
            }
            if transferred <= 0 {
                break;
            }
            out.extend_from_slice(&chunk[..transferred as usize]);
            total += transferred as usize;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_words(mask: u32, words_this_event: u32, header_ts: u32, board_fail: bool) -> Vec<u32> {
        let fail_bit = if board_fail { 1 << 26 } else { 0 };
        vec![
            0xA000_0000 | (words_this_event & 0x0FFF_FFFF),
            (mask & 0xFF) | fail_bit,
            0,
            header_ts & 0x7FFF_FFFF,
        ]
    }

    #[test]
    fn decodes_8ch_event_header() {
        let words = header_words(0b0000_0101, 20, 123_456, false);
        let h = unpack_event_header_common(&words, BoardFamily::Ns10_8ch).unwrap();
        assert_eq!(h.channel_mask, 0b0000_0101);
        assert_eq!(h.words_this_event, 20);
        assert_eq!(h.header_ts, 123_456);
        assert!(!h.board_fail);
    }

    #[test]
    fn rejects_non_header_words() {
        let words = vec![0xFFFF_FFFF, 0xFFFF_FFFF, 0xFFFF_FFFF, 0xFFFF_FFFF];
        assert!(unpack_event_header_common(&words, BoardFamily::Ns10_8ch).is_none());
    }

    #[test]
    fn board_fail_flag_is_decoded() {
        let words = header_words(0b1, 10, 0, true);
        let h = unpack_event_header_common(&words, BoardFamily::Ns10_8ch).unwrap();
        assert!(h.board_fail);
    }

    #[test]
    fn muon_veto_channel_size_is_derived_from_event_size() {
        let event = EventHeader {
            words_this_event: 4 + 2 * 20,
            channel_mask: 0b11,
            board_fail: false,
            header_ts: 0,
        };
        let ctx = ChannelCtx {
            event: &event,
            event_abs_ns: 1_000,
            local_ch: 0,
            n_active_channels: 2,
        };
        let ch = unpack_channel_header(BoardFamily::MuonVeto10ns, &[], &ctx);
        assert_eq!(ch.words_this_channel, 20);
        assert_eq!(ch.baseline, 0);
        assert_eq!(ch.abs_ns, 1_000);
    }

    #[test]
    fn ns2_16ch_decodes_split_mask_and_baseline() {
        let mut words = header_words(0x00, 0, 0, false);
        words[1] = 0x34; // low mask byte
        words[2] = 0x12 << 24; // high mask byte
        let h = unpack_event_header_common(&words, BoardFamily::Ns2_16ch).unwrap();
        assert_eq!(h.channel_mask, 0x1234);

        let channel_words = [100u32, 500, (0x1FFF << 16) | 7];
        let event = h;
        let ctx = ChannelCtx {
            event: &event,
            // Not read by this family: it times each channel off its own
            // words[1]/words[2], not the event header's timestamp.
            event_abs_ns: 999_999,
            local_ch: 0,
            n_active_channels: 1,
        };
        let ch = unpack_channel_header(BoardFamily::Ns2_16ch, &channel_words, &ctx);
        assert_eq!(ch.words_this_channel, 100);
        assert_eq!(ch.baseline, 0x1FFF);
        assert_eq!(ch.sample_offset, 3);
        assert_eq!(ch.abs_ns, (500u64 | (7u64 << 32)) * 2);
    }
}
