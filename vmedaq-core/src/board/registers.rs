//! VME register addresses shared by every real board family.
//!
//! Per-channel registers are laid out at a fixed stride from a per-family
//! base; [`channel_dac`]/[`channel_threshold`] compute the per-channel
//! address rather than enumerating one constant per channel.

use c_enum::c_enum;

c_enum! {
    /// Control/status register addresses, common across the digitizer
    /// families this crate drives.
    #[repr(transparent)]
    #[derive(Clone, Copy, Eq, PartialEq, Hash)]
    pub enum Register : u32 {
        /// Acquisition control (run/stop, trigger source).
        ACQ_CONTROL = 0x8100,
        /// Acquisition status, backing [`super::AcqStatus`].
        ACQ_STATUS = 0x8104,
        /// Write-any-value-to-trigger software trigger.
        SW_TRIGGER = 0x8108,
        /// Write-any-value-to-trigger full board reset.
        BOARD_RESET = 0xEF24,
        /// Board info register, used to confirm the family at arm time.
        BOARD_INFO = 0x8140,
        /// Serial number, most significant half.
        SERIAL_MSB = 0xF080,
        /// Serial number, least significant half.
        SERIAL_LSB = 0xF084,
        /// Base address of channel 0's DAC offset register; stride 0x100.
        CHANNEL_DAC_BASE = 0x1098,
        /// Base address of channel 0's trigger threshold register; stride 0x100.
        CHANNEL_THRESHOLD_BASE = 0x1080,
        /// Per-channel enable mask.
        CHANNEL_ENABLE_MASK = 0x8120,
    }
}

const CHANNEL_STRIDE: u32 = 0x100;

/// Address of channel `ch`'s DAC offset register.
pub fn channel_dac(ch: u16) -> u32 {
    Register::CHANNEL_DAC_BASE.0 + ch as u32 * CHANNEL_STRIDE
}

/// Address of channel `ch`'s trigger threshold register.
pub fn channel_threshold(ch: u16) -> u32 {
    Register::CHANNEL_THRESHOLD_BASE.0 + ch as u32 * CHANNEL_STRIDE
}

/// Acquisition control bit: run enable.
pub const ACQ_CONTROL_RUN: u32 = 1 << 2;
/// Acquisition control bit: S-IN (external) start/stop enable.
pub const ACQ_CONTROL_S_IN: u32 = 1 << 0;
