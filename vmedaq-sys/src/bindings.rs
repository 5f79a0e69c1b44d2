//! Constants and small C-like enums mirrored from the vendor VME bus
//! library's public header.

#![allow(non_camel_case_types, dead_code)]

/// The call completed successfully.
pub const CV_SUCCESS: i32 = 0;
/// The underlying bus returned an error that is not a hard I/O fault (e.g.
/// "no more data", the expected transient condition at end-of-FIFO).
pub const CV_BUS_ERROR: i32 = 1;
/// A generic, non-recoverable communication error.
pub const CV_COMM_ERROR: i32 = 2;
/// An invalid parameter was passed to the library.
pub const CV_GENERIC_ERROR: i32 = 3;

/// The bridge/crate-controller model passed to [`crate::vme_init`].
///
/// Only the model actually used by this pipeline's crate controller is
/// named here; the vendor library supports several others.
#[repr(i32)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum CVBoardType {
    /// USB/optical-link VME bridge.
    V2718 = 0,
}

/// VME address modifier, selecting the address space a cycle targets.
#[repr(i32)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum CVAddressModifier {
    /// Standard 32-bit non-privileged data access.
    A32UData = 0x09,
    /// Standard 32-bit non-privileged block-transfer access.
    A32UMblt = 0x08,
}

/// VME data width for a single cycle.
#[repr(i32)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum CVDataWidth {
    /// 32-bit data path.
    D32 = 0x04,
    /// 64-bit data path (used for block transfers).
    D64 = 0x08,
}
