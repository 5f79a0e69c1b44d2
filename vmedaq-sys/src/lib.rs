//! Raw, unsafe bindings to the vendor VME bus access library.
//!
//! This crate is the low-level half of the VME digitizer stack, in the same
//! spirit as a `-sys` crate for any other C library: it declares the FFI
//! surface and the wire-level constants the vendor library expects, and does
//! no interpretation of its own. [`vmedaq-core`](https://docs.rs/vmedaq-core)
//! builds the safe `Board` abstraction on top of this.
//!
//! None of the functions here are safe to call directly; every one of them
//! either writes through a raw pointer supplied by the caller or talks to a
//! board over a shared VME bus handle that the caller must serialize access
//! to themselves.

#![allow(non_camel_case_types)]

pub mod bindings;

use std::os::raw::{c_int, c_uint};

/// Opaque handle to an initialized VME bus connection, as returned by
/// [`vme_init`].
pub type BoardHandle = c_int;

extern "C" {
    /// Open a VME bus connection for the given board type over `link`/`bdnum`.
    ///
    /// On success, writes a board handle into `handle` and returns
    /// [`bindings::CV_SUCCESS`].
    pub fn vme_init(
        board_type: bindings::CVBoardType,
        link: c_int,
        bdnum: c_int,
        handle: *mut BoardHandle,
    ) -> c_int;

    /// Close a VME bus connection previously opened with [`vme_init`].
    pub fn vme_end(handle: BoardHandle) -> c_int;

    /// Perform a single-cycle register read at `address` using the given
    /// address modifier and data width, writing the result into `data`.
    pub fn vme_read_cycle(
        handle: BoardHandle,
        address: c_uint,
        data: *mut c_uint,
        am: bindings::CVAddressModifier,
        dw: bindings::CVDataWidth,
    ) -> c_int;

    /// Perform a single-cycle register write at `address`.
    pub fn vme_write_cycle(
        handle: BoardHandle,
        address: c_uint,
        data: *const c_uint,
        am: bindings::CVAddressModifier,
        dw: bindings::CVDataWidth,
    ) -> c_int;

    /// Perform one block-transfer read of up to `size` bytes from the FIFO
    /// at `address` into `buffer`, writing the number of bytes actually
    /// transferred into `transferred`.
    ///
    /// Returns [`bindings::CV_BUS_ERROR`] (not a hard failure) when the FIFO
    /// has run dry; any other non-success code is a genuine bus fault.
    pub fn vme_blt_read_cycle(
        handle: BoardHandle,
        address: c_uint,
        buffer: *mut u8,
        size: c_uint,
        am: bindings::CVAddressModifier,
        dw: bindings::CVDataWidth,
        transferred: *mut c_int,
    ) -> c_int;
}
