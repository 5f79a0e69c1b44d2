//! Per-host readout and formatting core for a VME digitizer DAQ pipeline.
//!
//! Five layers, leaves first: [`clock`] reconstructs a monotonic timeline
//! from each board's rolling hardware counter; [`board`] drives the boards
//! themselves; [`parser`] turns raw blocks into [`fragment::Fragment`]s;
//! [`writer`] buckets and publishes those fragments as a time-chunked
//! archive; [`pool`] is the shared work queue tying stages together; and
//! [`controller`] owns the boards and drives arm/start/stop.

pub mod board;
pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod fragment;
pub mod log;
pub mod parser;
pub mod pool;
pub mod writer;

pub use board::{Board, BoardFamily};
pub use config::Options;
pub use controller::Controller;
pub use error::{Error, Result};
pub use fragment::{Fragment, ProtoFragment};
pub use log::{Level, Log};
