//! Read-only configuration view the core consumes.
//!
//! Loading, polling, and persisting this document against an external
//! control store is out of scope (spec §1); the core only ever sees an
//! already-resolved [`Options`] snapshot, taken once at arm time.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::board::BoardFamily;

fn default_fragment_bytes() -> usize {
    220
}

fn default_buffer_num_chunks() -> i64 {
    2
}

fn default_chunk_phase_limit() -> i64 {
    2
}

fn default_compressor() -> Compressor {
    Compressor::Lz4
}

fn default_output_path() -> String {
    "./".to_string()
}

fn default_run_identifier() -> String {
    "run".to_string()
}

/// `compressor` config key.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compressor {
    Lz4,
    Blosc,
}

/// One entry of `boards[]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BoardConfig {
    pub link: i32,
    pub crate_: i32,
    pub board: u16,
    #[serde(rename = "type")]
    pub family: BoardFamily,
    pub vme_address: u32,
    pub host: String,
}

/// One entry of `registers[]`, applied to a board after arm.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegisterWrite {
    pub board: u16,
    pub reg: String,
    pub val: String,
}

/// Per-channel DAC calibration, `{slope, yint}` in `thresholds.<bid>`'s
/// sibling `dac_calibration.<bid>` documents.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DacCalibration {
    pub slope: f64,
    pub yint: f64,
}

/// Resolved, read-only configuration snapshot.
///
/// Deserializes directly from the JSON document the control-store
/// collaborator hands the core at arm time; the key names match spec §6's
/// configuration table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Options {
    #[serde(default)]
    pub strax_chunk_length: f64,
    #[serde(default)]
    pub strax_chunk_overlap: f64,
    #[serde(default = "default_fragment_bytes")]
    pub strax_fragment_payload_bytes: usize,
    #[serde(default = "default_buffer_num_chunks")]
    pub strax_buffer_num_chunks: i64,
    #[serde(default = "default_chunk_phase_limit")]
    pub strax_chunk_phase_limit: i64,
    #[serde(default = "default_compressor")]
    pub compressor: Compressor,
    #[serde(default = "default_output_path")]
    pub strax_output_path: String,
    #[serde(default = "default_run_identifier")]
    pub run_identifier: String,
    /// `output_files.<host>` — number of writer workers for a given host.
    #[serde(default)]
    pub output_files: HashMap<String, usize>,
    /// `channels.<bid>` — local-channel-index -> global-channel-id.
    #[serde(default)]
    pub channels: HashMap<u16, Vec<i32>>,
    /// `thresholds.<bid>` — per-channel trigger thresholds.
    #[serde(default)]
    pub thresholds: HashMap<u16, Vec<u16>>,
    /// `dac_calibration.<bid>` — per-channel DAC slope/intercept.
    #[serde(default)]
    pub dac_calibration: HashMap<u16, Vec<DacCalibration>>,
    pub boards: Vec<BoardConfig>,
    #[serde(default)]
    pub registers: Vec<RegisterWrite>,
}

impl Options {
    /// Parse an `Options` snapshot from a JSON document.
    pub fn from_json(text: &str) -> crate::error::Result<Self> {
        serde_json::from_str(text).map_err(crate::error::Error::ConfigLoad)
    }

    /// Resolve `bid`'s local channel `local_ch` to a global channel id, or
    /// `None` if the board/channel pair isn't present in the map — the
    /// caller turns this into the fatal `UnmappedChannel` condition.
    pub fn global_channel(&self, bid: u16, local_ch: u16) -> Option<i32> {
        self.channels
            .get(&bid)
            .and_then(|row| row.get(local_ch as usize))
            .copied()
            .filter(|&ch| ch >= 0)
    }

    /// Number of writer workers configured for `host`, defaulting to 4 per
    /// spec §4.4.
    pub fn writer_workers(&self, host: &str) -> usize {
        self.output_files.get(host).copied().unwrap_or(4)
    }

    /// `chunk_len + overlap` in nanoseconds, the chunk-id divisor `L`.
    pub fn full_chunk_length_ns(&self) -> i64 {
        self.chunk_length_ns() + self.chunk_overlap_ns()
    }

    pub fn chunk_length_ns(&self) -> i64 {
        (self.strax_chunk_length * 1e9) as i64
    }

    pub fn chunk_overlap_ns(&self) -> i64 {
        (self.strax_chunk_overlap * 1e9) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_document() {
        let json = r#"{
            "strax_chunk_length": 5.0,
            "strax_chunk_overlap": 0.5,
            "channels": {"0": [100, 101]},
            "boards": [
                {"link": 0, "crate_": 0, "board": 0, "type": "ns10_8ch", "vme_address": 4096, "host": "reader0"}
            ]
        }"#;
        let opts = Options::from_json(json).unwrap();
        assert_eq!(opts.strax_fragment_payload_bytes, 220);
        assert_eq!(opts.global_channel(0, 1), Some(101));
        assert_eq!(opts.global_channel(0, 5), None);
        assert_eq!(opts.writer_workers("reader0"), 4);
        assert_eq!(opts.full_chunk_length_ns(), 5_500_000_000);
    }
}
