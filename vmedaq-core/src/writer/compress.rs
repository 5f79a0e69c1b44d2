//! Compression codecs backing chunk write-out, per spec §6's parameters:
//! lz4 frame (256 KiB blocks, linked, no checksum, default level, no
//! autoflush) or blosc (level 5, byte-shuffle, inner codec lz4, 2 threads).

use std::io::Write;

use lz4_flex::frame::{BlockMode, BlockSize, FrameEncoder, FrameInfo};

use crate::config::Compressor;
use crate::error::{Error, Result};

pub fn compress(bytes: &[u8], codec: Compressor) -> Result<Vec<u8>> {
    match codec {
        Compressor::Lz4 => compress_lz4_frame(bytes),
        Compressor::Blosc => compress_blosc(bytes),
    }
}

fn compress_lz4_frame(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut info = FrameInfo::new();
    info.block_size = BlockSize::Max256KB;
    info.block_mode = BlockMode::Linked;
    info.block_checksums = false;
    info.content_checksum = false;

    let mut encoder = FrameEncoder::with_frame_info(info, Vec::new());
    encoder
        .write_all(bytes)
        .map_err(|e| Error::Compression(e.to_string()))?;
    encoder.finish().map_err(|e| Error::Compression(e.to_string()))
}

fn compress_blosc(bytes: &[u8]) -> Result<Vec<u8>> {
    blosc::set_nthreads(2);
    let context = blosc::Context::new()
        .compressor(blosc::Compressor::LZ4)
        .clevel(blosc::Clevel::L5)
        .shuffle(blosc::ShuffleMode::Byte)
        .blocksize(None);
    let buffer = context.compress(bytes);
    Ok(buffer.as_ref().to_vec())
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    #[test]
    fn lz4_round_trips() {
        let data = b"some fragment bytes, repeated, repeated, repeated".to_vec();
        let compressed = compress(&data, Compressor::Lz4).unwrap();

        let mut decoder = lz4_flex::frame::FrameDecoder::new(compressed.as_slice());
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).unwrap();
        assert_eq!(decompressed, data);
    }
}
