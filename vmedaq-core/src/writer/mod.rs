//! Chunked staging and write-out: buckets formatted fragments into
//! fixed-duration, overlap-aware chunks and publishes them via the
//! `_temp`-then-rename protocol.

pub mod compress;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use crate::config::Options;
use crate::error::{Error, Result};
use crate::fragment::Fragment;
use crate::log::{log_entry, Level, Log};

/// Size threshold below which a buffered chunk does not advance
/// `max_chunk` — prevents a single stray fragment from moving the write
/// frontier (spec §4.4 step 5).
const MAX_CHUNK_ADVANCE_THRESHOLD: usize = 10;

/// Token written to `THE_END/<host>_<worker>` on clean shutdown.
pub const END_SENTINEL: &[u8] = b"...my only friend";

/// Per-worker accumulated counters, reported once at shutdown — pure
/// telemetry, no effect on the data plane (SPEC_FULL §4.4 supplement).
#[derive(Default, Debug, Clone)]
pub struct WriterStats {
    pub bytes_processed: u64,
    pub fragments_processed: u64,
    pub chunks_written: u64,
    /// Histogram of buffered-fragment-list sizes observed at flush time,
    /// keyed by `size.next_power_of_two()` bucket.
    pub buffer_size_histogram: HashMap<usize, u64>,
}

impl WriterStats {
    fn record_flush(&mut self, main_len: usize, overlap_len: usize, bytes: usize) {
        self.bytes_processed += bytes as u64;
        self.fragments_processed += (main_len + overlap_len) as u64;
        self.chunks_written += 1;
        let bucket = main_len.max(1).next_power_of_two();
        *self.buffer_size_histogram.entry(bucket).or_insert(0) += 1;
    }
}

struct Buffers {
    main: HashMap<i64, Vec<Fragment>>,
    overlap: HashMap<i64, Vec<Fragment>>,
}

impl Buffers {
    /// Plain min/max over every buffered chunk id, `main` and `overlap`
    /// alike, with no size gating. Used by `write_chunk` to re-derive the
    /// frontier after removing the just-flushed chunk (spec §4.4 step 1).
    fn extremes(&self) -> Option<(i64, i64)> {
        let ids = self.main.keys().chain(self.overlap.keys());
        let min = ids.clone().min().copied();
        let max = ids.max().copied();
        min.zip(max)
    }

    /// Min/max gated by [`MAX_CHUNK_ADVANCE_THRESHOLD`], applied
    /// symmetrically to `main` and `overlap`: a chunk only counts toward the
    /// max-advance decision once either buffer holds more than the
    /// threshold's worth of fragments, so a single stray fragment near the
    /// boundary can't drag the frontier forward. Used by `add_fragment`.
    fn gated_span(&self) -> Option<(i64, i64)> {
        let over_threshold = |map: &HashMap<i64, Vec<Fragment>>| {
            map.iter()
                .filter(|(_, v)| v.len() > MAX_CHUNK_ADVANCE_THRESHOLD)
                .map(|(&id, _)| id)
        };
        let ids = self.main.keys().chain(self.overlap.keys());
        let min = ids.clone().min().copied();
        let max = over_threshold(&self.main).chain(over_threshold(&self.overlap)).max();
        min.zip(max).or(min.map(|m| (m, m)))
    }
}

/// One of `W` writer workers for a host. Owns its buffered chunks and is
/// the sole writer of its shard of the on-disk archive.
pub struct Writer {
    pub worker_id: usize,
    host: String,
    root: PathBuf,
    options: Options,
    buffers: Mutex<Buffers>,
    min_chunk: AtomicI64,
    max_chunk: AtomicI64,
    empty_verified: AtomicI64,
    stats: Mutex<WriterStats>,
    log: Log,
}

impl Writer {
    pub fn new(host: impl Into<String>, worker_id: usize, options: Options) -> Self {
        let host = host.into();
        let root = Path::new(&options.strax_output_path).join(&options.run_identifier);
        Self {
            worker_id,
            host,
            root,
            options,
            buffers: Mutex::new(Buffers {
                main: HashMap::new(),
                overlap: HashMap::new(),
            }),
            min_chunk: AtomicI64::new(0),
            max_chunk: AtomicI64::new(0),
            empty_verified: AtomicI64::new(0),
            stats: Mutex::new(WriterStats::default()),
            log: Log::new("writer"),
        }
    }

    fn file_name(&self) -> String {
        format!("{}_{}", self.host, self.worker_id)
    }

    /// Ingest one fragment, per spec §4.4's `add_fragment` algorithm.
    /// Returns the set of chunk ids now ready to be compressed and written
    /// (the caller enqueues one `CompressChunk` task per id).
    pub fn add_fragment(&self, frag: Fragment) -> Vec<i64> {
        let l = self.options.full_chunk_length_ns();
        let chunk_id = frag.time as i64 / l;
        let overlap_ns = self.options.chunk_overlap_ns();
        let into_overlap = ((chunk_id + 1) * l - frag.time as i64) <= overlap_ns;

        let mut buffers = self.buffers.lock().unwrap();
        let min_chunk = self.min_chunk.load(Ordering::Relaxed);
        let max_chunk = self.max_chunk.load(Ordering::Relaxed);

        if min_chunk - chunk_id > self.options.strax_chunk_phase_limit {
            log_entry!(
                self.log,
                Level::Warning,
                "worker {}: dropped late fragment for chunk {} (min_chunk={})",
                self.worker_id,
                chunk_id,
                min_chunk
            );
            return Vec::new();
        }
        if chunk_id - max_chunk > 1 {
            log_entry!(
                self.log,
                Level::Message,
                "worker {}: chunk gap, {} -> {}",
                self.worker_id,
                max_chunk,
                chunk_id
            );
        }

        if into_overlap {
            buffers.overlap.entry(chunk_id).or_default().push(frag);
        } else {
            buffers.main.entry(chunk_id).or_default().push(frag);
        }

        if let Some((_, new_max)) = buffers.gated_span() {
            self.max_chunk.store(new_max, Ordering::Relaxed);
        }

        let max_chunk = self.max_chunk.load(Ordering::Relaxed);
        let mut ready = Vec::new();
        if max_chunk - min_chunk >= self.options.strax_buffer_num_chunks {
            let new_min = max_chunk - self.options.strax_buffer_num_chunks;
            for id in min_chunk..new_min {
                if buffers.main.contains_key(&id) || buffers.overlap.contains_key(&id) {
                    ready.push(id);
                }
            }
            self.min_chunk.store(new_min, Ordering::Relaxed);
        }
        ready
    }

    /// Write out chunk `c`: compress `main`/`overlap` buffers and publish
    /// the three output files (main, `_post`, `_pre`) per spec §4.4 step 4.
    pub fn write_chunk(&self, c: i64) -> Result<()> {
        let (main, overlap) = {
            let mut buffers = self.buffers.lock().unwrap();
            let main = buffers.main.remove(&c).unwrap_or_default();
            let overlap = buffers.overlap.remove(&c).unwrap_or_default();
            if let Some((new_min, new_max)) = buffers.extremes() {
                self.min_chunk.store(new_min, Ordering::Relaxed);
                self.max_chunk.store(new_max, Ordering::Relaxed);
            }
            (main, overlap)
        };

        let main_bytes = concat_fragments(&main);
        let overlap_bytes = concat_fragments(&overlap);

        // An empty chunk is published as a genuinely zero-length file, not
        // a compressed frame of nothing, so it reads as a placeholder (§6).
        let compress_or_empty = |bytes: &[u8]| -> Result<Vec<u8>> {
            if bytes.is_empty() {
                Ok(Vec::new())
            } else {
                compress::compress(bytes, self.options.compressor)
            }
        };
        let main_compressed = compress_or_empty(&main_bytes)?;
        let overlap_compressed = compress_or_empty(&overlap_bytes)?;

        self.publish(&self.chunk_dir(c), &main_compressed)?;
        self.publish(&self.chunk_dir_suffixed(c, "post"), &overlap_compressed)?;
        self.publish(&self.chunk_dir_suffixed(c + 1, "pre"), &overlap_compressed)?;

        self.stats.lock().unwrap().record_flush(
            main.len(),
            overlap.len(),
            main_compressed.len() + overlap_compressed.len(),
        );

        self.create_empty(c)?;
        Ok(())
    }

    fn chunk_dir(&self, id: i64) -> PathBuf {
        self.root.join(format!("{id:06}"))
    }

    fn chunk_dir_suffixed(&self, id: i64, suffix: &str) -> PathBuf {
        self.root.join(format!("{id:06}_{suffix}"))
    }

    /// Write `bytes` to `dir/<host>_<worker>` via the `_temp`-then-rename
    /// protocol (spec §4.4 step 5). A pre-existing final path is a protocol
    /// violation: log and keep the existing file.
    fn publish(&self, dir: &Path, bytes: &[u8]) -> Result<()> {
        let temp_dir = self.root.join(format!(
            "{}_temp",
            dir.file_name().unwrap().to_string_lossy()
        ));
        std::fs::create_dir_all(&temp_dir).map_err(|e| Error::Filesystem {
            path: temp_dir.clone(),
            source: e,
        })?;
        let temp_path = temp_dir.join(self.file_name());
        std::fs::write(&temp_path, bytes).map_err(|e| Error::Filesystem {
            path: temp_path.clone(),
            source: e,
        })?;

        std::fs::create_dir_all(dir).map_err(|e| Error::Filesystem {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let final_path = dir.join(self.file_name());
        if final_path.exists() {
            log_entry!(
                self.log,
                Level::Warning,
                "output file collision at {}, keeping existing file",
                final_path.display()
            );
            let _ = std::fs::remove_file(&temp_path);
            return Ok(());
        }
        std::fs::rename(&temp_path, &final_path).map_err(|e| Error::Filesystem {
            path: final_path.clone(),
            source: e,
        })?;
        Ok(())
    }

    /// Ensure every chunk id in `[empty_verified, c)` has an empty
    /// placeholder file across its three directories, so a consumer can
    /// detect EOF by seeing all zero-length files (spec §4.4 step 6, §6).
    fn create_empty(&self, c: i64) -> Result<()> {
        let start = self.empty_verified.load(Ordering::Relaxed);
        for id in start..c {
            self.ensure_empty(&self.chunk_dir(id))?;
            self.ensure_empty(&self.chunk_dir_suffixed(id, "post"))?;
            if id != 0 {
                self.ensure_empty(&self.chunk_dir_suffixed(id, "pre"))?;
            }
        }
        self.empty_verified.store(c, Ordering::Relaxed);
        Ok(())
    }

    fn ensure_empty(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir).map_err(|e| Error::Filesystem {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = dir.join(self.file_name());
        if !path.exists() {
            std::fs::write(&path, []).map_err(|e| Error::Filesystem { path, source: e })?;
        }
        Ok(())
    }

    /// Flush every still-buffered chunk, then write the sentinel file
    /// marking clean termination (spec §4.4's shutdown path).
    pub fn end(&self) -> Result<()> {
        let ids: Vec<i64> = {
            let buffers = self.buffers.lock().unwrap();
            let mut ids: Vec<i64> = buffers
                .main
                .keys()
                .chain(buffers.overlap.keys())
                .copied()
                .collect();
            ids.sort_unstable();
            ids.dedup();
            ids
        };
        for id in ids {
            self.write_chunk(id)?;
        }
        let sentinel_dir = self.root.join("THE_END");
        std::fs::create_dir_all(&sentinel_dir).map_err(|e| Error::Filesystem {
            path: sentinel_dir.clone(),
            source: e,
        })?;
        let path = sentinel_dir.join(self.file_name());
        std::fs::write(&path, END_SENTINEL).map_err(|e| Error::Filesystem { path, source: e })?;
        Ok(())
    }

    pub fn stats(&self) -> WriterStats {
        self.stats.lock().unwrap().clone()
    }

    pub fn min_max_chunk(&self) -> (i64, i64) {
        (
            self.min_chunk.load(Ordering::Relaxed),
            self.max_chunk.load(Ordering::Relaxed),
        )
    }
}

fn concat_fragments(frags: &[Fragment]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for f in frags {
        bytes.extend(f.to_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::ProtoFragment;

    fn options(root: &Path) -> Options {
        let json = format!(
            r#"{{
            "strax_chunk_length": 1.0,
            "strax_chunk_overlap": 0.1,
            "strax_fragment_payload_bytes": 20,
            "strax_buffer_num_chunks": 1,
            "strax_chunk_phase_limit": 1,
            "strax_output_path": "{}",
            "run_identifier": "run",
            "boards": []
        }}"#,
            root.display()
        );
        Options::from_json(&json).unwrap()
    }

    fn frag(time: u64) -> Fragment {
        let proto = ProtoFragment {
            global_ch: 1,
            board_id: 0,
            abs_ns: time,
            sample_width_ns: 10,
            baseline: 0,
            waveform: vec![1, 2, 3],
        };
        Fragment::split_pulse(&proto, 20).remove(0)
    }

    /// Scenario 2: a fragment in the last `overlap_ns` of chunk 0 ends up
    /// in `000000_post` and `000001_pre`, not in `000000` or `000001`.
    #[test]
    fn overlap_fragment_lands_in_pre_and_post_only() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options(dir.path());
        let writer = Writer::new("h", 0, opts);

        // L = 1.1s; overlap window is the last 0.1s of chunk 0, i.e. t in [1.0s, 1.1s).
        let ready = writer.add_fragment(frag(1_050_000_000));
        assert!(ready.is_empty());

        // push enough chunks through to force chunk 0 to flush
        writer.add_fragment(frag(3_300_000_000));
        writer.write_chunk(0).unwrap();

        let main_path = dir.path().join("run/000000").join("h_0");
        let post_path = dir.path().join("run/000000_post").join("h_0");
        let pre_path = dir.path().join("run/000001_pre").join("h_0");

        assert!(main_path.exists());
        assert_eq!(std::fs::read(&main_path).unwrap().len(), 0);
        assert!(post_path.exists());
        assert!(!std::fs::read(&post_path).unwrap().is_empty());
        assert!(pre_path.exists());
        assert_eq!(
            std::fs::read(&post_path).unwrap(),
            std::fs::read(&pre_path).unwrap()
        );
    }

    #[test]
    fn late_fragment_is_dropped_without_mutating_buffers() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options(dir.path());
        let writer = Writer::new("h", 0, opts);
        writer.min_chunk.store(10, Ordering::Relaxed);
        writer.max_chunk.store(10, Ordering::Relaxed);

        let before = writer.buffers.lock().unwrap().main.len();
        let ready = writer.add_fragment(frag(3_300_000_000)); // chunk_id = 3
        let after = writer.buffers.lock().unwrap().main.len();
        assert!(ready.is_empty());
        assert_eq!(before, after);
    }

    #[test]
    fn end_writes_sentinel_file() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options(dir.path());
        let writer = Writer::new("h", 2, opts);
        writer.end().unwrap();
        let sentinel = dir.path().join("run/THE_END").join("h_2");
        assert!(sentinel.exists());
        assert_eq!(std::fs::read(&sentinel).unwrap(), END_SENTINEL);
    }
}
