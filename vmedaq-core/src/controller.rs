//! Owns the boards for this host, orchestrates arm/start/stop, and samples
//! telemetry. Named in spec §2's dependency list but given no dedicated
//! component section there; specified in full in SPEC_FULL §4.6, grounded
//! in the original `DAQController`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::board::Board;
use crate::config::Options;
use crate::error::{Error, Result};
use crate::log::{log_entry, Level, Log};
use crate::parser::{self, RawBlock};
use crate::pool::{Task, TaskTag, ThreadPool};
use crate::writer::Writer;

/// How long a poller sleeps after an empty block read, so an idle board
/// doesn't spin its thread (grounded in `f1724.cc`'s own self-throttling
/// `sleep_for` in its generator loop).
const POLL_IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Run-level error flag a data-plane thread sets instead of propagating an
/// `Error` across a thread boundary (spec §7).
#[derive(Clone, Default)]
pub struct FatalFlag(Arc<AtomicBool>);

impl FatalFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How often the telemetry sampler wakes up and how long a board may go
/// without progress before the watchdog declares it stuck.
pub struct WatchdogConfig {
    pub sample_interval: Duration,
    pub stuck_after: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(1),
            stuck_after: Duration::from_secs(30),
        }
    }
}

/// Owns every board and writer worker for one host and drives the
/// arm/start/stop lifecycle.
///
/// Each board lives behind its own `Mutex` rather than being moved into its
/// poller thread outright, so `stop()` can still reach in and issue
/// `acquisition_stop()` directly instead of routing it through the poller
/// loop (spec §4.6's Start/Stop bullet: `Stop` issues `AcquisitionStop`
/// across all boards, then drains pollers).
pub struct Controller {
    boards: Vec<Arc<Mutex<Board>>>,
    writers: HashMap<String, Vec<Arc<Writer>>>,
    pool: Option<Arc<ThreadPool>>,
    poll_threads: Vec<JoinHandle<()>>,
    options: Options,
    fatal: FatalFlag,
    running: Arc<AtomicBool>,
    last_progress: Arc<Mutex<HashMap<u16, Instant>>>,
    log: Log,
    watchdog: WatchdogConfig,
}

impl Controller {
    /// Construct every configured board, apply register writes, load DAC
    /// values, and set thresholds. Any board failing to arm aborts the
    /// whole sequence (fatal, spec §7).
    pub fn arm(options: Options) -> Result<Self> {
        let log = Log::new("controller");
        let mut boards = Vec::with_capacity(options.boards.len());
        for cfg in &options.boards {
            let mut board = Board::new(cfg.board, cfg.link, cfg.crate_, cfg.vme_address, cfg.family);
            board.arm()?;
            boards.push(board);
        }

        for reg in &options.registers {
            let board = boards
                .iter()
                .find(|b| b.bid == reg.board)
                .ok_or_else(|| Error::BoardInit {
                    board: reg.board,
                    reason: "register write targets unconfigured board".to_string(),
                })?;
            let addr = u32::from_str_radix(reg.val.trim_start_matches("0x"), 16)
                .or_else(|_| reg.val.parse())
                .unwrap_or(0);
            board.write_register(
                u32::from_str_radix(reg.reg.trim_start_matches("0x"), 16).unwrap_or(0),
                addr,
            )?;
        }

        for board in &boards {
            if let Some(thresholds) = options.thresholds.get(&board.bid) {
                board.set_thresholds(thresholds)?;
            }
            if let Some(calib) = options.dac_calibration.get(&board.bid) {
                let requested: Vec<u16> = vec![0; calib.len()];
                board.load_dac(calib, &requested)?;
            }
        }

        let mut writers: HashMap<String, Vec<Arc<Writer>>> = HashMap::new();
        for cfg in &options.boards {
            writers.entry(cfg.host.clone()).or_insert_with(|| {
                let n = options.writer_workers(&cfg.host);
                (0..n)
                    .map(|w| Arc::new(Writer::new(cfg.host.clone(), w, options.clone())))
                    .collect()
            });
        }

        log_entry!(log, Level::Message, "armed {} board(s)", boards.len());

        Ok(Self {
            boards: boards.into_iter().map(|b| Arc::new(Mutex::new(b))).collect(),
            writers,
            pool: None,
            poll_threads: Vec::new(),
            options,
            fatal: FatalFlag::new(),
            running: Arc::new(AtomicBool::new(false)),
            last_progress: Arc::new(Mutex::new(HashMap::new())),
            log,
            watchdog: WatchdogConfig::default(),
        })
    }

    pub fn fatal_flag(&self) -> FatalFlag {
        self.fatal.clone()
    }

    /// Start acquisition: issue software start on every board, then spin up
    /// one poller thread per board plus the formatter pool and the
    /// telemetry/watchdog sampler (spec §4.6, spec.md §5's thread roster).
    pub fn start(&mut self) -> Result<()> {
        for board in &self.boards {
            board.lock().unwrap().software_start()?;
        }

        let n_workers = self.options.boards.len().max(1) * 2;
        let pool = Arc::new(ThreadPool::new(n_workers));
        self.running.store(true, Ordering::SeqCst);
        self.spawn_sampler();

        for idx in 0..self.boards.len() {
            let board = Arc::clone(&self.boards[idx]);
            let bid = self.options.boards[idx].board;
            let host = &self.options.boards[idx].host;
            let writers = self.writers.get(host).cloned().unwrap_or_default();
            let pool = Arc::clone(&pool);
            let options = self.options.clone();
            let running = Arc::clone(&self.running);
            let last_progress = Arc::clone(&self.last_progress);
            let fatal = self.fatal.clone();
            let log = Log::new("controller::poller");

            self.poll_threads.push(thread::spawn(move || {
                while running.load(Ordering::SeqCst) {
                    let mut guard = board.lock().unwrap();
                    let outcome = poll_board(&mut guard, &writers, &pool, &options, &log);
                    drop(guard);
                    match outcome {
                        Ok(0) => thread::sleep(POLL_IDLE_SLEEP),
                        Ok(_) => {
                            last_progress.lock().unwrap().insert(bid, Instant::now());
                        }
                        Err(e) => {
                            log_entry!(log, Level::Error, "board {}: {}", bid, e);
                            if e.is_fatal() {
                                fatal.set();
                                break;
                            }
                        }
                    }
                }
            }));
        }

        self.pool = Some(pool);
        Ok(())
    }

    fn spawn_sampler(&self) {
        let running = Arc::clone(&self.running);
        let last_progress = Arc::clone(&self.last_progress);
        let fatal = self.fatal.clone();
        let log = Log::new("controller::sampler");
        let watchdog = self.watchdog.stuck_after;
        let interval = self.watchdog.sample_interval;
        let bids: Vec<u16> = self.options.boards.iter().map(|b| b.board).collect();

        thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                thread::sleep(interval);
                let now = Instant::now();
                let progress = last_progress.lock().unwrap();
                for &bid in &bids {
                    if let Some(&last) = progress.get(&bid) {
                        if now.duration_since(last) > watchdog {
                            log_entry!(log, Level::Fatal, "board {} stuck, no progress", bid);
                            fatal.set();
                        }
                    }
                }
            }
        });
    }

    /// One poller iteration for `board_idx`: block-read, parse, and
    /// dispatch fragments to their writer. `start()`'s poller threads run
    /// this in a loop; exposed standalone so tests can drive it
    /// deterministically without spinning up real threads.
    pub fn poll_once(&mut self, board_idx: usize) -> Result<usize> {
        let writers = self
            .writers
            .get(&self.options.boards[board_idx].host)
            .cloned()
            .unwrap_or_default();
        let pool = self.pool.as_ref().ok_or_else(|| Error::BoardInit {
            board: self.options.boards[board_idx].board,
            reason: "poll_once called before start".to_string(),
        })?;
        let mut guard = self.boards[board_idx].lock().unwrap();
        let n = poll_board(&mut guard, &writers, pool, &self.options, &self.log)?;
        drop(guard);

        self.last_progress
            .lock()
            .unwrap()
            .insert(self.options.boards[board_idx].board, Instant::now());
        Ok(n)
    }

    /// Stop acquisition: issue `AcquisitionStop` on every board, signal the
    /// pollers to drain their last block and join them, then run the
    /// pool/writer shutdown sequence and publish the shutdown sentinels
    /// (spec §4.4/§4.6's End path).
    pub fn stop(&mut self) -> Result<()> {
        for board in &self.boards {
            board.lock().unwrap().acquisition_stop()?;
        }
        self.running.store(false, Ordering::SeqCst);

        for handle in self.poll_threads.drain(..) {
            let _ = handle.join();
        }

        if let Some(pool) = self.pool.take() {
            match Arc::try_unwrap(pool) {
                Ok(pool) => pool.shutdown(),
                Err(_) => unreachable!("poller threads joined above, no other owner remains"),
            }
        }

        for workers in self.writers.values() {
            for writer in workers {
                writer.end()?;
            }
        }
        Ok(())
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.is_set()
    }
}

/// Drain one block from `board`, parse it, and dispatch the resulting
/// fragments round-robin across `writers`, enqueuing a `CompressChunk` task
/// per chunk a dispatch makes ready. Returns the number of fragments
/// produced. Shared by `start()`'s poller threads and `poll_once`.
fn poll_board(
    board: &mut Board,
    writers: &[Arc<Writer>],
    pool: &ThreadPool,
    options: &Options,
    log: &Log,
) -> Result<usize> {
    let mut bytes = Vec::new();
    board.block_read(&mut bytes)?;
    if bytes.is_empty() {
        return Ok(0);
    }
    let block = RawBlock::new(board, bytes);
    let fragments = parser::parse_block(block, options, log)?;
    let n = fragments.len();

    let n_writers = writers.len().max(1);
    static NEXT_WORKER: AtomicUsize = AtomicUsize::new(0);
    for fragment in fragments {
        let w = NEXT_WORKER.fetch_add(1, Ordering::Relaxed) % n_writers;
        if let Some(writer) = writers.get(w) {
            let writer = Arc::clone(writer);
            let ready = writer.add_fragment(fragment);
            for id in ready {
                let writer = Arc::clone(&writer);
                pool.submit(Task::new(TaskTag::CompressChunk, move || {
                    let _ = writer.write_chunk(id);
                }));
            }
        }
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> Options {
        let json = r#"{
            "strax_chunk_length": 5.0,
            "strax_chunk_overlap": 0.5,
            "strax_output_path": "/tmp/vmedaq-controller-test",
            "run_identifier": "run",
            "channels": {"0": [100,101,102,103,104,105,106,107]},
            "output_files": {"h": 1},
            "boards": [{"link":0,"crate_":0,"board":0,"type":"sim","vme_address":0,"host":"h"}]
        }"#;
        Options::from_json(json).unwrap()
    }

    #[test]
    fn arm_constructs_one_writer_set_per_host() {
        let controller = Controller::arm(options()).unwrap();
        assert_eq!(controller.boards.len(), 1);
        assert_eq!(controller.writers.get("h").unwrap().len(), 1);
    }

    #[test]
    fn fresh_controller_is_not_fatal() {
        let controller = Controller::arm(options()).unwrap();
        assert!(!controller.is_fatal());
    }

    #[test]
    fn start_spawns_one_poller_per_board_and_stop_joins_them() {
        let mut controller = Controller::arm(options()).unwrap();
        controller.start().unwrap();
        assert_eq!(controller.poll_threads.len(), 1);
        controller.stop().unwrap();
        assert!(controller.poll_threads.is_empty());
    }
}
