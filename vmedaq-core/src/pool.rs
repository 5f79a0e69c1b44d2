//! Fixed-size worker pool: one FIFO queue, a mutex, and a condition
//! variable. Deliberately not channel-based — spec §4.5/§5 pin the ordering
//! guarantee ("tasks targeting the same worker for the same chunk id are
//! totally ordered by enqueue time") to this exact single-queue discipline,
//! which a per-worker channel pool would not preserve under work-stealing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

/// What kind of work a task carries, mirroring the three stage boundaries
/// the pool moves data across (spec §3's ThreadPool Task entity).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum TaskTag {
    ProcessRaw,
    FormatEvent,
    CompressChunk,
}

/// One unit of work. The payload is an opaque closure so the pool itself
/// stays ignorant of what Board/Parser/Writer types it is moving.
pub struct Task {
    pub tag: TaskTag,
    run: Box<dyn FnOnce() + Send + 'static>,
}

impl Task {
    pub fn new(tag: TaskTag, run: impl FnOnce() + Send + 'static) -> Self {
        Self {
            tag,
            run: Box::new(run),
        }
    }
}

struct Shared {
    queue: Mutex<VecDeque<Task>>,
    condvar: Condvar,
    cancelled: AtomicBool,
    running: AtomicUsize,
    waiting: AtomicUsize,
}

/// A fixed-size pool of worker threads draining one shared FIFO queue.
pub struct ThreadPool {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new(n_workers: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            cancelled: AtomicBool::new(false),
            running: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
        });

        let handles = (0..n_workers)
            .map(|_| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || worker_loop(shared))
            })
            .collect();

        Self { shared, handles }
    }

    /// Enqueue a task and wake exactly one worker.
    pub fn submit(&self, task: Task) {
        let mut queue = self.shared.queue.lock().unwrap();
        queue.push_back(task);
        self.shared.waiting.store(queue.len(), Ordering::Relaxed);
        self.shared.condvar.notify_one();
    }

    pub fn waiting(&self) -> usize {
        self.shared.waiting.load(Ordering::Relaxed)
    }

    pub fn running(&self) -> usize {
        self.shared.running.load(Ordering::Relaxed)
    }

    /// Signal cancellation and join every worker. In-flight tasks run to
    /// completion; queued-but-not-started tasks are dropped (spec §5's
    /// "drained best-effort by the writer's End path, then discarded" —
    /// the writer itself is responsible for flushing before calling this).
    pub fn shutdown(mut self) {
        self.shared.cancelled.store(true, Ordering::SeqCst);
        self.shared.condvar.notify_all();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let task = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if let Some(task) = queue.pop_front() {
                    shared.waiting.store(queue.len(), Ordering::Relaxed);
                    break Some(task);
                }
                if shared.cancelled.load(Ordering::SeqCst) {
                    break None;
                }
                queue = shared.condvar.wait(queue).unwrap();
            }
        };
        match task {
            Some(task) => {
                shared.running.fetch_add(1, Ordering::Relaxed);
                (task.run)();
                shared.running.fetch_sub(1, Ordering::Relaxed);
            }
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn tasks_run_and_pool_drains_cleanly() {
        let pool = ThreadPool::new(4);
        let (tx, rx) = mpsc::channel();
        for i in 0..20 {
            let tx = tx.clone();
            pool.submit(Task::new(TaskTag::FormatEvent, move || {
                tx.send(i).unwrap();
            }));
        }
        drop(tx);
        let mut results: Vec<i32> = rx.iter().collect();
        results.sort_unstable();
        assert_eq!(results, (0..20).collect::<Vec<_>>());
        pool.shutdown();
    }

    #[test]
    fn same_chunk_tasks_run_in_enqueue_order() {
        let pool = ThreadPool::new(1);
        let (tx, rx) = mpsc::channel();
        for i in 0..10 {
            let tx = tx.clone();
            pool.submit(Task::new(TaskTag::CompressChunk, move || {
                tx.send(i).unwrap();
            }));
        }
        drop(tx);
        let results: Vec<i32> = rx.iter().collect();
        assert_eq!(results, (0..10).collect::<Vec<_>>());
        pool.shutdown();
    }
}
