//! Hand-off of accepted connection requests to the session worker pool.
//!
//! The accept loop produces [`SessionRequest`]s into a [`SessionQueue`], a
//! fixed-capacity circular buffer guarded by one mutex and a condition
//! variable per direction, and each worker thread consumes from it. A full
//! queue blocks the accept loop; an empty queue parks the workers. Requests
//! come out in arrival order and each is delivered to exactly one worker.

use parking_lot::{Condvar, Mutex};
use std::path::PathBuf;
use std::sync::Arc;
use std::{io, thread};

use crate::store::SeatStore;
use crate::worker;

/// An accepted connect message, waiting for a worker: the two pipe paths
/// the client named.
///
/// Created by the accept loop, moved through the queue, consumed by exactly
/// one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub request_pipe: PathBuf,
    pub response_pipe: PathBuf,
}

struct Ring {
    slots: Vec<Option<SessionRequest>>,
    /// Index of the next slot to fill.
    producer: usize,
    /// Index of the next slot to drain.
    consumer: usize,
    count: usize,
}

/// Bounded FIFO connecting the accept loop to the worker pool.
///
/// All queue state lives behind a single lock; waiting uses condition
/// variables, so blocked threads consume no CPU and see current state on
/// wake.
pub struct SessionQueue {
    ring: Mutex<Ring>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl SessionQueue {
    /// Create a queue holding at most `capacity` undispatched requests.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be at least 1");
        Self {
            ring: Mutex::new(Ring {
                slots: (0..capacity).map(|_| None).collect(),
                producer: 0,
                consumer: 0,
                count: 0,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.ring.lock().slots.len()
    }

    /// Number of requests currently waiting for a worker.
    pub fn len(&self) -> usize {
        self.ring.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue a request, blocking while the queue is full. Wakes one
    /// waiting consumer.
    pub fn submit(&self, request: SessionRequest) {
        let mut ring = self.ring.lock();
        while ring.count == ring.slots.len() {
            self.not_full.wait(&mut ring);
        }
        let capacity = ring.slots.len();
        let slot = ring.producer;
        ring.slots[slot] = Some(request);
        ring.producer = (slot + 1) % capacity;
        ring.count += 1;
        self.not_empty.notify_one();
    }

    /// Dequeue the oldest request, blocking while the queue is empty. Wakes
    /// one waiting producer.
    pub fn take_next(&self) -> SessionRequest {
        let mut ring = self.ring.lock();
        while ring.count == 0 {
            self.not_empty.wait(&mut ring);
        }
        let capacity = ring.slots.len();
        let slot = ring.consumer;
        let request = ring.slots[slot]
            .take()
            .expect("occupied slot within count is never empty");
        ring.consumer = (slot + 1) % capacity;
        ring.count -= 1;
        self.not_full.notify_one();
        request
    }
}

/// The worker pool plus its intake queue.
pub struct Dispatcher {
    queue: Arc<SessionQueue>,
    /// Worker threads live for the whole process; the handles are kept so
    /// the threads are owned somewhere, not because anyone joins them.
    workers: Vec<thread::JoinHandle<()>>,
}

impl Dispatcher {
    /// Allocate the queue (capacity = `num_workers`) and spawn the workers,
    /// each parked waiting for its first request.
    pub fn start(num_workers: usize, store: Arc<dyn SeatStore>) -> io::Result<Self> {
        let queue = Arc::new(SessionQueue::new(num_workers));
        let mut workers = Vec::with_capacity(num_workers);
        for id in 1..=num_workers {
            let queue = Arc::clone(&queue);
            let store = Arc::clone(&store);
            let handle = thread::Builder::new()
                .name(format!("session-worker-{}", id))
                .spawn(move || worker::run(id, queue, store))?;
            workers.push(handle);
        }
        tracing::info!(num_workers, "session workers started");
        Ok(Self { queue, workers })
    }

    /// Hand an accepted connection request to the pool. Blocks while every
    /// queue slot is occupied.
    pub fn submit(&self, request: SessionRequest) {
        tracing::debug!(
            request_pipe = %request.request_pipe.display(),
            response_pipe = %request.response_pipe.display(),
            "session request queued"
        );
        self.queue.submit(request);
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }
}
