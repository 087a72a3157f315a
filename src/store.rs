//! The event/seat data store consumed by session workers.
//!
//! [`SeatStore`] is the seam between the session layer and the booking state:
//! workers and the signal-triggered reporter only ever talk to the trait.
//! [`EventStore`] is the in-process implementation: a registry of events,
//! each with its own lock so concurrent sessions touching different events
//! never contend.
//!
//! Seat coordinates are 1-based `(row, col)` pairs. A free seat holds `0`;
//! a reserved seat holds the id of the reservation that booked it, assigned
//! from a per-event counter starting at 1.

use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::SeatGrid;

/// Errors reported by store operations.
///
/// These are business failures: workers translate them into a nonzero wire
/// return code and keep the session alive.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("event {0} already exists")]
    EventExists(u32),

    #[error("event {0} does not exist")]
    EventNotFound(u32),

    #[error("invalid event dimensions: {rows}x{cols}")]
    InvalidDimensions { rows: usize, cols: usize },

    #[error("a reservation must name at least one seat")]
    EmptyReservation,

    #[error("seat ({row},{col}) is outside the event grid")]
    SeatOutOfBounds { row: usize, col: usize },

    #[error("seat ({row},{col}) appears twice in the same reservation")]
    DuplicateSeat { row: usize, col: usize },

    #[error("seat ({row},{col}) is already taken")]
    SeatTaken { row: usize, col: usize },
}

/// The data-store facade the session layer is written against.
///
/// Implementations must be safe for concurrent use by every configured
/// session worker plus the accept loop's reporter.
pub trait SeatStore: Send + Sync {
    /// Create an event with a `rows` x `cols` grid of free seats.
    fn create(&self, event_id: u32, rows: usize, cols: usize) -> Result<(), StoreError>;

    /// Reserve the given 1-based seats in one atomic booking. Either every
    /// seat is stamped with a fresh reservation id or nothing changes.
    fn reserve(&self, event_id: u32, seats: &[(usize, usize)]) -> Result<(), StoreError>;

    /// Snapshot an event's seat grid.
    fn show(&self, event_id: u32) -> Result<SeatGrid, StoreError>;

    /// Ids of all events, in ascending order.
    fn list(&self) -> Result<Vec<u32>, StoreError>;

    /// Write every event id and its seat grid to `sink`, for the
    /// administrative snapshot dump.
    fn dump(&self, sink: &mut dyn Write) -> io::Result<()>;
}

struct Event {
    rows: usize,
    cols: usize,
    /// Row-major reservation ids; 0 = free.
    seats: Vec<u32>,
    next_reservation: u32,
}

impl Event {
    fn seat_index(&self, row: usize, col: usize) -> Result<usize, StoreError> {
        if row == 0 || col == 0 || row > self.rows || col > self.cols {
            return Err(StoreError::SeatOutOfBounds { row, col });
        }
        Ok((row - 1) * self.cols + (col - 1))
    }
}

/// In-memory [`SeatStore`]: a registry lock over the event map, one mutex per
/// event for seat mutations.
pub struct EventStore {
    events: RwLock<BTreeMap<u32, Arc<Mutex<Event>>>>,
    /// Artificial pause applied before each state access. Exposes unlucky
    /// interleavings under test; zero in normal operation.
    access_delay: Duration,
}

impl EventStore {
    pub fn new(access_delay: Duration) -> Self {
        Self {
            events: RwLock::new(BTreeMap::new()),
            access_delay,
        }
    }

    fn delay(&self) {
        if !self.access_delay.is_zero() {
            std::thread::sleep(self.access_delay);
        }
    }

    fn event(&self, event_id: u32) -> Result<Arc<Mutex<Event>>, StoreError> {
        self.events
            .read()
            .get(&event_id)
            .cloned()
            .ok_or(StoreError::EventNotFound(event_id))
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

impl SeatStore for EventStore {
    fn create(&self, event_id: u32, rows: usize, cols: usize) -> Result<(), StoreError> {
        let total = rows
            .checked_mul(cols)
            .filter(|&n| n > 0)
            .ok_or(StoreError::InvalidDimensions { rows, cols })?;

        self.delay();
        let mut events = self.events.write();
        if events.contains_key(&event_id) {
            return Err(StoreError::EventExists(event_id));
        }
        events.insert(
            event_id,
            Arc::new(Mutex::new(Event {
                rows,
                cols,
                seats: vec![0; total],
                next_reservation: 1,
            })),
        );
        tracing::debug!(event_id, rows, cols, "event created");
        Ok(())
    }

    fn reserve(&self, event_id: u32, seats: &[(usize, usize)]) -> Result<(), StoreError> {
        if seats.is_empty() {
            return Err(StoreError::EmptyReservation);
        }

        self.delay();
        let event = self.event(event_id)?;
        let mut event = event.lock();

        // Validate the whole booking before touching the grid, so a rejected
        // reservation leaves no partially stamped seats behind.
        let mut indices = Vec::with_capacity(seats.len());
        for &(row, col) in seats {
            let index = event.seat_index(row, col)?;
            if indices.contains(&index) {
                return Err(StoreError::DuplicateSeat { row, col });
            }
            if event.seats[index] != 0 {
                return Err(StoreError::SeatTaken { row, col });
            }
            indices.push(index);
        }

        let reservation = event.next_reservation;
        event.next_reservation += 1;
        for index in indices {
            event.seats[index] = reservation;
        }
        tracing::debug!(event_id, reservation, seats = seats.len(), "seats reserved");
        Ok(())
    }

    fn show(&self, event_id: u32) -> Result<SeatGrid, StoreError> {
        self.delay();
        let event = self.event(event_id)?;
        let event = event.lock();
        Ok(SeatGrid {
            rows: event.rows,
            cols: event.cols,
            seats: event.seats.clone(),
        })
    }

    fn list(&self) -> Result<Vec<u32>, StoreError> {
        self.delay();
        Ok(self.events.read().keys().copied().collect())
    }

    fn dump(&self, sink: &mut dyn Write) -> io::Result<()> {
        self.delay();
        // Clone the event handles so the registry lock is not held while
        // writing to the sink.
        let handles: Vec<(u32, Arc<Mutex<Event>>)> = self
            .events
            .read()
            .iter()
            .map(|(&id, event)| (id, Arc::clone(event)))
            .collect();

        for (id, event) in handles {
            writeln!(sink, "Event: {}", id)?;
            let event = event.lock();
            for row in event.seats.chunks(event.cols) {
                let line: Vec<String> = row.iter().map(u32::to_string).collect();
                writeln!(sink, "{}", line.join(" "))?;
            }
        }
        sink.flush()
    }
}
