//! Blocking client for the booking server.
//!
//! A [`Client`] owns one session: its two private pipes and the session id
//! the server assigned. Setup creates the pipes, announces them on the
//! control channel, and completes the rendezvous; after that every method is
//! one request/response exchange. Dropping the client closes both pipe ends
//! and removes the pipe objects (the serving worker does the same on its
//! side, and whoever is last finds them already gone).

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::fifo::{self, FifoError, PipePair};
use crate::protocol::{self, ConnectRequest, ProtocolError, Request, SeatGrid, SESSION_REFUSED};

/// Errors surfaced by the client API.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Fifo(#[from] FifoError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("pipe path is not valid UTF-8: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error("server refused the connection")]
    Refused,

    #[error("server rejected the request (return code {0})")]
    Rejected(i32),
}

/// One connected session.
pub struct Client {
    session_id: i32,
    requests: File,
    responses: File,
    // Held for its Drop: removes both pipe objects when the client goes away.
    _pipes: PipePair,
}

impl Client {
    /// Connect to a server: create the private pipes, send the connect
    /// message on the control channel, open both ends, and read the
    /// assigned session id.
    ///
    /// Blocks until a worker picks the session up. Fails with
    /// [`ClientError::Refused`] if the server answers with a refusal id.
    pub fn setup(
        request_pipe: &Path,
        response_pipe: &Path,
        control_pipe: &Path,
    ) -> Result<Self, ClientError> {
        let request_str = path_str(request_pipe)?;
        let response_str = path_str(response_pipe)?;
        let connect = ConnectRequest::new(request_str, response_str)?;

        // Open the control channel first: if no server is listening this
        // fails before any pipe objects are created.
        let mut control = fifo::open_write(control_pipe)?;

        fifo::create(request_pipe)?;
        fifo::create(response_pipe)?;
        let pipes = PipePair::new(request_pipe.to_path_buf(), response_pipe.to_path_buf());

        control.write_all(&connect.encode())?;
        drop(control);

        // Mirror image of the worker's open order.
        let requests = fifo::open_write(pipes.request())?;
        let mut responses = fifo::open_read(pipes.response())?;

        let session_id = protocol::read_session_id(&mut responses)?;
        if session_id == SESSION_REFUSED {
            return Err(ClientError::Refused);
        }
        tracing::debug!(session_id, "session established");

        Ok(Self {
            session_id,
            requests,
            responses,
            _pipes: pipes,
        })
    }

    /// The id the server assigned to this session.
    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    /// Create an event with a `rows` x `cols` seat grid.
    pub fn create(&mut self, event_id: u32, rows: usize, cols: usize) -> Result<(), ClientError> {
        let request = Request::Create {
            event_id,
            rows,
            cols,
        };
        self.requests.write_all(&request.encode())?;
        self.expect_success()
    }

    /// Reserve 1-based `(row, col)` seats in one booking.
    pub fn reserve(&mut self, event_id: u32, seats: &[(usize, usize)]) -> Result<(), ClientError> {
        let request = Request::Reserve {
            event_id,
            seats: seats.to_vec(),
        };
        self.requests.write_all(&request.encode())?;
        self.expect_success()
    }

    /// Fetch an event's seat grid and print it to `sink`, one row per line,
    /// seat values separated by single spaces.
    pub fn show<W: Write>(&mut self, event_id: u32, sink: &mut W) -> Result<(), ClientError> {
        self.requests
            .write_all(&Request::Show { event_id }.encode())?;
        self.expect_success()?;

        let grid = SeatGrid::read_body(&mut self.responses)?;
        for row in grid.seats.chunks(grid.cols.max(1)) {
            let line: Vec<String> = row.iter().map(u32::to_string).collect();
            writeln!(sink, "{}", line.join(" "))?;
        }
        Ok(())
    }

    /// Fetch the ids of all events and print them to `sink` as
    /// `Event: <id>` lines. An empty listing prints nothing.
    pub fn list_events<W: Write>(&mut self, sink: &mut W) -> Result<(), ClientError> {
        self.requests.write_all(&Request::List.encode())?;
        self.expect_success()?;

        let ids = protocol::read_list_body(&mut self.responses)?;
        for id in ids {
            writeln!(sink, "Event: {}", id)?;
        }
        Ok(())
    }

    /// End the session. The worker closes and removes the pipes on its
    /// side; dropping `self` removes whatever is left on ours.
    pub fn quit(mut self) -> Result<(), ClientError> {
        self.requests.write_all(&Request::Quit.encode())?;
        tracing::debug!(session_id = self.session_id, "session ended");
        Ok(())
    }

    /// Read the status code of the pending response, mapping a nonzero code
    /// to [`ClientError::Rejected`].
    fn expect_success(&mut self) -> Result<(), ClientError> {
        let code = protocol::read_status(&mut self.responses)?;
        if code != 0 {
            return Err(ClientError::Rejected(code));
        }
        Ok(())
    }
}

fn path_str(path: &Path) -> Result<&str, ClientError> {
    path.to_str()
        .ok_or_else(|| ClientError::InvalidPath(path.to_path_buf()))
}
