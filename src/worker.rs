//! Session workers: the threads that own one client each.
//!
//! A worker loops forever over `wait for work → open the session's pipe
//! pair → announce the session id → serve commands → tear down`. The
//! serving loop reads one opcode at a time and answers with a status code
//! (plus a payload for SHOW and LIST). A business rejection from the store
//! becomes status `1` and the session keeps going; a transport failure or a
//! nonsense opcode ends the session. On the way out the worker closes both
//! pipe ends and removes the pipe objects from the filesystem.

use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::dispatch::{SessionQueue, SessionRequest};
use crate::fifo::{self, PipePair};
use crate::protocol::{self, ProtocolError, Request};
use crate::store::SeatStore;

/// Why a session ended before a clean QUIT.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to open session pipe {path}: {source}")]
    Open {
        path: PathBuf,
        source: io::Error,
    },

    #[error("session transport failure: {0}")]
    Transport(#[from] io::Error),

    #[error("client protocol violation: {0}")]
    Protocol(ProtocolError),
}

/// Body of one worker thread. Never returns; the pool lives as long as the
/// server process.
pub fn run(worker_id: usize, queue: Arc<SessionQueue>, store: Arc<dyn SeatStore>) {
    loop {
        let request = queue.take_next();
        tracing::info!(
            worker = worker_id,
            request_pipe = %request.request_pipe.display(),
            "session dispatched"
        );
        match serve_session(worker_id, request, store.as_ref()) {
            Ok(()) => tracing::info!(worker = worker_id, "session closed"),
            Err(e) => tracing::warn!(worker = worker_id, error = %e, "session aborted"),
        }
    }
}

/// Serve one client from connect to teardown.
///
/// The worker owns the pipe objects from this point on: they are removed
/// from the filesystem on every exit path, clean or not.
fn serve_session(
    worker_id: usize,
    request: SessionRequest,
    store: &dyn SeatStore,
) -> Result<(), SessionError> {
    let pipes = PipePair::new(request.request_pipe, request.response_pipe);

    // Request end first, response end second, the mirror image of the
    // client's open order, so the two rendezvous instead of deadlocking.
    let mut requests = fifo::open_read(pipes.request()).map_err(|source| SessionError::Open {
        path: pipes.request().to_path_buf(),
        source,
    })?;
    let mut responses = fifo::open_write(pipes.response()).map_err(|source| SessionError::Open {
        path: pipes.response().to_path_buf(),
        source,
    })?;

    // Announce the session: the worker id doubles as the session id.
    protocol::write_session_id(&mut responses, worker_id as i32)?;

    loop {
        match Request::read_from(&mut requests) {
            Ok(Request::Quit) => {
                tracing::debug!(worker = worker_id, "client quit");
                return Ok(());
            }
            Ok(command) => serve_command(worker_id, &command, store, &mut responses)?,
            Err(error) => {
                // Short read or garbage opcode: tell the client if we still
                // can, then drop the session.
                let _ = protocol::write_status(&mut responses, 1);
                return Err(match error {
                    ProtocolError::Io(e) => SessionError::Transport(e),
                    other => SessionError::Protocol(other),
                });
            }
        }
    }
}

/// Execute one decoded command against the store and write the response.
///
/// Only transport failures bubble up; store rejections are encoded as a
/// nonzero status so the client can keep the session.
fn serve_command(
    worker_id: usize,
    command: &Request,
    store: &dyn SeatStore,
    responses: &mut File,
) -> Result<(), SessionError> {
    match command {
        Request::Create {
            event_id,
            rows,
            cols,
        } => {
            let code = match store.create(*event_id, *rows, *cols) {
                Ok(()) => 0,
                Err(e) => {
                    tracing::debug!(worker = worker_id, error = %e, "create rejected");
                    1
                }
            };
            protocol::write_status(responses, code)?;
        }
        Request::Reserve { event_id, seats } => {
            let code = match store.reserve(*event_id, seats) {
                Ok(()) => 0,
                Err(e) => {
                    tracing::debug!(worker = worker_id, error = %e, "reserve rejected");
                    1
                }
            };
            protocol::write_status(responses, code)?;
        }
        Request::Show { event_id } => match store.show(*event_id) {
            Ok(grid) => {
                protocol::write_status(responses, 0)?;
                grid.write_body(responses)?;
            }
            Err(e) => {
                tracing::debug!(worker = worker_id, error = %e, "show rejected");
                protocol::write_status(responses, 1)?;
            }
        },
        Request::List => match store.list() {
            Ok(ids) => {
                protocol::write_status(responses, 0)?;
                protocol::write_list_body(responses, &ids)?;
            }
            Err(e) => {
                tracing::debug!(worker = worker_id, error = %e, "list rejected");
                protocol::write_status(responses, 1)?;
            }
        },
        // QUIT is handled by the caller before dispatching here.
        Request::Quit => {}
    }
    Ok(())
}
