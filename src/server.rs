//! The server front end: control channel setup and the accept loop.
//!
//! The server owns one well-known FIFO, the control channel. Clients write a
//! single connect message there naming their private request/response pipes;
//! the accept loop decodes it and hands the pair to the dispatcher. Between
//! accept iterations, immediately before blocking on the next control-channel
//! read, the loop polls the snapshot flag and, when set, dumps every event
//! to stdout. Doing the dump here rather than in the signal handler keeps
//! non-reentrant I/O and locking out of handler context.

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::dispatch::{Dispatcher, SessionRequest};
use crate::fifo::{self, FifoError};
use crate::protocol::{ConnectRequest, OpCode};
use crate::signal::DumpFlag;
use crate::store::SeatStore;

/// Everything the server needs to start listening.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path of the well-known control channel FIFO.
    pub control_pipe: PathBuf,
    /// Session worker count; also the connection queue capacity.
    pub workers: usize,
}

/// Fatal server conditions. Everything here ends the process; per-session
/// trouble never reaches this type.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("control channel setup failed: {0}")]
    Setup(#[from] FifoError),

    #[error("failed to open control channel {path}: {source}")]
    OpenControl {
        path: PathBuf,
        source: io::Error,
    },

    #[error("failed to install signal handler: {0}")]
    Signal(io::Error),

    #[error("failed to start session workers: {0}")]
    WorkerSpawn(io::Error),

    #[error("control channel read failed: {0}")]
    ControlRead(io::Error),
}

/// Run the server forever: accept connect messages, dispatch sessions,
/// and serve snapshot requests between accepts.
///
/// Only returns on a fatal error; a malformed connect message or a failed
/// session never takes the server down.
pub fn serve(config: &ServerConfig, store: Arc<dyn SeatStore>) -> Result<(), ServerError> {
    let flag = DumpFlag::new();
    flag.install().map_err(ServerError::Signal)?;

    let dispatcher =
        Dispatcher::start(config.workers, Arc::clone(&store)).map_err(ServerError::WorkerSpawn)?;

    fifo::create(&config.control_pipe)?;
    // Read+write: our own writer end keeps the FIFO open, so the accept read
    // blocks for the next message instead of spinning on EOF whenever the
    // last client closes.
    let mut control =
        fifo::open_read_write(&config.control_pipe).map_err(|source| ServerError::OpenControl {
            path: config.control_pipe.clone(),
            source,
        })?;

    tracing::info!(
        path = %config.control_pipe.display(),
        workers = config.workers,
        "server listening"
    );

    loop {
        if flag.take() {
            tracing::info!("snapshot requested, dumping events");
            let mut stdout = io::stdout().lock();
            if let Err(e) = store.dump(&mut stdout) {
                tracing::warn!(?e, "snapshot dump failed");
            }
        }

        let mut opcode = [0u8; 1];
        match control.read(&mut opcode) {
            Ok(0) => continue,
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ServerError::ControlRead(e)),
        }

        // A stray 0x00 is padding from an earlier message, not a request.
        if opcode[0] == 0 {
            continue;
        }
        if opcode[0] != OpCode::Connect as u8 {
            tracing::warn!(opcode = opcode[0], "unexpected opcode on control channel");
            continue;
        }

        let connect = match ConnectRequest::read_body_from(&mut control) {
            Ok(connect) => connect,
            Err(e) => {
                tracing::warn!(error = %e, "malformed connect message, ignoring");
                continue;
            }
        };

        dispatcher.submit(SessionRequest {
            request_pipe: PathBuf::from(connect.request_pipe),
            response_pipe: PathBuf::from(connect.response_pipe),
        });
    }
}
