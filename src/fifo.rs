//! Named-pipe plumbing for the control channel and per-session channels.
//!
//! All opens are blocking: opening a FIFO's read end suspends the caller
//! until a writer shows up and vice versa, which is exactly the rendezvous
//! the session setup relies on.

use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors creating a FIFO object in the filesystem.
#[derive(Debug, Error)]
pub enum FifoError {
    #[error("failed to remove stale pipe {path}: {source}")]
    RemoveStale {
        path: PathBuf,
        source: io::Error,
    },

    #[error("failed to create pipe {path}: {source}")]
    Create {
        path: PathBuf,
        source: nix::Error,
    },
}

/// Create a fresh FIFO at `path`, replacing any stale filesystem object
/// left behind by a previous run.
pub fn create(path: &Path) -> Result<(), FifoError> {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed stale pipe"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(FifoError::RemoveStale {
                path: path.to_path_buf(),
                source,
            })
        }
    }
    mkfifo(path, Mode::from_bits_truncate(0o660)).map_err(|source| FifoError::Create {
        path: path.to_path_buf(),
        source,
    })
}

/// Open the read end of a FIFO; blocks until a writer opens the other end.
pub fn open_read(path: &Path) -> io::Result<File> {
    File::open(path)
}

/// Open the write end of a FIFO; blocks until a reader opens the other end.
pub fn open_write(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).open(path)
}

/// Open a FIFO for both reading and writing.
///
/// Used for the control channel: holding a writer on our own pipe means the
/// accept read blocks for the next message instead of spinning on EOF every
/// time the last client closes its end.
pub fn open_read_write(path: &Path) -> io::Result<File> {
    OpenOptions::new().read(true).write(true).open(path)
}

/// Remove a FIFO object, ignoring a pipe that is already gone.
pub fn remove(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::debug!(path = %path.display(), ?e, "failed to remove pipe");
        }
    }
}

/// The two filesystem objects backing one session, removed when the owner
/// is done with them.
///
/// Both the client and the serving worker hold one of these for the same
/// paths; whoever drops last finds the objects already gone, which is fine.
#[derive(Debug)]
pub struct PipePair {
    request: PathBuf,
    response: PathBuf,
}

impl PipePair {
    pub fn new(request: PathBuf, response: PathBuf) -> Self {
        Self { request, response }
    }

    pub fn request(&self) -> &Path {
        &self.request
    }

    pub fn response(&self) -> &Path {
        &self.response
    }
}

impl Drop for PipePair {
    fn drop(&mut self) {
        remove(&self.request);
        remove(&self.response);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use tempfile::TempDir;

    #[test]
    fn create_makes_a_fifo() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.pipe");
        create(&path).unwrap();

        use std::os::unix::fs::FileTypeExt;
        let file_type = std::fs::metadata(&path).unwrap().file_type();
        assert!(file_type.is_fifo());
    }

    #[test]
    fn create_replaces_stale_object() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stale.pipe");
        std::fs::write(&path, b"not a pipe").unwrap();
        create(&path).unwrap();

        use std::os::unix::fs::FileTypeExt;
        let file_type = std::fs::metadata(&path).unwrap().file_type();
        assert!(file_type.is_fifo());
    }

    #[test]
    fn read_write_ends_rendezvous() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rw.pipe");
        create(&path).unwrap();

        let writer_path = path.clone();
        let writer = std::thread::spawn(move || {
            let mut w = open_write(&writer_path).unwrap();
            w.write_all(b"ping").unwrap();
        });

        let mut r = open_read(&path).unwrap();
        let mut buf = [0u8; 4];
        r.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
        writer.join().unwrap();
    }

    #[test]
    fn pipe_pair_removes_both_on_drop() {
        let dir = TempDir::new().unwrap();
        let req = dir.path().join("req.pipe");
        let resp = dir.path().join("resp.pipe");
        create(&req).unwrap();
        create(&resp).unwrap();

        let pair = PipePair::new(req.clone(), resp.clone());
        assert!(req.exists());
        drop(pair);
        assert!(!req.exists());
        assert!(!resp.exists());
    }

    #[test]
    fn pipe_pair_drop_tolerates_missing_objects() {
        let dir = TempDir::new().unwrap();
        let pair = PipePair::new(
            dir.path().join("never-created-a"),
            dir.path().join("never-created-b"),
        );
        drop(pair); // must not panic
    }
}
