//! Binary wire protocol spoken on the control channel and per-session pipes.
//!
//! Every message is a sequence of fixed-width fields in native byte order:
//! an opcode byte, `u32` event ids, `i32` status codes, and platform-width
//! (`usize`) counts and coordinates. There are no delimiters and no length
//! prefixes; both sides know the exact byte count of every field up front.
//!
//! Decoding uses `read_exact`, so a short transfer surfaces as
//! [`io::ErrorKind::UnexpectedEof`] and the affected session is aborted.
//! This trusts the transport to deliver each write in one piece, which holds
//! for pipes below the atomic-write threshold but not for byte streams in
//! general; a production transport would length-prefix its frames instead.

use bytes::{BufMut, Bytes, BytesMut};
use std::io::{self, Read, Write};
use thiserror::Error;

/// Maximum length of a pipe path on the wire, including NUL padding.
pub const PIPE_PATH_MAX: usize = 40;

/// Session id written to a client whose connection is refused.
pub const SESSION_REFUSED: i32 = -1;

/// Upper bound on seats in a single reservation request.
///
/// Prevents a malformed count field from driving a huge allocation.
pub const MAX_SEATS_PER_RESERVE: usize = 1 << 16;

/// Upper bound on the decoded size of a seat grid or event list.
pub const MAX_RESPONSE_ITEMS: usize = 1 << 24;

/// Protocol opcode byte values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// Control channel only: request a new session.
    Connect = 1,
    /// End the session.
    Quit = 2,
    /// Create an event with a seat grid.
    Create = 3,
    /// Reserve seats in an event.
    Reserve = 4,
    /// Fetch an event's seat grid.
    Show = 5,
    /// Fetch the ids of all events.
    List = 6,
}

impl OpCode {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Connect),
            2 => Some(Self::Quit),
            3 => Some(Self::Create),
            4 => Some(Self::Reserve),
            5 => Some(Self::Show),
            6 => Some(Self::List),
            _ => None,
        }
    }
}

/// Errors arising while encoding or decoding protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("pipe path too long ({0} bytes, max {PIPE_PATH_MAX})")]
    PathTooLong(usize),

    #[error("pipe path contains an embedded NUL byte")]
    PathEmbeddedNul,

    #[error("pipe path is not valid UTF-8")]
    PathNotUtf8,

    #[error("unknown opcode: 0x{0:02x}")]
    UnknownOpCode(u8),

    #[error("opcode {0:?} is not valid on a session channel")]
    UnexpectedOpCode(OpCode),

    #[error("reservation names {0} seats (max {MAX_SEATS_PER_RESERVE})")]
    TooManySeats(usize),

    #[error("response payload too large ({0} items)")]
    ResponseTooLarge(usize),
}

// ── Field helpers ──────────────────────────────────────────────────

fn read_u8<R: Read>(reader: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_ne_bytes(buf))
}

fn read_i32<R: Read>(reader: &mut R) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_ne_bytes(buf))
}

fn read_usize<R: Read>(reader: &mut R) -> io::Result<usize> {
    let mut buf = [0u8; std::mem::size_of::<usize>()];
    reader.read_exact(&mut buf)?;
    Ok(usize::from_ne_bytes(buf))
}

/// Encode a path into a fixed-width NUL-padded field.
fn encode_path(path: &str) -> Result<[u8; PIPE_PATH_MAX], ProtocolError> {
    let bytes = path.as_bytes();
    if bytes.len() >= PIPE_PATH_MAX {
        return Err(ProtocolError::PathTooLong(bytes.len()));
    }
    if bytes.contains(&0) {
        return Err(ProtocolError::PathEmbeddedNul);
    }
    let mut field = [0u8; PIPE_PATH_MAX];
    field[..bytes.len()].copy_from_slice(bytes);
    Ok(field)
}

/// Decode a fixed-width NUL-padded path field.
fn decode_path(field: &[u8; PIPE_PATH_MAX]) -> Result<String, ProtocolError> {
    let len = field.iter().position(|&b| b == 0).unwrap_or(PIPE_PATH_MAX);
    std::str::from_utf8(&field[..len])
        .map(str::to_owned)
        .map_err(|_| ProtocolError::PathNotUtf8)
}

// ── Control channel ────────────────────────────────────────────────

/// A client's request for a new session, sent once on the control channel.
///
/// Wire format: `CONNECT opcode ‖ request path (40 bytes, NUL-padded) ‖
/// response path (40 bytes, NUL-padded) ‖ 0x00 terminator`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub request_pipe: String,
    pub response_pipe: String,
}

impl ConnectRequest {
    /// Build a connect request, validating that both paths fit the
    /// fixed-width fields.
    pub fn new(request_pipe: &str, response_pipe: &str) -> Result<Self, ProtocolError> {
        encode_path(request_pipe)?;
        encode_path(response_pipe)?;
        Ok(Self {
            request_pipe: request_pipe.to_owned(),
            response_pipe: response_pipe.to_owned(),
        })
    }

    /// Encode the full 82-byte control message.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(2 + 2 * PIPE_PATH_MAX);
        buf.put_u8(OpCode::Connect as u8);
        // new() validated both paths, so re-encoding cannot fail
        buf.put_slice(&encode_path(&self.request_pipe).unwrap_or([0; PIPE_PATH_MAX]));
        buf.put_slice(&encode_path(&self.response_pipe).unwrap_or([0; PIPE_PATH_MAX]));
        buf.put_u8(0);
        buf.freeze()
    }

    /// Read the message body (both paths and the terminator byte) after the
    /// opcode has already been consumed by the accept loop.
    ///
    /// The terminator is consumed here so the control channel is left clean
    /// for the next connect message.
    pub fn read_body_from<R: Read>(reader: &mut R) -> Result<Self, ProtocolError> {
        let mut request = [0u8; PIPE_PATH_MAX];
        reader.read_exact(&mut request)?;
        let mut response = [0u8; PIPE_PATH_MAX];
        reader.read_exact(&mut response)?;
        let _terminator = read_u8(reader)?;
        Ok(Self {
            request_pipe: decode_path(&request)?,
            response_pipe: decode_path(&response)?,
        })
    }
}

/// Write the session id (or [`SESSION_REFUSED`]) on a response pipe.
pub fn write_session_id<W: Write>(writer: &mut W, session_id: i32) -> io::Result<()> {
    writer.write_all(&session_id.to_ne_bytes())
}

/// Read the session id from a response pipe.
pub fn read_session_id<R: Read>(reader: &mut R) -> Result<i32, ProtocolError> {
    Ok(read_i32(reader)?)
}

// ── Session requests ───────────────────────────────────────────────

/// One decoded command on a session's request pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Quit,
    Create {
        event_id: u32,
        rows: usize,
        cols: usize,
    },
    Reserve {
        event_id: u32,
        /// 1-based `(row, col)` coordinates.
        seats: Vec<(usize, usize)>,
    },
    Show {
        event_id: u32,
    },
    List,
}

impl Request {
    /// Encode this request for the session's request pipe.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            Self::Quit => buf.put_u8(OpCode::Quit as u8),
            Self::Create {
                event_id,
                rows,
                cols,
            } => {
                buf.put_u8(OpCode::Create as u8);
                buf.put_slice(&event_id.to_ne_bytes());
                buf.put_slice(&rows.to_ne_bytes());
                buf.put_slice(&cols.to_ne_bytes());
            }
            Self::Reserve { event_id, seats } => {
                buf.put_u8(OpCode::Reserve as u8);
                buf.put_slice(&event_id.to_ne_bytes());
                buf.put_slice(&seats.len().to_ne_bytes());
                for (x, _) in seats {
                    buf.put_slice(&x.to_ne_bytes());
                }
                for (_, y) in seats {
                    buf.put_slice(&y.to_ne_bytes());
                }
            }
            Self::Show { event_id } => {
                buf.put_u8(OpCode::Show as u8);
                buf.put_slice(&event_id.to_ne_bytes());
            }
            Self::List => buf.put_u8(OpCode::List as u8),
        }
        buf.freeze()
    }

    /// Read and decode one request from a session's request pipe.
    ///
    /// Blocks until an opcode byte arrives. An opcode that is not valid in a
    /// session ([`OpCode::Connect`] or an unassigned byte) is reported without
    /// consuming any payload.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, ProtocolError> {
        let byte = read_u8(reader)?;
        let opcode = OpCode::from_u8(byte).ok_or(ProtocolError::UnknownOpCode(byte))?;
        match opcode {
            OpCode::Connect => Err(ProtocolError::UnexpectedOpCode(opcode)),
            OpCode::Quit => Ok(Self::Quit),
            OpCode::Create => {
                let event_id = read_u32(reader)?;
                let rows = read_usize(reader)?;
                let cols = read_usize(reader)?;
                Ok(Self::Create {
                    event_id,
                    rows,
                    cols,
                })
            }
            OpCode::Reserve => {
                let event_id = read_u32(reader)?;
                let num_seats = read_usize(reader)?;
                if num_seats > MAX_SEATS_PER_RESERVE {
                    return Err(ProtocolError::TooManySeats(num_seats));
                }
                let mut xs = Vec::with_capacity(num_seats);
                for _ in 0..num_seats {
                    xs.push(read_usize(reader)?);
                }
                let mut ys = Vec::with_capacity(num_seats);
                for _ in 0..num_seats {
                    ys.push(read_usize(reader)?);
                }
                Ok(Self::Reserve {
                    event_id,
                    seats: xs.into_iter().zip(ys).collect(),
                })
            }
            OpCode::Show => Ok(Self::Show {
                event_id: read_u32(reader)?,
            }),
            OpCode::List => Ok(Self::List),
        }
    }
}

// ── Session responses ──────────────────────────────────────────────

/// Write the leading status code of a response (`0` = success).
pub fn write_status<W: Write>(writer: &mut W, code: i32) -> io::Result<()> {
    writer.write_all(&code.to_ne_bytes())
}

/// Read the leading status code of a response.
pub fn read_status<R: Read>(reader: &mut R) -> Result<i32, ProtocolError> {
    Ok(read_i32(reader)?)
}

/// A seat grid as carried in a successful SHOW response: row-major
/// reservation ids, `0` for a free seat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatGrid {
    pub rows: usize,
    pub cols: usize,
    pub seats: Vec<u32>,
}

impl SeatGrid {
    /// Reservation id at 1-based `(row, col)`, if in bounds.
    pub fn seat(&self, row: usize, col: usize) -> Option<u32> {
        if row == 0 || col == 0 || row > self.rows || col > self.cols {
            return None;
        }
        self.seats.get((row - 1) * self.cols + (col - 1)).copied()
    }

    /// Write the SHOW success payload following the status code.
    pub fn write_body<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.rows.to_ne_bytes())?;
        writer.write_all(&self.cols.to_ne_bytes())?;
        for seat in &self.seats {
            writer.write_all(&seat.to_ne_bytes())?;
        }
        Ok(())
    }

    /// Read the SHOW success payload following the status code.
    pub fn read_body<R: Read>(reader: &mut R) -> Result<Self, ProtocolError> {
        let rows = read_usize(reader)?;
        let cols = read_usize(reader)?;
        let total = rows.saturating_mul(cols);
        if total > MAX_RESPONSE_ITEMS {
            return Err(ProtocolError::ResponseTooLarge(total));
        }
        let mut seats = Vec::with_capacity(total);
        for _ in 0..total {
            seats.push(read_u32(reader)?);
        }
        Ok(Self { rows, cols, seats })
    }
}

/// Write the LIST success payload (event count, then ids) following the
/// status code.
pub fn write_list_body<W: Write>(writer: &mut W, event_ids: &[u32]) -> io::Result<()> {
    writer.write_all(&event_ids.len().to_ne_bytes())?;
    for id in event_ids {
        writer.write_all(&id.to_ne_bytes())?;
    }
    Ok(())
}

/// Read the LIST success payload following the status code.
pub fn read_list_body<R: Read>(reader: &mut R) -> Result<Vec<u32>, ProtocolError> {
    let count = read_usize(reader)?;
    if count > MAX_RESPONSE_ITEMS {
        return Err(ProtocolError::ResponseTooLarge(count));
    }
    let mut ids = Vec::with_capacity(count);
    for _ in 0..count {
        ids.push(read_u32(reader)?);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn opcode_round_trip() {
        let opcodes = [
            OpCode::Connect,
            OpCode::Quit,
            OpCode::Create,
            OpCode::Reserve,
            OpCode::Show,
            OpCode::List,
        ];
        for op in opcodes {
            assert_eq!(OpCode::from_u8(op as u8), Some(op));
        }
    }

    #[test]
    fn opcode_invalid_byte() {
        assert!(OpCode::from_u8(0).is_none());
        assert!(OpCode::from_u8(7).is_none());
        assert!(OpCode::from_u8(0xFF).is_none());
    }

    #[test]
    fn connect_encode_has_fixed_size() {
        let msg = ConnectRequest::new("/tmp/req", "/tmp/resp").unwrap();
        let encoded = msg.encode();
        assert_eq!(encoded.len(), 2 + 2 * PIPE_PATH_MAX);
        assert_eq!(encoded[0], OpCode::Connect as u8);
        assert_eq!(encoded[encoded.len() - 1], 0);
    }

    #[test]
    fn connect_round_trip() {
        let msg = ConnectRequest::new("/tmp/req1", "/tmp/resp1").unwrap();
        let encoded = msg.encode();
        // The accept loop consumes the opcode before decoding the body.
        let mut cursor = Cursor::new(&encoded[1..]);
        let decoded = ConnectRequest::read_body_from(&mut cursor).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(cursor.position() as usize, encoded.len() - 1);
    }

    #[test]
    fn connect_rejects_long_path() {
        let long = "/tmp/".repeat(20);
        let result = ConnectRequest::new(&long, "/tmp/resp");
        assert!(matches!(result, Err(ProtocolError::PathTooLong(_))));
    }

    #[test]
    fn connect_rejects_embedded_nul() {
        let result = ConnectRequest::new("/tmp/re\0q", "/tmp/resp");
        assert!(matches!(result, Err(ProtocolError::PathEmbeddedNul)));
    }

    #[test]
    fn connect_path_at_limit() {
        // 39 bytes fits; 40 does not (room is needed for the padding NUL).
        let fits = "a".repeat(PIPE_PATH_MAX - 1);
        assert!(ConnectRequest::new(&fits, "/tmp/resp").is_ok());
        let too_long = "a".repeat(PIPE_PATH_MAX);
        assert!(ConnectRequest::new(&too_long, "/tmp/resp").is_err());
    }

    #[test]
    fn session_id_round_trip() {
        let mut buf = Vec::new();
        write_session_id(&mut buf, 7).unwrap();
        assert_eq!(read_session_id(&mut Cursor::new(&buf)).unwrap(), 7);

        let mut buf = Vec::new();
        write_session_id(&mut buf, SESSION_REFUSED).unwrap();
        assert_eq!(
            read_session_id(&mut Cursor::new(&buf)).unwrap(),
            SESSION_REFUSED
        );
    }

    fn request_round_trip(request: Request) {
        let encoded = request.encode();
        let decoded = Request::read_from(&mut Cursor::new(&encoded)).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn quit_round_trip() {
        request_round_trip(Request::Quit);
    }

    #[test]
    fn create_round_trip() {
        request_round_trip(Request::Create {
            event_id: 1,
            rows: 10,
            cols: 20,
        });
    }

    #[test]
    fn reserve_round_trip() {
        request_round_trip(Request::Reserve {
            event_id: 3,
            seats: vec![(1, 1), (1, 2), (4, 9)],
        });
    }

    #[test]
    fn reserve_empty_round_trip() {
        request_round_trip(Request::Reserve {
            event_id: 3,
            seats: vec![],
        });
    }

    #[test]
    fn show_round_trip() {
        request_round_trip(Request::Show { event_id: 42 });
    }

    #[test]
    fn list_round_trip() {
        request_round_trip(Request::List);
    }

    #[test]
    fn request_unknown_opcode() {
        let result = Request::read_from(&mut Cursor::new(&[0xABu8]));
        assert!(matches!(result, Err(ProtocolError::UnknownOpCode(0xAB))));
    }

    #[test]
    fn request_connect_on_session_channel() {
        let result = Request::read_from(&mut Cursor::new(&[OpCode::Connect as u8]));
        assert!(matches!(
            result,
            Err(ProtocolError::UnexpectedOpCode(OpCode::Connect))
        ));
    }

    #[test]
    fn request_truncated_payload() {
        // CREATE opcode followed by only two bytes of the event id.
        let result = Request::read_from(&mut Cursor::new(&[OpCode::Create as u8, 1, 0]));
        match result {
            Err(ProtocolError::Io(e)) => {
                assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof);
            }
            other => panic!("expected io error, got {:?}", other),
        }
    }

    #[test]
    fn reserve_rejects_huge_count() {
        let mut buf = BytesMut::new();
        buf.put_u8(OpCode::Reserve as u8);
        buf.put_slice(&1u32.to_ne_bytes());
        buf.put_slice(&(MAX_SEATS_PER_RESERVE + 1).to_ne_bytes());
        let result = Request::read_from(&mut Cursor::new(&buf[..]));
        assert!(matches!(result, Err(ProtocolError::TooManySeats(_))));
    }

    #[test]
    fn status_round_trip() {
        for code in [0, 1, -1, i32::MAX] {
            let mut buf = Vec::new();
            write_status(&mut buf, code).unwrap();
            assert_eq!(read_status(&mut Cursor::new(&buf)).unwrap(), code);
        }
    }

    #[test]
    fn show_body_round_trip() {
        let grid = SeatGrid {
            rows: 2,
            cols: 3,
            seats: vec![0, 1, 0, 2, 2, 0],
        };
        let mut buf = Vec::new();
        grid.write_body(&mut buf).unwrap();
        let decoded = SeatGrid::read_body(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(decoded, grid);
    }

    #[test]
    fn show_body_zero_grid_is_row_major() {
        let grid = SeatGrid {
            rows: 2,
            cols: 3,
            seats: vec![0; 6],
        };
        let mut buf = Vec::new();
        grid.write_body(&mut buf).unwrap();
        let decoded = SeatGrid::read_body(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(decoded.rows, 2);
        assert_eq!(decoded.cols, 3);
        assert_eq!(decoded.seats, vec![0, 0, 0, 0, 0, 0]);
        assert_eq!(decoded.seat(1, 1), Some(0));
        assert_eq!(decoded.seat(2, 3), Some(0));
        assert_eq!(decoded.seat(3, 1), None);
    }

    #[test]
    fn show_body_rejects_oversized_grid() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&usize::MAX.to_ne_bytes());
        buf.extend_from_slice(&2usize.to_ne_bytes());
        let result = SeatGrid::read_body(&mut Cursor::new(&buf));
        assert!(matches!(result, Err(ProtocolError::ResponseTooLarge(_))));
    }

    #[test]
    fn list_body_round_trip() {
        let ids = vec![1, 5, 9];
        let mut buf = Vec::new();
        write_list_body(&mut buf, &ids).unwrap();
        let decoded = read_list_body(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(decoded, ids);
    }

    #[test]
    fn list_body_empty() {
        let mut buf = Vec::new();
        write_list_body(&mut buf, &[]).unwrap();
        assert_eq!(buf.len(), std::mem::size_of::<usize>());
        let decoded = read_list_body(&mut Cursor::new(&buf)).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn seat_grid_lookup() {
        let grid = SeatGrid {
            rows: 2,
            cols: 2,
            seats: vec![1, 0, 0, 2],
        };
        assert_eq!(grid.seat(1, 1), Some(1));
        assert_eq!(grid.seat(1, 2), Some(0));
        assert_eq!(grid.seat(2, 2), Some(2));
        assert_eq!(grid.seat(0, 1), None);
        assert_eq!(grid.seat(1, 0), None);
    }
}
