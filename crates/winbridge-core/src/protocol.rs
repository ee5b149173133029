//! Typed control-pipe messages and packet framing.
//!
//! Every control packet is a u64 LE total length (including those 8 bytes)
//! followed by a u32 LE message kind and the kind's payload. Requests and
//! replies are strictly paired; replies are a single u32 word.

use std::fmt;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::{DecodeError, ReadBuf, WriteBuf};
use crate::keys::InputRecord;

/// Reply word for a successful request.
pub const STATUS_OK: u32 = 0;
/// Generic failure reply word.
pub const STATUS_ERROR: u32 = 1;
/// `GetExitCode` reply while the child has not exited (or never started).
pub const STILL_ACTIVE: u32 = 259;

/// Upper bound on a sane control packet. Anything larger is a protocol
/// violation, not a legitimate message.
pub const MAX_PACKET_LEN: u64 = 1 << 20;

mod kind {
    pub const PING: u32 = 0;
    pub const START_PROCESS: u32 = 1;
    pub const SET_SIZE: u32 = 2;
    pub const GET_EXIT_CODE: u32 = 3;
    pub const GET_PROCESS_ID: u32 = 4;
    pub const SET_CONSOLE_MODE: u32 = 5;
    pub const INPUT_RECORD: u32 = 6;
    pub const WINDOW_SIZE: u32 = 7;
}

/// A control-pipe message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Handshake probe; the agent answers with a zero word.
    Ping,
    /// Launch the child. `env` is the double-NUL environment block (empty
    /// means inherit); `desktop` names the desktop the child should use and
    /// travels opaquely.
    StartProcess {
        app: String,
        cmdline: String,
        cwd: String,
        env: String,
        desktop: String,
    },
    SetSize {
        cols: u32,
        rows: u32,
    },
    GetExitCode,
    GetProcessId,
    SetConsoleMode {
        mode: u32,
    },
    /// Older side-channel variant: a raw key event.
    InputRecord(InputRecord),
    /// Older side-channel variant of SetSize.
    WindowSize {
        cols: u32,
        rows: u32,
    },
}

/// Error while decoding a message out of a frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The kind word names no known message.
    UnknownKind(u32),
    /// The payload did not match the kind's schema.
    Malformed(DecodeError),
    /// The frame length was absurd or inconsistent.
    BadFrame(u64),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::UnknownKind(k) => write!(f, "unknown message kind {}", k),
            ProtocolError::Malformed(e) => write!(f, "malformed payload: {}", e),
            ProtocolError::BadFrame(len) => write!(f, "bad frame length {}", len),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<DecodeError> for ProtocolError {
    fn from(e: DecodeError) -> Self {
        ProtocolError::Malformed(e)
    }
}

impl Message {
    /// Wire kind word for this message.
    pub fn kind(&self) -> u32 {
        match self {
            Message::Ping => kind::PING,
            Message::StartProcess { .. } => kind::START_PROCESS,
            Message::SetSize { .. } => kind::SET_SIZE,
            Message::GetExitCode => kind::GET_EXIT_CODE,
            Message::GetProcessId => kind::GET_PROCESS_ID,
            Message::SetConsoleMode { .. } => kind::SET_CONSOLE_MODE,
            Message::InputRecord(_) => kind::INPUT_RECORD,
            Message::WindowSize { .. } => kind::WINDOW_SIZE,
        }
    }

    /// Encode into a complete frame, length prefix included.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WriteBuf::new();
        w.put_u64(0); // patched below
        w.put_u32(self.kind());
        match self {
            Message::Ping | Message::GetExitCode | Message::GetProcessId => {}
            Message::StartProcess {
                app,
                cmdline,
                cwd,
                env,
                desktop,
            } => {
                w.put_wstring(app);
                w.put_wstring(cmdline);
                w.put_wstring(cwd);
                w.put_wstring(env);
                w.put_wstring(desktop);
            }
            Message::SetSize { cols, rows } | Message::WindowSize { cols, rows } => {
                w.put_u32(*cols);
                w.put_u32(*rows);
            }
            Message::SetConsoleMode { mode } => {
                w.put_u32(*mode);
            }
            Message::InputRecord(rec) => {
                w.put_u32(rec.key_down as u32);
                w.put_u32(rec.repeat_count as u32);
                w.put_u32(rec.virtual_key as u32);
                w.put_u32(rec.unicode_char as u32);
                w.put_u32(rec.control_key_state);
            }
        }
        let total = w.len() as u64;
        w.patch_u64(0, total);
        w.into_vec()
    }

    /// Decode from a frame payload (the bytes after the length prefix).
    pub fn decode(payload: &[u8]) -> Result<Message, ProtocolError> {
        let mut r = ReadBuf::new(payload);
        let kind_word = r.get_u32()?;
        let msg = match kind_word {
            kind::PING => Message::Ping,
            kind::START_PROCESS => Message::StartProcess {
                app: r.get_wstring()?,
                cmdline: r.get_wstring()?,
                cwd: r.get_wstring()?,
                env: r.get_wstring()?,
                desktop: r.get_wstring()?,
            },
            kind::SET_SIZE => Message::SetSize {
                cols: r.get_u32()?,
                rows: r.get_u32()?,
            },
            kind::GET_EXIT_CODE => Message::GetExitCode,
            kind::GET_PROCESS_ID => Message::GetProcessId,
            kind::SET_CONSOLE_MODE => Message::SetConsoleMode { mode: r.get_u32()? },
            kind::INPUT_RECORD => {
                let key_down = r.get_u32()? != 0;
                let repeat_count = r.get_u32()? as u16;
                let virtual_key = r.get_u32()? as u16;
                let unicode_char = r.get_u32()? as u16;
                let control_key_state = r.get_u32()?;
                Message::InputRecord(InputRecord {
                    key_down,
                    repeat_count,
                    virtual_key,
                    unicode_char,
                    control_key_state,
                })
            }
            kind::WINDOW_SIZE => Message::WindowSize {
                cols: r.get_u32()?,
                rows: r.get_u32()?,
            },
            other => return Err(ProtocolError::UnknownKind(other)),
        };
        Ok(msg)
    }
}

// ========== Framed I/O ==========

/// Write one complete message frame.
pub async fn write_message<W>(w: &mut W, msg: &Message) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    w.write_all(&msg.encode()).await?;
    w.flush().await
}

/// Read one complete message frame. Returns `Ok(None)` on clean EOF at a
/// frame boundary; mid-frame EOF and framing violations are errors.
pub async fn read_message<R>(r: &mut R) -> std::io::Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 8];
    match r.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let total = u64::from_le_bytes(len_bytes);
    if total < 12 || total > MAX_PACKET_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            ProtocolError::BadFrame(total),
        ));
    }
    let mut payload = vec![0u8; (total - 8) as usize];
    r.read_exact(&mut payload).await?;
    Message::decode(&payload)
        .map(Some)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Write a bare u32 reply word.
pub async fn write_reply<W>(w: &mut W, word: u32) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    w.write_all(&word.to_le_bytes()).await?;
    w.flush().await
}

/// Read a bare u32 reply word.
pub async fn read_reply<R>(r: &mut R) -> std::io::Result<u32>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).await?;
    Ok(u32::from_le_bytes(buf))
}
