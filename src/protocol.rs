//! The wire protocol spoken over the per-session UNIX socket.
//!
//! Every message is a 5-byte header (1 byte type, 4 byte big-endian
//! payload length) followed by the payload. There is a single choke
//! point for writing a frame ([`Message::write_to`]) so that partial
//! writes under both blocking and non-blocking fds are handled in one
//! place instead of scattering bespoke write loops across callers.
use std::io::{self, Read, Write};

use anyhow::{anyhow, Context, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::consts;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    Data,
    Winch,
    Detach,
    Exit,
    Hello,
}

impl MsgType {
    fn code(self) -> u8 {
        match self {
            MsgType::Data => 0x01,
            MsgType::Winch => 0x02,
            MsgType::Detach => 0x03,
            MsgType::Exit => 0x04,
            MsgType::Hello => 0x05,
        }
    }

    fn from_code(code: u8) -> Option<MsgType> {
        match code {
            0x01 => Some(MsgType::Data),
            0x02 => Some(MsgType::Winch),
            0x03 => Some(MsgType::Detach),
            0x04 => Some(MsgType::Exit),
            0x05 => Some(MsgType::Hello),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub ty: MsgType,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn data(bytes: &[u8]) -> Message {
        Message { ty: MsgType::Data, payload: bytes.to_vec() }
    }

    pub fn winch(cols: u16, rows: u16) -> Message {
        let mut payload = Vec::with_capacity(4);
        payload.write_u16::<BigEndian>(cols).unwrap();
        payload.write_u16::<BigEndian>(rows).unwrap();
        Message { ty: MsgType::Winch, payload }
    }

    pub fn hello(cols: u16, rows: u16) -> Message {
        let mut m = Message::winch(cols, rows);
        m.ty = MsgType::Hello;
        m
    }

    pub fn detach() -> Message {
        Message { ty: MsgType::Detach, payload: Vec::new() }
    }

    pub fn exit(code: u8) -> Message {
        Message { ty: MsgType::Exit, payload: vec![code] }
    }

    /// Parses a 4-byte big-endian (cols, rows) payload, as carried by
    /// both HELLO and WINCH.
    pub fn window_size(&self) -> Result<(u16, u16)> {
        if self.payload.len() != 4 {
            return Err(anyhow!(
                "expected a 4 byte window-size payload, got {} bytes",
                self.payload.len()
            ));
        }
        let mut cursor = &self.payload[..];
        let cols = cursor.read_u16::<BigEndian>().context("reading cols")?;
        let rows = cursor.read_u16::<BigEndian>().context("reading rows")?;
        Ok((cols, rows))
    }

    /// The single choke point for writing a frame. Correct for both
    /// blocking sockets (client receive-timeout writes) and non-blocking
    /// ones (never used for writes in this implementation, but kept
    /// generic over any `Write` so tests can target an in-memory buffer).
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u8(self.ty.code()).context("writing frame type")?;
        w.write_u32::<BigEndian>(self.payload.len() as u32)
            .context("writing frame length")?;
        w.write_all(&self.payload).context("writing frame payload")?;
        Ok(())
    }

    /// Reads exactly one frame. A decode failure (bad type, oversized
    /// payload, truncated stream) is reported as an error; the caller is
    /// responsible for treating that as cause to detach the connection.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Message> {
        let code = match r.read_u8() {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(anyhow!("connection closed before a frame header arrived"));
            }
            Err(e) => return Err(e).context("reading frame type"),
        };
        let ty = MsgType::from_code(code).ok_or_else(|| anyhow!("unknown frame type {}", code))?;

        let len = r.read_u32::<BigEndian>().context("reading frame length")?;
        if len > consts::MAX_PAYLOAD {
            return Err(anyhow!("frame payload of {} bytes exceeds the {} byte limit", len, consts::MAX_PAYLOAD));
        }

        let mut payload = vec![0u8; len as usize];
        r.read_exact(&mut payload).context("reading frame payload")?;

        Ok(Message { ty, payload })
    }
}
