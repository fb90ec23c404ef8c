use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// First ID of the custom command space.
pub const CUSTOM_ID_FIRST: u16 = 0xF100;
/// Last ID of the custom command space.
pub const CUSTOM_ID_LAST: u16 = 0xFFFF;

/// Returns true if `id` lies in the custom command space.
pub fn is_custom_id(id: u16) -> bool {
    id >= CUSTOM_ID_FIRST
}

/// Standard-space request body: `[commandId u8][payload]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardRequest {
    pub command: u8,
    pub payload: Bytes,
}

impl StandardRequest {
    pub fn new(command: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            command,
            payload: payload.into(),
        }
    }

    pub fn decode(body: &Bytes) -> Result<Self> {
        let Some(&command) = body.first() else {
            return Err(FrameError::ShortBody { len: 0, needed: 1 });
        };
        Ok(Self {
            command,
            payload: body.slice(1..),
        })
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(1 + self.payload.len());
        dst.put_u8(self.command);
        dst.put_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// Standard-space reply body: `[commandId u8][resultLength u8][result]`.
///
/// Every accepted standard command produces exactly one of these, even when
/// the result is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardReply {
    pub command: u8,
    pub result: Bytes,
}

impl StandardReply {
    pub fn new(command: u8, result: impl Into<Bytes>) -> Self {
        Self {
            command,
            result: result.into(),
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        let len = u8::try_from(self.result.len()).map_err(|_| FrameError::ResultTooLong {
            len: self.result.len(),
        })?;
        dst.reserve(2 + self.result.len());
        dst.put_u8(self.command);
        dst.put_u8(len);
        dst.put_slice(&self.result);
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode a reply, checking the declared length against the body.
    pub fn decode(body: &Bytes) -> Result<Self> {
        if body.len() < 2 {
            return Err(FrameError::ShortBody {
                len: body.len(),
                needed: 2,
            });
        }
        let command = body[0];
        let len = body[1] as usize;
        if body.len() < 2 + len {
            return Err(FrameError::Truncated {
                wanted: len,
                remaining: body.len() - 2,
            });
        }
        Ok(Self {
            command,
            result: body.slice(2..2 + len),
        })
    }
}

/// Custom-space request body: `[commandId u16 BE][payload]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomRequest {
    pub id: u16,
    pub payload: Bytes,
}

impl CustomRequest {
    pub fn new(id: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }

    pub fn decode(body: &Bytes) -> Result<Self> {
        if body.len() < 2 {
            return Err(FrameError::ShortBody {
                len: body.len(),
                needed: 2,
            });
        }
        Ok(Self {
            id: u16::from_be_bytes([body[0], body[1]]),
            payload: body.slice(2..),
        })
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(2 + self.payload.len());
        dst.put_u16(self.id);
        dst.put_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}
