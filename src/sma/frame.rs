use crate::prelude::*;
use crate::sma::codec::{self, FrameHeader, FRAME_MARKER, HEADER_LEN};

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

/// Signature of an embedded L2 packet, at offset 18 of the frame.
const L2_SIGNATURE: [u8; 5] = [0x7e, 0xff, 0x03, 0x60, 0x65];
const L2_OFFSET: usize = 18;
const L2_STATUS_OFFSET: usize = 32;

/// Status byte the inverter uses when it has nothing for the request.
pub const STATUS_NO_DATA: u8 = 0xe0;

// Frame {{{
/// One received frame: header plus unescaped body, offsets as on the wire.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    bytes: Vec<u8>,
    raw: Bytes,
    terminated: bool,
}

impl Frame {
    /// Builds a frame from its raw wire form (as cut by [`FrameCodec`]).
    pub fn decode(raw: Bytes) -> Result<Self> {
        if raw.len() < HEADER_LEN {
            return Err(Fault::Header(format!("frame of {} bytes has no header", raw.len())).into());
        }

        let header = FrameHeader::decode(&raw[..HEADER_LEN])?;
        header.validate()?;

        let terminated = raw.last() == Some(&FRAME_MARKER) && raw.len() > HEADER_LEN;

        let mut bytes = header.to_bytes().to_vec();
        bytes.extend(codec::unescape(&raw[HEADER_LEN..])?);
        codec::fix_length_received(&mut bytes);

        Ok(Self {
            bytes,
            raw,
            terminated,
        })
    }

    /// Wraps already-unescaped bytes; used when replaying captured frames.
    pub fn from_unescaped(bytes: Vec<u8>, terminated: bool) -> Self {
        Self {
            raw: Bytes::from(bytes.clone()),
            bytes,
            terminated,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.bytes.get(offset..offset + len).ok_or_else(|| {
            anyhow!(
                "read of {} bytes at offset {} past end of {} byte frame",
                len,
                offset,
                self.bytes.len()
            )
        })
    }

    pub fn byte(&self, offset: usize) -> Result<u8> {
        Ok(self.slice(offset, 1)?[0])
    }

    pub fn le_u16(&self, offset: usize) -> Result<u16> {
        let b = self.slice(offset, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn le_u32(&self, offset: usize) -> Result<u32> {
        let b = self.slice(offset, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read status of the embedded L2 packet, if this frame carries one.
    pub fn status(&self) -> Option<u8> {
        let signature = self.bytes.get(L2_OFFSET..L2_OFFSET + L2_SIGNATURE.len())?;
        if signature != L2_SIGNATURE {
            return None;
        }
        self.bytes.get(L2_STATUS_OFFSET).copied()
    }
} // }}}

// FrameCodec {{{
/// Cuts raw frames out of the byte stream using the declared header length.
#[derive(Debug, Default)]
pub struct FrameCodec;

impl FrameCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = anyhow::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match src.iter().position(|b| *b == FRAME_MARKER) {
            Some(0) => {}
            Some(skip) => {
                warn!("discarding {} bytes before frame marker", skip);
                src.advance(skip);
            }
            None => {
                if !src.is_empty() {
                    warn!("discarding {} bytes without frame marker", src.len());
                    src.clear();
                }
                return Ok(None);
            }
        }

        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let header = FrameHeader::decode(&src[..HEADER_LEN])?;
        let len = header.length as usize;
        if let Err(fault) = header.validate() {
            skip_rejected(src, len);
            return Err(fault.into());
        }

        if len <= HEADER_LEN {
            skip_rejected(src, len);
            return Err(Fault::Header(format!("declared length {} leaves no body", len)).into());
        }

        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        Ok(Some(src.split_to(len).freeze()))
    }
}

/// Drops a rejected frame. The whole declared length goes when it is
/// buffered and ends on a marker, otherwise only the leading marker so the
/// next scan can find the following frame.
fn skip_rejected(src: &mut BytesMut, len: usize) {
    if len > HEADER_LEN && src.len() >= len && src[len - 1] == FRAME_MARKER {
        src.advance(len);
    } else {
        src.advance(1);
    }
} // }}}
