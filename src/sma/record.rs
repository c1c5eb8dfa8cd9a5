use crate::prelude::*;

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// Offset of the little-endian count of record bytes still to arrive.
pub const TOGO_OFFSET: usize = 43;
/// Payload start in the first frame of a record.
pub const FIRST_PAYLOAD_OFFSET: usize = 59;
/// Payload start in continuation frames.
pub const CONTINUATION_OFFSET: usize = 18;
/// A terminated frame ends with FCS (2 bytes) and the marker.
const TRAILER_LEN: usize = 3;

pub const MAX_RECORD_LEN: usize = 500;

/// One logical record reassembled from one or more frames.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Record {
    pub togo: u16,
    pub data: Vec<u8>,
}

/// Bytes of `frame` that belong to the record, starting at `offset`.
fn payload(frame: &Frame, offset: usize) -> &[u8] {
    let bytes = frame.as_bytes();
    let end = if frame.is_terminated() {
        bytes.len().saturating_sub(TRAILER_LEN)
    } else {
        bytes.len()
    };
    bytes.get(offset..end).unwrap_or(&[])
}

/// Reassembles the record starting in `first`, pulling continuation frames
/// from `transport` until a terminated one arrives. Returns the record and
/// the last frame read.
pub async fn read_record<C>(
    transport: &mut Transport<C>,
    first: Frame,
    wait: Duration,
) -> Result<(Record, Frame)>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    let togo = first.le_u16(TOGO_OFFSET)?;
    debug!("togo={}", togo);

    let mut data = Vec::new();
    let mut frame = first;
    let mut offset = FIRST_PAYLOAD_OFFSET;

    loop {
        data.extend_from_slice(payload(&frame, offset));
        if data.len() > MAX_RECORD_LEN {
            return Err(Fault::RecordOverflow(MAX_RECORD_LEN).into());
        }

        if frame.is_terminated() {
            break;
        }

        frame = transport.read_frame(wait).await?;
        if !data.is_empty() {
            offset = CONTINUATION_OFFSET;
        }
    }

    debug!("record len={} data={}", data.len(), codec::hex(&data));
    Ok((Record { togo, data }, frame))
}
