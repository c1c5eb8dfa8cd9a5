use crate::prelude::*;

use nom_derive::{Nom, Parse};

pub const FRAME_MARKER: u8 = 0x7e;
pub const ESCAPE: u8 = 0x7d;
pub const HEADER_LEN: usize = 4;

/// Header and address fields before this offset are never escaped and are
/// not covered by the FCS.
pub const ESCAPE_FROM: usize = 19;

const ESCAPED_BYTES: [u8; 5] = [0x7d, 0x7e, 0x11, 0x12, 0x13];

// Vendor-specific (length -> checkbit) pairs applied when a received frame
// is shorter than its header claims. Not derivable from the XOR rule.
const CHECKBIT_REMAP: [(u8, u8); 4] = [(0x52, 0x2c), (0x5a, 0x24), (0x66, 0x1a), (0x6a, 0x14)];

// FrameHeader {{{
#[derive(Clone, Copy, Debug, Eq, PartialEq, Nom)]
pub struct FrameHeader {
    pub marker: u8,
    pub length: u8,
    pub length_echo: u8,
    pub checkbit: u8,
}

impl FrameHeader {
    pub fn decode(input: &[u8]) -> Result<Self> {
        match FrameHeader::parse(input) {
            Ok((_, header)) => Ok(header),
            Err(_) => Err(Fault::Header(format!("need {} bytes, got {}", HEADER_LEN, input.len())).into()),
        }
    }

    pub fn expected_checkbit(&self) -> u8 {
        self.marker ^ self.length ^ self.length_echo
    }

    pub fn validate(&self) -> Result<(), Fault> {
        if self.checkbit != self.expected_checkbit() {
            return Err(Fault::Checksum {
                header: self.to_bytes(),
            });
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        [self.marker, self.length, self.length_echo, self.checkbit]
    }
} // }}}

pub fn validate_header(header: &[u8]) -> Result<()> {
    FrameHeader::decode(header)?.validate()?;
    Ok(())
}

/// Escapes every reserved byte at or after `from_offset`.
pub fn escape(body: &[u8], from_offset: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 8);
    for (i, &byte) in body.iter().enumerate() {
        if i >= from_offset && ESCAPED_BYTES.contains(&byte) {
            out.push(ESCAPE);
            out.push(byte ^ 0x20);
        } else {
            out.push(byte);
        }
    }
    out
}

pub fn unescape(raw: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(raw.len());
    let mut iter = raw.iter();
    while let Some(&byte) = iter.next() {
        if byte != ESCAPE {
            out.push(byte);
            continue;
        }
        match iter.next().copied() {
            Some(0x5e) => out.push(0x7e),
            Some(0x5d) => out.push(0x7d),
            Some(next) => out.push(next ^ 0x20),
            None => return Err(Fault::Framing("escape byte at end of frame".to_string()).into()),
        }
    }
    Ok(out)
}

/// PPP FCS-16 (CRC-16/X-25): reflected 0x1021, seed 0xffff, complemented.
pub fn checksum(region: &[u8]) -> u16 {
    crc16::State::<crc16::X_25>::calculate(region)
}

/// Closes an outgoing frame body: appends the FCS over everything from
/// [`ESCAPE_FROM`], escapes, then fixes the header length to leave room for
/// the trailing marker the script appends next.
pub fn seal(frame: &mut Vec<u8>) -> Result<()> {
    if frame.len() < ESCAPE_FROM {
        bail!(
            "frame of {} bytes too short for checksum region at {}",
            frame.len(),
            ESCAPE_FROM
        );
    }

    let fcs = checksum(&frame[ESCAPE_FROM..]);
    frame.extend_from_slice(&fcs.to_le_bytes());
    *frame = escape(frame, ESCAPE_FROM);
    fix_length_send(frame)
}

pub fn fix_length_send(frame: &mut [u8]) -> Result<()> {
    if frame.len() < HEADER_LEN {
        return Err(Fault::Header(format!("frame of {} bytes has no header", frame.len())).into());
    }

    let wire_len = u8::try_from(frame.len() + 1)
        .map_err(|_| Fault::Framing(format!("frame of {} bytes exceeds 255", frame.len() + 1)))?;

    if frame[1] != wire_len {
        frame[1] = wire_len;
        frame[3] = frame[0] ^ frame[1] ^ frame[2];
    }
    Ok(())
}

/// Rewrites the header of an unescaped received frame whose declared length
/// disagrees with what was decoded.
pub fn fix_length_received(frame: &mut [u8]) {
    if frame.len() < HEADER_LEN {
        return;
    }
    let actual = match u8::try_from(frame.len()) {
        Ok(len) => len,
        Err(_) => return,
    };

    if frame[1] == actual || frame[3] == 0x13 || frame[3] == 0x14 {
        return;
    }

    debug!("length change from 0x{:02x} to 0x{:02x}", frame[1], actual);
    frame[1] = actual;
    match CHECKBIT_REMAP.iter().find(|(len, _)| *len == actual) {
        Some((_, checkbit)) => frame[3] = *checkbit,
        None => warn!("no checkbit remap for length 0x{:02x}, header left as is", actual),
    }
}

pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_with(tail: &[u8]) -> Vec<u8> {
        let mut body: Vec<u8> = (0..ESCAPE_FROM as u8).collect();
        body.extend_from_slice(tail);
        body
    }

    #[test]
    fn escape_round_trip() {
        let body = body_with(&[0x01, 0x7d, 0x7e, 0x11, 0x12, 0x13, 0xff, 0x20]);
        let escaped = escape(&body, ESCAPE_FROM);
        assert_eq!(escaped.len(), body.len() + 5);
        assert_eq!(unescape(&escaped).unwrap(), body);
    }

    #[test]
    fn escape_leaves_header_region_alone() {
        // 0x11..0x13 sit inside the first 19 bytes and must pass through
        let body = body_with(&[]);
        assert_eq!(escape(&body, ESCAPE_FROM), body);
    }

    #[test]
    fn escape_encoding() {
        let escaped = escape(&body_with(&[0x7e, 0x7d]), ESCAPE_FROM);
        assert_eq!(&escaped[ESCAPE_FROM..], &[0x7d, 0x5e, 0x7d, 0x5d]);
    }

    #[test]
    fn unescape_generic_xor() {
        assert_eq!(unescape(&[0x7d, 0x31, 0x41]).unwrap(), vec![0x11, 0x41]);
    }

    #[test]
    fn unescape_rejects_dangling_escape() {
        let err = unescape(&[0x01, 0x7d]).unwrap_err();
        assert!(matches!(err.downcast_ref::<Fault>(), Some(Fault::Framing(_))));
    }

    #[test]
    fn checksum_vectors() {
        // CRC-16/X-25 check value
        assert_eq!(checksum(b"123456789"), 0x906e);
        // seed 0xffff complemented
        assert_eq!(checksum(&[]), 0x0000);
        assert_eq!(checksum(b"123456789"), checksum(b"123456789"));
    }

    #[test]
    fn checksum_good_fcs_residue() {
        // PPP receivers see 0xf0b8 before the final complement
        let mut data = b"\x01\x02\x03\x04hello".to_vec();
        let fcs = checksum(&data);
        data.extend_from_slice(&fcs.to_le_bytes());
        assert_eq!(checksum(&data), 0xf0b8 ^ 0xffff);
    }

    #[test]
    fn header_validation() {
        let header = [0x7e, 0x1f, 0x00, 0x7e ^ 0x1f];
        assert!(validate_header(&header).is_ok());

        for i in 0..4 {
            let mut mutated = header;
            mutated[i] ^= 0x01;
            assert!(validate_header(&mutated).is_err(), "byte {} flipped", i);
        }
    }

    #[test]
    fn header_too_short() {
        let err = validate_header(&[0x7e, 0x10]).unwrap_err();
        assert!(matches!(err.downcast_ref::<Fault>(), Some(Fault::Header(_))));
    }

    #[test]
    fn seal_appends_fcs_and_length() {
        let mut frame = vec![0x7e, 0x00, 0x00, 0x00];
        frame.extend_from_slice(&[0u8; 15]);
        frame.extend_from_slice(&[0x7e, 0xff, 0x03]);

        let fcs = checksum(&[0x7e, 0xff, 0x03]);
        seal(&mut frame).unwrap();

        // the 0x7e at offset 19 gets escaped
        assert_eq!(&frame[19..21], &[0x7d, 0x5e]);
        assert_eq!(frame[1] as usize, frame.len() + 1);
        assert_eq!(frame[3], frame[0] ^ frame[1] ^ frame[2]);

        let region = unescape(&frame[ESCAPE_FROM..]).unwrap();
        assert_eq!(&region[..3], &[0x7e, 0xff, 0x03]);
        assert_eq!(&region[3..], &fcs.to_le_bytes());
    }

    #[test]
    fn seal_rejects_short_frame() {
        let mut frame = vec![0x7e, 0x00, 0x00, 0x7e];
        assert!(seal(&mut frame).is_err());
    }

    #[test]
    fn fix_length_received_remaps_known_sizes() {
        let mut frame = vec![0u8; 0x52];
        frame[0] = 0x7e;
        frame[1] = 0x60;
        frame[3] = 0x1e;
        fix_length_received(&mut frame);
        assert_eq!(frame[1], 0x52);
        assert_eq!(frame[3], 0x2c);
    }

    #[test]
    fn fix_length_received_keeps_unknown_checkbit() {
        let mut frame = vec![0u8; 0x30];
        frame[0] = 0x7e;
        frame[1] = 0x40;
        frame[3] = 0x3e;
        fix_length_received(&mut frame);
        assert_eq!(frame[1], 0x30);
        assert_eq!(frame[3], 0x3e);
    }

    #[test]
    fn fix_length_received_skips_status_checkbits() {
        let mut frame = vec![0u8; 0x52];
        frame[1] = 0x60;
        frame[3] = 0x13;
        fix_length_received(&mut frame);
        assert_eq!(frame[1], 0x60);
    }
}
