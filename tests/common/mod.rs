#![allow(dead_code)]

use sma_bridge::prelude::*;
use sma_bridge::script::{Interpreter, Script, Session, Settings};
use sma_bridge::telemetry::LabelMap;

use std::time::Duration;
use tokio::io::{AsyncReadExt, DuplexStream};

/// Inverter address in wire order, as `$ADDR` emits it.
pub const INVERTER: [u8; 6] = [0x53, 0xac, 0x1d, 0x25, 0x80, 0x00];
pub const MY_SUSY_ID: [u8; 2] = [0x78, 0x00];
pub const MY_SERIAL: [u8; 4] = [0x3a, 0x21, 0x3a, 0x3a];

pub const L2_SIGNATURE: [u8; 5] = [0x7e, 0xff, 0x03, 0x60, 0x65];

pub const SCRIPT: &str = "\
# replay fixture
:login
S 7E 00 00 00 $ADDR 00 00 00 00 00 00 01 00 7E FF 03 60 65 0E A0 FF FF FF FF FF FF 00 01 $MYSUSYID $MYSERIAL 00 01 00 00 00 00 $CNT 80 0C 04 FD FF 07 00 00 00 84 03 00 00 $PASSWORD $CRC 7E $END;
R 7E 00 00 00 $ADDR $END;
E $LOGIN $END;

:getspotacpower
S 7E 00 00 00 $ADDR 00 00 00 00 00 00 01 00 7E FF 03 60 65 09 A0 $SUSYID $SERIAL 00 00 $MYSUSYID $MYSERIAL 00 00 00 00 00 00 $CNT 80 00 02 00 51 00 3F 26 00 FF 3F 26 00 $CRC 7E $END;
R 7E 00 00 00 $ADDR $END;
E $POW $END;

:getrangedata
S 7E 00 00 00 $ADDR 00 00 00 00 00 00 01 00 7E FF 03 60 65 09 E0 $SUSYID $SERIAL 00 00 $MYSUSYID $MYSERIAL 00 00 00 00 00 00 $CNT 80 00 02 00 70 $TIMEFROM1 $TIMETO1 $CRC 7E $END;
R 7E 00 00 00 $ADDR $END;
E $ARCHIVEDATA1 $END;

:gettime
S 7E 00 00 00 $ADDR 00 00 00 00 00 00 01 00 7E FF 03 60 65 10 A0 FF FF FF FF FF FF 00 00 $MYSUSYID $MYSERIAL 00 00 00 00 00 00 $CNT 80 00 02 00 F0 00 6D 23 00 00 6D 23 00 $CRC 7E $END;
R 7E 00 00 00 $ADDR $END;
E $TIMESTRING $END;

: logoff
S 7E 00 00 00 $ADDR 00 00 00 00 00 00 01 00 7E FF 03 60 65 08 A0 FF FF FF FF FF FF 00 03 $MYSUSYID $MYSERIAL 00 03 00 00 00 00 $CNT 80 0E 01 FD FF FF FF FF FF $CRC 7E $END;

:unit conversions
40 26 \"Total Power\" \"Watts\" 0 28 4 0
80 46 \"Voltage Phase 1\" \"Volts\" 2 28 4 0
:end unit conversions
";

pub fn settings() -> Settings {
    Settings {
        read_timeout: Duration::from_millis(200),
        retry_delay: Duration::from_millis(10),
        ..Settings::default()
    }
}

pub fn session() -> Session {
    Session::new(INVERTER, "0000", UnixTime(1_700_000_000), UnixTime(1_700_003_000))
        .with_identity(MY_SUSY_ID, MY_SERIAL)
}

pub fn interpreter(client: DuplexStream) -> Result<Interpreter<DuplexStream>> {
    interpreter_with(client, settings())
}

pub fn interpreter_with(client: DuplexStream, settings: Settings) -> Result<Interpreter<DuplexStream>> {
    let script: Script = SCRIPT.parse()?;
    let keys: KeyTable = SCRIPT.parse()?;
    Ok(Interpreter::new(
        Transport::new(client),
        script,
        keys,
        Box::new(LabelMap::default()),
        session(),
        settings,
    ))
}

/// Fills in the header of a complete unescaped frame (marker at 0, `7e` at
/// the end) so its length and checkbit are consistent.
pub fn finish(mut frame: Vec<u8>) -> Vec<u8> {
    frame[0] = 0x7e;
    frame[1] = frame.len() as u8;
    frame[2] = 0x00;
    frame[3] = frame[0] ^ frame[1] ^ frame[2];
    frame
}

/// A reply from the inverter: source address at 4, L2 packet from 18.
pub fn reply(len: usize) -> Vec<u8> {
    let mut frame = vec![0u8; len];
    frame[4..10].copy_from_slice(&INVERTER);
    frame[18..23].copy_from_slice(&L2_SIGNATURE);
    frame[len - 1] = 0x7e;
    frame
}

pub fn login_reply(susy_id: [u8; 2], serial: u32, date: u32) -> Vec<u8> {
    let mut frame = reply(66);
    frame[33..35].copy_from_slice(&susy_id);
    frame[35..39].copy_from_slice(&serial.to_le_bytes());
    frame[59..63].copy_from_slice(&date.to_le_bytes());
    finish(frame)
}

/// First (and only) frame of a record: `togo` at 43, payload from 59, then
/// two FCS bytes and the marker.
pub fn record_reply(togo: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = reply(59);
    frame[43..45].copy_from_slice(&togo.to_le_bytes());
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&[0x00, 0x00, 0x7e]);
    finish(frame)
}

/// Reply to a time request: marker at 60, time string from 63.
pub fn time_reply(marker: [u8; 2], inverter_time: u32) -> Vec<u8> {
    let mut frame = reply(90);
    frame[60..62].copy_from_slice(&marker);
    frame[63..67].copy_from_slice(&inverter_time.to_le_bytes());
    frame[79..83].copy_from_slice(&[0x11, 0x22, 0x33, 0x44]);
    finish(frame)
}

pub fn no_data_reply() -> Vec<u8> {
    let mut frame = reply(40);
    frame[32] = 0xe0;
    finish(frame)
}

pub fn sub_record(gap: usize, key1: u8, key2: u8, tag: u8, timestamp: u32, value: &[u8]) -> Vec<u8> {
    let mut r = vec![0x01, key1, key2, tag];
    r.extend_from_slice(&timestamp.to_le_bytes());
    r.extend_from_slice(value);
    r.resize(gap, 0);
    r
}

pub fn archive_sample(timestamp: u32, total: u64) -> Vec<u8> {
    let mut s = timestamp.to_le_bytes().to_vec();
    s.extend_from_slice(&total.to_le_bytes());
    s
}

/// Reads one frame the interpreter wrote, using its header length.
pub async fn read_sent(server: &mut DuplexStream) -> Result<Vec<u8>> {
    let mut frame = vec![0u8; 4];
    server.read_exact(&mut frame).await?;
    let len = frame[1] as usize;
    frame.resize(len, 0);
    server.read_exact(&mut frame[4..]).await?;
    Ok(frame)
}
