mod common;
use common::*;

use sma_bridge::prelude::*;
use sma_bridge::script::Settings;
use tokio::io::{duplex, AsyncWriteExt};

const SUSY_ID: [u8; 2] = [0x83, 0x00];
const SERIAL: u32 = 2_000_123_456;

async fn replay_login() -> Result<(u32, [u8; 2], Vec<u8>)> {
    let (client, mut server) = duplex(4096);
    server.write_all(&login_reply(SUSY_ID, SERIAL, 1_700_000_000)).await?;

    let mut interpreter = interpreter(client)?;
    assert!(interpreter.run_command("login").await?);

    let sent = read_sent(&mut server).await?;
    let session = interpreter.session();
    Ok((session.serial, session.susy_id, sent))
}

#[tokio::test]
async fn login_extracts_serial() -> Result<()> {
    let (serial, susy_id, _) = replay_login().await?;
    assert_eq!(serial, SERIAL);
    assert_eq!(susy_id, SUSY_ID);
    Ok(())
}

#[tokio::test]
async fn replay_is_deterministic() -> Result<()> {
    let first = replay_login().await?;
    for _ in 0..3 {
        assert_eq!(replay_login().await?, first);
    }
    Ok(())
}

#[tokio::test]
async fn login_frame_is_sealed() -> Result<()> {
    let (_, _, sent) = replay_login().await?;

    codec::validate_header(&sent[..4])?;
    assert_eq!(sent[1] as usize, sent.len());
    assert_eq!(*sent.last().unwrap(), 0x7e);
    assert_eq!(&sent[4..10], &INVERTER);

    let mut frame = sent[..codec::ESCAPE_FROM].to_vec();
    frame.extend(codec::unescape(&sent[codec::ESCAPE_FROM..sent.len() - 1])?);
    let fcs_at = frame.len() - 2;
    let fcs = u16::from_le_bytes([frame[fcs_at], frame[fcs_at + 1]]);
    assert_eq!(codec::checksum(&frame[codec::ESCAPE_FROM..fcs_at]), fcs);

    // MYSUSYID, MYSERIAL, then password "0000" padded to 12
    let password = [0xb8, 0xb8, 0xb8, 0xb8, 0x88, 0x88, 0x88, 0x88, 0x88, 0x88, 0x88, 0x88];
    let at = frame
        .windows(password.len())
        .position(|w| w == password)
        .expect("password bytes in frame");
    assert_eq!(at, fcs_at - password.len());
    Ok(())
}

#[tokio::test]
async fn unmatched_reply_is_skipped() -> Result<()> {
    let (client, mut server) = duplex(4096);

    let mut stranger = login_reply(SUSY_ID, 1, 0);
    stranger[4] ^= 0x01;
    let stranger = finish(stranger);
    server.write_all(&stranger).await?;
    server.write_all(&login_reply(SUSY_ID, SERIAL, 0)).await?;

    let mut interpreter = interpreter(client)?;
    interpreter.run_command("login").await?;

    assert_eq!(interpreter.session().serial, SERIAL);
    assert_eq!(interpreter.stats().frames_received, 2);
    Ok(())
}

#[tokio::test]
async fn corrupted_reply_counts_once() -> Result<()> {
    let (client, mut server) = duplex(4096);

    let mut corrupted = login_reply(SUSY_ID, 1, 0);
    corrupted[3] ^= 0xff;
    server.write_all(&corrupted).await?;
    server.write_all(&login_reply(SUSY_ID, SERIAL, 0)).await?;

    let mut interpreter = interpreter(client)?;
    assert!(interpreter.run_command("login").await?);

    assert_eq!(interpreter.session().serial, SERIAL);
    assert_eq!(interpreter.stats().checksum_faults, 1);
    assert_eq!(interpreter.stats().frames_received, 1);
    assert_eq!(interpreter.stats().timeouts, 0);
    Ok(())
}

#[tokio::test]
async fn stale_reply_is_drained_before_send() -> Result<()> {
    let (client, mut server) = duplex(4096);
    server.write_all(&login_reply(SUSY_ID, 1, 0)).await?;

    let inverter = tokio::spawn(async move {
        let sent = read_sent(&mut server).await?;
        server.write_all(&login_reply(SUSY_ID, SERIAL, 0)).await?;
        Ok::<_, anyhow::Error>((server, sent))
    });

    let settings = Settings {
        drain_from_line: 0,
        ..settings()
    };
    let mut interpreter = interpreter_with(client, settings)?;
    assert!(interpreter.run_command("login").await?);

    let (_server, sent) = inverter.await??;
    assert_eq!(&sent[4..10], &INVERTER);
    assert_eq!(interpreter.session().serial, SERIAL);
    // the stale reply was read and discarded, not matched
    assert_eq!(interpreter.stats().frames_received, 2);
    Ok(())
}
