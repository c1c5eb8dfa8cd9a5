mod common;
use common::*;

use sma_bridge::coordinator;
use sma_bridge::prelude::*;
use tokio::io::{duplex, AsyncWriteExt};

const START: u32 = 1_700_000_100;

fn samples(points: &[(u32, u64)]) -> Vec<u8> {
    points
        .iter()
        .flat_map(|(offset, total)| archive_sample(START + offset, *total))
        .collect()
}

#[tokio::test]
async fn archive_spans_records() -> Result<()> {
    let (client, mut server) = duplex(4096);

    let first = samples(&[(0, 1000), (300, 1100), (600, 1250)]);
    let second = samples(&[(900, 1300)]);
    server.write_all(&record_reply(12, &first)).await?;
    server.write_all(&record_reply(0, &second)).await?;

    let mut interpreter = interpreter(client)?;
    interpreter.run_command("getrangedata").await?;

    let archive = &interpreter.output().archive;
    assert_eq!(archive.len(), 4);

    assert_eq!(archive[0].timestamp, i64::from(START));
    assert_eq!(archive[0].instantaneous_value, 0.0);
    assert_eq!(archive[0].accumulated_total, 1.0);
    assert_eq!(archive[1].instantaneous_value, 1200.0);
    assert_eq!(archive[2].instantaneous_value, 1800.0);
    assert_eq!(archive[3].instantaneous_value, 600.0);
    assert_eq!(archive[3].accumulated_total, 1.3);

    assert_eq!(interpreter.stats().sequence_faults, 0);
    assert_eq!(interpreter.stats().archive_records, 4);
    Ok(())
}

#[tokio::test]
async fn gap_is_reported_but_kept() -> Result<()> {
    let (client, mut server) = duplex(4096);

    let data = samples(&[(0, 1000), (300, 1100), (1200, 1700)]);
    server.write_all(&record_reply(0, &data)).await?;

    let mut interpreter = interpreter(client)?;
    interpreter.run_command("getrangedata").await?;

    assert_eq!(interpreter.output().archive.len(), 3);
    assert_eq!(interpreter.stats().sequence_faults, 1);
    Ok(())
}

#[tokio::test]
async fn missing_continuation_fails_command() -> Result<()> {
    let (client, mut server) = duplex(4096);
    server.write_all(&record_reply(24, &samples(&[(0, 1000)]))).await?;

    let interpreter = interpreter(client)?;
    let (result, output, stats) = coordinator::run(interpreter, &["getrangedata".to_string()]).await;

    assert!(result.is_err());
    // what arrived before the failure is still handed back
    assert_eq!(output.archive.len(), 1);
    assert_eq!(stats.timeouts, 4);
    Ok(())
}

#[tokio::test]
async fn output_carries_identity() -> Result<()> {
    let (client, mut server) = duplex(4096);
    server.write_all(&login_reply([0x83, 0x00], 2_000_123_456, 0)).await?;
    server.write_all(&record_reply(0, &samples(&[(0, 1000)]))).await?;

    let interpreter = interpreter(client)?;
    let commands = vec!["login".to_string(), "getrangedata".to_string()];
    let (result, output, _) = coordinator::run(interpreter, &commands).await;

    result?;
    assert_eq!(output.serial, 2_000_123_456);
    assert_eq!(output.archive[0].serial, 2_000_123_456);
    // name not learned yet, records kept anyway
    assert_eq!(output.inverter_name, "");
    Ok(())
}
