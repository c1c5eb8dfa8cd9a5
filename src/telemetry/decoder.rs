use crate::prelude::*;
use crate::telemetry::{keys::ValueFormat, LabelLookup};

use nom_derive::{Nom, Parse};

/// Width of a spot value when the key table does not say otherwise.
const DEFAULT_VALUE_LEN: usize = 3;
/// Value field offset inside a sub-record.
const VALUE_OFFSET: usize = 8;
/// Archive samples: 4-byte timestamp then 8-byte running total.
const ARCHIVE_SAMPLE_LEN: usize = 12;
pub const ARCHIVE_INTERVAL: u32 = 300;

/// Key pair that names the inverter when decoded as a label.
const INVERTER_NAME_KEY: (u8, u8) = (0x20, 0x82);

// SubRecordHeader {{{
#[derive(Clone, Copy, Debug, Eq, PartialEq, Nom)]
#[nom(LittleEndian)]
pub struct SubRecordHeader {
    pub lead: u8,
    pub key1: u8,
    pub key2: u8,
    pub tag: u8,
    pub timestamp: u32,
}

impl SubRecordHeader {
    pub fn decode(input: &[u8]) -> Option<Self> {
        SubRecordHeader::parse(input).ok().map(|(_, header)| header)
    }
} // }}}

/// Sub-record size for the tag byte at offset 3 of a spot payload.
pub fn gap_for_tag(tag: u8) -> Option<usize> {
    match tag {
        0x08 | 0x10 => Some(40),
        0x40 | 0x00 => Some(28),
        _ => None,
    }
}

/// An all-0xff field carries no value.
pub fn is_null(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| *b == 0xff)
}

/// Little-endian unsigned value of up to 8 bytes; null decodes to 0.
pub fn le_value(bytes: &[u8]) -> u64 {
    if is_null(bytes) {
        return 0;
    }
    bytes
        .iter()
        .take(8)
        .enumerate()
        .fold(0u64, |acc, (i, b)| acc | (u64::from(*b) << (8 * i)))
}

/// Text field with zero bytes dropped; null decodes to "".
pub fn le_text(bytes: &[u8]) -> String {
    if is_null(bytes) {
        return String::new();
    }
    let kept: Vec<u8> = bytes.iter().copied().filter(|b| *b != 0).collect();
    String::from_utf8_lossy(&kept).into_owned()
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecodeOutcome {
    pub records: Vec<TelemetryRecord>,
    pub unknown_keys: Vec<(u8, u8)>,
    pub inverter_name: Option<String>,
}

impl DecodeOutcome {
    fn unknown(&mut self, header: &SubRecordHeader) {
        warn!(
            "{} {}",
            telemetry::local_time(i64::from(header.timestamp)),
            Fault::UnknownKey {
                key1: header.key1,
                key2: header.key2
            }
        );
        self.unknown_keys.push((header.key1, header.key2));
    }
}

// Decoder {{{
/// Turns reassembled record payloads into telemetry using the key table.
pub struct Decoder<'a> {
    keys: &'a KeyTable,
    labels: &'a dyn LabelLookup,
}

impl<'a> Decoder<'a> {
    pub fn new(keys: &'a KeyTable, labels: &'a dyn LabelLookup) -> Self {
        Self { keys, labels }
    }

    /// Spot values (`$POW`, `$INVERTERDATA`): sub-record size comes from the
    /// tag byte of the first sub-record.
    pub fn decode_spot(&self, data: &[u8]) -> DecodeOutcome {
        let mut outcome = DecodeOutcome::default();

        let Some(first) = SubRecordHeader::decode(data) else {
            debug!("spot record too short to decode ({} bytes)", data.len());
            return outcome;
        };
        let Some(gap) = gap_for_tag(first.tag) else {
            warn!("unrecognised spot record tag {:02x}, skipping record", first.tag);
            return outcome;
        };

        for chunk in data.chunks(gap) {
            let Some(header) = SubRecordHeader::decode(chunk) else {
                break;
            };

            match self.keys.lookup(header.key1, header.key2) {
                Some(key) => {
                    let width = if key.data_length > 0 {
                        key.data_length
                    } else {
                        DEFAULT_VALUE_LEN
                    };
                    let Some(field) = chunk.get(VALUE_OFFSET..VALUE_OFFSET + width) else {
                        warn!("truncated value for {}", key.description);
                        break;
                    };
                    let raw = le_value(field);
                    outcome.records.push(numeric_record(key, &header, raw));
                }
                None if header.lead > 0 => outcome.unknown(&header),
                None => {}
            }
        }

        outcome
    }

    /// Keyed values (`$DATA`): sub-record size and value width come from the
    /// key of the first sub-record.
    pub fn decode_data(&self, data: &[u8]) -> DecodeOutcome {
        let mut outcome = DecodeOutcome::default();

        let Some(first) = SubRecordHeader::decode(data) else {
            if !data.is_empty() {
                debug!("data record too short to decode ({} bytes)", data.len());
            }
            return outcome;
        };
        let Some(layout) = self.keys.lookup(first.key1, first.key2) else {
            outcome.unknown(&first);
            return outcome;
        };
        if layout.record_gap == 0 {
            warn!("key {:02x} {:02x} has no record gap", first.key1, first.key2);
            return outcome;
        }
        let (gap, width) = (layout.record_gap, layout.data_length);

        for chunk in data.chunks(gap) {
            let Some(header) = SubRecordHeader::decode(chunk) else {
                break;
            };
            let Some(key) = self.keys.lookup(header.key1, header.key2) else {
                if header.lead > 0 {
                    outcome.unknown(&header);
                }
                continue;
            };
            let Some(field) = chunk.get(VALUE_OFFSET..VALUE_OFFSET + width) else {
                warn!("truncated value for {}", key.description);
                break;
            };

            let record = match key.format {
                f if f.is_numeric() => numeric_record(key, &header, le_value(field)),
                ValueFormat::Timestamp => {
                    let text = telemetry::local_time(i64::from(header.timestamp));
                    text_record(key, &header, text)
                }
                ValueFormat::Label => {
                    let index = le_value(&field[..field.len().min(2)]) as u16;
                    let text = self.labels.lookup(index).unwrap_or_else(|| {
                        debug!("no label for index {}", index);
                        index.to_string()
                    });
                    if (header.key1, header.key2) == INVERTER_NAME_KEY {
                        outcome.inverter_name = Some(text.clone());
                    }
                    text_record(key, &header, text)
                }
                _ => text_record(key, &header, le_text(field)),
            };
            outcome.records.push(record);
        }

        outcome
    }
} // }}}

fn numeric_record(key: &ReturnKeyDefinition, header: &SubRecordHeader, raw: u64) -> TelemetryRecord {
    let value = if key.decimal_places == 0 {
        TelemetryValue::Integer(raw as i64)
    } else {
        TelemetryValue::Number(raw as f64 / key.divisor)
    };

    TelemetryRecord {
        timestamp: i64::from(header.timestamp),
        description: key.description.clone(),
        value,
        units: key.units.clone(),
        // zero readings are always written so the series drops to zero
        persistent: raw == 0 || key.persistent,
        decimal_places: key.decimal_places,
    }
}

fn text_record(key: &ReturnKeyDefinition, header: &SubRecordHeader, text: String) -> TelemetryRecord {
    TelemetryRecord {
        timestamp: i64::from(header.timestamp),
        description: key.description.clone(),
        value: TelemetryValue::Text(text),
        units: key.units.clone(),
        persistent: key.persistent,
        decimal_places: 0,
    }
}

// ArchiveDecoder {{{
/// Decodes the 5-minute energy series, carrying state across the records
/// of one `$ARCHIVEDATA1` run.
#[derive(Debug)]
pub struct ArchiveDecoder {
    serial: u32,
    inverter_name: String,
    previous: Option<(u32, u64)>,
    partial: Vec<u8>,
}

impl ArchiveDecoder {
    pub fn new(serial: u32, inverter_name: &str) -> Self {
        Self {
            serial,
            inverter_name: inverter_name.to_string(),
            previous: None,
            partial: Vec::new(),
        }
    }

    /// Returns the samples in `data` plus any sequencing faults found. A
    /// sample that straddles two records is completed by the next call.
    pub fn decode(&mut self, data: &[u8]) -> (Vec<ArchiveRecord>, Vec<Fault>) {
        let mut records = Vec::new();
        let mut faults = Vec::new();

        self.partial.extend_from_slice(data);
        let complete = self.partial.len() - self.partial.len() % ARCHIVE_SAMPLE_LEN;
        let samples: Vec<u8> = self.partial.drain(..complete).collect();

        for sample in samples.chunks_exact(ARCHIVE_SAMPLE_LEN) {
            let timestamp = le_value(&sample[..4]) as u32;
            let total = le_value(&sample[4..]);

            let (previous_timestamp, previous_total) = self
                .previous
                .unwrap_or((timestamp.wrapping_sub(ARCHIVE_INTERVAL), total));

            if timestamp != previous_timestamp.wrapping_add(ARCHIVE_INTERVAL) {
                let fault = Fault::Sequence {
                    previous: previous_timestamp,
                    current: timestamp,
                };
                warn!("{}", fault);
                faults.push(fault);
            }

            let record = ArchiveRecord {
                timestamp: i64::from(timestamp),
                serial: self.serial,
                inverter_name: self.inverter_name.clone(),
                accumulated_total: total as f64 / 1000.0,
                instantaneous_value: (total as f64 - previous_total as f64) * 12.0,
            };
            debug!("{}", record);
            records.push(record);

            self.previous = Some((timestamp, total));
        }

        (records, faults)
    }

    pub fn pending_bytes(&self) -> usize {
        self.partial.len()
    }
} // }}}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::LabelMap;
    use std::collections::HashMap;

    fn table() -> KeyTable {
        KeyTable::new(vec![
            ReturnKeyDefinition::new(0x01, 0x02, "Power", "W", 0, 28, 3, false).unwrap(),
            ReturnKeyDefinition::new(0x03, 0x04, "Voltage", "V", 2, 28, 3, false).unwrap(),
            ReturnKeyDefinition::new(0x20, 0x82, "Inverter Name", "", 98, 40, 4, true).unwrap(),
            ReturnKeyDefinition::new(0x30, 0x82, "Type", "", 99, 40, 8, true).unwrap(),
        ])
    }

    fn sub_record(gap: usize, key1: u8, key2: u8, tag: u8, timestamp: u32, value: &[u8]) -> Vec<u8> {
        let mut r = vec![0x01, key1, key2, tag];
        r.extend_from_slice(&timestamp.to_le_bytes());
        r.extend_from_slice(value);
        r.resize(gap, 0);
        r
    }

    #[test]
    fn null_sentinel_for_every_width() {
        for width in 1..=8 {
            let field = vec![0xff; width];
            assert_eq!(le_value(&field), 0, "width {}", width);
            assert_eq!(le_text(&field), "", "width {}", width);
        }
        assert_eq!(le_value(&[0xff, 0xff, 0xfe]), 0xfeffff);
    }

    #[test]
    fn le_value_and_text() {
        assert_eq!(le_value(&[100, 0, 0]), 100);
        assert_eq!(le_value(&[0x34, 0x12]), 0x1234);
        assert_eq!(le_text(b"SB\x003000\x00\x00"), "SB3000");
    }

    #[test]
    fn gap_tags() {
        assert_eq!(gap_for_tag(0x08), Some(40));
        assert_eq!(gap_for_tag(0x10), Some(40));
        assert_eq!(gap_for_tag(0x40), Some(28));
        assert_eq!(gap_for_tag(0x00), Some(28));
        assert_eq!(gap_for_tag(0x55), None);
    }

    #[test]
    fn spot_power_lookup() {
        let keys = table();
        let labels = LabelMap::default();
        let decoder = Decoder::new(&keys, &labels);

        let data = sub_record(28, 0x01, 0x02, 0x40, 1_300_000_000, &[100, 0, 0]);
        let outcome = decoder.decode_spot(&data);

        assert_eq!(outcome.records.len(), 1);
        let record = &outcome.records[0];
        assert_eq!(record.description, "Power");
        assert_eq!(record.value, TelemetryValue::Integer(100));
        assert_eq!(record.units, "W");
        assert_eq!(record.timestamp, 1_300_000_000);
        assert!(outcome.unknown_keys.is_empty());
    }

    #[test]
    fn unknown_key_does_not_halt() {
        let keys = table();
        let labels = LabelMap::default();
        let decoder = Decoder::new(&keys, &labels);

        let mut data = sub_record(28, 0x09, 0x09, 0x40, 1, &[1, 0, 0]);
        data.extend(sub_record(28, 0x03, 0x04, 0x40, 1, &[0x50, 0x5a, 0x00]));
        let outcome = decoder.decode_spot(&data);

        assert_eq!(outcome.unknown_keys, vec![(0x09, 0x09)]);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].value, TelemetryValue::Number(231.2));
    }

    #[test]
    fn data_numeric_zero_is_persistent() {
        let keys = table();
        let labels = LabelMap::default();
        let decoder = Decoder::new(&keys, &labels);

        let mut data = sub_record(28, 0x01, 0x02, 0x00, 5, &[0, 0, 0]);
        data.extend(sub_record(28, 0x01, 0x02, 0x00, 5, &[7, 0, 0]));
        let outcome = decoder.decode_data(&data);

        assert_eq!(outcome.records.len(), 2);
        assert!(outcome.records[0].persistent);
        assert!(!outcome.records[1].persistent);
    }

    #[test]
    fn data_label_sets_inverter_name() {
        let keys = table();
        let labels = LabelMap::new(HashMap::from([(8001, "SB 3000HF-30".to_string())]));
        let decoder = Decoder::new(&keys, &labels);

        let data = sub_record(40, 0x20, 0x82, 0x10, 5, &[0x41, 0x1f, 0, 0]);
        let outcome = decoder.decode_data(&data);

        assert_eq!(outcome.inverter_name.as_deref(), Some("SB 3000HF-30"));
        assert_eq!(
            outcome.records[0].value,
            TelemetryValue::Text("SB 3000HF-30".to_string())
        );
    }

    #[test]
    fn data_missing_label_renders_index() {
        let keys = table();
        let labels = LabelMap::default();
        let decoder = Decoder::new(&keys, &labels);

        let data = sub_record(40, 0x20, 0x82, 0x10, 5, &[0x33, 0x01, 0, 0]);
        let outcome = decoder.decode_data(&data);
        assert_eq!(outcome.records[0].value, TelemetryValue::Text("307".to_string()));
    }

    #[test]
    fn data_text_passthrough() {
        let keys = table();
        let labels = LabelMap::default();
        let decoder = Decoder::new(&keys, &labels);

        let data = sub_record(40, 0x30, 0x82, 0x10, 5, b"SN\x00123\x00\x00");
        let outcome = decoder.decode_data(&data);
        assert_eq!(outcome.records[0].value, TelemetryValue::Text("SN123".to_string()));
    }

    #[test]
    fn data_unknown_first_key_reports() {
        let keys = table();
        let labels = LabelMap::default();
        let decoder = Decoder::new(&keys, &labels);

        let outcome = decoder.decode_data(&sub_record(28, 0x09, 0x09, 0, 5, &[1, 0, 0]));
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.unknown_keys, vec![(0x09, 0x09)]);
    }

    fn sample(timestamp: u32, total: u64) -> Vec<u8> {
        let mut s = timestamp.to_le_bytes().to_vec();
        s.extend_from_slice(&total.to_le_bytes());
        s
    }

    #[test]
    fn archive_series() {
        let mut decoder = ArchiveDecoder::new(2_100_000_000, "SB 3000");
        let mut data = sample(1_000_200, 5_000);
        data.extend(sample(1_000_500, 5_100));

        let (records, faults) = decoder.decode(&data);
        assert!(faults.is_empty());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].instantaneous_value, 0.0);
        assert_eq!(records[0].accumulated_total, 5.0);
        assert_eq!(records[1].instantaneous_value, 1200.0);
        assert_eq!(records[1].inverter_name, "SB 3000");
    }

    #[test]
    fn archive_gap_is_reported_and_kept() {
        let mut decoder = ArchiveDecoder::new(1, "");
        let mut data = sample(1_000_200, 5_000);
        data.extend(sample(1_001_100, 5_300));

        let (records, faults) = decoder.decode(&data);
        assert_eq!(records.len(), 2);
        assert!(matches!(
            faults.as_slice(),
            [Fault::Sequence {
                previous: 1_000_200,
                current: 1_001_100
            }]
        ));
    }

    #[test]
    fn archive_sample_split_across_records() {
        let mut decoder = ArchiveDecoder::new(1, "");
        let data = [sample(600, 10), sample(900, 20)].concat();

        let (first, _) = decoder.decode(&data[..18]);
        assert_eq!(first.len(), 1);
        assert_eq!(decoder.pending_bytes(), 6);

        let (second, faults) = decoder.decode(&data[18..]);
        assert_eq!(second.len(), 1);
        assert!(faults.is_empty());
        assert_eq!(second[0].instantaneous_value, 120.0);
    }
}
