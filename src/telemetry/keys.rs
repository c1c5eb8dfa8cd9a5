use crate::prelude::*;

use nom::{
    bytes::complete::take_till,
    character::complete::{char, hex_digit1, space0, space1, u16 as dec_u16, u8 as dec_u8},
    combinator::{all_consuming, map_res},
    sequence::{delimited, preceded, terminated, tuple},
    IResult,
};
use num_enum::{IntoPrimitive, TryFromPrimitive};

const SECTION_START: &str = ":unit conversions";
const SECTION_END: &str = ":end unit conversions";

// ValueFormat {{{
/// The `decimal_places` column: 0-4 are fixed-point numbers, the rest
/// select a string rendering.
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ValueFormat {
    Fixed0 = 0,
    Fixed1 = 1,
    Fixed2 = 2,
    Fixed3 = 3,
    Fixed4 = 4,
    Timestamp = 97,
    Label = 98,
    Text = 99,
}

impl ValueFormat {
    pub fn is_numeric(self) -> bool {
        u8::from(self) <= 4
    }
} // }}}

#[derive(Clone, Debug, PartialEq)]
pub struct ReturnKeyDefinition {
    pub key1: u8,
    pub key2: u8,
    pub description: String,
    pub units: String,
    pub decimal_places: u8,
    pub format: ValueFormat,
    pub divisor: f64,
    pub record_gap: usize,
    pub data_length: usize,
    pub persistent: bool,
}

impl ReturnKeyDefinition {
    pub fn new(
        key1: u8,
        key2: u8,
        description: &str,
        units: &str,
        decimal_places: u8,
        record_gap: usize,
        data_length: usize,
        persistent: bool,
    ) -> Result<Self> {
        let format = ValueFormat::try_from(decimal_places)
            .map_err(|_| anyhow!("unsupported decimal places {}", decimal_places))?;
        let divisor = if format.is_numeric() {
            10f64.powi(decimal_places as i32)
        } else {
            1.0
        };

        Ok(Self {
            key1,
            key2,
            description: description.to_string(),
            units: units.to_string(),
            decimal_places,
            format,
            divisor,
            record_gap,
            data_length,
            persistent,
        })
    }

    pub fn matches(&self, key1: u8, key2: u8) -> bool {
        self.key1 == key1 && self.key2 == key2
    }
}

fn hex_byte(input: &str) -> IResult<&str, u8> {
    map_res(hex_digit1, |s| u8::from_str_radix(s, 16))(input)
}

fn quoted(input: &str) -> IResult<&str, &str> {
    delimited(char('"'), take_till(|c| c == '"'), char('"'))(input)
}

type KeyLine<'a> = (u8, u8, &'a str, &'a str, u8, u16, u16, u8);

fn key_line(input: &str) -> IResult<&str, KeyLine> {
    all_consuming(terminated(
        tuple((
            hex_byte,
            preceded(space1, hex_byte),
            preceded(space1, quoted),
            preceded(space1, quoted),
            preceded(space1, dec_u8),
            preceded(space1, dec_u16),
            preceded(space1, dec_u16),
            preceded(space1, dec_u8),
        )),
        space0,
    ))(input)
}

/// Immutable lookup table of return keys, first match wins.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeyTable {
    keys: Vec<ReturnKeyDefinition>,
}

impl KeyTable {
    pub fn new(keys: Vec<ReturnKeyDefinition>) -> Self {
        Self { keys }
    }

    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|err| crate::file_error_with_source!(err, "error reading key table {}", path))?;
        let table: Self = content.parse()?;
        info!("loaded {} return keys from {}", table.len(), path);
        Ok(table)
    }

    pub fn lookup(&self, key1: u8, key2: u8) -> Option<&ReturnKeyDefinition> {
        self.keys.iter().find(|k| k.matches(key1, key2))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromStr for KeyTable {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> Result<Self> {
        let mut keys = Vec::new();
        let mut in_section = false;

        for (index, line) in content.lines().enumerate() {
            let line_number = index + 1;
            let line = line.trim_end();

            if line.starts_with('#') {
                continue;
            }
            if line.starts_with(SECTION_END) {
                in_section = false;
                continue;
            }
            if line.starts_with(SECTION_START) {
                in_section = true;
                continue;
            }
            if !in_section || line.trim().is_empty() || line.starts_with(':') {
                continue;
            }

            let (_, (key1, key2, description, units, decimal, gap, length, persistent)) =
                key_line(line.trim_start()).map_err(|_| {
                    Fault::parse(line_number, format!("malformed unit conversion '{}'", line))
                })?;

            let key = ReturnKeyDefinition::new(
                key1,
                key2,
                description,
                units,
                decimal,
                gap as usize,
                length as usize,
                persistent != 0,
            )
            .map_err(|e| Fault::parse(line_number, e.to_string()))?;

            if keys.iter().any(|k: &ReturnKeyDefinition| k.matches(key1, key2)) {
                warn!(
                    "line {}: duplicate key {:02x} {:02x}, first definition wins",
                    line_number, key1, key2
                );
            }
            keys.push(key);
        }

        Ok(Self { keys })
    }
}
