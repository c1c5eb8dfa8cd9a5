use crate::prelude::*;

/// One word of a Send or Receive directive.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Token {
    Literal(u8),
    Addr,
    Add2,
    Serial,
    SusyId,
    InvCode,
    MySusyId,
    MySerial,
    Time,
    TimePlus,
    TimeMinus,
    TimeFrom1,
    TimeTo1,
    TimeFrom2,
    TimeTo2,
    Password,
    Timezone,
    TimeSet,
    TimeString,
    Cnt,
    Crc,
}

impl Token {
    pub fn parse(word: &str, line: usize) -> Result<Self, Fault> {
        let token = match word {
            "$ADDR" => Self::Addr,
            "$ADD2" => Self::Add2,
            "$SERIAL" => Self::Serial,
            "$SUSYID" => Self::SusyId,
            "$INVCODE" => Self::InvCode,
            "$MYSUSYID" => Self::MySusyId,
            "$MYSERIAL" => Self::MySerial,
            "$TIME" => Self::Time,
            "$TMPL" => Self::TimePlus,
            "$TMMI" => Self::TimeMinus,
            "$TIMEFROM1" => Self::TimeFrom1,
            "$TIMETO1" => Self::TimeTo1,
            "$TIMEFROM2" => Self::TimeFrom2,
            "$TIMETO2" => Self::TimeTo2,
            "$PASSWORD" => Self::Password,
            "$TIMEZONE" => Self::Timezone,
            "$TIMESET" => Self::TimeSet,
            "$TIMESTRING" => Self::TimeString,
            "$CNT" => Self::Cnt,
            "$CRC" => Self::Crc,
            w if w.starts_with('$') => {
                return Err(Fault::parse(line, format!("unknown placeholder {}", w)));
            }
            w => Self::Literal(parse_hex_byte(w, line)?),
        };
        Ok(token)
    }
}

fn parse_hex_byte(word: &str, line: usize) -> Result<u8, Fault> {
    if word.len() != 2 || !word.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Fault::parse(line, format!("expected a hex byte, got '{}'", word)));
    }
    u8::from_str_radix(word, 16).map_err(|_| Fault::parse(line, format!("expected a hex byte, got '{}'", word)))
}

/// One word of an Extract directive: which decoder routine to run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExtractKind {
    Login,
    Add2,
    SusyId,
    InvCode,
    Signal,
    InverterTime,
    DailyTotal,
    TimeString,
    Power,
    InverterData,
    Data,
    TestData,
    Archive,
}

impl ExtractKind {
    pub fn parse(word: &str, line: usize) -> Result<Self, Fault> {
        let kind = match word {
            "$LOGIN" => Self::Login,
            "$ADD2" => Self::Add2,
            "$SUSYID" => Self::SusyId,
            "$INVCODE" => Self::InvCode,
            "$SIGNAL" => Self::Signal,
            "$ITIME" => Self::InverterTime,
            "$DTOT" => Self::DailyTotal,
            "$TIMESTRING" => Self::TimeString,
            "$POW" => Self::Power,
            "$INVERTERDATA" => Self::InverterData,
            "$DATA" => Self::Data,
            "$TESTDATA" => Self::TestData,
            "$ARCHIVEDATA1" => Self::Archive,
            w => return Err(Fault::parse(line, format!("unknown extraction {}", w))),
        };
        Ok(kind)
    }

    /// Kinds that pull a whole record, possibly spanning frames.
    pub fn reads_record(self) -> bool {
        matches!(
            self,
            Self::Power | Self::InverterData | Self::Data | Self::TestData | Self::Archive
        )
    }
}
