use crate::prelude::*;
use crate::script::Token;
use crate::unixtime::ONE_DAY;

use rand::Rng;

const PASSWORD_LEN: usize = 12;
const PASSWORD_PAD: u8 = 0x88;
/// `$TIMESET` until the inverter tells us otherwise.
pub const DEFAULT_TIMESET: [u8; 4] = [0x30, 0xfe, 0x7e, 0x00];
/// Archive reads start one interval early so the first sample has a predecessor.
const ARCHIVE_LOOKBACK: i64 = 300;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Purpose {
    Send,
    Receive,
}

/// Conversation state for one connection.
#[derive(Clone, Debug)]
pub struct Session {
    pub destination_address: [u8; 6],
    pub my_address: [u8; 6],
    pub serial: u32,
    pub susy_id: [u8; 2],
    pub net_id: u8,
    pub send_counter: u8,
    pub my_susy_id: [u8; 2],
    pub my_serial: [u8; 4],
    pub timestr: [u8; 25],
    pub timeset: [u8; 4],
    pub inverter_name: String,
    pub password: String,
    pub date_from: UnixTime,
    pub date_to: UnixTime,
    pub timezone: [u8; 2],
    /// Fixed for the duration of one command.
    pub report_time: UnixTime,
}

impl Session {
    pub fn new(destination_address: [u8; 6], password: &str, date_from: UnixTime, date_to: UnixTime) -> Self {
        let mut rng = rand::thread_rng();
        let my_susy_id = [rng.gen_range(0..254), rng.gen_range(0..254)];
        let my_serial = [
            rng.gen_range(0..254),
            rng.gen_range(0..254),
            rng.gen_range(0..254),
            rng.gen_range(0..254),
        ];

        Self {
            destination_address,
            my_address: [0; 6],
            serial: 0,
            susy_id: [0; 2],
            net_id: 0,
            send_counter: 0,
            my_susy_id,
            my_serial,
            timestr: [0; 25],
            timeset: DEFAULT_TIMESET,
            inverter_name: String::new(),
            password: password.to_string(),
            date_from,
            date_to,
            timezone: crate::unixtime::local_timezone_bytes(),
            report_time: UnixTime::now(),
        }
    }

    /// Replaces the random per-session identity, for replaying captures.
    pub fn with_identity(mut self, my_susy_id: [u8; 2], my_serial: [u8; 4]) -> Self {
        self.my_susy_id = my_susy_id;
        self.my_serial = my_serial;
        self
    }

    pub fn password_bytes(&self) -> [u8; PASSWORD_LEN] {
        let mut out = [PASSWORD_PAD; PASSWORD_LEN];
        for (slot, ch) in out.iter_mut().zip(self.password.bytes()) {
            *slot = ((u16::from(ch) + 0x88) % 0xff) as u8;
        }
        out
    }

    /// Builds the bytes of a directive. For `Send` the result is ready for
    /// the wire; for `Receive` it is the pattern to match.
    pub fn encode(&mut self, tokens: &[Token], purpose: Purpose, line: usize) -> Result<Vec<u8>> {
        let mut body = Vec::with_capacity(128);

        for token in tokens {
            match token {
                Token::Literal(b) => body.push(*b),
                Token::Addr => body.extend_from_slice(&self.destination_address),
                Token::Add2 => body.extend_from_slice(&self.my_address),
                Token::Serial => body.extend_from_slice(&self.serial.to_be_bytes()),
                Token::SusyId => body.extend_from_slice(&self.susy_id),
                Token::InvCode => body.push(self.net_id),
                Token::MySusyId => body.extend_from_slice(&self.my_susy_id),
                Token::MySerial => body.extend_from_slice(&self.my_serial),
                Token::Time => body.extend_from_slice(&self.report_time.to_le_bytes()),
                Token::TimePlus => body.extend_from_slice(&self.report_time.offset(1).to_le_bytes()),
                Token::TimeMinus => body.extend_from_slice(&self.report_time.offset(-1).to_le_bytes()),
                Token::TimeFrom1 => {
                    body.extend_from_slice(&self.date_from.offset(-ARCHIVE_LOOKBACK).to_le_bytes())
                }
                Token::TimeTo1 => body.extend_from_slice(&self.date_to.to_le_bytes()),
                Token::TimeFrom2 => body.extend_from_slice(&self.date_from.offset(-ONE_DAY).to_le_bytes()),
                Token::TimeTo2 => body.extend_from_slice(&self.date_to.offset(-ONE_DAY).to_le_bytes()),
                Token::Password => body.extend_from_slice(&self.password_bytes()),
                Token::Timezone => body.extend_from_slice(&self.timezone),
                Token::TimeSet => body.extend_from_slice(&self.timeset),
                Token::TimeString => body.extend_from_slice(&self.timestr),
                Token::Cnt => {
                    if purpose == Purpose::Send {
                        self.send_counter = self.send_counter.wrapping_add(1);
                    }
                    body.push(self.send_counter);
                }
                Token::Crc => match purpose {
                    Purpose::Send => codec::seal(&mut body).map_err(|e| Fault::parse(line, e.to_string()))?,
                    Purpose::Receive => {
                        return Err(Fault::parse(line, "$CRC cannot appear in a receive pattern").into())
                    }
                },
            }
        }

        Ok(body)
    }
}
