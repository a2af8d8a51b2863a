//! TELNET (RFC 854) data/command codec.
//!
//! Byte 255 (IAC) marks the start of a command inside the data stream. Data
//! bytes equal to IAC are doubled on the wire; the [`Writer`] performs that
//! escaping and the [`Reader`] reverses it while stripping negotiation and
//! subnegotiation sequences.
//!
//! ```text
//! data:  [1, 55, 255, 4]
//! wire:  [1, 55, 255, 255, 4]
//! ```

mod decoder;
mod reader;
mod writer;

use bytes::{BufMut, BytesMut};

pub use decoder::{Decoder, Frame, MAX_SUBNEGOTIATION_LEN};
pub use reader::Reader;
pub use writer::{Outbound, Writer, write_fully};

pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
pub const SB: u8 = 250;
pub const SE: u8 = 240;

pub const OPT_ECHO: u8 = 1;
pub const OPT_SGA: u8 = 3;
pub const OPT_NAWS: u8 = 31;
pub const OPT_LINEMODE: u8 = 34;

pub const CR: u8 = b'\r';
pub const LF: u8 = b'\n';

/// Negotiation verb of a three byte `IAC <verb> <option>` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Will,
    Wont,
    Do,
    Dont,
}

impl Verb {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            WILL => Some(Verb::Will),
            WONT => Some(Verb::Wont),
            DO => Some(Verb::Do),
            DONT => Some(Verb::Dont),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Verb::Will => WILL,
            Verb::Wont => WONT,
            Verb::Do => DO,
            Verb::Dont => DONT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Command {
    pub verb: Verb,
    pub option: u8,
}

impl Command {
    pub fn new(verb: Verb, option: u8) -> Self {
        Self { verb, option }
    }

    /// Wire form; never escaped, even when the option equals IAC.
    pub fn to_bytes(self) -> [u8; 3] {
        [IAC, self.verb.as_byte(), self.option]
    }
}

/// Doubles every IAC in `data`.
pub fn escape_iac(data: &[u8]) -> BytesMut {
    let extra = data.iter().filter(|&&b| b == IAC).count();
    let mut out = BytesMut::with_capacity(data.len() + extra);
    for chunk in data.split_inclusive(|&b| b == IAC) {
        out.put_slice(chunk);
        if chunk.last() == Some(&IAC) {
            out.put_u8(IAC);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_doubles_iac_only() {
        let input = [1, 55, 2, 155, 3, IAC, 4, 40, IAC, 30, 20];
        let expected = [1, 55, 2, 155, 3, IAC, IAC, 4, 40, IAC, IAC, 30, 20];
        assert_eq!(&escape_iac(&input)[..], &expected[..]);
    }

    #[test]
    fn escape_handles_empty_and_trailing_iac() {
        assert!(escape_iac(&[]).is_empty());
        assert_eq!(&escape_iac(b"ab\xff")[..], b"ab\xff\xff");
    }

    #[test]
    fn command_bytes_are_raw() {
        let cmd = Command::new(Verb::Will, OPT_ECHO);
        assert_eq!(cmd.to_bytes(), [IAC, WILL, OPT_ECHO]);
        let odd = Command::new(Verb::Do, IAC);
        assert_eq!(odd.to_bytes(), [IAC, DO, IAC]);
    }

    #[test]
    fn verb_bytes_round_trip() {
        for verb in [Verb::Will, Verb::Wont, Verb::Do, Verb::Dont] {
            assert_eq!(Verb::from_byte(verb.as_byte()), Some(verb));
        }
        assert_eq!(Verb::from_byte(SB), None);
    }
}
