use super::{Command, IAC, SB, SE, Verb};

/// Subnegotiation payload bytes kept per sequence. Longer payloads are still
/// consumed up to their terminator but the excess is dropped.
pub const MAX_SUBNEGOTIATION_LEN: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(u8),
    Negotiation(Command),
    Subnegotiation { option: u8, payload: Vec<u8> },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum State {
    #[default]
    Data,
    Iac,
    Command(Verb),
    Subnegotiation,
    SubIac,
}

/// Incremental wire decoder. Bytes are pushed one at a time so sequences may
/// be split across arbitrary read boundaries.
#[derive(Debug, Default)]
pub struct Decoder {
    state: State,
    sb_option: Option<u8>,
    sb_payload: Vec<u8>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no command or subnegotiation is partially consumed.
    pub fn is_idle(&self) -> bool {
        self.state == State::Data
    }

    /// Feeds one wire byte. `Err` carries the byte that followed IAC when it is
    /// neither a verb, SB, SE nor IAC; the stream is unusable after that.
    pub fn push(&mut self, byte: u8) -> Result<Option<Frame>, u8> {
        match self.state {
            State::Data => {
                if byte == IAC {
                    self.state = State::Iac;
                    Ok(None)
                } else {
                    Ok(Some(Frame::Data(byte)))
                }
            }
            State::Iac => match byte {
                IAC => {
                    self.state = State::Data;
                    Ok(Some(Frame::Data(IAC)))
                }
                SB => {
                    self.state = State::Subnegotiation;
                    self.sb_option = None;
                    self.sb_payload.clear();
                    Ok(None)
                }
                SE => {
                    self.state = State::Data;
                    Ok(None)
                }
                other => match Verb::from_byte(other) {
                    Some(verb) => {
                        self.state = State::Command(verb);
                        Ok(None)
                    }
                    None => {
                        self.state = State::Data;
                        Err(other)
                    }
                },
            },
            State::Command(verb) => {
                self.state = State::Data;
                Ok(Some(Frame::Negotiation(Command::new(verb, byte))))
            }
            State::Subnegotiation => {
                if byte == IAC {
                    self.state = State::SubIac;
                } else {
                    self.push_payload(byte);
                }
                Ok(None)
            }
            State::SubIac => match byte {
                SE => {
                    self.state = State::Data;
                    let payload = std::mem::take(&mut self.sb_payload);
                    Ok(self
                        .sb_option
                        .take()
                        .map(|option| Frame::Subnegotiation { option, payload }))
                }
                IAC => {
                    self.state = State::Subnegotiation;
                    self.push_payload(IAC);
                    Ok(None)
                }
                other => {
                    // A stray IAC inside a payload does not end the sequence.
                    self.state = State::Subnegotiation;
                    self.push_payload(other);
                    Ok(None)
                }
            },
        }
    }

    fn push_payload(&mut self, byte: u8) {
        if self.sb_option.is_none() {
            self.sb_option = Some(byte);
        } else if self.sb_payload.len() < MAX_SUBNEGOTIATION_LEN {
            self.sb_payload.push(byte);
        }
    }
}
