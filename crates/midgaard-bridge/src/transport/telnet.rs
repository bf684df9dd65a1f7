//! Inbound byte stream to line decoding.
//!
//! Text servers speak telnet: option negotiation (`IAC WILL x`, `IAC DO x`, …)
//! and subnegotiation blocks (`IAC SB … IAC SE`) are interleaved with the text.
//! The decoder drops them and splits what is left into lines.

const IAC: u8 = 255;
const SE: u8 = 240;
const SB: u8 = 250;
const WILL: u8 = 251;
const DONT: u8 = 254;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum State {
    #[default]
    Data,
    Iac,
    /// Expecting the option byte of a WILL/WONT/DO/DONT.
    Option,
    Sub,
    SubIac,
}

/// Incremental decoder; survives sequences split across reads.
#[derive(Debug, Default)]
pub struct LineDecoder {
    state: State,
    pending: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning every line it completed.
    ///
    /// A trailing `\r` is removed and empty lines are dropped. Other
    /// whitespace is kept as sent. Invalid UTF-8 is replaced.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            self.state = match self.state {
                State::Data => match byte {
                    IAC => State::Iac,
                    b'\n' => {
                        lines.extend(self.take_line());
                        State::Data
                    }
                    0 => State::Data,
                    _ => {
                        self.pending.push(byte);
                        State::Data
                    }
                },
                State::Iac => match byte {
                    IAC => {
                        self.pending.push(IAC);
                        State::Data
                    }
                    WILL..=DONT => State::Option,
                    SB => State::Sub,
                    _ => State::Data,
                },
                State::Option => State::Data,
                State::Sub => {
                    if byte == IAC {
                        State::SubIac
                    } else {
                        State::Sub
                    }
                }
                State::SubIac => {
                    if byte == SE {
                        State::Data
                    } else {
                        State::Sub
                    }
                }
            };
        }
        lines
    }

    /// Flush whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        self.state = State::Data;
        self.take_line()
    }

    fn take_line(&mut self) -> Option<String> {
        let mut raw = std::mem::take(&mut self.pending);
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
        if raw.is_empty() {
            return None;
        }
        Some(String::from_utf8_lossy(&raw).into_owned())
    }
}
