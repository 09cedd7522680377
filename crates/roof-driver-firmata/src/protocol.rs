//! Firmata wire codec
//!
//! Reference: Firmata protocol v2.x (firmata/protocol on GitHub)
//!
//! Protocol Overview:
//! - MIDI-style framing: command bytes have the high bit set, data bytes do not
//! - Sysex: `0xF0 <command> <7-bit data...> 0xF7`
//! - Strings travel as STRING_DATA sysex, each byte split into two 7-bit halves
//! - Digital ports (8 pins each) report as `0x90|port <lsb> <msb>`
//!
//! Only the subset a roof controller uses is modelled. Unknown command bytes
//! and stray data bytes are skipped.

pub const DIGITAL_MESSAGE: u8 = 0x90;
pub const ANALOG_MESSAGE: u8 = 0xE0;
pub const REPORT_ANALOG: u8 = 0xC0;
pub const REPORT_DIGITAL: u8 = 0xD0;
pub const SET_PIN_MODE: u8 = 0xF4;
pub const SET_DIGITAL_PIN_VALUE: u8 = 0xF5;
pub const REPORT_VERSION: u8 = 0xF9;
pub const START_SYSEX: u8 = 0xF0;
pub const END_SYSEX: u8 = 0xF7;
pub const STRING_DATA: u8 = 0x71;
pub const REPORT_FIRMWARE: u8 = 0x79;

/// Longest sysex payload accepted before the decoder resynchronises.
const MAX_SYSEX_LEN: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PinMode {
    Input = 0x00,
    Output = 0x01,
    InputPullup = 0x0B,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirmataMessage {
    StringData(String),
    FirmwareReport { major: u8, minor: u8, name: String },
    ProtocolVersion { major: u8, minor: u8 },
    /// Pin levels of one 8-pin port, bit `n` is pin `port * 8 + n`.
    DigitalPort { port: u8, value: u16 },
    Analog { pin: u8, value: u16 },
    SetPinMode { pin: u8, mode: u8 },
    SetDigitalPinValue { pin: u8, high: bool },
    ReportDigital { port: u8, enable: bool },
    Sysex { command: u8, data: Vec<u8> },
}

// =============================================================================
// Encoding
// =============================================================================

fn push_two_byte(out: &mut Vec<u8>, bytes: &[u8]) {
    for b in bytes {
        out.push(b & 0x7F);
        out.push((b >> 7) & 0x7F);
    }
}

fn from_two_byte(data: &[u8]) -> String {
    let bytes: Vec<u8> = data
        .chunks(2)
        .map(|pair| {
            let lsb = pair[0] & 0x7F;
            let msb = pair.get(1).copied().unwrap_or(0) & 0x7F;
            lsb | (msb << 7)
        })
        .collect();
    String::from_utf8_lossy(&bytes)
        .trim_end_matches('\0')
        .to_string()
}

/// STRING_DATA sysex carrying `text`.
pub fn encode_string(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() * 2 + 3);
    out.push(START_SYSEX);
    out.push(STRING_DATA);
    push_two_byte(&mut out, text.as_bytes());
    out.push(END_SYSEX);
    out
}

pub fn report_firmware_request() -> Vec<u8> {
    vec![START_SYSEX, REPORT_FIRMWARE, END_SYSEX]
}

pub fn set_pin_mode(pin: u8, mode: PinMode) -> [u8; 3] {
    [SET_PIN_MODE, pin & 0x7F, mode as u8]
}

pub fn set_digital_pin_value(pin: u8, high: bool) -> [u8; 3] {
    [SET_DIGITAL_PIN_VALUE, pin & 0x7F, u8::from(high)]
}

pub fn report_digital(port: u8, enable: bool) -> [u8; 2] {
    [REPORT_DIGITAL | (port & 0x0F), u8::from(enable)]
}

/// Digital port message as sent by the board.
pub fn digital_port(port: u8, value: u16) -> [u8; 3] {
    [
        DIGITAL_MESSAGE | (port & 0x0F),
        (value & 0x7F) as u8,
        ((value >> 7) & 0x7F) as u8,
    ]
}

/// Firmware report as sent by the board.
pub fn firmware_report(major: u8, minor: u8, name: &str) -> Vec<u8> {
    let mut out = vec![START_SYSEX, REPORT_FIRMWARE, major & 0x7F, minor & 0x7F];
    push_two_byte(&mut out, name.as_bytes());
    out.push(END_SYSEX);
    out
}

// =============================================================================
// Decoding
// =============================================================================

#[derive(Debug, Clone, Default)]
enum State {
    #[default]
    Idle,
    Sysex,
    Command { command: u8, need: usize },
}

/// Incremental decoder; feed bytes with [`FirmataDecoder::push`].
#[derive(Debug, Clone, Default)]
pub struct FirmataDecoder {
    state: State,
    buf: Vec<u8>,
}

impl FirmataDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.buf.clear();
    }

    /// Decode every complete message in `bytes`.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<FirmataMessage> {
        bytes.iter().filter_map(|b| self.push(*b)).collect()
    }

    pub fn push(&mut self, byte: u8) -> Option<FirmataMessage> {
        if let State::Sysex = self.state {
            if byte == END_SYSEX {
                self.state = State::Idle;
                let payload = std::mem::take(&mut self.buf);
                return parse_sysex(&payload);
            }
            if byte & 0x80 == 0 {
                self.buf.push(byte);
                if self.buf.len() > MAX_SYSEX_LEN {
                    tracing::debug!("oversized sysex discarded");
                    self.reset();
                }
                return None;
            }
            // Command byte inside sysex: the frame was truncated.
            tracing::debug!(byte, "truncated sysex discarded");
            self.reset();
        }

        if byte & 0x80 != 0 {
            self.buf.clear();
            self.state = match byte {
                START_SYSEX => State::Sysex,
                REPORT_VERSION | SET_PIN_MODE | SET_DIGITAL_PIN_VALUE => State::Command {
                    command: byte,
                    need: 2,
                },
                _ => match byte & 0xF0 {
                    DIGITAL_MESSAGE | ANALOG_MESSAGE => State::Command {
                        command: byte,
                        need: 2,
                    },
                    REPORT_DIGITAL | REPORT_ANALOG => State::Command {
                        command: byte,
                        need: 1,
                    },
                    _ => State::Idle,
                },
            };
            return None;
        }

        let State::Command { command, need } = self.state else {
            return None;
        };
        self.buf.push(byte);
        if self.buf.len() < need {
            return None;
        }
        self.state = State::Idle;
        let data = std::mem::take(&mut self.buf);
        parse_command(command, &data)
    }
}

fn parse_command(command: u8, data: &[u8]) -> Option<FirmataMessage> {
    let word = || u16::from(data[0]) | (u16::from(data.get(1).copied().unwrap_or(0)) << 7);
    match command {
        REPORT_VERSION => Some(FirmataMessage::ProtocolVersion {
            major: data[0],
            minor: data[1],
        }),
        SET_PIN_MODE => Some(FirmataMessage::SetPinMode {
            pin: data[0],
            mode: data[1],
        }),
        SET_DIGITAL_PIN_VALUE => Some(FirmataMessage::SetDigitalPinValue {
            pin: data[0],
            high: data[1] != 0,
        }),
        _ => match command & 0xF0 {
            DIGITAL_MESSAGE => Some(FirmataMessage::DigitalPort {
                port: command & 0x0F,
                value: word(),
            }),
            ANALOG_MESSAGE => Some(FirmataMessage::Analog {
                pin: command & 0x0F,
                value: word(),
            }),
            REPORT_DIGITAL => Some(FirmataMessage::ReportDigital {
                port: command & 0x0F,
                enable: data[0] != 0,
            }),
            _ => None,
        },
    }
}

fn parse_sysex(payload: &[u8]) -> Option<FirmataMessage> {
    let (&command, data) = payload.split_first()?;
    match command {
        STRING_DATA => Some(FirmataMessage::StringData(from_two_byte(data))),
        REPORT_FIRMWARE if data.len() >= 2 => Some(FirmataMessage::FirmwareReport {
            major: data[0],
            minor: data[1],
            name: from_two_byte(&data[2..]),
        }),
        _ => Some(FirmataMessage::Sysex {
            command,
            data: data.to_vec(),
        }),
    }
}
