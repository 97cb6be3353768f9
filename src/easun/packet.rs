use crate::prelude::*;

/// Every frame written to the inverter ends with a carriage return.
pub const TERMINATOR: u8 = 0x0D;

/// General status inquiry; the only query the bridge issues.
pub const QPIGS: &str = "QPIGS";

// Command {{{
/// An ASCII query understood by the inverter firmware.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command(String);

impl Command {
    pub fn qpigs() -> Self {
        Self(QPIGS.to_owned())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn frame(&self) -> Frame {
        Frame::new(self)
    }
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.is_ascii() {
            bail!("command {:?} is not ASCII", s);
        }
        if s.is_empty() {
            bail!("command cannot be empty");
        }

        Ok(Self(s.to_owned()))
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
} // }}}

// Frame {{{
/// Bytes on the wire: command, CRC-16/XMODEM of the command (MSB first), CR.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame(Vec<u8>);

impl Frame {
    pub fn new(command: &Command) -> Self {
        let payload = command.as_bytes();

        let mut bytes = Vec::with_capacity(payload.len() + 3);
        bytes.extend_from_slice(payload);
        bytes.extend_from_slice(&checksum(payload));
        bytes.push(TERMINATOR);

        Self(bytes)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The checksum field, i.e. the two bytes before the terminator.
    pub fn checksum(&self) -> [u8; 2] {
        let len = self.0.len();
        [self.0[len - 3], self.0[len - 2]]
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Frame({:02X?})", self.0)
    }
} // }}}

/// CRC-16/XMODEM (poly 0x1021, init 0, no reflection, no final xor),
/// most significant byte first.
pub fn checksum(payload: &[u8]) -> [u8; 2] {
    crc16::State::<crc16::XMODEM>::calculate(payload).to_be_bytes()
}
