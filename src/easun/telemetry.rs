use crate::prelude::*;

use nom::{
    bytes::complete::take_till, character::complete::char, multi::separated_list1,
    sequence::preceded, IResult,
};
use serde::Serialize;

/// A QPIGS reply must carry at least this many tokens for the highest
/// surfaced index (pv_input_power, 12) to exist.
pub const MIN_TOKENS: usize = 13;

// FieldValue {{{
/// A single telemetry value; serialises as a bare JSON number so float
/// fields stay `230.0` and integer fields stay `80` on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
}

impl FieldValue {
    pub fn to_payload(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
} // }}}

// TelemetryRecord {{{
/// Decoded QPIGS reply. Token positions (after the leading `(`) are fixed by
/// the firmware; 6, 7, 11 and everything past 12 are read but not kept.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TelemetryRecord {
    pub grid_voltage: f64,
    pub grid_frequency: f64,
    pub ac_output_voltage: f64,
    pub ac_output_frequency: f64,
    pub ac_output_apparent_power: i64,
    pub ac_output_active_power: i64,
    pub battery_voltage: f64,
    pub battery_capacity: i64,
    pub pv_input_voltage: f64,
    pub pv_input_power: i64,
}

impl TelemetryRecord {
    /// Decode one raw reply. Returns `None` for anything that is not a
    /// complete, fully numeric reply: a half-filled record is as useless as
    /// none, since a shifted token would land in the wrong field.
    pub fn parse(input: &[u8]) -> Option<Self> {
        let text = decode(input);
        debug!("QPIGS raw={:02X?} decoded={:?}", input, text);

        let tokens = match tokens(&text) {
            Ok((_, tokens)) => tokens,
            Err(_) => {
                debug!("ignoring reply without leading '(': {:?}", text);
                return None;
            }
        };

        if tokens.len() < MIN_TOKENS {
            debug!(
                "ignoring short reply: {} tokens, need {}",
                tokens.len(),
                MIN_TOKENS
            );
            return None;
        }

        let record = Self {
            grid_voltage: float(tokens[0])?,
            grid_frequency: float(tokens[1])?,
            ac_output_voltage: float(tokens[2])?,
            ac_output_frequency: float(tokens[3])?,
            ac_output_apparent_power: integer(tokens[4])?,
            ac_output_active_power: integer(tokens[5])?,
            battery_voltage: float(tokens[8])?,
            battery_capacity: integer(tokens[9])?,
            pv_input_voltage: float(tokens[10])?,
            pv_input_power: integer(tokens[12])?,
        };

        trace!("parsed {:?}", record);

        Some(record)
    }

    /// Field name/value pairs in schema order.
    pub fn pairs(&self) -> Vec<(&'static str, FieldValue)> {
        use FieldValue::*;

        vec![
            ("grid_voltage", Float(self.grid_voltage)),
            ("grid_frequency", Float(self.grid_frequency)),
            ("ac_output_voltage", Float(self.ac_output_voltage)),
            ("ac_output_frequency", Float(self.ac_output_frequency)),
            ("ac_output_apparent_power", Integer(self.ac_output_apparent_power)),
            ("ac_output_active_power", Integer(self.ac_output_active_power)),
            ("battery_voltage", Float(self.battery_voltage)),
            ("battery_capacity", Integer(self.battery_capacity)),
            ("pv_input_voltage", Float(self.pv_input_voltage)),
            ("pv_input_power", Integer(self.pv_input_power)),
        ]
    }
} // }}}

/// Lossy decode: invalid UTF-8 becomes U+FFFD, then NUL/CR/LF padding is
/// stripped from both ends.
pub fn decode(input: &[u8]) -> String {
    String::from_utf8_lossy(input)
        .trim_matches(|c: char| matches!(c, '\0' | '\r' | '\n'))
        .to_owned()
}

// "(a b c" => ["a", "b", "c"]; consecutive spaces yield empty tokens
fn tokens(input: &str) -> IResult<&str, Vec<&str>> {
    preceded(char('('), separated_list1(char(' '), take_till(|c: char| c == ' ')))(input)
}

fn float(token: &str) -> Option<f64> {
    token.parse().ok()
}

fn integer(token: &str) -> Option<i64> {
    token.parse().ok()
}
