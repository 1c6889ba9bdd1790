//! CC2530 serial framing.
//!
//! Outgoing: `FE | len | cmd0 cmd1 | data.. | fcs`, where `len` counts the
//! data bytes only and `fcs` is the XOR of everything after `FE`.
//! Inbound traffic is handled as an uppercase hex string and searched for
//! known markers; checksums of received sub-frames are reported, never enforced.

use crate::error::FrameError;

use nom::{
    bytes::complete::{tag, take, take_until},
    combinator::map_res,
    IResult,
};

pub const START_OF_FRAME: u8 = 0xFE;

/// Stray byte the radio sometimes emits ahead of a reply.
const LINE_NOISE: &str = "F8";

/// XOR of every byte in a hex string.
pub fn checksum(hex_str: &str) -> Result<u8, FrameError> {
    Ok(xor(&hex::decode(hex_str)?))
}

fn xor(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// Turn a command payload (opcode + data, hex) into wire bytes.
pub fn encode(payload: &str) -> Result<Vec<u8>, FrameError> {
    let body = hex::decode(payload)?;
    if body.len() < 2 {
        return Err(FrameError::TooShort(payload.to_string()));
    }
    let len = u8::try_from(body.len() - 2).map_err(|_| FrameError::TooShort(payload.to_string()))?;

    let mut frame = Vec::with_capacity(body.len() + 3);
    frame.push(START_OF_FRAME);
    frame.push(len);
    frame.extend_from_slice(&body);
    frame.push(xor(&frame[1..]));
    Ok(frame)
}

pub fn strip_line_noise(hex_str: &str) -> &str {
    hex_str.strip_prefix(LINE_NOISE).unwrap_or(hex_str)
}

fn split_on<'a>(input: &'a str, marker: &str) -> IResult<&'a str, &'a str> {
    let (rest, head) = take_until(marker)(input)?;
    let (rest, _) = tag(marker)(rest)?;
    Ok((rest, head))
}

/// Everything after the first occurrence of `marker`.
pub fn after_marker<'a>(input: &'a str, marker: &str) -> Option<&'a str> {
    if marker.is_empty() {
        return Some(input);
    }
    split_on(input, marker).ok().map(|(rest, _)| rest)
}

/// Everything after the last occurrence of `marker`.
pub fn after_last_marker<'a>(input: &'a str, marker: &str) -> Option<&'a str> {
    let mut tail = after_marker(input, marker)?;
    while let Some(next) = after_marker(tail, marker) {
        if marker.is_empty() {
            break;
        }
        tail = next;
    }
    Some(tail)
}

/// Parse `width` hex characters at `offset`.
pub fn hex_field(data: &str, offset: usize, width: usize) -> Option<u64> {
    let digits = data.get(offset..offset + width)?;
    u64::from_str_radix(digits, 16).ok()
}

/// One `FE`-delimited reply inside an inbound hex string.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubFrame<'a> {
    pub command: &'a str,
    pub data: &'a str,
    pub fcs: u8,
}

impl SubFrame<'_> {
    pub fn checksum_ok(&self) -> bool {
        let Ok(len) = u8::try_from(self.data.len() / 2) else {
            return false;
        };
        match hex::decode(format!("{}{}", self.command, self.data)) {
            Ok(body) => xor(&body) ^ len == self.fcs,
            Err(_) => false,
        }
    }
}

fn hex_byte(input: &str) -> IResult<&str, u8> {
    map_res(take(2usize), |s: &str| u8::from_str_radix(s, 16))(input)
}

fn sub_frame(input: &str) -> IResult<&str, SubFrame<'_>> {
    let (input, _) = tag("FE")(input)?;
    let (input, len) = hex_byte(input)?;
    let (input, command) = take(4usize)(input)?;
    let (input, data) = take(len as usize * 2)(input)?;
    let (input, fcs) = hex_byte(input)?;

    Ok((input, SubFrame { command, data, fcs }))
}

/// Split an inbound hex string into sub-frames, skipping bytes that do not
/// start one.
pub fn sub_frames(mut input: &str) -> Vec<SubFrame<'_>> {
    let mut frames = Vec::new();
    while !input.is_empty() {
        match sub_frame(input) {
            Ok((rest, frame)) => {
                frames.push(frame);
                input = rest;
            }
            Err(_) => input = input.get(2..).unwrap_or(""),
        }
    }
    frames
}
