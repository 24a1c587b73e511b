//! Meter reply builders shared by unit tests

use dlt645::frame::{apply_offset, checksum, remove_offset, END_MARKER, RESPONSE_FLAG, START_MARKER};

/// Frame with the given wire address, control code and plain (offset-free) payload
pub fn reply_frame(address: &[u8], control: u8, plain_payload: &[u8]) -> Vec<u8> {
    let payload = apply_offset(plain_payload);
    let mut frame = vec![START_MARKER];
    frame.extend_from_slice(address);
    frame.push(START_MARKER);
    frame.push(control);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(&payload);
    frame.push(checksum(&frame));
    frame.push(END_MARKER);
    frame
}

/// Reply a well-behaved meter sends: echoed identifier followed by `value`
pub fn meter_reply(request: &[u8], value: &[u8]) -> Vec<u8> {
    meter_reply_with_control(request, request[8] | RESPONSE_FLAG, value)
}

pub fn meter_reply_with_control(request: &[u8], control: u8, value: &[u8]) -> Vec<u8> {
    let mut plain = remove_offset(&request[10..14]);
    plain.extend_from_slice(value);
    reply_frame(&request[1..7], control, &plain)
}
