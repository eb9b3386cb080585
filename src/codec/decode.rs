//! Wire-format decoding
//!
//! Stateless functions over explicit byte slices. A decode error aborts the
//! whole packet and leaves no partial state behind; nothing here touches
//! process-wide state.

use std::str::Chars;

use bytes::Bytes;

use crate::codec::time::TimeTag;
use crate::codec::types::{Argument, Bundle, Message, MidiMessage, Packet, Rgba};
use crate::codec::BUNDLE_HEADER;
use crate::error::CodecError;

/// Cursor over a packet buffer
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::UnexpectedEof {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self) -> Result<i32, CodecError> {
        Ok(self.u32()? as i32)
    }

    fn i64(&mut self) -> Result<i64, CodecError> {
        let b = self.take(8)?;
        Ok(i64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_bits(self.u32()?))
    }

    fn f64(&mut self) -> Result<f64, CodecError> {
        let b = self.take(8)?;
        Ok(f64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Read a NUL-terminated string and consume its zero padding to the
    /// next 4-byte boundary
    fn padded_str(&mut self) -> Result<&'a str, CodecError> {
        let start = self.pos;
        let nul = self.buf[start..]
            .iter()
            .position(|&b| b == 0)
            .ok_or(CodecError::UnexpectedEof {
                needed: 1,
                remaining: 0,
            })?;
        // String plus terminator, padded to a multiple of 4
        let consumed = (nul + 1 + 3) & !3;
        let raw = self.take(consumed)?;
        Ok(std::str::from_utf8(&raw[..nul])?)
    }

    /// Read a length-prefixed blob and consume its padding.
    ///
    /// The length field itself is not padded.
    fn blob(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.u32()? as usize;
        let padded = (len + 3) & !3;
        let raw = self.take(padded)?;
        Ok(&raw[..len])
    }

    fn time_tag(&mut self) -> Result<TimeTag, CodecError> {
        let seconds = self.u32()?;
        let fraction = self.u32()?;
        Ok(TimeTag::new(seconds, fraction))
    }
}

/// Decode a complete packet from a byte slice.
///
/// A leading `#` selects a bundle (the `#bundle` literal is required), a
/// leading `/` a message. Nested bundles recurse without a built-in depth
/// limit; callers that accept untrusted input may impose their own.
pub fn decode_packet(bytes: &[u8]) -> Result<Packet, CodecError> {
    let mut r = Reader::new(bytes);
    match r.peek() {
        Some(b'#') => decode_bundle(&mut r).map(Packet::Bundle),
        _ => decode_message(&mut r).map(Packet::Message),
    }
}

fn decode_bundle(r: &mut Reader) -> Result<Bundle, CodecError> {
    let header = r.padded_str()?;
    if header != "#bundle" {
        return Err(CodecError::MalformedAddress(header.to_string()));
    }
    let time = r.time_tag()?;

    // Element count is driven purely by the remaining byte boundary
    let mut elements = Vec::new();
    while r.remaining() > 0 {
        let size = r.u32()? as usize;
        let body = r.take(size)?;
        elements.push(decode_packet(body)?);
    }
    Ok(Bundle::new(time, elements))
}

fn decode_message(r: &mut Reader) -> Result<Message, CodecError> {
    let address = r.padded_str()?.to_string();
    if !address.starts_with('/') {
        return Err(CodecError::MalformedAddress(address));
    }

    // A packet ending right after the address carries no arguments
    let args = if r.remaining() > 0 {
        decode_argument_block(r)?
    } else {
        Vec::new()
    };

    Message::with_args(address, args)
}

/// Decode a standalone argument block: a `,`-prefixed type-tag string
/// followed by one wire value per tag
pub fn decode_arguments(bytes: &[u8]) -> Result<Vec<Argument>, CodecError> {
    let mut r = Reader::new(bytes);
    decode_argument_block(&mut r)
}

/// Decode the type-tag string and one wire value per tag
fn decode_argument_block(r: &mut Reader) -> Result<Vec<Argument>, CodecError> {
    let tags = r.padded_str()?;
    let tags = tags
        .strip_prefix(',')
        .ok_or(CodecError::MalformedTypeTagString)?;
    decode_sequence(r, &mut tags.chars(), false)
}

/// Decode a run of tags; `in_array` runs terminate at `]`
fn decode_sequence(
    r: &mut Reader,
    tags: &mut Chars,
    in_array: bool,
) -> Result<Vec<Argument>, CodecError> {
    let mut out = Vec::new();
    while let Some(tag) = tags.next() {
        match tag {
            '[' => out.push(Argument::Array(decode_sequence(r, tags, true)?)),
            ']' => {
                if in_array {
                    return Ok(out);
                }
                return Err(CodecError::MalformedTypeTagString);
            }
            _ => out.push(decode_one(r, tag)?),
        }
    }
    if in_array {
        return Err(CodecError::UnterminatedArray);
    }
    Ok(out)
}

fn decode_one(r: &mut Reader, tag: char) -> Result<Argument, CodecError> {
    match tag {
        'i' => Ok(Argument::Int(r.i32()?)),
        'h' => Ok(Argument::Long(r.i64()?)),
        'f' => Ok(Argument::Float(r.f32()?)),
        'd' => Ok(Argument::Double(r.f64()?)),
        's' => Ok(Argument::Str(r.padded_str()?.to_string())),
        'S' => Ok(Argument::Symbol(r.padded_str()?.to_string())),
        'b' => Ok(Argument::Blob(Bytes::copy_from_slice(r.blob()?))),
        't' => Ok(Argument::Time(r.time_tag()?)),
        'T' => Ok(Argument::True),
        'F' => Ok(Argument::False),
        'N' => Ok(Argument::Nil),
        'I' => Ok(Argument::Impulse),
        'c' => {
            let code = r.u32()?;
            char::from_u32(code)
                .map(Argument::Char)
                .ok_or(CodecError::InvalidChar(code))
        }
        'r' => {
            let b = r.take(4)?;
            Ok(Argument::Rgba(Rgba {
                red: b[0],
                green: b[1],
                blue: b[2],
                alpha: b[3],
            }))
        }
        'm' => {
            let b = r.take(4)?;
            Ok(Argument::Midi(MidiMessage {
                port: b[0],
                status: b[1],
                data1: b[2],
                data2: b[3],
            }))
        }
        other => Err(CodecError::UnknownTypeTag(other)),
    }
}

/// Recognize a bundle header and extract its time tag without decoding the
/// payload. Returns `None` for messages and for buffers shorter than the
/// 16-byte header.
pub fn peek_bundle_time(bytes: &[u8]) -> Option<TimeTag> {
    if bytes.len() < 16 || &bytes[..8] != BUNDLE_HEADER {
        return None;
    }
    let seconds = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    let fraction = u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
    Some(TimeTag::new(seconds, fraction))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_of(packet: Packet) -> Vec<Argument> {
        match packet {
            Packet::Message(m) => m.args().to_vec(),
            Packet::Bundle(_) => panic!("expected message"),
        }
    }

    #[test]
    fn test_decode_no_arguments() {
        let packet = decode_packet(b"/foo\0\0\0\0").unwrap();
        match packet {
            Packet::Message(m) => {
                assert_eq!(m.address(), "/foo");
                assert!(m.args().is_empty());
            }
            _ => panic!("expected message"),
        }
    }

    #[test]
    fn test_decode_int_argument() {
        let mut buf = b"/foo\0\0\0\0,i\0\0".to_vec();
        buf.extend_from_slice(&42i32.to_be_bytes());
        let args = args_of(decode_packet(&buf).unwrap());
        assert_eq!(args, vec![Argument::Int(42)]);
    }

    #[test]
    fn test_malformed_tag_string() {
        // Valid address followed by a tag string missing the ',' prefix
        let buf = b"/foo\0\0\0\0if\0\0".to_vec();
        assert_eq!(
            decode_packet(&buf).unwrap_err(),
            CodecError::MalformedTypeTagString
        );
    }

    #[test]
    fn test_malformed_address() {
        assert!(matches!(
            decode_packet(b"foo\0"),
            Err(CodecError::MalformedAddress(_))
        ));
    }

    #[test]
    fn test_bad_bundle_header() {
        let mut buf = b"#bundel\0".to_vec();
        buf.extend_from_slice(&[0u8; 8]);
        assert!(matches!(
            decode_packet(&buf),
            Err(CodecError::MalformedAddress(_))
        ));
    }

    #[test]
    fn test_unknown_type_tag() {
        let buf = b"/foo\0\0\0\0,q\0\0".to_vec();
        assert_eq!(
            decode_packet(&buf).unwrap_err(),
            CodecError::UnknownTypeTag('q')
        );
    }

    #[test]
    fn test_unterminated_array() {
        let mut buf = b"/foo\0\0\0\0,[f\0".to_vec();
        buf.extend_from_slice(&1.0f32.to_be_bytes());
        assert_eq!(
            decode_packet(&buf).unwrap_err(),
            CodecError::UnterminatedArray
        );
    }

    #[test]
    fn test_stray_close_bracket() {
        let buf = b"/foo\0\0\0\0,]\0\0".to_vec();
        assert_eq!(
            decode_packet(&buf).unwrap_err(),
            CodecError::MalformedTypeTagString
        );
    }

    #[test]
    fn test_nested_arrays() {
        // ,[f[ii]] : one outer array holding a float and an inner int pair
        let mut buf = b"/n\0\0,[f[ii]]\0\0\0\0".to_vec();
        buf.extend_from_slice(&0.5f32.to_be_bytes());
        buf.extend_from_slice(&1i32.to_be_bytes());
        buf.extend_from_slice(&2i32.to_be_bytes());

        let args = args_of(decode_packet(&buf).unwrap());
        assert_eq!(
            args,
            vec![Argument::Array(vec![
                Argument::Float(0.5),
                Argument::Array(vec![Argument::Int(1), Argument::Int(2)]),
            ])]
        );
    }

    #[test]
    fn test_truncated_packet() {
        let buf = b"/foo\0\0\0\0,i\0\0\0\0".to_vec();
        assert!(matches!(
            decode_packet(&buf),
            Err(CodecError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_payloadless_tags_consume_nothing() {
        let buf = b"/flags\0\0,TFNI\0\0\0".to_vec();
        let args = args_of(decode_packet(&buf).unwrap());
        assert_eq!(
            args,
            vec![
                Argument::True,
                Argument::False,
                Argument::Nil,
                Argument::Impulse
            ]
        );
    }

    #[test]
    fn test_scalar_wire_widths() {
        // Each scalar tag consumes exactly its wire width: decode a message
        // holding one argument of each payload-carrying kind and check the
        // buffer is consumed completely with nothing to spare.
        let mut buf = b"/w\0\0,ihfdsSbtcrm\0\0\0\0".to_vec();
        buf.extend_from_slice(&7i32.to_be_bytes()); // i: 4
        buf.extend_from_slice(&7i64.to_be_bytes()); // h: 8
        buf.extend_from_slice(&1.5f32.to_be_bytes()); // f: 4
        buf.extend_from_slice(&2.5f64.to_be_bytes()); // d: 8
        buf.extend_from_slice(b"ab\0\0"); // s: 4
        buf.extend_from_slice(b"cd\0\0"); // S: 4
        buf.extend_from_slice(&3u32.to_be_bytes()); // b length
        buf.extend_from_slice(b"xyz\0"); // b data + pad: 4
        buf.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 1]); // t: 8
        buf.extend_from_slice(&(b'Q' as u32).to_be_bytes()); // c: 4
        buf.extend_from_slice(&[1, 2, 3, 4]); // r: 4
        buf.extend_from_slice(&[0, 0x90, 60, 100]); // m: 4

        let args = args_of(decode_packet(&buf).unwrap());
        assert_eq!(args.len(), 11);
        assert_eq!(args[0], Argument::Int(7));
        assert_eq!(args[1], Argument::Long(7));
        assert_eq!(args[4], Argument::Str("ab".to_string()));
        assert_eq!(args[5], Argument::Symbol("cd".to_string()));
        assert_eq!(args[6], Argument::Blob(Bytes::from_static(b"xyz")));
        assert_eq!(args[7], Argument::Time(TimeTag::IMMEDIATE));
        assert_eq!(args[8], Argument::Char('Q'));
        assert_eq!(
            args[9],
            Argument::Rgba(Rgba {
                red: 1,
                green: 2,
                blue: 3,
                alpha: 4
            })
        );
        assert_eq!(
            args[10],
            Argument::Midi(MidiMessage {
                port: 0,
                status: 0x90,
                data1: 60,
                data2: 100
            })
        );
    }

    #[test]
    fn test_standalone_argument_block() {
        let mut buf = b",if\0".to_vec();
        buf.extend_from_slice(&9i32.to_be_bytes());
        buf.extend_from_slice(&0.25f32.to_be_bytes());
        assert_eq!(
            decode_arguments(&buf).unwrap(),
            vec![Argument::Int(9), Argument::Float(0.25)]
        );
    }

    #[test]
    fn test_peek_bundle_time() {
        let mut buf = b"#bundle\0".to_vec();
        buf.extend_from_slice(&5u32.to_be_bytes());
        buf.extend_from_slice(&9u32.to_be_bytes());
        assert_eq!(peek_bundle_time(&buf), Some(TimeTag::new(5, 9)));

        assert_eq!(peek_bundle_time(b"/not/a/bundle\0\0\0"), None);
        assert_eq!(peek_bundle_time(b"#bundle\0"), None); // too short
    }

    #[test]
    fn test_empty_bundle() {
        let mut buf = b"#bundle\0".to_vec();
        buf.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 1]);
        match decode_packet(&buf).unwrap() {
            Packet::Bundle(b) => {
                assert!(b.time().is_immediate());
                assert!(b.elements().is_empty());
            }
            _ => panic!("expected bundle"),
        }
    }
}
