//! Control message data model
//!
//! Messages pair an address pattern with typed arguments; bundles group
//! packets under one time tag. Values are immutable once constructed and
//! map 1:1 onto the wire type tags.

use bytes::Bytes;

use crate::codec::time::TimeTag;
use crate::error::CodecError;

/// RGBA color argument (tag `r`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgba {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub alpha: u8,
}

/// 4-byte MIDI payload argument (tag `m`): port id, status, data1, data2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiMessage {
    pub port: u8,
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
}

/// A single typed argument
///
/// Each variant corresponds to exactly one wire type tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    /// `i` - 32-bit integer
    Int(i32),
    /// `h` - 64-bit integer
    Long(i64),
    /// `f` - 32-bit float
    Float(f32),
    /// `d` - 64-bit float
    Double(f64),
    /// `s` - string
    Str(String),
    /// `S` - alternate string (symbol)
    Symbol(String),
    /// `b` - blob
    Blob(Bytes),
    /// `t` - time tag
    Time(TimeTag),
    /// `T` - true (no payload)
    True,
    /// `F` - false (no payload)
    False,
    /// `N` - nil (no payload)
    Nil,
    /// `I` - impulse (no payload)
    Impulse,
    /// `c` - ASCII character
    Char(char),
    /// `r` - RGBA color
    Rgba(Rgba),
    /// `m` - MIDI payload
    Midi(MidiMessage),
    /// `[...]` - nested argument array
    Array(Vec<Argument>),
}

impl Argument {
    /// The wire type tag for this argument.
    ///
    /// Arrays have no single tag; they encode as a bracketed run.
    pub fn tag(&self) -> char {
        match self {
            Argument::Int(_) => 'i',
            Argument::Long(_) => 'h',
            Argument::Float(_) => 'f',
            Argument::Double(_) => 'd',
            Argument::Str(_) => 's',
            Argument::Symbol(_) => 'S',
            Argument::Blob(_) => 'b',
            Argument::Time(_) => 't',
            Argument::True => 'T',
            Argument::False => 'F',
            Argument::Nil => 'N',
            Argument::Impulse => 'I',
            Argument::Char(_) => 'c',
            Argument::Rgba(_) => 'r',
            Argument::Midi(_) => 'm',
            Argument::Array(_) => '[',
        }
    }

    /// Infer an argument from an untyped number.
    ///
    /// Integer-valued numbers in i32 range become `Int`, everything else
    /// `Float`. Mirrors the total inference mapping used by the convenience
    /// send path; an explicit variant constructor always wins over this.
    pub fn infer_number(value: f64) -> Argument {
        if value.fract() == 0.0 && value >= i32::MIN as f64 && value <= i32::MAX as f64 {
            Argument::Int(value as i32)
        } else {
            Argument::Float(value as f32)
        }
    }
}

impl From<bool> for Argument {
    fn from(v: bool) -> Self {
        if v {
            Argument::True
        } else {
            Argument::False
        }
    }
}

impl From<i32> for Argument {
    fn from(v: i32) -> Self {
        Argument::Int(v)
    }
}

impl From<i64> for Argument {
    fn from(v: i64) -> Self {
        Argument::Long(v)
    }
}

impl From<f32> for Argument {
    fn from(v: f32) -> Self {
        Argument::Float(v)
    }
}

impl From<f64> for Argument {
    fn from(v: f64) -> Self {
        Argument::Double(v)
    }
}

impl From<&str> for Argument {
    fn from(v: &str) -> Self {
        Argument::Str(v.to_string())
    }
}

impl From<String> for Argument {
    fn from(v: String) -> Self {
        Argument::Str(v)
    }
}

impl From<Vec<u8>> for Argument {
    fn from(v: Vec<u8>) -> Self {
        Argument::Blob(Bytes::from(v))
    }
}

impl From<Bytes> for Argument {
    fn from(v: Bytes) -> Self {
        Argument::Blob(v)
    }
}

impl From<TimeTag> for Argument {
    fn from(v: TimeTag) -> Self {
        Argument::Time(v)
    }
}

impl<T: Into<Argument>> From<Option<T>> for Argument {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Argument::Nil,
        }
    }
}

/// Validate an address pattern: non-empty and `/`-prefixed
pub(crate) fn validate_address(address: &str) -> Result<(), CodecError> {
    if address.is_empty() || !address.starts_with('/') {
        return Err(CodecError::MalformedAddress(address.to_string()));
    }
    Ok(())
}

/// An addressed control message
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    address: String,
    args: Vec<Argument>,
}

impl Message {
    /// Create a message with no arguments
    pub fn new(address: impl Into<String>) -> Result<Self, CodecError> {
        Self::with_args(address, Vec::new())
    }

    /// Create a message with the given arguments
    pub fn with_args(
        address: impl Into<String>,
        args: Vec<Argument>,
    ) -> Result<Self, CodecError> {
        let address = address.into();
        validate_address(&address)?;
        Ok(Self { address, args })
    }

    /// Builder-style argument append
    pub fn arg(mut self, arg: impl Into<Argument>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn args(&self) -> &[Argument] {
        &self.args
    }
}

/// A time-stamped, ordered collection of packets
#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    time: TimeTag,
    elements: Vec<Packet>,
}

impl Bundle {
    /// Create a bundle; zero elements is valid
    pub fn new(time: TimeTag, elements: Vec<Packet>) -> Self {
        Self { time, elements }
    }

    /// Create an empty immediate bundle
    pub fn immediate() -> Self {
        Self::new(TimeTag::IMMEDIATE, Vec::new())
    }

    /// Builder-style element append
    pub fn element(mut self, packet: impl Into<Packet>) -> Self {
        self.elements.push(packet.into());
        self
    }

    pub fn time(&self) -> TimeTag {
        self.time
    }

    pub fn elements(&self) -> &[Packet] {
        &self.elements
    }
}

/// Either a message or a nested bundle
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Message(Message),
    Bundle(Bundle),
}

impl Packet {
    /// Recursively collect every message, discarding bundle wrappers.
    ///
    /// Order is depth-first, matching wire order.
    pub fn flatten(self) -> Vec<Message> {
        match self {
            Packet::Message(msg) => vec![msg],
            Packet::Bundle(bundle) => {
                let mut out = Vec::new();
                for element in bundle.elements {
                    out.extend(element.flatten());
                }
                out
            }
        }
    }
}

impl From<Message> for Packet {
    fn from(msg: Message) -> Self {
        Packet::Message(msg)
    }
}

impl From<Bundle> for Packet {
    fn from(bundle: Bundle) -> Self {
        Packet::Bundle(bundle)
    }
}
