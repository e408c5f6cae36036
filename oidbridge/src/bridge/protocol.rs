//! Message types for bridge-viewer communication.
//!
//! Every frame starts with a [`MessageType`] tag followed by the fields of that
//! message type in a fixed order:
//!
//! | Message                      | Direction      | Fields                                   |
//! |------------------------------|----------------|------------------------------------------|
//! | `GetObservedSymbols`         | host → viewer  | (none)                                   |
//! | `GetObservedSymbolsResponse` | viewer → host  | `Vec<String>`                            |
//! | `SetAvailableSymbols`        | host → viewer  | `Vec<String>`                            |
//! | `PlotBufferContents`         | host → viewer  | see [`BufferContents`]                   |
//! | `PlotBufferRequest`          | viewer → host  | buffer name `String`                     |

use std::mem::size_of;

use tokio_util::bytes::{Bytes, BytesMut};

use super::codec::{
    CodecError, WireField, encode_buffer, encode_string, skip, skip_collection, skip_raw,
};

/// Width of the frame header.
pub const TAG_LEN: usize = size_of::<i32>();

/// Frame header identifying the schema of the fields that follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i32)]
pub enum MessageType {
    GetObservedSymbols = 0,
    GetObservedSymbolsResponse = 1,
    SetAvailableSymbols = 2,
    PlotBufferContents = 3,
    PlotBufferRequest = 4,
}

impl MessageType {
    pub fn tag(self) -> i32 {
        self as i32
    }

    /// Messages the viewer sends to the host; anything else arriving at the host is unexpected.
    pub fn is_viewer_to_host(self) -> bool {
        matches!(
            self,
            Self::GetObservedSymbolsResponse | Self::PlotBufferRequest
        )
    }
}

impl TryFrom<i32> for MessageType {
    type Error = CodecError;

    fn try_from(tag: i32) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(Self::GetObservedSymbols),
            1 => Ok(Self::GetObservedSymbolsResponse),
            2 => Ok(Self::SetAvailableSymbols),
            3 => Ok(Self::PlotBufferContents),
            4 => Ok(Self::PlotBufferRequest),
            other => Err(CodecError::UnknownMessageType(other)),
        }
    }
}

impl WireField for MessageType {
    fn encode(&self, dst: &mut BytesMut) {
        self.tag().encode(dst);
    }

    fn decode(src: &mut &[u8]) -> Result<Self, CodecError> {
        Self::try_from(i32::decode(src)?)
    }
}

/// Element type of a plotted buffer. Wire values match the debugger scripts' type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum BufferType {
    UnsignedByte = 0,
    UnsignedShort = 2,
    Short = 3,
    Int32 = 4,
    Float32 = 5,
    Float64 = 6,
}

impl BufferType {
    pub fn element_size(self) -> usize {
        match self {
            Self::UnsignedByte => size_of::<u8>(),
            Self::UnsignedShort => size_of::<u16>(),
            Self::Short => size_of::<i16>(),
            Self::Int32 => size_of::<i32>(),
            Self::Float32 => size_of::<f32>(),
            Self::Float64 => size_of::<f64>(),
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for BufferType {
    type Error = CodecError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::UnsignedByte),
            2 => Ok(Self::UnsignedShort),
            3 => Ok(Self::Short),
            4 => Ok(Self::Int32),
            5 => Ok(Self::Float32),
            6 => Ok(Self::Float64),
            other => Err(CodecError::UnknownBufferType(other)),
        }
    }
}

impl WireField for BufferType {
    fn encode(&self, dst: &mut BytesMut) {
        self.code().encode(dst);
    }

    fn decode(src: &mut &[u8]) -> Result<Self, CodecError> {
        Self::try_from(i32::decode(src)?)
    }
}

/// Body of a `PlotBufferContents` frame, fields in wire order.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferContents {
    pub variable_name: String,
    pub display_name: String,
    /// Channel order, e.g. "rgba" or "bgra".
    pub pixel_layout: String,
    pub transpose: bool,
    pub width: i32,
    pub height: i32,
    pub channels: i32,
    /// Row stride in elements, not bytes.
    pub row_stride: i32,
    pub element_type: BufferType,
    pub payload: Bytes,
}

impl BufferContents {
    /// Minimum payload size implied by the dimensions, or `None` if it is not representable.
    pub fn expected_len(&self) -> Option<usize> {
        expected_payload_len(self.row_stride, self.height, self.channels, self.element_type)
    }

    /// Dimensions as displayed, accounting for transposition.
    pub fn visualized_size(&self) -> (i32, i32) {
        if self.transpose {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }

    /// Element type and payload as the viewer stores them: doubles are narrowed to floats.
    pub fn normalized(&self) -> (BufferType, Bytes) {
        if self.element_type != BufferType::Float64 {
            return (self.element_type, self.payload.clone());
        }

        let mut narrowed = Vec::with_capacity(self.payload.len() / 2);
        for chunk in self.payload.chunks_exact(size_of::<f64>()) {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            narrowed.extend_from_slice(&(f64::from_le_bytes(raw) as f32).to_le_bytes());
        }
        (BufferType::Float32, Bytes::from(narrowed))
    }
}

pub(crate) fn expected_payload_len(
    row_stride: i32,
    height: i32,
    channels: i32,
    element_type: BufferType,
) -> Option<usize> {
    let row_stride = usize::try_from(row_stride).ok()?;
    let height = usize::try_from(height).ok()?;
    let channels = usize::try_from(channels).ok()?;
    row_stride
        .checked_mul(height)?
        .checked_mul(channels)?
        .checked_mul(element_type.element_size())
}

/// One decoded frame. Decoding reads straight into the variant matching the wire tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    GetObservedSymbols,
    GetObservedSymbolsResponse { symbols: Vec<String> },
    SetAvailableSymbols { symbols: Vec<String> },
    PlotBufferContents(BufferContents),
    PlotBufferRequest { buffer_name: String },
}

impl Message {
    pub fn kind(&self) -> MessageType {
        match self {
            Self::GetObservedSymbols => MessageType::GetObservedSymbols,
            Self::GetObservedSymbolsResponse { .. } => MessageType::GetObservedSymbolsResponse,
            Self::SetAvailableSymbols { .. } => MessageType::SetAvailableSymbols,
            Self::PlotBufferContents(_) => MessageType::PlotBufferContents,
            Self::PlotBufferRequest { .. } => MessageType::PlotBufferRequest,
        }
    }

    /// Push this message's fields, in wire order, onto `composer`.
    pub fn compose(&self, composer: &mut MessageComposer) {
        match self {
            Self::GetObservedSymbols => {}
            Self::GetObservedSymbolsResponse { symbols } | Self::SetAvailableSymbols { symbols } => {
                composer.push(symbols);
            }
            Self::PlotBufferContents(contents) => {
                composer
                    .push_str(&contents.variable_name)
                    .push_str(&contents.display_name)
                    .push_str(&contents.pixel_layout)
                    .push(&contents.transpose)
                    .push(&contents.width)
                    .push(&contents.height)
                    .push(&contents.channels)
                    .push(&contents.row_stride)
                    .push(&contents.element_type)
                    .push_bytes(&contents.payload);
            }
            Self::PlotBufferRequest { buffer_name } => {
                composer.push_str(buffer_name);
            }
        }
    }

    /// Length of the complete frame at the front of `src`, found by stepping over
    /// its fields without building them.
    pub fn frame_len(src: &[u8]) -> Result<usize, CodecError> {
        let mut cursor = src;
        match MessageType::decode(&mut cursor)? {
            MessageType::GetObservedSymbols => {}
            MessageType::GetObservedSymbolsResponse | MessageType::SetAvailableSymbols => {
                skip_collection(&mut cursor, skip_raw)?;
            }
            MessageType::PlotBufferContents => {
                for _ in 0..3 {
                    skip_raw(&mut cursor)?;
                }
                // transpose, width, height, channels, row_stride
                skip(&mut cursor, size_of::<u8>() + 4 * size_of::<i32>())?;
                BufferType::decode(&mut cursor)?;
                skip_raw(&mut cursor)?;
            }
            MessageType::PlotBufferRequest => skip_raw(&mut cursor)?,
        }
        Ok(src.len() - cursor.len())
    }

    /// Decode one complete frame (header included) from the front of `src`.
    pub fn decode(src: &mut &[u8]) -> Result<Self, CodecError> {
        let kind = MessageType::decode(src)?;
        let mut fields = MessageDecoder::new(src);
        let message = match kind {
            MessageType::GetObservedSymbols => Self::GetObservedSymbols,
            MessageType::GetObservedSymbolsResponse => Self::GetObservedSymbolsResponse {
                symbols: fields.read()?,
            },
            MessageType::SetAvailableSymbols => Self::SetAvailableSymbols {
                symbols: fields.read()?,
            },
            MessageType::PlotBufferContents => {
                let variable_name = fields.read()?;
                let display_name = fields.read()?;
                let pixel_layout = fields.read()?;
                let transpose = fields.read()?;
                let width = fields.read()?;
                let height = fields.read()?;
                let channels = fields.read()?;
                let row_stride = fields.read()?;
                let element_type = fields.read()?;
                let payload = fields.read()?;
                Self::PlotBufferContents(BufferContents {
                    variable_name,
                    display_name,
                    pixel_layout,
                    transpose,
                    width,
                    height,
                    channels,
                    row_stride,
                    element_type,
                    payload,
                })
            }
            MessageType::PlotBufferRequest => Self::PlotBufferRequest {
                buffer_name: fields.read()?,
            },
        };
        Ok(message)
    }
}

/// Builds frame bodies field by field. Reused across frames; each
/// [`finish_into`](Self::finish_into) emits one frame and resets the composer.
#[derive(Debug, Default)]
pub struct MessageComposer {
    body: BytesMut,
}

impl MessageComposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F: WireField>(&mut self, field: &F) -> &mut Self {
        field.encode(&mut self.body);
        self
    }

    pub fn push_str(&mut self, value: &str) -> &mut Self {
        encode_string(value, &mut self.body);
        self
    }

    pub fn push_bytes(&mut self, value: &[u8]) -> &mut Self {
        encode_buffer(value, &mut self.body);
        self
    }

    /// Write `kind`'s header followed by the pushed fields into `dst`.
    pub fn finish_into(&mut self, kind: MessageType, dst: &mut BytesMut) {
        dst.reserve(TAG_LEN + self.body.len());
        kind.encode(dst);
        dst.extend_from_slice(&self.body);
        self.body.clear();
    }
}

/// Reads the fields of one frame in the order the sender pushed them.
pub struct MessageDecoder<'a, 'b> {
    src: &'a mut &'b [u8],
}

impl<'a, 'b> MessageDecoder<'a, 'b> {
    pub fn new(src: &'a mut &'b [u8]) -> Self {
        Self { src }
    }

    pub fn read<T: WireField>(&mut self) -> Result<T, CodecError> {
        T::decode(self.src)
    }
}
