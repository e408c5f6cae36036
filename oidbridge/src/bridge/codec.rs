//! Field and frame codec for the viewer wire protocol.
//!
//! Fields carry no type tags: a frame can only be decoded by reading its fields
//! back in the order they were written for its message type. Fixed-size values
//! are little-endian at their native width with no padding. Strings, raw buffers
//! and collections are prefixed with a `u64` byte or element count.
//!
//! [`FrameCodec`] plugs the message layer into `tokio_util::codec` so frames can
//! be read and written over any AsyncRead/AsyncWrite. Frames have no length
//! header, so the decoder first steps over the buffered fields to find where the
//! frame ends, and only decodes and consumes bytes once all of it is buffered.

use std::io;
use std::mem::size_of;

use tokio_util::bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::protocol::{Message, MessageComposer, TAG_LEN};

/// Largest single variable-length field accepted from the wire (1 GiB).
pub const MAX_FIELD_LEN: u64 = 1 << 30;

/// Frames above this size are logged at info level when encoded.
const LARGE_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The cursor ran out of bytes mid-field. On a stream this means "wait for more".
    #[error("truncated frame: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("unknown message type tag {0}")]
    UnknownMessageType(i32),

    #[error("unknown buffer element type {0}")]
    UnknownBufferType(i32),

    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    #[error("field length {0} exceeds the 1 GiB limit")]
    FieldTooLarge(u64),
}

impl CodecError {
    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::Truncated { .. })
    }
}

fn ensure(src: &[u8], needed: usize) -> Result<(), CodecError> {
    if src.len() < needed {
        return Err(CodecError::Truncated {
            needed,
            available: src.len(),
        });
    }
    Ok(())
}

/// A value with a fixed position in some frame's field sequence.
pub trait WireField: Sized {
    fn encode(&self, dst: &mut BytesMut);

    fn decode(src: &mut &[u8]) -> Result<Self, CodecError>;
}

macro_rules! scalar_field {
    ($ty:ty, $put:ident, $get:ident) => {
        impl WireField for $ty {
            fn encode(&self, dst: &mut BytesMut) {
                dst.$put(*self);
            }

            fn decode(src: &mut &[u8]) -> Result<Self, CodecError> {
                ensure(src, size_of::<$ty>())?;
                Ok(src.$get())
            }
        }
    };
}

scalar_field!(u8, put_u8, get_u8);
scalar_field!(i32, put_i32_le, get_i32_le);
scalar_field!(u32, put_u32_le, get_u32_le);
scalar_field!(i64, put_i64_le, get_i64_le);
scalar_field!(u64, put_u64_le, get_u64_le);
scalar_field!(f32, put_f32_le, get_f32_le);
scalar_field!(f64, put_f64_le, get_f64_le);

impl WireField for bool {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(u8::from(*self));
    }

    fn decode(src: &mut &[u8]) -> Result<Self, CodecError> {
        Ok(u8::decode(src)? != 0)
    }
}

impl WireField for String {
    fn encode(&self, dst: &mut BytesMut) {
        encode_string(self, dst);
    }

    fn decode(src: &mut &[u8]) -> Result<Self, CodecError> {
        decode_string(src)
    }
}

impl WireField for Bytes {
    fn encode(&self, dst: &mut BytesMut) {
        encode_buffer(self, dst);
    }

    fn decode(src: &mut &[u8]) -> Result<Self, CodecError> {
        decode_buffer(src)
    }
}

impl<T: WireField> WireField for Vec<T> {
    fn encode(&self, dst: &mut BytesMut) {
        encode_collection(self, dst, T::encode);
    }

    fn decode(src: &mut &[u8]) -> Result<Self, CodecError> {
        decode_collection(src, T::decode)
    }
}

fn encode_len(len: usize, dst: &mut BytesMut) {
    dst.put_u64_le(len as u64);
}

fn decode_len(src: &mut &[u8]) -> Result<usize, CodecError> {
    let len = u64::decode(src)?;
    if len > MAX_FIELD_LEN {
        return Err(CodecError::FieldTooLarge(len));
    }
    usize::try_from(len).map_err(|_| CodecError::FieldTooLarge(len))
}

pub fn encode_string(value: &str, dst: &mut BytesMut) {
    encode_buffer(value.as_bytes(), dst);
}

pub fn decode_string(src: &mut &[u8]) -> Result<String, CodecError> {
    let raw = decode_raw(src)?;
    String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)
}

pub fn encode_buffer(value: &[u8], dst: &mut BytesMut) {
    dst.reserve(size_of::<u64>() + value.len());
    encode_len(value.len(), dst);
    dst.put_slice(value);
}

pub fn decode_buffer(src: &mut &[u8]) -> Result<Bytes, CodecError> {
    decode_raw(src).map(Bytes::copy_from_slice)
}

fn decode_raw<'a>(src: &mut &'a [u8]) -> Result<&'a [u8], CodecError> {
    let len = decode_len(src)?;
    ensure(src, len)?;
    let (head, tail) = src.split_at(len);
    *src = tail;
    Ok(head)
}

/// Step over `len` fixed-size bytes.
pub(crate) fn skip(src: &mut &[u8], len: usize) -> Result<(), CodecError> {
    ensure(src, len)?;
    src.advance(len);
    Ok(())
}

/// Step over a string or buffer field without copying it.
pub(crate) fn skip_raw(src: &mut &[u8]) -> Result<(), CodecError> {
    decode_raw(src).map(|_| ())
}

pub(crate) fn skip_collection(
    src: &mut &[u8],
    mut skip_item: impl FnMut(&mut &[u8]) -> Result<(), CodecError>,
) -> Result<(), CodecError> {
    let count = decode_len(src)?;
    for _ in 0..count {
        skip_item(src)?;
    }
    Ok(())
}

pub fn encode_collection<T>(
    items: &[T],
    dst: &mut BytesMut,
    mut encode: impl FnMut(&T, &mut BytesMut),
) {
    encode_len(items.len(), dst);
    for item in items {
        encode(item, dst);
    }
}

pub fn decode_collection<T>(
    src: &mut &[u8],
    mut decode: impl FnMut(&mut &[u8]) -> Result<T, CodecError>,
) -> Result<Vec<T>, CodecError> {
    let count = decode_len(src)?;
    // Every element takes at least one byte, so the remaining input bounds the allocation.
    let mut items = Vec::with_capacity(count.min(src.len()));
    for _ in 0..count {
        items.push(decode(src)?);
    }
    Ok(items)
}

/// Frames [`Message`]s on a byte stream.
#[derive(Default)]
pub struct FrameCodec {
    composer: MessageComposer,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match Message::frame_len(&src[..]) {
                Ok(frame_bytes) => {
                    let frame = src.split_to(frame_bytes);
                    let mut cursor: &[u8] = &frame;
                    let message = Message::decode(&mut cursor)
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                    tracing::trace!(message_type = ?message.kind(), frame_bytes, "Decoded frame");
                    return Ok(Some(message));
                }
                Err(CodecError::Truncated { .. }) => return Ok(None),
                Err(CodecError::UnknownMessageType(tag)) => {
                    // Only the header can be skipped: without a schema the body length is unknown.
                    tracing::warn!(tag, "Received message with unknown header, dropping header");
                    src.advance(TAG_LEN);
                }
                Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
            }
        }
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let start = dst.len();
        item.compose(&mut self.composer);
        self.composer.finish_into(item.kind(), dst);
        let frame_bytes = dst.len() - start;
        tracing::trace!(message_type = ?item.kind(), frame_bytes, "Encoding frame");
        if frame_bytes > LARGE_FRAME_BYTES {
            tracing::info!(
                message_type = ?item.kind(),
                frame_size_kb = frame_bytes / 1024,
                "Large frame being encoded"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::protocol::MessageType;

    fn encoded<T: WireField>(value: &T) -> BytesMut {
        let mut buf = BytesMut::new();
        value.encode(&mut buf);
        buf
    }

    #[test]
    fn scalars_use_native_width_little_endian() {
        assert_eq!(&encoded(&7i32)[..], &[7, 0, 0, 0]);
        assert_eq!(&encoded(&true)[..], &[1]);
        assert_eq!(encoded(&1.5f64).len(), 8);
        assert_eq!(&encoded(&0x0102u64)[..], &[2, 1, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn fields_decode_in_encode_order() {
        let mut buf = BytesMut::new();
        encode_string("rgba", &mut buf);
        42i32.encode(&mut buf);
        false.encode(&mut buf);
        2.25f32.encode(&mut buf);

        let mut cursor: &[u8] = &buf;
        assert_eq!(decode_string(&mut cursor).unwrap(), "rgba");
        assert_eq!(i32::decode(&mut cursor).unwrap(), 42);
        assert!(!bool::decode(&mut cursor).unwrap());
        assert_eq!(f32::decode(&mut cursor).unwrap(), 2.25);
        assert!(cursor.is_empty());
    }

    #[test]
    fn empty_values_roundtrip() {
        let mut buf = BytesMut::new();
        encode_string("", &mut buf);
        encode_buffer(&[], &mut buf);
        Vec::<String>::new().encode(&mut buf);
        assert_eq!(buf.len(), 3 * 8);

        let mut cursor: &[u8] = &buf;
        assert_eq!(decode_string(&mut cursor).unwrap(), "");
        assert!(decode_buffer(&mut cursor).unwrap().is_empty());
        assert!(Vec::<String>::decode(&mut cursor).unwrap().is_empty());
    }

    #[test]
    fn collection_with_custom_element_codec() {
        let mut buf = BytesMut::new();
        encode_collection(&[3u8, 4, 5], &mut buf, |v, dst| i32::from(*v).encode(dst));

        let mut cursor: &[u8] = &buf;
        let values = decode_collection(&mut cursor, i32::decode).unwrap();
        assert_eq!(values, vec![3, 4, 5]);
    }

    #[test]
    fn decoding_past_end_reports_truncation() {
        let mut cursor: &[u8] = &[1, 2];
        let err = i32::decode(&mut cursor).unwrap_err();
        assert_eq!(
            err,
            CodecError::Truncated {
                needed: 4,
                available: 2
            }
        );
        // Nothing is consumed on failure.
        assert_eq!(cursor.len(), 2);
    }

    #[test]
    fn string_shorter_than_prefix_is_truncated() {
        let mut buf = BytesMut::new();
        encode_string("hello", &mut buf);
        buf.truncate(buf.len() - 2);

        let mut cursor: &[u8] = &buf;
        assert!(decode_string(&mut cursor).unwrap_err().is_truncated());
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut buf = BytesMut::new();
        (MAX_FIELD_LEN + 1).encode(&mut buf);

        let mut cursor: &[u8] = &buf;
        assert_eq!(
            decode_buffer(&mut cursor).unwrap_err(),
            CodecError::FieldTooLarge(MAX_FIELD_LEN + 1)
        );
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut buf = BytesMut::new();
        encode_buffer(&[0xff, 0xfe], &mut buf);

        let mut cursor: &[u8] = &buf;
        assert_eq!(decode_string(&mut cursor).unwrap_err(), CodecError::InvalidUtf8);
    }

    #[test]
    fn frame_codec_waits_for_complete_frame() {
        let mut codec = FrameCodec::new();
        let mut wire = BytesMut::new();
        codec
            .encode(
                Message::PlotBufferRequest {
                    buffer_name: "img".to_string(),
                },
                &mut wire,
            )
            .unwrap();

        let mut partial = BytesMut::from(&wire[..wire.len() - 1]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        // Partial bytes stay buffered untouched.
        assert_eq!(partial.len(), wire.len() - 1);

        partial.extend_from_slice(&wire[wire.len() - 1..]);
        let message = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(
            message,
            Message::PlotBufferRequest {
                buffer_name: "img".to_string()
            }
        );
        assert!(partial.is_empty());
    }

    #[test]
    fn frame_codec_decodes_back_to_back_frames() {
        let mut codec = FrameCodec::new();
        let mut wire = BytesMut::new();
        codec.encode(Message::GetObservedSymbols, &mut wire).unwrap();
        codec
            .encode(
                Message::SetAvailableSymbols {
                    symbols: vec!["a".to_string()],
                },
                &mut wire,
            )
            .unwrap();

        let first = codec.decode(&mut wire).unwrap().unwrap();
        let second = codec.decode(&mut wire).unwrap().unwrap();
        assert_eq!(first.kind(), MessageType::GetObservedSymbols);
        assert_eq!(second.kind(), MessageType::SetAvailableSymbols);
        assert!(codec.decode(&mut wire).unwrap().is_none());
    }

    #[test]
    fn frame_codec_skips_unknown_header() {
        let mut codec = FrameCodec::new();
        let mut wire = BytesMut::new();
        99i32.encode(&mut wire);
        codec.encode(Message::GetObservedSymbols, &mut wire).unwrap();

        let message = codec.decode(&mut wire).unwrap().unwrap();
        assert_eq!(message, Message::GetObservedSymbols);
        assert!(wire.is_empty());
    }

    #[test]
    fn frame_codec_fails_on_malformed_field() {
        let mut codec = FrameCodec::new();
        let mut wire = BytesMut::new();
        MessageType::PlotBufferRequest.encode(&mut wire);
        encode_buffer(&[0xc3, 0x28], &mut wire);

        let err = codec.decode(&mut wire).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
