//! Outbound buffer descriptors and their size validation.

use tokio_util::bytes::Bytes;

use crate::bridge::codec::MAX_FIELD_LEN;
use crate::bridge::protocol::{BufferContents, BufferType, expected_payload_len};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    #[error(
        "size mismatch for buffer {variable}: expected at least {expected} bytes, got {actual}"
    )]
    SizeMismatch {
        variable: String,
        expected: usize,
        actual: usize,
    },

    #[error("invalid {field} for buffer {variable}: {value}")]
    InvalidDimension {
        variable: String,
        field: &'static str,
        value: i32,
    },

    #[error("buffer {variable} is too large to send")]
    TooLarge { variable: String },
}

/// A buffer to plot, borrowing the caller's bytes for the duration of one call.
#[derive(Debug, Clone, Copy)]
pub struct BufferDescriptor<'a> {
    pub variable_name: &'a str,
    pub display_name: &'a str,
    pub pixel_layout: &'a str,
    pub transpose: bool,
    pub width: i32,
    pub height: i32,
    pub channels: i32,
    /// Row stride in elements.
    pub row_stride: i32,
    pub element_type: BufferType,
    pub payload: &'a [u8],
}

impl BufferDescriptor<'_> {
    /// Bytes the payload must hold at minimum: `row_stride * height * channels * element_size`.
    pub fn expected_len(&self) -> Result<usize, BufferError> {
        for (field, value) in [
            ("width", self.width),
            ("height", self.height),
            ("channels", self.channels),
            ("row_stride", self.row_stride),
        ] {
            if value < 0 {
                return Err(BufferError::InvalidDimension {
                    variable: self.variable_name.to_string(),
                    field,
                    value,
                });
            }
        }

        expected_payload_len(self.row_stride, self.height, self.channels, self.element_type)
            .ok_or_else(|| BufferError::TooLarge {
                variable: self.variable_name.to_string(),
            })
    }

    pub fn validate(&self) -> Result<(), BufferError> {
        let expected = self.expected_len()?;
        if self.payload.len() as u64 > MAX_FIELD_LEN {
            return Err(BufferError::TooLarge {
                variable: self.variable_name.to_string(),
            });
        }
        if self.payload.len() < expected {
            return Err(BufferError::SizeMismatch {
                variable: self.variable_name.to_string(),
                expected,
                actual: self.payload.len(),
            });
        }
        Ok(())
    }

    /// Validate, then copy the payload into an owned message body.
    pub fn to_contents(&self) -> Result<BufferContents, BufferError> {
        self.validate()?;
        Ok(BufferContents {
            variable_name: self.variable_name.to_string(),
            display_name: self.display_name.to_string(),
            pixel_layout: self.pixel_layout.to_string(),
            transpose: self.transpose,
            width: self.width,
            height: self.height,
            channels: self.channels,
            row_stride: self.row_stride,
            element_type: self.element_type,
            payload: Bytes::copy_from_slice(self.payload),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(payload: &[u8]) -> BufferDescriptor<'_> {
        BufferDescriptor {
            variable_name: "img",
            display_name: "img (uint8)",
            pixel_layout: "rgba",
            transpose: false,
            width: 4,
            height: 2,
            channels: 1,
            row_stride: 4,
            element_type: BufferType::UnsignedByte,
            payload,
        }
    }

    #[test]
    fn exact_payload_is_accepted() {
        let payload = [0u8; 8];
        let contents = descriptor(&payload).to_contents().unwrap();
        assert_eq!(contents.payload.len(), 8);
        assert_eq!(contents.variable_name, "img");
    }

    #[test]
    fn larger_payload_is_accepted() {
        let payload = [0u8; 12];
        assert!(descriptor(&payload).validate().is_ok());
    }

    #[test]
    fn short_payload_names_variable_and_sizes() {
        let payload = [0u8; 7];
        let err = descriptor(&payload).to_contents().unwrap_err();
        assert_eq!(
            err,
            BufferError::SizeMismatch {
                variable: "img".to_string(),
                expected: 8,
                actual: 7,
            }
        );
        assert_eq!(
            err.to_string(),
            "size mismatch for buffer img: expected at least 8 bytes, got 7"
        );
    }

    #[test]
    fn element_size_scales_expected_len() {
        let payload = [0u8; 64];
        let mut wide = descriptor(&payload);
        wide.element_type = BufferType::Float64;
        wide.channels = 3;
        assert_eq!(wide.expected_len().unwrap(), 4 * 2 * 3 * 8);
        assert!(matches!(
            wide.validate(),
            Err(BufferError::SizeMismatch {
                expected: 192,
                actual: 64,
                ..
            })
        ));
    }

    #[test]
    fn negative_dimension_is_named() {
        let payload = [0u8; 8];
        let mut bad = descriptor(&payload);
        bad.row_stride = -4;
        let err = bad.validate().unwrap_err();
        assert_eq!(
            err,
            BufferError::InvalidDimension {
                variable: "img".to_string(),
                field: "row_stride",
                value: -4,
            }
        );
    }

    #[test]
    fn empty_buffer_is_valid() {
        let mut empty = descriptor(&[]);
        empty.width = 0;
        empty.height = 0;
        empty.row_stride = 0;
        assert_eq!(empty.expected_len().unwrap(), 0);
        assert!(empty.to_contents().unwrap().payload.is_empty());
    }

    #[test]
    fn overflowing_dimensions_are_rejected() {
        let mut huge = descriptor(&[]);
        huge.row_stride = i32::MAX;
        huge.height = i32::MAX;
        huge.channels = i32::MAX;
        huge.element_type = BufferType::Float64;
        assert!(matches!(huge.validate(), Err(BufferError::TooLarge { .. })));
    }

    #[test]
    fn payload_over_field_limit_is_rejected() {
        // Zeroed allocations are not touched, so this stays cheap.
        let payload = vec![0u8; MAX_FIELD_LEN as usize + 1];
        let err = descriptor(&payload).validate().unwrap_err();
        assert_eq!(
            err,
            BufferError::TooLarge {
                variable: "img".to_string()
            }
        );
        assert_eq!(err.to_string(), "buffer img is too large to send");

        assert!(descriptor(&payload[..MAX_FIELD_LEN as usize]).validate().is_ok());
    }
}
