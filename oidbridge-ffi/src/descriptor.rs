//! C layout of a buffer to plot, and its conversion into a checked descriptor.

use std::ffi::{CStr, c_char, c_int};
use std::slice;

use anyhow::{Context, bail};
use oidbridge_core::{BufferDescriptor, BufferType};

/// Buffer description as the host lays it out.
///
/// Strings are NUL-terminated UTF-8. `payload` may be null only when
/// `payload_len` is zero. Everything is borrowed for the duration of the call.
#[repr(C)]
pub struct OidBufferDescriptor {
    pub variable_name: *const c_char,
    pub display_name: *const c_char,
    pub pixel_layout: *const c_char,
    pub transpose: bool,
    pub width: c_int,
    pub height: c_int,
    pub channels: c_int,
    /// Row stride in elements.
    pub row_stride: c_int,
    /// One of the `BufferType` wire codes.
    pub element_type: c_int,
    pub payload: *const u8,
    pub payload_len: usize,
}

/// Borrow a required C string, naming `field` on failure.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string valid for `'a`.
pub(crate) unsafe fn required_str<'a>(ptr: *const c_char, field: &str) -> anyhow::Result<&'a str> {
    if ptr.is_null() {
        bail!("{field} is null");
    }
    // SAFETY: non-null and NUL-terminated per the caller's contract.
    let value = unsafe { CStr::from_ptr(ptr) };
    value
        .to_str()
        .with_context(|| format!("{field} is not valid UTF-8"))
}

impl OidBufferDescriptor {
    /// # Safety
    /// Every non-null pointer must be valid for reads as documented on the type.
    pub(crate) unsafe fn to_descriptor(&self) -> anyhow::Result<BufferDescriptor<'_>> {
        // SAFETY: forwarded from the caller.
        let (variable_name, display_name, pixel_layout) = unsafe {
            (
                required_str(self.variable_name, "variable_name")?,
                required_str(self.display_name, "display_name")?,
                required_str(self.pixel_layout, "pixel_layout")?,
            )
        };

        let element_type = BufferType::try_from(self.element_type)
            .with_context(|| format!("element_type of buffer {variable_name}"))?;

        let payload = match (self.payload.is_null(), self.payload_len) {
            (true, 0) => &[][..],
            (true, len) => bail!("payload of buffer {variable_name} is null but payload_len is {len}"),
            // SAFETY: non-null and valid for `payload_len` bytes per the caller's contract.
            (false, len) => unsafe { slice::from_raw_parts(self.payload, len) },
        };

        Ok(BufferDescriptor {
            variable_name,
            display_name,
            pixel_layout,
            transpose: self.transpose,
            width: self.width,
            height: self.height,
            channels: self.channels,
            row_stride: self.row_stride,
            element_type,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    fn raw(payload: &[u8]) -> OidBufferDescriptor {
        OidBufferDescriptor {
            variable_name: c"img".as_ptr(),
            display_name: c"img (float)".as_ptr(),
            pixel_layout: c"rgba".as_ptr(),
            transpose: true,
            width: 2,
            height: 1,
            channels: 1,
            row_stride: 2,
            element_type: BufferType::Float32.code(),
            payload: payload.as_ptr(),
            payload_len: payload.len(),
        }
    }

    #[test]
    fn converts_valid_descriptor() {
        let payload = [0u8; 8];
        let raw = raw(&payload);
        let descriptor = unsafe { raw.to_descriptor() }.unwrap();
        assert_eq!(descriptor.variable_name, "img");
        assert_eq!(descriptor.display_name, "img (float)");
        assert_eq!(descriptor.element_type, BufferType::Float32);
        assert!(descriptor.transpose);
        assert_eq!(descriptor.payload.len(), 8);
        assert!(descriptor.validate().is_ok());
    }

    #[test]
    fn null_name_is_named() {
        let payload = [0u8; 8];
        let mut raw = raw(&payload);
        raw.pixel_layout = ptr::null();
        let err = unsafe { raw.to_descriptor() }.unwrap_err();
        assert_eq!(err.to_string(), "pixel_layout is null");
    }

    #[test]
    fn unknown_element_type_is_rejected() {
        let payload = [0u8; 8];
        let mut raw = raw(&payload);
        raw.element_type = 1;
        let err = unsafe { raw.to_descriptor() }.unwrap_err();
        assert!(format!("{err:#}").starts_with("element_type of buffer img: "));
    }

    #[test]
    fn null_payload_needs_zero_length() {
        let mut raw = raw(&[]);
        raw.payload = ptr::null();
        assert!(unsafe { raw.to_descriptor() }.unwrap().payload.is_empty());

        raw.payload_len = 4;
        let err = unsafe { raw.to_descriptor() }.unwrap_err();
        assert_eq!(
            err.to_string(),
            "payload of buffer img is null but payload_len is 4"
        );
    }

    #[test]
    fn non_utf8_name_is_rejected() {
        let payload = [0u8; 8];
        let mut raw = raw(&payload);
        let bad = [0xffu8, 0xfe, 0];
        raw.variable_name = bad.as_ptr().cast();
        let err = unsafe { raw.to_descriptor() }.unwrap_err();
        assert_eq!(err.to_string(), "variable_name is not valid UTF-8");
    }
}
