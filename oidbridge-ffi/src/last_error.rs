//! Per-thread diagnostic for the most recent failed call.

use std::cell::RefCell;
use std::ffi::{CString, c_char};
use std::fmt::Display;
use std::ptr;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

pub(crate) fn set_last_error(message: impl Display) {
    let message = message.to_string();
    tracing::warn!(error = %message, "oidbridge call failed");
    // Diagnostics never contain NUL bytes except through host-provided names.
    let message = CString::new(message.replace('\0', "\\0")).unwrap_or_default();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message));
}

/// Report an error with its full context chain, as `outer: inner: root`.
pub(crate) fn set_last_anyhow(error: &anyhow::Error) {
    set_last_error(format!("{error:#}"));
}

pub(crate) fn last_error_ptr() -> *const c_char {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map_or(ptr::null(), |message| message.as_ptr())
    })
}

#[cfg(test)]
pub(crate) fn last_error() -> Option<String> {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map(|message| message.to_string_lossy().into_owned())
    })
}
