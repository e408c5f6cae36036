//! C ABI for the oidbridge host bridge.
//!
//! Every function accepts a null handle and fails safely: `false`, `0`, an
//! empty JSON list, or a no-op. Failures leave a message retrievable with
//! [`oid_last_error`] on the same thread.
//!
//! Symbol lists cross the boundary as JSON arrays of strings. Strings returned
//! by this library must be released with [`oid_free_string`].

mod descriptor;
mod last_error;

use std::ffi::{CString, c_char, c_int};
use std::ptr;

use anyhow::Context;
use oidbridge_core::{BridgeOptions, Orchestrator, OrchestratorConfig};

pub use descriptor::OidBufferDescriptor;
use descriptor::required_str;
use last_error::{last_error_ptr, set_last_anyhow, set_last_error};

/// Called with the name of each buffer the viewer asks to plot.
pub type PlotCallback = extern "C" fn(buffer_name: *const c_char) -> c_int;

/// Opaque bridge handle owned by the host between `oid_initialize` and `oid_cleanup`.
pub struct OidHandle {
    bridge: Orchestrator,
    plot_callback: PlotCallback,
}

impl OidHandle {
    fn new(plot_callback: PlotCallback, config: OrchestratorConfig) -> anyhow::Result<Self> {
        // Plot requests are dispatched by oid_run_event_loop once the bridge is
        // no longer borrowed, so the callback may call back into this library.
        let bridge = Orchestrator::new(config, |_| {})?;
        Ok(Self {
            bridge,
            plot_callback,
        })
    }
}

fn dispatch_plot_request(callback: PlotCallback, buffer_name: &str) {
    match CString::new(buffer_name) {
        Ok(name) => {
            let status = callback(name.as_ptr());
            if status != 0 {
                tracing::debug!(status, buffer_name, "Plot callback reported failure");
            }
        }
        Err(_) => tracing::warn!(buffer_name, "Dropping plot request with NUL in name"),
    }
}

/// # Safety
/// `options_json` must be null or a NUL-terminated string.
unsafe fn initialize(
    plot_callback: Option<PlotCallback>,
    options_json: *const c_char,
) -> anyhow::Result<OidHandle> {
    let callback = plot_callback.context("plot_callback is null")?;

    let document = if options_json.is_null() {
        ""
    } else {
        // SAFETY: non-null, NUL-terminated per the oid_initialize contract.
        unsafe { required_str(options_json, "options") }?
    };
    let config = BridgeOptions::from_json(document)
        .and_then(BridgeOptions::into_config)
        .context("invalid bridge options")?;

    OidHandle::new(callback, config)
}

/// Borrow the bridge behind `handle`, recording a diagnostic if it is null.
///
/// # Safety
/// `handle` must be null or a live pointer from [`oid_initialize`].
unsafe fn bridge_mut<'a>(handle: *mut OidHandle, call: &str) -> Option<&'a mut Orchestrator> {
    if handle.is_null() {
        set_last_error(format!("{call}: handle is null"));
        return None;
    }
    // SAFETY: non-null and exclusively owned by the host per the contract.
    Some(unsafe { &mut (*handle).bridge })
}

fn into_c_string(json: String) -> *mut c_char {
    CString::new(json).map_or(ptr::null_mut(), CString::into_raw)
}

/// Create an idle bridge.
///
/// `options_json` may be null for defaults. Returns null on failure.
///
/// # Safety
/// `options_json` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn oid_initialize(
    plot_callback: Option<PlotCallback>,
    options_json: *const c_char,
) -> *mut OidHandle {
    oidbridge_core::logging::init();

    match unsafe { initialize(plot_callback, options_json) } {
        Ok(handle) => Box::into_raw(Box::new(handle)),
        Err(e) => {
            set_last_anyhow(&e.context("oid_initialize"));
            ptr::null_mut()
        }
    }
}

/// Spawn the viewer and wait for it to connect.
///
/// # Safety
/// `handle` must be null or a live pointer from [`oid_initialize`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn oid_start(handle: *mut OidHandle) -> bool {
    let Some(bridge) = (unsafe { bridge_mut(handle, "oid_start") }) else {
        return false;
    };
    match bridge.start() {
        Ok(()) => true,
        Err(e) => {
            set_last_error(format!("oid_start: {e}"));
            false
        }
    }
}

/// # Safety
/// `handle` must be null or a live pointer from [`oid_initialize`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn oid_is_window_ready(handle: *mut OidHandle) -> bool {
    unsafe { bridge_mut(handle, "oid_is_window_ready") }.is_some_and(Orchestrator::is_ready)
}

/// Symbols the viewer is watching, as a JSON array. Never null except on
/// allocation failure; free with [`oid_free_string`].
///
/// # Safety
/// `handle` must be null or a live pointer from [`oid_initialize`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn oid_get_observed_symbols(handle: *mut OidHandle) -> *mut c_char {
    let symbols = unsafe { bridge_mut(handle, "oid_get_observed_symbols") }
        .map(Orchestrator::get_observed_symbols)
        .unwrap_or_default();
    into_c_string(serde_json::Value::from(symbols).to_string())
}

/// Replace the viewer's list of available symbols with a JSON array of strings.
///
/// # Safety
/// `handle` must be null or a live pointer from [`oid_initialize`], and
/// `symbols_json` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn oid_set_available_symbols(
    handle: *mut OidHandle,
    symbols_json: *const c_char,
) -> bool {
    let Some(bridge) = (unsafe { bridge_mut(handle, "oid_set_available_symbols") }) else {
        return false;
    };

    let result = unsafe { required_str(symbols_json, "symbols") }
        .and_then(|json| {
            serde_json::from_str::<Vec<String>>(json)
                .context("symbols must be a JSON array of strings")
        })
        .and_then(|symbols| Ok(bridge.set_available_symbols(symbols)?));

    match result {
        Ok(()) => true,
        Err(e) => {
            set_last_anyhow(&e.context("oid_set_available_symbols"));
            false
        }
    }
}

/// Drain viewer traffic and run the plot callback for each request.
/// Returns the number of callbacks invoked.
///
/// The callback may call any other function of this library with `handle`,
/// e.g. [`oid_plot_buffer`] for the requested buffer. If it calls
/// [`oid_cleanup`], the remaining requests of this round are still dispatched
/// but `handle` must not be used afterwards.
///
/// # Safety
/// `handle` must be null or a live pointer from [`oid_initialize`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn oid_run_event_loop(handle: *mut OidHandle) -> c_int {
    let Some(bridge) = (unsafe { bridge_mut(handle, "oid_run_event_loop") }) else {
        return 0;
    };
    let requests = bridge.take_plot_requests();
    // SAFETY: non-null, checked above; the bridge borrow has ended.
    let callback = unsafe { (*handle).plot_callback };

    for buffer_name in &requests {
        tracing::debug!(buffer_name = %buffer_name, "Dispatching plot request");
        dispatch_plot_request(callback, buffer_name);
    }
    c_int::try_from(requests.len()).unwrap_or(c_int::MAX)
}

/// Validate and send one buffer. The payload is copied before this returns.
///
/// # Safety
/// `handle` must be null or a live pointer from [`oid_initialize`], and
/// `descriptor` must be null or point to a descriptor whose pointers are valid
/// as documented on [`OidBufferDescriptor`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn oid_plot_buffer(
    handle: *mut OidHandle,
    descriptor: *const OidBufferDescriptor,
) -> bool {
    let Some(bridge) = (unsafe { bridge_mut(handle, "oid_plot_buffer") }) else {
        return false;
    };
    if descriptor.is_null() {
        set_last_error("oid_plot_buffer: descriptor is null");
        return false;
    }

    // SAFETY: non-null and valid per the contract above.
    let result = unsafe { (*descriptor).to_descriptor() }
        .and_then(|descriptor| Ok(bridge.plot_buffer(&descriptor)?));

    match result {
        Ok(()) => true,
        Err(e) => {
            set_last_anyhow(&e.context("oid_plot_buffer"));
            false
        }
    }
}

/// Stop the bridge, kill the viewer and free the handle. Null is a no-op.
///
/// # Safety
/// `handle` must be null or a live pointer from [`oid_initialize`]; it is
/// invalid after this call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn oid_cleanup(handle: *mut OidHandle) {
    if handle.is_null() {
        return;
    }
    // SAFETY: allocated by oid_initialize and not yet freed per the contract.
    let mut handle = unsafe { Box::from_raw(handle) };
    handle.bridge.stop();
}

/// Most recent diagnostic on this thread, or null. Valid until the next failing call.
#[unsafe(no_mangle)]
pub extern "C" fn oid_last_error() -> *const c_char {
    last_error_ptr()
}

/// Free a string returned by this library. Null is a no-op.
///
/// # Safety
/// `value` must be null or a pointer returned by this library and not yet freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn oid_free_string(value: *mut c_char) {
    if !value.is_null() {
        // SAFETY: produced by CString::into_raw in this crate.
        drop(unsafe { CString::from_raw(value) });
    }
}
