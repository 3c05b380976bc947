//! Host bindings for JS-hosted runtimes (emscripten-style).
//!
//! The JS side of these imports lives in the embedder's library glue. It
//! owns the wasm table and linear-memory views: `wasmffi_table_call`
//! unpacks the 64-bit value slots into live wasm values per the signature
//! string, calls the table entry, and writes the result back into the
//! return slot; `wasmffi_convert_trampoline` builds a forwarder that packs
//! incoming wasm values into slots and calls the exported
//! `wasmffi_closure_invoke`, converts it with the computed signature, and
//! installs it at the given slot. Conversion failure reports nonzero.
//!
//! Freed table slots are pooled here and handed out again before the host
//! is asked to grow the table.

use core::ffi::c_void;
use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::error::{fatal, HostError};
use crate::types::{Closure, ClosureBackingFn, SlotKind};

mod sys {
    use core::ffi::c_void;

    extern "C" {
        pub fn wasmffi_table_call(
            fn_index: u32,
            sig: *const u8,
            sig_len: usize,
            slots: *const u64,
            nslots: usize,
            ret: *mut u64,
        ) -> i32;
        pub fn wasmffi_convert_trampoline(
            closure: *mut c_void,
            fn_index: u32,
            sig: *const u8,
            sig_len: usize,
        ) -> i32;
        pub fn wasmffi_empty_table_slot() -> u32;
    }
}

/// Table indices released by `closure_free`, available for reuse.
static FREE_SLOTS: Lazy<Mutex<Vec<u32>>> = Lazy::new(|| Mutex::new(Vec::new()));

pub(crate) fn reserve_table_slot() -> Result<u32, HostError> {
    let recycled = FREE_SLOTS
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .pop();
    match recycled {
        Some(index) => Ok(index),
        None => Ok(unsafe { sys::wasmffi_empty_table_slot() }),
    }
}

pub(crate) fn release_table_slot(index: u32) -> Result<(), HostError> {
    FREE_SLOTS
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .push(index);
    Ok(())
}

pub(crate) unsafe fn call_indirect_slots(
    func: *mut c_void,
    sig: &str,
    slots: &[u64],
) -> Result<u64, HostError> {
    let mut ret = 0u64;
    let rc = sys::wasmffi_table_call(
        func as usize as u32,
        sig.as_ptr(),
        sig.len(),
        slots.as_ptr(),
        slots.len(),
        &mut ret,
    );
    if rc != 0 {
        return Err(HostError::Errno(rc as u16));
    }
    Ok(ret)
}

pub(crate) unsafe fn install_trampoline(
    closure: *mut Closure,
    code: u32,
    sig: &str,
) -> Result<(), HostError> {
    let rc = sys::wasmffi_convert_trampoline(
        closure as *mut c_void,
        code,
        sig.as_ptr(),
        sig.len(),
    );
    if rc != 0 {
        return Err(HostError::BadSignature(sig.to_string()));
    }
    Ok(())
}

// The WASI-variant primitives do not exist on this host; the ABI gate
// refuses WASM32 before either can be reached.

pub(crate) unsafe fn call_dynamic(
    _func: *mut c_void,
    _values: &[u8],
    _results: *mut u8,
    _results_len: usize,
) -> Result<(), HostError> {
    fatal("buffered dynamic calls are not available on this host");
}

pub(crate) unsafe fn closure_prepare(
    _backing: ClosureBackingFn,
    _code: u32,
    _arg_kinds: &[SlotKind],
    _result_kinds: &[SlotKind],
    _user_data: *mut c_void,
) -> Result<(), HostError> {
    fatal("typed-buffer closures are not available on this host");
}
