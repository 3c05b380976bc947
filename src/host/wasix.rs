//! Host bindings for WASI-like runtimes with dynamic-call support.
//!
//! The runtime knows the type of every function pointer, so `call_dynamic`
//! needs no signature: it interprets the packed value buffer against the
//! callee's own type. Closure trampolines are installed with their
//! wasm-level signature carried out of band as kind buffers.

use core::ffi::c_void;

use crate::error::{fatal, HostError};
use crate::types::{Closure, ClosureBackingFn, SlotKind};

mod sys {
    #[link(wasm_import_module = "wasix_32v1")]
    extern "C" {
        pub fn call_dynamic(
            function_id: u32,
            values: *const u8,
            values_len: usize,
            results: *mut u8,
            results_len: usize,
            strict: u8,
        ) -> u16;
        pub fn closure_allocate(function_id: *mut u32) -> u16;
        pub fn closure_prepare(
            backing_function_id: u32,
            function_id: u32,
            argument_types: *const u8,
            argument_types_len: usize,
            result_types: *const u8,
            result_types_len: usize,
            user_data: *const u8,
        ) -> u16;
        pub fn closure_free(function_id: u32) -> u16;
    }
}

/// The host's value-type encoding coincides with the neutral one
/// (`I32 = 0, I64 = 1, F32 = 2, F64 = 3`).
fn host_value_types(kinds: &[SlotKind]) -> &[u8] {
    // Safety of the cast: SlotKind is repr(u8) with those discriminants.
    unsafe { core::slice::from_raw_parts(kinds.as_ptr() as *const u8, kinds.len()) }
}

pub(crate) unsafe fn call_dynamic(
    func: *mut c_void,
    values: &[u8],
    results: *mut u8,
    results_len: usize,
) -> Result<(), HostError> {
    let errno = sys::call_dynamic(
        func as usize as u32,
        values.as_ptr(),
        values.len(),
        results,
        results_len,
        0,
    );
    if errno != 0 {
        return Err(HostError::Errno(errno));
    }
    Ok(())
}

pub(crate) fn reserve_table_slot() -> Result<u32, HostError> {
    let mut index = 0u32;
    let errno = unsafe { sys::closure_allocate(&mut index) };
    if errno != 0 {
        return Err(HostError::Errno(errno));
    }
    Ok(index)
}

pub(crate) fn release_table_slot(index: u32) -> Result<(), HostError> {
    let errno = unsafe { sys::closure_free(index) };
    if errno != 0 {
        return Err(HostError::Errno(errno));
    }
    Ok(())
}

pub(crate) unsafe fn closure_prepare(
    backing: ClosureBackingFn,
    code: u32,
    arg_kinds: &[SlotKind],
    result_kinds: &[SlotKind],
    user_data: *mut c_void,
) -> Result<(), HostError> {
    let args = host_value_types(arg_kinds);
    let results = host_value_types(result_kinds);
    let errno = sys::closure_prepare(
        // A wasm function pointer is its table index.
        backing as usize as u32,
        code,
        args.as_ptr(),
        args.len(),
        results.as_ptr(),
        results.len(),
        user_data as *const u8,
    );
    if errno != 0 {
        return Err(HostError::Errno(errno));
    }
    Ok(())
}

// The JS-variant primitives do not exist on this host; the ABI gate
// refuses WASM32_EMSCRIPTEN before either can be reached.

pub(crate) unsafe fn call_indirect_slots(
    _func: *mut c_void,
    _sig: &str,
    _slots: &[u64],
) -> Result<u64, HostError> {
    fatal("slotted calls are not available on this host");
}

pub(crate) unsafe fn install_trampoline(
    _closure: *mut Closure,
    _code: u32,
    _sig: &str,
) -> Result<(), HostError> {
    fatal("signature trampolines are not available on this host");
}
