//! The forward caller: `ffi_call`.
//!
//! Marshals a typed argument vector into a wasm-ABI-compatible call on a
//! table-indexed function pointer. Under the `WASM32` ABI the arguments are
//! lowered into a flat byte buffer and handed to the host's dynamic-call
//! primitive; under `WASM32_EMSCRIPTEN` they become a sequence of wasm
//! value slots plus a signature string, with struct arguments copied to
//! scratch and passed by pointer, and varargs packed onto a separate
//! downward-growing region.

use core::ffi::c_void;

use crate::buffer::{align_down, Scratch, ValueWriter};
use crate::canon::unbox_small_structs;
use crate::classify::{abi_size, indirect_return, kind_of, ADDR_BYTES};
use crate::error::{fatal, fatal_host};
use crate::host;
use crate::logging;
use crate::lower::lower_value;
use crate::sig::wasm_signature;
use crate::types::{Abi, Cif, TypeKind};

/// Call the function `func` (a table index) as described by `cif`.
///
/// `avalue` holds `nargs` pointers to caller-owned argument values;
/// `rvalue` receives the return value and must be non-null unless the
/// return type is void. Failure modes at this level are not recoverable:
/// an ABI the running variant does not implement, a variadic call under
/// `WASM32`, or a host error all abort the process.
///
/// # Safety
///
/// `cif` must have been prepared with [`crate::prep_cif_machdep`], the
/// pointers in `avalue` must reference live values of the declared types,
/// and `rvalue` must be valid for the return type's size in writes.
pub unsafe extern "C" fn ffi_call(
    cif: *mut Cif,
    func: *mut c_void,
    rvalue: *mut c_void,
    avalue: *mut *mut c_void,
) {
    let cif = &mut *cif;
    let abi = match Abi::from_raw(cif.abi) {
        Some(abi) if host::abi_supported(abi) => abi,
        _ => fatal("ffi_call through a CIF with an unsupported ABI tag"),
    };
    match abi {
        Abi::Wasm32 => {
            if cif.is_variadic() {
                fatal("variadic calls are not supported under the WASM32 ABI");
            }
            call_buffered(cif, func, rvalue, avalue);
        }
        Abi::Wasm32Emscripten => call_slotted(cif, func, rvalue, avalue),
    }
}

/// The WASI-like path: one flat byte buffer, one dynamic-call primitive.
unsafe fn call_buffered(cif: &mut Cif, func: *mut c_void, rvalue: *mut c_void, avalue: *mut *mut c_void) {
    let nargs = cif.nargs as usize;
    let indirect = indirect_return(cif.rtype);

    let mut total = if indirect { ADDR_BYTES } else { 0 };
    for i in 0..nargs {
        total += abi_size(kind_of(*cif.arg_types.add(i)));
    }

    let mut values = vec![0u8; total];
    let mut out = ValueWriter::new(&mut values);
    if indirect {
        // The hidden first argument: where the callee stores the result.
        out.put_addr(rvalue as usize);
    }
    for i in 0..nargs {
        lower_value(*cif.arg_types.add(i), *avalue.add(i), &mut out);
    }

    let results_len = if indirect {
        0
    } else {
        abi_size(kind_of(cif.rtype))
    };

    logging::trace!(
        func = func as usize,
        values_len = values.len(),
        results_len,
        "dynamic call"
    );
    if let Err(err) = host::active::call_dynamic(func, &values, rvalue as *mut u8, results_len) {
        fatal_host("call_dynamic", err);
    }
}

/// The JS-hosted path: wasm value slots plus a signature string.
unsafe fn call_slotted(cif: &mut Cif, func: *mut c_void, rvalue: *mut c_void, avalue: *mut *mut c_void) {
    let nfixed = cif.nfixedargs as usize;
    let nargs = cif.nargs as usize;
    let sig = wasm_signature(cif);

    let mut slots: Vec<u64> = Vec::with_capacity(nargs + 2);
    if sig.ret_by_arg {
        // The onward call writes the result through this pointer; nothing
        // comes back in the return slot.
        slots.push(rvalue as usize as u64);
    }

    let mut scratch = Scratch::new();
    for i in 0..nfixed {
        let value = *avalue.add(i) as *const u8;
        let (arg_type, kind_raw) = unbox_small_structs(*cif.arg_types.add(i));
        match require_kind(kind_raw) {
            TypeKind::Int | TypeKind::SInt32 | TypeKind::UInt32 => {
                slots.push(*(value as *const u32) as u64);
            }
            TypeKind::Pointer => slots.push(*(value as *const usize) as u64),
            TypeKind::UInt8 => slots.push(*value as u64),
            TypeKind::SInt8 => slots.push((*(value as *const i8) as i32) as u32 as u64),
            TypeKind::UInt16 => slots.push(*(value as *const u16) as u64),
            TypeKind::SInt16 => slots.push((*(value as *const i16) as i32) as u32 as u64),
            TypeKind::Float => slots.push(*(value as *const u32) as u64),
            TypeKind::Double | TypeKind::UInt64 | TypeKind::SInt64 => {
                slots.push(*(value as *const u64));
            }
            TypeKind::LongDouble => {
                // Passed as a pair of i64 halves.
                slots.push(*(value as *const u64));
                slots.push(*(value as *const u64).add(1));
            }
            TypeKind::Struct => {
                // By-value semantics: copy onto scratch, pass the copy's
                // address.
                let size = (*arg_type).size;
                let align = (*arg_type).alignment as usize;
                let copy = scratch.copy_in(value, size, align);
                slots.push(copy as usize as u64);
            }
            TypeKind::Complex => fatal("complex argument marshalling is not implemented"),
            TypeKind::Void => fatal("void argument in ffi_call"),
        }
    }

    if nfixed != nargs {
        let region = pack_varargs(cif, avalue, &mut scratch);
        slots.push(region as u64);
    }

    logging::trace!(func = func as usize, sig = %sig.text, nslots = slots.len(), "slotted call");
    let ret = match host::active::call_indirect_slots(func, &sig.text, &slots) {
        Ok(ret) => ret,
        Err(err) => fatal_host("table call", err),
    };

    if sig.ret_by_arg {
        return;
    }
    let (_, rkind_raw) = unbox_small_structs(cif.rtype);
    match require_kind(rkind_raw) {
        TypeKind::Void => {}
        TypeKind::Int | TypeKind::UInt32 | TypeKind::SInt32 => {
            *(rvalue as *mut u32) = ret as u32;
        }
        TypeKind::Pointer => *(rvalue as *mut usize) = ret as usize,
        TypeKind::UInt8 | TypeKind::SInt8 => *(rvalue as *mut u8) = ret as u8,
        TypeKind::UInt16 | TypeKind::SInt16 => *(rvalue as *mut u16) = ret as u16,
        TypeKind::Float => *(rvalue as *mut u32) = ret as u32,
        TypeKind::Double | TypeKind::UInt64 | TypeKind::SInt64 => {
            *(rvalue as *mut u64) = ret;
        }
        TypeKind::Complex => fatal("complex return marshalling is not implemented"),
        // Struct and long double returns came back through the hidden
        // pointer above.
        TypeKind::Struct | TypeKind::LongDouble => {
            fatal("aggregate return reached the direct-return path")
        }
    }
}

fn require_kind(raw: u16) -> TypeKind {
    match TypeKind::from_raw(raw) {
        Some(kind) => kind,
        None => fatal("unknown type kind in ffi_call"),
    }
}

/// Pack variadic arguments onto a downward-growing scratch region and
/// return the varargs pointer the callee receives.
///
/// Wasm functions cannot touch the caller's stack, so varargs travel on a
/// separate region addressed by one trailing pointer argument. The region
/// is filled from the top down (last vararg at the highest address);
/// struct varargs get an address slot first and their by-value copies are
/// placed below the region in a second pass. There is no way to know how
/// many varargs the callee will actually read, so the packing always
/// covers every declared slot.
unsafe fn pack_varargs(cif: &mut Cif, avalue: *mut *mut c_void, scratch: &mut Scratch) -> usize {
    let nfixed = cif.nfixedargs as usize;
    let nargs = cif.nargs as usize;

    // Upper bound: every vararg at natural size plus worst-case alignment
    // padding, plus the out-of-line struct copies.
    let mut upper = 16usize;
    for i in nfixed..nargs {
        let (arg_type, kind_raw) = unbox_small_structs(*cif.arg_types.add(i));
        upper += match require_kind(kind_raw) {
            TypeKind::UInt8 | TypeKind::SInt8 => 2,
            TypeKind::UInt16 | TypeKind::SInt16 => 4,
            TypeKind::Int
            | TypeKind::UInt32
            | TypeKind::SInt32
            | TypeKind::Float => 8,
            TypeKind::Pointer => 2 * ADDR_BYTES,
            TypeKind::Double | TypeKind::UInt64 | TypeKind::SInt64 => 16,
            TypeKind::LongDouble => 24,
            TypeKind::Struct => {
                2 * ADDR_BYTES + (*arg_type).size + (*arg_type).alignment as usize
            }
            TypeKind::Complex => fatal("complex vararg marshalling is not implemented"),
            TypeKind::Void => fatal("void vararg in ffi_call"),
        };
    }

    let region = scratch.alloc(upper, 16) as usize;
    let floor = region;
    let mut cur = region + upper;
    let mut push = |cur: &mut usize, size: usize, align: usize| -> usize {
        *cur = align_down(*cur - size, align);
        if *cur < floor {
            fatal("varargs region overrun");
        }
        *cur
    };

    // The region is filled backwards so the first vararg lands at the
    // lowest address, which is where the varargs pointer aims.
    let mut struct_fixups: Vec<(usize, *const u8, usize, usize)> = Vec::new();
    for i in (nfixed..nargs).rev() {
        let value = *avalue.add(i) as *const u8;
        let (arg_type, kind_raw) = unbox_small_structs(*cif.arg_types.add(i));
        match require_kind(kind_raw) {
            TypeKind::UInt8 | TypeKind::SInt8 => {
                let at = push(&mut cur, 1, 1);
                *(at as *mut u8) = *value;
            }
            TypeKind::UInt16 | TypeKind::SInt16 => {
                let at = push(&mut cur, 2, 2);
                core::ptr::copy_nonoverlapping(value, at as *mut u8, 2);
            }
            TypeKind::Int | TypeKind::UInt32 | TypeKind::SInt32 | TypeKind::Float => {
                let at = push(&mut cur, 4, 4);
                core::ptr::copy_nonoverlapping(value, at as *mut u8, 4);
            }
            TypeKind::Pointer => {
                let at = push(&mut cur, ADDR_BYTES, ADDR_BYTES);
                core::ptr::copy_nonoverlapping(value, at as *mut u8, ADDR_BYTES);
            }
            TypeKind::Double | TypeKind::UInt64 | TypeKind::SInt64 => {
                let at = push(&mut cur, 8, 8);
                core::ptr::copy_nonoverlapping(value, at as *mut u8, 8);
            }
            TypeKind::LongDouble => {
                let at = push(&mut cur, 16, 8);
                core::ptr::copy_nonoverlapping(value, at as *mut u8, 16);
            }
            TypeKind::Struct => {
                // Struct varargs travel by pointer; the copy itself cannot
                // go here while the slot walk is in progress, so it is
                // placed below the region afterwards.
                let at = push(&mut cur, ADDR_BYTES, ADDR_BYTES);
                struct_fixups.push((
                    at,
                    value,
                    (*arg_type).size,
                    (*arg_type).alignment as usize,
                ));
            }
            TypeKind::Complex => fatal("complex vararg marshalling is not implemented"),
            TypeKind::Void => fatal("void vararg in ffi_call"),
        }
    }
    let varargs_ptr = cur;

    for (slot, src, size, align) in struct_fixups {
        let at = push(&mut cur, size, align);
        core::ptr::copy_nonoverlapping(src, at as *mut u8, size);
        *(slot as *mut usize) = at;
    }

    varargs_ptr
}
