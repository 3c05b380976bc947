//! The closure engine: table-slot allocation, trampoline preparation, and
//! the two trampoline bodies.
//!
//! A closure object owns one wasm table slot. Under the `WASM32` ABI every
//! closure shares a single fixed backing function and the host carries the
//! wasm-level signature out of band as typed kind buffers; under
//! `WASM32_EMSCRIPTEN` the host converts a per-closure forwarder into a
//! wasm function whose signature is computed from the CIF, and the
//! forwarder hands the live wasm values to [`closure_invoke_slots`] as
//! 64-bit slots in signature order.

use core::ffi::c_void;
use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};

use crate::buffer::{align_to, Scratch, ValueReader};
use crate::canon::unbox_small_structs;
use crate::classify::{abi_size, indirect_return, kind_of, slot_kinds, ADDR_BYTES};
use crate::error::{fatal, fatal_host};
use crate::host;
use crate::logging;
use crate::raise::raise_value;
use crate::sig::wasm_signature;
use crate::types::{Abi, Cif, Closure, ClosureHandler, SlotKind, Status, TypeKind};

/// Hidden bookkeeping in front of every closure allocation: the table slot
/// the allocation owns, and the allocation's full size (the Rust allocator
/// wants the layout back at deallocation time).
#[repr(C)]
struct AllocHeader {
    table_index: u32,
    total_size: usize,
}

fn header_layout() -> (usize, usize) {
    let align = core::mem::align_of::<Closure>()
        .max(core::mem::align_of::<*mut c_void>())
        .max(core::mem::align_of::<AllocHeader>());
    (align_to(core::mem::size_of::<AllocHeader>(), align), align)
}

/// Allocate a closure of at least `size` bytes and reserve a table slot
/// for it. The slot index is written to `*code` as the closure's code
/// location; the caller-visible allocation is aligned for a [`Closure`].
///
/// There is no guarantee the allocation will actually hold a `Closure`
/// struct, so the slot index lives in a hidden header in front of it.
///
/// # Safety
///
/// `code` must be valid for writes. The returned pointer must be released
/// with [`closure_free`] and nothing else.
pub unsafe extern "C" fn closure_alloc(size: usize, code: *mut *mut c_void) -> *mut c_void {
    let (header, align) = header_layout();
    let total = header + size;
    let layout = match Layout::from_size_align(total, align) {
        Ok(layout) => layout,
        Err(_) => fatal("closure allocation size overflows"),
    };
    let base = alloc(layout);
    if base.is_null() {
        handle_alloc_error(layout);
    }

    let table_index = match host::active::reserve_table_slot() {
        Ok(index) => index,
        Err(err) => fatal_host("reserve_table_slot", err),
    };
    (base as *mut AllocHeader).write(AllocHeader {
        table_index,
        total_size: total,
    });
    *code = table_index as usize as *mut c_void;

    logging::debug!(table_index, size, "allocated closure");
    base.add(header) as *mut c_void
}

/// Release a closure allocation and return its table slot to the free
/// pool.
///
/// # Safety
///
/// `closure` must have come from [`closure_alloc`] and must not be used
/// afterwards; calling the function previously installed at its slot is
/// undefined behaviour.
pub unsafe extern "C" fn closure_free(closure: *mut c_void) {
    let (header, align) = header_layout();
    let base = (closure as *mut u8).sub(header);
    let hdr = (base as *const AllocHeader).read();
    if let Err(err) = host::active::release_table_slot(hdr.table_index) {
        fatal_host("release_table_slot", err);
    }
    logging::debug!(table_index = hdr.table_index, "freed closure");
    dealloc(base, Layout::from_size_align_unchecked(hdr.total_size, align));
}

/// Bind a closure to a CIF and a user handler and install its trampoline
/// at `codeloc` (the table slot reserved by [`closure_alloc`]).
///
/// When the prepared slot is invoked, `fun` receives
/// `(cif, result_area, argv, user_data)` with `argv` holding one typed
/// pointer per declared argument.
///
/// # Safety
///
/// `closure` and `cif` must be valid and live for as long as the table
/// slot stays installed; `cif` must have been prepared with
/// [`crate::prep_cif_machdep`]; `codeloc` must be the slot handed out for
/// this closure.
pub unsafe extern "C" fn prep_closure_loc(
    closure: *mut Closure,
    cif: *mut Cif,
    fun: ClosureHandler,
    user_data: *mut c_void,
    codeloc: *mut c_void,
) -> Status {
    let abi = match Abi::from_raw((*cif).abi) {
        Some(abi) if host::abi_supported(abi) => abi,
        _ => return Status::BadAbi,
    };
    match abi {
        Abi::Wasm32 => prep_buffered(closure, cif, fun, user_data, codeloc),
        Abi::Wasm32Emscripten => prep_slotted(closure, cif, fun, user_data, codeloc),
    }
}

/// WASI-variant preparation: compute the wasm-level argument and result
/// slot sequences and hand them to the host together with the shared
/// backing function.
unsafe fn prep_buffered(
    closure: *mut Closure,
    cif: *mut Cif,
    fun: ClosureHandler,
    user_data: *mut c_void,
    codeloc: *mut c_void,
) -> Status {
    let cif_ref = &*cif;
    let indirect = indirect_return(cif_ref.rtype);

    let mut arg_kinds: Vec<SlotKind> = Vec::new();
    let mut result_kinds: Vec<SlotKind> = Vec::new();
    if indirect {
        // The hidden return pointer is the first wasm argument and the
        // wasm-level result list stays empty.
        arg_kinds.extend_from_slice(slot_kinds(kind_of(cif_ref.rtype)));
    } else {
        result_kinds.extend_from_slice(slot_kinds(kind_of(cif_ref.rtype)));
    }
    for i in 0..cif_ref.nargs as usize {
        arg_kinds.extend_from_slice(slot_kinds(kind_of(*cif_ref.arg_types.add(i))));
    }

    (*closure).cif = cif;
    (*closure).fun = Some(fun);
    (*closure).user_data = user_data;
    (*closure).ftramp = codeloc;

    let code = codeloc as usize as u32;
    logging::debug!(
        code,
        args = arg_kinds.len(),
        results = result_kinds.len(),
        "preparing buffered closure"
    );
    if let Err(err) = host::active::closure_prepare(
        closure_backing,
        code,
        &arg_kinds,
        &result_kinds,
        closure as *mut c_void,
    ) {
        fatal_host("closure_prepare", err);
    }
    Status::Ok
}

/// JS-variant preparation: compute the signature string and ask the host
/// to convert and install the forwarder. A conversion failure is the one
/// declarative error at this stage.
unsafe fn prep_slotted(
    closure: *mut Closure,
    cif: *mut Cif,
    fun: ClosureHandler,
    user_data: *mut c_void,
    codeloc: *mut c_void,
) -> Status {
    let sig = wasm_signature(&*cif);
    let code = codeloc as usize as u32;
    logging::debug!(code, sig = %sig.text, "preparing slotted closure");
    if host::active::install_trampoline(closure, code, &sig.text).is_err() {
        return Status::BadTypedef;
    }
    (*closure).cif = cif;
    (*closure).fun = Some(fun);
    (*closure).user_data = user_data;
    (*closure).ftramp = codeloc;
    Status::Ok
}

/// The fixed backing function shared by every WASI-variant closure.
///
/// The host calls it with the incoming argument buffer and the outgoing
/// result buffer (both in the `call_dynamic` packing) plus the closure
/// pointer it was registered with.
pub(crate) unsafe extern "C" fn closure_backing(
    args: *mut u8,
    results: *mut u8,
    user_data: *mut c_void,
) {
    let closure = user_data as *mut Closure;
    let cif = (*closure).cif;
    let cif_ref = &*cif;
    let nargs = cif_ref.nargs as usize;
    let indirect = indirect_return(cif_ref.rtype);

    let mut len = if indirect { ADDR_BYTES } else { 0 };
    for i in 0..nargs {
        len += abi_size(kind_of(*cif_ref.arg_types.add(i)));
    }
    let mut values = ValueReader::new(args, len);

    // For an indirect return the first slot carries the result pointer;
    // otherwise the result buffer holds any direct return (at most 16
    // bytes) itself.
    let result_area = if indirect {
        raise_value(cif_ref.rtype, &mut values)
    } else {
        results as *mut c_void
    };

    let mut argv: Vec<*mut c_void> = Vec::with_capacity(nargs);
    for i in 0..nargs {
        argv.push(raise_value(*cif_ref.arg_types.add(i), &mut values));
    }

    let fun = match (*closure).fun {
        Some(fun) => fun,
        None => fatal("closure invoked before preparation"),
    };
    logging::trace!(nargs, indirect, "invoking buffered closure");
    fun(cif, result_area, argv.as_mut_ptr(), (*closure).user_data);
}

/// The fixed entry point behind every JS-variant trampoline.
///
/// The host-side forwarder packs the live wasm values into 64-bit slots in
/// signature order (one slot per wasm value, so a long double argument is
/// two slots and a struct argument is its address) and reads the direct
/// return back out of `ret` afterwards.
///
/// # Safety
///
/// `closure` must be a prepared closure, `slots` must hold `nslots`
/// values laid out as above, and `ret` must be valid for writes.
#[cfg_attr(
    all(target_arch = "wasm32", target_os = "emscripten"),
    export_name = "wasmffi_closure_invoke"
)]
pub unsafe extern "C" fn closure_invoke_slots(
    closure: *mut Closure,
    slots: *const u64,
    nslots: usize,
    ret: *mut u64,
) {
    let cif = (*closure).cif;
    let cif_ref = &*cif;
    let nargs = cif_ref.nargs as usize;
    let nfixed = cif_ref.nfixedargs as usize;

    unsafe fn slot(slots: *const u64, nslots: usize, i: usize) -> u64 {
        if i >= nslots {
            fatal("trampoline slot buffer underrun");
        }
        *slots.add(i)
    }

    let (_, rkind_raw) = unbox_small_structs(cif_ref.rtype);
    let ret_by_arg =
        rkind_raw == TypeKind::Struct as u16 || rkind_raw == TypeKind::LongDouble as u16;

    let mut idx = 0usize;
    let mut ret_scratch = 0u64;
    let result_area: *mut c_void = if ret_by_arg {
        let p = slot(slots, nslots, idx) as usize as *mut c_void;
        idx += 1;
        p
    } else {
        // A direct return is 4 or 8 bytes; 8 covers both.
        &mut ret_scratch as *mut u64 as *mut c_void
    };

    let mut scratch = Scratch::new();
    let mut argv: Vec<*mut c_void> = Vec::with_capacity(nargs);
    for i in 0..nfixed {
        let (arg_type, kind_raw) = unbox_small_structs(*cif_ref.arg_types.add(i));
        let kind = match TypeKind::from_raw(kind_raw) {
            Some(kind) => kind,
            None => fatal("unknown argument kind in prepared closure"),
        };
        match kind {
            TypeKind::UInt8 | TypeKind::SInt8 => {
                // Sub-word stores must still land on word boundaries.
                let p = scratch.alloc(1, 4);
                *p = slot(slots, nslots, idx) as u8;
                idx += 1;
                argv.push(p as *mut c_void);
            }
            TypeKind::UInt16 | TypeKind::SInt16 => {
                let p = scratch.alloc(2, 4);
                (p as *mut u16).write(slot(slots, nslots, idx) as u16);
                idx += 1;
                argv.push(p as *mut c_void);
            }
            TypeKind::Int | TypeKind::UInt32 | TypeKind::SInt32 => {
                let p = scratch.alloc(4, 4);
                (p as *mut u32).write(slot(slots, nslots, idx) as u32);
                idx += 1;
                argv.push(p as *mut c_void);
            }
            TypeKind::Pointer => {
                let p = scratch.alloc(ADDR_BYTES, ADDR_BYTES);
                (p as *mut usize).write(slot(slots, nslots, idx) as usize);
                idx += 1;
                argv.push(p as *mut c_void);
            }
            TypeKind::Struct => {
                // The slot is the struct's address; by-value semantics
                // require a copy before the handler sees it.
                let src = slot(slots, nslots, idx) as usize as *const u8;
                idx += 1;
                let size = (*arg_type).size;
                let align = (*arg_type).alignment as usize;
                argv.push(scratch.copy_in(src, size, align) as *mut c_void);
            }
            TypeKind::Float => {
                let p = scratch.alloc(4, 4);
                (p as *mut u32).write(slot(slots, nslots, idx) as u32);
                idx += 1;
                argv.push(p as *mut c_void);
            }
            TypeKind::Double | TypeKind::UInt64 | TypeKind::SInt64 => {
                let p = scratch.alloc(8, 8);
                (p as *mut u64).write(slot(slots, nslots, idx));
                idx += 1;
                argv.push(p as *mut c_void);
            }
            TypeKind::LongDouble => {
                let p = scratch.alloc(16, 8);
                (p as *mut u64).write(slot(slots, nslots, idx));
                idx += 1;
                (p as *mut u64).add(1).write(slot(slots, nslots, idx));
                idx += 1;
                argv.push(p as *mut c_void);
            }
            TypeKind::Void | TypeKind::Complex => {
                fatal("argument kind survived closure preparation")
            }
        }
    }

    if nfixed < nargs {
        // The last wasm argument is the varargs stack pointer. Each
        // vararg occupies one 4-byte slot there regardless of its size,
        // consistent with how the forward-call side packs them; struct
        // varargs arrive as a pointer to a pointer and are dereferenced
        // once before the by-value copy.
        let mut varargs = slot(slots, nslots, nslots - 1) as usize;
        for i in nfixed..nargs {
            let (arg_type, kind_raw) = unbox_small_structs(*cif_ref.arg_types.add(i));
            if kind_raw == TypeKind::Struct as u16 {
                let src = *(varargs as *const usize) as *const u8;
                let size = (*arg_type).size;
                let align = (*arg_type).alignment as usize;
                argv.push(scratch.copy_in(src, size, align) as *mut c_void);
            } else {
                argv.push(varargs as *mut c_void);
            }
            varargs += 4;
        }
    }

    let fun = match (*closure).fun {
        Some(fun) => fun,
        None => fatal("closure invoked before preparation"),
    };
    logging::trace!(nargs, nfixed, ret_by_arg, "invoking slotted closure");
    fun(cif, result_area, argv.as_mut_ptr(), (*closure).user_data);

    if ret_by_arg {
        return;
    }
    match TypeKind::from_raw(rkind_raw) {
        Some(TypeKind::Void) => {}
        Some(
            TypeKind::Int
            | TypeKind::UInt8
            | TypeKind::SInt8
            | TypeKind::UInt16
            | TypeKind::SInt16
            | TypeKind::UInt32
            | TypeKind::SInt32
            | TypeKind::Float,
        ) => *ret = ret_scratch as u32 as u64,
        Some(TypeKind::Pointer) => {
            *ret = core::ptr::read(&ret_scratch as *const u64 as *const usize) as u64;
        }
        Some(TypeKind::UInt64 | TypeKind::SInt64 | TypeKind::Double) => *ret = ret_scratch,
        _ => fatal("return kind survived closure preparation"),
    }
}
