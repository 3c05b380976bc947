//! Machine-dependent CIF preparation.

use crate::canon::canonicalize_type;
use crate::host;
use crate::logging;
use crate::types::{Abi, Cif, Status, TypeKind, CIF_FLAG_VARARGS, MAX_ARGS};

/// Finish preparing a CIF for the wasm32 calling convention.
///
/// Under the `WASM32` ABI every argument type and the return type is
/// canonicalised in place; the rewrites converge, so
/// preparing the same CIF twice is idempotent. Under `WASM32_EMSCRIPTEN`
/// descriptors are left untouched and unboxed at call time instead; a
/// top-level complex return or argument is refused there with
/// [`Status::BadTypedef`].
///
/// # Safety
///
/// `cif` must point to a CIF whose descriptor vectors are valid for
/// `nargs` entries and mutable, as must every descriptor reachable from
/// them. The caller must not run this concurrently with anything else
/// touching the same descriptor tree.
pub unsafe extern "C" fn prep_cif_machdep(cif: *mut Cif) -> Status {
    let cif = &mut *cif;
    let abi = match Abi::from_raw(cif.abi) {
        Some(abi) if host::abi_supported(abi) => abi,
        _ => return Status::BadAbi,
    };

    match abi {
        Abi::Wasm32 => {
            for i in 0..cif.nargs as usize {
                canonicalize_type(*cif.arg_types.add(i), false);
            }
            canonicalize_type(cif.rtype, true);
        }
        Abi::Wasm32Emscripten => {
            // This variant performs no rewriting. A complex buried inside a
            // struct goes unnoticed, exactly like the unboxer at call time.
            if !cif.rtype.is_null() && (*cif.rtype).kind == TypeKind::Complex as u16 {
                return Status::BadTypedef;
            }
            for i in 0..cif.nargs as usize {
                let arg = *cif.arg_types.add(i);
                if !arg.is_null() && (*arg).kind == TypeKind::Complex as u16 {
                    return Status::BadTypedef;
                }
            }
        }
    }

    // prep_cif_machdep_var runs first for variadic CIFs; keep its
    // nfixedargs in that case.
    if !cif.is_variadic() {
        cif.nfixedargs = cif.nargs;
    }
    if cif.nargs > MAX_ARGS {
        return Status::BadTypedef;
    }

    logging::debug!(
        nargs = cif.nargs,
        nfixedargs = cif.nfixedargs,
        "prepared wasm32 cif"
    );
    Status::Ok
}

/// Record the fixed-argument count of a variadic CIF and mark it variadic.
///
/// Only the JS-hosted variant supports varargs; it charges one extra
/// logical slot for the varargs stack pointer. The WASI-like variant
/// answers [`Status::BadAbi`].
///
/// # Safety
///
/// Same contract as [`prep_cif_machdep`].
pub unsafe extern "C" fn prep_cif_machdep_var(
    cif: *mut Cif,
    nfixedargs: u32,
    _ntotalargs: u32,
) -> Status {
    let cif = &mut *cif;
    cif.flags |= CIF_FLAG_VARARGS;
    cif.nfixedargs = nfixedargs;

    match Abi::from_raw(cif.abi) {
        Some(Abi::Wasm32Emscripten) if host::abi_supported(Abi::Wasm32Emscripten) => {
            if nfixedargs + 1 > MAX_ARGS {
                return Status::BadTypedef;
            }
            Status::Ok
        }
        Some(Abi::Wasm32) if host::abi_supported(Abi::Wasm32) => Status::BadAbi,
        _ => Status::BadAbi,
    }
}
