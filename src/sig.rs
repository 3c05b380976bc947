//! Wasm signature strings for the JS-hosted variant.
//!
//! The trampoline installed for a closure (and the onward call made by
//! `ffi_call`) is shaped by a signature string the host understands:
//! `v` void, `i` i32, `j` i64, `f` f32, `d` f64, return letter first.
//! Struct and long double returns go through a hidden pointer argument, so
//! they read `v` followed by a synthetic leading `i`. A long double
//! argument is a pair of `j` letters, and a variadic call carries one
//! trailing `i` for the varargs stack pointer.

use crate::canon::unbox_small_structs;
use crate::error::fatal;
use crate::types::{Cif, TypeKind};

pub(crate) struct Signature {
    pub text: String,
    /// The C return value travels through a hidden first pointer argument.
    pub ret_by_arg: bool,
}

/// Build the signature for calling the function a CIF describes.
///
/// # Safety
///
/// `cif` must reference descriptor vectors valid for `nargs` entries.
pub(crate) unsafe fn wasm_signature(cif: &Cif) -> Signature {
    let mut text = String::with_capacity(cif.nargs as usize + 2);
    let mut ret_by_arg = false;

    let (_, rkind) = unbox_small_structs(cif.rtype);
    match TypeKind::from_raw(rkind) {
        Some(TypeKind::Void) => text.push('v'),
        Some(TypeKind::Struct) | Some(TypeKind::LongDouble) => {
            text.push('v');
            text.push('i');
            ret_by_arg = true;
        }
        Some(
            TypeKind::Int
            | TypeKind::UInt8
            | TypeKind::SInt8
            | TypeKind::UInt16
            | TypeKind::SInt16
            | TypeKind::UInt32
            | TypeKind::SInt32
            | TypeKind::Pointer,
        ) => text.push('i'),
        Some(TypeKind::Float) => text.push('f'),
        Some(TypeKind::Double) => text.push('d'),
        Some(TypeKind::UInt64 | TypeKind::SInt64) => text.push('j'),
        Some(TypeKind::Complex) => fatal("complex return marshalling is not implemented"),
        None => fatal("unknown return type kind in signature"),
    }

    for i in 0..cif.nfixedargs as usize {
        let (_, akind) = unbox_small_structs(*cif.arg_types.add(i));
        match TypeKind::from_raw(akind) {
            Some(
                TypeKind::Int
                | TypeKind::UInt8
                | TypeKind::SInt8
                | TypeKind::UInt16
                | TypeKind::SInt16
                | TypeKind::UInt32
                | TypeKind::SInt32
                | TypeKind::Pointer
                | TypeKind::Struct,
            ) => text.push('i'),
            Some(TypeKind::Float) => text.push('f'),
            Some(TypeKind::Double) => text.push('d'),
            Some(TypeKind::UInt64 | TypeKind::SInt64) => text.push('j'),
            Some(TypeKind::LongDouble) => text.push_str("jj"),
            Some(TypeKind::Complex) => fatal("complex argument marshalling is not implemented"),
            _ => fatal("unexpected argument type kind in signature"),
        }
    }

    if cif.nfixedargs < cif.nargs {
        // Extra pointer to the varargs stack.
        text.push('i');
    }

    Signature { text, ret_by_arg }
}
