//! Pure classification of canonical types against the wasm C ABI.
//!
//! Everything here assumes canonicalisation has already run: COMPLEX never
//! occurs, and a long double return type has been rewritten to a struct.
//! An unknown kind reaching these functions is a canonicalisation bug and
//! takes the fatal path.
//!
//! Address-bearing slots (pointers, structs passed by pointer, the hidden
//! return pointer) are `size_of::<usize>()` wide: 4 bytes on wasm32, which
//! is the shape the wasm C ABI fixes, and the native pointer width when the
//! marshalling core is exercised off-target by the test suite.

use crate::error::fatal;
use crate::types::{SlotKind, Type, TypeKind};

/// Byte width of an address slot.
pub const ADDR_BYTES: usize = core::mem::size_of::<usize>();

/// Decode a descriptor's kind tag, reading null as void.
///
/// # Safety
///
/// `t` must be null or valid for reads.
pub unsafe fn kind_of(t: *const Type) -> TypeKind {
    if t.is_null() {
        return TypeKind::Void;
    }
    match TypeKind::from_raw((*t).kind) {
        Some(kind) => kind,
        None => fatal("unknown type kind in classifier"),
    }
}

/// Size of a canonical type in the wasm C ABI value buffer, in bytes.
pub fn abi_size(kind: TypeKind) -> usize {
    match kind {
        TypeKind::Void => 0,
        TypeKind::Int
        | TypeKind::UInt8
        | TypeKind::SInt8
        | TypeKind::UInt16
        | TypeKind::SInt16
        | TypeKind::UInt32
        | TypeKind::SInt32 => 4,
        TypeKind::Float => 4,
        TypeKind::UInt64 | TypeKind::SInt64 => 8,
        TypeKind::Double => 8,
        TypeKind::Pointer | TypeKind::Struct => ADDR_BYTES,
        TypeKind::LongDouble => 16,
        TypeKind::Complex => fatal("complex type survived canonicalisation"),
    }
}

/// The sequence of wasm primitive slots a canonical type occupies.
pub fn slot_kinds(kind: TypeKind) -> &'static [SlotKind] {
    match kind {
        TypeKind::Void => &[],
        TypeKind::Int
        | TypeKind::UInt8
        | TypeKind::SInt8
        | TypeKind::UInt16
        | TypeKind::SInt16
        | TypeKind::UInt32
        | TypeKind::SInt32
        | TypeKind::Pointer
        | TypeKind::Struct => &[SlotKind::I32],
        TypeKind::Float => &[SlotKind::F32],
        TypeKind::UInt64 | TypeKind::SInt64 => &[SlotKind::I64],
        TypeKind::Double => &[SlotKind::F64],
        TypeKind::LongDouble => &[SlotKind::I64, SlotKind::I64],
        TypeKind::Complex => fatal("complex type survived canonicalisation"),
    }
}

/// Whether a canonical return type is returned through a hidden first
/// pointer argument.
///
/// Only structs return indirectly; a returned long double was rewritten to
/// a struct during CIF preparation, so no direct 16-byte return exists.
///
/// # Safety
///
/// `rtype` must be null or valid for reads.
pub unsafe fn indirect_return(rtype: *const Type) -> bool {
    match kind_of(rtype) {
        TypeKind::Struct => true,
        TypeKind::LongDouble => {
            fatal("long double return type survived canonicalisation")
        }
        TypeKind::Complex => fatal("complex type survived canonicalisation"),
        _ => false,
    }
}
