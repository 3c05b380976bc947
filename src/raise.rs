//! Raising a wasm-ABI value buffer back into typed argument pointers.

use core::ffi::c_void;

use crate::buffer::ValueReader;
use crate::classify::{kind_of, ADDR_BYTES};
use crate::error::fatal;
use crate::types::{Type, TypeKind};

/// Return a pointer usable as a `t*` for the value at the reader's cursor,
/// advancing the cursor by the slot size.
///
/// For scalar kinds the returned pointer aims into the buffer itself. A
/// struct slot holds the address of the struct, so one extra dereference is
/// performed and the result aims at the caller's storage. Little-endian
/// slot packing makes the widened sub-i32 integer slots readable through
/// their narrow type.
///
/// # Safety
///
/// `t` must be a canonical descriptor and the reader's buffer must hold a
/// value of that type at the cursor. Returned pointers live as long as the
/// buffer (or, for structs, the pointee).
pub unsafe fn raise_value(t: *mut Type, values: &mut ValueReader) -> *mut c_void {
    match kind_of(t) {
        TypeKind::Void => values.cursor() as *mut c_void,
        TypeKind::Int
        | TypeKind::UInt8
        | TypeKind::SInt8
        | TypeKind::UInt16
        | TypeKind::SInt16
        | TypeKind::UInt32
        | TypeKind::SInt32
        | TypeKind::Float => {
            let p = values.cursor() as *mut c_void;
            values.advance(4);
            p
        }
        TypeKind::UInt64 | TypeKind::SInt64 | TypeKind::Double => {
            let p = values.cursor() as *mut c_void;
            values.advance(8);
            p
        }
        TypeKind::Pointer => {
            let p = values.cursor() as *mut c_void;
            values.advance(ADDR_BYTES);
            p
        }
        TypeKind::Struct => values.take_addr() as *mut c_void,
        TypeKind::LongDouble => {
            let p = values.cursor() as *mut c_void;
            values.advance(16);
            p
        }
        TypeKind::Complex => fatal("complex type survived canonicalisation"),
    }
}
