//! Lowering typed argument values into a wasm-ABI value buffer.

use core::ffi::c_void;

use crate::buffer::ValueWriter;
use crate::classify::kind_of;
use crate::error::fatal;
use crate::types::{Type, TypeKind};

/// Write the value at `value`, interpreted as canonical type `t`, into the
/// buffer behind `out`, advancing the cursor by the type's wasm-ABI size.
///
/// Integers narrower than i32 are widened to a full i32 slot following
/// their signedness. Structs are passed by pointer: the slot receives the
/// address of the caller-owned value, not its bytes. Long doubles are 16
/// raw bytes.
///
/// # Safety
///
/// `t` must be a canonical descriptor and `value` must point to a live
/// value of that type.
pub unsafe fn lower_value(t: *mut Type, value: *mut c_void, out: &mut ValueWriter<'_>) {
    match kind_of(t) {
        TypeKind::Void => {}
        TypeKind::UInt8 => {
            let widened = *(value as *const u8) as u32;
            out.put(&widened.to_le_bytes());
        }
        TypeKind::SInt8 => {
            let widened = *(value as *const i8) as i32;
            out.put(&widened.to_le_bytes());
        }
        TypeKind::UInt16 => {
            let widened = *(value as *const u16) as u32;
            out.put(&widened.to_le_bytes());
        }
        TypeKind::SInt16 => {
            let widened = *(value as *const i16) as i32;
            out.put(&widened.to_le_bytes());
        }
        TypeKind::Int | TypeKind::SInt32 | TypeKind::UInt32 => {
            out.put(&(*(value as *const u32)).to_le_bytes());
        }
        TypeKind::Float => {
            out.put(&(*(value as *const f32)).to_le_bytes());
        }
        TypeKind::UInt64 | TypeKind::SInt64 => {
            out.put(&(*(value as *const u64)).to_le_bytes());
        }
        TypeKind::Double => {
            out.put(&(*(value as *const f64)).to_le_bytes());
        }
        TypeKind::Pointer => {
            out.put_addr(*(value as *const usize));
        }
        TypeKind::Struct => {
            // Passed indirectly: the slot holds the address of the value.
            out.put_addr(value as usize);
        }
        TypeKind::LongDouble => {
            let raw = core::slice::from_raw_parts(value as *const u8, 16);
            out.put(raw);
        }
        TypeKind::Complex => fatal("complex type survived canonicalisation"),
    }
}
