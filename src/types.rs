//! Descriptor layout shared with the generic front-end.
//!
//! The front-end owns the descriptor objects; this module only fixes their
//! memory layout and the small enumerations the core reads out of them.
//! The byte offsets of [`Cif`], [`Type`] and [`Closure`] fields are part of
//! the contract with the front-end and are asserted at compile time on
//! 32-bit targets (the layout the front-end is written against).

use core::ffi::c_void;
use core::ptr;

/// Most wasm runtimes support at most 1000 trampoline arguments.
pub const MAX_ARGS: u32 = 1000;

/// Bit 0 of [`Cif::flags`]: the CIF describes a variadic call.
pub const CIF_FLAG_VARARGS: u32 = 1;

/// Status codes returned to the generic front-end.
///
/// `Ok` and `BadTypedef` must be numerically 0 and 1; the front-end matches
/// on the raw integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Status {
    Ok = 0,
    BadTypedef = 1,
    BadAbi = 2,
}

const _: () = assert!(Status::Ok as u32 == 0);
const _: () = assert!(Status::BadTypedef as u32 == 1);

/// ABI tags understood by the wasm32 core. Any other tag is refused with
/// [`Status::BadAbi`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Abi {
    /// The WASI-like variant: typed-buffer host primitives, no varargs.
    Wasm32 = 1,
    /// The JS-hosted variant: computed-signature trampolines, varargs.
    Wasm32Emscripten = 2,
}

impl Abi {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Wasm32),
            2 => Some(Self::Wasm32Emscripten),
            _ => None,
        }
    }
}

/// Type tags stored in [`Type::kind`].
///
/// Descriptors arrive from a foreign front-end, so the struct field itself
/// stays a raw `u16`; [`TypeKind::from_raw`] is the only way tags enter the
/// core, and an unrecognised tag is reported through the fatal path by the
/// classifier rather than silently reinterpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum TypeKind {
    Void = 0,
    Int = 1,
    Float = 2,
    Double = 3,
    LongDouble = 4,
    UInt8 = 5,
    SInt8 = 6,
    UInt16 = 7,
    SInt16 = 8,
    UInt32 = 9,
    SInt32 = 10,
    UInt64 = 11,
    SInt64 = 12,
    Struct = 13,
    Pointer = 14,
    Complex = 15,
}

impl TypeKind {
    pub fn from_raw(raw: u16) -> Option<Self> {
        Some(match raw {
            0 => Self::Void,
            1 => Self::Int,
            2 => Self::Float,
            3 => Self::Double,
            4 => Self::LongDouble,
            5 => Self::UInt8,
            6 => Self::SInt8,
            7 => Self::UInt16,
            8 => Self::SInt16,
            9 => Self::UInt32,
            10 => Self::SInt32,
            11 => Self::UInt64,
            12 => Self::SInt64,
            13 => Self::Struct,
            14 => Self::Pointer,
            15 => Self::Complex,
            _ => return None,
        })
    }
}

/// Wasm primitive value kinds, in the neutral encoding handed to the host
/// (`I32 = 0, I64 = 1, F32 = 2, F64 = 3`). Host bindings re-map these to
/// the host's own constants if it defines different ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotKind {
    I32 = 0,
    I64 = 1,
    F32 = 2,
    F64 = 3,
}

/// One C type, as described by the front-end.
///
/// `elements` is an externally-owned null-terminated vector of child
/// descriptors, present when `kind` is STRUCT or COMPLEX. Canonicalisation
/// mutates descriptors in place.
#[repr(C)]
#[derive(Debug)]
pub struct Type {
    pub size: usize,
    pub alignment: u16,
    pub kind: u16,
    pub elements: *mut *mut Type,
}

impl Type {
    /// A fresh scalar descriptor with no elements.
    pub const fn scalar(size: usize, alignment: u16, kind: TypeKind) -> Self {
        Self {
            size,
            alignment,
            kind: kind as u16,
            elements: ptr::null_mut(),
        }
    }
}

/// One call site: ABI, argument types, return type.
///
/// `rtype` may be null, meaning void. `nfixedargs` equals `nargs` unless
/// the VARARGS flag is set. `bytes` is owned by the generic front-end and
/// not interpreted here.
#[repr(C)]
#[derive(Debug)]
pub struct Cif {
    pub abi: u32,
    pub nargs: u32,
    pub arg_types: *mut *mut Type,
    pub rtype: *mut Type,
    pub bytes: u32,
    pub flags: u32,
    pub nfixedargs: u32,
}

impl Cif {
    pub fn is_variadic(&self) -> bool {
        self.flags & CIF_FLAG_VARARGS != 0
    }
}

/// The user handler a prepared closure forwards to:
/// `(cif, result_area, argv, user_data)`.
pub type ClosureHandler =
    unsafe extern "C" fn(*mut Cif, *mut c_void, *mut *mut c_void, *mut c_void);

/// The fixed backing function installed behind every WASI-variant closure:
/// `(argument_buffer, result_buffer, user_data)`, buffers in the
/// `call_dynamic` packing.
pub type ClosureBackingFn = unsafe extern "C" fn(*mut u8, *mut u8, *mut c_void);

/// One dynamically-constructed callable bound to a table slot.
#[repr(C)]
#[derive(Debug)]
pub struct Closure {
    /// Opaque: the table index / code location this closure answers at.
    pub ftramp: *mut c_void,
    pub cif: *mut Cif,
    pub fun: Option<ClosureHandler>,
    pub user_data: *mut c_void,
}

// The front-end addresses these structs by byte offset; the offsets below
// are fixed on 32-bit pointer targets.
#[cfg(target_pointer_width = "32")]
mod layout {
    use core::mem::offset_of;

    use super::{Cif, Closure, Type};

    const _: () = assert!(offset_of!(Cif, abi) == 0);
    const _: () = assert!(offset_of!(Cif, nargs) == 4);
    const _: () = assert!(offset_of!(Cif, arg_types) == 8);
    const _: () = assert!(offset_of!(Cif, rtype) == 12);
    const _: () = assert!(offset_of!(Cif, nfixedargs) == 24);

    const _: () = assert!(offset_of!(Type, size) == 0);
    const _: () = assert!(offset_of!(Type, alignment) == 4);
    const _: () = assert!(offset_of!(Type, kind) == 6);
    const _: () = assert!(offset_of!(Type, elements) == 8);

    const _: () = assert!(offset_of!(Closure, ftramp) == 0);
    const _: () = assert!(offset_of!(Closure, cif) == 4);
    const _: () = assert!(offset_of!(Closure, fun) == 8);
    const _: () = assert!(offset_of!(Closure, user_data) == 12);
}
