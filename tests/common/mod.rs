//! Common test fixtures: leaked descriptor and CIF builders.
//!
//! Descriptors are shared with the core by raw pointer and mutated in
//! place during preparation, so fixtures leak their allocations instead of
//! juggling lifetimes.

#![allow(dead_code)]

use core::ffi::c_void;
use std::ptr;

use ffi_wasm32::{Abi, Cif, Type, TypeKind};

pub fn leak_type(size: usize, alignment: u16, kind: TypeKind) -> *mut Type {
    Box::into_raw(Box::new(Type::scalar(size, alignment, kind)))
}

pub fn sint8() -> *mut Type {
    leak_type(1, 1, TypeKind::SInt8)
}

pub fn sint16() -> *mut Type {
    leak_type(2, 2, TypeKind::SInt16)
}

pub fn sint32() -> *mut Type {
    leak_type(4, 4, TypeKind::SInt32)
}

pub fn uint64() -> *mut Type {
    leak_type(8, 8, TypeKind::UInt64)
}

pub fn float() -> *mut Type {
    leak_type(4, 4, TypeKind::Float)
}

pub fn double() -> *mut Type {
    leak_type(8, 8, TypeKind::Double)
}

pub fn longdouble() -> *mut Type {
    leak_type(16, 16, TypeKind::LongDouble)
}

fn align_to(val: usize, align: usize) -> usize {
    (val + align - 1) & !(align - 1)
}

/// Build a struct descriptor over the given field descriptors, laid out
/// the way a C compiler would (fields at aligned offsets, total size
/// rounded up to the struct alignment).
pub fn struct_type(fields: &[*mut Type]) -> *mut Type {
    let mut size = 0usize;
    let mut alignment = 1u16;
    for &field in fields {
        let (fsize, falign) = unsafe { ((*field).size, (*field).alignment.max(1)) };
        alignment = alignment.max(falign);
        size = align_to(size, falign as usize) + fsize;
    }
    let size = align_to(size, alignment as usize);

    let mut elements: Vec<*mut Type> = fields.to_vec();
    elements.push(ptr::null_mut());
    let elements = Box::into_raw(elements.into_boxed_slice()) as *mut *mut Type;

    Box::into_raw(Box::new(Type {
        size,
        alignment,
        kind: TypeKind::Struct as u16,
        elements,
    }))
}

/// Build a complex descriptor over the given element kind, following the
/// front-end convention that `elements` holds the underlying type.
pub fn complex_type(elem: *mut Type) -> *mut Type {
    let (esize, ealign) = unsafe { ((*elem).size, (*elem).alignment) };
    let elements =
        Box::into_raw(vec![elem, ptr::null_mut()].into_boxed_slice()) as *mut *mut Type;
    Box::into_raw(Box::new(Type {
        size: esize * 2,
        alignment: ealign,
        kind: TypeKind::Complex as u16,
        elements,
    }))
}

/// Build a non-variadic CIF over leaked argument storage.
pub fn make_cif(abi: Abi, rtype: *mut Type, args: &[*mut Type]) -> *mut Cif {
    let arg_types = Box::into_raw(args.to_vec().into_boxed_slice()) as *mut *mut Type;
    Box::into_raw(Box::new(Cif {
        abi: abi as u32,
        nargs: args.len() as u32,
        arg_types,
        rtype,
        bytes: 0,
        flags: 0,
        nfixedargs: args.len() as u32,
    }))
}

/// Shorthand for an argument-pointer vector.
pub fn argv(values: &[*mut c_void]) -> Vec<*mut c_void> {
    values.to_vec()
}
