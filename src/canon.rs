//! In-place type canonicalisation.
//!
//! Before the rest of the core looks at a descriptor tree, every
//! user-supplied type is reduced to a small set of canonical shapes:
//!
//! * complex numbers become a struct of two floating-point fields of the
//!   underlying kind (real and imaginary parts),
//! * a long double in return position becomes a struct of two 64-bit
//!   signed integers,
//! * a struct with size zero becomes void,
//! * a struct that recursively holds exactly one non-void scalar becomes
//!   that scalar (keeping its original size and alignment),
//! * struct fields are rewritten recursively by the same rules.
//!
//! Afterwards no reachable descriptor is COMPLEX, every surviving STRUCT
//! has more than one non-void element, and a long double return type no
//! longer exists. The rewrites converge after one pass, so running them
//! again over an already-canonical tree is a no-op.

use core::ptr;

use once_cell::sync::Lazy;

use crate::error::fatal;
use crate::types::{Type, TypeKind};

/// The element vectors spliced into rewritten descriptors. They are built
/// once and shared by every rewrite, which is what makes a second pass over
/// a rewritten descriptor converge instead of re-allocating.
struct Splices {
    complex_float: [*mut Type; 3],
    complex_double: [*mut Type; 3],
    complex_longdouble: [*mut Type; 3],
    longdouble_return: [*mut Type; 3],
}

// The arrays hold leaked leaf descriptors that are never written after
// construction.
unsafe impl Sync for Splices {}
unsafe impl Send for Splices {}

static SPLICES: Lazy<Splices> = Lazy::new(|| {
    fn leaf(size: usize, alignment: u16, kind: TypeKind) -> *mut Type {
        Box::into_raw(Box::new(Type::scalar(size, alignment, kind)))
    }
    let float = leaf(4, 4, TypeKind::Float);
    let double = leaf(8, 8, TypeKind::Double);
    let longdouble = leaf(16, 16, TypeKind::LongDouble);
    let sint64 = leaf(8, 8, TypeKind::SInt64);
    Splices {
        complex_float: [float, float, ptr::null_mut()],
        complex_double: [double, double, ptr::null_mut()],
        complex_longdouble: [longdouble, longdouble, ptr::null_mut()],
        longdouble_return: [sint64, sint64, ptr::null_mut()],
    }
});

/// Canonicalise `t` in place and return its new kind tag.
///
/// A null `t` reads as void; that is only legal for a return type.
///
/// # Safety
///
/// `t` must be null or point to a descriptor whose `elements` vector (when
/// the kind requires one) is null-terminated and mutable, with the same
/// holding recursively. No other thread may touch the tree during the
/// rewrite.
pub(crate) unsafe fn canonicalize_type(t: *mut Type, in_result: bool) -> u16 {
    if t.is_null() {
        return TypeKind::Void as u16;
    }
    let ty = &mut *t;

    if ty.kind == TypeKind::Complex as u16 {
        // Complex types are passed as a struct of the real and imaginary
        // parts. The underlying kind is the first (and only) element.
        let elem_ptr = first_element(ty);
        let elem = &*elem_ptr;
        let spliced: &[*mut Type; 3] = match TypeKind::from_raw(elem.kind) {
            Some(TypeKind::Float) => &SPLICES.complex_float,
            Some(TypeKind::Double) => &SPLICES.complex_double,
            Some(TypeKind::LongDouble) => &SPLICES.complex_longdouble,
            _ => fatal("only float, double and long double complex types are supported"),
        };
        ty.kind = TypeKind::Struct as u16;
        ty.size = elem.size * 2;
        ty.alignment = elem.alignment;
        ty.elements = spliced.as_ptr() as *mut *mut Type;
        return TypeKind::Struct as u16;
    }

    if in_result && ty.kind == TypeKind::LongDouble as u16 {
        // A returned long double is treated as a struct of two i64 halves
        // and therefore comes back through the hidden result pointer.
        ty.kind = TypeKind::Struct as u16;
        ty.size = 16;
        ty.alignment = 16;
        ty.elements = SPLICES.longdouble_return.as_ptr() as *mut *mut Type;
        return TypeKind::Struct as u16;
    }

    if ty.kind == TypeKind::Struct as u16 {
        if ty.size == 0 {
            ty.kind = TypeKind::Void as u16;
            return TypeKind::Void as u16;
        }

        let mut scalar_kind = TypeKind::Void as u16;
        let mut nonvoid = 0usize;
        let mut i = 0usize;
        loop {
            let elem = *ty.elements.add(i);
            if elem.is_null() {
                break;
            }
            let elem_kind = canonicalize_type(elem, false);
            if elem_kind != TypeKind::Void as u16 {
                scalar_kind = elem_kind;
                nonvoid += 1;
            }
            i += 1;
        }

        if nonvoid > 1 {
            return ty.kind;
        }

        // A struct around a single scalar is passed as that scalar. Size
        // and alignment are deliberately left alone.
        ty.kind = scalar_kind;
        return scalar_kind;
    }

    ty.kind
}

/// Runtime struct unboxing for the emscripten variant, which never rewrites
/// descriptors at preparation time.
///
/// Follows single-element struct wrappers down to the wrapped scalar and
/// returns the final descriptor with its kind tag. Zero-element structs
/// read as void. Structs larger than 16 bytes are left boxed: front-ends
/// are known to report pointer-shaped sizes for small wrapper structs, and
/// keeping the large ones as structs passes them by pointer, which is the
/// ABI they actually have.
///
/// # Safety
///
/// `t` must be null or point to a descriptor valid for the returned
/// reference's use, with a null-terminated `elements` vector whenever the
/// kind is STRUCT.
pub(crate) unsafe fn unbox_small_structs(t: *mut Type) -> (*mut Type, u16) {
    if t.is_null() {
        return (t, TypeKind::Void as u16);
    }
    let mut ty = t;
    let mut kind = (*ty).kind;
    while kind == TypeKind::Struct as u16 {
        if (*ty).size > 16 {
            break;
        }
        let elements = (*ty).elements;
        if elements.is_null() {
            fatal("struct descriptor without an element vector");
        }
        let first = *elements;
        if first.is_null() {
            kind = TypeKind::Void as u16;
            break;
        } else if (*elements.add(1)).is_null() {
            ty = first;
            kind = (*first).kind;
        } else {
            break;
        }
    }
    (ty, kind)
}

unsafe fn first_element(ty: &Type) -> *mut Type {
    if ty.elements.is_null() {
        fatal("complex descriptor without an element vector");
    }
    let first = *ty.elements;
    if first.is_null() {
        fatal("complex descriptor with an empty element vector");
    }
    first
}
