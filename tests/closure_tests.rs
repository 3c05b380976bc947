//! End-to-end closure tests: allocation, preparation, host-side
//! invocation, and full `ffi_call`-into-closure loops, for both variants.

mod common;

use core::ffi::c_void;

use common::*;
use ffi_wasm32::host::mock;
use ffi_wasm32::{
    closure_alloc, closure_free, ffi_call, prep_cif_machdep, prep_cif_machdep_var,
    prep_closure_loc, Abi, Cif, Closure, SlotKind, Status, TypeKind,
};

/// Allocate a closure object and return (closure, codeloc).
fn alloc_closure() -> (*mut Closure, *mut c_void) {
    let mut code: *mut c_void = core::ptr::null_mut();
    let closure =
        unsafe { closure_alloc(core::mem::size_of::<Closure>(), &mut code) } as *mut Closure;
    assert!(!closure.is_null());
    (closure, code)
}

/// What a handler observed, shared with the test body through `user_data`.
#[derive(Default)]
struct Observed {
    short_arg: u16,
    byte_arg: u8,
}

unsafe extern "C" fn short_char_handler(
    _cif: *mut Cif,
    result: *mut c_void,
    argv: *mut *mut c_void,
    user_data: *mut c_void,
) {
    let observed = &mut *(user_data as *mut Observed);
    observed.short_arg = *(*argv as *const u16);
    observed.byte_arg = *(*argv.add(1) as *const u8);
    *(result as *mut i32) = observed.short_arg as i16 as i32 + observed.byte_arg as i32;
}

#[test]
fn buffered_closure_raises_short_and_char_arguments() {
    let cif = make_cif(Abi::Wasm32, sint32(), &[sint16(), sint8()]);
    assert_eq!(unsafe { prep_cif_machdep(cif) }, Status::Ok);

    let (closure, code) = alloc_closure();
    let mut observed = Observed::default();
    let status = unsafe {
        prep_closure_loc(
            closure,
            cif,
            short_char_handler,
            &mut observed as *mut Observed as *mut c_void,
            code,
        )
    };
    assert_eq!(status, Status::Ok);

    // The host was told the wasm-level signature: two i32 arguments in,
    // one i32 result out.
    let meta = mock::installed_meta(code as usize as u32).unwrap();
    assert_eq!(meta.arg_kinds, vec![SlotKind::I32, SlotKind::I32]);
    assert_eq!(meta.result_kinds, vec![SlotKind::I32]);

    // Invoke from the host side with wasm arguments (-1, 1).
    let mut values = Vec::new();
    values.extend_from_slice(&(-1i32).to_le_bytes());
    values.extend_from_slice(&1i32.to_le_bytes());
    let mut results = [0u8; 4];
    mock::invoke_buffered(code as usize as u32, &values, &mut results).unwrap();

    assert_eq!(observed.short_arg, 0xFFFF);
    assert_eq!(observed.byte_arg, 0x01);
    assert_eq!(i32::from_le_bytes(results), 0);

    unsafe { closure_free(closure as *mut c_void) };
}

unsafe extern "C" fn echo_u64_handler(
    _cif: *mut Cif,
    result: *mut c_void,
    argv: *mut *mut c_void,
    _user_data: *mut c_void,
) {
    *(result as *mut u64) = *(*argv as *const u64);
}

#[test]
fn buffered_closure_round_trips_u64_through_ffi_call() {
    let t = uint64();
    let cif = make_cif(Abi::Wasm32, t, &[t]);
    assert_eq!(unsafe { prep_cif_machdep(cif) }, Status::Ok);

    let (closure, code) = alloc_closure();
    let status = unsafe {
        prep_closure_loc(closure, cif, echo_u64_handler, core::ptr::null_mut(), code)
    };
    assert_eq!(status, Status::Ok);

    let mut v = 0xDEAD_BEEF_CAFE_F00Du64;
    let mut r = 0u64;
    let mut args = argv(&[&mut v as *mut u64 as *mut c_void]);
    unsafe { ffi_call(cif, code, &mut r as *mut u64 as *mut c_void, args.as_mut_ptr()) };
    assert_eq!(r, v);

    unsafe { closure_free(closure as *mut c_void) };
}

unsafe extern "C" fn echo_bytes_handler(
    cif: *mut Cif,
    result: *mut c_void,
    argv: *mut *mut c_void,
    _user_data: *mut c_void,
) {
    let size = (*(*cif).rtype).size;
    core::ptr::copy_nonoverlapping(*argv as *const u8, result as *mut u8, size);
}

#[test]
fn buffered_closure_round_trips_struct_through_ffi_call() {
    #[repr(C)]
    #[derive(Clone, Copy, PartialEq, Debug)]
    struct Mixed {
        a: i32,
        b: f64,
        c: u8,
        d: u64,
    }

    let fields = [sint32(), double(), leak_type(1, 1, TypeKind::UInt8), uint64()];
    let rtype = struct_type(&fields);
    let atype = struct_type(&fields);
    let cif = make_cif(Abi::Wasm32, rtype, &[atype]);
    assert_eq!(unsafe { prep_cif_machdep(cif) }, Status::Ok);
    assert_eq!(unsafe { (*rtype).size }, core::mem::size_of::<Mixed>());

    let (closure, code) = alloc_closure();
    let status = unsafe {
        prep_closure_loc(closure, cif, echo_bytes_handler, core::ptr::null_mut(), code)
    };
    assert_eq!(status, Status::Ok);
    // Indirect return: the hidden pointer is the only wasm result channel.
    let meta = mock::installed_meta(code as usize as u32).unwrap();
    assert_eq!(meta.arg_kinds, vec![SlotKind::I32, SlotKind::I32]);
    assert!(meta.result_kinds.is_empty());

    let mut v = Mixed {
        a: -7,
        b: 2.25,
        c: 9,
        d: u64::MAX - 3,
    };
    let mut r = Mixed {
        a: 0,
        b: 0.0,
        c: 0,
        d: 0,
    };
    let mut args = argv(&[&mut v as *mut Mixed as *mut c_void]);
    unsafe { ffi_call(cif, code, &mut r as *mut Mixed as *mut c_void, args.as_mut_ptr()) };
    assert_eq!(r, v);

    unsafe { closure_free(closure as *mut c_void) };
}

#[test]
fn buffered_closure_round_trips_longdouble_through_ffi_call() {
    let cif = make_cif(Abi::Wasm32, longdouble(), &[longdouble()]);
    assert_eq!(unsafe { prep_cif_machdep(cif) }, Status::Ok);

    let (closure, code) = alloc_closure();
    let status = unsafe {
        prep_closure_loc(closure, cif, echo_bytes_handler, core::ptr::null_mut(), code)
    };
    assert_eq!(status, Status::Ok);
    // Two i64 argument slots behind the hidden return pointer.
    let meta = mock::installed_meta(code as usize as u32).unwrap();
    assert_eq!(
        meta.arg_kinds,
        vec![SlotKind::I32, SlotKind::I64, SlotKind::I64]
    );

    let mut v: u128 = (11u128 << 64) | 22;
    let mut r: u128 = 0;
    let mut args = argv(&[&mut v as *mut u128 as *mut c_void]);
    unsafe { ffi_call(cif, code, &mut r as *mut u128 as *mut c_void, args.as_mut_ptr()) };
    assert_eq!(r, v);

    unsafe { closure_free(closure as *mut c_void) };
}

unsafe extern "C" fn echo_i32_handler(
    _cif: *mut Cif,
    result: *mut c_void,
    argv: *mut *mut c_void,
    _user_data: *mut c_void,
) {
    *(result as *mut i32) = *(*argv as *const i32);
}

#[test]
fn slotted_closure_round_trips_i32() {
    let int = sint32();
    let cif = make_cif(Abi::Wasm32Emscripten, int, &[int]);
    assert_eq!(unsafe { prep_cif_machdep(cif) }, Status::Ok);

    let (closure, code) = alloc_closure();
    let status = unsafe {
        prep_closure_loc(closure, cif, echo_i32_handler, core::ptr::null_mut(), code)
    };
    assert_eq!(status, Status::Ok);
    let meta = mock::installed_meta(code as usize as u32).unwrap();
    assert_eq!(meta.signature.as_deref(), Some("ii"));

    // Host-side invocation with a raw wasm value.
    let ret = mock::invoke_slotted(code as usize as u32, &[41]).unwrap();
    assert_eq!(ret as u32, 41);

    // And the full loop through ffi_call.
    let mut v = -12345i32;
    let mut r = 0i32;
    let mut args = argv(&[&mut v as *mut i32 as *mut c_void]);
    unsafe { ffi_call(cif, code, &mut r as *mut i32 as *mut c_void, args.as_mut_ptr()) };
    assert_eq!(r, v);

    unsafe { closure_free(closure as *mut c_void) };
}

#[test]
fn slotted_closure_raises_short_and_char_arguments() {
    let cif = make_cif(Abi::Wasm32Emscripten, sint32(), &[sint16(), sint8()]);
    assert_eq!(unsafe { prep_cif_machdep(cif) }, Status::Ok);

    let (closure, code) = alloc_closure();
    let mut observed = Observed::default();
    let status = unsafe {
        prep_closure_loc(
            closure,
            cif,
            short_char_handler,
            &mut observed as *mut Observed as *mut c_void,
            code,
        )
    };
    assert_eq!(status, Status::Ok);
    let meta = mock::installed_meta(code as usize as u32).unwrap();
    assert_eq!(meta.signature.as_deref(), Some("iii"));

    let ret =
        mock::invoke_slotted(code as usize as u32, &[(-1i32) as u32 as u64, 1]).unwrap();
    assert_eq!(observed.short_arg, 0xFFFF);
    assert_eq!(observed.byte_arg, 0x01);
    assert_eq!(ret as u32 as i32, 0);

    unsafe { closure_free(closure as *mut c_void) };
}

unsafe extern "C" fn struct_sum_handler(
    _cif: *mut Cif,
    result: *mut c_void,
    argv: *mut *mut c_void,
    user_data: *mut c_void,
) {
    // Sum two i32 fields, then scribble on the copy to prove the caller's
    // storage is insulated.
    let p = *argv as *mut i32;
    *(result as *mut i32) = *p + *p.add(1);
    *(user_data as *mut usize) = p as usize;
    *p = -1;
}

#[test]
fn slotted_closure_copies_struct_arguments_by_value() {
    let int = sint32();
    let pair = struct_type(&[int, int]);
    let cif = make_cif(Abi::Wasm32Emscripten, int, &[pair]);
    assert_eq!(unsafe { prep_cif_machdep(cif) }, Status::Ok);

    let (closure, code) = alloc_closure();
    let mut seen_addr = 0usize;
    let status = unsafe {
        prep_closure_loc(
            closure,
            cif,
            struct_sum_handler,
            &mut seen_addr as *mut usize as *mut c_void,
            code,
        )
    };
    assert_eq!(status, Status::Ok);

    let mut original = [15i32, 27i32];
    let ret = mock::invoke_slotted(
        code as usize as u32,
        &[original.as_mut_ptr() as usize as u64],
    )
    .unwrap();
    assert_eq!(ret as u32 as i32, 42);
    assert_ne!(seen_addr, original.as_ptr() as usize);
    assert_eq!(original, [15, 27]);

    unsafe { closure_free(closure as *mut c_void) };
}

#[test]
fn slotted_closure_returns_struct_through_hidden_pointer() {
    #[repr(C)]
    #[derive(Clone, Copy, PartialEq, Debug)]
    struct Pair {
        x: i32,
        y: i32,
    }

    let int = sint32();
    let pair_ret = struct_type(&[int, int]);
    let pair_arg = struct_type(&[int, int]);
    let cif = make_cif(Abi::Wasm32Emscripten, pair_ret, &[pair_arg]);
    assert_eq!(unsafe { prep_cif_machdep(cif) }, Status::Ok);

    let (closure, code) = alloc_closure();
    let status = unsafe {
        prep_closure_loc(closure, cif, echo_bytes_handler, core::ptr::null_mut(), code)
    };
    assert_eq!(status, Status::Ok);
    let meta = mock::installed_meta(code as usize as u32).unwrap();
    assert_eq!(meta.signature.as_deref(), Some("vii"));

    let mut v = Pair { x: 3, y: 4 };
    let mut r = Pair { x: 0, y: 0 };
    let slots = [
        &mut r as *mut Pair as usize as u64,
        &mut v as *mut Pair as usize as u64,
    ];
    mock::invoke_slotted(code as usize as u32, &slots).unwrap();
    assert_eq!(r, v);

    unsafe { closure_free(closure as *mut c_void) };
}

unsafe extern "C" fn varargs_sum_handler(
    cif: *mut Cif,
    result: *mut c_void,
    argv: *mut *mut c_void,
    _user_data: *mut c_void,
) {
    let nargs = (*cif).nargs as usize;
    let mut sum = 0i32;
    for i in 0..nargs {
        sum += *(*argv.add(i) as *const i32);
    }
    *(result as *mut i32) = sum;
}

#[test]
fn slotted_closure_walks_varargs_with_fixed_stride() {
    let int = sint32();
    let cif = make_cif(Abi::Wasm32Emscripten, int, &[int, int, int]);
    assert_eq!(unsafe { prep_cif_machdep_var(cif, 1, 3) }, Status::Ok);
    assert_eq!(unsafe { prep_cif_machdep(cif) }, Status::Ok);

    let (closure, code) = alloc_closure();
    let status = unsafe {
        prep_closure_loc(closure, cif, varargs_sum_handler, core::ptr::null_mut(), code)
    };
    assert_eq!(status, Status::Ok);
    // One fixed i32 letter plus the trailing varargs pointer.
    let meta = mock::installed_meta(code as usize as u32).unwrap();
    assert_eq!(meta.signature.as_deref(), Some("iii"));

    // The varargs region packs one 4-byte slot per argument.
    let region = [200i32, 300i32];
    let slots = [100u64, region.as_ptr() as usize as u64];
    let ret = mock::invoke_slotted(code as usize as u32, &slots).unwrap();
    assert_eq!(ret as u32 as i32, 600);

    unsafe { closure_free(closure as *mut c_void) };
}

#[test]
fn freed_slot_is_reusable_for_a_new_closure() {
    let int = sint32();
    let cif = make_cif(Abi::Wasm32, int, &[int]);
    assert_eq!(unsafe { prep_cif_machdep(cif) }, Status::Ok);

    let (closure, code) = alloc_closure();
    let status = unsafe {
        prep_closure_loc(closure, cif, echo_i32_handler, core::ptr::null_mut(), code)
    };
    assert_eq!(status, Status::Ok);

    let mut v = 5i32;
    let mut r = 0i32;
    let mut args = argv(&[&mut v as *mut i32 as *mut c_void]);
    unsafe { ffi_call(cif, code, &mut r as *mut i32 as *mut c_void, args.as_mut_ptr()) };
    assert_eq!(r, 5);

    unsafe { closure_free(closure as *mut c_void) };

    // A fresh closure allocates, prepares and runs after the release.
    let (closure2, code2) = alloc_closure();
    let status = unsafe {
        prep_closure_loc(closure2, cif, echo_i32_handler, core::ptr::null_mut(), code2)
    };
    assert_eq!(status, Status::Ok);
    let mut r2 = 0i32;
    let mut v2 = 9i32;
    let mut args2 = argv(&[&mut v2 as *mut i32 as *mut c_void]);
    unsafe { ffi_call(cif, code2, &mut r2 as *mut i32 as *mut c_void, args2.as_mut_ptr()) };
    assert_eq!(r2, 9);

    unsafe { closure_free(closure2 as *mut c_void) };
}

#[test]
fn prep_closure_rejects_unknown_abi() {
    let int = sint32();
    let cif = make_cif(Abi::Wasm32, int, &[int]);
    assert_eq!(unsafe { prep_cif_machdep(cif) }, Status::Ok);
    unsafe { (*cif).abi = 9 };

    let (closure, code) = alloc_closure();
    let status = unsafe {
        prep_closure_loc(closure, cif, echo_i32_handler, core::ptr::null_mut(), code)
    };
    assert_eq!(status, Status::BadAbi);
    unsafe { closure_free(closure as *mut c_void) };
}
