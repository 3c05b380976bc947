//! An in-process host for exercising the core off-target.
//!
//! Models the two host surfaces over one process-wide function table:
//! buffered entries answer the WASI-like `call_dynamic` convention, and
//! slotted entries answer JS-style calls carrying 64-bit wasm value slots.
//! Tests register callees with [`register_buffered`] / [`register_slotted`]
//! and drive installed closures from the "host side" with
//! [`invoke_buffered`] / [`invoke_slotted`].

use core::ffi::c_void;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use once_cell::sync::Lazy;

use crate::error::HostError;
use crate::types::{Closure, ClosureBackingFn, SlotKind};

/// A raw pointer that crosses the table's `Send + Sync` bound. The table
/// only stores it; the pointee's thread discipline is the caller's
/// problem, exactly as it is for a real wasm table.
#[derive(Clone, Copy)]
struct SendPtr(*mut c_void);
unsafe impl Send for SendPtr {}
unsafe impl Sync for SendPtr {}

/// One installed function.
#[derive(Clone)]
pub enum TableEntry {
    /// Callable with the `call_dynamic` byte-buffer convention.
    Buffered(Arc<dyn Fn(&[u8], &mut [u8]) + Send + Sync>),
    /// Callable with JS-style 64-bit value slots; returns the result slot.
    Slotted(Arc<dyn Fn(&[u64]) -> u64 + Send + Sync>),
}

/// Signature metadata recorded when a closure is installed, for tests
/// that want to assert what the host was told.
#[derive(Clone, Debug, Default)]
pub struct InstalledMeta {
    pub arg_kinds: Vec<SlotKind>,
    pub result_kinds: Vec<SlotKind>,
    pub signature: Option<String>,
}

struct Table {
    entries: Vec<Option<TableEntry>>,
    free: Vec<u32>,
    metas: HashMap<u32, InstalledMeta>,
}

static TABLE: Lazy<Mutex<Table>> = Lazy::new(|| {
    Mutex::new(Table {
        entries: Vec::new(),
        free: Vec::new(),
        metas: HashMap::new(),
    })
});

fn table() -> MutexGuard<'static, Table> {
    TABLE.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn entry_at(index: u32) -> Result<TableEntry, HostError> {
    table()
        .entries
        .get(index as usize)
        .cloned()
        .flatten()
        .ok_or(HostError::NoSuchFunction(index))
}

fn install_at(index: u32, entry: TableEntry, meta: InstalledMeta) {
    let mut t = table();
    let slot = index as usize;
    if t.entries.len() <= slot {
        t.entries.resize(slot + 1, None);
    }
    t.entries[slot] = Some(entry);
    t.metas.insert(index, meta);
}

/// Register a callee answering the byte-buffer convention and return its
/// table index as an opaque function pointer.
pub fn register_buffered(
    f: impl Fn(&[u8], &mut [u8]) + Send + Sync + 'static,
) -> *mut c_void {
    let index = grow_slot();
    install_at(index, TableEntry::Buffered(Arc::new(f)), InstalledMeta::default());
    index as usize as *mut c_void
}

/// Register a callee answering JS-style slot calls and return its table
/// index as an opaque function pointer.
pub fn register_slotted(f: impl Fn(&[u64]) -> u64 + Send + Sync + 'static) -> *mut c_void {
    let index = grow_slot();
    install_at(index, TableEntry::Slotted(Arc::new(f)), InstalledMeta::default());
    index as usize as *mut c_void
}

/// Invoke the buffered function at `index` the way the host would: with
/// an argument buffer and a result buffer in the `call_dynamic` packing.
pub fn invoke_buffered(index: u32, args: &[u8], results: &mut [u8]) -> Result<(), HostError> {
    match entry_at(index)? {
        TableEntry::Buffered(f) => {
            f(args, results);
            Ok(())
        }
        TableEntry::Slotted(_) => Err(HostError::WrongConvention(index)),
    }
}

/// Invoke the slotted function at `index` with wasm value slots.
pub fn invoke_slotted(index: u32, slots: &[u64]) -> Result<u64, HostError> {
    match entry_at(index)? {
        TableEntry::Slotted(f) => Ok(f(slots)),
        TableEntry::Buffered(_) => Err(HostError::WrongConvention(index)),
    }
}

/// What preparation told the host about the function at `index`.
pub fn installed_meta(index: u32) -> Option<InstalledMeta> {
    table().metas.get(&index).cloned()
}

fn grow_slot() -> u32 {
    let mut t = table();
    if let Some(index) = t.free.pop() {
        return index;
    }
    t.entries.push(None);
    (t.entries.len() - 1) as u32
}

// Core-facing primitives.

pub(crate) unsafe fn call_dynamic(
    func: *mut c_void,
    values: &[u8],
    results: *mut u8,
    results_len: usize,
) -> Result<(), HostError> {
    let index = func as usize as u32;
    let entry = entry_at(index)?;
    let mut no_results: [u8; 0] = [];
    let results: &mut [u8] = if results_len == 0 {
        &mut no_results
    } else {
        core::slice::from_raw_parts_mut(results, results_len)
    };
    match entry {
        TableEntry::Buffered(f) => {
            f(values, results);
            Ok(())
        }
        TableEntry::Slotted(_) => Err(HostError::WrongConvention(index)),
    }
}

pub(crate) unsafe fn call_indirect_slots(
    func: *mut c_void,
    _sig: &str,
    slots: &[u64],
) -> Result<u64, HostError> {
    let index = func as usize as u32;
    match entry_at(index)? {
        TableEntry::Slotted(f) => Ok(f(slots)),
        TableEntry::Buffered(_) => Err(HostError::WrongConvention(index)),
    }
}

pub(crate) fn reserve_table_slot() -> Result<u32, HostError> {
    Ok(grow_slot())
}

pub(crate) fn release_table_slot(index: u32) -> Result<(), HostError> {
    let mut t = table();
    match t.entries.get_mut(index as usize) {
        Some(slot) => *slot = None,
        None => return Err(HostError::NoSuchFunction(index)),
    }
    t.metas.remove(&index);
    t.free.push(index);
    Ok(())
}

pub(crate) unsafe fn closure_prepare(
    backing: ClosureBackingFn,
    code: u32,
    arg_kinds: &[SlotKind],
    result_kinds: &[SlotKind],
    user_data: *mut c_void,
) -> Result<(), HostError> {
    let user_data = SendPtr(user_data);
    let entry = TableEntry::Buffered(Arc::new(move |args: &[u8], results: &mut [u8]| {
        // Force capture of the whole `SendPtr` (not just its inner field) so
        // the closure stays Send + Sync under edition 2021 disjoint capture.
        let user_data = user_data;
        // Safety: the backing function reads `args` and writes at most the
        // result buffer, per the registration contract.
        unsafe { backing(args.as_ptr() as *mut u8, results.as_mut_ptr(), user_data.0) };
    }));
    install_at(
        code,
        entry,
        InstalledMeta {
            arg_kinds: arg_kinds.to_vec(),
            result_kinds: result_kinds.to_vec(),
            signature: None,
        },
    );
    Ok(())
}

pub(crate) unsafe fn install_trampoline(
    closure: *mut Closure,
    code: u32,
    sig: &str,
) -> Result<(), HostError> {
    // A real host rejects signatures it cannot convert to a wasm function.
    if sig.is_empty() || !sig.chars().all(|c| matches!(c, 'v' | 'i' | 'j' | 'f' | 'd')) {
        return Err(HostError::BadSignature(sig.to_string()));
    }
    let closure = SendPtr(closure as *mut c_void);
    let entry = TableEntry::Slotted(Arc::new(move |slots: &[u64]| {
        // Force capture of the whole `SendPtr` (not just its inner field) so
        // the closure stays Send + Sync under edition 2021 disjoint capture.
        let closure = closure;
        let mut ret = 0u64;
        // Safety: the trampoline only fires after prep_closure_loc bound
        // the closure it captures.
        unsafe {
            crate::closure::closure_invoke_slots(
                closure.0 as *mut Closure,
                slots.as_ptr(),
                slots.len(),
                &mut ret,
            );
        }
        ret
    }));
    install_at(
        code,
        entry,
        InstalledMeta {
            arg_kinds: Vec::new(),
            result_kinds: Vec::new(),
            signature: Some(sig.to_string()),
        },
    );
    Ok(())
}
