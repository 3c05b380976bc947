//! The host primitives the core consumes, selected by target.
//!
//! Every backend exposes the same six functions:
//!
//! * `call_dynamic` — call a table-indexed function with a flat byte
//!   buffer of argument values and a result buffer (WASI-like variant),
//! * `call_indirect_slots` — call a table entry with 64-bit wasm value
//!   slots and a signature string (JS variant),
//! * `reserve_table_slot` / `release_table_slot` — the free-slot pool,
//! * `closure_prepare` — install the fixed backing function behind a slot
//!   with out-of-band argument/result kind buffers (WASI-like variant),
//! * `install_trampoline` — convert and install a computed-signature
//!   forwarder at a slot (JS variant).
//!
//! On wasm32 the active backend only implements its own variant's calling
//! primitives; the other variant's ABI tag is refused before any of them
//! can be reached. Off-target (the test host) the [`mock`] backend
//! implements both over an in-process function table so the whole core is
//! exercisable.

use crate::types::Abi;

#[cfg(all(target_arch = "wasm32", target_os = "emscripten"))]
mod emscripten;
#[cfg(not(target_arch = "wasm32"))]
pub mod mock;
#[cfg(all(target_arch = "wasm32", not(target_os = "emscripten")))]
mod wasix;

#[cfg(all(target_arch = "wasm32", target_os = "emscripten"))]
pub(crate) use self::emscripten as active;
#[cfg(not(target_arch = "wasm32"))]
pub(crate) use self::mock as active;
#[cfg(all(target_arch = "wasm32", not(target_os = "emscripten")))]
pub(crate) use self::wasix as active;

/// Whether the running variant implements calls under `abi`.
pub(crate) fn abi_supported(abi: Abi) -> bool {
    if cfg!(target_arch = "wasm32") {
        if cfg!(target_os = "emscripten") {
            matches!(abi, Abi::Wasm32Emscripten)
        } else {
            matches!(abi, Abi::Wasm32)
        }
    } else {
        // The mock host serves both variants.
        true
    }
}
