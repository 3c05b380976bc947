//! Machine-dependent wasm32 core of a libffi-style foreign function
//! interface.
//!
//! The generic front-end describes a call site as a CIF (an ABI tag, a
//! return type descriptor and a vector of argument type descriptors) and
//! then either *invokes* an arbitrary table-indexed function pointer with
//! a vector of pointers to argument values, or *builds* a closure whose
//! wasm-table entry calls back into a user handler. This crate bridges
//! that contract to the wasm32 calling convention, where arguments are
//! lowered to a fixed sequence of wasm primitives (i32, i64, f32, f64)
//! and nontrivial aggregates travel as pointers to caller-owned copies.
//!
//! Two host variants exist, chosen by compilation target. A WASI-like
//! host offers "call a function pointer with a typed value buffer" and
//! "install a trampoline behind a table slot"; a JS host offers table
//! access and host-function-to-wasm conversion, with trampoline
//! signatures computed per closure. Off wasm32 an in-process mock host
//! (`host::mock`) serves both conventions so the marshalling core can
//! be exercised natively.
//!
//! # Module Organization
//!
//! - [`types`]: descriptor layout shared with the front-end
//! - `canon`: in-place type canonicalisation (internal)
//! - [`classify`]: sizes, slot sequences, indirect-return classification
//! - [`buffer`]: cursors over flat value buffers
//! - [`lower`] / [`raise`]: value marshalling in each direction
//! - [`call`]: the `ffi_call` driver
//! - [`closure`]: closure allocation, preparation, trampoline bodies
//! - [`host`]: the primitives consumed from the hosting runtime

mod logging;

pub mod buffer;
pub mod call;
pub(crate) mod canon;
mod cif;
pub mod classify;
pub mod closure;
pub mod error;
pub mod host;
pub mod lower;
pub mod raise;
pub(crate) mod sig;
pub mod types;

pub use call::ffi_call;
pub use cif::{prep_cif_machdep, prep_cif_machdep_var};
pub use closure::{closure_alloc, closure_free, prep_closure_loc};
pub use error::HostError;
pub use types::{
    Abi, Cif, Closure, ClosureBackingFn, ClosureHandler, SlotKind, Status, Type, TypeKind,
    CIF_FLAG_VARARGS, MAX_ARGS,
};
