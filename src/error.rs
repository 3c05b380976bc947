//! Error types for the host seam, and the fatal-error path.
//!
//! Two error classes exist at this layer. Declarative errors travel back to
//! the front-end as [`crate::Status`] codes. Everything else (host primitive
//! failures, descriptor corruption surviving canonicalisation, calls under
//! an ABI the running variant does not implement) indicates programmer or
//! platform error and aborts the process.

use thiserror::Error;

/// Errors reported by a host primitive.
#[derive(Error, Debug)]
pub enum HostError {
    #[error("no function installed at table index {0}")]
    NoSuchFunction(u32),

    #[error("table index {0} is not callable with the requested convention")]
    WrongConvention(u32),

    #[error("host rejected trampoline signature {0:?}")]
    BadSignature(String),

    #[error("host call failed with errno {0}")]
    Errno(u16),

    #[error("table is out of free slots")]
    TableExhausted,
}

/// Abort the process with a diagnostic.
///
/// Nothing at this layer is retriable: by the time a caller reaches a fatal
/// condition the calling convention itself has been violated, and unwinding
/// across the marshalling buffers would leave callee memory half-written.
#[cold]
pub(crate) fn fatal(message: &str) -> ! {
    eprintln!("ffi-wasm32: {message}");
    crate::logging::error!(message, "fatal wasm32 ffi error");
    std::process::abort();
}

/// Like [`fatal`], carrying the host error that triggered the abort.
#[cold]
pub(crate) fn fatal_host(context: &str, err: HostError) -> ! {
    eprintln!("ffi-wasm32: {context}: {err}");
    crate::logging::error!(context, error = %err, "host primitive failed");
    std::process::abort();
}
