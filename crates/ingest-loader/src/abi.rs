//! The C ABI a dynamically loaded step module exports.
//!
//! Three `extern "C"` symbols, resolved once per loaded library:
//! - `chainstep_initialize(clients_ptr, clients_len, host: *const
//!   HostCallbacks) -> i32`: optional; a missing symbol is not an error
//!   (spec §4.6 calls `initialize` optional).
//! - `chainstep_process_message(envelope_ptr, envelope_len, clients_ptr,
//!   clients_len, host: *const HostCallbacks, out_ptr: *mut *mut u8,
//!   out_len: *mut usize) -> i32`: required. Writes the resulting
//!   envelope's UTF-8 JSON bytes through `out_ptr`/`out_len` on success
//!   (return 0); any non-zero return is treated as failure and the caller
//!   keeps the envelope unchanged.
//! - `chainstep_free_buffer(ptr: *mut u8, len: usize)`: frees a buffer
//!   previously returned via `out_ptr`, so the module's allocator — not
//!   Rust's global allocator — reclaims memory it allocated.
//!
//! `clients_ptr`/`clients_len` carry a UTF-8 JSON object mapping
//! `client_id -> capability description`, for introspection. `host` is
//! the actual capability handle: a table of host function pointers (see
//! `crate::host::HostCallbacks`) the module calls to exercise a granted
//! client — cache get/set/delete, a relational query, a broker publish —
//! without ever linking against `tokio`, `sqlx`, `rumqttc`, or `redis`
//! itself (spec §4.6's "curated client subset").

use std::os::raw::c_int;

use crate::host::HostCallbacks;

pub type InitializeFn = unsafe extern "C" fn(*const u8, usize, *const HostCallbacks) -> c_int;
pub type ProcessMessageFn = unsafe extern "C" fn(*const u8, usize, *const u8, usize, *const HostCallbacks, *mut *mut u8, *mut usize) -> c_int;
pub type FreeBufferFn = unsafe extern "C" fn(*mut u8, usize);

pub const INITIALIZE_SYMBOL: &[u8] = b"chainstep_initialize";
pub const PROCESS_MESSAGE_SYMBOL: &[u8] = b"chainstep_process_message";
pub const FREE_BUFFER_SYMBOL: &[u8] = b"chainstep_free_buffer";
