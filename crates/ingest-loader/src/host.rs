//! Host-side callback table handed across the C ABI so a loaded step
//! module can actually exercise the clients granted to it through
//! `client_access`, instead of only seeing their ids and kinds.
//!
//! Each callback blocks its caller (already running on a `spawn_blocking`
//! thread) on the matching async `ingest_core` trait method via the
//! `tokio::runtime::Handle` captured when the table was built — the
//! module itself never has to know `tokio` exists.

use std::ffi::c_void;
use std::os::raw::c_int;
use std::slice;
use std::str;

use ingest_core::registry::{Client, ClientSubset};
use tokio::runtime::Handle;

struct HostContext {
    clients: ClientSubset,
    runtime: Handle,
}

/// The callback table passed by pointer alongside the JSON kind-label map
/// to every `chainstep_initialize`/`chainstep_process_message` call.
#[repr(C)]
pub struct HostCallbacks {
    ctx: *mut c_void,
    pub cache_get: CacheGetFn,
    pub cache_set: CacheSetFn,
    pub cache_delete: CacheDeleteFn,
    pub relational_query: RelationalQueryFn,
    pub broker_publish: BrokerPublishFn,
    pub free_buffer: HostFreeBufferFn,
}

/// Returns 0 on a cache hit (buffer written through `out_ptr`/`out_len`),
/// 1 on a miss, -1 if `client_id` isn't granted or isn't a cache client.
pub type CacheGetFn = unsafe extern "C" fn(*mut c_void, *const u8, usize, *const u8, usize, *mut *mut u8, *mut usize) -> c_int;
/// Returns 0 on success, -1 if `client_id` isn't granted or isn't a cache client.
pub type CacheSetFn = unsafe extern "C" fn(*mut c_void, *const u8, usize, *const u8, usize, *const u8, usize) -> c_int;
pub type CacheDeleteFn = unsafe extern "C" fn(*mut c_void, *const u8, usize, *const u8, usize) -> c_int;
/// Runs a query against a granted relational client, writing the result
/// rows as a JSON array through `out_ptr`/`out_len`. Returns 0 on
/// success, -1 if not granted/not relational, -2 on query failure.
pub type RelationalQueryFn = unsafe extern "C" fn(*mut c_void, *const u8, usize, *const u8, usize, *mut *mut u8, *mut usize) -> c_int;
/// Publishes to a granted broker client. Returns 0 on success, -1 if not
/// granted/not a broker, -2 on publish failure.
pub type BrokerPublishFn = unsafe extern "C" fn(*mut c_void, *const u8, usize, *const u8, usize, *const u8, usize) -> c_int;
/// Frees a buffer the host wrote through one of the `*_get`/`*_query`
/// callbacks above. The module must call this on every buffer it
/// received, the same way it calls `chainstep_free_buffer` for its own
/// allocations flowing the other direction.
pub type HostFreeBufferFn = unsafe extern "C" fn(*mut u8, usize);

/// Builds the callback table for one invocation. The returned value owns
/// a heap allocation reachable only through `ctx`; the caller must pass it
/// to `free` exactly once after the module's entry point returns.
pub fn build(clients: ClientSubset, runtime: Handle) -> HostCallbacks {
    let ctx = Box::into_raw(Box::new(HostContext { clients, runtime })) as *mut c_void;
    HostCallbacks { ctx, cache_get, cache_set, cache_delete, relational_query, broker_publish, free_buffer: host_free_buffer }
}

/// Reclaims the context `build` allocated. Safe to call at most once per
/// `HostCallbacks` produced by `build`.
pub fn free(callbacks: HostCallbacks) {
    if !callbacks.ctx.is_null() {
        unsafe { drop(Box::from_raw(callbacks.ctx as *mut HostContext)) };
    }
}

unsafe fn borrow_ctx<'a>(ctx: *mut c_void) -> &'a HostContext {
    &*(ctx as *const HostContext)
}

unsafe fn read_str<'a>(ptr: *const u8, len: usize) -> &'a str {
    str::from_utf8_unchecked(slice::from_raw_parts(ptr, len))
}

fn leak_buffer(bytes: Vec<u8>, out_ptr: *mut *mut u8, out_len: *mut usize) {
    let boxed = bytes.into_boxed_slice();
    let len = boxed.len();
    let ptr = Box::into_raw(boxed) as *mut u8;
    unsafe {
        *out_ptr = ptr;
        *out_len = len;
    }
}

unsafe extern "C" fn host_free_buffer(ptr: *mut u8, len: usize) {
    if !ptr.is_null() {
        drop(Box::from_raw(slice::from_raw_parts_mut(ptr, len)));
    }
}

unsafe extern "C" fn cache_get(ctx: *mut c_void, client_id_ptr: *const u8, client_id_len: usize, key_ptr: *const u8, key_len: usize, out_ptr: *mut *mut u8, out_len: *mut usize) -> c_int {
    let host = borrow_ctx(ctx);
    let client_id = read_str(client_id_ptr, client_id_len);
    let key = read_str(key_ptr, key_len);
    let Some(Client::Cache(cache)) = host.clients.get(client_id) else {
        return -1;
    };
    match host.runtime.block_on(cache.get(key)) {
        Some(value) => {
            leak_buffer(value, out_ptr, out_len);
            0
        }
        None => 1,
    }
}

unsafe extern "C" fn cache_set(ctx: *mut c_void, client_id_ptr: *const u8, client_id_len: usize, key_ptr: *const u8, key_len: usize, value_ptr: *const u8, value_len: usize) -> c_int {
    let host = borrow_ctx(ctx);
    let client_id = read_str(client_id_ptr, client_id_len);
    let key = read_str(key_ptr, key_len);
    let Some(Client::Cache(cache)) = host.clients.get(client_id) else {
        return -1;
    };
    let value = slice::from_raw_parts(value_ptr, value_len).to_vec();
    host.runtime.block_on(cache.set(key, value));
    0
}

unsafe extern "C" fn cache_delete(ctx: *mut c_void, client_id_ptr: *const u8, client_id_len: usize, key_ptr: *const u8, key_len: usize) -> c_int {
    let host = borrow_ctx(ctx);
    let client_id = read_str(client_id_ptr, client_id_len);
    let key = read_str(key_ptr, key_len);
    let Some(Client::Cache(cache)) = host.clients.get(client_id) else {
        return -1;
    };
    host.runtime.block_on(cache.delete(key));
    0
}

unsafe extern "C" fn relational_query(ctx: *mut c_void, client_id_ptr: *const u8, client_id_len: usize, query_ptr: *const u8, query_len: usize, out_ptr: *mut *mut u8, out_len: *mut usize) -> c_int {
    let host = borrow_ctx(ctx);
    let client_id = read_str(client_id_ptr, client_id_len);
    let query = read_str(query_ptr, query_len);
    let Some(Client::Relational(relational)) = host.clients.get(client_id) else {
        return -1;
    };
    match host.runtime.block_on(relational.execute_query(query)) {
        Ok(rows) => {
            let bytes = serde_json::to_vec(&rows).unwrap_or_default();
            leak_buffer(bytes, out_ptr, out_len);
            0
        }
        Err(_) => -2,
    }
}

unsafe extern "C" fn broker_publish(ctx: *mut c_void, client_id_ptr: *const u8, client_id_len: usize, topic_ptr: *const u8, topic_len: usize, payload_ptr: *const u8, payload_len: usize) -> c_int {
    let host = borrow_ctx(ctx);
    let client_id = read_str(client_id_ptr, client_id_len);
    let topic = read_str(topic_ptr, topic_len);
    let Some(Client::Broker(broker)) = host.clients.get(client_id) else {
        return -1;
    };
    let payload = slice::from_raw_parts(payload_ptr, payload_len).to_vec();
    match host.runtime.block_on(broker.publish(topic, payload)) {
        Ok(()) => 0,
        Err(_) => -2,
    }
}
