//! A single loaded script module: a `dlopen`'d shared object plus its
//! resolved entry points.

use libloading::Library;

use crate::abi::{FreeBufferFn, InitializeFn, ProcessMessageFn, FREE_BUFFER_SYMBOL, INITIALIZE_SYMBOL, PROCESS_MESSAGE_SYMBOL};
use crate::host::HostCallbacks;

pub struct ScriptModule {
    // Held for its lifetime only — dropping it would invalidate the
    // function pointers resolved from it below.
    _library: Library,
    initialize: Option<InitializeFn>,
    process_message: ProcessMessageFn,
    free_buffer: FreeBufferFn,
}

impl ScriptModule {
    /// Loads `path` and resolves its entry points. `process_message` and
    /// `free_buffer` are required; `initialize` is optional per spec §4.6.
    pub fn load(path: &str) -> Result<Self, libloading::Error> {
        let library = unsafe { Library::new(path)? };

        let initialize = unsafe { library.get::<InitializeFn>(INITIALIZE_SYMBOL).ok().map(|sym| *sym) };
        let process_message = unsafe { *library.get::<ProcessMessageFn>(PROCESS_MESSAGE_SYMBOL)? };
        let free_buffer = unsafe { *library.get::<FreeBufferFn>(FREE_BUFFER_SYMBOL)? };

        Ok(Self { _library: library, initialize, process_message, free_buffer })
    }

    pub fn has_initialize(&self) -> bool {
        self.initialize.is_some()
    }

    /// Returns `Ok(())` on success, `Err(code)` with the module's non-zero
    /// return code otherwise. A missing `initialize` symbol is not an
    /// error at this layer — the caller treats `has_initialize() == false`
    /// as "nothing to do".
    pub fn initialize(&self, clients_json: &[u8], host: &HostCallbacks) -> Result<(), i32> {
        let Some(init) = self.initialize else {
            return Ok(());
        };
        let code = unsafe { init(clients_json.as_ptr(), clients_json.len(), host as *const HostCallbacks) };
        if code == 0 {
            Ok(())
        } else {
            Err(code)
        }
    }

    /// Invokes `process_message`; on success, copies the module's output
    /// buffer into an owned `Vec<u8>` and frees the module's allocation via
    /// `chainstep_free_buffer`. Returns `Err(code)` on a non-zero return.
    pub fn process_message(&self, envelope_json: &[u8], clients_json: &[u8], host: &HostCallbacks) -> Result<Vec<u8>, i32> {
        let mut out_ptr: *mut u8 = std::ptr::null_mut();
        let mut out_len: usize = 0;

        let code = unsafe {
            (self.process_message)(
                envelope_json.as_ptr(),
                envelope_json.len(),
                clients_json.as_ptr(),
                clients_json.len(),
                host as *const HostCallbacks,
                &mut out_ptr,
                &mut out_len,
            )
        };

        if code != 0 {
            return Err(code);
        }
        if out_ptr.is_null() {
            return Ok(Vec::new());
        }

        let owned = unsafe { std::slice::from_raw_parts(out_ptr, out_len).to_vec() };
        unsafe { (self.free_buffer)(out_ptr, out_len) };
        Ok(owned)
    }
}
