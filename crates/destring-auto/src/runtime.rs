//! Sandboxed execution of the DeString WebAssembly module.
//!
//! The guest is an Emscripten build that expects four host imports. None of
//! them need real side effects for decoding, so each one is a stub that only
//! honours the guest's calling contract:
//!
//! | Import | Host behaviour |
//! |--------|----------------|
//! | `env.emscripten_run_script` | no-op |
//! | `env.emscripten_memcpy_big` | copy `size` bytes inside guest memory |
//! | `wasi_snapshot_preview1.fd_write` | sum iovec lengths into `*nwritten`, return 0 |
//! | `env.emscripten_resize_heap` | grow memory in 64 KiB pages; 1 = ok, 0 = fail |
//!
//! Signatures are taken from the module's own import table rather than
//! hard-coded, since Emscripten releases differ on whether `memcpy_big`
//! returns its destination.

use wasmtime::{
    Caller, Engine, Extern, FuncType, Instance, Linker, Memory, Module, Store, TypedFunc, Val,
};

use crate::{DeStringError, WASM_PAGE_SIZE};

/// Host callback signature accepted by [`Linker::func_new`].
type HostFn = fn(Caller<'_, ()>, &[Val], &mut [Val]) -> wasmtime::Result<()>;

const HOST_IMPORTS: [(&str, &str, HostFn); 4] = [
    ("env", "emscripten_run_script", run_script),
    ("env", "emscripten_memcpy_big", memcpy_big),
    ("wasi_snapshot_preview1", "fd_write", fd_write),
    ("env", "emscripten_resize_heap", resize_heap),
];

/// One instantiated DeString module.
///
/// Construction compiles the module, so keep one around and reuse it; see
/// [`crate::shared_runtime`].
pub struct DeStringRuntime {
    store: Store<()>,
    memory: Memory,
    malloc: TypedFunc<i32, i32>,
    free: TypedFunc<i32, ()>,
    destring: TypedFunc<i32, i32>,
}

impl std::fmt::Debug for DeStringRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeStringRuntime")
            .field("memory_bytes", &self.memory.data_size(&self.store))
            .finish()
    }
}

impl DeStringRuntime {
    /// Compile and instantiate `wasm` (binary or WAT text).
    pub fn new(wasm: &[u8]) -> Result<Self, DeStringError> {
        let engine = Engine::default();
        let module = Module::new(&engine, wasm).map_err(runtime_err)?;
        let mut linker: Linker<()> = Linker::new(&engine);

        for (import_module, name, host) in HOST_IMPORTS {
            // Only link what the guest asks for; anything unexpected fails
            // loudly at instantiation.
            if let Some(ty) = import_type(&module, import_module, name) {
                linker
                    .func_new(import_module, name, ty, host)
                    .map_err(runtime_err)?;
            }
        }

        let mut store = Store::new(&engine, ());
        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(runtime_err)?;

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or(DeStringError::MissingExport("memory"))?;
        let malloc = typed_export::<i32, i32>(&instance, &mut store, "malloc")?;
        let free = typed_export::<i32, ()>(&instance, &mut store, "free")?;
        let destring = typed_export::<i32, i32>(&instance, &mut store, "DeString")?;

        for init in ["emscripten_stack_init", "__wasm_call_ctors"] {
            if let Ok(f) = instance.get_typed_func::<(), ()>(&mut store, init) {
                f.call(&mut store, ()).map_err(runtime_err)?;
            }
        }

        Ok(Self {
            store,
            memory,
            malloc,
            free,
            destring,
        })
    }

    /// Run the guest transform on `value` and return its output string.
    ///
    /// The input is written NUL-terminated into freshly allocated guest
    /// memory; the result is read back up to the first NUL at the returned
    /// address. The input buffer is always released.
    pub fn decode(&mut self, value: &str) -> Result<String, DeStringError> {
        let mut input = Vec::with_capacity(value.len() + 1);
        input.extend_from_slice(value.as_bytes());
        input.push(0);

        let len = i32::try_from(input.len())
            .map_err(|_| DeStringError::Runtime("input exceeds guest address space".into()))?;
        let ptr = self.malloc.call(&mut self.store, len).map_err(runtime_err)?;
        if ptr <= 0 {
            return Err(DeStringError::Runtime(format!(
                "guest malloc({len}) returned {ptr}"
            )));
        }

        let result = self.call_destring(ptr, &input);

        if let Err(e) = self.free.call(&mut self.store, ptr) {
            tracing::warn!("DeString: guest free({ptr}) failed: {e}");
        }

        result
    }

    fn call_destring(&mut self, ptr: i32, input: &[u8]) -> Result<String, DeStringError> {
        self.memory
            .write(&mut self.store, ptr as usize, input)
            .map_err(|e| DeStringError::Runtime(e.to_string()))?;
        let out = self
            .destring
            .call(&mut self.store, ptr)
            .map_err(runtime_err)?;
        Ok(self.read_c_string(out))
    }

    fn read_c_string(&self, ptr: i32) -> String {
        if ptr <= 0 {
            return String::new();
        }
        let data = self.memory.data(&self.store);
        let start = ptr as usize;
        if start >= data.len() {
            return String::new();
        }
        let tail = &data[start..];
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        String::from_utf8_lossy(&tail[..end]).into_owned()
    }
}

// ── Host imports ─────────────────────────────────────────────────────────────

fn run_script(
    _caller: Caller<'_, ()>,
    _params: &[Val],
    results: &mut [Val],
) -> wasmtime::Result<()> {
    fill_results(results, 0);
    Ok(())
}

fn memcpy_big(
    mut caller: Caller<'_, ()>,
    params: &[Val],
    results: &mut [Val],
) -> wasmtime::Result<()> {
    let dest = arg_u32(params, 0)? as usize;
    let src = arg_u32(params, 1)? as usize;
    let size = arg_u32(params, 2)? as usize;

    if size > 0 {
        let memory = caller_memory(&mut caller)?;
        let data = memory.data_mut(&mut caller);
        let in_bounds = src.checked_add(size).is_some_and(|end| end <= data.len())
            && dest.checked_add(size).is_some_and(|end| end <= data.len());
        if !in_bounds {
            return Err(wasmtime::Error::msg("emscripten_memcpy_big: out of bounds"));
        }
        data.copy_within(src..src + size, dest);
    }

    fill_results(results, dest as i32);
    Ok(())
}

fn fd_write(
    mut caller: Caller<'_, ()>,
    params: &[Val],
    results: &mut [Val],
) -> wasmtime::Result<()> {
    let iovs = arg_u32(params, 1)? as usize;
    let iovs_len = arg_u32(params, 2)? as usize;
    let nwritten = arg_u32(params, 3)? as usize;

    let memory = caller_memory(&mut caller)?;
    let mut total: u32 = 0;
    for i in 0..iovs_len {
        // iovec = { buf: u32, len: u32 }
        let mut len_bytes = [0u8; 4];
        memory.read(&caller, iovs + i * 8 + 4, &mut len_bytes)?;
        total = total.wrapping_add(u32::from_le_bytes(len_bytes));
    }
    memory.write(&mut caller, nwritten, &total.to_le_bytes())?;

    fill_results(results, 0);
    Ok(())
}

fn resize_heap(
    mut caller: Caller<'_, ()>,
    params: &[Val],
    results: &mut [Val],
) -> wasmtime::Result<()> {
    let requested = u64::from(arg_u32(params, 0)?);
    let memory = caller_memory(&mut caller)?;
    let current = memory.data_size(&caller) as u64;

    let ok = if requested <= current {
        true
    } else {
        let pages = (requested - current).div_ceil(WASM_PAGE_SIZE);
        memory.grow(&mut caller, pages).is_ok()
    };

    fill_results(results, i32::from(ok));
    Ok(())
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn import_type(module: &Module, import_module: &str, name: &str) -> Option<FuncType> {
    module
        .imports()
        .find(|imp| imp.module() == import_module && imp.name() == name)
        .and_then(|imp| imp.ty().func().cloned())
}

fn typed_export<P, R>(
    instance: &Instance,
    store: &mut Store<()>,
    name: &'static str,
) -> Result<TypedFunc<P, R>, DeStringError>
where
    P: wasmtime::WasmParams,
    R: wasmtime::WasmResults,
{
    instance
        .get_typed_func::<P, R>(store, name)
        .map_err(|_| DeStringError::MissingExport(name))
}

fn caller_memory(caller: &mut Caller<'_, ()>) -> wasmtime::Result<Memory> {
    caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or_else(|| wasmtime::Error::msg("guest memory export is unavailable"))
}

fn arg_u32(params: &[Val], idx: usize) -> wasmtime::Result<u32> {
    params
        .get(idx)
        .and_then(Val::i32)
        .map(|v| v as u32)
        .ok_or_else(|| wasmtime::Error::msg(format!("expected i32 argument #{idx}")))
}

fn fill_results(results: &mut [Val], value: i32) {
    if let Some(slot) = results.first_mut() {
        *slot = Val::I32(value);
    }
}

fn runtime_err(e: wasmtime::Error) -> DeStringError {
    DeStringError::Runtime(format!("{e:#}"))
}
