//! NVRTC compilation and raw-parameter kernel launches.

use std::collections::BTreeSet;
use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};

use cudarc::driver::{CudaStream, LaunchAsync};
use cudarc::nvrtc::{compile_ptx_with_opts, CompileOptions};
use kiln_core::host::exported_entries;
use parking_lot::Mutex;
use kiln_core::{ArgValue, Backend, DType, KernelArg, KilnError, LaunchConfig, Result};

use super::context::CudaBackend;

static NEXT_MODULE: AtomicUsize = AtomicUsize::new(0);

/// Entry names handed to cudarc, which keys functions by `&'static str`.
static ENTRY_NAMES: Mutex<BTreeSet<&'static str>> = Mutex::new(BTreeSet::new());

/// A `'static` copy of `name`, leaked once per distinct name.
fn intern(name: &str) -> &'static str {
    let mut names = ENTRY_NAMES.lock();
    if let Some(interned) = names.get(name) {
        return *interned;
    }
    let leaked: &'static str = Box::leak(name.to_owned().into_boxed_str());
    names.insert(leaked);
    leaked
}

/// A PTX module loaded on one device.
#[derive(Debug, Clone)]
pub struct CudaModule {
    name: String,
    dtype: DType,
    entries: Vec<&'static str>,
}

impl CudaModule {
    /// Name the module was loaded under.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn entries(&self) -> &[&'static str] {
        &self.entries
    }

    pub(crate) fn exports(&self, entry: &str) -> bool {
        self.entries.iter().any(|e| *e == entry)
    }
}

impl CudaBackend {
    pub(crate) fn compile_module(
        &self,
        source: &str,
        dtype: DType,
        options: &[String],
    ) -> std::result::Result<CudaModule, String> {
        let opts = CompileOptions { options: options.to_vec(), ..Default::default() };
        let ptx = compile_ptx_with_opts(source, opts).map_err(|e| e.to_string())?;

        // Only extern "C" kernels keep their plain name in the PTX. Mangled
        // ones stay unloaded and report as missing symbols on lookup.
        let entries: Vec<&'static str> = exported_entries(source).iter().map(|name| intern(name)).collect();
        let name = format!("kiln_{}_{}", dtype, NEXT_MODULE.fetch_add(1, Ordering::Relaxed));
        self.device
            .load_ptx(ptx, &name, &entries)
            .map_err(|e| format!("loading module '{name}': {e}"))?;
        tracing::debug!("{}: loaded module {} exporting {:?}", self.device(), name, entries);
        Ok(CudaModule { name, dtype, entries })
    }

    pub(crate) fn launch_entry(
        &self,
        module: &CudaModule,
        name: &str,
        config: LaunchConfig,
        args: &[KernelArg<'_>],
        stream: Option<&CudaStream>,
    ) -> Result<()> {
        let launch_err = |reason: String| KilnError::Launch {
            device: self.device(),
            kernel: name.to_string(),
            reason,
        };
        let func = self
            .device
            .get_func(&module.name, name)
            .ok_or_else(|| launch_err(format!("'{name}' is not loaded in module {}", module.name)))?;

        let cfg = cudarc::driver::LaunchConfig {
            grid_dim: (config.grid.x, config.grid.y, config.grid.z),
            block_dim: (config.block.x, config.block.y, config.block.z),
            shared_mem_bytes: config.shared_mem_bytes,
        };
        // The driver reads each parameter through a pointer to its value.
        let mut values: Vec<ArgValue> = args.iter().map(|a| *a.value()).collect();
        let mut params: Vec<*mut c_void> = values.iter_mut().map(param_ptr).collect();

        let launched = unsafe {
            match stream {
                Some(s) => func.launch_on_stream(s, cfg, &mut params[..]),
                None => func.launch(cfg, &mut params[..]),
            }
        };
        launched.map_err(|e| launch_err(e.to_string()))
    }
}

fn param_ptr(value: &mut ArgValue) -> *mut c_void {
    match value {
        ArgValue::Ptr(p) => &mut p.0 as *mut u64 as *mut c_void,
        ArgValue::I8(v) => v as *mut i8 as *mut c_void,
        ArgValue::U8(v) => v as *mut u8 as *mut c_void,
        ArgValue::I32(v) => v as *mut i32 as *mut c_void,
        ArgValue::U32(v) => v as *mut u32 as *mut c_void,
        ArgValue::I64(v) => v as *mut i64 as *mut c_void,
        ArgValue::U64(v) => v as *mut u64 as *mut c_void,
        ArgValue::F32(v) => v as *mut f32 as *mut c_void,
        ArgValue::F64(v) => v as *mut f64 as *mut c_void,
    }
}
