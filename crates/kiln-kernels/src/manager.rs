//! Per-device compile cache and launch dispatcher.
//!
//! A `KernelManager` owns every module compiled for its device, keyed by
//! `(element type, kernel source)`. The first launch of a pair compiles
//! the instantiated template; later launches reuse the module. Failed
//! compiles leave nothing behind, so a later call retries.
//!
//! Methods take `&mut self`: the cache is not internally synchronized.
//! Share a manager across threads behind a lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use kiln_core::{
    Backend, ContextGuard, DType, Device, KernelArg, KernelElement, KilnError, LaunchConfig, Result,
};

use crate::config::CompileConfig;
use crate::source::{KernelLibrary, KernelSource};

/// One compiled instantiation of a kernel source.
pub struct CompiledModule<B: Backend> {
    source: KernelSource,
    dtype: DType,
    code: String,
    options: Vec<String>,
    module: B::Module,
}

impl<B: Backend> CompiledModule<B> {
    pub fn source(&self) -> &KernelSource {
        &self.source
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// The instantiated source text that was compiled.
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    /// The backend's loaded module.
    pub fn module(&self) -> &B::Module {
        &self.module
    }
}

impl<B: Backend> fmt::Debug for CompiledModule<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledModule")
            .field("source", &self.source.name())
            .field("dtype", &self.dtype)
            .field("options", &self.options)
            .finish()
    }
}

/// Counters over the lifetime of a manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Successful compiles.
    pub compilations: u64,
    /// Failed compiles.
    pub failures: u64,
}

impl CacheStats {
    pub fn lookups(&self) -> u64 {
        self.hits + self.compilations + self.failures
    }

    /// Fraction of lookups served from the cache, 0 when there were none.
    pub fn hit_rate(&self) -> f64 {
        match self.lookups() {
            0 => 0.0,
            n => self.hits as f64 / n as f64,
        }
    }

    pub fn merge(&mut self, other: CacheStats) {
        self.hits += other.hits;
        self.compilations += other.compilations;
        self.failures += other.failures;
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} hits, {} compilations, {} failures ({:.1}% hit rate)",
            self.hits,
            self.compilations,
            self.failures,
            self.hit_rate() * 100.0
        )
    }
}

/// Compile cache and launcher for one device.
pub struct KernelManager<B: Backend> {
    backend: Arc<B>,
    config: CompileConfig,
    modules: HashMap<DType, HashMap<KernelSource, Arc<CompiledModule<B>>>>,
    stats: CacheStats,
}

impl<B: Backend> KernelManager<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self::with_config(backend, CompileConfig::default())
    }

    pub fn with_config(backend: Arc<B>, config: CompileConfig) -> Self {
        Self { backend, config, modules: HashMap::new(), stats: CacheStats::default() }
    }

    pub fn device(&self) -> Device {
        self.backend.device()
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn config(&self) -> &CompileConfig {
        &self.config
    }

    /// Compile `source` for `T` if needed and launch its entry point.
    ///
    /// The device context is current for the duration of the call and the
    /// previous one is restored afterwards, on success or failure. The
    /// launch is asynchronous on CUDA; call [`synchronize`] before reading
    /// results through another stream.
    ///
    /// [`synchronize`]: KernelManager::synchronize
    pub fn launch<T: KernelElement>(
        &mut self,
        source: &KernelSource,
        args: &[KernelArg<'_>],
        config: LaunchConfig,
        stream: Option<&B::Stream>,
    ) -> Result<()> {
        self.launch_dtype(T::DTYPE, source, args, config, stream)
    }

    /// [`launch`](KernelManager::launch) with the element type chosen at runtime.
    pub fn launch_dtype(
        &mut self,
        dtype: DType,
        source: &KernelSource,
        args: &[KernelArg<'_>],
        config: LaunchConfig,
        stream: Option<&B::Stream>,
    ) -> Result<()> {
        let backend = Arc::clone(&self.backend);
        let _ctx = ContextGuard::push(backend.as_ref())?;

        let compiled = self.get_or_compile(dtype, source)?;
        let entry = source.entry_point();
        if !backend.has_function(&compiled.module, entry) {
            return Err(KilnError::SymbolNotFound {
                device: backend.device(),
                dtype,
                symbol: entry.to_string(),
            });
        }
        tracing::trace!(
            "{}: launch {}<{}> grid={:?} block={:?} args={}",
            backend.device(),
            entry,
            dtype,
            config.grid,
            config.block,
            args.len()
        );
        backend.launch(&compiled.module, entry, config, args, stream)
    }

    /// Launch a kernel looked up by name in `library`.
    pub fn launch_named<T: KernelElement>(
        &mut self,
        library: &KernelLibrary,
        name: &str,
        args: &[KernelArg<'_>],
        config: LaunchConfig,
        stream: Option<&B::Stream>,
    ) -> Result<()> {
        let source = library.get(name)?;
        self.launch::<T>(source, args, config, stream)
    }

    /// The module for `(T, source)`, compiling it if it is not cached.
    pub fn module<T: KernelElement>(&mut self, source: &KernelSource) -> Result<Arc<CompiledModule<B>>> {
        self.module_dtype(T::DTYPE, source)
    }

    pub fn module_dtype(&mut self, dtype: DType, source: &KernelSource) -> Result<Arc<CompiledModule<B>>> {
        let backend = Arc::clone(&self.backend);
        let _ctx = ContextGuard::push(backend.as_ref())?;
        self.get_or_compile(dtype, source)
    }

    /// Cache lookup without compiling.
    pub fn cached(&self, dtype: DType, source: &KernelSource) -> Option<Arc<CompiledModule<B>>> {
        self.modules.get(&dtype).and_then(|by_source| by_source.get(source)).cloned()
    }

    pub fn contains(&self, dtype: DType, source: &KernelSource) -> bool {
        self.cached(dtype, source).is_some()
    }

    /// Number of cached modules across all element types.
    pub fn len(&self) -> usize {
        self.modules.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element types with at least one cached module, sorted.
    pub fn cached_dtypes(&self) -> Vec<DType> {
        let mut dtypes: Vec<DType> =
            self.modules.iter().filter(|(_, m)| !m.is_empty()).map(|(d, _)| *d).collect();
        dtypes.sort_unstable();
        dtypes
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Drop every cached module. Modules still held elsewhere stay alive.
    pub fn clear(&mut self) {
        let dropped = self.len();
        self.modules.clear();
        tracing::debug!("{}: cleared {} cached modules", self.device(), dropped);
    }

    /// Block until all work issued to this device has finished.
    pub fn synchronize(&self) -> Result<()> {
        let _ctx = ContextGuard::push(self.backend.as_ref())?;
        self.backend.synchronize()
    }

    /// Caller must have pushed the device context.
    fn get_or_compile(&mut self, dtype: DType, source: &KernelSource) -> Result<Arc<CompiledModule<B>>> {
        if let Some(hit) = self.modules.get(&dtype).and_then(|by_source| by_source.get(source)) {
            self.stats.hits += 1;
            tracing::debug!("{}: cache hit for {}<{}>", self.backend.device(), source, dtype);
            return Ok(Arc::clone(hit));
        }

        let device = self.backend.device();
        let code = source.instantiate(dtype);
        let options = self.config.to_options(device.compute_capability, dtype);
        let start = Instant::now();
        let module = match self.backend.compile(&code, dtype, &options) {
            Ok(module) => module,
            Err(diagnostic) => {
                self.stats.failures += 1;
                tracing::warn!("{}: compiling {}<{}> failed: {}", device, source, dtype, diagnostic);
                return Err(KilnError::Compile {
                    device,
                    dtype,
                    source_name: source.name().to_string(),
                    diagnostic,
                });
            }
        };
        self.stats.compilations += 1;
        tracing::info!("{}: compiled {}<{}> in {:.2?}", device, source, dtype, start.elapsed());

        let compiled = Arc::new(CompiledModule { source: source.clone(), dtype, code, options, module });
        self.modules
            .entry(dtype)
            .or_insert_with(|| HashMap::with_capacity(16))
            .insert(source.clone(), Arc::clone(&compiled));
        Ok(compiled)
    }
}

impl<B: Backend> fmt::Debug for KernelManager<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelManager")
            .field("device", &self.device())
            .field("cached", &self.len())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::host_backend;
    use kiln_core::{DeviceArray, HostBackend};

    fn manager() -> KernelManager<HostBackend> {
        KernelManager::new(Arc::new(host_backend(0)))
    }

    fn sum_on(mgr: &mut KernelManager<HostBackend>, values: &[i32]) -> Result<i32> {
        let backend = Arc::clone(mgr.backend());
        let input = DeviceArray::from_host(&backend, values)?;
        let mut out = DeviceArray::<i32, _>::zeros(&backend, 1)?;
        let args = [
            input.as_kernel_arg(),
            KernelArg::scalar(input.len() as i64),
            out.as_kernel_arg_mut()?,
        ];
        mgr.launch::<i32>(&KernelSource::SUM, &args, LaunchConfig::single(), None)?;
        out.get(0)?.read()
    }

    #[test]
    fn test_compiles_once_per_key() {
        let mut mgr = manager();
        let first = mgr.module::<f32>(&KernelSource::SUM).unwrap();
        let second = mgr.module::<f32>(&KernelSource::SUM).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(mgr.stats(), CacheStats { hits: 1, compilations: 1, failures: 0 });
        assert!(first.code().contains("float *vector"));
        assert!(first.options().iter().any(|o| o == "-DKILN_ELEMENT=float"));
    }

    #[test]
    fn test_cache_is_type_specific() {
        let mut mgr = manager();
        let as_i32 = mgr.module::<i32>(&KernelSource::SUM).unwrap();
        let as_f64 = mgr.module::<f64>(&KernelSource::SUM).unwrap();
        assert!(!Arc::ptr_eq(&as_i32, &as_f64));
        assert_eq!(as_i32.dtype(), DType::I32);
        assert_eq!(as_f64.dtype(), DType::F64);
        assert_eq!(mgr.len(), 2);
        assert_eq!(mgr.cached_dtypes(), vec![DType::I32, DType::F64]);
        assert!(mgr.contains(DType::I32, &KernelSource::SUM));
        assert!(!mgr.contains(DType::I32, &KernelSource::ASUM));
    }

    #[test]
    fn test_launch_sum() {
        let mut mgr = manager();
        assert_eq!(sum_on(&mut mgr, &[1, 2, 3, 4]).unwrap(), 10);
        assert_eq!(sum_on(&mut mgr, &[5, -5]).unwrap(), 0);
        assert_eq!(mgr.stats().compilations, 1);
        assert_eq!(mgr.stats().hits, 1);
    }

    #[test]
    fn test_failed_compile_is_not_cached() {
        let mut mgr = manager();
        let broken = KernelSource::new("broken", "__global__ void broken(TYPE *v) { v[0] = 1;").unwrap();
        for _ in 0..2 {
            let err = mgr.module::<i32>(&broken).unwrap_err();
            match err {
                KilnError::Compile { dtype, source_name, diagnostic, .. } => {
                    assert_eq!(dtype, DType::I32);
                    assert_eq!(source_name, "broken");
                    assert!(!diagnostic.is_empty());
                }
                other => panic!("expected compile error, got {other:?}"),
            }
        }
        assert!(mgr.is_empty());
        assert_eq!(mgr.stats().failures, 2);
    }

    #[test]
    fn test_missing_entry_point() {
        let mut mgr = manager();
        let misnamed = KernelSource::new("total", "__global__ void sum(TYPE *v) {}").unwrap();
        let err = mgr.launch::<u8>(&misnamed, &[], LaunchConfig::single(), None).unwrap_err();
        assert!(matches!(err, KilnError::SymbolNotFound { ref symbol, .. } if symbol == "total"));
        // The module itself compiled fine and stays cached.
        assert!(mgr.contains(DType::U8, &misnamed));
    }

    #[test]
    fn test_context_restored_after_failure() {
        let mut mgr = KernelManager::new(Arc::new(host_backend(5)));
        assert_eq!(HostBackend::current_ordinal(), None);
        let broken = KernelSource::new("broken", "__global__ void broken(TYPE *v) {").unwrap();
        assert!(mgr.launch::<f32>(&broken, &[], LaunchConfig::single(), None).is_err());
        assert_eq!(HostBackend::current_ordinal(), None);
        assert_eq!(HostBackend::context_depth(), 0);
        mgr.module::<f32>(&KernelSource::FILL).unwrap();
        mgr.synchronize().unwrap();
        assert_eq!(HostBackend::context_depth(), 0);
    }

    #[test]
    fn test_launch_named() {
        let mut mgr = manager();
        let lib = KernelLibrary::with_builtins();
        let err = mgr.launch_named::<i32>(&lib, "gemm", &[], LaunchConfig::single(), None).unwrap_err();
        assert!(matches!(err, KilnError::UnknownKernel(_)));
        assert!(mgr.is_empty());
    }

    #[test]
    fn test_clear_keeps_outstanding_modules() {
        let mut mgr = manager();
        let held = mgr.module::<i64>(&KernelSource::SCALE).unwrap();
        mgr.clear();
        assert!(mgr.is_empty());
        assert_eq!(held.source(), &KernelSource::SCALE);
        let again = mgr.module::<i64>(&KernelSource::SCALE).unwrap();
        assert!(!Arc::ptr_eq(&held, &again));
        assert_eq!(mgr.stats().compilations, 2);
    }

    #[test]
    fn test_stats_display() {
        let stats = CacheStats { hits: 3, compilations: 1, failures: 0 };
        assert_eq!(stats.lookups(), 4);
        assert_eq!(stats.to_string(), "3 hits, 1 compilations, 0 failures (75.0% hit rate)");
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
