//! Emulated device backed by host memory.
//!
//! `HostBackend` implements the full `Backend` contract without a GPU:
//! device memory is a heap of byte blocks, addresses encode
//! `(block id << 32) | byte offset`, and "compiling" a kernel validates
//! the source and resolves its `__global__` entry points against native
//! Rust implementations registered with [`HostBackend::with_kernel`].
//! Launches run the native kernel once per (block, thread) of the grid,
//! synchronously.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::Backend;
use crate::error::TransferDirection;
use crate::launch::{ArgValue, DevicePtr, Dim3};
use crate::{ComputeCapability, DType, Device, KernelArg, KernelElement, KilnError, LaunchConfig, Result};

const OFFSET_BITS: u32 = 32;
const OFFSET_MASK: u64 = (1 << OFFSET_BITS) - 1;

/// Compute capability reported by host devices unless overridden.
pub const HOST_COMPUTE_CAPABILITY: ComputeCapability = ComputeCapability::new(8, 0);

/// Native implementation of a kernel entry point, run once per thread.
pub type HostKernelFn = fn(&HostLaunch<'_>) -> Result<()>;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

// ============================================================================
// Heap
// ============================================================================

#[derive(Default)]
struct Heap {
    blocks: Mutex<HashMap<u32, Vec<u8>>>,
    next_id: AtomicU32,
    live_bytes: AtomicUsize,
}

impl Heap {
    fn insert(&self, nbytes: usize) -> u32 {
        // Id 0 is reserved so that no valid address is null.
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.blocks.lock().insert(id, vec![0u8; nbytes]);
        self.live_bytes.fetch_add(nbytes, Ordering::Relaxed);
        id
    }

    fn free(&self, id: u32) {
        if let Some(block) = self.blocks.lock().remove(&id) {
            self.live_bytes.fetch_sub(block.len(), Ordering::Relaxed);
        }
    }

    /// Split an address into (block id, byte offset) and check that
    /// `nbytes` starting there lie inside a live block.
    fn resolve(&self, ptr: DevicePtr, nbytes: usize) -> Result<(u32, usize)> {
        let id = (ptr.0 >> OFFSET_BITS) as u32;
        let offset = (ptr.0 & OFFSET_MASK) as usize;
        let blocks = self.blocks.lock();
        let block = blocks.get(&id).ok_or_else(|| {
            KilnError::InvalidArgument(format!("{ptr} does not point into a live allocation"))
        })?;
        if offset.checked_add(nbytes).map_or(true, |end| end > block.len()) {
            return Err(KilnError::InvalidArgument(format!(
                "access of {nbytes} bytes at {ptr} overruns allocation of {} bytes",
                block.len()
            )));
        }
        Ok((id, offset))
    }

    fn read(&self, ptr: DevicePtr, dst: &mut [u8]) -> Result<()> {
        let (id, offset) = self.resolve(ptr, dst.len())?;
        let blocks = self.blocks.lock();
        let block = blocks.get(&id).ok_or_else(|| KilnError::Internal("block vanished".into()))?;
        dst.copy_from_slice(&block[offset..offset + dst.len()]);
        Ok(())
    }

    fn write(&self, ptr: DevicePtr, src: &[u8]) -> Result<()> {
        let (id, offset) = self.resolve(ptr, src.len())?;
        let mut blocks = self.blocks.lock();
        let block = blocks.get_mut(&id).ok_or_else(|| KilnError::Internal("block vanished".into()))?;
        block[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }
}

fn address(id: u32, offset: usize) -> DevicePtr {
    DevicePtr(((id as u64) << OFFSET_BITS) | offset as u64)
}

/// One allocation on a host device. Freed on drop.
pub struct HostMemory {
    id: u32,
    len: usize,
    heap: Arc<Heap>,
}

impl HostMemory {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for HostMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostMemory")
            .field("id", &self.id)
            .field("len", &self.len)
            .finish()
    }
}

impl Drop for HostMemory {
    fn drop(&mut self) {
        self.heap.free(self.id);
    }
}

// ============================================================================
// Modules and streams
// ============================================================================

/// A "compiled" host module: the validated source and its declared entry points.
#[derive(Debug, Clone)]
pub struct HostModule {
    source: String,
    dtype: DType,
    options: Vec<String>,
    entries: Vec<String>,
}

impl HostModule {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    /// Names of the `__global__` functions declared in the source.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }
}

/// Host streams execute in issue order on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostStream;

// ============================================================================
// HostBackend
// ============================================================================

/// An emulated compute device whose memory lives in host RAM.
pub struct HostBackend {
    ordinal: usize,
    compute_capability: ComputeCapability,
    memory_limit: Option<usize>,
    kernels: HashMap<String, HostKernelFn>,
    heap: Arc<Heap>,
}

impl HostBackend {
    /// A host device with no native kernels registered.
    pub fn new(ordinal: usize) -> Self {
        Self {
            ordinal,
            compute_capability: HOST_COMPUTE_CAPABILITY,
            memory_limit: None,
            kernels: HashMap::new(),
            heap: Arc::new(Heap::default()),
        }
    }

    pub fn with_compute_capability(mut self, cc: ComputeCapability) -> Self {
        self.compute_capability = cc;
        self
    }

    /// Cap the total bytes live at once; allocations beyond it fail.
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Register the native implementation of entry point `name`.
    pub fn with_kernel(mut self, name: impl Into<String>, kernel: HostKernelFn) -> Self {
        self.kernels.insert(name.into(), kernel);
        self
    }

    pub fn register_kernel(&mut self, name: impl Into<String>, kernel: HostKernelFn) {
        self.kernels.insert(name.into(), kernel);
    }

    /// Names of the registered native kernels, sorted.
    pub fn kernel_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.kernels.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Bytes currently allocated on this device.
    pub fn live_bytes(&self) -> usize {
        self.heap.live_bytes.load(Ordering::Relaxed)
    }

    /// Number of live allocations on this device.
    pub fn live_allocations(&self) -> usize {
        self.heap.blocks.lock().len()
    }

    pub fn create_stream(&self) -> HostStream {
        HostStream
    }

    /// Ordinal of the host device whose context is current on this thread.
    pub fn current_ordinal() -> Option<usize> {
        CONTEXT_STACK.with(|s| s.borrow().last().copied())
    }

    /// Depth of this thread's context stack.
    pub fn context_depth() -> usize {
        CONTEXT_STACK.with(|s| s.borrow().len())
    }

    fn launch_error(&self, kernel: &str, reason: impl fmt::Display) -> KilnError {
        KilnError::Launch { device: self.device(), kernel: kernel.to_string(), reason: reason.to_string() }
    }
}

impl fmt::Debug for HostBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBackend")
            .field("ordinal", &self.ordinal)
            .field("compute_capability", &self.compute_capability)
            .field("memory_limit", &self.memory_limit)
            .field("kernels", &self.kernel_names())
            .field("live_bytes", &self.live_bytes())
            .finish()
    }
}

impl Backend for HostBackend {
    type Memory = HostMemory;
    type Module = HostModule;
    type Stream = HostStream;

    fn device(&self) -> Device {
        Device::host(self.ordinal, self.compute_capability)
    }

    fn alloc(&self, nbytes: usize) -> Result<HostMemory> {
        if nbytes as u64 > OFFSET_MASK {
            return Err(KilnError::Allocation {
                device: self.device(),
                bytes: nbytes,
                reason: "exceeds the 4 GiB host block limit".into(),
            });
        }
        if let Some(limit) = self.memory_limit {
            let live = self.live_bytes();
            if live + nbytes > limit {
                return Err(KilnError::Allocation {
                    device: self.device(),
                    bytes: nbytes,
                    reason: format!("out of memory ({live} of {limit} bytes in use)"),
                });
            }
        }
        let id = self.heap.insert(nbytes);
        tracing::trace!("{}: alloc block {} ({} bytes)", self.device(), id, nbytes);
        Ok(HostMemory { id, len: nbytes, heap: Arc::clone(&self.heap) })
    }

    fn device_ptr(&self, memory: &HostMemory) -> DevicePtr {
        address(memory.id, 0)
    }

    fn copy_htod(&self, src: &[u8], dst: &mut HostMemory, offset: usize) -> Result<()> {
        self.heap
            .write(address(dst.id, offset), src)
            .map_err(|e| KilnError::transfer(TransferDirection::HostToDevice, e))
    }

    fn copy_dtoh(&self, src: &HostMemory, offset: usize, dst: &mut [u8]) -> Result<()> {
        self.heap
            .read(address(src.id, offset), dst)
            .map_err(|e| KilnError::transfer(TransferDirection::DeviceToHost, e))
    }

    fn copy_dtod(
        &self,
        src: &HostMemory,
        src_offset: usize,
        dst: &mut HostMemory,
        dst_offset: usize,
        nbytes: usize,
    ) -> Result<()> {
        let mut staging = vec![0u8; nbytes];
        self.heap
            .read(address(src.id, src_offset), &mut staging)
            .and_then(|()| self.heap.write(address(dst.id, dst_offset), &staging))
            .map_err(|e| KilnError::transfer(TransferDirection::DeviceToDevice, e))
    }

    fn push_context(&self) -> Result<()> {
        CONTEXT_STACK.with(|s| s.borrow_mut().push(self.ordinal));
        Ok(())
    }

    fn pop_context(&self) {
        CONTEXT_STACK.with(|s| {
            s.borrow_mut().pop();
        });
    }

    fn synchronize(&self) -> Result<()> {
        Ok(())
    }

    fn compile(
        &self,
        source: &str,
        dtype: DType,
        options: &[String],
    ) -> std::result::Result<HostModule, String> {
        check_balanced(source)?;
        let entries = declared_entries(source);
        if entries.is_empty() {
            return Err("no __global__ entry points declared".into());
        }
        Ok(HostModule {
            source: source.to_string(),
            dtype,
            options: options.to_vec(),
            entries,
        })
    }

    fn has_function(&self, module: &HostModule, name: &str) -> bool {
        module.entries.iter().any(|e| e == name) && self.kernels.contains_key(name)
    }

    fn launch(
        &self,
        module: &HostModule,
        name: &str,
        config: LaunchConfig,
        args: &[KernelArg<'_>],
        _stream: Option<&HostStream>,
    ) -> Result<()> {
        let kernel = *self
            .kernels
            .get(name)
            .ok_or_else(|| self.launch_error(name, "no native implementation registered"))?;
        if config.total_threads() == 0 {
            return Err(self.launch_error(name, "grid or block has a zero dimension"));
        }

        let values: Vec<ArgValue> = args.iter().map(|a| *a.value()).collect();
        for block in 0..config.grid.volume() {
            for thread in 0..config.block.volume() {
                let launch = HostLaunch {
                    heap: &self.heap,
                    dtype: module.dtype,
                    args: &values,
                    grid_dim: config.grid,
                    block_dim: config.block,
                    block_idx: unflatten(block, config.grid),
                    thread_idx: unflatten(thread, config.block),
                };
                kernel(&launch).map_err(|e| self.launch_error(name, e))?;
            }
        }
        Ok(())
    }
}

fn unflatten(linear: u64, dim: Dim3) -> Dim3 {
    let x = linear % dim.x as u64;
    let y = (linear / dim.x as u64) % dim.y as u64;
    let z = linear / (dim.x as u64 * dim.y as u64);
    Dim3::new(x as u32, y as u32, z as u32)
}

// ============================================================================
// Source checks
// ============================================================================

/// Verify that brackets balance outside comments and literals.
fn check_balanced(source: &str) -> std::result::Result<(), String> {
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut line = 1;
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\n' => line += 1,
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        line += 1;
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for c in chars.by_ref() {
                    if c == '\n' {
                        line += 1;
                    }
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            }
            '"' | '\'' => {
                let mut escaped = false;
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        line += 1;
                    }
                    if !escaped && inner == c {
                        break;
                    }
                    escaped = !escaped && inner == '\\';
                }
            }
            '(' | '[' | '{' => stack.push((c, line)),
            ')' | ']' | '}' => {
                let open = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some((o, _)) if o == open => {}
                    Some((o, l)) => {
                        return Err(format!("line {line}: '{c}' closes '{o}' opened on line {l}"))
                    }
                    None => return Err(format!("line {line}: unmatched '{c}'")),
                }
            }
            _ => {}
        }
    }
    match stack.pop() {
        Some((o, l)) => Err(format!("line {l}: '{o}' is never closed")),
        None => Ok(()),
    }
}

/// Names of functions declared `__global__ void <name>`, in source order.
pub fn declared_entries(source: &str) -> Vec<String> {
    scan_entries(source).into_iter().map(|(name, _)| name).collect()
}

/// The subset of [`declared_entries`] declared `extern "C"`, whose symbol
/// in the compiled module is the plain name.
pub fn exported_entries(source: &str) -> Vec<String> {
    scan_entries(source)
        .into_iter()
        .filter_map(|(name, extern_c)| extern_c.then_some(name))
        .collect()
}

fn scan_entries(source: &str) -> Vec<(String, bool)> {
    let mut entries: Vec<(String, bool)> = Vec::new();
    let mut pos = 0;
    while let Some(found) = source[pos..].find("__global__") {
        let at = pos + found;
        pos = at + "__global__".len();
        let extern_c = source[..at].trim_end().ends_with("extern \"C\"");
        let Some(after_void) = source[pos..].trim_start().strip_prefix("void") else {
            continue;
        };
        let name: String = after_void
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        if !name.is_empty() && !entries.iter().any(|(n, _)| *n == name) {
            entries.push((name, extern_c));
        }
    }
    entries
}

// ============================================================================
// HostLaunch
// ============================================================================

/// The view a native host kernel gets of one thread of a launch.
///
/// Pointer accesses are bounds-checked against the allocation they point into.
pub struct HostLaunch<'a> {
    heap: &'a Heap,
    dtype: DType,
    args: &'a [ArgValue],
    grid_dim: Dim3,
    block_dim: Dim3,
    block_idx: Dim3,
    thread_idx: Dim3,
}

impl<'a> HostLaunch<'a> {
    /// Element type the module was compiled for.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn grid_dim(&self) -> Dim3 {
        self.grid_dim
    }

    pub fn block_dim(&self) -> Dim3 {
        self.block_dim
    }

    pub fn block_idx(&self) -> Dim3 {
        self.block_idx
    }

    pub fn thread_idx(&self) -> Dim3 {
        self.thread_idx
    }

    /// `blockIdx.x * blockDim.x + threadIdx.x`
    pub fn global_x(&self) -> u64 {
        self.block_idx.x as u64 * self.block_dim.x as u64 + self.thread_idx.x as u64
    }

    /// Total threads along x (`gridDim.x * blockDim.x`), the grid-stride step.
    pub fn stride_x(&self) -> u64 {
        self.grid_dim.x as u64 * self.block_dim.x as u64
    }

    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    pub fn arg(&self, index: usize) -> Result<&ArgValue> {
        self.args.get(index).ok_or_else(|| {
            KilnError::InvalidArgument(format!(
                "argument {index} requested but only {} passed",
                self.args.len()
            ))
        })
    }

    pub fn ptr(&self, index: usize) -> Result<DevicePtr> {
        match self.arg(index)? {
            ArgValue::Ptr(p) => Ok(*p),
            other => Err(mismatch(index, "pointer", other)),
        }
    }

    /// Integer argument used as a count or index (C `long`/`int`).
    pub fn len_arg(&self, index: usize) -> Result<usize> {
        let value = match self.arg(index)? {
            ArgValue::I32(v) => i64::from(*v),
            ArgValue::I64(v) => *v,
            ArgValue::U32(v) => i64::from(*v),
            ArgValue::U64(v) => i64::try_from(*v).unwrap_or(i64::MAX),
            other => return Err(mismatch(index, "integer", other)),
        };
        usize::try_from(value)
            .map_err(|_| KilnError::InvalidArgument(format!("argument {index} is negative ({value})")))
    }

    /// By-value argument of the element type `T`.
    pub fn scalar<T: KernelElement>(&self, index: usize) -> Result<T> {
        let arg = self.arg(index)?;
        T::from_arg(arg).ok_or_else(|| mismatch(index, &T::DTYPE.to_string(), arg))
    }

    /// Read `count` elements starting at `ptr`.
    pub fn read<T: KernelElement>(&self, ptr: DevicePtr, count: usize) -> Result<Vec<T>> {
        let nbytes = count.checked_mul(std::mem::size_of::<T>()).ok_or_else(|| {
            KilnError::InvalidArgument(format!("reading {count} {} elements overflows", T::DTYPE))
        })?;
        // Bounds first, so an oversized count never reaches the allocator.
        self.heap.resolve(ptr, nbytes)?;
        let mut bytes = vec![0u8; nbytes];
        self.heap.read(ptr, &mut bytes)?;
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }

    pub fn read_one<T: KernelElement>(&self, ptr: DevicePtr) -> Result<T> {
        let mut bytes = vec![0u8; std::mem::size_of::<T>()];
        self.heap.read(ptr, &mut bytes)?;
        Ok(bytemuck::pod_read_unaligned(&bytes))
    }

    /// Write `values` starting at `ptr`.
    pub fn write<T: KernelElement>(&self, ptr: DevicePtr, values: &[T]) -> Result<()> {
        self.heap.write(ptr, bytemuck::cast_slice(values))
    }

    pub fn write_one<T: KernelElement>(&self, ptr: DevicePtr, value: T) -> Result<()> {
        self.heap.write(ptr, bytemuck::bytes_of(&value))
    }
}

fn mismatch(index: usize, expected: &str, got: &ArgValue) -> KilnError {
    KilnError::InvalidArgument(format!("argument {index}: expected {expected}, got {}", got.kind()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const COPY_SRC: &str = r#"extern "C" __global__ void copy(int *src, int *dst, long n) {
        long i = blockIdx.x * blockDim.x + threadIdx.x;
        if (i < n) dst[i] = src[i];
    }"#;

    fn copy_kernel(launch: &HostLaunch<'_>) -> Result<()> {
        let (src, dst, n) = (launch.ptr(0)?, launch.ptr(1)?, launch.len_arg(2)?);
        let i = launch.global_x() as usize;
        if i < n {
            let v: i32 = launch.read_one(src.offset(i * 4))?;
            launch.write_one(dst.offset(i * 4), v)?;
        }
        Ok(())
    }

    #[test]
    fn test_alloc_is_zeroed_and_freed_on_drop() {
        let backend = HostBackend::new(0);
        let mem = backend.alloc(16).unwrap();
        let mut out = [0xffu8; 16];
        backend.copy_dtoh(&mem, 0, &mut out).unwrap();
        assert_eq!(out, [0u8; 16]);
        assert_eq!(backend.live_bytes(), 16);
        drop(mem);
        assert_eq!(backend.live_bytes(), 0);
        assert_eq!(backend.live_allocations(), 0);
    }

    #[test]
    fn test_memory_limit() {
        let backend = HostBackend::new(0).with_memory_limit(64);
        let _a = backend.alloc(48).unwrap();
        let err = backend.alloc(32).unwrap_err();
        assert!(matches!(err, KilnError::Allocation { bytes: 32, .. }));
    }

    #[test]
    fn test_copies_at_offsets() {
        let backend = HostBackend::new(0);
        let mut a = backend.alloc(8).unwrap();
        let mut b = backend.alloc(8).unwrap();
        backend.copy_htod(&[1, 2, 3, 4], &mut a, 2).unwrap();
        backend.copy_dtod(&a, 2, &mut b, 0, 4).unwrap();
        let mut out = [0u8; 8];
        backend.copy_dtoh(&b, 0, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4, 0, 0, 0, 0]);
    }

    #[test]
    fn test_copy_past_end_is_transfer_error() {
        let backend = HostBackend::new(0);
        let mut a = backend.alloc(4).unwrap();
        let err = backend.copy_htod(&[0; 8], &mut a, 0).unwrap_err();
        assert!(matches!(err, KilnError::Transfer { direction: TransferDirection::HostToDevice, .. }));
    }

    #[test]
    fn test_compile_finds_entries() {
        let backend = HostBackend::new(0);
        let module = backend.compile(COPY_SRC, DType::I32, &[]).unwrap();
        assert_eq!(module.entries(), &["copy".to_string()]);
        assert_eq!(module.dtype(), DType::I32);
    }

    #[test]
    fn test_exported_entries_skip_cxx_linkage() {
        let src = r#"__global__ void helper(int *x) { *x += 1; }
            extern "C" __global__ void k(int *x) { *x = 0; }
            extern "C"
            __global__ void k2(int *x) {}"#;
        assert_eq!(declared_entries(src), vec!["helper", "k", "k2"]);
        assert_eq!(exported_entries(src), vec!["k", "k2"]);
    }

    #[test]
    fn test_read_past_allocation_is_error_before_allocating() {
        let heap = Heap::default();
        let id = heap.insert(16);
        let origin = Dim3::new(0, 0, 0);
        let launch = HostLaunch {
            heap: &heap,
            dtype: DType::I32,
            args: &[],
            grid_dim: Dim3::new(1, 1, 1),
            block_dim: Dim3::new(1, 1, 1),
            block_idx: origin,
            thread_idx: origin,
        };
        let ptr = address(id, 0);
        assert!(matches!(launch.read::<i32>(ptr, usize::MAX / 2), Err(KilnError::InvalidArgument(_))));
        assert!(matches!(launch.read::<i32>(ptr, 5), Err(KilnError::InvalidArgument(_))));
        assert_eq!(launch.read::<i32>(ptr, 4).unwrap(), vec![0; 4]);
    }

    #[test]
    fn test_compile_rejects_unbalanced_source() {
        let backend = HostBackend::new(0);
        let err = backend
            .compile("__global__ void f(int *a) { a[0] = 1;", DType::I32, &[])
            .unwrap_err();
        assert!(err.contains("never closed"), "{err}");
        let err = backend.compile("int x = 1;", DType::I32, &[]).unwrap_err();
        assert!(err.contains("no __global__"));
    }

    #[test]
    fn test_balance_ignores_comments_and_literals() {
        assert!(check_balanced("// (\n/* { */ const char *s = \"}\"; char c = '(';").is_ok());
        assert!(check_balanced("f(]").is_err());
    }

    #[test]
    fn test_has_function_requires_native_kernel() {
        let bare = HostBackend::new(0);
        let module = bare.compile(COPY_SRC, DType::I32, &[]).unwrap();
        assert!(!bare.has_function(&module, "copy"));

        let backend = HostBackend::new(0).with_kernel("copy", copy_kernel);
        assert!(backend.has_function(&module, "copy"));
        assert!(!backend.has_function(&module, "missing"));
    }

    #[test]
    fn test_launch_runs_every_thread() {
        let backend = HostBackend::new(0).with_kernel("copy", copy_kernel);
        let module = backend.compile(COPY_SRC, DType::I32, &[]).unwrap();
        let values: Vec<i32> = (0..10).collect();
        let mut src = backend.alloc(40).unwrap();
        let dst = backend.alloc(40).unwrap();
        backend.copy_htod(bytemuck::cast_slice(&values), &mut src, 0).unwrap();

        let args = [
            KernelArg::pointer(backend.device_ptr(&src)),
            KernelArg::pointer(backend.device_ptr(&dst)),
            KernelArg::scalar(10i64),
        ];
        backend
            .launch(&module, "copy", LaunchConfig::for_elements(10, 4), &args, None)
            .unwrap();

        let mut out = vec![0u8; 40];
        backend.copy_dtoh(&dst, 0, &mut out).unwrap();
        let out: Vec<i32> = bytemuck::pod_collect_to_vec(&out);
        assert_eq!(out, values);
    }

    #[test]
    fn test_launch_reports_bad_pointer() {
        let backend = HostBackend::new(0).with_kernel("copy", copy_kernel);
        let module = backend.compile(COPY_SRC, DType::I32, &[]).unwrap();
        let src = backend.alloc(4).unwrap();
        let args = [
            KernelArg::pointer(backend.device_ptr(&src)),
            KernelArg::pointer(DevicePtr(0)),
            KernelArg::scalar(1i64),
        ];
        let err = backend
            .launch(&module, "copy", LaunchConfig::single(), &args, None)
            .unwrap_err();
        assert!(matches!(err, KilnError::Launch { .. }));
    }

    #[test]
    fn test_unflatten() {
        let dim = Dim3::new(4, 3, 2);
        assert_eq!(unflatten(0, dim), Dim3::new(0, 0, 0));
        assert_eq!(unflatten(5, dim), Dim3::new(1, 1, 0));
        assert_eq!(unflatten(23, dim), Dim3::new(3, 2, 1));
    }
}
