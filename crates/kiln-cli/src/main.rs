use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use kiln_core::{Backend, DType, DeviceArray, KernelArg, KernelElement, LaunchConfig};
use kiln_kernels::{host_backend, CompileConfig, KernelLibrary, KernelManager, KernelSource};

const BANNER: &str = r#"
 _  _____ _     _   _
| |/ /_ _| |   | \ | |
| ' / | || |   |  \| |
| . \ | || |___| |\  |
|_|\_\___|_____|_| \_|"#;

#[derive(Parser)]
#[command(
    name = "kiln",
    about = "Kiln GPU kernel runtime CLI",
    long_about = "Compile type-generic kernel templates per element type, cache them per device,\nand launch them on copy-on-write device arrays.",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show devices, element types and the kernel library
    Info,
    /// Print a kernel instantiated for an element type, with its compile options
    Show {
        /// Kernel name (sum, asum, fill, scale)
        #[arg(long)]
        kernel: String,
        /// Element type: i8, u8, i32, u32, i64, u64, f32, f64
        #[arg(long, default_value = "f32")]
        dtype: DType,
        /// Compile config JSON file
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Upload values, run a reduction on one thread and print the result
    Run {
        /// Reduction to run: sum or asum
        #[arg(long, default_value = "sum")]
        kernel: String,
        /// Element type of the values
        #[arg(long, default_value = "f32")]
        dtype: DType,
        /// Run on CUDA device N instead of the host device
        #[arg(long)]
        cuda: Option<usize>,
        /// Compile config JSON file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Values to reduce
        #[arg(allow_hyphen_values = true)]
        values: Vec<String>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Info => cmd_info(),
        Commands::Show { kernel, dtype, config } => cmd_show(&kernel, dtype, config),
        Commands::Run { kernel, dtype, cuda, config, values } => cmd_run(&kernel, dtype, cuda, config, &values),
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<CompileConfig> {
    let config = match path {
        Some(path) => CompileConfig::from_json_file(&path)?,
        None => CompileConfig::default(),
    };
    let config = config.with_env_overrides()?;
    tracing::debug!("compile config: {:?}", config);
    Ok(config)
}

fn cmd_info() -> anyhow::Result<()> {
    println!("{}", BANNER);
    println!("  v{}  -  GPU kernel compile cache and device arrays\n", env!("CARGO_PKG_VERSION"));

    println!("Devices");
    let host = host_backend(0);
    println!("  {:<8} {} (emulated)", host.device().to_string(), host.device().compute_capability);
    print_cuda_devices();

    println!("\nDTypes");
    for dtype in DType::ALL {
        println!("  {:<5} {:>2} bytes  {}", dtype.to_string(), dtype.size_in_bytes(), dtype.c_type());
    }

    let library = KernelLibrary::with_builtins();
    println!("\nKernels ({})", library.len());
    for source in library.iter() {
        let signature = source.template().lines().next().unwrap_or_default().trim_end_matches(" {");
        println!("  {:<6} {}", source.name(), signature);
    }
    Ok(())
}

#[cfg(feature = "cuda")]
fn print_cuda_devices() {
    let count = kiln_kernels::cuda::device_count();
    if count == 0 {
        println!("  cuda     none found");
    }
    for ordinal in 0..count {
        match kiln_kernels::CudaBackend::new(ordinal) {
            Ok(gpu) => println!("  {:<8} {}", gpu.device().to_string(), gpu.device().compute_capability),
            Err(e) => println!("  cuda:{:<3} unavailable ({e})", ordinal),
        }
    }
}

#[cfg(not(feature = "cuda"))]
fn print_cuda_devices() {
    println!("  cuda     not compiled in (build with --features cuda)");
}

fn cmd_show(kernel: &str, dtype: DType, config: Option<PathBuf>) -> anyhow::Result<()> {
    let library = KernelLibrary::with_builtins();
    let source = library.get(kernel)?;
    let config = load_config(config)?;
    let cc = host_backend(0).device().compute_capability;
    println!("// {}<{}>  {}", source.name(), dtype, config.to_options(cc, dtype).join(" "));
    print!("{}", source.instantiate(dtype));
    Ok(())
}

fn cmd_run(
    kernel: &str,
    dtype: DType,
    cuda: Option<usize>,
    config: Option<PathBuf>,
    values: &[String],
) -> anyhow::Result<()> {
    let library = KernelLibrary::with_builtins();
    let source = library.get(kernel)?.clone();
    if source != KernelSource::SUM && source != KernelSource::ASUM {
        bail!("run supports the reductions 'sum' and 'asum', not '{kernel}'");
    }
    let config = load_config(config)?;

    match cuda {
        None => run_on(Arc::new(host_backend(0)), config, &source, dtype, values),
        Some(ordinal) => run_on_cuda(ordinal, config, &source, dtype, values),
    }
}

#[cfg(feature = "cuda")]
fn run_on_cuda(
    ordinal: usize,
    config: CompileConfig,
    source: &KernelSource,
    dtype: DType,
    values: &[String],
) -> anyhow::Result<()> {
    let gpu = kiln_kernels::CudaBackend::new(ordinal)?;
    run_on(Arc::new(gpu), config, source, dtype, values)
}

#[cfg(not(feature = "cuda"))]
fn run_on_cuda(
    ordinal: usize,
    _config: CompileConfig,
    _source: &KernelSource,
    _dtype: DType,
    _values: &[String],
) -> anyhow::Result<()> {
    bail!("cuda:{ordinal} requested but kiln was built without the 'cuda' feature")
}

fn run_on<B: Backend>(
    backend: Arc<B>,
    config: CompileConfig,
    source: &KernelSource,
    dtype: DType,
    values: &[String],
) -> anyhow::Result<()> {
    let mut mgr = KernelManager::with_config(backend, config);
    let start = Instant::now();
    let result = match dtype {
        DType::I8 => reduce::<i8, B>(&mut mgr, source, values)?,
        DType::U8 => reduce::<u8, B>(&mut mgr, source, values)?,
        DType::I32 => reduce::<i32, B>(&mut mgr, source, values)?,
        DType::U32 => reduce::<u32, B>(&mut mgr, source, values)?,
        DType::I64 => reduce::<i64, B>(&mut mgr, source, values)?,
        DType::U64 => reduce::<u64, B>(&mut mgr, source, values)?,
        DType::F32 => reduce::<f32, B>(&mut mgr, source, values)?,
        DType::F64 => reduce::<f64, B>(&mut mgr, source, values)?,
    };
    let elapsed = start.elapsed();

    println!("{}<{}> on {} = {}", source.name(), dtype, mgr.device(), result);
    println!("  {} values, {:.2?}", values.len(), elapsed);
    println!("  cache: {}", mgr.stats());
    Ok(())
}

fn reduce<T, B>(mgr: &mut KernelManager<B>, source: &KernelSource, values: &[String]) -> anyhow::Result<String>
where
    T: KernelElement + FromStr + Display,
    <T as FromStr>::Err: std::error::Error + Send + Sync + 'static,
    B: Backend,
{
    let parsed = values
        .iter()
        .map(|v| v.parse::<T>().with_context(|| format!("'{v}' is not a valid {}", T::DTYPE)))
        .collect::<anyhow::Result<Vec<T>>>()?;

    let backend = Arc::clone(mgr.backend());
    let vector = DeviceArray::from_host(&backend, &parsed)?;
    let mut result = DeviceArray::<T, B>::zeros(&backend, 1)?;
    mgr.launch::<T>(
        source,
        &[vector.as_kernel_arg(), KernelArg::scalar(vector.len() as i64), result.as_kernel_arg_mut()?],
        LaunchConfig::single(),
        None,
    )?;
    mgr.synchronize()?;
    Ok(result.get(0)?.read()?.to_string())
}
