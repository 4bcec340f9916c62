//! Benchmark: cold compiles vs cache hits vs full launches on the host backend.

use std::sync::Arc;
use std::time::Instant;

use kiln_core::{DType, DeviceArray, HostBackend, KernelArg, LaunchConfig};
use kiln_kernels::{host_backend, KernelManager, KernelSource};

fn bench_cold(dev: &Arc<HostBackend>, dtype: DType, iters: usize) -> f64 {
    let start = Instant::now();
    for _ in 0..iters {
        let mut mgr = KernelManager::new(Arc::clone(dev));
        let _ = mgr.module_dtype(dtype, &KernelSource::SUM).unwrap();
    }
    start.elapsed().as_secs_f64() / iters as f64
}

fn bench_hit(mgr: &mut KernelManager<HostBackend>, dtype: DType, iters: usize) -> f64 {
    mgr.module_dtype(dtype, &KernelSource::SUM).unwrap();
    let start = Instant::now();
    for _ in 0..iters {
        let _ = mgr.module_dtype(dtype, &KernelSource::SUM).unwrap();
    }
    start.elapsed().as_secs_f64() / iters as f64
}

fn bench_launch(mgr: &mut KernelManager<HostBackend>, n: usize, iters: usize) -> f64 {
    let dev = Arc::clone(mgr.backend());
    let data: Vec<f32> = (0..n).map(|i| ((i * 7 + 3) % 13) as f32 * 0.1 - 0.6).collect();
    let vector = DeviceArray::from_host(&dev, &data).unwrap();
    let mut result = DeviceArray::<f32, _>::zeros(&dev, 1).unwrap();
    let start = Instant::now();
    for _ in 0..iters {
        mgr.launch::<f32>(
            &KernelSource::SUM,
            &[vector.as_kernel_arg(), KernelArg::scalar(n as i64), result.as_kernel_arg_mut().unwrap()],
            LaunchConfig::single(),
            None,
        )
        .unwrap();
    }
    start.elapsed().as_secs_f64() / iters as f64
}

fn main() {
    println!("=== Kiln Kernel Cache Benchmark ===\n");
    let dev = Arc::new(host_backend(0));
    let mut mgr = KernelManager::new(Arc::clone(&dev));

    println!("{:<8} {:>14} {:>14} {:>10}", "DType", "Cold (us)", "Hit (us)", "Speedup");
    println!("{}", "-".repeat(50));
    for dtype in DType::ALL {
        let cold = bench_cold(&dev, dtype, 200);
        let hit = bench_hit(&mut mgr, dtype, 10_000);
        println!(
            "{:<8} {:>12.3}us {:>12.3}us {:>9.1}x",
            dtype.to_string(),
            cold * 1e6,
            hit * 1e6,
            cold / hit,
        );
    }

    println!("\n{:<10} {:>14}", "Elements", "Launch (us)");
    println!("{}", "-".repeat(26));
    for &n in &[16usize, 256, 4096, 65_536] {
        let iters = if n <= 256 { 2000 } else { 100 };
        let secs = bench_launch(&mut mgr, n, iters);
        println!("{:<10} {:>12.3}us", n, secs * 1e6);
    }

    println!("\n{}", mgr.stats());
}
