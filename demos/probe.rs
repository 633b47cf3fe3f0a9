// demos/probe.rs — Acquire a GPU device and fit a plane to a synthetic cloud.
//
// Prints the session state after initialization (backend actually in use,
// adapter, instance references) and the best-fit plane of a noisy sample
// of z = 0.25x - 0.5y + 2.
//
// USAGE
//   cargo run --example probe
//   cargo run --example probe -- --backend vulkan --power low-power --timeout-ms 3000
//   RUST_LOG=debug cargo run --example probe -- --points 1000000

use std::time::{Duration, Instant};

use clap::Parser;
use glam::DVec3;

use planefit_gpu::gpu::{BackendPreference, BackendType, DeviceSession, PowerPreference, SessionConfig};
use planefit_gpu::plane::fit_plane;

#[derive(Parser, Debug)]
#[command(about = "Probe GPU device acquisition and fit a plane to a point cloud")]
struct Args {
    /// vulkan, metal, dx12, gl or webgpu. Platform default when omitted.
    #[arg(long)]
    backend: Option<BackendType>,

    /// undefined, low-power or high-performance.
    #[arg(long, default_value = "high-performance")]
    power: PowerPreference,

    /// Give up on device acquisition after this long.
    #[arg(long, default_value_t = 2000)]
    timeout_ms: u64,

    /// Size of the synthetic point cloud.
    #[arg(long, default_value_t = 100_000)]
    points: usize,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let backend = args
        .backend
        .map_or(BackendPreference::PlatformDefault, BackendPreference::Explicit);
    let config = SessionConfig::default()
        .with_backend(backend)
        .with_power_preference(args.power)
        .with_timeout(Duration::from_millis(args.timeout_ms));

    let mut session = DeviceSession::new(config);
    let t0 = Instant::now();
    match session.try_initialize() {
        Ok(()) => {
            println!("device ready in {:.1} ms", t0.elapsed().as_secs_f64() * 1e3);
            if let Some(info) = session.adapter_info() {
                println!("adapter: {info}");
            }
        }
        Err(e) => println!("no device: {e}"),
    }
    println!("{session}");

    let cloud = make_cloud(args.points);
    let t0 = Instant::now();
    let fit = fit_plane(&cloud);
    println!(
        "fit {} points in {:.2} ms: {fit}",
        cloud.len(),
        t0.elapsed().as_secs_f64() * 1e3
    );

    session.finalize();
}

fn make_cloud(n: usize) -> Vec<DVec3> {
    let mut state = 0x2545_f491_4f6c_dd1du64;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state >> 11) as f64 / (1u64 << 53) as f64 - 0.5
    };
    (0..n)
        .map(|_| {
            let x = 40.0 * next();
            let y = 40.0 * next();
            DVec3::new(x, y, 0.25 * x - 0.5 * y + 2.0 + 0.05 * next())
        })
        .collect()
}
