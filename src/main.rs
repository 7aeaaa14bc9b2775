//! xdna-upscale: run a streaming up-scaling pipeline on the CPU reference kernels

use std::env;
use xdna_upscale::config::Config;
use xdna_upscale::pipeline::{presets, Pipeline, PipelineDecl, RunOptions};
use xdna_upscale::scheduler::TraceEvent;

fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    let mut trace = false;
    let mut target = None;

    for arg in &args[1..] {
        match arg.as_str() {
            "--sample-config" => {
                print!("{}", Config::sample_config());
                return Ok(());
            }
            "--list" => {
                for name in presets::PRESET_NAMES {
                    println!("{}", name);
                }
                return Ok(());
            }
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            "--trace" => trace = true,
            a if !a.starts_with('-') => target = Some(a.to_string()),
            a => {
                eprintln!("Unknown option: {}", a);
                print_usage();
                std::process::exit(2);
            }
        }
    }

    let config = Config::get();
    let target = target.unwrap_or_else(|| config.default_preset());

    let decl = if target.ends_with(".toml") {
        PipelineDecl::from_file(&target)?
    } else {
        presets::resolve(&target, &config.preset_dir())?
    };

    let pipeline = Pipeline::assemble(decl)?;
    let decl = pipeline.decl();
    println!(
        "Pipeline: {} ({}x{} -> {}x{})",
        decl.name,
        decl.width,
        decl.height,
        decl.kernel.out_width,
        decl.output_rows()
    );
    println!(
        "Kernel: {} K={} x{} border={}",
        decl.kernel.symbol,
        decl.kernel.window_rows,
        decl.kernel.output_multiplier,
        decl.border
    );
    println!("Worker tile: {}", pipeline.placement().worker);
    println!();

    let mut kernel = presets::reference_kernel(decl)?;
    let input = presets::gradient(decl.width, decl.height);
    let coefficients = presets::reference_coefficients(decl);

    let mut options = RunOptions::from_config(config);
    options.trace |= trace;

    let report = pipeline.run(kernel.as_mut(), input, coefficients, options)?;
    print!("{}", report);

    if let Some(trace) = &report.trace {
        println!();
        println!("Trace ({} events):", trace.events().len());
        for event in trace.events() {
            match event {
                TraceEvent::Acquire { queue, rows } => {
                    println!("  acquire {:?} {:?}", queue, rows.as_slice())
                }
                TraceEvent::Release { queue, rows } => {
                    println!("  release {:?} {:?}", queue, rows.as_slice())
                }
                TraceEvent::Compute {
                    output_row,
                    multiplier_index,
                    phase,
                    window,
                    ..
                } => println!(
                    "  compute row {} [{}] {} window {:?}",
                    output_row,
                    multiplier_index,
                    phase,
                    window.as_slice()
                ),
            }
        }
    }

    println!();
    println!("First output row:");
    let row = &report.output[..decl.kernel.out_width];
    println!("  {:?}", row);

    Ok(())
}

fn print_usage() {
    println!("Usage: xdna-upscale [preset|decl.toml] [--trace]");
    println!("       xdna-upscale --list");
    println!("       xdna-upscale --sample-config");
    println!();
    println!("Presets: {}", presets::PRESET_NAMES.join(", "));
    if let Some(path) = Config::user_config_path() {
        println!("User config: {}", path.display());
    }
}
