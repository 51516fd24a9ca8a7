// =============================================================================
// VKCSCRATCH - Minimal Vulkan compute round-trip
// =============================================================================
//
// Uploads a buffer of random integers, runs a compute shader that copies it
// into a second buffer, and checks the copy on the host.
//
// SETUP ORDER:
// ┌─────────────────────────────────────────────────────────────────┐
// │  Instance (+ debug messenger when validating)                   │
// │    └── Physical device (prompted) + compute queue family        │
// │          └── Logical device + queue                             │
// │                └── Memory + input/output buffers                │
// │                      └── Shader → pipeline → descriptor set     │
// │                            └── Command buffer → submit → wait   │
// └─────────────────────────────────────────────────────────────────┘
//
// Any failure ends the run with the error chain and a non-zero exit code.
//
// =============================================================================

mod backend;
mod compute;
mod config;
mod prompt;

use anyhow::{Context, Result};
use backend::VulkanDevice;
use compute::CopyJob;
use config::Config;
use std::fs::File;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml (missing file = defaults)
    let config = Config::load()?;

    // Initialize logging
    init_logging(&config)?;
    log::info!("Hello, world.");
    log::info!("Elements per buffer: {}", config.compute.element_count);

    // Validation only makes sense in debug builds
    let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;
    let device = VulkanDevice::new(&config.app.name, enable_validation, config.device.index)?;

    let report = CopyJob::from_config(&config).run(&device)?;
    log::info!("Copy succeeded: {} elements match", report.element_count);

    Ok(())
}

/// Initialize logging, optionally sending output to the configured file
fn init_logging(config: &Config) -> Result<()> {
    use env_logger::{Builder, Target};

    // RUST_LOG, when set, wins over the configured level
    let mut builder = Builder::from_default_env();
    if std::env::var_os("RUST_LOG").is_none() {
        builder.filter_level(config.get_log_level());
    }

    if config.debug.log_to_file {
        let file = File::create(&config.debug.log_file)
            .with_context(|| format!("Failed to create log file: {}", config.debug.log_file))?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}
