// =============================================================================
// COPY JOB - One buffer round-trip through the copy shader
// =============================================================================
//
// FLOW:
// 1. Create input/output storage buffers in one host-visible allocation
// 2. Fill the whole allocation with random integers
// 3. Load shader, build compute pipeline, bind both buffers
// 4. Record one dispatch (one workgroup per element), submit, wait idle
// 5. Read both regions back and compare element by element

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

use crate::backend::shader::{self, ShaderSource};
use crate::backend::{CommandContext, ComputePipeline, StorageBuffers, VulkanDevice};
use crate::config::Config;

/// Outcome of a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyReport {
    pub element_count: usize,
}

/// Parameters of one copy run
#[derive(Debug, Clone)]
pub struct CopyJob {
    pub element_count: u32,
    pub seed: Option<u64>,
    pub shader: ShaderSource,
    pub entry_point: String,
}

impl CopyJob {
    pub fn from_config(config: &Config) -> Self {
        Self {
            element_count: config.compute.element_count,
            seed: config.compute.seed,
            shader: ShaderSource::from_config(config.shader.path.as_deref()),
            entry_point: config.shader.entry_point.clone(),
        }
    }

    /// Run the round-trip on `device` and verify the output
    pub fn run(&self, device: &Arc<VulkanDevice>) -> Result<CopyReport> {
        let buffer_size = self.element_count as u64 * std::mem::size_of::<i32>() as u64;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1-2: Buffers + random payload
        // ─────────────────────────────────────────────────────────────────────
        let buffers = StorageBuffers::new(device, buffer_size)?;

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        buffers.fill_random(&mut rng)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Shader + pipeline
        // ─────────────────────────────────────────────────────────────────────
        let words = self.shader.load_words()?;
        let shader_module = shader::create_shader_module(device, &words)?;

        let pipeline = ComputePipeline::new(device, shader_module, &self.entry_point);

        // The module is baked into the pipeline (or creation failed)
        unsafe {
            device.device.destroy_shader_module(shader_module, None);
        }
        let pipeline = pipeline?;
        pipeline.bind_buffers(buffers.input, buffers.output);

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Dispatch
        // ─────────────────────────────────────────────────────────────────────
        let commands = CommandContext::new(device)?;
        commands.record_dispatch(&pipeline, self.element_count)?;

        log::info!("Dispatching copy of {} elements", self.element_count);
        commands.submit_and_wait()?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Verify
        // ─────────────────────────────────────────────────────────────────────
        let (input, output) = buffers.read_back()?;
        verify_copy(&input, &output).context("Copy verification failed")?;

        log::info!("Verified {} elements", input.len());

        Ok(CopyReport {
            element_count: input.len(),
        })
    }
}

/// Check that `output` is an exact copy of `input`
pub fn verify_copy(input: &[i32], output: &[i32]) -> Result<()> {
    if input.len() != output.len() {
        anyhow::bail!(
            "Length mismatch: input has {} elements, output has {}",
            input.len(),
            output.len()
        );
    }

    let mut mismatches = input
        .iter()
        .zip(output)
        .enumerate()
        .filter(|(_, (a, b))| a != b);

    if let Some((index, (expected, actual))) = mismatches.next() {
        let total = 1 + mismatches.count();
        anyhow::bail!(
            "{} of {} elements differ; first at index {}: input {}, output {}",
            total,
            input.len(),
            index,
            expected,
            actual
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_buffers_pass() {
        let data = [5, -3, i32::MAX, i32::MIN, 0];
        assert!(verify_copy(&data, &data).is_ok());
        assert!(verify_copy(&[], &[]).is_ok());
    }

    #[test]
    fn reports_first_mismatch_and_count() {
        let input = [1, 2, 3, 4, 5];
        let output = [1, 9, 3, 8, 5];

        let message = verify_copy(&input, &output).unwrap_err().to_string();
        assert!(message.contains("2 of 5 elements differ"), "{}", message);
        assert!(message.contains("index 1"), "{}", message);
        assert!(message.contains("input 2, output 9"), "{}", message);
    }

    #[test]
    fn length_mismatch_fails() {
        assert!(verify_copy(&[1, 2], &[1]).is_err());
    }

    #[test]
    fn job_from_default_config() {
        let job = CopyJob::from_config(&Config::default());
        assert_eq!(job.element_count, 16384);
        assert_eq!(job.shader, ShaderSource::Embedded);
        assert_eq!(job.entry_point, "f");
    }

    #[test]
    #[ignore = "requires a Vulkan device with a compute queue"]
    fn round_trip_on_gpu() {
        let device = VulkanDevice::new("vkcscratch-test", false, Some(0)).unwrap();
        let job = CopyJob {
            element_count: 1024,
            seed: Some(1),
            shader: ShaderSource::Embedded,
            entry_point: "f".to_string(),
        };

        let report = job.run(&device).unwrap();
        assert_eq!(report.element_count, 1024);
    }
}
