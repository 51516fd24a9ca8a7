// Command pool, recording and submission
//
// One primary command buffer, recorded once, submitted once. The host blocks
// on queue idle; there are no fences or semaphores.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use super::{ComputePipeline, VulkanDevice};

pub struct CommandContext {
    device: Arc<VulkanDevice>,
    pub command_pool: vk::CommandPool,
    pub command_buffer: vk::CommandBuffer,
}

impl CommandContext {
    pub fn new(device: &Arc<VulkanDevice>) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.compute_queue_family);

        // The pool is owned (and destroyed on drop) before allocation is tried
        let mut context = Self {
            device: device.clone(),
            command_pool: vk::CommandPool::null(),
            command_buffer: vk::CommandBuffer::null(),
        };
        context.command_pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(context.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let command_buffers = unsafe { device.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffer")?;

        context.command_buffer = command_buffers[0];

        Ok(context)
    }

    /// Record bind + dispatch of `group_count_x` workgroups
    pub fn record_dispatch(&self, pipeline: &ComputePipeline, group_count_x: u32) -> Result<()> {
        let max_groups = self.device.properties.limits.max_compute_work_group_count[0];
        if group_count_x > max_groups {
            anyhow::bail!(
                "Dispatch of {} workgroups exceeds device limit of {}",
                group_count_x,
                max_groups
            );
        }

        let device = &self.device.device;
        let cmd = self.command_buffer;

        unsafe {
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(cmd, &begin_info)
                .context("Failed to begin command buffer")?;

            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, pipeline.pipeline);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                pipeline.pipeline_layout,
                0,
                &[pipeline.descriptor_set],
                &[],
            );
            device.cmd_dispatch(cmd, group_count_x, 1, 1);

            device.end_command_buffer(cmd)
                .context("Failed to end command buffer")?;
        }

        log::debug!("Recorded dispatch of {} workgroups", group_count_x);
        Ok(())
    }

    /// Submit the recorded buffer and block until the queue drains
    pub fn submit_and_wait(&self) -> Result<()> {
        let command_buffers = [self.command_buffer];
        let submit_info = vk::SubmitInfo::builder()
            .command_buffers(&command_buffers)
            .build();

        unsafe {
            self.device.device.queue_submit(
                self.device.compute_queue,
                &[submit_info],
                vk::Fence::null(),
            )
            .context("Failed to submit command buffer")?;

            self.device.device.queue_wait_idle(self.device.compute_queue)
                .context("Failed waiting for compute queue")?;
        }

        Ok(())
    }
}

impl Drop for CommandContext {
    fn drop(&mut self) {
        unsafe {
            // Also frees the command buffer
            self.device.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore = "requires a Vulkan device with a compute queue"]
    fn oversized_dispatch_is_rejected() {
        let device = VulkanDevice::new("vkcscratch-test", true, Some(0)).unwrap();
        let context = CommandContext::new(&device).unwrap();
        let module = crate::backend::shader::create_shader_module(
            &device,
            &crate::backend::shader::COPY_SHADER_SPIRV,
        )
        .unwrap();
        let pipeline = ComputePipeline::new(&device, module, "f").unwrap();
        unsafe { device.device.destroy_shader_module(module, None) };

        let limit = device.properties.limits.max_compute_work_group_count[0];
        if limit < u32::MAX {
            assert!(context.record_dispatch(&pipeline, limit + 1).is_err());
        }

        drop(pipeline);
        drop(context);
        assert_eq!(Arc::strong_count(&device), 1);
    }
}
