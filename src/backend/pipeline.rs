// Compute pipeline creation and descriptor binding
//
// One descriptor set with two storage buffers: binding 0 is read by the
// shader, binding 1 is written. No push constants.

use anyhow::{Context, Result};
use ash::vk;
use std::ffi::CString;
use std::sync::Arc;
use super::VulkanDevice;

/// Number of storage buffer bindings the copy shader expects
pub const STORAGE_BINDING_COUNT: u32 = 2;

/// Layout bindings for (input, output) storage buffers
pub fn storage_buffer_bindings() -> [vk::DescriptorSetLayoutBinding; STORAGE_BINDING_COUNT as usize] {
    let binding = |index: u32| {
        vk::DescriptorSetLayoutBinding::builder()
            .binding(index)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .build()
    };

    [binding(0), binding(1)]
}

/// Compute pipeline plus the layouts and descriptor set feeding it
pub struct ComputePipeline {
    device: Arc<VulkanDevice>,
    pub descriptor_set_layout: vk::DescriptorSetLayout,
    pub pipeline_layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
    pub descriptor_pool: vk::DescriptorPool,
    pub descriptor_set: vk::DescriptorSet,
}

impl ComputePipeline {
    /// Build the pipeline for `shader_module` and allocate its descriptor set.
    ///
    /// The shader module is only needed during creation and may be destroyed
    /// by the caller afterwards.
    pub fn new(
        device: &Arc<VulkanDevice>,
        shader_module: vk::ShaderModule,
        entry_point: &str,
    ) -> Result<Self> {
        let vk_device = &device.device;

        // Handles start null; a failed step drops the partial value, which
        // releases everything created before it.
        let mut pipeline = Self {
            device: device.clone(),
            descriptor_set_layout: vk::DescriptorSetLayout::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            descriptor_set: vk::DescriptorSet::null(),
        };

        // Descriptor set layout
        let bindings = storage_buffer_bindings();
        let set_layout_info = vk::DescriptorSetLayoutCreateInfo::builder()
            .bindings(&bindings);

        pipeline.descriptor_set_layout = unsafe {
            vk_device.create_descriptor_set_layout(&set_layout_info, None)
                .context("Failed to create descriptor set layout")?
        };

        // Pipeline layout
        let set_layouts = [pipeline.descriptor_set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts);

        pipeline.pipeline_layout = unsafe {
            vk_device.create_pipeline_layout(&layout_info, None)
                .context("Failed to create pipeline layout")?
        };

        // Compute pipeline
        let entry_point = CString::new(entry_point)
            .context("Shader entry point contains a NUL byte")?;

        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader_module)
            .name(&entry_point)
            .build();

        let pipeline_info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage)
            .layout(pipeline.pipeline_layout)
            .build();

        let pipelines = unsafe {
            vk_device.create_compute_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info],
                None,
            ).map_err(|(_, e)| e)
                .context("Failed to create compute pipeline")?
        };
        pipeline.pipeline = pipelines[0];

        // Descriptor pool with room for exactly one set
        let pool_sizes = [vk::DescriptorPoolSize::builder()
            .ty(vk::DescriptorType::STORAGE_BUFFER)
            .descriptor_count(STORAGE_BINDING_COUNT)
            .build()];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(1)
            .pool_sizes(&pool_sizes);

        pipeline.descriptor_pool = unsafe {
            vk_device.create_descriptor_pool(&pool_info, None)
                .context("Failed to create descriptor pool")?
        };

        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pipeline.descriptor_pool)
            .set_layouts(&set_layouts);

        let descriptor_sets = unsafe {
            vk_device.allocate_descriptor_sets(&alloc_info)
                .context("Failed to allocate descriptor set")?
        };

        pipeline.descriptor_set = descriptor_sets[0];

        Ok(pipeline)
    }

    /// Point binding 0 at `input` and binding 1 at `output` (whole buffers)
    pub fn bind_buffers(&self, input: vk::Buffer, output: vk::Buffer) {
        let input_info = [vk::DescriptorBufferInfo {
            buffer: input,
            offset: 0,
            range: vk::WHOLE_SIZE,
        }];
        let output_info = [vk::DescriptorBufferInfo {
            buffer: output,
            offset: 0,
            range: vk::WHOLE_SIZE,
        }];

        let writes = [
            vk::WriteDescriptorSet::builder()
                .dst_set(self.descriptor_set)
                .dst_binding(0)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .buffer_info(&input_info)
                .build(),
            vk::WriteDescriptorSet::builder()
                .dst_set(self.descriptor_set)
                .dst_binding(1)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .buffer_info(&output_info)
                .build(),
        ];

        unsafe {
            self.device.device.update_descriptor_sets(&writes, &[]);
        }
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        unsafe {
            // Destroying the pool frees the set; null handles are ignored
            self.device.device.destroy_descriptor_pool(self.descriptor_pool, None);
            self.device.device.destroy_pipeline(self.pipeline, None);
            self.device.device.destroy_pipeline_layout(self.pipeline_layout, None);
            self.device.device.destroy_descriptor_set_layout(self.descriptor_set_layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bindings_are_two_compute_storage_buffers() {
        let bindings = storage_buffer_bindings();
        assert_eq!(bindings.len(), 2);

        for (index, binding) in bindings.iter().enumerate() {
            assert_eq!(binding.binding, index as u32);
            assert_eq!(binding.descriptor_type, vk::DescriptorType::STORAGE_BUFFER);
            assert_eq!(binding.descriptor_count, 1);
            assert_eq!(binding.stage_flags, vk::ShaderStageFlags::COMPUTE);
            assert!(binding.p_immutable_samplers.is_null());
        }
    }

    #[test]
    #[ignore = "requires a Vulkan device with a compute queue"]
    fn failed_creation_releases_layouts() {
        let device = VulkanDevice::new("vkcscratch-test", true, Some(0)).unwrap();
        // The NUL in the entry point fails after both layouts exist
        let result = ComputePipeline::new(&device, vk::ShaderModule::null(), "f\0g");
        assert!(result.is_err());
        assert_eq!(Arc::strong_count(&device), 1);
    }
}
