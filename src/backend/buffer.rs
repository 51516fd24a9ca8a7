// Storage buffer utilities for the input/output pair
//
// Both buffers live in a single host-visible allocation: input first, output
// right after it at the next offset that satisfies its alignment.

use anyhow::{Context, Result};
use ash::vk;
use rand::Rng;
use std::sync::Arc;
use super::VulkanDevice;

/// Where each buffer sits inside the shared allocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryLayout {
    pub input_offset: vk::DeviceSize,
    pub output_offset: vk::DeviceSize,
    pub total_size: vk::DeviceSize,
}

/// Place the output buffer after the input buffer, honoring both alignments.
///
/// Offsets are also kept on 4-byte boundaries so the mapped regions can be
/// read as `i32` slices.
pub fn plan_layout(
    input: &vk::MemoryRequirements,
    output: &vk::MemoryRequirements,
) -> MemoryLayout {
    let element_align = std::mem::align_of::<i32>() as vk::DeviceSize;
    let output_offset = align_up(input.size, output.alignment.max(element_align));

    MemoryLayout {
        input_offset: 0,
        output_offset,
        total_size: output_offset + output.size,
    }
}

fn align_up(value: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    if alignment <= 1 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

/// Find a host-visible, host-coherent memory type whose heap can hold `size`.
///
/// `type_bits` restricts the candidates (from `VkMemoryRequirements`).
pub fn choose_memory_type_index(
    mem_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    size: vk::DeviceSize,
) -> Option<u32> {
    let wanted = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

    (0..mem_properties.memory_type_count).find(|&i| {
        let memory_type = &mem_properties.memory_types[i as usize];
        let heap = &mem_properties.memory_heaps[memory_type.heap_index as usize];

        (type_bits & (1 << i)) != 0
            && memory_type.property_flags.contains(wanted)
            && size < heap.size
    })
}

/// Input and output storage buffers bound to one allocation
pub struct StorageBuffers {
    device: Arc<VulkanDevice>,
    pub input: vk::Buffer,
    pub output: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub layout: MemoryLayout,
    /// Size in bytes of each buffer
    pub buffer_size: vk::DeviceSize,
}

impl StorageBuffers {
    pub fn new(device: &Arc<VulkanDevice>, buffer_size: vk::DeviceSize) -> Result<Self> {
        let queue_family_indices = [device.compute_queue_family];
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(buffer_size)
            .usage(vk::BufferUsageFlags::STORAGE_BUFFER)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .queue_family_indices(&queue_family_indices);

        let vk_device = &device.device;

        // Handles start null and are filled in as they are created, so an
        // early return drops the partial value and releases what exists.
        let mut buffers = Self {
            device: device.clone(),
            input: vk::Buffer::null(),
            output: vk::Buffer::null(),
            memory: vk::DeviceMemory::null(),
            layout: MemoryLayout::default(),
            buffer_size,
        };

        buffers.input = unsafe { vk_device.create_buffer(&buffer_info, None) }
            .context("Failed to create input buffer")?;
        buffers.output = unsafe { vk_device.create_buffer(&buffer_info, None) }
            .context("Failed to create output buffer")?;

        let input_requirements = unsafe { vk_device.get_buffer_memory_requirements(buffers.input) };
        let output_requirements = unsafe { vk_device.get_buffer_memory_requirements(buffers.output) };

        log::info!("input {{ size: {}, alignment: {} }}",
            input_requirements.size, input_requirements.alignment);
        log::info!("output {{ size: {}, alignment: {} }}",
            output_requirements.size, output_requirements.alignment);

        let layout = plan_layout(&input_requirements, &output_requirements);
        let type_bits = input_requirements.memory_type_bits & output_requirements.memory_type_bits;

        let memory_type_index = choose_memory_type_index(
            &device.memory_properties,
            type_bits,
            layout.total_size,
        )
        .context("Could not find a sufficient memory type")?;

        log::debug!("Memory layout: {:?}, type index {}", layout, memory_type_index);

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(layout.total_size)
            .memory_type_index(memory_type_index);

        buffers.memory = unsafe { vk_device.allocate_memory(&alloc_info, None) }
            .context("Failed to allocate buffer memory")?;
        buffers.layout = layout;

        unsafe {
            vk_device.bind_buffer_memory(buffers.input, buffers.memory, layout.input_offset)
                .context("Failed to bind input buffer memory")?;
            vk_device.bind_buffer_memory(buffers.output, buffers.memory, layout.output_offset)
                .context("Failed to bind output buffer memory")?;
        }

        Ok(buffers)
    }

    /// Number of i32 elements per buffer
    pub fn element_count(&self) -> usize {
        self.buffer_size as usize / std::mem::size_of::<i32>()
    }

    /// Overwrite the whole allocation (both regions) with random values
    pub fn fill_random<R: Rng>(&self, rng: &mut R) -> Result<()> {
        let word_count = self.layout.total_size as usize / std::mem::size_of::<i32>();

        unsafe {
            let ptr = self.map()? as *mut i32;
            let words = std::slice::from_raw_parts_mut(ptr, word_count);
            rng.fill(words);
            self.device.device.unmap_memory(self.memory);
        }

        Ok(())
    }

    /// Copy the input and output regions back to the host
    pub fn read_back(&self) -> Result<(Vec<i32>, Vec<i32>)> {
        let count = self.element_count();

        unsafe {
            let base = self.map()? as *const u8;
            let input = std::slice::from_raw_parts(
                base.add(self.layout.input_offset as usize) as *const i32,
                count,
            )
            .to_vec();
            let output = std::slice::from_raw_parts(
                base.add(self.layout.output_offset as usize) as *const i32,
                count,
            )
            .to_vec();
            self.device.device.unmap_memory(self.memory);

            Ok((input, output))
        }
    }

    unsafe fn map(&self) -> Result<*mut std::ffi::c_void> {
        self.device.device.map_memory(
            self.memory,
            0,
            self.layout.total_size,
            vk::MemoryMapFlags::empty(),
        )
        .context("Failed to map buffer memory")
    }
}

impl Drop for StorageBuffers {
    fn drop(&mut self) {
        // Null handles (from a failed `new`) are ignored by Vulkan
        unsafe {
            self.device.device.destroy_buffer(self.output, None);
            self.device.device.destroy_buffer(self.input, None);
            self.device.device.free_memory(self.memory, None);
        }
    }
}
