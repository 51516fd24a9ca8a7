// Backend module - Vulkan objects for the compute round-trip
//
// Design: Thin wrappers around ash, each owning its handles and releasing
// them on drop. Everything holds an Arc to the device so it outlives them.

pub mod buffer;
pub mod command;
pub mod device;
pub mod pipeline;
pub mod shader;

pub use buffer::StorageBuffers;
pub use command::CommandContext;
pub use device::VulkanDevice;
pub use pipeline::ComputePipeline;
