// Shader module loading
//
// Vulkan consumes SPIR-V words. The copy shader is assembled into the binary
// below; a file on disk can be used instead (see `shader.path` in config).

use anyhow::{Context, Result};
use ash::vk;
use std::path::{Path, PathBuf};
use super::VulkanDevice;

/// SPIR-V magic number (first word of every module)
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Copy shader, SPIR-V 1.0, equivalent to `shaders/copy.comp`:
///
/// ```glsl
/// layout(local_size_x = 1) in;
/// layout(binding = 0) buffer { int data[]; } input;
/// layout(binding = 1) buffer { int data[]; } output;
/// void f() { output.data[gl_GlobalInvocationID.x] = input.data[gl_GlobalInvocationID.x]; }
/// ```
///
/// Result ids: 1 f, 2 gid, 3 int[], 4 block, 5 input, 6 output, 7 void,
/// 8 fn type, 9 uint, 10 int, 11 uvec3, 12 *Input uvec3, 13 *Uniform block,
/// 14 int 0, 15 *Uniform int, 16 *Input uint, 17 uint 0, 18..23 body.
#[rustfmt::skip]
pub const COPY_SHADER_SPIRV: [u32; 149] = [
    // Header: magic, version 1.0, generator, bound, schema
    SPIRV_MAGIC, 0x0001_0000, 0, 24, 0,
    // OpCapability Shader
    0x0002_0011, 1,
    // OpMemoryModel Logical GLSL450
    0x0003_000E, 0, 1,
    // OpEntryPoint GLCompute %1 "f" %2
    0x0005_000F, 5, 1, 0x0000_0066, 2,
    // OpExecutionMode %1 LocalSize 1 1 1
    0x0006_0010, 1, 17, 1, 1, 1,
    // OpDecorate %2 BuiltIn GlobalInvocationId
    0x0004_0047, 2, 11, 28,
    // OpDecorate %3 ArrayStride 4
    0x0004_0047, 3, 6, 4,
    // OpMemberDecorate %4 0 Offset 0
    0x0005_0048, 4, 0, 35, 0,
    // OpDecorate %4 BufferBlock
    0x0003_0047, 4, 3,
    // OpDecorate %5 DescriptorSet 0 / Binding 0
    0x0004_0047, 5, 34, 0,
    0x0004_0047, 5, 33, 0,
    // OpDecorate %6 DescriptorSet 0 / Binding 1
    0x0004_0047, 6, 34, 0,
    0x0004_0047, 6, 33, 1,
    // %7 = OpTypeVoid
    0x0002_0013, 7,
    // %8 = OpTypeFunction %7
    0x0003_0021, 8, 7,
    // %9 = OpTypeInt 32 0
    0x0004_0015, 9, 32, 0,
    // %10 = OpTypeInt 32 1
    0x0004_0015, 10, 32, 1,
    // %11 = OpTypeVector %9 3
    0x0004_0017, 11, 9, 3,
    // %12 = OpTypePointer Input %11
    0x0004_0020, 12, 1, 11,
    // %2 = OpVariable %12 Input
    0x0004_003B, 12, 2, 1,
    // %3 = OpTypeRuntimeArray %10
    0x0003_001D, 3, 10,
    // %4 = OpTypeStruct %3
    0x0003_001E, 4, 3,
    // %13 = OpTypePointer Uniform %4
    0x0004_0020, 13, 2, 4,
    // %5 = OpVariable %13 Uniform
    0x0004_003B, 13, 5, 2,
    // %6 = OpVariable %13 Uniform
    0x0004_003B, 13, 6, 2,
    // %14 = OpConstant %10 0
    0x0004_002B, 10, 14, 0,
    // %15 = OpTypePointer Uniform %10
    0x0004_0020, 15, 2, 10,
    // %16 = OpTypePointer Input %9
    0x0004_0020, 16, 1, 9,
    // %17 = OpConstant %9 0
    0x0004_002B, 9, 17, 0,
    // %1 = OpFunction %7 None %8
    0x0005_0036, 7, 1, 0, 8,
    // %18 = OpLabel
    0x0002_00F8, 18,
    // %19 = OpAccessChain %16 %2 %17
    0x0005_0041, 16, 19, 2, 17,
    // %20 = OpLoad %9 %19
    0x0004_003D, 9, 20, 19,
    // %21 = OpAccessChain %15 %5 %14 %20
    0x0006_0041, 15, 21, 5, 14, 20,
    // %22 = OpLoad %10 %21
    0x0004_003D, 10, 22, 21,
    // %23 = OpAccessChain %15 %6 %14 %20
    0x0006_0041, 15, 23, 6, 14, 20,
    // OpStore %23 %22
    0x0003_003E, 23, 22,
    // OpReturn
    0x0001_00FD,
    // OpFunctionEnd
    0x0001_0038,
];

/// Where the shader words come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderSource {
    Embedded,
    File(PathBuf),
}

impl ShaderSource {
    pub fn from_config(path: Option<&Path>) -> Self {
        match path {
            Some(path) => ShaderSource::File(path.to_path_buf()),
            None => ShaderSource::Embedded,
        }
    }

    /// Resolve to SPIR-V words
    pub fn load_words(&self) -> Result<Vec<u32>> {
        let words = match self {
            ShaderSource::Embedded => COPY_SHADER_SPIRV.to_vec(),
            ShaderSource::File(path) => {
                let bytes = std::fs::read(path)
                    .with_context(|| format!("Could not read the shader from {:?}", path))?;
                parse_spirv(&bytes)
                    .with_context(|| format!("Invalid shader file {:?}", path))?
            }
        };

        log::info!("shader {{ size: {}, last opcode: {} }}",
            words.len() * 4,
            words.last().map_or(0, |word| word & 0xFFFF));

        Ok(words)
    }
}

/// Convert raw SPIR-V bytes into aligned words
pub fn parse_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        anyhow::bail!("Shader size must be a multiple of 4 (in bytes), got {}", bytes.len());
    }

    // read_spv also checks the magic number and fixes endianness
    let words = ash::util::read_spv(&mut std::io::Cursor::new(bytes))
        .context("Failed to parse SPIR-V")?;

    Ok(words)
}

/// Create a shader module from SPIR-V words
pub fn create_shader_module(device: &VulkanDevice, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder()
        .code(code);

    unsafe {
        device.device.create_shader_module(&create_info, None)
            .context("Failed to create shader module")
    }
}
