// Build script to compile the GLSL compute shader to SPIR-V
//
// The binary embeds its own copy of the shader, so a missing glslc is not
// fatal. The compiled .spv can be selected at runtime via `shader.path`
// (glslc names the entry point "main", so set `shader.entry_point` too).

use std::process::Command;
use std::path::Path;

fn main() {
    println!("cargo:rerun-if-changed=shaders/copy.comp");

    compile_shader("shaders/copy.comp", "shaders/copy.comp.spv");
}

fn compile_shader(input: &str, output: &str) {
    let input_path = Path::new(input);
    let output_path = Path::new(output);

    if !input_path.exists() {
        println!("cargo:warning=Shader source {} not found, skipping", input);
        return;
    }

    let result = Command::new("glslc")
        .arg("-fshader-stage=compute")
        .arg(input_path)
        .arg("-o")
        .arg(output_path)
        .status();

    match result {
        Ok(status) if status.success() => {
            println!("Compiled {} -> {}", input, output);
        }
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input, status.code());
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({}), {} was not compiled", e, input);
            println!("cargo:warning=Install the Vulkan SDK or compile manually: glslc {} -o {}", input, output);
        }
    }
}
