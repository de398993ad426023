//! GLSL compute shaders to SPIR-V, for callers that do not ship precompiled
//! modules. Needs the `shaderc` feature.

use tracing::debug;

use crate::error::{Error, Result};

/// Compiles a GLSL compute shader with entry point `main`, targeting Vulkan 1.2.
pub fn compile_source(source: &str) -> Result<Vec<u32>> {
    compile_named(source, "source.comp")
}

pub fn compile_named(source: &str, file_name: &str) -> Result<Vec<u32>> {
    let compiler =
        shaderc::Compiler::new().ok_or_else(|| Error::ShaderCompilation("failed to create shaderc compiler".into()))?;
    let mut options = shaderc::CompileOptions::new()
        .ok_or_else(|| Error::ShaderCompilation("failed to create shaderc options".into()))?;
    options.set_optimization_level(shaderc::OptimizationLevel::Performance);
    options.set_target_env(shaderc::TargetEnv::Vulkan, shaderc::EnvVersion::Vulkan1_2 as u32);

    let artifact = compiler
        .compile_into_spirv(source, shaderc::ShaderKind::Compute, file_name, "main", Some(&options))
        .map_err(|e| Error::ShaderCompilation(e.to_string()))?;
    if artifact.get_num_warnings() > 0 {
        debug!(file_name, warnings = %artifact.get_warning_messages(), "shader compiled with warnings");
    }
    Ok(artifact.as_binary().to_vec())
}
