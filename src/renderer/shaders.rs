use std::collections::HashMap;

use crate::error::{GraphicsErrorCode, RenderError, RenderResult, ResultExt};
use crate::renderer::context::RenderContext;

const COMMON: &str = include_str!("../shader/common.wgsl");
const LIGHTING_COMMON: &str = include_str!("../shader/lighting_common.wgsl");

/// Program name and the WGSL pieces concatenated to build it. Every program
/// that needs a cluster index gets it from the one copy in `common.wgsl`.
pub const PROGRAMS: &[(&str, &[&str])] = &[
    ("cluster", &[COMMON, include_str!("../shader/cluster.wgsl")]),
    ("shadow", &[COMMON, include_str!("../shader/shadow.wgsl")]),
    ("gbuffer", &[COMMON, include_str!("../shader/gbuffer.wgsl")]),
    ("ssao", &[COMMON, include_str!("../shader/ssao.wgsl")]),
    ("ssao_blur", &[include_str!("../shader/ssao_blur.wgsl")]),
    (
        "lighting",
        &[COMMON, LIGHTING_COMMON, include_str!("../shader/lighting.wgsl")],
    ),
    (
        "forward",
        &[COMMON, LIGHTING_COMMON, include_str!("../shader/forward.wgsl")],
    ),
    ("post", &[include_str!("../shader/post.wgsl")]),
];

pub fn compose(parts: &[&str]) -> String {
    parts.join("\n")
}

pub fn program_source(name: &str) -> Option<String> {
    PROGRAMS
        .iter()
        .find(|(program, _)| *program == name)
        .map(|(_, parts)| compose(parts))
}

/// Named, compiled GPU programs. Compilation happens once at startup; a
/// failing module aborts initialisation with the compiler message.
pub struct ShaderSet {
    modules: HashMap<&'static str, wgpu::ShaderModule>,
}

impl ShaderSet {
    pub fn new(context: &RenderContext) -> RenderResult<Self> {
        let mut modules = HashMap::with_capacity(PROGRAMS.len());
        for &(name, parts) in PROGRAMS {
            let source = compose(parts);
            let module = context
                .scoped(GraphicsErrorCode::ShaderCompilation, name, |device| {
                    device.create_shader_module(wgpu::ShaderModuleDescriptor {
                        label: Some(name),
                        source: wgpu::ShaderSource::Wgsl(source.into()),
                    })
                })
                .with_context(|| RenderError::general(format!("compiling shader `{name}`")))?;
            modules.insert(name, module);
        }
        log::info!("Compiled {} shader programs", modules.len());
        Ok(Self { modules })
    }

    pub fn get(&self, name: &str) -> Result<&wgpu::ShaderModule, RenderError> {
        self.modules
            .get(name)
            .ok_or_else(|| RenderError::logic(format!("unknown shader program `{name}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn occurrences(haystack: &str, needle: &str) -> usize {
        haystack.matches(needle).count()
    }

    #[test]
    fn cluster_index_is_defined_once_per_program() {
        for name in ["cluster", "lighting", "forward"] {
            let source = program_source(name).unwrap();
            assert_eq!(occurrences(&source, "fn cluster_index("), 1, "{name}");
        }
    }

    #[test]
    fn cull_and_resolve_share_the_same_derivation() {
        let cull = program_source("cluster").unwrap();
        let resolve = program_source("lighting").unwrap();
        assert!(cull.starts_with(COMMON));
        assert!(resolve.starts_with(COMMON));
        assert!(cull.contains("cluster_slice("));
        assert!(resolve.contains("cluster_index("));
    }

    #[test]
    fn post_and_blur_skip_the_prelude() {
        for name in ["post", "ssao_blur"] {
            let source = program_source(name).unwrap();
            assert_eq!(occurrences(&source, "var<uniform> globals"), 0, "{name}");
        }
        assert!(program_source("missing").is_none());
    }
}
