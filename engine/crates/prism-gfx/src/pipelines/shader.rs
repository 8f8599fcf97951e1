use ash::vk;
use itertools::Itertools;

use crate::resources::handles::{GfxPipelineId, GfxShaderId};

/// shader 的某个 stage：入口函数以及对应的 stage
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GfxShaderStageDesc {
    pub stage: vk::ShaderStageFlags,
    pub entry_point: String,
}
impl GfxShaderStageDesc {
    #[inline]
    pub fn compute(entry_point: impl Into<String>) -> Self {
        Self {
            stage: vk::ShaderStageFlags::COMPUTE,
            entry_point: entry_point.into(),
        }
    }

    #[inline]
    pub fn vertex(entry_point: impl Into<String>) -> Self {
        Self {
            stage: vk::ShaderStageFlags::VERTEX,
            entry_point: entry_point.into(),
        }
    }

    #[inline]
    pub fn fragment(entry_point: impl Into<String>) -> Self {
        Self {
            stage: vk::ShaderStageFlags::FRAGMENT,
            entry_point: entry_point.into(),
        }
    }
}

/// 编译 shader 时使用的宏定义
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct GfxShaderCompileSettings {
    pub defines: Vec<(String, String)>,
}
impl GfxShaderCompileSettings {
    #[inline]
    pub fn define(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defines.push((name.into(), value.into()));
        self
    }

    /// 与宏定义顺序无关的排列 key，例如 `A=1;B=0`
    pub fn permutation_key(&self) -> String {
        self.defines.iter().sorted().map(|(name, value)| format!("{name}={value}")).join(";")
    }
}

/// 固定管线状态，使用 dynamic rendering，因此只需要附件格式
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GfxGraphicsPipelineDesc {
    pub color_attach_formats: Vec<vk::Format>,
    pub depth_attach_format: vk::Format,
    pub primitive_topology: vk::PrimitiveTopology,
    pub cull_mode: vk::CullModeFlags,
    pub depth_test: bool,
    pub depth_write: bool,
    pub blend_enable: bool,
}
impl Default for GfxGraphicsPipelineDesc {
    fn default() -> Self {
        Self {
            color_attach_formats: vec![],
            depth_attach_format: vk::Format::UNDEFINED,
            primitive_topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            cull_mode: vk::CullModeFlags::BACK,
            depth_test: false,
            depth_write: false,
            blend_enable: false,
        }
    }
}
impl GfxGraphicsPipelineDesc {
    #[inline]
    pub fn attach_info(mut self, color_formats: Vec<vk::Format>, depth_format: Option<vk::Format>) -> Self {
        self.color_attach_formats = color_formats;
        self.depth_attach_format = depth_format.unwrap_or(vk::Format::UNDEFINED);
        self
    }

    #[inline]
    pub fn depth_test(mut self, test: bool, write: bool) -> Self {
        self.depth_test = test;
        self.depth_write = write;
        self
    }
}

/// shader / pipeline 编译器
///
/// 只产出不透明 id，pipeline 的缓存由调用方（`GfxPipelineCache`）负责。
pub trait GfxPipelineCompiler {
    /// # param
    /// * path - shader 源文件路径
    fn create_shader(
        &mut self,
        path: &str,
        stage: &GfxShaderStageDesc,
        settings: &GfxShaderCompileSettings,
    ) -> anyhow::Result<GfxShaderId>;

    fn create_compute_pipeline(&mut self, name: &str, shader: GfxShaderId) -> anyhow::Result<GfxPipelineId>;

    fn create_graphics_pipeline(
        &mut self,
        name: &str,
        shaders: &[GfxShaderId],
        desc: &GfxGraphicsPipelineDesc,
    ) -> anyhow::Result<GfxPipelineId>;

    fn destroy_shader(&mut self, shader: GfxShaderId);
    fn destroy_pipeline(&mut self, pipeline: GfxPipelineId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permutation_key_ignores_define_order() {
        let a = GfxShaderCompileSettings::default().define("USE_HISTORY", "1").define("TILE", "8");
        let b = GfxShaderCompileSettings::default().define("TILE", "8").define("USE_HISTORY", "1");
        assert_eq!(a.permutation_key(), b.permutation_key());
        assert_eq!(a.permutation_key(), "TILE=8;USE_HISTORY=1");
        assert_eq!(GfxShaderCompileSettings::default().permutation_key(), "");
    }
}
