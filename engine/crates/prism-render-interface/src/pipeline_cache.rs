use std::collections::HashMap;

use anyhow::Context;
use prism_gfx::pipelines::shader::{
    GfxGraphicsPipelineDesc, GfxPipelineCompiler, GfxShaderCompileSettings, GfxShaderStageDesc,
};
use prism_gfx::resources::handles::{GfxPipelineId, GfxShaderId};

/// pipeline 缓存的 key
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GfxPipelineKey {
    /// 图形管线有多个 shader 文件时，以 `|` 连接
    pub shader_path: String,
    pub permutation_key: String,
    /// 每个 stage 的入口函数
    pub stages: Vec<GfxShaderStageDesc>,
    /// 计算管线为 `None`
    pub graphics: Option<GfxGraphicsPipelineDesc>,
}

struct CachedPipeline {
    pipeline: GfxPipelineId,
    shaders: Vec<GfxShaderId>,
    source_paths: Vec<String>,
}

/// pipeline 缓存服务
///
/// 与设备同生命周期：设备初始化后创建，设备销毁前调用 `destroy`。
/// pipeline 在第一次使用时编译，之后一直复用，直到对应 shader 被 `invalidate_shader`（热重载）。
///
/// # Destroy
///
/// 需要手动调用 `destroy` 方法来释放资源。
pub struct GfxPipelineCache {
    pipelines: HashMap<GfxPipelineKey, CachedPipeline>,

    #[cfg(debug_assertions)]
    destroyed: bool,
}
impl Default for GfxPipelineCache {
    fn default() -> Self {
        Self::new()
    }
}
// new & init
impl GfxPipelineCache {
    pub fn new() -> Self {
        Self {
            pipelines: HashMap::new(),
            #[cfg(debug_assertions)]
            destroyed: false,
        }
    }
}
// getters
impl GfxPipelineCache {
    #[inline]
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    pub fn get(&self, key: &GfxPipelineKey) -> Option<GfxPipelineId> {
        self.pipelines.get(key).map(|p| p.pipeline)
    }
}
// cache
impl GfxPipelineCache {
    pub fn get_or_create_compute(
        &mut self,
        compiler: &mut dyn GfxPipelineCompiler,
        path: &str,
        entry_point: &str,
        settings: &GfxShaderCompileSettings,
    ) -> anyhow::Result<GfxPipelineId> {
        let stage = GfxShaderStageDesc::compute(entry_point);
        let key = GfxPipelineKey {
            shader_path: path.to_string(),
            permutation_key: settings.permutation_key(),
            stages: vec![stage.clone()],
            graphics: None,
        };
        if let Some(cached) = self.pipelines.get(&key) {
            return Ok(cached.pipeline);
        }

        let shader = compiler
            .create_shader(path, &stage, settings)
            .with_context(|| format!("failed to compile compute shader {path}"))?;
        let pipeline = match compiler.create_compute_pipeline(path, shader) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                compiler.destroy_shader(shader);
                return Err(e.context(format!("failed to create compute pipeline {path}")));
            }
        };
        log::debug!("pipeline cache: compiled compute pipeline {path}:{entry_point} [{}]", key.permutation_key);

        self.pipelines.insert(
            key,
            CachedPipeline {
                pipeline,
                shaders: vec![shader],
                source_paths: vec![path.to_string()],
            },
        );
        Ok(pipeline)
    }

    /// # param
    /// * stages - 每个 stage 的 (shader 路径, stage 描述)
    pub fn get_or_create_graphics(
        &mut self,
        compiler: &mut dyn GfxPipelineCompiler,
        name: &str,
        stages: &[(&str, GfxShaderStageDesc)],
        settings: &GfxShaderCompileSettings,
        desc: &GfxGraphicsPipelineDesc,
    ) -> anyhow::Result<GfxPipelineId> {
        let key = GfxPipelineKey {
            shader_path: stages.iter().map(|(path, _)| *path).collect::<Vec<_>>().join("|"),
            permutation_key: format!("{name}#{}", settings.permutation_key()),
            stages: stages.iter().map(|(_, stage)| stage.clone()).collect(),
            graphics: Some(desc.clone()),
        };
        if let Some(cached) = self.pipelines.get(&key) {
            return Ok(cached.pipeline);
        }

        let mut shaders = Vec::with_capacity(stages.len());
        for (path, stage) in stages {
            match compiler.create_shader(path, stage, settings) {
                Ok(shader) => shaders.push(shader),
                Err(e) => {
                    shaders.into_iter().for_each(|shader| compiler.destroy_shader(shader));
                    return Err(e.context(format!("failed to compile {path} for pipeline {name}")));
                }
            }
        }
        let pipeline = match compiler.create_graphics_pipeline(name, &shaders, desc) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                shaders.into_iter().for_each(|shader| compiler.destroy_shader(shader));
                return Err(e.context(format!("failed to create graphics pipeline {name}")));
            }
        };
        log::debug!("pipeline cache: compiled graphics pipeline {name} ({})", key.shader_path);

        self.pipelines.insert(
            key,
            CachedPipeline {
                pipeline,
                shaders,
                source_paths: stages.iter().map(|(path, _)| path.to_string()).collect(),
            },
        );
        Ok(pipeline)
    }

    /// shader 源文件发生变化：销毁所有引用它的 pipeline，下一次请求时重新编译
    ///
    /// 返回被移除的 pipeline 数量。调用方需要保证 GPU 已不再使用这些 pipeline。
    pub fn invalidate_shader(&mut self, compiler: &mut dyn GfxPipelineCompiler, path: &str) -> usize {
        let stale_keys = self
            .pipelines
            .iter()
            .filter(|(_, cached)| cached.source_paths.iter().any(|p| p == path))
            .map(|(key, _)| key.clone())
            .collect::<Vec<_>>();

        for key in &stale_keys {
            if let Some(cached) = self.pipelines.remove(key) {
                Self::destroy_cached(compiler, cached);
            }
        }
        if !stale_keys.is_empty() {
            log::info!("pipeline cache: {} pipelines invalidated by {path}", stale_keys.len());
        }
        stale_keys.len()
    }

    pub fn destroy(mut self, compiler: &mut dyn GfxPipelineCompiler) {
        #[cfg(debug_assertions)]
        {
            self.destroyed = true;
        }

        let pipelines = std::mem::take(&mut self.pipelines);
        pipelines.into_values().for_each(|cached| Self::destroy_cached(compiler, cached));
    }

    fn destroy_cached(compiler: &mut dyn GfxPipelineCompiler, cached: CachedPipeline) {
        compiler.destroy_pipeline(cached.pipeline);
        cached.shaders.into_iter().for_each(|shader| compiler.destroy_shader(shader));
    }
}
impl Drop for GfxPipelineCache {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        debug_assert!(
            self.destroyed || self.pipelines.is_empty() || std::thread::panicking(),
            "GfxPipelineCache must be destroyed manually before drop."
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_gfx::headless::HeadlessDevice;

    #[test]
    fn test_compute_pipeline_is_compiled_once() {
        let mut device = HeadlessDevice::new();
        let mut cache = GfxPipelineCache::new();
        let settings = GfxShaderCompileSettings::default().define("TILE", "8");

        let a = cache.get_or_create_compute(&mut device, "blur.slang", "main", &settings).unwrap();
        let b = cache.get_or_create_compute(&mut device, "blur.slang", "main", &settings).unwrap();
        assert_eq!(a, b);
        assert_eq!(device.compile_count("blur.slang"), 1);

        // 不同的排列是不同的 pipeline
        let other = GfxShaderCompileSettings::default().define("TILE", "16");
        let c = cache.get_or_create_compute(&mut device, "blur.slang", "main", &other).unwrap();
        assert_ne!(a, c);
        assert_eq!(cache.len(), 2);

        cache.destroy(&mut device);
        assert_eq!(device.live_pipeline_count(), 0);
    }

    #[test]
    fn test_invalidate_shader_recompiles() {
        let mut device = HeadlessDevice::new();
        let mut cache = GfxPipelineCache::new();
        let settings = GfxShaderCompileSettings::default();

        cache.get_or_create_compute(&mut device, "taa.slang", "main", &settings).unwrap();
        cache
            .get_or_create_graphics(
                &mut device,
                "raster",
                &[
                    ("raster.slang", GfxShaderStageDesc::vertex("vsmain")),
                    ("raster.slang", GfxShaderStageDesc::fragment("psmain")),
                ],
                &settings,
                &GfxGraphicsPipelineDesc::default(),
            )
            .unwrap();

        assert_eq!(cache.invalidate_shader(&mut device, "taa.slang"), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(device.live_pipeline_count(), 1);

        cache.get_or_create_compute(&mut device, "taa.slang", "main", &settings).unwrap();
        assert_eq!(device.compile_count("taa.slang"), 2);

        cache.destroy(&mut device);
    }

    #[test]
    fn test_graphics_key_includes_state_and_entry_points() {
        let mut device = HeadlessDevice::new();
        let mut cache = GfxPipelineCache::new();
        let settings = GfxShaderCompileSettings::default();
        let stages = [
            ("mesh.slang", GfxShaderStageDesc::vertex("vsmain")),
            ("mesh.slang", GfxShaderStageDesc::fragment("psmain")),
        ];
        let opaque = GfxGraphicsPipelineDesc::default().depth_test(true, true);
        let translucent = GfxGraphicsPipelineDesc {
            blend_enable: true,
            ..GfxGraphicsPipelineDesc::default().depth_test(true, false)
        };

        let a = cache.get_or_create_graphics(&mut device, "mesh", &stages, &settings, &opaque).unwrap();
        let b = cache.get_or_create_graphics(&mut device, "mesh", &stages, &settings, &translucent).unwrap();
        assert_ne!(a, b);
        assert_eq!(cache.get_or_create_graphics(&mut device, "mesh", &stages, &settings, &opaque).unwrap(), a);

        let masked = [
            ("mesh.slang", GfxShaderStageDesc::vertex("vsmain")),
            ("mesh.slang", GfxShaderStageDesc::fragment("psmain_alpha_test")),
        ];
        let c = cache.get_or_create_graphics(&mut device, "mesh", &masked, &settings, &opaque).unwrap();
        assert_ne!(a, c);
        assert_eq!(cache.len(), 3);

        // 计算管线的入口函数同样区分
        let x = cache.get_or_create_compute(&mut device, "reduce.slang", "reduce_min", &settings).unwrap();
        let y = cache.get_or_create_compute(&mut device, "reduce.slang", "reduce_max", &settings).unwrap();
        assert_ne!(x, y);

        cache.destroy(&mut device);
        assert_eq!(device.live_pipeline_count(), 0);
    }

    #[test]
    fn test_compile_error_propagates() {
        let mut device = HeadlessDevice::new();
        let mut cache = GfxPipelineCache::new();
        let result = cache.get_or_create_compute(&mut device, "", "main", &GfxShaderCompileSettings::default());
        assert!(result.is_err());
        assert!(cache.is_empty());
    }
}
