use std::path::Path;

use prism_crate_tools::resource::PrismPath;
use serde::{Deserialize, Serialize};

/// 渲染图配置，从 TOML 加载，缺失字段使用默认值
///
/// ```toml
/// memory_constrained = true
/// heap_alignment = 65536
/// log_execution_plan = false
/// validate_accesses = true
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderGraphSettings {
    /// 显存紧张时开启 transient 资源 aliasing，生命周期不重叠的资源共享同一段内存
    pub memory_constrained: bool,
    /// transient heap 中资源偏移的最小对齐
    pub heap_alignment: u64,
    /// execute 时打印执行计划
    pub log_execution_plan: bool,
    /// 在 pass 回调中校验物理资源查询是否已声明
    pub validate_accesses: bool,
}

impl Default for RenderGraphSettings {
    fn default() -> Self {
        Self {
            memory_constrained: true,
            heap_alignment: 256,
            log_execution_plan: false,
            validate_accesses: cfg!(debug_assertions),
        }
    }
}

impl RenderGraphSettings {
    /// 配置文件名，位于工作区的 `config/` 目录
    pub const CONFIG_FILE: &'static str = "render_graph.toml";

    /// 从工作区 `config/render_graph.toml` 加载
    pub fn load_default() -> anyhow::Result<Self> {
        Self::load(PrismPath::config_path(Self::CONFIG_FILE))
    }

    /// 从配置文件加载，文件不存在时使用默认配置
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let settings: Self = prism_crate_tools::settings::load_toml_or_default(path)?;
        anyhow::ensure!(
            settings.heap_alignment.is_power_of_two(),
            "heap_alignment must be a power of two, got {}",
            settings.heap_alignment
        );
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_crate_tools::settings::parse_toml;

    #[test]
    fn test_partial_toml() {
        let settings: RenderGraphSettings = parse_toml("memory_constrained = false").unwrap();
        assert!(!settings.memory_constrained);
        assert_eq!(settings.heap_alignment, 256);
    }

    #[test]
    fn test_reject_bad_alignment() {
        let dir = std::env::temp_dir().join(format!("prism-rg-settings-{}", std::process::id()));
        let path = dir.join("render_graph.toml");
        prism_crate_tools::settings::save_toml(
            &RenderGraphSettings {
                heap_alignment: 100,
                ..Default::default()
            },
            &path,
        )
        .unwrap();

        assert!(RenderGraphSettings::load(&path).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_file_uses_default() {
        let settings = RenderGraphSettings::load("/no/such/render_graph.toml").unwrap();
        assert_eq!(settings, RenderGraphSettings::default());
    }

    #[test]
    fn test_load_default_location() {
        // 工作区没有提交 config 目录，使用默认配置
        if !PrismPath::config_path(RenderGraphSettings::CONFIG_FILE).exists() {
            assert_eq!(RenderGraphSettings::load_default().unwrap(), RenderGraphSettings::default());
        }
    }
}
