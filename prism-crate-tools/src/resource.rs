use std::path::{Path, PathBuf};

/// 统一路径管理
///
/// 所有路径基于工作区根目录（通过 `CARGO_MANIFEST_DIR` 推导）。
///
/// # 使用示例
/// ```ignore
/// let settings = PrismPath::config_path("render_graph.toml"); // config/render_graph.toml
/// ```
pub struct PrismPath {}
// 核心路径
impl PrismPath {
    /// 获取工作区根目录
    pub fn workspace_path() -> PathBuf {
        // prism-crate-tools 位于工作区根目录下
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")))
    }
}
// 配置
impl PrismPath {
    /// 获取 `config/` 目录下的文件路径
    pub fn config_path(filename: &str) -> PathBuf {
        Self::workspace_path().join("config").join(filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_is_under_workspace() {
        let path = PrismPath::config_path("render_graph.toml");
        assert!(path.starts_with(PrismPath::workspace_path()));
    }
}
