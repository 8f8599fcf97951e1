use anyhow::Context;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

/// 从 TOML 文件加载配置
///
/// 缺失的字段由配置类型自身的 `#[serde(default)]` 决定。
pub fn load_toml<T: DeserializeOwned>(path: impl AsRef<Path>) -> anyhow::Result<T> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).with_context(|| format!("读取配置文件失败: {:?}", path))?;
    parse_toml(&content).with_context(|| format!("解析 TOML 配置失败: {:?}", path))
}

/// 从字符串解析配置
pub fn parse_toml<T: DeserializeOwned>(content: &str) -> anyhow::Result<T> {
    Ok(toml::from_str(content)?)
}

/// 如果文件存在则加载，否则返回默认配置
pub fn load_toml_or_default<T: DeserializeOwned + Default>(path: impl AsRef<Path>) -> anyhow::Result<T> {
    let path = path.as_ref();
    if path.exists() {
        load_toml(path)
    } else {
        log::info!("config file {:?} not found, using defaults", path);
        Ok(T::default())
    }
}

/// 保存配置到 TOML 文件
pub fn save_toml<T: Serialize>(value: &T, path: impl AsRef<Path>) -> anyhow::Result<()> {
    let path = path.as_ref();
    let content = toml::to_string_pretty(value).context("序列化配置失败")?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("创建配置目录失败: {:?}", parent))?;
    }
    fs::write(path, content).with_context(|| format!("写入配置文件失败: {:?}", path))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct DemoSettings {
        enabled: bool,
        budget: u64,
    }

    #[test]
    fn test_parse_partial_uses_defaults() {
        let settings: DemoSettings = parse_toml("enabled = true").unwrap();
        assert_eq!(settings, DemoSettings { enabled: true, budget: 0 });
    }

    #[test]
    fn test_save_then_load() {
        let dir = std::env::temp_dir().join(format!("prism-settings-{}", std::process::id()));
        let path = dir.join("demo.toml");
        let settings = DemoSettings { enabled: true, budget: 4096 };

        save_toml(&settings, &path).unwrap();
        let loaded: DemoSettings = load_toml(&path).unwrap();
        assert_eq!(loaded, settings);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_file_falls_back_to_default() {
        let loaded: DemoSettings = load_toml_or_default("/definitely/not/here.toml").unwrap();
        assert_eq!(loaded, DemoSettings::default());
    }

    #[test]
    fn test_missing_file_is_error() {
        let result: anyhow::Result<DemoSettings> = load_toml("/definitely/not/here.toml");
        assert!(result.is_err());
    }
}
