use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_ENV: &str = "FIELDCONV_CONFIG";

/// 应用配置的根结构。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub conversion: ConversionConfig,
}

impl AppConfig {
    /// 从显式路径加载配置，并校验取值范围。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// 自动发现配置文件：优先读取环境变量 `FIELDCONV_CONFIG`，否则寻找 `./config/default.toml`。
    /// 若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os(CONFIG_ENV) {
            return Self::from_file(PathBuf::from(path));
        }

        let default_path = env::current_dir()
            .map(|dir| dir.join("config").join("default.toml"))
            .map_err(|source| ConfigError::Context {
                message: "获取当前工作目录失败".to_string(),
                source,
            })?;

        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let max = self.conversion.max_curve_offset_m;
        if !max.is_finite() || max <= 0.0 {
            return Err(ConfigError::Invalid {
                message: format!("conversion.max_curve_offset_m 必须为正数，当前为 {max}"),
            });
        }
        Ok(())
    }
}

/// 日志配置，支持设置默认等级。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// 转换参数。
#[derive(Debug, Clone, Deserialize)]
pub struct ConversionConfig {
    /// 曲线偏移 `dx` 的幅度窗口（米，开区间）。
    #[serde(default = "ConversionConfig::default_max_curve_offset")]
    pub max_curve_offset_m: f64,
    #[serde(default)]
    pub line_prefix: String,
    #[serde(default)]
    pub curve_prefix: String,
    #[serde(default)]
    pub boundary_prefix: String,
    /// 暂存区为空时是否仍清空圃场目录。
    #[serde(default)]
    pub replace_empty_fields: bool,
    #[serde(default = "ConversionConfig::default_display_hints")]
    pub display_hints: bool,
}

impl ConversionConfig {
    fn default_max_curve_offset() -> f64 {
        20_000.0
    }

    fn default_display_hints() -> bool {
        true
    }
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            max_curve_offset_m: Self::default_max_curve_offset(),
            line_prefix: String::new(),
            curve_prefix: String::new(),
            boundary_prefix: String::new(),
            replace_empty_fields: false,
            display_hints: Self::default_display_hints(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path:?} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
    #[error("配置无效: {message}")]
    Invalid { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_returned_when_file_missing() {
        let cfg = AppConfig::discover().expect("discover should succeed");
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.conversion.max_curve_offset_m, 20_000.0);
        assert!(cfg.conversion.line_prefix.is_empty());
        assert!(!cfg.conversion.replace_empty_fields);
        assert!(cfg.conversion.display_hints);
    }

    #[test]
    fn load_from_temp_file() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(
            file,
            r#"
            [logging]
            level = "debug"

            [conversion]
            max_curve_offset_m = 50000.0
            line_prefix = "AB_"
            curve_prefix = "Curve_"
            replace_empty_fields = true
            display_hints = false
            "#
        )
        .unwrap();

        let cfg = AppConfig::from_file(file.path()).expect("load config");
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.conversion.max_curve_offset_m, 50_000.0);
        assert_eq!(cfg.conversion.line_prefix, "AB_");
        assert_eq!(cfg.conversion.curve_prefix, "Curve_");
        assert!(cfg.conversion.boundary_prefix.is_empty());
        assert!(cfg.conversion.replace_empty_fields);
        assert!(!cfg.conversion.display_hints);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(file, "[conversion]\nline_prefix = \"Line_\"").unwrap();
        let cfg = AppConfig::from_file(file.path()).expect("load config");
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.conversion.line_prefix, "Line_");
        assert_eq!(cfg.conversion.max_curve_offset_m, 20_000.0);
    }

    #[test]
    fn non_positive_window_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(file, "[conversion]\nmax_curve_offset_m = -1.0").unwrap();
        let err = AppConfig::from_file(file.path()).expect_err("should reject");
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn malformed_toml_reports_path() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(file, "[conversion\n").unwrap();
        match AppConfig::from_file(file.path()) {
            Err(ConfigError::Parse { path, .. }) => assert_eq!(path, file.path()),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
