use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::models::ExecutionLimits;

/// 程序配置
///
/// 取值顺序：默认值 → TOML 文件（`CTRL_LEARN_CONFIG`）→ 环境变量。
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 编辑合并的静默窗口（毫秒）
    pub quiescence_ms: u64,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    // --- 沙箱配置 ---
    /// 解释器程序
    pub interpreter: String,
    /// 解释器参数（位于脚本路径之前）
    pub interpreter_args: Vec<String>,
    /// 启动前缀，例如 `["unshare", "-rn"]`，为空则直接启动解释器
    pub launcher: Vec<String>,
    /// 单次执行超时（毫秒）
    pub sandbox_timeout_ms: u64,
    /// stdout / stderr 各自的最大捕获字节数
    pub max_output_bytes: usize,
    /// 临时工作区的父目录，为空则使用系统临时目录
    pub workspace_dir: Option<String>,
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    pub llm_temperature: f32,
    pub llm_max_tokens: u32,
    // --- 图片 / 语音配置 ---
    pub artifact_api_key: String,
    pub artifact_api_base_url: String,
    pub image_model: String,
    pub image_size: String,
    pub speech_model: String,
    pub speech_voice: String,
    /// 语音合成的最大字符数
    pub speech_max_chars: usize,
    /// 可视化所需的最短代码长度
    pub visualization_min_chars: usize,
    /// 产物缓存容量
    pub artifact_cache_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            quiescence_ms: 1000,
            verbose_logging: false,
            interpreter: "python3".to_string(),
            interpreter_args: vec!["-I".to_string(), "-B".to_string(), "-u".to_string()],
            launcher: Vec::new(),
            sandbox_timeout_ms: 5000,
            max_output_bytes: 64 * 1024,
            workspace_dir: None,
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o-mini".to_string(),
            llm_temperature: 0.2,
            llm_max_tokens: 1024,
            artifact_api_key: String::new(),
            artifact_api_base_url: "https://api.openai.com/v1".to_string(),
            image_model: "dall-e-3".to_string(),
            image_size: "1024x1024".to_string(),
            speech_model: "tts-1".to_string(),
            speech_voice: "alloy".to_string(),
            speech_max_chars: 4000,
            visualization_min_chars: 10,
            artifact_cache_capacity: 32,
        }
    }
}

impl Config {
    /// 从环境变量读取配置（以默认值为基础）
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// 读取配置文件（如果设置了 `CTRL_LEARN_CONFIG`），再叠加环境变量
    pub fn load() -> Result<Self, ConfigError> {
        let base = match std::env::var("CTRL_LEARN_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_toml_file(Path::new(&path))?,
            _ => Self::default(),
        };
        Ok(base.with_env_overrides())
    }

    /// 从 TOML 文件读取配置，缺失字段使用默认值
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|source| ConfigError::TomlParseFailed {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    fn with_env_overrides(self) -> Self {
        Self {
            quiescence_ms: env_parse("QUIESCENCE_MS").unwrap_or(self.quiescence_ms),
            verbose_logging: env_parse("VERBOSE_LOGGING").unwrap_or(self.verbose_logging),
            interpreter: std::env::var("SANDBOX_INTERPRETER").unwrap_or(self.interpreter),
            interpreter_args: env_list("SANDBOX_INTERPRETER_ARGS")
                .unwrap_or(self.interpreter_args),
            launcher: env_list("SANDBOX_LAUNCHER").unwrap_or(self.launcher),
            sandbox_timeout_ms: env_parse("SANDBOX_TIMEOUT_MS").unwrap_or(self.sandbox_timeout_ms),
            max_output_bytes: env_parse("SANDBOX_MAX_OUTPUT_BYTES")
                .unwrap_or(self.max_output_bytes),
            workspace_dir: std::env::var("SANDBOX_WORKSPACE_DIR")
                .ok()
                .or(self.workspace_dir),
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(self.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(self.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(self.llm_model_name),
            llm_temperature: env_parse("LLM_TEMPERATURE").unwrap_or(self.llm_temperature),
            llm_max_tokens: env_parse("LLM_MAX_TOKENS").unwrap_or(self.llm_max_tokens),
            artifact_api_key: std::env::var("ARTIFACT_API_KEY").unwrap_or(self.artifact_api_key),
            artifact_api_base_url: std::env::var("ARTIFACT_API_BASE_URL")
                .unwrap_or(self.artifact_api_base_url),
            image_model: std::env::var("IMAGE_MODEL").unwrap_or(self.image_model),
            image_size: std::env::var("IMAGE_SIZE").unwrap_or(self.image_size),
            speech_model: std::env::var("SPEECH_MODEL").unwrap_or(self.speech_model),
            speech_voice: std::env::var("SPEECH_VOICE").unwrap_or(self.speech_voice),
            speech_max_chars: env_parse("SPEECH_MAX_CHARS").unwrap_or(self.speech_max_chars),
            visualization_min_chars: env_parse("VISUALIZATION_MIN_CHARS")
                .unwrap_or(self.visualization_min_chars),
            artifact_cache_capacity: env_parse("ARTIFACT_CACHE_CAPACITY")
                .unwrap_or(self.artifact_cache_capacity),
        }
    }

    /// 编辑合并窗口
    pub fn quiescence(&self) -> Duration {
        Duration::from_millis(self.quiescence_ms)
    }

    /// 沙箱资源限制
    pub fn execution_limits(&self) -> ExecutionLimits {
        ExecutionLimits {
            timeout: Duration::from_millis(self.sandbox_timeout_ms),
            max_output_bytes: self.max_output_bytes,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// 以空白分隔的列表，例如 `SANDBOX_LAUNCHER="unshare -rn"`
fn env_list(name: &str) -> Option<Vec<String>> {
    std::env::var(name)
        .ok()
        .map(|v| v.split_whitespace().map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.quiescence(), Duration::from_millis(1000));
        assert_eq!(config.interpreter, "python3");
        assert_eq!(config.execution_limits().max_output_bytes, 64 * 1024);
        assert!(config.llm_temperature < 0.5);
    }

    #[test]
    fn test_toml_partial_override() {
        let config = Config::from_toml_str(
            r#"
            quiescence_ms = 250
            sandbox_timeout_ms = 2000
            launcher = ["unshare", "-rn"]
            "#,
        )
        .unwrap();

        assert_eq!(config.quiescence_ms, 250);
        assert_eq!(config.execution_limits().timeout, Duration::from_secs(2));
        assert_eq!(config.launcher, vec!["unshare", "-rn"]);
        // 未出现的字段保持默认值
        assert_eq!(config.speech_max_chars, 4000);
    }

    #[test]
    fn test_toml_parse_error_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "quiescence_ms = \"soon\"").unwrap();

        let err = Config::from_toml_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TomlParseFailed { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }
}
