use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_PATH: &str = "config/service.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: String, value: String },
    #[error("Invalid setting {0}: must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub cors: CorsConfig,
    pub detection: DetectionConfig,
    pub classification: ClassificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub max_age: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub model_path: PathBuf,
    pub labels: Vec<String>,
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    pub model_path: PathBuf,
    pub labels: Vec<String>,
    pub input_size: u32,
    pub top_k: usize,
    pub min_confidence: f32,
    /// Set when the exported module returns logits rather than probabilities.
    pub apply_softmax: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: to_strings(&[
                "https://kalpavruksha-lake.vercel.app",
                "https://kalpavruksha-01-krfn.vercel.app",
                "https://*.vercel.app",
                "http://localhost:5173",
                "http://localhost:3000",
            ]),
            max_age: 3600,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("bestcoconutdisease.torchscript"),
            labels: to_strings(&[
                "bud root dropping",
                "bud rot",
                "gray leaf spot",
                "leaf rot",
                "stembleeding",
            ]),
            input_size: 640,
            confidence_threshold: 0.25,
            iou_threshold: 0.7,
            max_detections: 300,
        }
    }
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("best.torchscript"),
            labels: to_strings(&[
                "caterpillars",
                "drying",
                "flaccidity",
                "healthy",
                "leaflet",
                "yellowing",
            ]),
            input_size: 224,
            top_k: 5,
            min_confidence: 0.1,
            apply_softmax: false,
        }
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: AppConfig = serde_yaml::from_str(&config_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Builds the runtime config: `CONFIG_PATH` (or `config/service.yaml` when
    /// present) layered under the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("CONFIG_PATH") {
            Ok(path) => Self::load(Path::new(&path))?,
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::load(Path::new(DEFAULT_CONFIG_PATH))?
            }
            Err(_) => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects sizes the preprocessing and top-k selection cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("detection.input_size", self.detection.input_size as usize),
            ("classification.input_size", self.classification.input_size as usize),
            ("classification.top_k", self.classification.top_k),
            ("server.max_upload_bytes", self.server.max_upload_bytes),
        ];
        match checks.iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(ConfigError::Zero(*name)),
            None => Ok(()),
        }
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = parse_env("PORT", &port)?;
        }
        if let Some(limit) = lookup("MAX_UPLOAD_BYTES") {
            self.server.max_upload_bytes = parse_env("MAX_UPLOAD_BYTES", &limit)?;
        }
        if let Some(path) = lookup("DETECTION_MODEL_PATH") {
            self.detection.model_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("CLASSIFICATION_MODEL_PATH") {
            self.classification.model_path = PathBuf::from(path);
        }
        if let Some(origins) = lookup("CORS_ALLOWED_ORIGINS") {
            self.cors.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(String::from)
                .collect();
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        name: name.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_deployed_models() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.detection.labels.len(), 5);
        assert_eq!(config.classification.labels[3], "healthy");
        assert_eq!(config.classification.top_k, 5);
        assert!((config.classification.min_confidence - 0.1).abs() < f32::EPSILON);
    }

    #[test]
    fn partial_yaml_keeps_remaining_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "server:\n  port: 8081\ndetection:\n  model_path: models/det.torchscript\n  iou_threshold: 0.5"
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.detection.model_path, PathBuf::from("models/det.torchscript"));
        assert!((config.detection.iou_threshold - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.detection.input_size, 640);
        assert_eq!(config.classification.input_size, 224);
    }

    #[test]
    fn zero_input_size_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "classification:\n  input_size: 0").unwrap();

        let err = AppConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Zero("classification.input_size")));
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn missing_file_is_reported_with_path() {
        let err = AppConfig::load(Path::new("does/not/exist.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("does/not/exist.yaml"));
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config = AppConfig::default();
        config
            .apply_overrides(lookup_from(&[
                ("PORT", "9000"),
                ("CLASSIFICATION_MODEL_PATH", "/srv/cls.torchscript"),
                ("CORS_ALLOWED_ORIGINS", "http://a.test, http://b.test,"),
            ]))
            .unwrap();

        assert_eq!(config.bind_address(), "0.0.0.0:9000");
        assert_eq!(
            config.classification.model_path,
            PathBuf::from("/srv/cls.torchscript")
        );
        assert_eq!(config.cors.allowed_origins, vec!["http://a.test", "http://b.test"]);
    }

    #[test]
    fn invalid_numeric_override_is_rejected() {
        let mut config = AppConfig::default();
        let err = config
            .apply_overrides(lookup_from(&[("PORT", "eighty")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { ref name, .. } if name == "PORT"));
    }
}
