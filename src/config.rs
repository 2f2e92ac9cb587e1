use crate::error::{Result, StreamError};
use config::{Config, Environment, File, FileFormat};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Candidate env files, searched in order; the first one that exists wins.
pub const ENV_FILE_LOCATIONS: [&str; 3] = ["/etc/tedge/.env", "/bin/.env", ".env"];

/// Name of the inventory binary that gets overwritten every iteration.
pub const IMAGE_NAME: &str = "webcam_image_analyzed.jpg";

pub const DEFAULT_MODEL_PATH: &str = "tomato_model.onnx";

#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Base URL of the Cumulocity tenant, e.g. `https://example.cumulocity.com`
    pub base_url: String,
    pub tenant_id: String,
    pub username: String,
    pub password: String,
    /// Directory the annotated image is written to before upload
    pub workdir: PathBuf,
    /// ONNX export of the ripeness classifier
    pub model_path: PathBuf,
    /// Video device index (`0` is `/dev/video0`)
    pub camera_index: u32,
}

impl StreamConfig {
    /// Load from the first env file found in [`ENV_FILE_LOCATIONS`], with
    /// process environment variables taking precedence.
    pub fn load() -> Result<Self> {
        let env_file = ENV_FILE_LOCATIONS
            .iter()
            .map(Path::new)
            .find(|path| path.exists());

        match env_file {
            Some(path) => info!("Loading configuration from {}", path.display()),
            None => info!("No .env file found, reading configuration from the environment only"),
        }

        Self::load_from(env_file)
    }

    pub fn load_from(env_file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = env_file {
            // KEY=VALUE lines parse as the root section of an INI document
            builder = builder.add_source(
                File::new(&path.to_string_lossy(), FileFormat::Ini).required(true),
            );
        }

        let settings = builder
            .add_source(Environment::default())
            .build()
            .map_err(|e| StreamError::ConfigurationInvalid {
                key: env_file
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "environment".to_string()),
                reason: e.to_string(),
            })?;

        Self::from_settings(&settings)
    }

    fn from_settings(settings: &Config) -> Result<Self> {
        let camera_index = match optional(settings, "CAMERA_INDEX") {
            Some(value) => value.trim().parse::<u32>().map_err(|e| {
                StreamError::ConfigurationInvalid {
                    key: "CAMERA_INDEX".to_string(),
                    reason: e.to_string(),
                }
            })?,
            None => 0,
        };

        let config = Self {
            base_url: required(settings, "C8Y_BASEURL")?
                .trim_end_matches('/')
                .to_string(),
            tenant_id: required(settings, "C8Y_TENANT_ID")?,
            username: required(settings, "C8Y_USERNAME")?,
            password: required(settings, "C8Y_PASSWORD")?,
            workdir: PathBuf::from(required(settings, "WORKDIR")?),
            model_path: optional(settings, "MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            camera_index,
        };

        debug!(
            "Configuration: base_url={}, user={}, workdir={}, model={}, camera={}",
            config.base_url,
            config.auth_user(),
            config.workdir.display(),
            config.model_path.display(),
            config.camera_index
        );

        Ok(config)
    }

    /// Basic-auth user name, `{tenant}/{username}`.
    pub fn auth_user(&self) -> String {
        format!("{}/{}", self.tenant_id, self.username)
    }

    /// Local path of the annotated image, overwritten every iteration.
    pub fn image_path(&self) -> PathBuf {
        self.workdir.join(IMAGE_NAME)
    }
}

fn required(settings: &Config, key: &str) -> Result<String> {
    optional(settings, key).ok_or_else(|| StreamError::ConfigurationMissing(key.to_string()))
}

fn optional(settings: &Config, key: &str) -> Option<String> {
    // Sources may or may not fold key case, so try both spellings
    settings
        .get_string(&key.to_lowercase())
        .or_else(|_| settings.get_string(key))
        .ok()
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_env_file(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tomato-stream-config-{}-{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("test.env");
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn loads_required_values_from_env_file() {
        let path = write_env_file(
            "complete",
            "C8Y_BASEURL=https://tenant.example.com/\n\
             C8Y_TENANT_ID=t1234\n\
             C8Y_USERNAME=device\n\
             C8Y_PASSWORD=secret\n\
             WORKDIR=/var/lib/tomato\n",
        );

        let config = StreamConfig::load_from(Some(&path)).unwrap();

        assert_eq!(config.base_url, "https://tenant.example.com");
        assert_eq!(config.auth_user(), "t1234/device");
        assert_eq!(config.password, "secret");
        assert_eq!(config.image_path(), PathBuf::from("/var/lib/tomato/webcam_image_analyzed.jpg"));
        assert_eq!(config.model_path, PathBuf::from(DEFAULT_MODEL_PATH));
        assert_eq!(config.camera_index, 0);
    }

    #[test]
    fn missing_key_is_reported_by_name() {
        let path = write_env_file(
            "missing",
            "C8Y_BASEURL=https://tenant.example.com\n\
             C8Y_TENANT_ID=t1234\n\
             C8Y_USERNAME=device\n\
             C8Y_PASSWORD=secret\n",
        );

        match StreamConfig::load_from(Some(&path)) {
            Err(StreamError::ConfigurationMissing(key)) => assert_eq!(key, "WORKDIR"),
            other => panic!("expected ConfigurationMissing, got {:?}", other),
        }
    }

    #[test]
    fn rejects_non_numeric_camera_index() {
        let path = write_env_file(
            "camera",
            "C8Y_BASEURL=https://tenant.example.com\n\
             C8Y_TENANT_ID=t1234\n\
             C8Y_USERNAME=device\n\
             C8Y_PASSWORD=secret\n\
             WORKDIR=/tmp\n\
             CAMERA_INDEX=front\n",
        );

        assert!(matches!(
            StreamConfig::load_from(Some(&path)),
            Err(StreamError::ConfigurationInvalid { .. })
        ));
    }
}
