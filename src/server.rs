use std::{env, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::{fs::{create_dir_all, read_to_string, File}, io::AsyncWriteExt};

use crate::{error::{Error, RsResult}, tools::{detection::{DetectionSettings, EncodeProfile}, log::{log_info, LogServiceType}, recognition::OnnxModelPaths}};


const ENV_PROFILE: &str = "FACEGATE_ENV";
const ENV_DIR: &str = "FACEGATE_DIR";
const ENV_PORT: &str = "FACEGATE_PORT";
const ENV_DB_POOL_SIZE: &str = "FACEGATE_DB_POOL_SIZE";
const ENV_ADMIN_API_KEY: &str = "FACEGATE_ADMIN_API_KEY";
const ENV_OPERATOR_API_KEY: &str = "FACEGATE_OPERATOR_API_KEY";
const ENV_FACE_MODEL: &str = "FACEGATE_FACE_MODEL";
const ENV_FACE_FALLBACK_MODEL: &str = "FACEGATE_FACE_FALLBACK_MODEL";
const ENV_CASCADE_FALLBACK: &str = "FACEGATE_CASCADE_FALLBACK";
const ENV_CASCADE_MODEL: &str = "FACEGATE_CASCADE_MODEL";
const ENV_EMBEDDING_MODEL: &str = "FACEGATE_EMBEDDING_MODEL";
const ENV_DETECTION_UPSAMPLE: &str = "FACEGATE_DETECTION_UPSAMPLE";
const ENV_CONTRAST_FALLBACK: &str = "FACEGATE_CONTRAST_FALLBACK";
const ENV_ROTATION_FALLBACK: &str = "FACEGATE_ROTATION_FALLBACK";
const ENV_ROTATION_ANGLES: &str = "FACEGATE_ROTATION_ANGLES";
const ENV_REGISTER_JITTERS: &str = "FACEGATE_REGISTER_JITTERS";
const ENV_RECOGNIZE_JITTERS: &str = "FACEGATE_RECOGNIZE_JITTERS";
const ENV_RECOGNIZE_MAX_CANDIDATES: &str = "FACEGATE_RECOGNIZE_MAX_CANDIDATES";
const ENV_MAX_PROTOTYPES: &str = "FACEGATE_MAX_PROTOTYPES";
const ENV_REFRESH_SECONDS: &str = "FACEGATE_EMBEDDINGS_REFRESH_SECONDS";
const ENV_ENCODE_CONCURRENCY: &str = "FACEGATE_ENCODE_CONCURRENCY";
const ENV_ENCODE_TIMEOUT_MS: &str = "FACEGATE_ENCODE_TIMEOUT_MS";
const ENV_MATCH_THRESHOLD: &str = "FACEGATE_MATCH_THRESHOLD";
const ENV_MAX_IMAGE_BYTES: &str = "FACEGATE_MAX_IMAGE_BYTES";
const ENV_EMBEDDING_DIM: &str = "FACEGATE_EMBEDDING_DIM";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum Profile {
    #[default]
    Development,
    Production,
}

impl FromStr for Profile {
    type Err = Error;
    fn from_str(s: &str) -> RsResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Profile::Development),
            "production" | "prod" => Ok(Profile::Production),
            other => Err(Error::ConfigurationInvalid(format!("Unknown profile {}", other))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub profile: Profile,
    /// Data directory, resolved at startup and never written to config.json.
    #[serde(skip)]
    pub dir: PathBuf,
    pub port: u16,
    pub db_pool_size: usize,
    pub admin_api_key: Option<String>,
    pub operator_api_key: Option<String>,

    pub detection_model: PathBuf,
    pub fallback_detection_model: Option<PathBuf>,
    pub cascade_fallback: bool,
    pub cascade_model: Option<PathBuf>,
    pub embedding_model: PathBuf,
    pub detection_upsample: u32,
    pub contrast_fallback: bool,
    pub rotation_fallback: bool,
    pub rotation_angles: Vec<f32>,

    pub register_jitters: u32,
    pub recognize_jitters: u32,
    pub recognize_max_candidates: usize,
    pub max_prototypes: usize,
    pub refresh_seconds: u64,
    pub encode_concurrency: usize,
    pub encode_timeout_ms: u64,
    pub match_threshold: f32,
    pub max_image_bytes: usize,
    pub embedding_dim: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            profile: Profile::Development,
            dir: PathBuf::new(),
            port: 8080,
            db_pool_size: 4,
            admin_api_key: None,
            operator_api_key: None,
            detection_model: PathBuf::from("models/face_detector.onnx"),
            fallback_detection_model: None,
            cascade_fallback: false,
            cascade_model: None,
            embedding_model: PathBuf::from("models/face_embedder.onnx"),
            detection_upsample: 1,
            contrast_fallback: true,
            rotation_fallback: true,
            rotation_angles: vec![-15.0, 15.0],
            register_jitters: 5,
            recognize_jitters: 1,
            recognize_max_candidates: 3,
            max_prototypes: 6,
            refresh_seconds: 30,
            encode_concurrency: 2,
            encode_timeout_ms: 30_000,
            match_threshold: 0.5,
            max_image_bytes: 10 * 1024 * 1024,
            embedding_dim: 128,
        }
    }
}

#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[arg(short = 'k', long)]
    docker: bool,

    #[arg(short, long)]
    dir: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> RsResult<T> {
    raw.trim().parse::<T>().map_err(|_| Error::ConfigurationInvalid(format!("Invalid value for {}: {}", name, raw)))
}

fn parse_bool(name: &str, raw: &str) -> RsResult<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::ConfigurationInvalid(format!("Invalid value for {}: {}", name, raw))),
    }
}

fn parse_angles(name: &str, raw: &str) -> RsResult<Vec<f32>> {
    raw.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()).map(|s| parse_value::<f32>(name, s)).collect()
}

fn non_empty(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
}

impl ServerConfig {
    /// Applies `FACEGATE_*` overrides read through `var`.
    pub fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> RsResult<()> {
        if let Some(v) = var(ENV_PROFILE) { self.profile = v.parse()?; }
        if let Some(v) = var(ENV_PORT) { self.port = parse_value(ENV_PORT, &v)?; }
        if let Some(v) = var(ENV_DB_POOL_SIZE) { self.db_pool_size = parse_value(ENV_DB_POOL_SIZE, &v)?; }
        if let Some(v) = var(ENV_ADMIN_API_KEY) { self.admin_api_key = non_empty(v); }
        if let Some(v) = var(ENV_OPERATOR_API_KEY) { self.operator_api_key = non_empty(v); }
        if let Some(v) = var(ENV_FACE_MODEL) { self.detection_model = PathBuf::from(v); }
        if let Some(v) = var(ENV_FACE_FALLBACK_MODEL) { self.fallback_detection_model = non_empty(v).map(PathBuf::from); }
        if let Some(v) = var(ENV_CASCADE_FALLBACK) { self.cascade_fallback = parse_bool(ENV_CASCADE_FALLBACK, &v)?; }
        if let Some(v) = var(ENV_CASCADE_MODEL) { self.cascade_model = non_empty(v).map(PathBuf::from); }
        if let Some(v) = var(ENV_EMBEDDING_MODEL) { self.embedding_model = PathBuf::from(v); }
        if let Some(v) = var(ENV_DETECTION_UPSAMPLE) { self.detection_upsample = parse_value(ENV_DETECTION_UPSAMPLE, &v)?; }
        if let Some(v) = var(ENV_CONTRAST_FALLBACK) { self.contrast_fallback = parse_bool(ENV_CONTRAST_FALLBACK, &v)?; }
        if let Some(v) = var(ENV_ROTATION_FALLBACK) { self.rotation_fallback = parse_bool(ENV_ROTATION_FALLBACK, &v)?; }
        if let Some(v) = var(ENV_ROTATION_ANGLES) { self.rotation_angles = parse_angles(ENV_ROTATION_ANGLES, &v)?; }
        if let Some(v) = var(ENV_REGISTER_JITTERS) { self.register_jitters = parse_value(ENV_REGISTER_JITTERS, &v)?; }
        if let Some(v) = var(ENV_RECOGNIZE_JITTERS) { self.recognize_jitters = parse_value(ENV_RECOGNIZE_JITTERS, &v)?; }
        if let Some(v) = var(ENV_RECOGNIZE_MAX_CANDIDATES) { self.recognize_max_candidates = parse_value(ENV_RECOGNIZE_MAX_CANDIDATES, &v)?; }
        if let Some(v) = var(ENV_MAX_PROTOTYPES) { self.max_prototypes = parse_value(ENV_MAX_PROTOTYPES, &v)?; }
        if let Some(v) = var(ENV_REFRESH_SECONDS) { self.refresh_seconds = parse_value(ENV_REFRESH_SECONDS, &v)?; }
        if let Some(v) = var(ENV_ENCODE_CONCURRENCY) { self.encode_concurrency = parse_value(ENV_ENCODE_CONCURRENCY, &v)?; }
        if let Some(v) = var(ENV_ENCODE_TIMEOUT_MS) { self.encode_timeout_ms = parse_value(ENV_ENCODE_TIMEOUT_MS, &v)?; }
        if let Some(v) = var(ENV_MATCH_THRESHOLD) { self.match_threshold = parse_value(ENV_MATCH_THRESHOLD, &v)?; }
        if let Some(v) = var(ENV_MAX_IMAGE_BYTES) { self.max_image_bytes = parse_value(ENV_MAX_IMAGE_BYTES, &v)?; }
        if let Some(v) = var(ENV_EMBEDDING_DIM) { self.embedding_dim = parse_value(ENV_EMBEDDING_DIM, &v)?; }
        Ok(())
    }

    pub fn validate(&self) -> RsResult<()> {
        let invalid = |message: &str| Err(Error::ConfigurationInvalid(message.to_string()));
        if self.profile == Profile::Production && self.admin_api_key.is_none() {
            return invalid("FACEGATE_ADMIN_API_KEY is required in production");
        }
        if self.embedding_dim == 0 {
            return invalid("embedding dimension must be positive");
        }
        if self.max_prototypes == 0 {
            return invalid("max prototypes must be at least 1");
        }
        if self.register_jitters == 0 || self.recognize_jitters == 0 {
            return invalid("jitter counts must be at least 1");
        }
        if self.recognize_max_candidates == 0 {
            return invalid("recognize max candidates must be at least 1");
        }
        if self.encode_concurrency == 0 || self.db_pool_size == 0 {
            return invalid("encode concurrency and database pool size must be at least 1");
        }
        if self.encode_timeout_ms == 0 {
            return invalid("encode timeout must be positive");
        }
        if !self.match_threshold.is_finite() || self.match_threshold <= 0.0 {
            return invalid("match threshold must be a positive number");
        }
        if self.max_image_bytes == 0 {
            return invalid("max image bytes must be positive");
        }
        if self.cascade_fallback && self.cascade_model.is_none() {
            return invalid("cascade fallback is enabled without FACEGATE_CASCADE_MODEL");
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        if self.refresh_seconds == 0 { None } else { Some(Duration::from_secs(self.refresh_seconds)) }
    }

    pub fn encode_timeout(&self) -> Duration {
        Duration::from_millis(self.encode_timeout_ms)
    }

    pub fn detection_settings(&self) -> DetectionSettings {
        DetectionSettings {
            contrast_fallback: self.contrast_fallback,
            rotation_angles: if self.rotation_fallback { self.rotation_angles.clone() } else { vec![] },
            upsample: self.detection_upsample,
            cascade_fallback: self.cascade_fallback,
        }
    }

    pub fn register_profile(&self) -> EncodeProfile {
        EncodeProfile { jitter: self.register_jitters, max_candidates: 1 }
    }

    pub fn recognize_profile(&self) -> EncodeProfile {
        EncodeProfile { jitter: self.recognize_jitters, max_candidates: self.recognize_max_candidates }
    }

    pub fn model_paths(&self) -> OnnxModelPaths {
        OnnxModelPaths {
            detection: self.detection_model.clone(),
            fallback_detection: self.fallback_detection_model.clone(),
            cascade: if self.cascade_fallback { self.cascade_model.clone() } else { None },
            embedding: self.embedding_model.clone(),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.join("dbs").join("facegate.db")
    }

    pub fn has_api_keys(&self) -> bool {
        self.admin_api_key.is_some() || self.operator_api_key.is_some()
    }
}

pub fn get_server_local_path(args: &Args) -> RsResult<PathBuf> {
    let dir_path = if let Some(argdir) = &args.dir {
        PathBuf::from(argdir)
    } else if let Ok(val) = env::var(ENV_DIR) {
        PathBuf::from(&val)
    } else if args.docker {
        PathBuf::from("/config")
    } else {
        let Some(mut dir_path) = dirs::config_local_dir() else { return Err(Error::ServerUnableToAccessServerLocalFolder); };
        dir_path.push("facegate");
        dir_path
    };
    Ok(dir_path)
}

/// Reads `<dir>/config.json`, writing the defaults when it does not exist yet.
pub async fn get_raw_config(dir: &PathBuf) -> RsResult<ServerConfig> {
    let Ok(_) = create_dir_all(dir).await else { return Err(Error::ServerUnableToAccessServerLocalFolder); };
    let path = dir.join("config.json");

    if let Ok(data) = read_to_string(&path).await {
        serde_json::from_str::<ServerConfig>(&data).map_err(|e| Error::ConfigurationInvalid(format!("Malformed config file {:?}: {}", path, e)))
    } else {
        let new_config = ServerConfig::default();
        let new_config_string = serde_json::to_string_pretty(&new_config)?;
        let Ok(mut file) = File::create(&path).await else { return Err(Error::ServerUnableToAccessServerLocalFolder); };
        file.write_all(new_config_string.as_bytes()).await?;
        Ok(new_config)
    }
}

/// config.json, then environment, then command line.
pub async fn initialize_config() -> RsResult<ServerConfig> {
    let args = Args::parse();
    let dir = get_server_local_path(&args)?;
    log_info(LogServiceType::Register, format!("LocalPath: {:?}", dir));

    let mut config = get_raw_config(&dir).await?;
    config.dir = dir;
    config.apply_env_overrides(|name| env::var(name).ok())?;
    if let Some(port) = args.port {
        config.port = port;
    }
    config.validate()?;
    Ok(config)
}
