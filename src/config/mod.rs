use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub web: WebConfig,
    pub gateway: GatewayConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub queue: QueueConfig,
    pub object_store: ObjectStoreConfig,
    pub auth: AuthConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub auth_service_url: String,
    pub image_service_url: String,
    pub rate_limit_per_minute: u32,
    pub cors_origins: Vec<String>,
    /// Seconds before an upstream read is abandoned with a 504.
    pub proxy_timeout_secs: u64,
    /// When false the limiter keeps per-process counters instead of Redis.
    pub shared_rate_limit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub broker_url: String,
    pub result_url: String,
    pub lane: String,
    /// Stable consumer name, one per GPU-bound worker process.
    pub consumer_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    pub endpoint: String,
    /// Browser-reachable base URL; differs from `endpoint` because clients
    /// cannot resolve in-cluster hostnames.
    pub external_url: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub use_ssl: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_algorithm: String,
    pub access_token_expire_minutes: i64,
    pub refresh_token_expire_days: i64,
    pub bcrypt_cost: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub model_name: String,
    pub model_runner_url: String,
    pub translation_model_name: String,
    pub enable_translation: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            web: WebConfig {
                host: "0.0.0.0".to_string(),
                port: 8002,
            },
            gateway: GatewayConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
                auth_service_url: "http://localhost:8002".to_string(),
                image_service_url: "http://localhost:8002".to_string(),
                rate_limit_per_minute: 60,
                cors_origins: vec![
                    "http://localhost".to_string(),
                    "http://localhost:8090".to_string(),
                ],
                proxy_timeout_secs: 30,
                shared_rate_limit: true,
            },
            database: DatabaseConfig {
                url: "sqlite://./lumen.db".to_string(),
                max_connections: Some(10),
            },
            redis: RedisConfig {
                url: "redis://localhost:6379/0".to_string(),
            },
            queue: QueueConfig {
                broker_url: "redis://localhost:6379/3".to_string(),
                result_url: "redis://localhost:6379/4".to_string(),
                lane: "image_generation".to_string(),
                consumer_name: "gpu-0".to_string(),
            },
            object_store: ObjectStoreConfig {
                endpoint: "localhost:9000".to_string(),
                external_url: "http://localhost:9020".to_string(),
                access_key: "minioadmin".to_string(),
                secret_key: "minioadmin".to_string(),
                bucket: "lumen-images".to_string(),
                use_ssl: false,
            },
            auth: AuthConfig {
                jwt_secret: "change-me".to_string(),
                jwt_algorithm: "HS256".to_string(),
                access_token_expire_minutes: 30,
                refresh_token_expire_days: 7,
                bcrypt_cost: 12,
            },
            worker: WorkerConfig {
                model_name: "stabilityai/sdxl-turbo".to_string(),
                model_runner_url: "http://localhost:8500".to_string(),
                translation_model_name: "Qwen/Qwen2.5-3B-Instruct".to_string(),
                enable_translation: true,
            },
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_file =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());

        let mut config = if std::path::Path::new(&config_file).exists() {
            let contents = std::fs::read_to_string(&config_file)?;
            toml::from_str(&contents)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment variables take precedence over the config file so that
    /// container deployments can stay file-less.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = std::env::var("REDIS_URL") {
            self.redis.url = v;
        }
        if let Ok(v) = std::env::var("QUEUE_BROKER_URL") {
            self.queue.broker_url = v;
        }
        if let Ok(v) = std::env::var("QUEUE_RESULT_URL") {
            self.queue.result_url = v;
        }
        if let Ok(v) = std::env::var("AUTH_SERVICE_URL") {
            self.gateway.auth_service_url = v;
        }
        if let Ok(v) = std::env::var("IMAGE_SERVICE_URL") {
            self.gateway.image_service_url = v;
        }
        if let Ok(v) = std::env::var("RATE_LIMIT_PER_MINUTE") {
            if let Ok(n) = v.parse() {
                self.gateway.rate_limit_per_minute = n;
            }
        }
        if let Ok(v) = std::env::var("CORS_ORIGINS") {
            self.gateway.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = std::env::var("MINIO_ENDPOINT") {
            self.object_store.endpoint = v;
        }
        if let Ok(v) = std::env::var("MINIO_EXTERNAL_URL") {
            self.object_store.external_url = v;
        }
        if let Ok(v) = std::env::var("MINIO_ACCESS_KEY") {
            self.object_store.access_key = v;
        }
        if let Ok(v) = std::env::var("MINIO_SECRET_KEY") {
            self.object_store.secret_key = v;
        }
        if let Ok(v) = std::env::var("MINIO_BUCKET") {
            self.object_store.bucket = v;
        }
        // Historical deployments used both names for the same flag; the
        // canonical one wins when both are present.
        if let Ok(v) = std::env::var("MINIO_SECURE") {
            self.object_store.use_ssl = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("MINIO_USE_SSL") {
            self.object_store.use_ssl = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("JWT_SECRET") {
            self.auth.jwt_secret = v;
        }
        if let Ok(v) = std::env::var("JWT_ALGORITHM") {
            self.auth.jwt_algorithm = v;
        }
        if let Ok(v) = std::env::var("ACCESS_TOKEN_EXPIRE_MINUTES") {
            if let Ok(n) = v.parse() {
                self.auth.access_token_expire_minutes = n;
            }
        }
        if let Ok(v) = std::env::var("REFRESH_TOKEN_EXPIRE_DAYS") {
            if let Ok(n) = v.parse() {
                self.auth.refresh_token_expire_days = n;
            }
        }
        if let Ok(v) = std::env::var("BCRYPT_COST") {
            if let Ok(n) = v.parse() {
                self.auth.bcrypt_cost = n;
            }
        }
        if let Ok(v) = std::env::var("MODEL_NAME") {
            self.worker.model_name = v;
        }
        if let Ok(v) = std::env::var("MODEL_RUNNER_URL") {
            self.worker.model_runner_url = v;
        }
        if let Ok(v) = std::env::var("TRANSLATION_MODEL_NAME") {
            self.worker.translation_model_name = v;
        }
        if let Ok(v) = std::env::var("ENABLE_TRANSLATION") {
            self.worker.enable_translation = parse_bool(&v);
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_consistent() {
        let config = Config::default();
        assert_eq!(config.queue.lane, "image_generation");
        assert_eq!(config.auth.access_token_expire_minutes, 30);
        assert_eq!(config.auth.refresh_token_expire_days, 7);
        assert_eq!(config.gateway.rate_limit_per_minute, 60);
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true"));
        assert!(parse_bool("1"));
        assert!(parse_bool("Yes"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool(""));
    }
}
