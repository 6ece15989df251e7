//! 统一配置中心
//!
//! 提供聊天中继服务的配置管理，包括：
//! - 监听地址
//! - 数据库连接
//! - 跨域策略
//! - 连接出站队列
//!
//! 加载顺序：默认值 -> `CHAT_CONFIG_FILE` 指定的 YAML 文件 -> `CHAT_*` 环境变量
//! -> 部署平台约定的 `DATABASE_URL` / `HOST` / `PORT` / `FRONTEND_URL` / `DB_MAX_CONNECTIONS`。

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 指定 YAML 配置文件路径的环境变量
pub const CONFIG_FILE_ENV: &str = "CHAT_CONFIG_FILE";

/// 允许任意来源的跨域配置值
pub const ANY_ORIGIN: &str = "*";

/// 全局应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    /// 服务配置
    #[serde(default)]
    #[validate(nested)]
    pub server: ServerConfig,
    /// 数据库配置
    #[serde(default)]
    #[validate(nested)]
    pub database: DatabaseConfig,
    /// 跨域配置
    #[serde(default)]
    pub cors: CorsConfig,
    /// 广播配置
    #[serde(default)]
    #[validate(nested)]
    pub broadcast: BroadcastConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    /// 没有默认值，必须由部署环境提供
    pub url: String,
    #[validate(range(min = 1))]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 5,
        }
    }
}

impl DatabaseConfig {
    /// 隐藏密码后的连接串，用于日志输出
    pub fn masked_url(&self) -> String {
        let Some(scheme_end) = self.url.find("://") else {
            return self.url.clone();
        };
        let authority_start = scheme_end + 3;
        let rest = &self.url[authority_start..];
        let authority_len = rest.find('/').unwrap_or(rest.len());
        let Some(at) = rest[..authority_len].rfind('@') else {
            return self.url.clone();
        };
        let Some(colon) = rest[..at].find(':') else {
            return self.url.clone();
        };

        format!(
            "{}{}****{}",
            &self.url[..authority_start],
            &rest[..=colon],
            &rest[at..]
        )
    }
}

/// 跨域配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// 前端地址；`*` 表示允许任意来源（此时不携带凭据）
    pub frontend_url: String,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            frontend_url: ANY_ORIGIN.into(),
        }
    }
}

impl CorsConfig {
    pub fn allows_any_origin(&self) -> bool {
        let origin = self.frontend_url.trim();
        origin.is_empty() || origin == ANY_ORIGIN
    }
}

/// 广播配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BroadcastConfig {
    /// 每个连接出站队列的容量，队列写满的连接会被移除
    #[validate(range(min = 1))]
    pub outbound_buffer: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: 256,
        }
    }
}

impl AppConfig {
    /// 从默认值、配置文件和环境变量加载并校验配置
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment())
    }

    /// 组装所有配置来源，后合并的来源优先级更高
    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            figment = figment.merge(Yaml::file(path));
        }

        figment
            .merge(Env::prefixed("CHAT_").ignore(&["CONFIG_FILE"]).split("__"))
            .merge(Env::raw().filter_map(|key| {
                let mapped = match key.as_str().to_ascii_uppercase().as_str() {
                    "DATABASE_URL" => "database.url",
                    "DB_MAX_CONNECTIONS" => "database.max_connections",
                    "HOST" => "server.host",
                    "PORT" => "server.port",
                    "FRONTEND_URL" => "cors.frontend_url",
                    _ => return None,
                };
                Some(mapped.into())
            }))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::MissingDatabaseUrl);
        }

        Validate::validate(self)?;
        Ok(())
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL must be set")]
    MissingDatabaseUrl,
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
}
