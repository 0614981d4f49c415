use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use crate::workflow::{ActorId, RoleRoster, StepTemplate, TemplateCatalog};

/// Main configuration structure for signoff
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SignoffConfig {
    /// Observability settings
    pub observability: ObservabilityConfig,
    /// Engine tuning
    pub engine: EngineConfig,
    /// Database settings (optional)
    pub database: Option<DatabaseConfig>,
    /// Which actors hold which role
    #[serde(default)]
    pub assignments: Vec<RoleAssignment>,
    /// Step templates of every request type
    #[serde(default)]
    pub templates: Vec<StepTemplate>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Default log directive when RUST_LOG is unset
    pub log_level: String,
    /// Emit JSON lines instead of human-readable logs
    pub json_logs: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Maximum cached template pipelines
    pub template_cache_capacity: u64,
    /// Seconds before a cached template is re-read
    pub template_cache_ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL (SQLite file path or connection string)
    pub url: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Enable automatic migrations
    pub auto_migrate: bool,
}

/// One role and the actors currently holding it
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoleAssignment {
    pub role_code: String,
    #[serde(default)]
    pub actor_ids: Vec<ActorId>,
}

impl Default for SignoffConfig {
    fn default() -> Self {
        Self {
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json_logs: false,
            },
            engine: EngineConfig {
                template_cache_capacity: 256,
                template_cache_ttl_seconds: 300, // 5 minutes
            },
            database: Some(DatabaseConfig {
                url: "sqlite://.signoff/signoff.db".to_string(),
                max_connections: 5,
                auto_migrate: true,
            }),
            assignments: Vec::new(),
            templates: Vec::new(),
        }
    }
}

impl SignoffConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (signoff.toml, .signoff-rc)
    /// 3. An explicitly named file
    /// 4. Environment variables (SIGNOFF__SECTION__KEY)
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let defaults = Config::try_from(&SignoffConfig::default())?;
        let mut builder = Config::builder().add_source(defaults);

        if Path::new("signoff.toml").exists() {
            builder = builder.add_source(File::with_name("signoff"));
        }

        if Path::new(".signoff-rc").exists() {
            builder = builder.add_source(
                File::with_name(".signoff-rc").format(config::FileFormat::Toml),
            );
        }

        if let Some(path) = explicit {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("SIGNOFF")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let signoff_config: SignoffConfig = config.try_deserialize()?;
        Ok(signoff_config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }

    /// Role directory backing the role-presence condition
    pub fn roster(&self) -> RoleRoster {
        let mut roster = RoleRoster::default();
        for assignment in &self.assignments {
            for actor_id in &assignment.actor_ids {
                roster.assign(&assignment.role_code, *actor_id);
            }
        }
        roster
    }

    /// Validated step templates
    pub fn catalog(&self) -> Result<TemplateCatalog> {
        Ok(TemplateCatalog::new(self.templates.clone())?)
    }

    pub fn template_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.engine.template_cache_ttl_seconds)
    }
}

/// Global configuration instance
static CONFIG: OnceLock<SignoffConfig> = OnceLock::new();

/// Get the global configuration, loading it from the default sources on first use
pub fn config() -> Result<&'static SignoffConfig> {
    init_config(None)
}

/// Initialize configuration (called at startup). Later calls return the
/// configuration loaded first.
pub fn init_config(explicit: Option<&Path>) -> Result<&'static SignoffConfig> {
    if let Some(config) = CONFIG.get() {
        return Ok(config);
    }

    // A missing .env is fine; a broken one is worth a warning.
    if let Err(e) = SignoffConfig::load_env_file() {
        tracing::warn!("Failed to read .env file: {}", e);
    }
    let loaded = SignoffConfig::load(explicit)
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    let config = CONFIG.get_or_init(|| loaded);
    tracing::info!("Configuration loaded successfully");
    Ok(config)
}
