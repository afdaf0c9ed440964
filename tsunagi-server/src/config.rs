use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tsunagi_core::{CoreError, ScopeGrant};
use tsunagi_store::{
    MemorySessionStore, RedbSessionStore, SessionStore, SqliteSessionStore, StoreError,
};

use crate::routing::{
    FhirRouter, PrimarySource, SecondaryFhirStrategy, SourceDescriptor, SourceStrategy, Transport,
};

/// Server configuration loaded from YAML file
///
/// Unknown keys are rejected so a misspelled section fails startup instead
/// of silently taking its defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub server: ServerSettings,
    pub primary: PrimarySettings,
    /// Secondary sources, in fallback order
    pub sources: Vec<SourceSettings>,
    pub session: SessionSettings,
    pub storage: StorageSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// The launch FHIR server; its base URL comes from the session (`iss`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PrimarySettings {
    pub name: String,
    /// Scope grant the launch server accepts
    pub scopes: String,
    /// Timeout applied to every outbound call, primary and secondary
    pub timeout_secs: u64,
}

/// Strategy a source is built with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Plain FHIR REST server, patient linked by MRN search
    #[default]
    Fhir,
}

/// One secondary FHIR source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSettings {
    pub name: String,
    #[serde(default)]
    pub kind: SourceKind,
    pub server_url: Option<String>,
    /// Identifier system on this source's side, e.g. its MRN system
    pub mrn_system: Option<String>,
    /// Identifier systems on launch patients that link to `mrn_system`
    #[serde(default)]
    pub launch_mrn_systems: Vec<String>,
    /// Defaults to every resource and access in every context
    pub scopes: Option<String>,
    /// Defaults to `<name>_patient_id`
    pub session_patient_key: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    /// Single process only; nothing outside the server can seed it
    Memory,
    /// Shareable with the launch flow running in another process
    #[default]
    Sqlite,
    /// Locked to the server process
    Redb,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionSettings {
    pub backend: SessionBackend,
    /// File name under `storage.data_dir`; defaults per backend
    pub db: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSettings {
    pub data_dir: PathBuf,
    pub audit_db: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSettings {
    pub level: String,
    pub format: LogFormat,
}

/// Configuration that cannot be turned into a running router
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid scope for {name}: {error}")]
    Scope { name: String, error: CoreError },

    #[error("Duplicate source name: {0}")]
    DuplicateSource(String),

    #[error("Source with empty name")]
    UnnamedSource,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for PrimarySettings {
    fn default() -> Self {
        Self {
            name: "launch".to_string(),
            scopes: "patient/*.cruds user/*.cruds system/*.cruds".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            backend: SessionBackend::Sqlite,
            db: None,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            audit_db: "audit.sqlite".to_string(),
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl SourceSettings {
    /// Session key the translated patient id is cached under
    pub fn session_key(&self) -> String {
        self.session_patient_key
            .clone()
            .unwrap_or_else(|| format!("{}_patient_id", self.name))
    }

    pub fn grant(&self) -> Result<ScopeGrant, ConfigError> {
        match &self.scopes {
            Some(text) => ScopeGrant::parse(text).map_err(|error| ConfigError::Scope {
                name: self.name.clone(),
                error,
            }),
            None => Ok(ScopeGrant::unrestricted()),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config: ServerConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = if let Some(path) = config_path {
            Self::load_from_file(path)?
        } else {
            Self::default()
        };

        // Override with environment variables
        if let Ok(port) = std::env::var("TSUNAGI_PORT")
            && let Ok(port_num) = port.parse()
        {
            config.server.port = port_num;
        }

        if let Ok(host) = std::env::var("TSUNAGI_HOST") {
            config.server.host = host;
        }

        if let Ok(data_dir) = std::env::var("TSUNAGI_DATA_DIR") {
            config.storage.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(level) = std::env::var("TSUNAGI_LOG_LEVEL") {
            config.log.level = level;
        }

        Ok(config)
    }

    pub fn primary_grant(&self) -> Result<ScopeGrant, ConfigError> {
        ScopeGrant::parse(&self.primary.scopes).map_err(|error| ConfigError::Scope {
            name: self.primary.name.clone(),
            error,
        })
    }

    /// Check source names: non-empty, unique, distinct from the primary
    pub fn check_source_names(&self) -> Result<(), ConfigError> {
        let mut seen = vec![self.primary.name.as_str()];
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(ConfigError::UnnamedSource);
            }
            if seen.contains(&source.name.as_str()) {
                return Err(ConfigError::DuplicateSource(source.name.clone()));
            }
            seen.push(&source.name);
        }
        Ok(())
    }

    /// Build the secondary sources, in configured order
    pub fn build_sources(
        &self,
        transport: Arc<dyn Transport>,
    ) -> Result<Vec<Arc<dyn SourceStrategy>>, ConfigError> {
        self.check_source_names()?;

        let mut sources: Vec<Arc<dyn SourceStrategy>> = Vec::with_capacity(self.sources.len());
        for settings in &self.sources {
            let descriptor = SourceDescriptor::from_settings(settings)?;
            let missing = descriptor.missing_identity_settings();
            if !missing.is_empty() {
                tracing::warn!(
                    source = %descriptor.name,
                    missing = %missing.join(", "),
                    "Source cannot reconcile patient identity"
                );
            }
            let source: Arc<dyn SourceStrategy> = match settings.kind {
                SourceKind::Fhir => Arc::new(SecondaryFhirStrategy::new(
                    descriptor,
                    transport.clone(),
                )),
            };
            sources.push(source);
        }
        Ok(sources)
    }

    /// Build the request router over the primary and every source
    pub fn build_router(&self, transport: Arc<dyn Transport>) -> Result<FhirRouter, ConfigError> {
        let primary = PrimarySource {
            name: self.primary.name.clone(),
            grant: self.primary_grant()?,
        };
        let sources = self.build_sources(transport.clone())?;
        Ok(FhirRouter::new(primary, sources, transport))
    }

    pub fn outbound_timeout(&self) -> Duration {
        Duration::from_secs(self.primary.timeout_secs)
    }

    /// Get the full path to the session database
    pub fn session_db_path(&self) -> PathBuf {
        let file = match (&self.session.db, self.session.backend) {
            (Some(db), _) => db.as_str(),
            (None, SessionBackend::Redb) => "sessions.redb",
            (None, _) => "sessions.sqlite",
        };
        self.storage.data_dir.join(file)
    }

    /// Open the configured session store
    pub fn open_session_store(&self) -> Result<Arc<dyn SessionStore>, StoreError> {
        let store: Arc<dyn SessionStore> = match self.session.backend {
            SessionBackend::Memory => Arc::new(MemorySessionStore::new()),
            SessionBackend::Sqlite => Arc::new(SqliteSessionStore::open(self.session_db_path())?),
            SessionBackend::Redb => Arc::new(RedbSessionStore::open(self.session_db_path())?),
        };
        Ok(store)
    }

    /// Get the full path to the audit database
    pub fn audit_db_path(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.audit_db)
    }
}
