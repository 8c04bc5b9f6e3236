use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::approvals::ApprovalPolicy;
use crate::domain::identity::Approver;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub dispatch: DispatchConfig,
    pub permissions: PermissionsConfig,
    pub approval: ApprovalPolicy,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct DispatchConfig {
    /// Approval service endpoint. Unset means approval requests are only
    /// logged, which is how local development runs.
    pub endpoint_url: Option<String>,
    pub callback_base_url: Option<String>,
    pub api_token: Option<SecretString>,
    /// Shared secret the approval service sends back on callbacks.
    pub callback_secret: Option<SecretString>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PermissionsConfig {
    pub admin_capability: String,
    pub edit_capability: String,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub server_port: Option<u16>,
    pub dispatch_endpoint_url: Option<String>,
    pub dispatch_api_token: Option<String>,
    pub dispatch_callback_secret: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://equiptrack.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            dispatch: DispatchConfig {
                endpoint_url: None,
                callback_base_url: None,
                api_token: None,
                callback_secret: None,
                timeout_secs: 10,
            },
            permissions: PermissionsConfig {
                admin_capability: "ticket.admin".to_string(),
                edit_capability: "ticket.edit".to_string(),
            },
            approval: ApprovalPolicy::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("equiptrack.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(dispatch) = patch.dispatch {
            if let Some(endpoint_url) = dispatch.endpoint_url {
                self.dispatch.endpoint_url = Some(endpoint_url);
            }
            if let Some(callback_base_url) = dispatch.callback_base_url {
                self.dispatch.callback_base_url = Some(callback_base_url);
            }
            if let Some(api_token) = dispatch.api_token {
                self.dispatch.api_token = Some(secret_value(api_token));
            }
            if let Some(callback_secret) = dispatch.callback_secret {
                self.dispatch.callback_secret = Some(secret_value(callback_secret));
            }
            if let Some(timeout_secs) = dispatch.timeout_secs {
                self.dispatch.timeout_secs = timeout_secs;
            }
        }

        if let Some(permissions) = patch.permissions {
            if let Some(admin_capability) = permissions.admin_capability {
                self.permissions.admin_capability = admin_capability;
            }
            if let Some(edit_capability) = permissions.edit_capability {
                self.permissions.edit_capability = edit_capability;
            }
        }

        if let Some(approval) = patch.approval {
            if let Some(department_head) = approval.department_head {
                self.approval.department_head = department_head;
            }
            if let Some(financial_controller) = approval.financial_controller {
                self.approval.financial_controller = financial_controller;
            }
            if let Some(export_acknowledger) = approval.export_acknowledger {
                self.approval.export_acknowledger = export_acknowledger;
            }
            if let Some(export_sender) = approval.export_sender {
                self.approval.export_sender = export_sender;
            }
            if let Some(default_supervisor) = approval.default_supervisor {
                self.approval.default_supervisor = default_supervisor;
            }
            self.approval.unit_supervisors.extend(approval.unit_supervisors);
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("EQUIPTRACK_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("EQUIPTRACK_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("EQUIPTRACK_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("EQUIPTRACK_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("EQUIPTRACK_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("EQUIPTRACK_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("EQUIPTRACK_SERVER_PORT") {
            self.server.port = parse_u16("EQUIPTRACK_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("EQUIPTRACK_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("EQUIPTRACK_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("EQUIPTRACK_DISPATCH_ENDPOINT_URL") {
            self.dispatch.endpoint_url = Some(value);
        }
        if let Some(value) = read_env("EQUIPTRACK_DISPATCH_CALLBACK_BASE_URL") {
            self.dispatch.callback_base_url = Some(value);
        }
        if let Some(value) = read_env("EQUIPTRACK_DISPATCH_API_TOKEN") {
            self.dispatch.api_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("EQUIPTRACK_DISPATCH_CALLBACK_SECRET") {
            self.dispatch.callback_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("EQUIPTRACK_DISPATCH_TIMEOUT_SECS") {
            self.dispatch.timeout_secs = parse_u64("EQUIPTRACK_DISPATCH_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("EQUIPTRACK_PERMISSIONS_ADMIN_CAPABILITY") {
            self.permissions.admin_capability = value;
        }
        if let Some(value) = read_env("EQUIPTRACK_PERMISSIONS_EDIT_CAPABILITY") {
            self.permissions.edit_capability = value;
        }

        let log_level =
            read_env("EQUIPTRACK_LOGGING_LEVEL").or_else(|| read_env("EQUIPTRACK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("EQUIPTRACK_LOGGING_FORMAT").or_else(|| read_env("EQUIPTRACK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(endpoint_url) = overrides.dispatch_endpoint_url {
            self.dispatch.endpoint_url = Some(endpoint_url);
        }
        if let Some(api_token) = overrides.dispatch_api_token {
            self.dispatch.api_token = Some(secret_value(api_token));
        }
        if let Some(callback_secret) = overrides.dispatch_callback_secret {
            self.dispatch.callback_secret = Some(secret_value(callback_secret));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_dispatch(&self.dispatch)?;
        validate_permissions(&self.permissions)?;
        validate_approval(&self.approval)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("equiptrack.toml"), PathBuf::from("config/equiptrack.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn validate_dispatch(dispatch: &DispatchConfig) -> Result<(), ConfigError> {
    if let Some(endpoint_url) = &dispatch.endpoint_url {
        if !is_http_url(endpoint_url) {
            return Err(ConfigError::Validation(
                "dispatch.endpoint_url must start with http:// or https://".to_string(),
            ));
        }
        if dispatch.callback_base_url.is_none() {
            return Err(ConfigError::Validation(
                "dispatch.callback_base_url is required when dispatch.endpoint_url is set; the approval service needs an address to report decisions to".to_string(),
            ));
        }
    }

    if let Some(base_url) = &dispatch.callback_base_url {
        if !is_http_url(base_url) {
            return Err(ConfigError::Validation(
                "dispatch.callback_base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    let blank_secret = dispatch
        .callback_secret
        .as_ref()
        .map(|secret| secret.expose_secret().trim().is_empty())
        .unwrap_or(false);
    if blank_secret {
        return Err(ConfigError::Validation(
            "dispatch.callback_secret must not be blank; remove it to disable callback authentication".to_string(),
        ));
    }

    if dispatch.timeout_secs == 0 || dispatch.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "dispatch.timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    Ok(())
}

fn validate_permissions(permissions: &PermissionsConfig) -> Result<(), ConfigError> {
    if permissions.admin_capability.trim().is_empty()
        || permissions.edit_capability.trim().is_empty()
    {
        return Err(ConfigError::Validation(
            "permissions.admin_capability and permissions.edit_capability must be set"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_approver(field: &str, approver: &Approver) -> Result<(), ConfigError> {
    if approver.user_id.0.trim().is_empty() {
        return Err(ConfigError::Validation(format!("{field}.user_id must not be empty")));
    }
    Ok(())
}

fn validate_approval(policy: &ApprovalPolicy) -> Result<(), ConfigError> {
    validate_approver("approval.department_head", &policy.department_head)?;
    validate_approver("approval.financial_controller", &policy.financial_controller)?;
    validate_approver("approval.export_acknowledger", &policy.export_acknowledger)?;
    validate_approver("approval.export_sender", &policy.export_sender)?;
    validate_approver("approval.default_supervisor", &policy.default_supervisor)?;
    for (unit, supervisor) in &policy.unit_supervisors {
        validate_approver(&format!("approval.unit_supervisors.{unit}"), supervisor)?;
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    dispatch: Option<DispatchPatch>,
    permissions: Option<PermissionsPatch>,
    approval: Option<ApprovalPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct DispatchPatch {
    endpoint_url: Option<String>,
    callback_base_url: Option<String>,
    api_token: Option<String>,
    callback_secret: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PermissionsPatch {
    admin_capability: Option<String>,
    edit_capability: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApprovalPatch {
    department_head: Option<Approver>,
    financial_controller: Option<Approver>,
    export_acknowledger: Option<Approver>,
    export_sender: Option<Approver>,
    default_supervisor: Option<Approver>,
    #[serde(default)]
    unit_supervisors: BTreeMap<String, Approver>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
