use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use equiptrack_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

/// Renders the effective configuration with the source of every value.
/// Secrets are never printed.
pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec![
        "effective config (source precedence: overrides > env > file > default):".to_string()
    ];
    for (key, value) in effective_values(&config) {
        let source = field_source(key, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }
    lines.join("\n")
}

fn effective_values(config: &AppConfig) -> Vec<(&'static str, String)> {
    let approval = &config.approval;
    let mut values = vec![
        ("database.url", config.database.url.clone()),
        ("database.max_connections", config.database.max_connections.to_string()),
        ("database.timeout_secs", config.database.timeout_secs.to_string()),
        ("server.bind_address", config.server.bind_address.clone()),
        ("server.port", config.server.port.to_string()),
        ("server.graceful_shutdown_secs", config.server.graceful_shutdown_secs.to_string()),
        ("dispatch.endpoint_url", optional(config.dispatch.endpoint_url.as_deref())),
        ("dispatch.callback_base_url", optional(config.dispatch.callback_base_url.as_deref())),
        ("dispatch.api_token", redact(config.dispatch.api_token.as_ref())),
        ("dispatch.callback_secret", redact(config.dispatch.callback_secret.as_ref())),
        ("dispatch.timeout_secs", config.dispatch.timeout_secs.to_string()),
        ("permissions.admin_capability", config.permissions.admin_capability.clone()),
        ("permissions.edit_capability", config.permissions.edit_capability.clone()),
        ("approval.department_head", approval.department_head.user_id.0.clone()),
        ("approval.financial_controller", approval.financial_controller.user_id.0.clone()),
        ("approval.export_acknowledger", approval.export_acknowledger.user_id.0.clone()),
        ("approval.export_sender", approval.export_sender.user_id.0.clone()),
        ("approval.default_supervisor", approval.default_supervisor.user_id.0.clone()),
        ("logging.level", config.logging.level.clone()),
        ("logging.format", format!("{:?}", config.logging.format).to_lowercase()),
    ];
    if !approval.unit_supervisors.is_empty() {
        let supervisors = approval
            .unit_supervisors
            .iter()
            .map(|(unit, approver)| format!("{unit}={}", approver.user_id.0))
            .collect::<Vec<_>>()
            .join(", ");
        values.push(("approval.unit_supervisors", supervisors));
    }
    values
}

fn optional(value: Option<&str>) -> String {
    value.unwrap_or("<unset>").to_string()
}

fn redact(secret: Option<&SecretString>) -> String {
    match secret {
        Some(secret) if secret.expose_secret().trim().is_empty() => "<empty>".to_string(),
        Some(_) => "<redacted>".to_string(),
        None => "<unset>".to_string(),
    }
}

/// `database.max_connections` is read from `EQUIPTRACK_DATABASE_MAX_CONNECTIONS`.
fn env_key(key_path: &str) -> String {
    format!("EQUIPTRACK_{}", key_path.replace('.', "_").to_ascii_uppercase())
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("equiptrack.toml"), PathBuf::from("config/equiptrack.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    let env_key = env_key(key_path);
    if env::var_os(&env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

#[cfg(test)]
mod tests {
    use equiptrack_core::config::AppConfig;
    use toml::Value;

    use super::{contains_path, effective_values, env_key};

    #[test]
    fn secrets_are_never_rendered() {
        let mut config = AppConfig::default();
        config.dispatch.api_token = Some("bearer-value".to_string().into());

        let values = effective_values(&config);

        let token = values.iter().find(|(key, _)| *key == "dispatch.api_token").expect("token");
        assert_eq!(token.1, "<redacted>");
        let secret =
            values.iter().find(|(key, _)| *key == "dispatch.callback_secret").expect("secret");
        assert_eq!(secret.1, "<unset>");
        assert!(values.iter().all(|(_, value)| !value.contains("bearer-value")));
    }

    #[test]
    fn env_keys_follow_section_and_field() {
        assert_eq!(env_key("dispatch.callback_base_url"), "EQUIPTRACK_DISPATCH_CALLBACK_BASE_URL");
        assert_eq!(env_key("server.port"), "EQUIPTRACK_SERVER_PORT");
    }

    #[test]
    fn nested_file_keys_are_detected() {
        let doc: Value = "[dispatch]\nendpoint_url = \"https://approvals.local\"\n"
            .parse()
            .expect("toml");

        assert!(contains_path(&doc, "dispatch.endpoint_url"));
        assert!(!contains_path(&doc, "dispatch.timeout_secs"));
    }
}
