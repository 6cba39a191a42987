use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use leadflow_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

struct FieldSource<'a> {
    doc: Option<&'a Value>,
    path: Option<&'a Path>,
}

impl FieldSource<'_> {
    fn line(&self, key_path: &str, value: &str) -> String {
        let env_key = format!("LEADFLOW_{}", key_path.replace('.', "_").to_ascii_uppercase());
        format!("- {key_path} = {value} (source: {})", self.describe(key_path, &env_key))
    }

    fn describe(&self, key_path: &str, env_key: &str) -> String {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }

        if let Some(doc) = self.doc {
            if contains_path(doc, key_path) {
                let file_path = self
                    .path
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| "config file".to_string());
                return format!("file ({file_path})");
            }
        }

        "default".to_string()
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = FieldSource { doc: config_file_doc.as_ref(), path: config_file_path.as_deref() };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(source.line("database.url", &config.database.url));
    lines.push(source.line("database.max_connections", &config.database.max_connections.to_string()));
    lines.push(source.line("database.timeout_secs", &config.database.timeout_secs.to_string()));

    lines.push(source.line("llm.provider", &format!("{:?}", config.llm.provider)));
    lines.push(source.line("llm.model", &config.llm.model));
    lines.push(source.line("llm.base_url", config.llm.base_url.as_deref().unwrap_or("<unset>")));
    let api_key = config.llm.api_key.as_ref().map(|key| redact_secret(key.expose_secret()));
    lines.push(source.line("llm.api_key", api_key.as_deref().unwrap_or("<unset>")));
    lines.push(source.line("llm.timeout_secs", &config.llm.timeout_secs.to_string()));

    let engine = &config.engine;
    lines.push(source.line("engine.history_window", &engine.history_window.to_string()));
    lines.push(source.line(
        "engine.classification_timeout_secs",
        &engine.classification_timeout_secs.to_string(),
    ));
    lines.push(source.line(
        "engine.lead_judgment_timeout_secs",
        &engine.lead_judgment_timeout_secs.to_string(),
    ));
    lines.push(
        source.line("engine.generation_timeout_secs", &engine.generation_timeout_secs.to_string()),
    );
    lines.push(source.line("engine.lead_judgment_enabled", &engine.lead_judgment_enabled.to_string()));
    lines.push(source.line("engine.training_max_attempts", &engine.training_max_attempts.to_string()));
    lines.push(source.line(
        "engine.training_initial_backoff_ms",
        &engine.training_initial_backoff_ms.to_string(),
    ));

    lines.push(source.line("server.bind_address", &config.server.bind_address));
    lines.push(source.line("server.port", &config.server.port.to_string()));
    lines.push(source.line(
        "server.graceful_shutdown_secs",
        &config.server.graceful_shutdown_secs.to_string(),
    ));
    let admin_token = config.server.admin_token.as_ref().map(|_| "<redacted>");
    lines.push(source.line("server.admin_token", admin_token.unwrap_or("<unset>")));

    lines.push(source.line("logging.level", &config.logging.level));
    lines.push(source.line("logging.format", &format!("{:?}", config.logging.format)));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("leadflow.toml"), PathBuf::from("config/leadflow.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
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

/// Keeps a short provider prefix such as `sk-` so operators can tell keys apart.
fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    match trimmed.split_once('-') {
        Some((prefix, _)) if prefix.len() <= 4 => format!("{prefix}-***"),
        _ => "<redacted>".to_string(),
    }
}
