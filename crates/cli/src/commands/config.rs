use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use callquote_core::config::{resolve_config_path, AppConfig, LoadOptions};
use toml::Value;

const REDACTED: &str = "<redacted>";
const UNSET: &str = "<unset>";

/// One printable setting: dotted key, rendered value, env override name.
struct Entry {
    key: &'static str,
    value: String,
    env_key: &'static str,
}

fn entry(key: &'static str, value: impl ToString, env_key: &'static str) -> Entry {
    Entry { key, value: value.to_string(), env_key }
}

fn secret_state(present: bool) -> &'static str {
    if present {
        REDACTED
    } else {
        UNSET
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines =
        vec!["effective config (source precedence: env > file > default):".to_string()];
    for item in entries(&config) {
        let source = field_source(
            item.key,
            item.env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(item.key, &item.value, source));
    }
    lines.join("\n")
}

fn entries(config: &AppConfig) -> Vec<Entry> {
    vec![
        entry("database.url", &config.database.url, "CALLQUOTE_DATABASE_URL"),
        entry(
            "database.max_connections",
            config.database.max_connections,
            "CALLQUOTE_DATABASE_MAX_CONNECTIONS",
        ),
        entry("database.timeout_secs", config.database.timeout_secs, "CALLQUOTE_DATABASE_TIMEOUT_SECS"),
        entry("llm.provider", config.llm.provider.as_str(), "CALLQUOTE_LLM_PROVIDER"),
        entry("llm.model", &config.llm.model, "CALLQUOTE_LLM_MODEL"),
        entry(
            "llm.base_url",
            config.llm.base_url.as_deref().unwrap_or(UNSET),
            "CALLQUOTE_LLM_BASE_URL",
        ),
        entry("llm.api_key", secret_state(config.llm.api_key.is_some()), "CALLQUOTE_LLM_API_KEY"),
        entry("llm.timeout_secs", config.llm.timeout_secs, "CALLQUOTE_LLM_TIMEOUT_SECS"),
        entry("tools.base_url", &config.tools.base_url, "CALLQUOTE_TOOLS_BASE_URL"),
        entry(
            "tools.api_key",
            secret_state(config.tools.api_key.is_some()),
            "CALLQUOTE_TOOLS_API_KEY",
        ),
        entry("tools.timeout_secs", config.tools.timeout_secs, "CALLQUOTE_TOOLS_TIMEOUT_SECS"),
        entry("server.bind_address", &config.server.bind_address, "CALLQUOTE_SERVER_BIND_ADDRESS"),
        entry("server.port", config.server.port, "CALLQUOTE_SERVER_PORT"),
        entry(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs,
            "CALLQUOTE_SERVER_GRACEFUL_SHUTDOWN_SECS",
        ),
        entry(
            "conversation.max_address_attempts",
            config.conversation.max_address_attempts,
            "CALLQUOTE_CONVERSATION_MAX_ADDRESS_ATTEMPTS",
        ),
        entry(
            "conversation.booking_window_days",
            config.conversation.booking_window_days,
            "CALLQUOTE_CONVERSATION_BOOKING_WINDOW_DAYS",
        ),
        entry(
            "conversation.max_hops_per_turn",
            config.conversation.max_hops_per_turn,
            "CALLQUOTE_CONVERSATION_MAX_HOPS_PER_TURN",
        ),
        entry(
            "conversation.slot_offer_count",
            config.conversation.slot_offer_count,
            "CALLQUOTE_CONVERSATION_SLOT_OFFER_COUNT",
        ),
        entry("logging.level", &config.logging.level, "CALLQUOTE_LOGGING_LEVEL"),
        entry("logging.format", format!("{:?}", config.logging.format).to_lowercase(), "CALLQUOTE_LOGGING_FORMAT"),
    ]
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("config file"));
            return format!("file ({})", file_path.display());
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
