//! Engine configuration assembly
//!
//! The control plane sends the user-facing configuration; the node adds the
//! sections it needs to manage the engine (control API, stats, counters
//! policy, log level). This step is pure: no I/O, same input, same bytes.

use serde_json::{json, Map, Value};

use crate::change::canonical_bytes;
use crate::config::EngineConfig;
use crate::error::LifecycleError;

/// Control API services the node relies on
pub const API_SERVICES: [&str; 3] = ["HandlerService", "StatsService", "RoutingService"];

/// Values injected into every engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectedSections {
    pub api_listen: String,
    pub api_tag: String,
    pub log_level: String,
}

impl InjectedSections {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            api_listen: config.api_listen.clone(),
            api_tag: config.api_tag.clone(),
            log_level: config.log_level.clone(),
        }
    }
}

impl Default for InjectedSections {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

fn into_object(value: Option<Value>) -> Map<String, Value> {
    match value {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

fn enable_flags(map: &mut Map<String, Value>, keys: &[&str]) {
    for key in keys {
        map.insert((*key).to_string(), Value::Bool(true));
    }
}

/// Merge `config` with the node's control sections into canonical bytes
///
/// - `stats` is replaced with an empty object (enables counters)
/// - `api` is replaced with the node's control API definition
/// - `policy.levels."0"` and `policy.system` gain the counter switches,
///   other policy fields are preserved
/// - `log.loglevel` is set only when the caller sent no `log` section
///
/// # Errors
///
/// Returns `LifecycleError::ConfigMerge` if `config` is not a JSON object.
pub fn build_engine_config(
    config: &Value,
    sections: &InjectedSections,
) -> Result<Vec<u8>, LifecycleError> {
    let Value::Object(source) = config else {
        return Err(LifecycleError::merge(format!(
            "configuration must be a JSON object, got {}",
            kind_of(config)
        )));
    };

    let mut merged = source.clone();

    merged.insert("stats".into(), json!({}));
    merged.insert(
        "api".into(),
        json!({
            "services": API_SERVICES,
            "listen": sections.api_listen,
            "tag": sections.api_tag,
        }),
    );

    let mut policy = into_object(merged.remove("policy"));
    let mut levels = into_object(policy.remove("levels"));
    let mut level0 = into_object(levels.remove("0"));
    enable_flags(
        &mut level0,
        &["statsUserUplink", "statsUserDownlink", "statsUserOnline"],
    );
    levels.insert("0".into(), Value::Object(level0));
    policy.insert("levels".into(), Value::Object(levels));

    let mut system = into_object(policy.remove("system"));
    enable_flags(
        &mut system,
        &[
            "statsInboundDownlink",
            "statsInboundUplink",
            "statsOutboundDownlink",
            "statsOutboundUplink",
        ],
    );
    policy.insert("system".into(), Value::Object(system));
    merged.insert("policy".into(), Value::Object(policy));

    if !merged.contains_key("log") {
        merged.insert("log".into(), json!({ "loglevel": sections.log_level }));
    }

    canonical_bytes(&Value::Object(merged)).map_err(|e| LifecycleError::merge(e.to_string()))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
