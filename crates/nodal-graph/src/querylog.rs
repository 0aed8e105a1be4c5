//! Statement logging to the `nodal::query` target.

use std::collections::HashSet;

use nodal_core::config::QueryLogConfig;

use crate::session::{Param, Params, Statement};

pub const QUERY_LOG_TARGET: &str = "nodal::query";

#[derive(Debug, Clone, Default)]
pub struct QueryLog {
    enabled: bool,
    log_parameters: bool,
    log_pings: bool,
    suppressed: HashSet<String>,
}

impl QueryLog {
    pub fn new(config: &QueryLogConfig) -> Self {
        Self {
            enabled: config.enabled,
            log_parameters: config.log_parameters,
            log_pings: config.log_pings,
            suppressed: config.suppressed_parameters.iter().cloned().collect(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn statement(&self, statement: &Statement) {
        if !self.enabled || (statement.is_ping() && !self.log_pings) {
            return;
        }
        if self.log_parameters && !statement.parameters().is_empty() {
            tracing::info!(
                target: QUERY_LOG_TARGET,
                name = statement.name(),
                statement = statement.text(),
                params = %self.render(statement.parameters()),
            );
        } else {
            tracing::info!(
                target: QUERY_LOG_TARGET,
                name = statement.name(),
                statement = statement.text(),
            );
        }
    }

    /// Parameters as JSON with suppressed keys replaced by a size placeholder.
    pub fn render(&self, params: &Params) -> serde_json::Value {
        serde_json::Value::Object(
            params
                .iter()
                .map(|(k, v)| {
                    let rendered = if self.suppressed.contains(k) {
                        serde_json::Value::String(format!("<{} bytes>", param_len(v)))
                    } else {
                        self.render_param(v)
                    };
                    (k.clone(), rendered)
                })
                .collect(),
        )
    }

    fn render_param(&self, param: &Param) -> serde_json::Value {
        match param {
            Param::Null => serde_json::Value::Null,
            Param::Value(v) => serde_json::to_value(v).unwrap_or(serde_json::Value::Null),
            Param::List(items) => items.iter().map(|p| self.render_param(p)).collect(),
            Param::Map(map) => self.render(map),
        }
    }
}

fn param_len(param: &Param) -> usize {
    match param {
        Param::Null => 0,
        Param::Value(v) => v.byte_len(),
        Param::List(items) => items.iter().map(param_len).sum(),
        Param::Map(map) => map.values().map(param_len).sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::props;
    use nodal_core::Value;

    fn enabled_log() -> QueryLog {
        QueryLog::new(&QueryLogConfig {
            enabled: true,
            log_parameters: true,
            ..QueryLogConfig::default()
        })
    }

    #[test]
    fn test_suppressed_parameters_render_size_only() {
        let log = enabled_log();
        let statement = Statement::new("node.set_properties", "SET n += $props")
            .param("id", 3i64)
            .param("content", "x".repeat(2048))
            .param(
                "props",
                props([("binaryData", Value::from("abcd")), ("name", Value::from("a"))]),
            );

        let rendered = log.render(statement.parameters());
        assert_eq!(rendered["id"], 3);
        assert_eq!(rendered["content"], "<2048 bytes>");
        assert_eq!(rendered["props"]["binaryData"], "<4 bytes>");
        assert_eq!(rendered["props"]["name"], "a");
    }

    #[test]
    fn test_null_and_list_parameters() {
        let log = enabled_log();
        let mut params = Params::new();
        params.insert("gone".to_string(), Param::Null);
        params.insert(
            "ids".to_string(),
            Param::List(vec![Param::from(1i64), Param::from(2i64)]),
        );
        let rendered = log.render(&params);
        assert!(rendered["gone"].is_null());
        assert_eq!(rendered["ids"], serde_json::json!([1, 2]));
    }

    #[test]
    fn test_disabled_by_default() {
        let log = QueryLog::new(&QueryLogConfig::default());
        assert!(!log.is_enabled());
        log.statement(&Statement::ping());
    }
}
