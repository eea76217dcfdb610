//! Server configuration files.
//!
//! Renders the file set stored in the server's ConfigMap. Every output is a
//! pure function of the server spec and the configured RCON password, so repeated
//! renders compare equal and the ConfigMap only changes when the server spec does.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::crd::{AccessMode, MinecraftServerSpec, Player};

pub const SERVER_PROPERTIES: &str = "server.properties";
pub const EULA: &str = "eula.txt";
pub const WHITELIST: &str = "whitelist.json";
pub const OPS: &str = "ops.json";
pub const EXPORTER_CONFIG: &str = "prometheus_exporter_config.yaml";

/// Port the Prometheus exporter plugin listens on.
pub const EXPORTER_PORT: u16 = 9225;

const OP_LEVEL: u8 = 4;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to encode {file}: {source}")]
    Json {
        file: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode {file}: {source}")]
    Yaml {
        file: &'static str,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Renders configuration files for a server.
#[derive(Debug, Clone)]
pub struct ConfigRenderer {
    rcon_password: String,
}

impl ConfigRenderer {
    pub fn new(rcon_password: impl Into<String>) -> Self {
        Self {
            rcon_password: rcon_password.into(),
        }
    }

    /// Render every file for `spec`, keyed by file name.
    pub fn render(
        &self,
        spec: &MinecraftServerSpec,
    ) -> Result<BTreeMap<String, String>, RenderError> {
        let mut files = BTreeMap::new();

        files.insert(SERVER_PROPERTIES.to_string(), self.server_properties(spec));
        files.insert(EULA.to_string(), eula(spec));

        if !spec.allow_list.is_empty() {
            let body = serde_json::to_string(&spec.allow_list)
                .map_err(|source| RenderError::Json { file: WHITELIST, source })?;
            files.insert(WHITELIST.to_string(), body);
        }

        if !spec.ops_list.is_empty() {
            let ops: Vec<OpEntry<'_>> = spec.ops_list.iter().map(OpEntry::from).collect();
            let body = serde_json::to_string(&ops)
                .map_err(|source| RenderError::Json { file: OPS, source })?;
            files.insert(OPS.to_string(), body);
        }

        if spec.monitoring_enabled() {
            let body = serde_yaml::to_string(&ExporterConfig::default())
                .map_err(|source| RenderError::Yaml { file: EXPORTER_CONFIG, source })?;
            files.insert(EXPORTER_CONFIG.to_string(), body);
        }

        Ok(files)
    }

    /// Render `server.properties`.
    pub fn server_properties(&self, spec: &MinecraftServerSpec) -> String {
        let mut props = Properties::default();

        props.set("enable-rcon", "true");
        props.set("rcon.password", &self.rcon_password);

        if !spec.motd.is_empty() {
            props.set("motd", &spec.motd);
        }
        if let Some(distance) = spec.view_distance.filter(|d| *d > 0) {
            props.set("view-distance", &distance.to_string());
        }
        if let Some(players) = spec.max_players.filter(|p| *p > 0) {
            props.set("max-players", &players.to_string());
        }
        if let Some(mode) = spec.game_mode {
            props.set("gamemode", mode.as_property());
        }
        if spec.access_mode == AccessMode::AllowListOnly {
            props.set("enforce-whitelist", "true");
            props.set("white-list", "true");
        }
        if let Some(seed) = spec.world.as_ref().and_then(|w| w.seed.as_deref()) {
            props.set("level-seed", seed);
        }

        props.to_string()
    }
}

fn eula(spec: &MinecraftServerSpec) -> String {
    format!("eula={}", spec.eula_accepted())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OpEntry<'a> {
    #[serde(skip_serializing_if = "str::is_empty")]
    uuid: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    name: &'a str,
    level: u8,
    bypasses_player_limit: bool,
}

impl<'a> From<&'a Player> for OpEntry<'a> {
    fn from(player: &'a Player) -> Self {
        Self {
            uuid: &player.uuid,
            name: &player.name,
            level: OP_LEVEL,
            bypasses_player_limit: false,
        }
    }
}

#[derive(Serialize)]
struct ExporterConfig {
    host: &'static str,
    port: u16,
    enable_metrics: BTreeMap<&'static str, bool>,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        let enable_metrics = [
            ("jvm_threads", true),
            ("jvm_gc", true),
            ("players_total", true),
            ("entities_total", true),
            ("living_entities_total", true),
            ("loaded_chunks_total", true),
            ("jvm_memory", true),
            ("players_online_total", true),
            ("tps", true),
            ("tick_duration_average", true),
            ("tick_duration_median", true),
            ("tick_duration_min", false),
            ("tick_duration_max", true),
            ("player_online", false),
            ("player_statistic", false),
        ]
        .into_iter()
        .collect();

        Self {
            host: "0.0.0.0",
            port: EXPORTER_PORT,
            enable_metrics,
        }
    }
}

/// Sorted `key=value` lines in Java properties format.
#[derive(Debug, Default)]
struct Properties(BTreeMap<String, String>);

impl Properties {
    fn set(&mut self, key: &str, value: &str) {
        self.0.insert(key.to_string(), value.to_string());
    }
}

impl std::fmt::Display for Properties {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (key, value) in &self.0 {
            writeln!(f, "{}={}", escape(key, true), escape(value, false))?;
        }
        Ok(())
    }
}

fn escape(raw: &str, is_key: bool) -> String {
    let mut out = String::with_capacity(raw.len());
    for (i, c) in raw.chars().enumerate() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '=' | ':' | '#' | '!' => {
                out.push('\\');
                out.push(c);
            }
            ' ' if is_key || i == 0 => out.push_str("\\ "),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::crd::{GameMode, MonitoringSpec, MonitoringType, WorldSpec};

    fn spec(value: serde_json::Value) -> MinecraftServerSpec {
        serde_json::from_value(value).unwrap()
    }

    fn renderer() -> ConfigRenderer {
        ConfigRenderer::new("hunter2")
    }

    #[test]
    fn test_minimal_public_server() {
        let spec = spec(serde_json::json!({"eula": "Accepted", "accessMode": "Public"}));
        let files = renderer().render(&spec).unwrap();

        assert_eq!(files.len(), 2);
        assert_eq!(files[EULA], "eula=true");
        assert_eq!(
            files[SERVER_PROPERTIES],
            "enable-rcon=true\nrcon.password=hunter2\n"
        );
    }

    #[test]
    fn test_eula_not_accepted_still_rendered() {
        let spec = spec(serde_json::json!({"eula": "NotAccepted"}));
        let files = renderer().render(&spec).unwrap();
        assert_eq!(files[EULA], "eula=false");
    }

    #[test]
    fn test_allow_list_and_ops() {
        let spec = spec(serde_json::json!({
            "eula": "Accepted",
            "allowList": [{"name": "Alice"}],
            "opsList": [{"name": "Bob", "uuid": "8667ba71-b85a-4004-af54-457a9734eed7"}]
        }));
        let files = renderer().render(&spec).unwrap();

        assert_eq!(files[WHITELIST], r#"[{"name":"Alice"}]"#);
        assert_eq!(
            files[OPS],
            r#"[{"uuid":"8667ba71-b85a-4004-af54-457a9734eed7","name":"Bob","level":4,"bypassesPlayerLimit":false}]"#
        );

        let props = &files[SERVER_PROPERTIES];
        assert!(props.contains("enforce-whitelist=true\n"));
        assert!(props.contains("white-list=true\n"));
    }

    #[test]
    fn test_optional_properties() {
        let mut spec = spec(serde_json::json!({"eula": "Accepted", "accessMode": "Public"}));
        spec.motd = "Welcome: all".to_string();
        spec.game_mode = Some(GameMode::Creative);
        spec.max_players = Some(0);
        spec.view_distance = Some(12);
        spec.world = Some(WorldSpec {
            seed: Some("-42".to_string()),
            ..Default::default()
        });

        let props = renderer().server_properties(&spec);

        assert_eq!(
            props,
            "enable-rcon=true\n\
             gamemode=creative\n\
             level-seed=-42\n\
             motd=Welcome\\: all\n\
             rcon.password=hunter2\n\
             view-distance=12\n"
        );
    }

    #[test]
    fn test_exporter_config_only_when_monitored() {
        let mut spec = spec(serde_json::json!({"eula": "Accepted"}));
        spec.monitoring = Some(MonitoringSpec {
            monitoring_type: MonitoringType::Disabled,
        });
        assert!(!renderer().render(&spec).unwrap().contains_key(EXPORTER_CONFIG));

        spec.monitoring = Some(MonitoringSpec {
            monitoring_type: MonitoringType::PrometheusServiceMonitor,
        });
        let files = renderer().render(&spec).unwrap();
        let config: serde_yaml::Value = serde_yaml::from_str(&files[EXPORTER_CONFIG]).unwrap();

        assert_eq!(config["host"].as_str(), Some("0.0.0.0"));
        assert_eq!(config["port"].as_u64(), Some(9225));
        assert_eq!(config["enable_metrics"]["tps"].as_bool(), Some(true));
        assert_eq!(config["enable_metrics"]["player_statistic"].as_bool(), Some(false));
    }

    #[test]
    fn test_render_is_deterministic() {
        let spec = spec(serde_json::json!({
            "eula": "Accepted",
            "motd": "hi",
            "allowList": [{"name": "Alice"}, {"uuid": "u-2"}]
        }));
        assert_eq!(renderer().render(&spec).unwrap(), renderer().render(&spec).unwrap());
    }

    #[rstest]
    #[case("plain", false, "plain")]
    #[case("a=b", false, "a\\=b")]
    #[case(" lead", false, "\\ lead")]
    #[case("in side", false, "in side")]
    #[case("in side", true, "in\\ side")]
    #[case("line\nbreak", false, "line\\nbreak")]
    #[case("c:\\dir", false, "c\\:\\\\dir")]
    fn test_escape(#[case] raw: &str, #[case] is_key: bool, #[case] expected: &str) {
        assert_eq!(escape(raw, is_key), expected);
    }
}
