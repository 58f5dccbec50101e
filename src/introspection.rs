use serde::{Deserialize, Serialize};

use crate::error::{HostError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortFlow {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    Control,
    Audio,
    Atom,
    Cv,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DeclaredRange {
    pub min: Option<f32>,
    pub max: Option<f32>,
    pub default: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortProperties {
    pub toggled: bool,
    pub integer: bool,
    pub enumeration: bool,
    pub logarithmic: bool,
    pub sample_rate: bool,
    pub not_on_gui: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalePointInfo {
    pub value: f32,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortInfo {
    pub index: u32,
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
    pub kind: PortKind,
    pub flow: PortFlow,
    #[serde(default)]
    pub range: DeclaredRange,
    #[serde(default)]
    pub properties: PortProperties,
    #[serde(default)]
    pub scale_points: Vec<ScalePointInfo>,
    #[serde(default)]
    pub group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyInfo {
    pub uri: String,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    /// `rdfs:range` type URIs, first supported one wins.
    #[serde(default)]
    pub ranges: Vec<String>,
    #[serde(default)]
    pub range: DeclaredRange,
    #[serde(default)]
    pub scale_points: Vec<ScalePointInfo>,
    #[serde(default)]
    pub writable: bool,
    #[serde(default)]
    pub readable: bool,
}

pub trait PluginIntrospection {
    fn plugin_uri(&self) -> &str;
    fn plugin_name(&self) -> &str;
    fn ports(&self) -> &[PortInfo];
    fn properties(&self) -> &[PropertyInfo];
}

/// Plugin metadata held in memory, for hosts that resolve it once and cache
/// it (or describe it in JSON).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginMetadata {
    pub uri: String,
    pub name: String,
    #[serde(default)]
    pub ports: Vec<PortInfo>,
    #[serde(default)]
    pub properties: Vec<PropertyInfo>,
}

impl PluginMetadata {
    pub fn new(uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
            ports: vec![],
            properties: vec![],
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| HostError::Config(format!("Invalid plugin metadata: {e}")))
    }

    pub fn with_port(mut self, port: PortInfo) -> Self {
        self.ports.push(port);
        self
    }

    pub fn with_property(mut self, property: PropertyInfo) -> Self {
        self.properties.push(property);
        self
    }
}

impl PluginIntrospection for PluginMetadata {
    fn plugin_uri(&self) -> &str {
        &self.uri
    }

    fn plugin_name(&self) -> &str {
        &self.name
    }

    fn ports(&self) -> &[PortInfo] {
        &self.ports
    }

    fn properties(&self) -> &[PropertyInfo] {
        &self.properties
    }
}

impl PortInfo {
    pub fn control_input(index: u32, symbol: impl Into<String>, range: DeclaredRange) -> Self {
        Self {
            index,
            symbol: symbol.into(),
            name: None,
            kind: PortKind::Control,
            flow: PortFlow::Input,
            range,
            properties: PortProperties::default(),
            scale_points: vec![],
            group: None,
        }
    }

    pub fn is_control(&self) -> bool {
        self.kind == PortKind::Control
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_from_json() {
        let json = r#"{
            "uri": "urn:example:synth",
            "name": "Synth X",
            "ports": [
                {"index": 0, "symbol": "out", "kind": "audio", "flow": "output"},
                {"index": 1, "symbol": "gain", "kind": "control", "flow": "input",
                 "range": {"min": 0.0, "max": 2.0, "default": 1.0},
                 "properties": {"logarithmic": true}}
            ],
            "properties": [
                {"uri": "urn:example:sample", "ranges": ["http://lv2plug.in/ns/ext/atom#Path"],
                 "writable": true}
            ]
        }"#;
        let meta = PluginMetadata::from_json_str(json).unwrap();
        assert_eq!(meta.plugin_name(), "Synth X");
        assert_eq!(meta.ports().len(), 2);
        assert!(!meta.ports()[0].is_control());
        assert!(meta.ports()[1].properties.logarithmic);
        assert_eq!(meta.ports()[1].range.max, Some(2.0));
        assert!(meta.properties()[0].writable);
        assert!(!meta.properties()[0].readable);
    }

    #[test]
    fn invalid_json_is_a_config_error() {
        let err = PluginMetadata::from_json_str("{").unwrap_err();
        assert!(matches!(err, HostError::Config(_)));
    }
}
