use std::collections::HashMap;

use tracing::{debug, warn};

use crate::codec::{Value, ValueType};
use crate::error::{HostError, Result};
use crate::host::{IdentifierMap, Urid};
use crate::introspection::{
    DeclaredRange, PluginIntrospection, PortFlow, PortInfo, PropertyInfo, ScalePointInfo,
};
use crate::state::sanitize;

pub type ControlId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlKind {
    Port { index: u32 },
    Property { urid: Urid },
}

/// Range in native units (sample-rate ports already scaled).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Range {
    pub min: Option<f32>,
    pub max: Option<f32>,
    pub default: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScalePoint {
    pub value: f32,
    pub label: String,
}

/// How a control wants to be rendered, picked once at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presentation {
    Toggle,
    Enumeration,
    LogarithmicSlider,
    LinearSlider,
    FileChooser,
    TextEntry,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlDescriptor {
    pub kind: ControlKind,
    pub symbol: String,
    pub label: String,
    pub property_uri: Option<String>,
    pub value_type: ValueType,
    pub range: Range,
    pub is_toggle: bool,
    pub is_integer: bool,
    pub is_enumeration: bool,
    pub is_logarithmic: bool,
    pub is_writable: bool,
    pub is_readable: bool,
    pub scale_points: Vec<ScalePoint>,
    pub group: Option<String>,
    pub presentation: Presentation,
}

impl ControlDescriptor {
    pub fn port_index(&self) -> Option<u32> {
        match self.kind {
            ControlKind::Port { index } => Some(index),
            ControlKind::Property { .. } => None,
        }
    }

    pub fn property(&self) -> Option<Urid> {
        match self.kind {
            ControlKind::Property { urid } => Some(urid),
            ControlKind::Port { .. } => None,
        }
    }

    pub fn persist_key(&self) -> &str {
        self.property_uri.as_deref().unwrap_or(&self.symbol)
    }

    pub fn default_value(&self) -> Option<Value> {
        match self.value_type {
            ValueType::String => Some(Value::String(String::new())),
            ValueType::Path => None,
            numeric => Value::from_f32(numeric, self.range.default.or(self.range.min)?),
        }
    }

    /// Slider step: whole numbers for integer controls, 1/100 of the span
    /// otherwise.
    pub fn step(&self) -> f32 {
        if self.is_integer || self.is_toggle {
            return 1.0;
        }
        let min = self.range.min.unwrap_or(0.0);
        let max = self.range.max.unwrap_or(1.0);
        ((max - min) / 100.0).abs().max(f32::EPSILON)
    }

    pub fn clamp(&self, value: f32) -> f32 {
        let mut value = value;
        if let Some(min) = self.range.min {
            value = value.max(min);
        }
        if let Some(max) = self.range.max {
            value = value.min(max);
        }
        value
    }

    pub fn scale_point_label(&self, value: f32) -> Option<&str> {
        self.scale_points
            .iter()
            .find(|p| p.value == value)
            .map(|p| p.label.as_str())
    }
}

pub fn select_presentation(
    value_type: ValueType,
    is_toggle: bool,
    is_enumeration: bool,
    is_logarithmic: bool,
) -> Presentation {
    match value_type {
        ValueType::Path => return Presentation::FileChooser,
        ValueType::String => return Presentation::TextEntry,
        _ => {}
    }
    if is_toggle {
        Presentation::Toggle
    } else if is_enumeration {
        Presentation::Enumeration
    } else if is_logarithmic {
        Presentation::LogarithmicSlider
    } else {
        Presentation::LinearSlider
    }
}

fn collect_scale_points(points: &[ScalePointInfo]) -> Vec<ScalePoint> {
    let mut out: Vec<ScalePoint> = Vec::with_capacity(points.len());
    for point in points {
        if !point.value.is_finite() || out.iter().any(|p| p.value == point.value) {
            continue;
        }
        out.push(ScalePoint {
            value: point.value,
            label: point.label.clone(),
        });
    }
    out.sort_by(|a, b| a.value.total_cmp(&b.value));
    out
}

fn scaled(range: DeclaredRange, sample_rate: f64) -> Range {
    let scale = |v: Option<f32>| v.map(|v| (v as f64 * sample_rate) as f32);
    Range {
        min: scale(range.min),
        max: scale(range.max),
        default: range.default,
    }
}

pub fn build_port_control(port: &PortInfo, sample_rate: f64) -> Result<ControlDescriptor> {
    if !port.is_control() {
        return Err(HostError::UnsupportedValueType {
            control: port.symbol.clone(),
            type_uri: None,
        });
    }
    let props = &port.properties;
    let range = if props.sample_rate {
        scaled(port.range, sample_rate)
    } else {
        Range {
            min: port.range.min,
            max: port.range.max,
            default: port.range.default,
        }
    };
    let value_type = ValueType::Float;
    Ok(ControlDescriptor {
        kind: ControlKind::Port { index: port.index },
        symbol: port.symbol.clone(),
        label: port.name.clone().unwrap_or_else(|| port.symbol.clone()),
        property_uri: None,
        value_type,
        range,
        is_toggle: props.toggled,
        is_integer: props.integer,
        is_enumeration: props.enumeration,
        is_logarithmic: props.logarithmic,
        is_writable: port.flow == PortFlow::Input,
        is_readable: port.flow == PortFlow::Output,
        scale_points: collect_scale_points(&port.scale_points),
        group: port.group.clone(),
        presentation: select_presentation(
            value_type,
            props.toggled,
            props.enumeration,
            props.logarithmic,
        ),
    })
}

/// Symbol for a property that does not declare one: the URI fragment or last
/// path segment.
pub fn symbol_from_uri(uri: &str) -> String {
    let tail = uri
        .rsplit(['#', '/', ':'])
        .find(|segment| !segment.is_empty())
        .unwrap_or(uri);
    sanitize(tail)
}

pub fn build_property_control(
    property: &PropertyInfo,
    map: &dyn IdentifierMap,
) -> Result<ControlDescriptor> {
    let value_type = ValueType::ALL
        .into_iter()
        .find(|t| property.ranges.iter().any(|r| r == t.uri()))
        .ok_or_else(|| HostError::UnsupportedValueType {
            control: property.uri.clone(),
            type_uri: property.ranges.first().cloned(),
        })?;
    let urid = map.map_identifier(&property.uri);
    if urid == 0 {
        return Err(HostError::UnsupportedValueType {
            control: property.uri.clone(),
            type_uri: Some(value_type.uri().to_string()),
        });
    }
    let symbol = property
        .symbol
        .clone()
        .unwrap_or_else(|| symbol_from_uri(&property.uri));
    let is_toggle = value_type == ValueType::Bool;
    let is_integer = matches!(value_type, ValueType::Int | ValueType::Long);
    let scale_points = collect_scale_points(&property.scale_points);
    Ok(ControlDescriptor {
        kind: ControlKind::Property { urid },
        label: property.label.clone().unwrap_or_else(|| symbol.clone()),
        symbol,
        property_uri: Some(property.uri.clone()),
        value_type,
        range: Range {
            min: property.range.min,
            max: property.range.max,
            default: property.range.default,
        },
        is_toggle,
        is_integer,
        is_enumeration: false,
        is_logarithmic: false,
        is_writable: property.writable,
        is_readable: property.readable,
        scale_points,
        group: None,
        presentation: select_presentation(value_type, is_toggle, false, false),
    })
}

#[derive(Debug, Clone, Default)]
pub struct ControlSet {
    controls: Vec<ControlDescriptor>,
    by_symbol: HashMap<String, ControlId>,
    by_key: HashMap<String, ControlId>,
    by_port: HashMap<u32, ControlId>,
    by_property: HashMap<Urid, ControlId>,
}

impl ControlSet {
    pub fn new(controls: Vec<ControlDescriptor>) -> Self {
        let mut set = Self::default();
        for control in controls {
            set.push(control);
        }
        set
    }

    fn push(&mut self, control: ControlDescriptor) {
        let id = self.controls.len();
        self.by_symbol.entry(control.symbol.clone()).or_insert(id);
        self.by_key.insert(control.persist_key().to_string(), id);
        match control.kind {
            ControlKind::Port { index } => {
                self.by_port.insert(index, id);
            }
            ControlKind::Property { urid } => {
                self.by_property.insert(urid, id);
            }
        }
        self.controls.push(control);
    }

    /// Builds descriptors for every control port and plugin property.
    ///
    /// Controls that cannot be described are logged and left out.
    pub fn build(
        plugin: &dyn PluginIntrospection,
        map: &dyn IdentifierMap,
        sample_rate: f64,
        show_hidden: bool,
    ) -> Self {
        let mut set = Self::default();
        for port in plugin.ports().iter().filter(|p| p.is_control()) {
            if port.properties.not_on_gui && !show_hidden {
                debug!("Skipping hidden control port '{}'", port.symbol);
                continue;
            }
            match build_port_control(port, sample_rate) {
                Ok(control) => set.push(control),
                Err(e) => warn!("Control port '{}' skipped: {e}", port.symbol),
            }
        }

        let writable = plugin.properties().iter().filter(|p| p.writable);
        let readable_only = plugin
            .properties()
            .iter()
            .filter(|p| p.readable && !p.writable);
        for property in writable.chain(readable_only) {
            if set.by_key.contains_key(&property.uri) {
                continue;
            }
            match build_property_control(property, map) {
                Ok(control) => set.push(control),
                Err(e) => warn!("Parameter <{}> ignored: {e}", property.uri),
            }
        }
        set
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }

    pub fn get(&self, id: ControlId) -> Option<&ControlDescriptor> {
        self.controls.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ControlId, &ControlDescriptor)> {
        self.controls.iter().enumerate()
    }

    pub fn by_symbol(&self, symbol: &str) -> Option<ControlId> {
        self.by_symbol.get(symbol).copied()
    }

    pub fn by_key(&self, key: &str) -> Option<ControlId> {
        self.by_key
            .get(key)
            .or_else(|| self.by_symbol.get(key))
            .copied()
    }

    pub fn by_port(&self, index: u32) -> Option<ControlId> {
        self.by_port.get(&index).copied()
    }

    pub fn by_property(&self, urid: Urid) -> Option<ControlId> {
        self.by_property.get(&urid).copied()
    }

    pub fn port_count(&self) -> usize {
        self.by_port.len()
    }

    pub fn property_count(&self) -> usize {
        self.by_property.len()
    }
}
