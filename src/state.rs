use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::codec::{Forge, MSG_BUFFER_SIZE, Value, ValueType};
use crate::control::{ControlId, ControlKind, ControlSet};
use crate::error::{HostError, Result};
use crate::host::PluginHost;
use crate::transport::{Protocol, TransportWriter};
use crate::urid::Urids;

pub fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateEntry {
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct State {
    label: Option<String>,
    timestamp: SystemTime,
    values: Vec<StateEntry>,
    opaque: Option<Vec<u8>>,
}

impl State {
    pub fn new(values: Vec<StateEntry>, opaque: Option<Vec<u8>>) -> Self {
        Self {
            label: None,
            timestamp: SystemTime::now(),
            values,
            opaque,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn values(&self) -> &[StateEntry] {
        &self.values
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.iter().find(|e| e.key == key).map(|e| &e.value)
    }

    pub fn opaque(&self) -> Option<&[u8]> {
        self.opaque.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct PendingWrite {
    id: ControlId,
    value: Value,
}

/// Captures and applies States. Writes toward the audio side are queued and
/// flushed from the polling loop, so a full ring only delays them.
#[derive(Debug, Default)]
pub struct SnapshotManager {
    pending: VecDeque<PendingWrite>,
}

impl SnapshotManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn capture(
        &self,
        controls: &ControlSet,
        values: &[Option<Value>],
        host: &dyn PluginHost,
    ) -> State {
        let entries = controls
            .iter()
            .filter(|(_, control)| control.is_writable)
            .filter_map(|(id, control)| {
                let value = values.get(id)?.as_ref()?;
                Some(StateEntry {
                    key: control.persist_key().to_string(),
                    value: value.coerce(control.value_type)?,
                })
            })
            .collect();
        State::new(entries, host.extract_opaque_state())
    }

    pub fn queue(&mut self, id: ControlId, value: Value) {
        if let Some(existing) = self.pending.iter_mut().find(|p| p.id == id) {
            existing.value = value;
        } else {
            self.pending.push_back(PendingWrite { id, value });
        }
    }

    /// Queues every entry of `state` and restores its opaque data. Controls
    /// the State does not mention keep their current value. Returns how many
    /// writes were queued.
    pub fn apply(
        &mut self,
        state: &State,
        controls: &ControlSet,
        host: &mut dyn PluginHost,
    ) -> Result<usize> {
        if let Some(data) = state.opaque() {
            host.restore_opaque_state(data)?;
        }
        let mut queued = 0;
        for entry in state.values() {
            let Some(id) = controls.by_key(&entry.key) else {
                warn!("State entry '{}' matches no control", entry.key);
                continue;
            };
            let Some(control) = controls.get(id).filter(|c| c.is_writable) else {
                debug!("State entry '{}' is read-only, skipped", entry.key);
                continue;
            };
            let Some(value) = entry.value.coerce(control.value_type) else {
                warn!(
                    "State entry '{}' has type {:?}, expected {:?}",
                    entry.key,
                    entry.value.value_type(),
                    control.value_type
                );
                continue;
            };
            self.queue(id, value);
            queued += 1;
        }
        Ok(queued)
    }

    /// Sends queued writes until the ring fills up. `on_sent` sees every
    /// write that made it into the ring.
    pub fn flush<F>(
        &mut self,
        controls: &ControlSet,
        urids: &Urids,
        writer: &mut TransportWriter,
        event_port: Option<u32>,
        mut on_sent: F,
    ) -> usize
    where
        F: FnMut(ControlId, &Value),
    {
        let mut sent = 0;
        while let Some(write) = self.pending.front() {
            match send(controls, urids, writer, event_port, write) {
                Ok(()) => {
                    on_sent(write.id, &write.value);
                    sent += 1;
                }
                Err(HostError::TransportFull { needed, available }) => {
                    debug!(
                        "Control ring full ({available} of {needed} bytes), {} writes deferred",
                        self.pending.len()
                    );
                    break;
                }
                Err(e) => warn!("Dropping control write: {e}"),
            }
            self.pending.pop_front();
        }
        sent
    }
}

fn send(
    controls: &ControlSet,
    urids: &Urids,
    writer: &mut TransportWriter,
    event_port: Option<u32>,
    write: &PendingWrite,
) -> Result<()> {
    let control = controls
        .get(write.id)
        .ok_or_else(|| HostError::UnknownControl(write.id.to_string()))?;
    match control.kind {
        ControlKind::Port { index } => {
            let value = write
                .value
                .as_f32()
                .ok_or_else(|| HostError::UnsupportedValueType {
                    control: control.symbol.clone(),
                    type_uri: Some(write.value.value_type().uri().to_string()),
                })?;
            writer.write_float(index, value)
        }
        ControlKind::Property { urid } => {
            let port = event_port.ok_or_else(|| {
                HostError::UnknownControl(format!(
                    "{} (plugin has no event input)",
                    control.symbol
                ))
            })?;
            let mut buf = [0_u8; MSG_BUFFER_SIZE];
            let mut forge = Forge::new(&mut buf);
            forge.patch_set_value(urids, urid, &write.value)?;
            writer.write(port, Protocol::TypedTransfer, forge.as_bytes())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetMetadata {
    pub uri: String,
    pub label: String,
    pub bank: Option<String>,
    pub plugin: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredValue {
    #[serde(rename = "type")]
    type_uri: String,
    value: toml::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct PresetFile {
    uri: Option<String>,
    label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bank: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    plugin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    opaque: Option<String>,
    #[serde(default)]
    values: BTreeMap<String, StoredValue>,
}

impl StoredValue {
    fn from_value(value: &Value) -> Self {
        let stored = match value {
            Value::Float(v) => toml::Value::Float(f64::from(*v)),
            Value::Double(v) => toml::Value::Float(*v),
            Value::Int(v) => toml::Value::Integer(i64::from(*v)),
            Value::Long(v) => toml::Value::Integer(*v),
            Value::Bool(v) => toml::Value::Boolean(*v),
            Value::String(v) => toml::Value::String(v.clone()),
            Value::Path(v) => toml::Value::String(v.to_string_lossy().into_owned()),
        };
        Self {
            type_uri: value.value_type().uri().to_string(),
            value: stored,
        }
    }

    fn to_value(&self) -> Option<Value> {
        let value_type = ValueType::from_uri(&self.type_uri)?;
        let number = match &self.value {
            toml::Value::Float(v) => Some(*v),
            toml::Value::Integer(v) => Some(*v as f64),
            _ => None,
        };
        Some(match (value_type, &self.value) {
            (ValueType::Float, _) => Value::Float(number? as f32),
            (ValueType::Double, _) => Value::Double(number?),
            (ValueType::Int, toml::Value::Integer(v)) => Value::Int(i32::try_from(*v).ok()?),
            (ValueType::Long, toml::Value::Integer(v)) => Value::Long(*v),
            (ValueType::Bool, toml::Value::Boolean(v)) => Value::Bool(*v),
            (ValueType::String, toml::Value::String(v)) => Value::String(v.clone()),
            (ValueType::Path, toml::Value::String(v)) => Value::Path(PathBuf::from(v)),
            _ => return None,
        })
    }
}

pub fn file_uri(path: &Path) -> String {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    format!("file://{}", absolute.display())
}

fn read_preset_file(path: &Path) -> Result<PresetFile> {
    let text = fs::read_to_string(path)?;
    toml::from_str(&text).map_err(|e| HostError::malformed(path, e.to_string()))
}

fn metadata_of(path: &Path, file: &PresetFile) -> PresetMetadata {
    PresetMetadata {
        uri: file.uri.clone().unwrap_or_else(|| file_uri(path)),
        label: file.label.clone(),
        bank: file.bank.clone(),
        plugin: file.plugin.clone(),
    }
}

pub fn read_metadata(path: &Path) -> Result<PresetMetadata> {
    let file = read_preset_file(path)?;
    Ok(metadata_of(path, &file))
}

/// Loads a stored preset. Entries with unknown types are skipped.
pub fn deserialize(path: &Path) -> Result<(PresetMetadata, State)> {
    let file = read_preset_file(path)?;
    let metadata = metadata_of(path, &file);
    let opaque = match &file.opaque {
        Some(encoded) => Some(
            BASE64
                .decode(encoded)
                .map_err(|e| HostError::malformed(path, format!("opaque state: {e}")))?,
        ),
        None => None,
    };
    let mut values = Vec::with_capacity(file.values.len());
    for (key, stored) in file.values {
        match stored.to_value() {
            Some(value) => values.push(StateEntry { key, value }),
            None => warn!(
                "{}: value for '{key}' has unsupported type <{}>",
                path.display(),
                stored.type_uri
            ),
        }
    }
    let timestamp = file
        .timestamp
        .map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
        .unwrap_or(UNIX_EPOCH);
    let state = State {
        label: Some(metadata.label.clone()),
        timestamp,
        values,
        opaque,
    };
    Ok((metadata, state))
}

/// Writes `state` to `path`. The file only appears once fully written; on
/// error nothing is left behind.
pub fn serialize(state: &State, metadata: &PresetMetadata, path: &Path) -> Result<()> {
    let file = PresetFile {
        uri: Some(metadata.uri.clone()),
        label: metadata.label.clone(),
        bank: metadata.bank.clone(),
        plugin: metadata.plugin.clone(),
        timestamp: state
            .timestamp
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_secs()),
        opaque: state.opaque().map(|data| BASE64.encode(data)),
        values: state
            .values()
            .iter()
            .map(|e| (e.key.clone(), StoredValue::from_value(&e.value)))
            .collect(),
    };
    let text = toml::to_string_pretty(&file)?;

    let dir = path
        .parent()
        .ok_or_else(|| HostError::malformed(path, "no parent directory"))?;
    let created_dir = !dir.exists();
    fs::create_dir_all(dir)?;
    let result = tempfile::NamedTempFile::new_in(dir)
        .and_then(|mut tmp| {
            tmp.write_all(text.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(path).map_err(|e| e.error)
        })
        .map(|_| ());
    if result.is_err() && created_dir {
        let _ = fs::remove_dir(dir);
    }
    Ok(result?)
}
