use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::codec::{AtomRef, Forge, MSG_BUFFER_SIZE, Value, ValueType, parse_patch_set};
use crate::config::HostConfig;
use crate::control::{ControlDescriptor, ControlId, ControlSet};
use crate::error::{HostError, Result};
use crate::events::{EventBus, HostEvent};
use crate::host::{IdentifierMap, PluginHost};
use crate::introspection::{PluginIntrospection, PortFlow, PortKind};
use crate::preset::{Bank, Preset, PresetCatalog};
use crate::realtime::AudioEndpoint;
use crate::state::{SnapshotManager, State};
use crate::transport::{self, Envelope, Protocol, TransportReader, TransportWriter};
use crate::urid::Urids;

/// Control side of one plugin instance. Owns the controls, their last known
/// values, the presets and the control ends of both rings.
pub struct Session {
    plugin_uri: String,
    controls: ControlSet,
    values: Vec<Option<Value>>,
    map: Arc<dyn IdentifierMap>,
    urids: Urids,
    to_plugin: TransportWriter,
    from_plugin: TransportReader,
    event_port: Option<u32>,
    snapshots: SnapshotManager,
    catalog: PresetCatalog,
    events: EventBus,
    host: Box<dyn PluginHost>,
    update_rate: u32,
    print_controls: bool,
    dump: bool,
}

fn parse_value(control: &ControlDescriptor, text: &str) -> Option<Value> {
    match control.value_type {
        ValueType::String => Some(Value::String(text.to_string())),
        ValueType::Path => Some(Value::Path(PathBuf::from(text))),
        ValueType::Bool if text == "true" || text == "false" => Some(Value::Bool(text == "true")),
        numeric => Value::from_f32(numeric, text.parse::<f32>().ok()?),
    }
}

fn record(
    values: &mut [Option<Value>],
    events: &mut EventBus,
    controls: &ControlSet,
    print_controls: bool,
    id: ControlId,
    value: Value,
) {
    let Some(control) = controls.get(id) else {
        return;
    };
    if print_controls {
        info!("{} = {:?}", control.symbol, value);
    }
    if let Some(slot) = values.get_mut(id) {
        *slot = Some(value.clone());
    }
    events.emit(HostEvent::ControlChanged {
        id,
        symbol: control.symbol.clone(),
        value,
    });
}

fn decode_envelope(
    controls: &ControlSet,
    urids: &Urids,
    dump: bool,
    envelope: Envelope<'_>,
) -> Option<(ControlId, Value)> {
    match envelope.protocol {
        Protocol::RawFloat => {
            let id = controls.by_port(envelope.target)?;
            Some((id, Value::Float(envelope.as_f32()?)))
        }
        Protocol::TypedTransfer => {
            let atom = AtomRef::parse(envelope.payload)?;
            if dump {
                debug!(
                    "Event port {} <- atom type {} ({} bytes)",
                    envelope.target,
                    atom.type_,
                    atom.size()
                );
            }
            let (property, value) = parse_patch_set(urids, atom)?;
            let id = controls.by_property(property)?;
            let control = controls.get(id)?;
            let Some(value) = Value::decode(urids, value) else {
                warn!("Unsupported value for property '{}'", control.symbol);
                return None;
            };
            Some((id, value.coerce(control.value_type)?))
        }
    }
}

impl Session {
    /// Builds the controls for `plugin`, creates both rings and returns the
    /// audio endpoint to hand to the process callback.
    pub fn open(
        plugin: &dyn PluginIntrospection,
        host: Box<dyn PluginHost>,
        map: Arc<dyn IdentifierMap>,
        config: &HostConfig,
    ) -> Result<(Session, AudioEndpoint)> {
        let sample_rate = host.current_sample_rate();
        let controls = ControlSet::build(plugin, map.as_ref(), sample_rate, config.show_hidden);
        let urids = Urids::new(map.as_ref());
        let buffer_size = config.effective_buffer_size();
        let (to_plugin, audio_reader) =
            transport::channel(transport::burst_capacity(&controls).max(buffer_size));
        let (audio_writer, from_plugin) = transport::channel(buffer_size);
        let update_rate = config.effective_update_rate();
        info!("Update rate: {update_rate} Hz");

        let event_port = plugin
            .ports()
            .iter()
            .find(|p| p.kind == PortKind::Atom && p.flow == PortFlow::Input)
            .map(|p| p.index);
        if event_port.is_none() && controls.property_count() > 0 {
            warn!("<{}> has properties but no event input", plugin.plugin_uri());
        }

        let values = controls
            .iter()
            .map(|(_, control)| control.default_value())
            .collect();
        let catalog = PresetCatalog::new(
            plugin.plugin_uri(),
            plugin.plugin_name(),
            config.preset_paths.clone(),
            config.save_dir(),
            config.prefix_plugin_name,
        );
        let endpoint =
            AudioEndpoint::new(audio_reader, audio_writer, urids, sample_rate, update_rate);

        let mut session = Session {
            plugin_uri: plugin.plugin_uri().to_string(),
            controls,
            values,
            map,
            urids,
            to_plugin,
            from_plugin,
            event_port,
            snapshots: SnapshotManager::new(),
            catalog,
            events: EventBus::new(),
            host,
            update_rate,
            print_controls: config.print_controls,
            dump: config.log.dump,
        };

        for assignment in config.assignments() {
            if let Err(e) = session.assign(&assignment.symbol, &assignment.value) {
                warn!("Ignoring control assignment: {e}");
            }
        }
        if let Some(uri) = &config.preset {
            session.discover_presets();
            if let Err(e) = session.activate_preset(uri) {
                warn!("Failed to load preset <{uri}>: {e}");
            }
        }
        Ok((session, endpoint))
    }

    pub fn plugin_uri(&self) -> &str {
        &self.plugin_uri
    }

    pub fn controls(&self) -> &ControlSet {
        &self.controls
    }

    pub fn identifier_map(&self) -> &dyn IdentifierMap {
        self.map.as_ref()
    }

    pub fn update_rate(&self) -> u32 {
        self.update_rate
    }

    pub fn presets(&self) -> &PresetCatalog {
        &self.catalog
    }

    pub fn subscribe(&mut self) -> UnboundedReceiver<HostEvent> {
        self.events.subscribe()
    }

    pub fn control_value(&self, id: ControlId) -> Option<&Value> {
        self.values.get(id)?.as_ref()
    }

    /// Queues a new value for a writable control and sends what fits.
    pub fn set_control(&mut self, id: ControlId, value: Value) -> Result<()> {
        let control = self
            .controls
            .get(id)
            .filter(|c| c.is_writable)
            .ok_or_else(|| HostError::UnknownControl(id.to_string()))?;
        let value = value
            .coerce(control.value_type)
            .filter(Value::is_encodable)
            .ok_or_else(|| HostError::UnsupportedValueType {
                control: control.symbol.clone(),
                type_uri: Some(value.value_type().uri().to_string()),
            })?;
        self.snapshots.queue(id, value);
        self.flush();
        Ok(())
    }

    pub fn assign(&mut self, symbol: &str, text: &str) -> Result<()> {
        let id = self
            .controls
            .by_symbol(symbol)
            .ok_or_else(|| HostError::UnknownControl(symbol.to_string()))?;
        let control = self
            .controls
            .get(id)
            .ok_or_else(|| HostError::UnknownControl(symbol.to_string()))?;
        let value = parse_value(control, text).ok_or_else(|| {
            HostError::Config(format!("Invalid value '{text}' for control '{symbol}'"))
        })?;
        self.set_control(id, value)
    }

    pub fn request_properties(&mut self) -> Result<()> {
        let port = self
            .event_port
            .ok_or_else(|| HostError::UnknownControl("event input".to_string()))?;
        let mut buf = [0_u8; MSG_BUFFER_SIZE];
        let mut forge = Forge::new(&mut buf);
        forge.patch_get(&self.urids)?;
        self.to_plugin
            .write(port, Protocol::TypedTransfer, forge.as_bytes())
    }

    fn flush(&mut self) -> usize {
        let Self {
            snapshots,
            controls,
            urids,
            to_plugin,
            event_port,
            values,
            events,
            print_controls,
            ..
        } = self;
        let controls: &ControlSet = controls;
        snapshots.flush(controls, urids, to_plugin, *event_port, |id, value| {
            record(values, events, controls, *print_controls, id, value.clone());
        })
    }

    /// One polling cycle: picks up everything the audio side reported and
    /// retries deferred writes. Returns the number of decoded updates.
    pub fn update(&mut self) -> usize {
        let mut decoded = 0;
        loop {
            let change = {
                let Some(envelope) = self.from_plugin.read() else {
                    break;
                };
                decode_envelope(&self.controls, &self.urids, self.dump, envelope)
            };
            if let Some((id, value)) = change {
                record(
                    &mut self.values,
                    &mut self.events,
                    &self.controls,
                    self.print_controls,
                    id,
                    value,
                );
                decoded += 1;
            }
        }
        if self.snapshots.pending() > 0 {
            self.flush();
        }
        decoded
    }

    pub fn capture(&self) -> State {
        self.snapshots
            .capture(&self.controls, &self.values, self.host.as_ref())
    }

    pub fn apply_state(&mut self, state: &State) -> Result<usize> {
        let queued = self
            .snapshots
            .apply(state, &self.controls, self.host.as_mut())?;
        self.flush();
        Ok(queued)
    }

    pub fn discover_presets(&mut self) -> &Bank {
        self.catalog.discover();
        self.events.emit(HostEvent::PresetListChanged);
        self.catalog.root()
    }

    pub fn activate_preset(&mut self, uri: &str) -> Result<()> {
        let snapshots = &mut self.snapshots;
        let controls = &self.controls;
        let host = self.host.as_mut();
        self.catalog.activate(uri, |state| {
            snapshots.apply(state, controls, host).map(|_| ())
        })?;
        self.flush();
        self.events.emit(HostEvent::ActivePresetChanged {
            uri: Some(uri.to_string()),
        });
        Ok(())
    }

    pub fn deactivate_preset(&mut self) {
        if self.catalog.deactivate().is_some() {
            self.events
                .emit(HostEvent::ActivePresetChanged { uri: None });
        }
    }

    pub fn save_preset(
        &mut self,
        label: &str,
        bank: Option<&str>,
        uri: Option<&str>,
    ) -> Result<Preset> {
        let state = self.capture().with_label(label);
        let preset = self.catalog.save(&state, label, bank, uri)?;
        self.events.emit(HostEvent::PresetListChanged);
        self.events.emit(HostEvent::ActivePresetChanged {
            uri: Some(preset.uri.clone()),
        });
        Ok(preset)
    }

    pub fn delete_preset(&mut self, uri: &str) -> Result<()> {
        let was_active = self.catalog.active().is_some_and(|p| p.uri == uri);
        self.catalog.delete(uri)?;
        self.events.emit(HostEvent::PresetListChanged);
        if was_active {
            self.events
                .emit(HostEvent::ActivePresetChanged { uri: None });
        }
        Ok(())
    }

    /// Polls at the update rate until `stop` fires (or its sender is
    /// dropped), then waits for `release` before returning so the caller can
    /// tear down the rings.
    pub async fn run(&mut self, mut stop: oneshot::Receiver<()>, release: oneshot::Receiver<()>) {
        let period = Duration::from_secs_f64(1.0 / f64::from(self.update_rate.max(1)));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = ticker.tick() => {
                    self.update();
                }
            }
        }
        debug!("Polling stopped, waiting for UI release");
        if release.await.is_err() {
            debug!("UI released without signalling");
        }
    }
}
