pub mod codec;
pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod host;
pub mod introspection;
pub mod logging;
pub mod preset;
pub mod realtime;
pub mod session;
pub mod state;
pub mod transport;
pub mod urid;

pub use codec::{Value, ValueType};
pub use config::{HostConfig, LogConfig};
pub use control::{ControlDescriptor, ControlId, ControlKind, ControlSet, Presentation};
pub use error::{HostError, Result};
pub use events::HostEvent;
pub use host::{IdentifierMap, PluginHost, PortsOnlyHost, Urid};
pub use introspection::{PluginIntrospection, PluginMetadata};
pub use preset::{Bank, Preset, PresetCatalog};
pub use realtime::AudioEndpoint;
pub use session::Session;
pub use state::{State, StateEntry};
pub use urid::UridMap;
