use crate::error::Result;

pub type Urid = u32;

/// URI <-> token interning, provided by the embedding host.
///
/// Token 0 is reserved for "not mapped". Implementations must hand out the
/// same token for the same URI for the lifetime of the plugin instance.
pub trait IdentifierMap: Send + Sync {
    fn map_identifier(&self, uri: &str) -> Urid;
    fn unmap_identifier(&self, urid: Urid) -> Option<String>;
}

/// Callbacks into the plugin instance owned by the embedding host.
///
/// `restore_opaque_state` is only called from the control context at load
/// time or at a point the host has made safe (processing paused).
pub trait PluginHost: Send {
    fn extract_opaque_state(&self) -> Option<Vec<u8>>;
    fn restore_opaque_state(&mut self, data: &[u8]) -> Result<()>;
    fn current_sample_rate(&self) -> f64;
}

#[derive(Debug, Clone, Copy)]
pub struct PortsOnlyHost {
    sample_rate: f64,
}

impl PortsOnlyHost {
    pub fn new(sample_rate: f64) -> Self {
        Self { sample_rate }
    }
}

impl PluginHost for PortsOnlyHost {
    fn extract_opaque_state(&self) -> Option<Vec<u8>> {
        None
    }

    fn restore_opaque_state(&mut self, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    fn current_sample_rate(&self) -> f64 {
        self.sample_rate
    }
}
