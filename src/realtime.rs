use crate::codec::AtomRef;
use crate::transport::{Protocol, TransportReader, TransportWriter};
use crate::urid::Urids;

/// Audio side of a session. Everything here is callable from the process
/// callback: no allocation, no locks, no logging.
pub struct AudioEndpoint {
    from_ui: TransportReader,
    to_ui: TransportWriter,
    urids: Urids,
    update_frames: u32,
    frames_since_update: u32,
    dropped: u64,
}

impl AudioEndpoint {
    pub(crate) fn new(
        from_ui: TransportReader,
        to_ui: TransportWriter,
        urids: Urids,
        sample_rate: f64,
        update_rate: u32,
    ) -> Self {
        let update_frames = (sample_rate / f64::from(update_rate.max(1))).max(1.0) as u32;
        Self {
            from_ui,
            to_ui,
            urids,
            update_frames,
            frames_since_update: 0,
            dropped: 0,
        }
    }

    pub fn urids(&self) -> &Urids {
        &self.urids
    }

    /// Applies everything the control side queued since the last cycle.
    ///
    /// Port writes land in `ports` (indexed by port index, out of range
    /// indices are ignored). Atom envelopes are handed to `on_event` together
    /// with the target event port. Returns the number of items consumed.
    pub fn apply_ui_events<F>(&mut self, ports: &mut [f32], mut on_event: F) -> usize
    where
        F: FnMut(u32, AtomRef<'_>),
    {
        let mut count = 0;
        while let Some(envelope) = self.from_ui.read() {
            count += 1;
            match envelope.protocol {
                Protocol::RawFloat => {
                    if let (Some(value), Some(slot)) =
                        (envelope.as_f32(), ports.get_mut(envelope.target as usize))
                    {
                        *slot = value;
                    }
                }
                Protocol::TypedTransfer => {
                    if let Some(atom) = AtomRef::parse(envelope.payload) {
                        on_event(envelope.target, atom);
                    }
                }
            }
        }
        count
    }

    pub fn write_control(&mut self, index: u32, value: f32) -> bool {
        let sent = self.to_ui.write_float(index, value).is_ok();
        if !sent {
            self.dropped += 1;
        }
        sent
    }

    pub fn write_event(&mut self, index: u32, atom: &[u8]) -> bool {
        let sent = self
            .to_ui
            .write(index, Protocol::TypedTransfer, atom)
            .is_ok();
        if !sent {
            self.dropped += 1;
        }
        sent
    }

    /// Advances the UI update clock. True once per `sample_rate / update_rate`
    /// frames, when output ports should be pushed.
    pub fn end_cycle(&mut self, nframes: u32) -> bool {
        self.frames_since_update = self.frames_since_update.saturating_add(nframes);
        if self.frames_since_update >= self.update_frames {
            self.frames_since_update = 0;
            true
        } else {
            false
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
