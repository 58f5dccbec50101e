use byteorder::{ByteOrder, NativeEndian};
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Observer, Producer, Split};

use crate::codec::{ATOM_HEADER_SIZE, MSG_BUFFER_SIZE};
use crate::control::{ControlKind, ControlSet};
use crate::error::{HostError, Result};

// target, payload size, protocol: three native-endian u32s.
pub const HEADER_SIZE: usize = 12;

type RingProducer = <HeapRb<u8> as Split>::Prod;
type RingConsumer = <HeapRb<u8> as Split>::Cons;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Protocol {
    /// Payload is one native-endian `f32` for a control port.
    RawFloat = 0,
    /// Payload is an atom envelope for an event port.
    TypedTransfer = 1,
}

impl Protocol {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Protocol::RawFloat),
            1 => Some(Protocol::TypedTransfer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope<'a> {
    pub target: u32,
    pub protocol: Protocol,
    pub payload: &'a [u8],
}

impl Envelope<'_> {
    pub fn as_f32(&self) -> Option<f32> {
        (self.protocol == Protocol::RawFloat && self.payload.len() == 4)
            .then(|| NativeEndian::read_f32(self.payload))
    }
}

pub fn channel(capacity: usize) -> (TransportWriter, TransportReader) {
    let capacity = capacity.max(HEADER_SIZE + MSG_BUFFER_SIZE);
    let (producer, consumer) = HeapRb::<u8>::new(capacity).split();
    (
        TransportWriter {
            producer,
            staging: vec![0; HEADER_SIZE + MSG_BUFFER_SIZE],
        },
        TransportReader {
            consumer,
            scratch: vec![0; MSG_BUFFER_SIZE],
        },
    )
}

/// Bytes needed for the control to audio ring to hold one write for every
/// control at once, plus a property request.
pub fn burst_capacity(controls: &ControlSet) -> usize {
    let per_control: usize = controls
        .iter()
        .map(|(_, control)| match control.kind {
            ControlKind::Port { .. } => HEADER_SIZE + 4,
            ControlKind::Property { .. } => HEADER_SIZE + MSG_BUFFER_SIZE,
        })
        .sum();
    per_control + HEADER_SIZE + 2 * ATOM_HEADER_SIZE
}

pub struct TransportWriter {
    producer: RingProducer,
    staging: Vec<u8>,
}

impl TransportWriter {
    pub fn capacity(&self) -> usize {
        self.producer.capacity().get()
    }

    pub fn available(&self) -> usize {
        self.producer.vacant_len()
    }

    /// Publishes one item, or leaves the ring untouched.
    pub fn write(&mut self, target: u32, protocol: Protocol, payload: &[u8]) -> Result<()> {
        let total = HEADER_SIZE + payload.len();
        if total > self.staging.len() {
            return Err(HostError::EnvelopeOverflow {
                needed: total,
                capacity: self.staging.len(),
            });
        }
        let available = self.producer.vacant_len();
        if available < total {
            return Err(HostError::TransportFull {
                needed: total,
                available,
            });
        }
        let item = &mut self.staging[..total];
        NativeEndian::write_u32(&mut item[0..4], target);
        NativeEndian::write_u32(&mut item[4..8], payload.len() as u32);
        NativeEndian::write_u32(&mut item[8..12], protocol as u32);
        item[HEADER_SIZE..].copy_from_slice(payload);
        self.producer.push_slice(item);
        Ok(())
    }

    pub fn write_float(&mut self, target: u32, value: f32) -> Result<()> {
        let mut body = [0_u8; 4];
        NativeEndian::write_f32(&mut body, value);
        self.write(target, Protocol::RawFloat, &body)
    }
}

pub struct TransportReader {
    consumer: RingConsumer,
    scratch: Vec<u8>,
}

impl TransportReader {
    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.consumer.occupied_len()
    }

    /// Pops at most one item. Items with an unknown protocol are discarded.
    pub fn read(&mut self) -> Option<Envelope<'_>> {
        loop {
            if self.consumer.occupied_len() < HEADER_SIZE {
                return None;
            }
            let mut header = [0_u8; HEADER_SIZE];
            self.consumer.pop_slice(&mut header);
            let target = NativeEndian::read_u32(&header[0..4]);
            let size = NativeEndian::read_u32(&header[4..8]) as usize;
            let protocol = Protocol::from_u32(NativeEndian::read_u32(&header[8..12]));

            match protocol {
                Some(protocol) if size <= self.scratch.len() => {
                    let read = self.consumer.pop_slice(&mut self.scratch[..size]);
                    return Some(Envelope {
                        target,
                        protocol,
                        payload: &self.scratch[..read],
                    });
                }
                _ => {
                    self.consumer.skip(size);
                }
            }
        }
    }
}
