use std::path::PathBuf;

use byteorder::{ByteOrder, NativeEndian};
use serde::{Deserialize, Serialize};

use crate::error::{HostError, Result};
use crate::host::Urid;
use crate::urid::{
    LV2_ATOM__BOOL, LV2_ATOM__DOUBLE, LV2_ATOM__FLOAT, LV2_ATOM__INT, LV2_ATOM__LONG,
    LV2_ATOM__PATH, LV2_ATOM__STRING, Urids,
};

pub const MSG_BUFFER_SIZE: usize = 1024;
pub const ATOM_HEADER_SIZE: usize = 8;
const OBJECT_BODY_HEADER_SIZE: usize = 8;
const PROPERTY_HEADER_SIZE: usize = 8;

pub fn atom_pad_size(size: usize) -> usize {
    (size + 7) & !7
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Float,
    Double,
    Int,
    Long,
    Bool,
    String,
    Path,
}

impl ValueType {
    pub const ALL: [ValueType; 7] = [
        ValueType::Int,
        ValueType::Long,
        ValueType::Float,
        ValueType::Double,
        ValueType::Bool,
        ValueType::String,
        ValueType::Path,
    ];

    pub fn uri(self) -> &'static str {
        match self {
            ValueType::Float => LV2_ATOM__FLOAT,
            ValueType::Double => LV2_ATOM__DOUBLE,
            ValueType::Int => LV2_ATOM__INT,
            ValueType::Long => LV2_ATOM__LONG,
            ValueType::Bool => LV2_ATOM__BOOL,
            ValueType::String => LV2_ATOM__STRING,
            ValueType::Path => LV2_ATOM__PATH,
        }
    }

    pub fn from_uri(uri: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.uri() == uri)
    }

    pub fn urid(self, urids: &Urids) -> Urid {
        match self {
            ValueType::Float => urids.atom_float,
            ValueType::Double => urids.atom_double,
            ValueType::Int => urids.atom_int,
            ValueType::Long => urids.atom_long,
            ValueType::Bool => urids.atom_bool,
            ValueType::String => urids.atom_string,
            ValueType::Path => urids.atom_path,
        }
    }

    pub fn from_urid(urids: &Urids, urid: Urid) -> Option<Self> {
        if urid == 0 {
            return None;
        }
        Self::ALL.into_iter().find(|t| t.urid(urids) == urid)
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, ValueType::String | ValueType::Path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Float(f32),
    Double(f64),
    Int(i32),
    Long(i64),
    Bool(bool),
    String(String),
    Path(PathBuf),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Float(_) => ValueType::Float,
            Value::Double(_) => ValueType::Double,
            Value::Int(_) => ValueType::Int,
            Value::Long(_) => ValueType::Long,
            Value::Bool(_) => ValueType::Bool,
            Value::String(_) => ValueType::String,
            Value::Path(_) => ValueType::Path,
        }
    }

    pub fn from_f32(value_type: ValueType, value: f32) -> Option<Self> {
        Some(match value_type {
            ValueType::Float => Value::Float(value),
            ValueType::Double => Value::Double(value as f64),
            ValueType::Int => Value::Int(value.round() as i32),
            ValueType::Long => Value::Long(value.round() as i64),
            ValueType::Bool => Value::Bool(value > 0.0),
            ValueType::String | ValueType::Path => return None,
        })
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Double(v) => Some(*v as f32),
            Value::Int(v) => Some(*v as f32),
            Value::Long(v) => Some(*v as f32),
            Value::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Value::String(_) | Value::Path(_) => None,
        }
    }

    pub fn coerce(&self, target: ValueType) -> Option<Self> {
        if self.value_type() == target {
            return Some(self.clone());
        }
        match (self, target) {
            (Value::String(s), ValueType::Path) => Some(Value::Path(PathBuf::from(s))),
            (Value::Path(p), ValueType::String) => {
                p.to_str().map(|s| Value::String(s.to_string()))
            }
            _ => Value::from_f32(target, self.as_f32()?),
        }
    }

    fn text_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::String(s) => Some(s.as_bytes()),
            Value::Path(p) => p.to_str().map(str::as_bytes),
            _ => None,
        }
    }

    /// Text must be valid UTF-8 without NULs to survive a NUL-terminated
    /// atom body.
    pub fn is_encodable(&self) -> bool {
        match self {
            Value::String(_) | Value::Path(_) => {
                self.text_bytes().is_some_and(|bytes| !bytes.contains(&0))
            }
            _ => true,
        }
    }

    fn check_encodable(&self) -> Result<()> {
        if self.is_encodable() {
            return Ok(());
        }
        Err(HostError::UnsupportedValueType {
            control: String::new(),
            type_uri: Some(self.value_type().uri().to_string()),
        })
    }

    pub fn body_len(&self) -> usize {
        match self {
            Value::Float(_) | Value::Int(_) | Value::Bool(_) => 4,
            Value::Double(_) | Value::Long(_) => 8,
            Value::String(_) | Value::Path(_) => self.text_bytes().map_or(1, |b| b.len() + 1),
        }
    }

    /// Writes the atom body into `out`, which must be `body_len()` long.
    pub fn write_body(&self, out: &mut [u8]) {
        match self {
            Value::Float(v) => NativeEndian::write_f32(out, *v),
            Value::Double(v) => NativeEndian::write_f64(out, *v),
            Value::Int(v) => NativeEndian::write_i32(out, *v),
            Value::Long(v) => NativeEndian::write_i64(out, *v),
            Value::Bool(v) => NativeEndian::write_i32(out, i32::from(*v)),
            Value::String(_) | Value::Path(_) => {
                let bytes = self.text_bytes().unwrap_or_default();
                out[..bytes.len()].copy_from_slice(bytes);
                out[bytes.len()] = 0;
            }
        }
    }

    pub fn decode(urids: &Urids, atom: AtomRef<'_>) -> Option<Self> {
        let value_type = ValueType::from_urid(urids, atom.type_)?;
        let body = atom.body;
        Some(match value_type {
            ValueType::Float if body.len() >= 4 => Value::Float(NativeEndian::read_f32(body)),
            ValueType::Double if body.len() >= 8 => Value::Double(NativeEndian::read_f64(body)),
            ValueType::Int if body.len() >= 4 => Value::Int(NativeEndian::read_i32(body)),
            ValueType::Long if body.len() >= 8 => Value::Long(NativeEndian::read_i64(body)),
            ValueType::Bool if body.len() >= 4 => Value::Bool(NativeEndian::read_i32(body) != 0),
            ValueType::String => Value::String(text_from_body(body)?),
            ValueType::Path => Value::Path(PathBuf::from(text_from_body(body)?)),
            _ => return None,
        })
    }
}

fn text_from_body(body: &[u8]) -> Option<String> {
    let end = body.iter().position(|b| *b == 0).unwrap_or(body.len());
    std::str::from_utf8(&body[..end]).ok().map(str::to_string)
}

pub struct Forge<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl<'a> Forge<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    fn reserve(&mut self, size: usize) -> Result<&mut [u8]> {
        let end = self.len + size;
        if end > self.buf.len() {
            return Err(HostError::EnvelopeOverflow {
                needed: end,
                capacity: self.buf.len(),
            });
        }
        let start = self.len;
        self.len = end;
        Ok(&mut self.buf[start..end])
    }

    fn write_u32_pair(&mut self, a: u32, b: u32) -> Result<()> {
        let out = self.reserve(8)?;
        NativeEndian::write_u32(&mut out[..4], a);
        NativeEndian::write_u32(&mut out[4..], b);
        Ok(())
    }

    fn pad(&mut self) -> Result<()> {
        let padded = atom_pad_size(self.len);
        let extra = padded - self.len;
        if extra > 0 {
            self.reserve(extra)?.fill(0);
        }
        Ok(())
    }

    pub fn atom(&mut self, type_: Urid, body: &[u8]) -> Result<()> {
        self.check_fits(ATOM_HEADER_SIZE + body.len())?;
        self.write_u32_pair(body.len() as u32, type_)?;
        self.reserve(body.len())?.copy_from_slice(body);
        Ok(())
    }

    pub fn value(&mut self, urids: &Urids, value: &Value) -> Result<()> {
        value.check_encodable()?;
        let body_len = value.body_len();
        self.check_fits(ATOM_HEADER_SIZE + body_len)?;
        self.write_u32_pair(body_len as u32, value.value_type().urid(urids))?;
        value.write_body(self.reserve(body_len)?);
        Ok(())
    }

    fn check_fits(&self, size: usize) -> Result<()> {
        if self.len + size > self.buf.len() {
            return Err(HostError::EnvelopeOverflow {
                needed: self.len + size,
                capacity: self.buf.len(),
            });
        }
        Ok(())
    }

    fn begin_object(&mut self, urids: &Urids, otype: Urid) -> Result<usize> {
        let start = self.len;
        self.write_u32_pair(0, urids.atom_object)?;
        self.write_u32_pair(0, otype)?;
        Ok(start)
    }

    fn end_object(&mut self, start: usize) {
        let body_size = (self.len - start - ATOM_HEADER_SIZE) as u32;
        NativeEndian::write_u32(&mut self.buf[start..start + 4], body_size);
    }

    fn property_header(&mut self, key: Urid) -> Result<()> {
        self.write_u32_pair(key, 0)
    }

    pub fn patch_set(
        &mut self,
        urids: &Urids,
        property: Urid,
        value_type: Urid,
        body: &[u8],
    ) -> Result<()> {
        let total = patch_set_size(body.len());
        self.check_fits(total)?;
        let start = self.begin_object(urids, urids.patch_set)?;
        self.property_header(urids.patch_property)?;
        let mut urid = [0_u8; 4];
        NativeEndian::write_u32(&mut urid, property);
        self.atom(urids.atom_urid, &urid)?;
        self.pad()?;
        self.property_header(urids.patch_value)?;
        self.atom(value_type, body)?;
        self.pad()?;
        self.end_object(start);
        Ok(())
    }

    pub fn patch_set_value(&mut self, urids: &Urids, property: Urid, value: &Value) -> Result<()> {
        value.check_encodable()?;
        let total = patch_set_size(value.body_len());
        self.check_fits(total)?;
        let start = self.begin_object(urids, urids.patch_set)?;
        self.property_header(urids.patch_property)?;
        let mut urid = [0_u8; 4];
        NativeEndian::write_u32(&mut urid, property);
        self.atom(urids.atom_urid, &urid)?;
        self.pad()?;
        self.property_header(urids.patch_value)?;
        self.value(urids, value)?;
        self.pad()?;
        self.end_object(start);
        Ok(())
    }

    /// Empty `patch:Get`, asking the plugin to report every property.
    pub fn patch_get(&mut self, urids: &Urids) -> Result<()> {
        let start = self.begin_object(urids, urids.patch_get)?;
        self.end_object(start);
        Ok(())
    }
}

fn patch_set_size(value_body_len: usize) -> usize {
    let property = PROPERTY_HEADER_SIZE + ATOM_HEADER_SIZE + 4;
    let value = PROPERTY_HEADER_SIZE + ATOM_HEADER_SIZE + value_body_len;
    ATOM_HEADER_SIZE + OBJECT_BODY_HEADER_SIZE + atom_pad_size(property) + atom_pad_size(value)
}

pub fn encode(buf: &mut [u8], type_: Urid, body: &[u8]) -> Result<usize> {
    let mut forge = Forge::new(buf);
    forge.atom(type_, body)?;
    Ok(forge.len())
}

pub fn decode(bytes: &[u8]) -> Result<AtomRef<'_>> {
    AtomRef::parse(bytes).ok_or(HostError::EnvelopeOverflow {
        needed: bytes
            .get(..4)
            .map(|h| NativeEndian::read_u32(h) as usize + ATOM_HEADER_SIZE)
            .unwrap_or(ATOM_HEADER_SIZE),
        capacity: bytes.len(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomRef<'a> {
    pub type_: Urid,
    pub body: &'a [u8],
}

impl<'a> AtomRef<'a> {
    pub fn parse(bytes: &'a [u8]) -> Option<Self> {
        if bytes.len() < ATOM_HEADER_SIZE {
            return None;
        }
        let size = NativeEndian::read_u32(&bytes[..4]) as usize;
        let type_ = NativeEndian::read_u32(&bytes[4..8]);
        let body = bytes.get(ATOM_HEADER_SIZE..ATOM_HEADER_SIZE + size)?;
        Some(Self { type_, body })
    }

    pub fn size(&self) -> u32 {
        self.body.len() as u32
    }

    pub fn total_size(&self) -> usize {
        ATOM_HEADER_SIZE + self.body.len()
    }

    pub fn as_object(&self, urids: &Urids) -> Option<ObjectRef<'a>> {
        if self.type_ != urids.atom_object || self.body.len() < OBJECT_BODY_HEADER_SIZE {
            return None;
        }
        Some(ObjectRef {
            id: NativeEndian::read_u32(&self.body[..4]),
            otype: NativeEndian::read_u32(&self.body[4..8]),
            properties: &self.body[OBJECT_BODY_HEADER_SIZE..],
        })
    }

    pub fn as_urid(&self, urids: &Urids) -> Option<Urid> {
        (self.type_ == urids.atom_urid && self.body.len() >= 4)
            .then(|| NativeEndian::read_u32(&self.body[..4]))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ObjectRef<'a> {
    pub id: Urid,
    pub otype: Urid,
    properties: &'a [u8],
}

impl<'a> ObjectRef<'a> {
    pub fn properties(&self) -> PropertyIter<'a> {
        PropertyIter {
            rest: self.properties,
        }
    }

    pub fn get(&self, key: Urid) -> Option<AtomRef<'a>> {
        self.properties().find(|(k, _)| *k == key).map(|(_, v)| v)
    }
}

pub struct PropertyIter<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for PropertyIter<'a> {
    type Item = (Urid, AtomRef<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.len() < PROPERTY_HEADER_SIZE + ATOM_HEADER_SIZE {
            return None;
        }
        let key = NativeEndian::read_u32(&self.rest[..4]);
        let value = AtomRef::parse(&self.rest[PROPERTY_HEADER_SIZE..])?;
        let consumed = atom_pad_size(PROPERTY_HEADER_SIZE + value.total_size());
        self.rest = self.rest.get(consumed..).unwrap_or_default();
        Some((key, value))
    }
}

/// Splits a `patch:Set` into the target property and its value atom.
pub fn parse_patch_set<'a>(urids: &Urids, atom: AtomRef<'a>) -> Option<(Urid, AtomRef<'a>)> {
    let object = atom.as_object(urids)?;
    if object.otype != urids.patch_set {
        return None;
    }
    let property = object.get(urids.patch_property)?.as_urid(urids)?;
    let value = object.get(urids.patch_value)?;
    Some((property, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::IdentifierMap;
    use crate::urid::UridMap;

    fn urids() -> (UridMap, Urids) {
        let map = UridMap::new();
        let urids = Urids::new(&map);
        (map, urids)
    }

    fn samples() -> Vec<Value> {
        vec![
            Value::Float(0.25),
            Value::Double(-1234.5678),
            Value::Int(-7),
            Value::Long(1 << 40),
            Value::Bool(true),
            Value::Bool(false),
            Value::String("warm pad".to_string()),
            Value::String(String::new()),
            Value::Path(PathBuf::from("/tmp/samples/kick.wav")),
        ]
    }

    #[test]
    fn bare_atom_round_trip() {
        let mut buf = [0_u8; MSG_BUFFER_SIZE];
        let len = encode(&mut buf, 42, &[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(len, ATOM_HEADER_SIZE + 5);
        let atom = decode(&buf[..len]).unwrap();
        assert_eq!(atom.size(), 5);
        assert_eq!(atom.type_, 42);
        assert_eq!(atom.body, &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn typed_values_round_trip() {
        let (_map, urids) = urids();
        for value in samples() {
            let mut buf = [0_u8; MSG_BUFFER_SIZE];
            let mut forge = Forge::new(&mut buf);
            forge.value(&urids, &value).unwrap();
            let atom = AtomRef::parse(forge.as_bytes()).unwrap();
            assert_eq!(Value::decode(&urids, atom), Some(value));
        }
    }

    #[test]
    fn text_that_cannot_round_trip_is_rejected() {
        let (map, urids) = urids();
        let property = map.map_identifier("http://example.org/name");
        let embedded_nul = Value::String("a\0b".to_string());
        assert!(!embedded_nul.is_encodable());

        let mut buf = [0_u8; MSG_BUFFER_SIZE];
        let mut forge = Forge::new(&mut buf);
        assert!(matches!(
            forge.value(&urids, &embedded_nul),
            Err(HostError::UnsupportedValueType { .. })
        ));
        assert!(matches!(
            forge.patch_set_value(&urids, property, &embedded_nul),
            Err(HostError::UnsupportedValueType { .. })
        ));
        assert!(forge.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_paths_are_rejected() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let (_map, urids) = urids();
        let path = Value::Path(PathBuf::from(OsStr::from_bytes(b"/tmp/\xff.wav")));
        assert!(!path.is_encodable());
        let mut buf = [0_u8; MSG_BUFFER_SIZE];
        let mut forge = Forge::new(&mut buf);
        assert!(forge.value(&urids, &path).is_err());
        assert!(forge.is_empty());
    }

    #[test]
    fn patch_set_carries_property_and_value() {
        let (map, urids) = urids();
        let property = map.map_identifier("http://example.org/sample");
        for value in samples() {
            let mut buf = [0_u8; MSG_BUFFER_SIZE];
            let mut forge = Forge::new(&mut buf);
            forge.patch_set_value(&urids, property, &value).unwrap();
            assert_eq!(forge.len() % 8, 0);
            let atom = AtomRef::parse(forge.as_bytes()).unwrap();
            let (key, body) = parse_patch_set(&urids, atom).unwrap();
            assert_eq!(key, property);
            assert_eq!(Value::decode(&urids, body), Some(value));
        }
    }

    #[test]
    fn raw_and_typed_patch_set_agree() {
        let (map, urids) = urids();
        let property = map.map_identifier("http://example.org/cutoff");
        let value = Value::Double(440.0);

        let mut typed = [0_u8; MSG_BUFFER_SIZE];
        let mut forge = Forge::new(&mut typed);
        forge.patch_set_value(&urids, property, &value).unwrap();
        let typed_len = forge.len();

        let mut raw = [0_u8; MSG_BUFFER_SIZE];
        let mut body = [0_u8; 8];
        value.write_body(&mut body);
        let mut forge = Forge::new(&mut raw);
        forge
            .patch_set(&urids, property, urids.atom_double, &body)
            .unwrap();

        assert_eq!(forge.len(), typed_len);
        assert_eq!(&raw[..typed_len], &typed[..typed_len]);
    }

    #[test]
    fn oversized_value_overflows_without_writing() {
        let (map, urids) = urids();
        let property = map.map_identifier("http://example.org/text");
        let value = Value::String("x".repeat(MSG_BUFFER_SIZE));
        let mut buf = [0_u8; MSG_BUFFER_SIZE];
        let mut forge = Forge::new(&mut buf);
        let err = forge.patch_set_value(&urids, property, &value).unwrap_err();
        assert!(matches!(err, HostError::EnvelopeOverflow { .. }));
        assert!(forge.is_empty());
    }

    #[test]
    fn patch_get_is_an_empty_object() {
        let (_map, urids) = urids();
        let mut buf = [0_u8; 64];
        let mut forge = Forge::new(&mut buf);
        forge.patch_get(&urids).unwrap();
        let atom = AtomRef::parse(forge.as_bytes()).unwrap();
        let object = atom.as_object(&urids).unwrap();
        assert_eq!(object.otype, urids.patch_get);
        assert_eq!(object.properties().count(), 0);
        assert!(parse_patch_set(&urids, atom).is_none());
    }

    #[test]
    fn truncated_envelopes_are_rejected() {
        let mut buf = [0_u8; 32];
        let len = encode(&mut buf, 7, &[9; 16]).unwrap();
        assert!(decode(&buf[..len - 1]).is_err());
        assert!(AtomRef::parse(&buf[..4]).is_none());
    }

    #[test]
    fn value_types_resolve_by_uri_and_token() {
        let (_map, urids) = urids();
        for value_type in ValueType::ALL {
            assert_eq!(ValueType::from_uri(value_type.uri()), Some(value_type));
            assert_eq!(
                ValueType::from_urid(&urids, value_type.urid(&urids)),
                Some(value_type)
            );
        }
        assert_eq!(ValueType::from_uri("http://example.org/nope"), None);
        assert_eq!(ValueType::from_urid(&urids, 0), None);
    }

    #[test]
    fn coercion_between_numeric_types() {
        assert_eq!(Value::Float(2.6).coerce(ValueType::Int), Some(Value::Int(3)));
        assert_eq!(Value::Int(1).coerce(ValueType::Bool), Some(Value::Bool(true)));
        assert_eq!(
            Value::String("/a/b".to_string()).coerce(ValueType::Path),
            Some(Value::Path(PathBuf::from("/a/b")))
        );
        assert_eq!(Value::String("x".to_string()).coerce(ValueType::Float), None);
    }
}
