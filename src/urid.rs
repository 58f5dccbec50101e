use std::collections::HashMap;
use std::sync::Mutex;

use crate::host::{IdentifierMap, Urid};

pub const LV2_ATOM__BOOL: &str = "http://lv2plug.in/ns/ext/atom#Bool";
pub const LV2_ATOM__DOUBLE: &str = "http://lv2plug.in/ns/ext/atom#Double";
pub const LV2_ATOM__EVENT_TRANSFER: &str = "http://lv2plug.in/ns/ext/atom#eventTransfer";
pub const LV2_ATOM__FLOAT: &str = "http://lv2plug.in/ns/ext/atom#Float";
pub const LV2_ATOM__INT: &str = "http://lv2plug.in/ns/ext/atom#Int";
pub const LV2_ATOM__LONG: &str = "http://lv2plug.in/ns/ext/atom#Long";
pub const LV2_ATOM__OBJECT: &str = "http://lv2plug.in/ns/ext/atom#Object";
pub const LV2_ATOM__PATH: &str = "http://lv2plug.in/ns/ext/atom#Path";
pub const LV2_ATOM__STRING: &str = "http://lv2plug.in/ns/ext/atom#String";
pub const LV2_ATOM__URID: &str = "http://lv2plug.in/ns/ext/atom#URID";
pub const LV2_PATCH__GET: &str = "http://lv2plug.in/ns/ext/patch#Get";
pub const LV2_PATCH__PROPERTY: &str = "http://lv2plug.in/ns/ext/patch#property";
pub const LV2_PATCH__SET: &str = "http://lv2plug.in/ns/ext/patch#Set";
pub const LV2_PATCH__VALUE: &str = "http://lv2plug.in/ns/ext/patch#value";

#[derive(Default)]
struct UridMapState {
    next_urid: Urid,
    by_uri: HashMap<String, Urid>,
    by_urid: HashMap<Urid, String>,
}

pub struct UridMap {
    state: Mutex<UridMapState>,
}

impl Default for UridMap {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for UridMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UridMap").field("len", &self.len()).finish()
    }
}

impl UridMap {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(UridMapState {
                next_urid: 1,
                by_uri: HashMap::new(),
                by_urid: HashMap::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|state| state.by_uri.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IdentifierMap for UridMap {
    fn map_identifier(&self, uri: &str) -> Urid {
        let uri = uri.trim_end_matches('\0');
        if uri.is_empty() {
            return 0;
        }
        let Ok(mut state) = self.state.lock() else {
            return 0;
        };
        if let Some(existing) = state.by_uri.get(uri).copied() {
            return existing;
        }
        let mapped = state.next_urid;
        state.next_urid = state.next_urid.saturating_add(1);
        state.by_uri.insert(uri.to_string(), mapped);
        state.by_urid.insert(mapped, uri.to_string());
        mapped
    }

    fn unmap_identifier(&self, urid: Urid) -> Option<String> {
        let Ok(state) = self.state.lock() else {
            return None;
        };
        state.by_urid.get(&urid).cloned()
    }
}

/// Well-known tokens, resolved once on the control thread.
///
/// `Copy` so the audio side can hold its own copy instead of reaching back
/// into the interner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Urids {
    pub atom_bool: Urid,
    pub atom_double: Urid,
    pub atom_event_transfer: Urid,
    pub atom_float: Urid,
    pub atom_int: Urid,
    pub atom_long: Urid,
    pub atom_object: Urid,
    pub atom_path: Urid,
    pub atom_string: Urid,
    pub atom_urid: Urid,
    pub patch_get: Urid,
    pub patch_property: Urid,
    pub patch_set: Urid,
    pub patch_value: Urid,
}

impl Urids {
    pub fn new(map: &dyn IdentifierMap) -> Self {
        Self {
            atom_bool: map.map_identifier(LV2_ATOM__BOOL),
            atom_double: map.map_identifier(LV2_ATOM__DOUBLE),
            atom_event_transfer: map.map_identifier(LV2_ATOM__EVENT_TRANSFER),
            atom_float: map.map_identifier(LV2_ATOM__FLOAT),
            atom_int: map.map_identifier(LV2_ATOM__INT),
            atom_long: map.map_identifier(LV2_ATOM__LONG),
            atom_object: map.map_identifier(LV2_ATOM__OBJECT),
            atom_path: map.map_identifier(LV2_ATOM__PATH),
            atom_string: map.map_identifier(LV2_ATOM__STRING),
            atom_urid: map.map_identifier(LV2_ATOM__URID),
            patch_get: map.map_identifier(LV2_PATCH__GET),
            patch_property: map.map_identifier(LV2_PATCH__PROPERTY),
            patch_set: map.map_identifier(LV2_PATCH__SET),
            patch_value: map.map_identifier(LV2_PATCH__VALUE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_is_stable_and_starts_at_one() {
        let map = UridMap::new();
        let a = map.map_identifier("urn:a");
        let b = map.map_identifier("urn:b");
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(map.map_identifier("urn:a"), a);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn unmap_returns_original_uri() {
        let map = UridMap::new();
        let urid = map.map_identifier("http://example.org/gain\0");
        assert_eq!(
            map.unmap_identifier(urid).as_deref(),
            Some("http://example.org/gain")
        );
        assert_eq!(map.unmap_identifier(999), None);
        assert_eq!(map.map_identifier(""), 0);
    }

    #[test]
    fn well_known_tokens_are_distinct() {
        let map = UridMap::new();
        let urids = Urids::new(&map);
        let all = [
            urids.atom_bool,
            urids.atom_double,
            urids.atom_event_transfer,
            urids.atom_float,
            urids.atom_int,
            urids.atom_long,
            urids.atom_object,
            urids.atom_path,
            urids.atom_string,
            urids.atom_urid,
            urids.patch_get,
            urids.patch_property,
            urids.patch_set,
            urids.patch_value,
        ];
        let unique: std::collections::HashSet<_> = all.iter().collect();
        assert_eq!(unique.len(), all.len());
        assert!(all.iter().all(|u| *u != 0));
    }
}
