use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{HostError, Result};
use crate::state::{self, PresetMetadata, State, sanitize};

pub const BUNDLE_EXTENSION: &str = "lv2";
pub const DESCRIPTOR_EXTENSION: &str = "toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preset {
    pub uri: String,
    pub label: String,
    pub bank: Option<String>,
    pub path: PathBuf,
    pub active: bool,
}

/// Named group of presets and sub-banks, both kept sorted by label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bank {
    label: String,
    banks: Vec<Bank>,
    presets: Vec<Preset>,
}

impl Bank {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn banks(&self) -> &[Bank] {
        &self.banks
    }

    pub fn presets(&self) -> &[Preset] {
        &self.presets
    }

    pub fn is_empty(&self) -> bool {
        self.banks.is_empty() && self.presets.is_empty()
    }

    pub fn bank(&self, label: &str) -> Option<&Bank> {
        self.banks.iter().find(|b| b.label == label)
    }

    pub fn get_or_create_bank(&mut self, label: &str) -> &mut Bank {
        let pos = match self
            .banks
            .binary_search_by(|b| b.label.as_str().cmp(label))
        {
            Ok(pos) => pos,
            Err(pos) => {
                self.banks.insert(pos, Bank::new(label));
                pos
            }
        };
        &mut self.banks[pos]
    }

    pub fn insert(&mut self, preset: Preset) {
        let pos = self
            .presets
            .partition_point(|p| (&p.label, &p.uri) <= (&preset.label, &preset.uri));
        self.presets.insert(pos, preset);
    }

    fn remove(&mut self, uri: &str) -> Option<Preset> {
        let pos = self.presets.iter().position(|p| p.uri == uri)?;
        Some(self.presets.remove(pos))
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = &Preset> + '_> {
        Box::new(
            self.presets
                .iter()
                .chain(self.banks.iter().flat_map(|b| b.iter())),
        )
    }

    fn iter_mut(&mut self) -> Box<dyn Iterator<Item = &mut Preset> + '_> {
        Box::new(
            self.presets
                .iter_mut()
                .chain(self.banks.iter_mut().flat_map(|b| b.iter_mut())),
        )
    }
}

pub fn bundle_name(plugin_name: Option<&str>, label: &str) -> String {
    match plugin_name {
        Some(prefix) => format!(
            "{}_{}.preset.{BUNDLE_EXTENSION}",
            sanitize(prefix),
            sanitize(label)
        ),
        None => format!("{}.preset.{BUNDLE_EXTENSION}", sanitize(label)),
    }
}

/// Presets of one plugin, grouped into banks, with at most one active.
#[derive(Debug)]
pub struct PresetCatalog {
    plugin_uri: String,
    plugin_name: String,
    search_paths: Vec<PathBuf>,
    save_dir: PathBuf,
    prefix_plugin_name: bool,
    root: Bank,
    index: HashMap<String, Option<String>>,
    active: Option<String>,
}

impl PresetCatalog {
    pub fn new(
        plugin_uri: impl Into<String>,
        plugin_name: impl Into<String>,
        search_paths: Vec<PathBuf>,
        save_dir: PathBuf,
        prefix_plugin_name: bool,
    ) -> Self {
        Self {
            plugin_uri: plugin_uri.into(),
            plugin_name: plugin_name.into(),
            search_paths,
            save_dir,
            prefix_plugin_name,
            root: Bank::default(),
            index: HashMap::new(),
            active: None,
        }
    }

    pub fn root(&self) -> &Bank {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn get(&self, uri: &str) -> Option<&Preset> {
        let bank = match self.index.get(uri)? {
            Some(label) => self.root.bank(label)?,
            None => &self.root,
        };
        bank.presets.iter().find(|p| p.uri == uri)
    }

    pub fn active(&self) -> Option<&Preset> {
        self.get(self.active.as_deref()?)
    }

    fn bank_mut(&mut self, bank: Option<&str>) -> &mut Bank {
        match bank {
            Some(label) => self.root.get_or_create_bank(label),
            None => &mut self.root,
        }
    }

    fn register(&mut self, mut preset: Preset) {
        if let Some(previous) = self.index.get(&preset.uri).cloned() {
            self.bank_mut(previous.as_deref()).remove(&preset.uri);
        }
        preset.active = self.active.as_deref() == Some(preset.uri.as_str());
        self.index.insert(preset.uri.clone(), preset.bank.clone());
        let bank = preset.bank.clone();
        self.bank_mut(bank.as_deref()).insert(preset);
    }

    fn evict(&mut self, uri: &str) -> Option<Preset> {
        let bank = self.index.remove(uri)?;
        let preset = self.bank_mut(bank.as_deref()).remove(uri);
        if let Some(label) = bank {
            self.root.banks.retain(|b| b.label != label || !b.is_empty());
        }
        if self.active.as_deref() == Some(uri) {
            self.active = None;
        }
        preset
    }

    fn set_active(&mut self, uri: Option<&str>) {
        self.active = uri.map(str::to_string);
        for preset in self.root.iter_mut() {
            preset.active = Some(preset.uri.as_str()) == uri;
        }
    }

    fn scan_bundle(&mut self, bundle: &Path) {
        let entries = match fs::read_dir(bundle) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("{}: {e}", bundle.display());
                return;
            }
        };
        let mut descriptors: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && has_extension(p, DESCRIPTOR_EXTENSION))
            .collect();
        descriptors.sort();
        for path in descriptors {
            let metadata = match state::read_metadata(&path) {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("Skipping preset: {e}");
                    continue;
                }
            };
            if metadata
                .plugin
                .as_deref()
                .is_some_and(|plugin| plugin != self.plugin_uri)
            {
                continue;
            }
            self.register(Preset {
                uri: metadata.uri,
                label: metadata.label,
                bank: metadata.bank,
                path,
                active: false,
            });
        }
    }

    /// Rescans every search path. The active preset stays active if it is
    /// still found.
    pub fn discover(&mut self) -> &Bank {
        self.root = Bank::default();
        self.index.clear();
        let paths = self.search_paths.clone();
        for dir in &paths {
            let entries = match fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) => {
                    debug!("Preset path {} unavailable: {e}", dir.display());
                    continue;
                }
            };
            let mut bundles: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_dir() && has_extension(p, BUNDLE_EXTENSION))
                .collect();
            bundles.sort();
            for bundle in bundles {
                self.scan_bundle(&bundle);
            }
        }
        if self
            .active
            .as_deref()
            .is_some_and(|uri| !self.index.contains_key(uri))
        {
            self.active = None;
        }
        info!("Found {} presets for <{}>", self.len(), self.plugin_uri);
        &self.root
    }

    /// Loads a preset, hands its State to `apply`, then marks it active.
    /// The active preset is unchanged if loading or applying fails.
    pub fn activate<F>(&mut self, uri: &str, apply: F) -> Result<&Preset>
    where
        F: FnOnce(&State) -> Result<()>,
    {
        let path = self
            .get(uri)
            .map(|p| p.path.clone())
            .ok_or_else(|| HostError::UnknownPreset(uri.to_string()))?;
        let (_, state) = state::deserialize(&path)?;
        apply(&state)?;
        self.set_active(Some(uri));
        self.get(uri)
            .ok_or_else(|| HostError::UnknownPreset(uri.to_string()))
    }

    pub fn deactivate(&mut self) -> Option<String> {
        let previous = self.active.take();
        self.set_active(None);
        previous
    }

    /// Removes the preset's descriptor, and its bundle once empty.
    pub fn delete(&mut self, uri: &str) -> Result<()> {
        let path = self
            .get(uri)
            .map(|p| p.path.clone())
            .ok_or_else(|| HostError::UnknownPreset(uri.to_string()))?;
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.evict(uri);
        if let Some(bundle) = path.parent() {
            let empty = fs::read_dir(bundle).is_ok_and(|mut entries| entries.next().is_none());
            if empty && let Err(e) = fs::remove_dir(bundle) {
                warn!("Failed to remove empty bundle {}: {e}", bundle.display());
            }
        }
        info!("Deleted preset <{uri}>");
        Ok(())
    }

    /// Writes `state` as a new preset and makes it the active one. A preset
    /// already stored at the same location is replaced.
    pub fn save(
        &mut self,
        state: &State,
        label: &str,
        bank: Option<&str>,
        uri: Option<&str>,
    ) -> Result<Preset> {
        let prefix = self
            .prefix_plugin_name
            .then_some(self.plugin_name.as_str());
        let stem = sanitize(label);
        if stem.is_empty() {
            return Err(HostError::Config("preset label is empty".to_string()));
        }
        let bundle = self.save_dir.join(bundle_name(prefix, label));
        let path = bundle.join(format!("{stem}.{DESCRIPTOR_EXTENSION}"));
        let metadata = PresetMetadata {
            uri: uri.map_or_else(|| state::file_uri(&path), str::to_string),
            label: label.to_string(),
            bank: bank.map(str::to_string),
            plugin: Some(self.plugin_uri.clone()),
        };
        state::serialize(state, &metadata, &path)?;

        let replaced: Vec<String> = self
            .root
            .iter()
            .filter(|p| p.path == path)
            .map(|p| p.uri.clone())
            .collect();
        for old in replaced {
            self.evict(&old);
        }
        self.register(Preset {
            uri: metadata.uri.clone(),
            label: metadata.label,
            bank: metadata.bank,
            path,
            active: false,
        });
        self.set_active(Some(&metadata.uri));
        info!("Saved preset '{label}' to {}", bundle.display());
        self.get(&metadata.uri)
            .cloned()
            .ok_or(HostError::UnknownPreset(metadata.uri))
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension().is_some_and(|e| e == extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Value;
    use crate::state::StateEntry;

    fn state(gain: f32) -> State {
        State::new(
            vec![StateEntry {
                key: "gain".to_string(),
                value: Value::Float(gain),
            }],
            None,
        )
    }

    fn new_catalog(dir: &Path) -> PresetCatalog {
        PresetCatalog::new(
            "urn:synth",
            "Synth X",
            vec![dir.to_path_buf()],
            dir.to_path_buf(),
            true,
        )
    }

    fn preset(label: &str) -> Preset {
        Preset {
            uri: format!("urn:preset:{label}"),
            label: label.to_string(),
            bank: None,
            path: PathBuf::new(),
            active: false,
        }
    }

    #[test]
    fn bundle_names_are_sanitized() {
        assert_eq!(
            bundle_name(Some("Synth X"), "My Lead!"),
            "Synth_X_My_Lead_.preset.lv2"
        );
        assert_eq!(bundle_name(None, "a/b"), "a_b.preset.lv2");
    }

    #[test]
    fn banks_and_presets_are_sorted() {
        let mut root = Bank::default();
        for label in ["Pads", "Bass", "Leads", "Bass"] {
            root.get_or_create_bank(label);
        }
        let labels: Vec<_> = root.banks().iter().map(Bank::label).collect();
        assert_eq!(labels, ["Bass", "Leads", "Pads"]);

        for label in ["zeta", "Alpha", "beta"] {
            root.insert(preset(label));
        }
        let labels: Vec<_> = root.presets().iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, ["Alpha", "beta", "zeta"]);
    }

    #[test]
    fn save_discover_activate_delete() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = new_catalog(dir.path());

        let lead = catalog.save(&state(0.5), "My Lead!", None, None).unwrap();
        assert!(lead.active);
        assert!(
            dir.path()
                .join("Synth_X_My_Lead_.preset.lv2")
                .join("My_Lead_.toml")
                .is_file()
        );
        let pad = catalog
            .save(&state(0.1), "Pad", Some("Ambient"), Some("urn:preset:pad"))
            .unwrap();
        assert_eq!(catalog.active().map(|p| p.uri.as_str()), Some("urn:preset:pad"));
        assert!(!catalog.get(&lead.uri).unwrap().active);

        let mut fresh = new_catalog(dir.path());
        fresh.discover();
        assert_eq!(fresh.len(), 2);
        assert!(fresh.active().is_none());
        assert_eq!(fresh.root().bank("Ambient").unwrap().presets()[0].uri, pad.uri);

        let mut applied = vec![];
        fresh
            .activate(&lead.uri, |s| {
                applied.push(s.get("gain").cloned());
                Ok(())
            })
            .unwrap();
        assert_eq!(applied, vec![Some(Value::Float(0.5))]);
        fresh.activate("urn:preset:pad", |_| Ok(())).unwrap();
        assert!(!fresh.get(&lead.uri).unwrap().active);
        assert!(fresh.get("urn:preset:pad").unwrap().active);
        assert_eq!(fresh.root().iter().filter(|p| p.active).count(), 1);

        fresh.delete("urn:preset:pad").unwrap();
        assert!(fresh.active().is_none());
        assert!(fresh.root().bank("Ambient").is_none());
        assert!(!dir.path().join("Synth_X_Pad.preset.lv2").exists());
        assert_eq!(fresh.root().iter().filter(|p| p.active).count(), 0);
    }

    #[test]
    fn failed_apply_keeps_previous_active() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = new_catalog(dir.path());
        let a = catalog.save(&state(0.2), "A", None, None).unwrap();
        let b = catalog.save(&state(0.3), "B", None, None).unwrap();
        catalog.activate(&a.uri, |_| Ok(())).unwrap();
        let err = catalog
            .activate(&b.uri, |_| Err(HostError::UnknownControl("x".to_string())))
            .unwrap_err();
        assert!(matches!(err, HostError::UnknownControl(_)));
        assert_eq!(catalog.active().map(|p| p.uri.clone()), Some(a.uri));
        assert!(matches!(
            catalog.activate("urn:missing", |_| Ok(())),
            Err(HostError::UnknownPreset(_))
        ));
    }

    #[test]
    fn empty_label_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = new_catalog(dir.path());
        assert!(matches!(
            catalog.save(&state(0.2), "", None, None),
            Err(HostError::Config(_))
        ));
        assert!(catalog.is_empty());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

        let blank = catalog.save(&state(0.2), " ", None, None).unwrap();
        catalog.discover();
        assert_eq!(catalog.get(&blank.uri).map(|p| p.label.as_str()), Some(" "));
    }

    #[test]
    fn saving_same_label_replaces_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = new_catalog(dir.path());
        catalog.save(&state(0.2), "Init", None, None).unwrap();
        catalog.save(&state(0.9), "Init", None, Some("urn:preset:init")).unwrap();
        assert_eq!(catalog.len(), 1);
        let (_, loaded) =
            state::deserialize(&catalog.get("urn:preset:init").unwrap().path).unwrap();
        assert_eq!(loaded.get("gain"), Some(&Value::Float(0.9)));
    }

    #[test]
    fn discovery_skips_foreign_and_malformed_presets() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("Mixed.preset.lv2");
        fs::create_dir_all(&bundle).unwrap();
        fs::write(
            bundle.join("other.toml"),
            "uri = \"urn:o\"\nlabel = \"Other\"\nplugin = \"urn:other\"\n",
        )
        .unwrap();
        fs::write(bundle.join("broken.toml"), "label = ").unwrap();
        fs::write(bundle.join("mine.toml"), "uri = \"urn:m\"\nlabel = \"Mine\"\n").unwrap();
        fs::write(bundle.join("notes.txt"), "ignored").unwrap();

        let mut catalog = new_catalog(dir.path());
        let root = catalog.discover();
        let uris: Vec<_> = root.iter().map(|p| p.uri.as_str()).collect();
        assert_eq!(uris, ["urn:m"]);
    }

    #[test]
    fn deleting_one_of_many_keeps_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("Synth.lv2");
        fs::create_dir_all(&bundle).unwrap();
        fs::write(bundle.join("a.toml"), "uri = \"urn:a\"\nlabel = \"A\"\n").unwrap();
        fs::write(bundle.join("b.toml"), "uri = \"urn:b\"\nlabel = \"B\"\n").unwrap();
        let mut catalog = new_catalog(dir.path());
        catalog.discover();
        catalog.delete("urn:a").unwrap();
        assert!(bundle.is_dir());
        catalog.delete("urn:b").unwrap();
        assert!(!bundle.exists());
        assert!(catalog.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn delete_evicts_even_if_bundle_stays() {
        let search = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let real = elsewhere.path().join("Real");
        fs::create_dir_all(&real).unwrap();
        fs::write(real.join("a.toml"), "uri = \"urn:a\"\nlabel = \"A\"\n").unwrap();
        std::os::unix::fs::symlink(&real, search.path().join("Linked.lv2")).unwrap();

        let mut catalog = new_catalog(search.path());
        catalog.discover();
        catalog.activate("urn:a", |_| Ok(())).unwrap();
        catalog.delete("urn:a").unwrap();
        assert!(catalog.get("urn:a").is_none());
        assert!(catalog.active().is_none());
        assert!(!real.join("a.toml").exists());
        assert!(search.path().join("Linked.lv2").exists());
    }
}
