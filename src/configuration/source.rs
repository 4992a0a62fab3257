use std::collections::HashMap;
use std::fmt::Debug;
use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::configuration::Error;

/// Separator between the segments of a hierarchical configuration key.
pub const KEY_DELIMITER: char = ':';

/// A named provider of configuration values.
///
/// Keys are hierarchical (`Section:Sub:Key`) and matched ASCII
/// case-insensitively. A source may be backed by mutable state, so every
/// lookup must read the current contents.
pub trait ConfigSource: Debug + Send + Sync {
    fn name(&self) -> &str;

    fn get(&self, key: &str) -> Option<String>;

    /// All keys currently known to the source, in their original casing.
    fn keys(&self) -> Vec<String>;
}

fn normalize_key(key: &str) -> String {
    key.to_ascii_lowercase()
}

#[derive(Clone, Debug, Default)]
struct KeyTable {
    // normalized key <-> (original key, value)
    entries: HashMap<String, (String, String)>,
}

impl KeyTable {
    fn insert(&mut self, key: String, value: String) {
        self.entries.insert(normalize_key(&key), (key, value));
    }

    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .get(&normalize_key(key))
            .map(|(_, value)| value.clone())
    }

    fn keys(&self) -> Vec<String> {
        self.entries.values().map(|(key, _)| key.clone()).collect()
    }
}

/// Fixed in-memory key/value pairs.
#[derive(Clone, Debug)]
pub struct MemorySource {
    name: String,
    table: KeyTable,
}

impl MemorySource {
    pub fn new<I, K, V>(name: &str, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut table = KeyTable::default();
        for (key, value) in pairs {
            table.insert(key.into(), value.into());
        }

        Self {
            name: name.to_string(),
            table,
        }
    }
}

impl ConfigSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Option<String> {
        self.table.get(key)
    }

    fn keys(&self) -> Vec<String> {
        self.table.keys()
    }
}

/// A TOML document flattened into `:`-joined keys.
///
/// Tables contribute their key as a segment, arrays their element index.
#[derive(Clone, Debug)]
pub struct TomlFileSource {
    name: String,
    table: KeyTable,
}

impl TomlFileSource {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        info!("Loaded configuration file {}", path.display());
        Self::parse(&path.display().to_string(), &content)
    }

    /// Same as `load`, but a missing file yields an empty source.
    pub fn load_optional<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        if !path.exists() {
            info!(
                "Configuration file {} not found, continuing without it",
                path.display()
            );
            return Ok(Self {
                name: path.display().to_string(),
                table: KeyTable::default(),
            });
        }
        Self::load(path)
    }

    pub fn parse(name: &str, content: &str) -> Result<Self, Error> {
        let document: toml::Table = toml::from_str(content)?;

        let mut table = KeyTable::default();
        for (key, value) in &document {
            flatten_value(key.clone(), value, &mut table);
        }
        debug!("Flattened {} keys from {name}", table.entries.len());

        Ok(Self {
            name: name.to_string(),
            table,
        })
    }
}

fn flatten_value(prefix: String, value: &toml::Value, table: &mut KeyTable) {
    match value {
        toml::Value::Table(children) => {
            for (key, child) in children {
                flatten_value(format!("{prefix}{KEY_DELIMITER}{key}"), child, table);
            }
        }
        toml::Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                flatten_value(format!("{prefix}{KEY_DELIMITER}{index}"), item, table);
            }
        }
        toml::Value::String(s) => table.insert(prefix, s.clone()),
        toml::Value::Datetime(dt) => table.insert(prefix, dt.to_string()),
        other => table.insert(prefix, other.to_string()),
    }
}

impl ConfigSource for TomlFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Option<String> {
        self.table.get(key)
    }

    fn keys(&self) -> Vec<String> {
        self.table.keys()
    }
}

/// The live process environment, restricted to variables starting with a prefix.
///
/// The prefix is stripped and `__` in the rest of the name stands for the key
/// delimiter, so `STOREFRONT_ExternalProviders__Facebook__AppId` resolves
/// `ExternalProviders:Facebook:AppId`.
#[derive(Clone, Debug)]
pub struct EnvironmentSource {
    prefix: String,
}

impl EnvironmentSource {
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    fn variable_to_key(&self, variable: &str) -> Option<String> {
        let head = variable.get(..self.prefix.len())?;
        if !head.eq_ignore_ascii_case(&self.prefix) {
            return None;
        }

        let name = &variable[self.prefix.len()..];
        if name.is_empty() {
            return None;
        }
        Some(name.replace("__", &KEY_DELIMITER.to_string()))
    }
}

// Variables that are not valid unicode are invisible to configuration.
fn process_variables() -> impl Iterator<Item = (String, String)> {
    std::env::vars_os().filter_map(|(variable, value)| {
        Some((variable.into_string().ok()?, value.into_string().ok()?))
    })
}

impl ConfigSource for EnvironmentSource {
    fn name(&self) -> &str {
        "environment"
    }

    fn get(&self, key: &str) -> Option<String> {
        process_variables()
            .filter_map(|(variable, value)| {
                self.variable_to_key(&variable).map(|name| (name, value))
            })
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value)
    }

    fn keys(&self) -> Vec<String> {
        process_variables()
            .filter_map(|(variable, _)| self.variable_to_key(&variable))
            .collect()
    }
}
