use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;

use tracing::debug;

use crate::configuration::source::{
    ConfigSource, EnvironmentSource, MemorySource, TomlFileSource, KEY_DELIMITER,
};
use crate::configuration::{defaults, Error};

/// Ordered list of configuration sources.
///
/// Sources registered later take precedence over earlier ones. Lookups are
/// not cached: every call reads the current content of every source.
#[derive(Debug, Default)]
pub struct ConfigStore {
    sources: Vec<Box<dyn ConfigSource>>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in defaults, then the TOML file at `path` (if present), then the
    /// process environment restricted to `env_prefix`.
    pub fn load_default<P: AsRef<Path>>(path: P, env_prefix: &str) -> Result<Self, Error> {
        let mut store = Self::new();
        store.add_source(MemorySource::new("defaults", defaults()));
        store.add_source(TomlFileSource::load_optional(path)?);
        store.add_source(EnvironmentSource::with_prefix(env_prefix));
        Ok(store)
    }

    pub fn add_source<S: ConfigSource + 'static>(&mut self, source: S) -> &mut Self {
        debug!("Registering configuration source '{}'", source.name());
        self.sources.push(Box::new(source));
        self
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|source| source.name()).collect()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.sources.iter().rev().find_map(|source| source.get(key))
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// A value whose absence must abort startup.
    pub fn require(&self, key: &str) -> Result<String, Error> {
        match self.get(key) {
            Some(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(Error::ConfigMissing(key.to_string())),
        }
    }

    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>, Error> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };

        value.trim().parse::<T>().map(Some).map_err(|_| {
            Error::InvalidValue {
                key: key.to_string(),
                value,
            }
        })
    }

    pub fn get_parsed_or<T: FromStr>(&self, key: &str, default: T) -> Result<T, Error> {
        Ok(self.get_parsed(key)?.unwrap_or(default))
    }

    /// Distinct immediate child segment names of `section`, across all sources.
    ///
    /// Names keep the casing of the first source that declares them.
    pub fn children(&self, section: &str) -> BTreeSet<String> {
        let prefix = format!("{section}{KEY_DELIMITER}");
        let mut seen = BTreeSet::new();
        let mut children = BTreeSet::new();

        for key in self.sources.iter().flat_map(|source| source.keys()) {
            let Some(head) = key.get(..prefix.len()) else {
                continue;
            };
            if !head.eq_ignore_ascii_case(&prefix) {
                continue;
            }

            let rest = &key[prefix.len()..];
            let child = rest.split(KEY_DELIMITER).next().unwrap_or(rest);
            if !child.is_empty() && seen.insert(child.to_ascii_lowercase()) {
                children.insert(child.to_string());
            }
        }

        children
    }
}
