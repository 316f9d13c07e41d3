//! Label sets and their interning registry.
//!
//! Every entry carries a [`LabelSetId`] instead of a copy of its labels. The
//! [`LabelRegistry`] hands out ids on first use and resolves them again on
//! the worker thread when batches are assembled.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::error::{LabelError, LogError};

/// Static key/value metadata identifying a Loki stream.
///
/// Keys are kept sorted so serialisation is deterministic. Label names follow
/// Loki's `[a-zA-Z_][a-zA-Z0-9_]*` rule.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct LabelSet(BTreeMap<String, String>);

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a label set from name/value pairs, validating every name.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, LabelError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut labels = Self::new();
        for (name, value) in pairs {
            labels.insert(name, value)?;
        }
        Ok(labels)
    }

    /// Insert a label, returning the previous value for `name` if any.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Option<String>, LabelError> {
        let name = name.into();
        if !is_valid_label_name(&name) {
            return Err(LabelError::InvalidName(name));
        }
        Ok(self.0.insert(name, value.into()))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}={value:?}")?;
        }
        f.write_str("}")
    }
}

fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Stable identifier of an interned [`LabelSet`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelSetId(u32);

impl LabelSetId {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

#[derive(Default)]
struct RegistryInner {
    ids: HashMap<LabelSet, LabelSetId>,
    sets: Vec<Arc<LabelSet>>,
}

/// Bounded interning table shared by producers and the worker.
pub struct LabelRegistry {
    inner: RwLock<RegistryInner>,
    limit: usize,
}

impl LabelRegistry {
    /// Create a registry holding at most `limit` distinct label sets.
    pub fn new(limit: usize) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            limit,
        }
    }

    /// Return the id for `labels`, registering it on first use.
    ///
    /// Known label sets only take the read lock.
    pub fn intern(&self, labels: &LabelSet) -> Result<LabelSetId, LogError> {
        if let Some(id) = self.inner.read().ids.get(labels) {
            return Ok(*id);
        }
        let mut inner = self.inner.write();
        if let Some(id) = inner.ids.get(labels) {
            return Ok(*id);
        }
        if inner.sets.len() >= self.limit {
            return Err(LogError::LabelLimit(self.limit));
        }
        let raw = u32::try_from(inner.sets.len()).map_err(|_| LogError::LabelLimit(self.limit))?;
        let id = LabelSetId(raw);
        inner.sets.push(Arc::new(labels.clone()));
        inner.ids.insert(labels.clone(), id);
        Ok(id)
    }

    /// Look up a previously interned label set.
    pub fn resolve(&self, id: LabelSetId) -> Option<Arc<LabelSet>> {
        self.inner.read().sets.get(id.0 as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for LabelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabelRegistry")
            .field("len", &self.len())
            .field("limit", &self.limit)
            .finish()
    }
}
