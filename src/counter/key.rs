use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Serialize;

use crate::error::{Error, Result};

/// Ordered `(field, value)` tags describing where a counter came from, e.g.
/// the HTTP method and status class of an access-log line.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CounterKeyMetaData {
    entries: Vec<(String, String)>,
}

impl CounterKeyMetaData {
    /// Pair `fields` with `values`; both must have the same length.
    pub fn new(fields: Vec<String>, values: Vec<String>) -> Result<Self> {
        if fields.len() != values.len() {
            return Err(Error::MetadataArity {
                fields: fields.len(),
                values: values.len(),
            });
        }
        Ok(Self {
            entries: fields.into_iter().zip(values).collect(),
        })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(f, _)| f.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(_, v)| v.as_str())
    }

    pub fn value(&self, field: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Union of both field sets in first-seen order. A field present in both
    /// with different values gets `"mine+theirs"`.
    pub fn merge(&self, other: &CounterKeyMetaData) -> CounterKeyMetaData {
        let mut entries = self.entries.clone();
        for (field, value) in &other.entries {
            match entries.iter_mut().find(|(f, _)| f == field) {
                Some((_, existing)) if *existing != *value => {
                    *existing = format!("{existing}+{value}");
                }
                Some(_) => {}
                None => entries.push((field.clone(), value.clone())),
            }
        }
        CounterKeyMetaData { entries }
    }
}

/// Identity of a counter. Equality and hashing look at the name only; the
/// metadata just rides along.
#[derive(Debug, Clone, Serialize)]
pub struct CounterKey {
    name: String,
    meta_data: CounterKeyMetaData,
}

impl CounterKey {
    pub fn new(name: impl Into<String>, meta_data: CounterKeyMetaData) -> Self {
        Self {
            name: name.into(),
            meta_data,
        }
    }

    /// Key without metadata.
    pub fn of(name: impl Into<String>) -> Self {
        Self::new(name, CounterKeyMetaData::empty())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn meta_data(&self) -> &CounterKeyMetaData {
        &self.meta_data
    }

    /// Key for a counter combining `self` and `other`.
    pub fn merge(&self, other: &CounterKey) -> CounterKey {
        let name = if self.name == other.name {
            format!("{}-merged", self.name)
        } else {
            format!("{}-{}-merged", self.name, other.name)
        };
        CounterKey {
            name,
            meta_data: self.meta_data.merge(&other.meta_data),
        }
    }
}

impl PartialEq for CounterKey {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for CounterKey {}

impl Hash for CounterKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
