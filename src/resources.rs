// src/resources.rs
//
// =============================================================================
// CPUSETISO: HOST RESOURCE SYNTAX
// =============================================================================
//
// The flat resource vocabulary shared with the orchestrator: named scalar
// quantities with a role, e.g. "cpus(*):4;gpus(*):1". The estimator reports
// its revocable verdict in the same shape.

use crate::errors::{CpusetError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_ROLE: &str = "*";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    pub role: String,
    pub value: f64,
    #[serde(default)]
    pub revocable: bool,
}

impl Resource {
    pub fn new(name: impl Into<String>, value: f64, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            value,
            revocable: false,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}):{}", self.name, self.role, self.value)?;
        if self.revocable {
            write!(f, "{{REV}}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources(Vec<Resource>);

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the host resource syntax: `name(role):value` items separated
    /// by `;`. The role is optional and defaults to `*`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut resources = Vec::new();

        for item in text.split(';') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }

            let (head, value) = item
                .rsplit_once(':')
                .ok_or_else(|| CpusetError::Parse(format!("resource '{}' has no value", item)))?;

            let (name, role) = match head.split_once('(') {
                Some((name, rest)) => {
                    let role = rest.strip_suffix(')').ok_or_else(|| {
                        CpusetError::Parse(format!("unclosed role in '{}'", item))
                    })?;
                    (name.trim(), role.trim())
                }
                None => (head.trim(), DEFAULT_ROLE),
            };

            if name.is_empty() {
                return Err(CpusetError::Parse(format!("resource '{}' has no name", item)));
            }

            let value: f64 = value
                .trim()
                .parse()
                .map_err(|_| CpusetError::Parse(format!("bad value in '{}'", item)))?;

            resources.push(Resource::new(name, value, role));
        }

        Ok(Self(resources))
    }

    pub fn push(&mut self, resource: Resource) {
        self.0.push(resource);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.0.iter()
    }

    /// Summed value of every entry with the given name, if any exist.
    pub fn get(&self, name: &str) -> Option<f64> {
        let mut found = false;
        let mut total = 0.0;
        for r in &self.0 {
            if r.name == name {
                found = true;
                total += r.value;
            }
        }
        found.then_some(total)
    }

    pub fn cpus(&self) -> f64 {
        self.get("cpus").unwrap_or(0.0)
    }

    pub fn gpus(&self) -> f64 {
        self.get("gpus").unwrap_or(0.0)
    }

    /// Marks every entry revocable: capacity offered for preemptible work.
    pub fn make_revocable(mut self) -> Self {
        for r in &mut self.0 {
            r.revocable = true;
        }
        self
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.0.iter().map(|r| r.to_string()).collect();
        write!(f, "{}", rendered.join(";"))
    }
}

impl FromIterator<Resource> for Resources {
    fn from_iter<T: IntoIterator<Item = Resource>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_roles_and_defaults() {
        let r = Resources::parse("cpus(*):4;gpus:1;mem(batch):512").unwrap();
        assert_eq!(r.cpus(), 4.0);
        assert_eq!(r.gpus(), 1.0);
        assert_eq!(r.get("mem"), Some(512.0));
        assert_eq!(
            r.iter().find(|res| res.name == "mem").unwrap().role,
            "batch"
        );
        assert_eq!(r.iter().find(|res| res.name == "gpus").unwrap().role, "*");
    }

    #[test]
    fn rejects_malformed_items() {
        assert!(Resources::parse("cpus").is_err());
        assert!(Resources::parse("cpus(*:4").is_err());
        assert!(Resources::parse("cpus(*):four").is_err());
        assert!(Resources::parse("(role):4").is_err());
    }

    #[test]
    fn revocable_marks_every_entry() {
        let r = Resources::parse("core:2").unwrap().make_revocable();
        assert!(r.iter().all(|res| res.revocable));
    }

    #[test]
    fn empty_text_is_empty_resources() {
        assert!(Resources::parse("").unwrap().is_empty());
        assert!(Resources::parse(" ; ").unwrap().is_empty());
    }
}
