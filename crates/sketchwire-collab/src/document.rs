//! Document persistence seam
//!
//! Element and page content belongs to the persistence service. The router
//! hands it every durable mutation after the version has been assigned, and
//! the sync coordinator reads the element set from it. `MemoryDocumentStore`
//! stands in for that service in single-process deployments and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

use crate::envelope::{Envelope, MessageType};
use crate::error::{Error, Result};
use crate::payload::ElementUpdate;

/// Persistence collaborator for document content
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Record a durable mutation (the envelope already carries its version)
    async fn apply(&self, envelope: &Envelope) -> Result<()>;

    /// Every element of a project, in a stable order
    async fn elements(&self, project_id: &str) -> Result<Vec<Value>>;
}

/// In-memory element mirror keyed by element id
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    projects: DashMap<String, BTreeMap<String, Value>>,
}

impl MemoryDocumentStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a project with elements (each must carry a string `id`)
    pub fn seed(&self, project_id: &str, elements: impl IntoIterator<Item = Value>) -> Result<()> {
        let mut doc = self.projects.entry(project_id.to_string()).or_default();
        for element in elements {
            let id = element_id(&element)
                .ok_or_else(|| Error::Document("seeded element without id".into()))?;
            doc.insert(id, element);
        }
        Ok(())
    }

    /// Number of elements currently stored for a project
    #[must_use]
    pub fn element_count(&self, project_id: &str) -> usize {
        self.projects.get(project_id).map(|d| d.len()).unwrap_or(0)
    }
}

fn element_id(element: &Value) -> Option<String> {
    element.get("id").and_then(Value::as_str).map(str::to_string)
}

fn payload_str<'a>(envelope: &'a Envelope, field: &str) -> Option<&'a str> {
    envelope.payload.get(field).and_then(Value::as_str)
}

fn merge(target: &mut Value, changes: &Map<String, Value>) {
    if let Value::Object(fields) = target {
        for (key, value) in changes {
            fields.insert(key.clone(), value.clone());
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn apply(&self, envelope: &Envelope) -> Result<()> {
        let mut doc = self
            .projects
            .entry(envelope.project_id.clone())
            .or_default();

        match envelope.kind {
            MessageType::ElementCreate | MessageType::StrokeEnd => {
                // A finished stroke arrives here only if the client attached the finalized element.
                if let Some(element) = envelope.payload.get("element") {
                    let id = element_id(element)
                        .ok_or_else(|| Error::Document("element without id".into()))?;
                    doc.insert(id, element.clone());
                }
            }
            MessageType::ElementUpdate => {
                let update = ElementUpdate::from_envelope(envelope)?;
                let id = update
                    .target()?
                    .map(str::to_string)
                    .ok_or_else(|| Error::Document("update without target element".into()))?;

                if let Some(element) = envelope.payload.get("element") {
                    doc.insert(id, element.clone());
                } else if let Some(Value::Object(changes)) = envelope.payload.get("changes") {
                    match doc.get_mut(&id) {
                        Some(existing) => merge(existing, changes),
                        None => debug!(element_id = %id, "Update for unknown element"),
                    }
                }
            }
            MessageType::ElementDelete => {
                if let Some(id) = payload_str(envelope, "elementId") {
                    doc.remove(id);
                }
            }
            MessageType::PageDelete => {
                if let Some(page_id) = envelope.payload.get("pageId") {
                    doc.retain(|_, element| element.get("pageId") != Some(page_id));
                }
            }
            // Page metadata is not mirrored here.
            _ => {}
        }
        Ok(())
    }

    async fn elements(&self, project_id: &str) -> Result<Vec<Value>> {
        Ok(self
            .projects
            .get(project_id)
            .map(|doc| doc.values().cloned().collect())
            .unwrap_or_default())
    }
}
