//! Active Stroke Registry
//!
//! Tracks strokes that have started but not ended so a participant joining
//! mid-draw sees them immediately. Point-delta blocks are kept exactly as
//! received; appending never re-reads or re-encodes earlier blocks.
//!
//! Only an explicit end removes an entry. A disconnect leaves the stroke in
//! place so a flaky client can resume it.

use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::envelope::ProjectId;
use crate::error::Result;
use crate::payload::{ActiveStroke, StrokeInit};
use crate::store::{CoordinationStore, StrokeMeta, StrokeRecord};

/// Tool used when the first append did not name one
pub const DEFAULT_TOOL: &str = "pen";
/// Color used when the first append did not name one
pub const DEFAULT_COLOR: &str = "#000000";
/// Width used when the first append did not name one
pub const DEFAULT_STROKE_WIDTH: f64 = 2.0;

/// What an append did to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// First append: entry created and block stored
    Started,
    /// Block stored on an existing entry
    Appended,
    /// Unknown stroke without init metadata; nothing recorded
    Untracked,
}

/// Active-stroke table of one project
#[derive(Clone)]
pub struct ActiveStrokeRegistry {
    project_id: ProjectId,
    store: Arc<dyn CoordinationStore>,
}

impl ActiveStrokeRegistry {
    /// Registry for one project
    #[must_use]
    pub fn new(project_id: impl Into<ProjectId>, store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            project_id: project_id.into(),
            store,
        }
    }

    /// Record an append.
    ///
    /// An unseen stroke is created only when `init` is supplied; the
    /// `points` block, if any, is then appended as one opaque unit.
    pub async fn on_append(
        &self,
        owner_id: &str,
        stroke_id: &str,
        page_id: Option<Value>,
        init: Option<StrokeInit>,
        points: Option<Value>,
    ) -> Result<AppendOutcome> {
        let mut started = false;
        if let Some(init) = init {
            let meta = StrokeMeta {
                owner_id: owner_id.to_string(),
                page_id: page_id.unwrap_or(Value::Null),
                tool: init.tool,
                color: init.color,
                stroke_width: init.stroke_width,
            };
            started = self
                .store
                .insert_stroke_if_absent(&self.project_id, stroke_id, meta)
                .await?;
        }

        let Some(points) = points else {
            return Ok(if started {
                AppendOutcome::Started
            } else {
                AppendOutcome::Appended
            });
        };

        if !self
            .store
            .append_stroke_block(&self.project_id, stroke_id, points)
            .await?
        {
            debug!(project_id = %self.project_id, stroke_id, "Append for untracked stroke");
            return Ok(AppendOutcome::Untracked);
        }

        Ok(if started {
            AppendOutcome::Started
        } else {
            AppendOutcome::Appended
        })
    }

    /// Remove a stroke; returns whether it was active
    pub async fn on_end(&self, stroke_id: &str) -> Result<bool> {
        Ok(self
            .store
            .remove_stroke(&self.project_id, stroke_id)
            .await?
            .is_some())
    }

    /// Every still-active stroke with its full buffer
    pub async fn snapshot(&self) -> Result<Vec<ActiveStroke>> {
        Ok(self
            .store
            .strokes(&self.project_id)
            .await?
            .into_iter()
            .map(into_active_stroke)
            .collect())
    }
}

fn into_active_stroke(record: StrokeRecord) -> ActiveStroke {
    let StrokeRecord {
        stroke_id,
        meta,
        blocks,
    } = record;
    ActiveStroke {
        stroke_id,
        page_id: meta.page_id,
        user_id: meta.owner_id,
        tool: meta.tool.unwrap_or_else(|| DEFAULT_TOOL.to_string()),
        color: meta.color.unwrap_or_else(|| DEFAULT_COLOR.to_string()),
        stroke_width: meta.stroke_width.unwrap_or(DEFAULT_STROKE_WIDTH),
        points: blocks,
    }
}
