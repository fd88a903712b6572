//! Per-channel reducers.
//!
//! Each accumulator keeps its value behind an `Arc` and mutates through
//! `Arc::make_mut`, so a snapshot already handed to an observer is never
//! changed in place; the next update copies instead.

use std::collections::HashSet;
use std::sync::Arc;

use crate::model::{RelatedQuestion, Source, SourceId};

/// Ordered, de-duplicated list of cited sources.
#[derive(Debug, Default)]
pub struct SourcesAccumulator {
    sources: Arc<Vec<Source>>,
    seen: HashSet<SourceId>,
}

impl SourcesAccumulator {
    /// Appends sources whose id was not seen before, keeping the first
    /// occurrence. Returns `true` if the snapshot changed.
    pub fn apply(&mut self, batch: Vec<Source>) -> bool {
        let mut changed = false;
        for source in batch {
            if self.seen.insert(source.id.clone()) {
                Arc::make_mut(&mut self.sources).push(source);
                changed = true;
            }
        }
        changed
    }

    pub fn snapshot(&self) -> Arc<Vec<Source>> {
        self.sources.clone()
    }
}

/// Running answer text.
#[derive(Debug, Default)]
pub struct AnswerAccumulator {
    text: Arc<String>,
}

impl AnswerAccumulator {
    /// Appends `delta` verbatim. Returns `false` for an empty delta.
    pub fn apply(&mut self, delta: &str) -> bool {
        if delta.is_empty() {
            return false;
        }
        Arc::make_mut(&mut self.text).push_str(delta);
        true
    }

    pub fn snapshot(&self) -> Arc<String> {
        self.text.clone()
    }
}

/// Related questions in arrival order. No de-duplication.
#[derive(Debug, Default)]
pub struct RelatedAccumulator {
    questions: Arc<Vec<RelatedQuestion>>,
}

impl RelatedAccumulator {
    pub fn apply(&mut self, batch: Vec<RelatedQuestion>) -> bool {
        if batch.is_empty() {
            return false;
        }
        Arc::make_mut(&mut self.questions).extend(batch);
        true
    }

    pub fn snapshot(&self) -> Arc<Vec<RelatedQuestion>> {
        self.questions.clone()
    }
}
