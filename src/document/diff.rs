use std::collections::BTreeSet;

use super::Document;

/// Section-level difference between two documents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
}

impl SectionDiff {
    pub fn between(old: &Document, new: &Document) -> Self {
        let mut diff = SectionDiff::default();
        let names: BTreeSet<&str> = old.section_names().chain(new.section_names()).collect();

        for name in names {
            match (old.section(name), new.section(name)) {
                (None, Some(_)) => diff.added.push(name.to_string()),
                (Some(_), None) => diff.removed.push(name.to_string()),
                (Some(a), Some(b)) if a != b => diff.modified.push(name.to_string()),
                _ => {}
            }
        }
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    /// Every touched section, sorted.
    pub fn sections(&self) -> Vec<String> {
        let mut all: Vec<String> = self
            .added
            .iter()
            .chain(&self.removed)
            .chain(&self.modified)
            .cloned()
            .collect();
        all.sort();
        all
    }
}

/// Names of the top-level sections that differ between `old` and `new`.
pub fn changed_sections(old: &Document, new: &Document) -> Vec<String> {
    SectionDiff::between(old, new).sections()
}
