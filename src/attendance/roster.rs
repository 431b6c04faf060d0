use std::collections::HashSet;

use rocket::FromFormField;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::Student;

/// One line of an attendance sheet: a student and their working state.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RosterEntry {
    pub student: Student,
    pub present: bool,
    /// Only meaningful while `present` is false.
    pub justification: String,
    pub existing_record_id: Option<i64>,
}

impl RosterEntry {
    pub fn new(student: Student) -> Self {
        Self {
            student,
            present: false,
            justification: String::new(),
            existing_record_id: None,
        }
    }

    pub fn student_id(&self) -> &str {
        &self.student.id
    }

    /// The justification as it should be stored: cleared for present students.
    pub fn stored_justification(&self) -> Option<&str> {
        if self.present {
            None
        } else {
            Some(self.justification.as_str())
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RosterStats {
    pub present_count: usize,
    pub absent_count: usize,
    pub total_count: usize,
    /// Whole-number percentage of present students, 0 for an empty roster.
    pub rate: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromFormField, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceFilter {
    #[default]
    #[field(value = "all")]
    All,
    #[field(value = "present")]
    Present,
    #[field(value = "absent")]
    Absent,
}

impl PresenceFilter {
    fn matches(&self, entry: &RosterEntry) -> bool {
        match self {
            PresenceFilter::All => true,
            PresenceFilter::Present => entry.present,
            PresenceFilter::Absent => !entry.present,
        }
    }
}

/// A single local edit, addressed by student id where it targets one entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RosterEdit {
    Toggle { student_id: String },
    SetJustification { student_id: String, text: String },
    MarkAll { present: bool },
}

/// The in-memory attendance sheet for one session. Rebuilt from storage on
/// every load; student ids are unique within it.
#[derive(Serialize, Debug, Clone, PartialEq, Default)]
pub struct Roster {
    entries: Vec<RosterEntry>,
}

impl Roster {
    /// Builds a roster, dropping any repeated student after its first entry.
    pub fn from_entries(entries: impl IntoIterator<Item = RosterEntry>) -> Self {
        let mut seen = HashSet::new();
        let entries = entries
            .into_iter()
            .filter(|entry| seen.insert(entry.student_id().to_string()))
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, student_id: &str) -> Option<&RosterEntry> {
        self.entries.iter().find(|e| e.student_id() == student_id)
    }

    fn get_mut(&mut self, student_id: &str) -> Result<&mut RosterEntry, AppError> {
        self.entries
            .iter_mut()
            .find(|e| e.student_id() == student_id)
            .ok_or_else(|| {
                AppError::Validation(format!("Student {} is not on this roster", student_id))
            })
    }

    /// Flips presence. Becoming present clears the justification; becoming
    /// absent keeps whatever text was there.
    pub fn toggle(&mut self, student_id: &str) -> Result<&RosterEntry, AppError> {
        let entry = self.get_mut(student_id)?;
        entry.present = !entry.present;
        if entry.present {
            entry.justification.clear();
        }
        Ok(entry)
    }

    pub fn set_justification(
        &mut self,
        student_id: &str,
        text: impl Into<String>,
    ) -> Result<&RosterEntry, AppError> {
        let entry = self.get_mut(student_id)?;
        entry.justification = text.into();
        Ok(entry)
    }

    /// Bulk presence change. Always clears every justification.
    pub fn mark_all(&mut self, present: bool) {
        for entry in &mut self.entries {
            entry.present = present;
            entry.justification.clear();
        }
    }

    pub fn apply(&mut self, edit: &RosterEdit) -> Result<(), AppError> {
        match edit {
            RosterEdit::Toggle { student_id } => {
                self.toggle(student_id)?;
            }
            RosterEdit::SetJustification { student_id, text } => {
                self.set_justification(student_id, text.as_str())?;
            }
            RosterEdit::MarkAll { present } => self.mark_all(*present),
        }
        Ok(())
    }

    /// Applies edits in order, stopping at the first one that names an
    /// unknown student.
    pub fn apply_all<'a>(
        &mut self,
        edits: impl IntoIterator<Item = &'a RosterEdit>,
    ) -> Result<(), AppError> {
        for edit in edits {
            self.apply(edit)?;
        }
        Ok(())
    }

    pub fn stats(&self) -> RosterStats {
        let total_count = self.entries.len();
        let present_count = self.entries.iter().filter(|e| e.present).count();
        let rate = if total_count == 0 {
            0
        } else {
            ((present_count as f64 / total_count as f64) * 100.0).round() as u32
        };

        RosterStats {
            present_count,
            absent_count: total_count - present_count,
            total_count,
            rate,
        }
    }

    /// Entries matching a presence filter and a case-insensitive search over
    /// name and email. An empty search matches everyone.
    pub fn filtered(&self, filter: PresenceFilter, search: &str) -> Vec<&RosterEntry> {
        let needle = search.trim().to_lowercase();

        self.entries
            .iter()
            .filter(|entry| filter.matches(entry))
            .filter(|entry| {
                needle.is_empty()
                    || entry.student.name.to_lowercase().contains(&needle)
                    || entry
                        .student
                        .email
                        .as_deref()
                        .is_some_and(|email| email.to_lowercase().contains(&needle))
            })
            .collect()
    }

    pub(crate) fn record_saved(&mut self, student_id: &str, record_id: i64) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.student_id() == student_id) {
            entry.existing_record_id = Some(record_id);
        }
    }
}
