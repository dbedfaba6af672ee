//! Department → section → time slot → students wizard.

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{json, Value};

use crate::backend::SectionKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FlowStep {
    Department,
    Section,
    TimeSlot,
    Students,
}

impl FlowStep {
    pub fn number(self) -> u8 {
        match self {
            Self::Department => 1,
            Self::Section => 2,
            Self::TimeSlot => 3,
            Self::Students => 4,
        }
    }

    fn next(self) -> Option<Self> {
        match self {
            Self::Department => Some(Self::Section),
            Self::Section => Some(Self::TimeSlot),
            Self::TimeSlot => Some(Self::Students),
            Self::Students => None,
        }
    }

    fn prev(self) -> Option<Self> {
        match self {
            Self::Department => None,
            Self::Section => Some(Self::Department),
            Self::TimeSlot => Some(Self::Section),
            Self::Students => Some(Self::TimeSlot),
        }
    }
}

/// Result of a successful `next`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    Step(FlowStep),
    Students(SectionKey),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    #[error("Please select a department")]
    MissingDepartment,
    #[error("Please select a section")]
    MissingSection,
    #[error("Please select a time slot")]
    MissingTimeSlot,
    #[error("already at the final step")]
    AtFinalStep,
    #[error("already at the first step")]
    AtFirstStep,
}

impl FlowError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingDepartment | Self::MissingSection | Self::MissingTimeSlot => {
                "validation_failed"
            }
            Self::AtFinalStep => "at_final_step",
            Self::AtFirstStep => "at_first_step",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowField {
    Department,
    Section,
    TimeSlot,
}

impl FlowField {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "department" | "departmentId" => Some(Self::Department),
            "section" => Some(Self::Section),
            "timeSlot" => Some(Self::TimeSlot),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GuidedFlow {
    id: String,
    date: NaiveDate,
    step: FlowStep,
    department_id: Option<String>,
    section: Option<String>,
    time_slot: Option<String>,
    /// Session opened the last time step 4 was entered.
    pub session_id: Option<String>,
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl GuidedFlow {
    pub fn new(id: String, date: NaiveDate) -> Self {
        Self {
            id,
            date,
            step: FlowStep::Department,
            department_id: None,
            section: None,
            time_slot: None,
            session_id: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn step(&self) -> FlowStep {
        self.step
    }

    /// Blank values clear the selection. Later selections are never reset.
    pub fn select(&mut self, field: FlowField, value: Option<&str>) {
        let value = non_blank(value);
        match field {
            FlowField::Department => self.department_id = value,
            FlowField::Section => self.section = value,
            FlowField::TimeSlot => self.time_slot = value,
        }
    }

    fn require_current(&self) -> Result<(), FlowError> {
        match self.step {
            FlowStep::Department if self.department_id.is_none() => {
                Err(FlowError::MissingDepartment)
            }
            FlowStep::Section if self.section.is_none() => Err(FlowError::MissingSection),
            FlowStep::TimeSlot if self.time_slot.is_none() => Err(FlowError::MissingTimeSlot),
            _ => Ok(()),
        }
    }

    /// Advances one step if the current step's selection is present. Entering
    /// `Students` additionally requires every earlier selection, since going
    /// back may have cleared one, and hands out the key for its roster.
    pub fn next(&mut self) -> Result<Advance, FlowError> {
        self.require_current()?;
        let next = self.step.next().ok_or(FlowError::AtFinalStep)?;
        if next != FlowStep::Students {
            self.step = next;
            return Ok(Advance::Step(next));
        }
        let key = self.section_key().ok_or(if self.department_id.is_none() {
            FlowError::MissingDepartment
        } else {
            FlowError::MissingSection
        })?;
        self.step = next;
        Ok(Advance::Students(key))
    }

    /// Returns to the time-slot step after the student step could not be
    /// opened. Selections are kept.
    pub fn cancel_students(&mut self) {
        if self.step == FlowStep::Students {
            self.step = FlowStep::TimeSlot;
        }
    }

    pub fn back(&mut self) -> Result<FlowStep, FlowError> {
        let prev = self.step.prev().ok_or(FlowError::AtFirstStep)?;
        self.step = prev;
        Ok(prev)
    }

    fn section_key(&self) -> Option<SectionKey> {
        Some(SectionKey {
            department_id: self.department_id.clone()?,
            section: self.section.clone()?,
            time_slot: self.time_slot.clone()?,
            date: self.date,
        })
    }

    pub fn to_json(&self) -> Value {
        json!({
            "flowId": self.id,
            "date": self.date.to_string(),
            "currentStep": self.step.number(),
            "step": self.step,
            "departmentId": self.department_id,
            "section": self.section,
            "timeSlot": self.time_slot,
            "sessionId": self.session_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow() -> GuidedFlow {
        GuidedFlow::new(
            "f1".to_string(),
            NaiveDate::from_ymd_opt(2026, 9, 14).expect("date"),
        )
    }

    #[test]
    fn next_without_department_stays_on_step_one() {
        let mut f = flow();
        assert_eq!(f.next(), Err(FlowError::MissingDepartment));
        assert_eq!(f.step().number(), 1);
        assert_eq!(FlowError::MissingDepartment.code(), "validation_failed");

        f.select(FlowField::Department, Some("dep-1"));
        assert_eq!(f.next(), Ok(Advance::Step(FlowStep::Section)));
        assert_eq!(f.step().number(), 2);
    }

    #[test]
    fn blank_selection_counts_as_missing() {
        let mut f = flow();
        f.select(FlowField::Department, Some("   "));
        assert_eq!(f.next(), Err(FlowError::MissingDepartment));
    }

    #[test]
    fn full_walk_reaches_students_with_section_key() {
        let mut f = flow();
        f.select(FlowField::Department, Some("dep-1"));
        f.next().expect("to section");
        assert_eq!(f.next(), Err(FlowError::MissingSection));
        f.select(FlowField::Section, Some("A"));
        f.next().expect("to time slot");
        assert_eq!(f.next(), Err(FlowError::MissingTimeSlot));
        f.select(FlowField::TimeSlot, Some("09:00-10:00"));
        let Ok(Advance::Students(key)) = f.next() else {
            panic!("expected the student step");
        };
        assert_eq!(f.step(), FlowStep::Students);
        assert_eq!(f.next(), Err(FlowError::AtFinalStep));

        assert_eq!(key.department_id, "dep-1");
        assert_eq!(key.section, "A");
        assert_eq!(key.time_slot, "09:00-10:00");
        assert_eq!(f.section_key(), Some(key));
    }

    #[test]
    fn cancel_students_returns_to_time_slot_only_from_step_four() {
        let mut f = flow();
        f.cancel_students();
        assert_eq!(f.step(), FlowStep::Department);

        f.select(FlowField::Department, Some("dep-1"));
        f.select(FlowField::Section, Some("A"));
        f.select(FlowField::TimeSlot, Some("P1"));
        for _ in 0..3 {
            f.next().expect("next");
        }
        assert_eq!(f.step(), FlowStep::Students);
        f.cancel_students();
        assert_eq!(f.step(), FlowStep::TimeSlot);
        assert_eq!(f.to_json()["timeSlot"], "P1");
    }

    #[test]
    fn back_keeps_later_selections() {
        let mut f = flow();
        f.select(FlowField::Department, Some("dep-1"));
        f.next().expect("next");
        f.select(FlowField::Section, Some("B"));
        f.next().expect("next");
        assert_eq!(f.back(), Ok(FlowStep::Section));
        assert_eq!(f.back(), Ok(FlowStep::Department));
        assert_eq!(f.back(), Err(FlowError::AtFirstStep));

        f.select(FlowField::Department, Some("dep-2"));
        let json = f.to_json();
        assert_eq!(json["section"], "B");
        assert_eq!(json["departmentId"], "dep-2");
    }

    #[test]
    fn entering_students_rechecks_earlier_selections() {
        let mut f = flow();
        f.select(FlowField::Department, Some("dep-1"));
        f.next().expect("next");
        f.select(FlowField::Section, Some("A"));
        f.next().expect("next");
        f.select(FlowField::Department, None);
        f.select(FlowField::TimeSlot, Some("P1"));
        assert_eq!(f.next(), Err(FlowError::MissingDepartment));
        assert_eq!(f.step(), FlowStep::TimeSlot);
    }
}
