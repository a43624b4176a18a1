// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Course seat accounting and requirement metadata.
//!
//! A [`Course`] owns its seat counter behind a mutex so that
//! "check seats then decrement" is a single critical section.
//!
//! # Example
//!
//! ```
//! use admission_ledger_rs::{Course, CourseId, CourseListing, FacultyId, InstitutionId};
//!
//! let course = Course::new(CourseListing::new(CourseId(1), InstitutionId(1), FacultyId(1), 30));
//! assert_eq!(course.available_seats(), 30);
//! ```

use crate::AdmissionError;
use crate::base::{CourseId, FacultyId, InstitutionId};
use crate::error::ValidationError;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};

/// Catalog entry used to open a course for admissions.
///
/// The course catalog itself lives outside this crate; this is the subset
/// admission processing needs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, serde::Serialize)]
pub struct CourseListing {
    pub course_id: CourseId,
    pub institution_id: InstitutionId,
    pub faculty_id: FacultyId,
    pub seats: u32,
    /// Applications must pass through `under_review` before a decision.
    #[serde(default)]
    pub requires_review: bool,
    #[serde(default)]
    pub requirements: CourseRequirements,
}

impl CourseListing {
    pub fn new(
        course_id: CourseId,
        institution_id: InstitutionId,
        faculty_id: FacultyId,
        seats: u32,
    ) -> Self {
        Self {
            course_id,
            institution_id,
            faculty_id,
            seats,
            requires_review: false,
            requirements: CourseRequirements::default(),
        }
    }

    pub fn with_review(mut self) -> Self {
        self.requires_review = true;
        self
    }

    pub fn with_requirements(mut self, requirements: CourseRequirements) -> Self {
        self.requirements = requirements;
        self
    }
}

/// Entry requirements shown to students. Never enforced on submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, serde::Serialize)]
pub struct CourseRequirements {
    pub required_subjects: BTreeSet<String>,
    pub minimum_grade: Option<Decimal>,
    pub extras: BTreeMap<String, String>,
}

/// Subjects and overall grade a student reports for eligibility display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, serde::Serialize)]
pub struct StudentTranscript {
    pub subjects: BTreeSet<String>,
    pub grade: Option<Decimal>,
}

/// Result of comparing a transcript against course requirements.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Eligibility {
    pub missing_subjects: Vec<String>,
    /// How far the grade falls below the minimum, if it does.
    pub grade_shortfall: Option<Decimal>,
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        self.missing_subjects.is_empty() && self.grade_shortfall.is_none()
    }
}

impl CourseRequirements {
    pub fn assess(&self, transcript: &StudentTranscript) -> Eligibility {
        let missing_subjects = self
            .required_subjects
            .iter()
            .filter(|subject| {
                !transcript
                    .subjects
                    .iter()
                    .any(|held| held.eq_ignore_ascii_case(subject))
            })
            .cloned()
            .collect();

        let grade_shortfall = self.minimum_grade.and_then(|minimum| {
            let grade = transcript.grade.unwrap_or(Decimal::ZERO);
            (grade < minimum).then(|| minimum - grade)
        });

        Eligibility {
            missing_subjects,
            grade_shortfall,
        }
    }
}

#[derive(Debug)]
struct SeatData {
    total: u32,
    available: u32,
}

impl SeatData {
    fn assert_invariants(&self) {
        debug_assert!(
            self.available <= self.total,
            "Invariant violated: available seats {} exceed total {}",
            self.available,
            self.total
        );
    }

    /// Takes one seat.
    fn take(&mut self) -> Result<(), AdmissionError> {
        if self.available == 0 {
            return Err(AdmissionError::CapacityExhausted);
        }
        self.available -= 1;
        self.assert_invariants();
        Ok(())
    }

    /// Gives one seat back.
    fn give_back(&mut self) -> Result<(), AdmissionError> {
        if self.available >= self.total {
            return Err(AdmissionError::Store(
                "seat released that was never reserved".to_string(),
            ));
        }
        self.available += 1;
        self.assert_invariants();
        Ok(())
    }

    /// Shifts total and available capacity by `delta`.
    fn adjust(&mut self, delta: i64) -> Result<(), AdmissionError> {
        let available = i64::from(self.available) + delta;
        let total = i64::from(self.total) + delta;
        if available < 0 || total < 0 {
            return Err(ValidationError::NegativeCapacity.into());
        }
        let (Ok(available), Ok(total)) = (u32::try_from(available), u32::try_from(total)) else {
            return Err(ValidationError::NegativeCapacity.into());
        };
        self.available = available;
        self.total = total;
        self.assert_invariants();
        Ok(())
    }
}

/// A course open for admissions.
#[derive(Debug)]
pub struct Course {
    id: CourseId,
    institution_id: InstitutionId,
    faculty_id: FacultyId,
    requires_review: bool,
    requirements: CourseRequirements,
    seats: Mutex<SeatData>,
}

impl Course {
    pub fn new(listing: CourseListing) -> Self {
        Self {
            id: listing.course_id,
            institution_id: listing.institution_id,
            faculty_id: listing.faculty_id,
            requires_review: listing.requires_review,
            requirements: listing.requirements,
            seats: Mutex::new(SeatData {
                total: listing.seats,
                available: listing.seats,
            }),
        }
    }

    pub fn id(&self) -> CourseId {
        self.id
    }

    pub fn institution_id(&self) -> InstitutionId {
        self.institution_id
    }

    pub fn faculty_id(&self) -> FacultyId {
        self.faculty_id
    }

    pub fn requires_review(&self) -> bool {
        self.requires_review
    }

    pub fn requirements(&self) -> &CourseRequirements {
        &self.requirements
    }

    pub fn available_seats(&self) -> u32 {
        self.seats.lock().available
    }

    pub fn total_seats(&self) -> u32 {
        self.seats.lock().total
    }

    pub(crate) fn take_seat(&self) -> Result<(), AdmissionError> {
        self.seats.lock().take()
    }

    pub(crate) fn return_seat(&self) -> Result<(), AdmissionError> {
        self.seats.lock().give_back()
    }

    pub(crate) fn adjust_capacity(&self, delta: i64) -> Result<u32, AdmissionError> {
        let mut seats = self.seats.lock();
        seats.adjust(delta)?;
        Ok(seats.available)
    }
}

impl Serialize for Course {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let seats = self.seats.lock();
        let mut state = serializer.serialize_struct("Course", 6)?;
        state.serialize_field("course", &self.id)?;
        state.serialize_field("institution", &self.institution_id)?;
        state.serialize_field("faculty", &self.faculty_id)?;
        state.serialize_field("total_seats", &seats.total)?;
        state.serialize_field("available_seats", &seats.available)?;
        state.serialize_field("reserved_seats", &(seats.total - seats.available))?;
        state.end()
    }
}
