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

//! Course capacity ledger.
//!
//! All seat arithmetic goes through [`CapacityLedger`]. Reservations are
//! atomic per course: two callers racing for the last seat cannot both win.

use crate::AdmissionError;
use crate::base::{ApplicationId, CourseId};
use crate::course::{Course, CourseListing};
use crate::error::ValidationError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Proof that one seat on `course_id` is held for `application_id`.
///
/// [`CapacityLedger::release`] consumes the token, so a reservation is
/// returned at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationToken {
    pub course_id: CourseId,
    pub application_id: ApplicationId,
}

/// Seat counters for every course open for admissions.
#[derive(Debug, Default)]
pub struct CapacityLedger {
    courses: DashMap<CourseId, Arc<Course>>,
}

impl CapacityLedger {
    pub fn new() -> Self {
        Self {
            courses: DashMap::new(),
        }
    }

    /// Opens a course for admissions.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::DuplicateCourse`] if the course is already
    /// registered; re-registering would reset its seat counter.
    pub fn register(&self, listing: CourseListing) -> Result<Arc<Course>, AdmissionError> {
        match self.courses.entry(listing.course_id) {
            Entry::Occupied(_) => Err(ValidationError::DuplicateCourse(listing.course_id).into()),
            Entry::Vacant(entry) => {
                let course = Arc::new(Course::new(listing));
                entry.insert(Arc::clone(&course));
                Ok(course)
            }
        }
    }

    /// Looks up a course. The map guard is dropped before returning.
    pub fn course(&self, course_id: CourseId) -> Result<Arc<Course>, AdmissionError> {
        self.courses
            .get(&course_id)
            .map(|course| Arc::clone(course.value()))
            .ok_or(AdmissionError::NotFound("course"))
    }

    /// Takes one seat on `course_id` for `application_id`.
    ///
    /// # Errors
    ///
    /// - [`AdmissionError::NotFound`] - Unknown course.
    /// - [`AdmissionError::CapacityExhausted`] - No seat left.
    pub fn reserve(
        &self,
        course_id: CourseId,
        application_id: ApplicationId,
    ) -> Result<ReservationToken, AdmissionError> {
        let course = self.course(course_id)?;
        course.take_seat()?;
        debug!(%course_id, %application_id, remaining = course.available_seats(), "seat reserved");
        Ok(ReservationToken {
            course_id,
            application_id,
        })
    }

    /// Returns the seat held by `token`.
    pub fn release(&self, token: ReservationToken) -> Result<(), AdmissionError> {
        let course = self.course(token.course_id)?;
        course.return_seat()?;
        debug!(
            course_id = %token.course_id,
            application_id = %token.application_id,
            remaining = course.available_seats(),
            "seat released"
        );
        Ok(())
    }

    /// Snapshot of free seats; stale as soon as it returns.
    pub fn remaining_seats(&self, course_id: CourseId) -> Result<u32, AdmissionError> {
        Ok(self.course(course_id)?.available_seats())
    }

    /// Administrative correction of a course's capacity. Returns the new
    /// number of available seats.
    pub fn adjust(&self, course_id: CourseId, delta: i64) -> Result<u32, AdmissionError> {
        self.course(course_id)?.adjust_capacity(delta)
    }

    /// Returns an iterator over all registered courses.
    pub fn courses(
        &self,
    ) -> impl Iterator<Item = dashmap::mapref::multiple::RefMulti<'_, CourseId, Arc<Course>>> {
        self.courses.iter()
    }
}
