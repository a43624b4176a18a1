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

//! Thread-safe application record store with per-pair uniqueness.
//!
//! Records live behind their own mutex so that a transition can hold one
//! application while it validates and applies a step. Secondary indexes by
//! course and by student serve the review queues and "my applications".

use crate::AdmissionError;
use crate::application::{Application, ApplicationStatus};
use crate::base::{ApplicationId, CourseId, InstitutionId, StudentId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub(crate) type SharedApplication = Arc<Mutex<Application>>;

/// Keyed storage for applications.
///
/// Uniqueness of (student, course) is enforced with the [`DashMap`] entry
/// API, which holds the shard lock across check-and-insert.
#[derive(Debug)]
pub struct ApplicationStore {
    records: DashMap<ApplicationId, SharedApplication>,
    /// Latest record for each (student, course) pair.
    live: DashMap<(StudentId, CourseId), ApplicationId>,
    by_course: DashMap<CourseId, Vec<ApplicationId>>,
    by_student: DashMap<StudentId, Vec<ApplicationId>>,
    next_id: AtomicU64,
}

impl ApplicationStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            live: DashMap::new(),
            by_course: DashMap::new(),
            by_student: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Creates a `Pending` application.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::DuplicateApplication`] if the student already
    /// has an application for the course that has not been withdrawn.
    pub fn create(
        &self,
        student_id: StudentId,
        course_id: CourseId,
        institution_id: InstitutionId,
        applied_at: DateTime<Utc>,
    ) -> Result<Application, AdmissionError> {
        match self.live.entry((student_id, course_id)) {
            Entry::Occupied(mut entry) => {
                let existing = self.record(*entry.get())?;
                if existing.lock().status != ApplicationStatus::Withdrawn {
                    return Err(AdmissionError::DuplicateApplication);
                }
                // Resubmission after withdrawal; the withdrawn record stays for audit.
                let application = self.insert(student_id, course_id, institution_id, applied_at);
                entry.insert(application.id);
                Ok(application)
            }
            Entry::Vacant(entry) => {
                let application = self.insert(student_id, course_id, institution_id, applied_at);
                entry.insert(application.id);
                Ok(application)
            }
        }
    }

    fn insert(
        &self,
        student_id: StudentId,
        course_id: CourseId,
        institution_id: InstitutionId,
        applied_at: DateTime<Utc>,
    ) -> Application {
        let id = ApplicationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let application = Application::new(id, student_id, course_id, institution_id, applied_at);

        // Record first, indexes second: an indexed id always resolves.
        self.records
            .insert(id, Arc::new(Mutex::new(application.clone())));
        self.by_course.entry(course_id).or_default().push(id);
        self.by_student.entry(student_id).or_default().push(id);

        application
    }

    /// Shared handle to a record. The map guard is dropped before returning.
    pub(crate) fn record(&self, id: ApplicationId) -> Result<SharedApplication, AdmissionError> {
        self.records
            .get(&id)
            .map(|record| Arc::clone(record.value()))
            .ok_or(AdmissionError::NotFound("application"))
    }

    /// Snapshot of one application.
    pub fn get(&self, id: ApplicationId) -> Result<Application, AdmissionError> {
        Ok(self.record(id)?.lock().clone())
    }

    /// Applications for a course ordered by `applied_at`, ties broken by id.
    pub fn list_by_course(
        &self,
        course_id: CourseId,
        status: Option<ApplicationStatus>,
    ) -> Result<Vec<Application>, AdmissionError> {
        let ids = self
            .by_course
            .get(&course_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        let mut applications = self.snapshots(&ids)?;
        if let Some(status) = status {
            applications.retain(|application| application.status == status);
        }
        Ok(applications)
    }

    /// Applications submitted by a student, oldest first.
    pub fn list_by_student(&self, student_id: StudentId) -> Result<Vec<Application>, AdmissionError> {
        let ids = self
            .by_student
            .get(&student_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        self.snapshots(&ids)
    }

    /// Ids of a student's applications, oldest first.
    pub(crate) fn student_application_ids(&self, student_id: StudentId) -> Vec<ApplicationId> {
        self.by_student
            .get(&student_id)
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }

    fn snapshots(&self, ids: &[ApplicationId]) -> Result<Vec<Application>, AdmissionError> {
        let mut applications = Vec::with_capacity(ids.len());
        for id in ids {
            let record = self.record(*id).map_err(|_| {
                AdmissionError::Store(format!("index references missing application {id}"))
            })?;
            applications.push(record.lock().clone());
        }
        applications.sort_by(|a, b| a.applied_at.cmp(&b.applied_at).then(a.id.cmp(&b.id)));
        Ok(applications)
    }

    /// Returns every application, ordered by id.
    pub fn all(&self) -> Vec<Application> {
        let mut applications: Vec<Application> = self
            .records
            .iter()
            .map(|record| Arc::clone(record.value()))
            .collect::<Vec<_>>()
            .into_iter()
            .map(|record| record.lock().clone())
            .collect();
        applications.sort_by_key(|application| application.id);
        applications
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for ApplicationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{ActorId, ActorRef};
    use chrono::Duration;

    fn create(store: &ApplicationStore, student: u32, course: u32) -> Result<Application, AdmissionError> {
        store.create(StudentId(student), CourseId(course), InstitutionId(1), Utc::now())
    }

    #[test]
    fn create_starts_pending_with_sequential_ids() {
        let store = ApplicationStore::new();
        let first = create(&store, 1, 1).unwrap();
        let second = create(&store, 2, 1).unwrap();

        assert_eq!(first.status, ApplicationStatus::Pending);
        assert_eq!(first.id, ApplicationId(1));
        assert_eq!(second.id, ApplicationId(2));
        assert!(first.history.is_empty());
    }

    #[test]
    fn duplicate_pair_is_rejected() {
        let store = ApplicationStore::new();
        create(&store, 1, 1).unwrap();

        assert_eq!(create(&store, 1, 1), Err(AdmissionError::DuplicateApplication));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn resubmission_after_withdrawal_creates_new_record() {
        let store = ApplicationStore::new();
        let first = create(&store, 1, 1).unwrap();
        store
            .record(first.id)
            .unwrap()
            .lock()
            .record_transition(
                ApplicationStatus::Withdrawn,
                ActorRef::Student(StudentId(1)),
                Utc::now(),
            );

        let second = create(&store, 1, 1).unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(store.len(), 2);
        assert_eq!(create(&store, 1, 1), Err(AdmissionError::DuplicateApplication));
    }

    #[test]
    fn list_by_course_orders_by_applied_at_then_id() {
        let store = ApplicationStore::new();
        let now = Utc::now();
        let late = store
            .create(StudentId(1), CourseId(1), InstitutionId(1), now)
            .unwrap();
        let early = store
            .create(StudentId(2), CourseId(1), InstitutionId(1), now - Duration::seconds(5))
            .unwrap();
        let tie = store
            .create(StudentId(3), CourseId(1), InstitutionId(1), now)
            .unwrap();
        create(&store, 4, 2).unwrap();

        let ids: Vec<_> = store
            .list_by_course(CourseId(1), None)
            .unwrap()
            .into_iter()
            .map(|application| application.id)
            .collect();
        assert_eq!(ids, vec![early.id, late.id, tie.id]);
    }

    #[test]
    fn list_by_course_filters_status() {
        let store = ApplicationStore::new();
        let first = create(&store, 1, 1).unwrap();
        create(&store, 2, 1).unwrap();
        store
            .record(first.id)
            .unwrap()
            .lock()
            .record_transition(
                ApplicationStatus::UnderReview,
                ActorRef::Staff(ActorId(9)),
                Utc::now(),
            );

        let under_review = store
            .list_by_course(CourseId(1), Some(ApplicationStatus::UnderReview))
            .unwrap();
        assert_eq!(under_review.len(), 1);
        assert_eq!(under_review[0].id, first.id);
    }

    #[test]
    fn list_by_student_spans_courses() {
        let store = ApplicationStore::new();
        create(&store, 1, 1).unwrap();
        create(&store, 1, 2).unwrap();
        create(&store, 2, 1).unwrap();

        assert_eq!(store.list_by_student(StudentId(1)).unwrap().len(), 2);
        assert!(store.list_by_student(StudentId(3)).unwrap().is_empty());
    }

    #[test]
    fn get_unknown_is_not_found() {
        let store = ApplicationStore::new();
        assert_eq!(
            store.get(ApplicationId(1)),
            Err(AdmissionError::NotFound("application"))
        );
    }
}
