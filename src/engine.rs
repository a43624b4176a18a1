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

//! Admission engine.
//!
//! The [`Engine`] is the single authority for application status changes. It
//! owns the capacity ledger, the record store and the publication batches, and
//! exposes the student, institute and administrator operations.
//!
//! # Operations
//!
//! | Caller | Operation |
//! |--------|-----------|
//! | Student | [`submit_application`](Engine::submit_application), [`list_my_applications`](Engine::list_my_applications), [`confirm_offer`](Engine::confirm_offer), [`withdraw_application`](Engine::withdraw_application) |
//! | Institute staff | [`list_applications_for_course`](Engine::list_applications_for_course), [`decide`](Engine::decide), [`create_publication_batch`](Engine::create_publication_batch), [`publish_batch`](Engine::publish_batch) |
//! | Administrator | all of the above for any institution, plus [`adjust_capacity`](Engine::adjust_capacity) |
//!
//! # Locking
//!
//! Locks are always taken in this order, which keeps the lock graph acyclic:
//!
//! 1. per-student confirmation guard
//! 2. application records, ascending by id when more than one is held
//! 3. batch record or course seat counter (leaves; nothing is locked under them)
//!
//! Map guards from [`DashMap`] are never held while a record lock is taken,
//! with one exception: submission holds the store's (student, course) slot
//! while it inspects a previous record. No record holder ever waits on that
//! slot.

use crate::access::{AccessPolicy, Action, Actor};
use crate::application::{Application, ApplicationStatus};
use crate::base::{ActorRef, ApplicationId, BatchId, CourseId, InstitutionId, StudentId};
use crate::batch::{BatchRegistry, PublicationBatch};
use crate::config::EngineConfig;
use crate::course::{Course, CourseListing, Eligibility, StudentTranscript};
use crate::error::ValidationError;
use crate::ledger::CapacityLedger;
use crate::notify::{AdmissionEvent, NoopNotifier, Notifier, Outbox};
use crate::store::ApplicationStore;
use crate::AdmissionError;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Admission engine.
///
/// # Invariants
///
/// - `0 <= available_seats <= total_seats` for every course.
/// - Each application's history is a walk of the status graph.
/// - A seat is reserved exactly while an application is `approved` or `confirmed`.
/// - Members of a published batch only accept the `confirmed` transition.
/// - A student holds at most one `confirmed` application.
pub struct Engine {
    ledger: CapacityLedger,
    applications: ApplicationStore,
    batches: BatchRegistry,
    policy: AccessPolicy,
    config: EngineConfig,
    outbox: Outbox,
    notifier: Arc<dyn Notifier>,
    /// Serializes confirmations per student.
    confirmations: DashMap<StudentId, Arc<Mutex<()>>>,
}

impl Engine {
    /// Creates an engine with default configuration and no notifications.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_notifier(config, Arc::new(NoopNotifier))
    }

    pub fn with_notifier(config: EngineConfig, notifier: Arc<dyn Notifier>) -> Self {
        Engine {
            ledger: CapacityLedger::new(),
            applications: ApplicationStore::new(),
            batches: BatchRegistry::new(),
            policy: AccessPolicy::new(),
            config,
            outbox: Outbox::new(),
            notifier,
            confirmations: DashMap::new(),
        }
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    // === Courses ===

    /// Opens a course from its catalog listing.
    pub fn register_course(&self, listing: CourseListing) -> Result<Arc<Course>, AdmissionError> {
        let course = self.ledger.register(listing)?;
        debug!(course_id = %course.id(), seats = course.total_seats(), "course registered");
        Ok(course)
    }

    pub fn course(&self, course_id: CourseId) -> Result<Arc<Course>, AdmissionError> {
        self.ledger.course(course_id)
    }

    /// Returns an iterator over all courses.
    pub fn courses(
        &self,
    ) -> impl Iterator<Item = dashmap::mapref::multiple::RefMulti<'_, CourseId, Arc<Course>>> {
        self.ledger.courses()
    }

    pub fn remaining_seats(&self, course_id: CourseId) -> Result<u32, AdmissionError> {
        self.ledger.remaining_seats(course_id)
    }

    /// Compares a transcript with the course requirements. Informational only.
    pub fn eligibility(
        &self,
        course_id: CourseId,
        transcript: &StudentTranscript,
    ) -> Result<Eligibility, AdmissionError> {
        Ok(self.ledger.course(course_id)?.requirements().assess(transcript))
    }

    // === Student-facing ===

    /// Submits an application for `student_id`. No seat is consumed.
    ///
    /// # Errors
    ///
    /// - [`AdmissionError::Forbidden`] - `actor` may not apply in this student's name.
    /// - [`AdmissionError::NotFound`] - Unknown course.
    /// - [`AdmissionError::DuplicateApplication`] - A live application already exists.
    pub fn submit_application(
        &self,
        actor: &Actor,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<Application, AdmissionError> {
        if !self
            .policy
            .authorize_student(actor, Action::Submit, student_id)
        {
            return Err(AdmissionError::Forbidden);
        }
        let course = self.ledger.course(course_id)?;
        let application =
            self.applications
                .create(student_id, course_id, course.institution_id(), Utc::now())?;

        info!(application_id = %application.id, %student_id, %course_id, "application submitted");
        self.emit([AdmissionEvent::Submitted {
            application_id: application.id,
            student_id,
        }]);
        Ok(application)
    }

    /// Every application of `student_id`, oldest first.
    ///
    /// # Errors
    ///
    /// - [`AdmissionError::Forbidden`] - `actor` is neither the student nor an administrator.
    pub fn list_my_applications(
        &self,
        actor: &Actor,
        student_id: StudentId,
    ) -> Result<Vec<Application>, AdmissionError> {
        if !self
            .policy
            .authorize_student(actor, Action::ViewOwn, student_id)
        {
            return Err(AdmissionError::Forbidden);
        }
        self.applications.list_by_student(student_id)
    }

    /// Accepts an approved offer on behalf of its owner.
    ///
    /// With `cascade_on_confirm` set, every other approved application of the
    /// student is rejected and its seat released.
    ///
    /// # Errors
    ///
    /// - [`AdmissionError::Forbidden`] - The student does not own the application.
    /// - [`AdmissionError::NotApproved`] - The application is not `approved`.
    /// - [`AdmissionError::AlreadyConfirmed`] - Another offer is already confirmed.
    pub fn confirm_offer(
        &self,
        student_id: StudentId,
        application_id: ApplicationId,
    ) -> Result<Application, AdmissionError> {
        self.confirm_as(&Actor::student(student_id), application_id)
    }

    /// Withdraws an application, returning its seat if it held one.
    pub fn withdraw_application(
        &self,
        student_id: StudentId,
        application_id: ApplicationId,
    ) -> Result<Application, AdmissionError> {
        self.decide(
            application_id,
            ApplicationStatus::Withdrawn,
            &Actor::student(student_id),
            None,
        )
    }

    // === Institute-facing ===

    /// Review queue for a course, oldest submission first.
    pub fn list_applications_for_course(
        &self,
        actor: &Actor,
        course_id: CourseId,
        status: Option<ApplicationStatus>,
    ) -> Result<Vec<Application>, AdmissionError> {
        let course = self.ledger.course(course_id)?;
        if !self
            .policy
            .authorize_institution(actor, Action::ViewQueue, course.institution_id())
        {
            return Err(AdmissionError::Forbidden);
        }
        self.applications.list_by_course(course_id, status)
    }

    /// Moves an application to `target`. See [`Engine::decide`].
    pub fn transition(
        &self,
        application_id: ApplicationId,
        target: ApplicationStatus,
        actor: &Actor,
    ) -> Result<Application, AdmissionError> {
        self.decide(application_id, target, actor, None)
    }

    /// Moves an application to `target`, recording `notes` on review decisions.
    ///
    /// Repeating the current status returns the record unchanged, so retries
    /// never reserve or release a seat twice. Members of a published batch
    /// refuse every request here, repeats included.
    ///
    /// # Errors
    ///
    /// - [`AdmissionError::NotFound`] - Unknown application.
    /// - [`AdmissionError::Forbidden`] - The actor may not make this change.
    /// - [`AdmissionError::BatchLocked`] - The application is in a published batch.
    /// - [`AdmissionError::IllegalTransition`] - `target` is not reachable, or the
    ///   course requires review first.
    /// - [`AdmissionError::CapacityExhausted`] - Approval found no free seat; the
    ///   application is left unchanged.
    pub fn decide(
        &self,
        application_id: ApplicationId,
        target: ApplicationStatus,
        actor: &Actor,
        notes: Option<String>,
    ) -> Result<Application, AdmissionError> {
        if target == ApplicationStatus::Confirmed {
            return self.confirm_as(actor, application_id);
        }

        let record = self.applications.record(application_id)?;
        let (application, changed) = {
            let mut application = record.lock();
            let changed = self.guarded_step(&mut application, target, actor, notes)?;
            (application.clone(), changed)
        };

        if changed {
            info!(
                %application_id,
                status = %application.status,
                actor = %actor.id(),
                "application transitioned"
            );
            self.emit([status_event(&application)]);
        }
        Ok(application)
    }

    /// Groups decided applications of one institution into an unpublished batch.
    ///
    /// All members are validated before any is stamped with the batch id.
    ///
    /// # Errors
    ///
    /// - [`AdmissionError::Forbidden`] - Actor is not staff of the institution.
    /// - [`AdmissionError::NotFound`] - A listed application does not exist.
    /// - [`AdmissionError::Validation`] - Empty list, undecided member, member of
    ///   another institution, or member already in a batch.
    pub fn create_publication_batch(
        &self,
        actor: &Actor,
        institution_id: InstitutionId,
        application_ids: &[ApplicationId],
    ) -> Result<PublicationBatch, AdmissionError> {
        if !self
            .policy
            .authorize_institution(actor, Action::CreateBatch, institution_id)
        {
            return Err(AdmissionError::Forbidden);
        }

        let ids: BTreeSet<ApplicationId> = application_ids.iter().copied().collect();
        if ids.is_empty() {
            return Err(ValidationError::EmptyBatch.into());
        }

        // BTreeSet iterates in ascending order, which is the lock order.
        let records = ids
            .iter()
            .map(|id| self.applications.record(*id))
            .collect::<Result<Vec<_>, _>>()?;
        let mut members: Vec<_> = records.iter().map(|record| record.lock()).collect();

        for application in &members {
            if application.institution_id != institution_id {
                return Err(ValidationError::InstitutionMismatch(application.id).into());
            }
            if application.publication_batch_id.is_some() {
                return Err(ValidationError::AlreadyBatched(application.id).into());
            }
            if application.status.is_undecided() {
                return Err(ValidationError::NotDecided(application.id).into());
            }
        }

        let batch = self
            .batches
            .insert(institution_id, actor.id(), ids, Utc::now());
        for application in members.iter_mut() {
            application.publication_batch_id = Some(batch.id);
        }
        drop(members);

        info!(
            batch_id = %batch.id,
            %institution_id,
            members = batch.application_ids.len(),
            "publication batch created"
        );
        Ok(batch)
    }

    /// Publishes a batch. Irreversible.
    ///
    /// Every member record is held while `published_at` is set, so no
    /// transition can interleave with publication.
    ///
    /// # Errors
    ///
    /// - [`AdmissionError::NotFound`] - Unknown batch.
    /// - [`AdmissionError::Forbidden`] - Actor is not staff of the batch's institution.
    /// - [`AdmissionError::AlreadyPublished`] - Batch was published before.
    pub fn publish_batch(
        &self,
        actor: &Actor,
        batch_id: BatchId,
    ) -> Result<PublicationBatch, AdmissionError> {
        let batch_record = self.batches.record(batch_id)?;
        let (institution_id, member_ids) = {
            let batch = batch_record.lock();
            (batch.institution_id, batch.application_ids.clone())
        };
        if !self
            .policy
            .authorize_institution(actor, Action::PublishBatch, institution_id)
        {
            return Err(AdmissionError::Forbidden);
        }

        let records = member_ids
            .iter()
            .map(|id| self.applications.record(*id))
            .collect::<Result<Vec<_>, _>>()?;
        let members: Vec<_> = records.iter().map(|record| record.lock()).collect();

        let published = {
            let mut batch = batch_record.lock();
            batch.publish(Utc::now())?;
            batch.clone()
        };
        drop(members);

        info!(%batch_id, %institution_id, members = published.application_ids.len(), "batch published");
        self.emit([AdmissionEvent::Published {
            batch_id,
            institution_id,
            application_ids: published.application_ids.iter().copied().collect(),
        }]);
        Ok(published)
    }

    pub fn get_batch(&self, batch_id: BatchId) -> Result<PublicationBatch, AdmissionError> {
        self.batches.get(batch_id)
    }

    // === Admin-facing ===

    /// Corrects a course's capacity by `delta` seats. Returns the new number
    /// of available seats.
    pub fn adjust_capacity(
        &self,
        actor: &Actor,
        course_id: CourseId,
        delta: i64,
    ) -> Result<u32, AdmissionError> {
        if !self.policy.authorize_global(actor, Action::AdjustCapacity) {
            return Err(AdmissionError::Forbidden);
        }
        let available = self.ledger.adjust(course_id, delta)?;
        info!(%course_id, delta, available, actor = %actor.id(), "capacity adjusted");
        Ok(available)
    }

    pub fn get_application(
        &self,
        application_id: ApplicationId,
    ) -> Result<Application, AdmissionError> {
        self.applications.get(application_id)
    }

    /// Every application, ordered by id.
    pub fn applications(&self) -> Vec<Application> {
        self.applications.all()
    }

    // === State machine ===

    /// Applies a requested step after access, batch and idempotence checks.
    /// Returns `false` when the application was already in `target`.
    fn guarded_step(
        &self,
        application: &mut Application,
        target: ApplicationStatus,
        actor: &Actor,
        notes: Option<String>,
    ) -> Result<bool, AdmissionError> {
        if !self
            .policy
            .authorize(actor, Action::for_target(target), application)
        {
            return Err(AdmissionError::Forbidden);
        }

        if target != ApplicationStatus::Confirmed && self.is_batch_locked(application) {
            return Err(AdmissionError::BatchLocked);
        }

        if application.status == target {
            debug!(application_id = %application.id, status = %target, "repeated transition ignored");
            return Ok(false);
        }

        self.apply_step(application, target, actor.id(), notes)?;
        Ok(true)
    }

    /// Validates `target` against the graph, moves seats, and records the step.
    /// Nothing is modified if any check or seat movement fails.
    fn apply_step(
        &self,
        application: &mut Application,
        target: ApplicationStatus,
        actor: ActorRef,
        notes: Option<String>,
    ) -> Result<(), AdmissionError> {
        let from = application.status;
        if !from.can_transition_to(target) {
            return Err(AdmissionError::IllegalTransition { from, to: target });
        }
        if from.skips_review(target) && self.ledger.course(application.course_id)?.requires_review()
        {
            return Err(AdmissionError::IllegalTransition { from, to: target });
        }

        match (from, target) {
            (_, ApplicationStatus::Approved) => {
                let token = self.ledger.reserve(application.course_id, application.id)?;
                application.reservation = Some(token);
            }
            (
                ApplicationStatus::Approved,
                ApplicationStatus::Rejected | ApplicationStatus::Withdrawn,
            ) => {
                if let Some(token) = application.reservation.clone() {
                    self.ledger.release(token)?;
                    application.reservation = None;
                }
            }
            _ => {}
        }

        application.record_transition(target, actor, Utc::now());
        if target.is_review_path() && notes.is_some() {
            application.notes = notes;
        }
        Ok(())
    }

    fn is_batch_locked(&self, application: &Application) -> bool {
        application
            .publication_batch_id
            .is_some_and(|batch_id| self.batches.is_published(batch_id))
    }

    // === Confirmation ===

    fn confirm_as(
        &self,
        actor: &Actor,
        application_id: ApplicationId,
    ) -> Result<Application, AdmissionError> {
        let record = self.applications.record(application_id)?;
        let owner = {
            let application = record.lock();
            if !self.policy.authorize(actor, Action::Confirm, &application) {
                return Err(AdmissionError::Forbidden);
            }
            match application.status {
                ApplicationStatus::Confirmed => {
                    debug!(%application_id, "repeated confirmation ignored");
                    return Ok(application.clone());
                }
                ApplicationStatus::Approved => {}
                _ => return Err(AdmissionError::NotApproved),
            }
            application.student_id
        };

        let guard = self.confirmation_guard(owner);
        let _confirming = guard.lock();

        // Scanned before the target is locked; only this guard's holder can
        // produce a confirmed application for `owner`.
        let siblings: Vec<ApplicationId> = self
            .applications
            .student_application_ids(owner)
            .into_iter()
            .filter(|id| *id != application_id)
            .collect();
        for sibling in &siblings {
            if self.applications.get(*sibling)?.status == ApplicationStatus::Confirmed {
                return Err(AdmissionError::AlreadyConfirmed(*sibling));
            }
        }

        let confirmed = {
            let mut application = record.lock();
            // Re-read: a concurrent call may have moved it since the first look.
            match application.status {
                ApplicationStatus::Confirmed => return Ok(application.clone()),
                ApplicationStatus::Approved => {}
                _ => return Err(AdmissionError::NotApproved),
            }
            self.guarded_step(&mut application, ApplicationStatus::Confirmed, actor, None)?;
            application.clone()
        };
        info!(%application_id, student_id = %owner, "offer confirmed");

        let mut events = vec![AdmissionEvent::Confirmed {
            application_id,
            student_id: owner,
        }];
        if self.config.cascade_on_confirm {
            events.extend(self.reject_competing_offers(owner, application_id, &siblings));
        }
        self.emit(events);
        Ok(confirmed)
    }

    /// Rejects the student's other approved offers, releasing their seats.
    /// Runs under the student's confirmation guard, one record at a time.
    ///
    /// Offers in a published batch keep their status. The confirmation has
    /// already committed when this runs, so a sibling that cannot be
    /// rejected is logged and skipped.
    fn reject_competing_offers(
        &self,
        student_id: StudentId,
        confirmed: ApplicationId,
        siblings: &[ApplicationId],
    ) -> Vec<AdmissionEvent> {
        let mut events = Vec::new();
        for sibling in siblings {
            let record = match self.applications.record(*sibling) {
                Ok(record) => record,
                Err(error) => {
                    warn!(application_id = %sibling, %student_id, %error, "competing offer not found");
                    continue;
                }
            };
            let mut application = record.lock();
            if application.status != ApplicationStatus::Approved {
                continue;
            }
            if self.is_batch_locked(&application) {
                debug!(application_id = %sibling, %student_id, "published offer left in place");
                continue;
            }
            let rejected = self.apply_step(
                &mut application,
                ApplicationStatus::Rejected,
                ActorRef::Student(student_id),
                Some(format!("superseded by confirmation of application {confirmed}")),
            );
            match rejected {
                Ok(()) => {
                    debug!(application_id = %sibling, %student_id, "competing offer rejected");
                    events.push(status_event(&application));
                }
                Err(error) => {
                    warn!(application_id = %sibling, %student_id, %error, "competing offer not rejected");
                }
            }
        }
        events
    }

    fn confirmation_guard(&self, student_id: StudentId) -> Arc<Mutex<()>> {
        Arc::clone(
            self.confirmations
                .entry(student_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    // === Notifications ===

    fn emit(&self, events: impl IntoIterator<Item = AdmissionEvent>) {
        for event in events {
            self.outbox.push(event);
        }
        self.outbox.drain_to(self.notifier.as_ref());
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

fn status_event(application: &Application) -> AdmissionEvent {
    match application.status {
        ApplicationStatus::Confirmed => AdmissionEvent::Confirmed {
            application_id: application.id,
            student_id: application.student_id,
        },
        ApplicationStatus::Withdrawn => AdmissionEvent::Withdrawn {
            application_id: application.id,
            student_id: application.student_id,
        },
        status => AdmissionEvent::Decided {
            application_id: application.id,
            student_id: application.student_id,
            status,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{ActorId, FacultyId};
    use crate::notify::NotifyError;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<AdmissionEvent>>,
    }

    impl Notifier for Recording {
        fn notify(&self, event: &AdmissionEvent) -> Result<(), NotifyError> {
            self.seen.lock().push(event.clone());
            Ok(())
        }
    }

    #[test]
    fn confirmation_survives_a_failed_cascade() {
        let notifier = Arc::new(Recording::default());
        let engine = Engine::with_notifier(EngineConfig::default(), notifier.clone());
        for course in [CourseId(1), CourseId(2)] {
            engine
                .register_course(CourseListing::new(course, InstitutionId(1), FacultyId(1), 1))
                .unwrap();
        }
        let staff = Actor::staff(ActorId(100), InstitutionId(1));
        let student = Actor::student(StudentId(1));
        let a = engine
            .submit_application(&student, StudentId(1), CourseId(1))
            .unwrap()
            .id;
        let b = engine
            .submit_application(&student, StudentId(1), CourseId(2))
            .unwrap()
            .id;
        engine
            .decide(a, ApplicationStatus::Approved, &staff, None)
            .unwrap();
        let offer = engine
            .decide(b, ApplicationStatus::Approved, &staff, None)
            .unwrap();

        // Hand the sibling's seat back behind the engine's back so releasing
        // it again during the cascade fails.
        engine.ledger.release(offer.reservation.unwrap()).unwrap();

        let confirmed = engine.confirm_offer(StudentId(1), a).unwrap();
        assert_eq!(confirmed.status, ApplicationStatus::Confirmed);
        assert_eq!(
            engine.get_application(b).unwrap().status,
            ApplicationStatus::Approved
        );
        assert_eq!(
            notifier.seen.lock().last(),
            Some(&AdmissionEvent::Confirmed {
                application_id: a,
                student_id: StudentId(1),
            })
        );
    }
}
