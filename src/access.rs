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

//! Access policy gate.
//!
//! Decides whether an [`Actor`] may perform an [`Action`]. Identity itself is
//! resolved outside this crate; callers hand in the resolved actor.

use crate::application::{Application, ApplicationStatus};
use crate::base::{ActorId, ActorRef, InstitutionId, StudentId};
use serde::{Deserialize, Serialize};

/// Resolved caller identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Actor {
    Student {
        student_id: StudentId,
    },
    InstituteStaff {
        actor_id: ActorId,
        institution_id: InstitutionId,
    },
    Administrator {
        actor_id: ActorId,
    },
}

impl Actor {
    pub fn student(student_id: StudentId) -> Self {
        Self::Student { student_id }
    }

    pub fn staff(actor_id: ActorId, institution_id: InstitutionId) -> Self {
        Self::InstituteStaff {
            actor_id,
            institution_id,
        }
    }

    pub fn admin(actor_id: ActorId) -> Self {
        Self::Administrator { actor_id }
    }

    pub fn id(&self) -> ActorRef {
        match self {
            Self::Student { student_id } => ActorRef::Student(*student_id),
            Self::InstituteStaff { actor_id, .. } => ActorRef::Staff(*actor_id),
            Self::Administrator { actor_id } => ActorRef::Administrator(*actor_id),
        }
    }
}

/// Operations guarded by the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Submit,
    ViewOwn,
    Review,
    Confirm,
    Withdraw,
    ViewQueue,
    CreateBatch,
    PublishBatch,
    AdjustCapacity,
}

impl Action {
    /// The action needed to move an application into `target`.
    pub fn for_target(target: ApplicationStatus) -> Self {
        match target {
            ApplicationStatus::Confirmed => Self::Confirm,
            ApplicationStatus::Withdrawn => Self::Withdraw,
            _ => Self::Review,
        }
    }
}

/// Role-based allow/deny decisions.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessPolicy;

impl AccessPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Decides an action on a single application.
    pub fn authorize(&self, actor: &Actor, action: Action, application: &Application) -> bool {
        match (actor, action) {
            (Actor::Administrator { .. }, _) => true,
            (
                Actor::Student { student_id },
                Action::Submit | Action::ViewOwn | Action::Confirm | Action::Withdraw,
            ) => *student_id == application.student_id,
            (Actor::Student { .. }, _) => false,
            (
                Actor::InstituteStaff { institution_id, .. },
                Action::Review | Action::ViewQueue | Action::CreateBatch | Action::PublishBatch,
            ) => *institution_id == application.institution_id,
            (Actor::InstituteStaff { .. }, _) => false,
        }
    }

    /// Decides an action scoped to a whole institution (queues and batches).
    pub fn authorize_institution(
        &self,
        actor: &Actor,
        action: Action,
        institution_id: InstitutionId,
    ) -> bool {
        match (actor, action) {
            (Actor::Administrator { .. }, _) => true,
            (
                Actor::InstituteStaff {
                    institution_id: own,
                    ..
                },
                Action::ViewQueue | Action::CreateBatch | Action::PublishBatch,
            ) => *own == institution_id,
            _ => false,
        }
    }

    /// Decides actions taken in a student's name: submitting an application
    /// or listing their own applications.
    pub fn authorize_student(&self, actor: &Actor, action: Action, student_id: StudentId) -> bool {
        match (actor, action) {
            (Actor::Administrator { .. }, _) => true,
            (Actor::Student { student_id: own }, Action::Submit | Action::ViewOwn) => {
                *own == student_id
            }
            _ => false,
        }
    }

    /// Decides actions that are not tied to an institution.
    pub fn authorize_global(&self, actor: &Actor, action: Action) -> bool {
        matches!(
            (actor, action),
            (Actor::Administrator { .. }, Action::AdjustCapacity)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{ApplicationId, CourseId};
    use chrono::Utc;

    fn application() -> Application {
        Application::new(
            ApplicationId(1),
            StudentId(1),
            CourseId(1),
            InstitutionId(10),
            Utc::now(),
        )
    }

    #[test]
    fn student_acts_only_on_own_application() {
        let policy = AccessPolicy::new();
        let app = application();
        let owner = Actor::student(StudentId(1));
        let other = Actor::student(StudentId(2));

        assert!(policy.authorize(&owner, Action::Confirm, &app));
        assert!(policy.authorize(&owner, Action::Withdraw, &app));
        assert!(!policy.authorize(&other, Action::Confirm, &app));
        assert!(!policy.authorize(&owner, Action::Review, &app));
    }

    #[test]
    fn staff_reviews_only_own_institution() {
        let policy = AccessPolicy::new();
        let app = application();

        assert!(policy.authorize(&Actor::staff(ActorId(5), InstitutionId(10)), Action::Review, &app));
        assert!(!policy.authorize(&Actor::staff(ActorId(5), InstitutionId(11)), Action::Review, &app));
        assert!(!policy.authorize(&Actor::staff(ActorId(5), InstitutionId(10)), Action::Confirm, &app));
    }

    #[test]
    fn administrator_is_allowed_everything() {
        let policy = AccessPolicy::new();
        let admin = Actor::admin(ActorId(99));

        assert!(policy.authorize(&admin, Action::Review, &application()));
        assert!(policy.authorize_institution(&admin, Action::PublishBatch, InstitutionId(3)));
        assert!(policy.authorize_global(&admin, Action::AdjustCapacity));
    }

    #[test]
    fn capacity_adjustment_is_admin_only() {
        let policy = AccessPolicy::new();
        assert!(!policy.authorize_global(
            &Actor::staff(ActorId(5), InstitutionId(10)),
            Action::AdjustCapacity
        ));
        assert!(!policy.authorize_global(&Actor::student(StudentId(1)), Action::AdjustCapacity));
    }

    #[test]
    fn batch_actions_scoped_to_institution() {
        let policy = AccessPolicy::new();
        let staff = Actor::staff(ActorId(5), InstitutionId(10));

        assert!(policy.authorize_institution(&staff, Action::CreateBatch, InstitutionId(10)));
        assert!(!policy.authorize_institution(&staff, Action::CreateBatch, InstitutionId(11)));
        assert!(!policy.authorize_institution(
            &Actor::student(StudentId(1)),
            Action::ViewQueue,
            InstitutionId(10)
        ));
    }

    #[test]
    fn submission_only_in_own_name() {
        let policy = AccessPolicy::new();
        let student = Actor::student(StudentId(1));
        assert!(policy.authorize_student(&student, Action::Submit, StudentId(1)));
        assert!(!policy.authorize_student(&student, Action::Submit, StudentId(2)));
        assert!(!policy.authorize_student(
            &Actor::staff(ActorId(5), InstitutionId(10)),
            Action::Submit,
            StudentId(1)
        ));
    }

    #[test]
    fn own_applications_visible_to_owner_and_admin() {
        let policy = AccessPolicy::new();
        assert!(policy.authorize_student(&Actor::student(StudentId(1)), Action::ViewOwn, StudentId(1)));
        assert!(!policy.authorize_student(&Actor::student(StudentId(2)), Action::ViewOwn, StudentId(1)));
        assert!(!policy.authorize_student(
            &Actor::staff(ActorId(5), InstitutionId(10)),
            Action::ViewOwn,
            StudentId(1)
        ));
        assert!(policy.authorize_student(&Actor::admin(ActorId(99)), Action::ViewOwn, StudentId(1)));
        // Reviewing is not a student action.
        assert!(!policy.authorize_student(&Actor::student(StudentId(1)), Action::Review, StudentId(1)));
    }

    #[test]
    fn target_status_maps_to_action() {
        assert_eq!(Action::for_target(ApplicationStatus::Confirmed), Action::Confirm);
        assert_eq!(Action::for_target(ApplicationStatus::Withdrawn), Action::Withdraw);
        assert_eq!(Action::for_target(ApplicationStatus::Approved), Action::Review);
    }

    #[test]
    fn actor_identity() {
        assert_eq!(Actor::student(StudentId(4)).id(), ActorRef::Student(StudentId(4)));
        assert_eq!(
            Actor::staff(ActorId(8), InstitutionId(1)).id(),
            ActorRef::Staff(ActorId(8))
        );
        assert_eq!(Actor::admin(ActorId(8)).id(), ActorRef::Administrator(ActorId(8)));
    }
}
