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

//! Application records and the admission status graph.
//!
//! ```text
//!  Pending ──► UnderReview ──► Approved ──► Confirmed
//!     │             │             │
//!     │             ├──► Waitlisted ──► Approved | Rejected
//!     │             │             │
//!     │             └──► Rejected ◄┘ (correction, releases the seat)
//!     │
//!     └──► Approved | Waitlisted | Rejected   (unless the course requires review)
//!
//!  Pending | UnderReview | Waitlisted | Approved ──► Withdrawn
//! ```
//!
//! `Rejected`, `Confirmed` and `Withdrawn` are terminal.

use crate::base::{ActorRef, ApplicationId, BatchId, CourseId, InstitutionId, StudentId};
use crate::error::ValidationError;
use crate::ledger::ReservationToken;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    UnderReview,
    Approved,
    Waitlisted,
    Rejected,
    Confirmed,
    Withdrawn,
}

impl ApplicationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::UnderReview => "under_review",
            Self::Approved => "approved",
            Self::Waitlisted => "waitlisted",
            Self::Rejected => "rejected",
            Self::Confirmed => "confirmed",
            Self::Withdrawn => "withdrawn",
        }
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Confirmed | Self::Withdrawn)
    }

    /// Statuses that record an institution's decision.
    pub fn is_decision(self) -> bool {
        matches!(self, Self::Approved | Self::Waitlisted | Self::Rejected)
    }

    /// Statuses still waiting on the institution; these cannot be published.
    pub fn is_undecided(self) -> bool {
        matches!(self, Self::Pending | Self::UnderReview)
    }

    /// Statuses only institute staff (or administrators) may move an application into.
    pub fn is_review_path(self) -> bool {
        matches!(
            self,
            Self::UnderReview | Self::Approved | Self::Waitlisted | Self::Rejected
        )
    }

    /// Returns `true` if `target` is reachable in one step from `self`.
    pub fn can_transition_to(self, target: ApplicationStatus) -> bool {
        use ApplicationStatus::*;

        match (self, target) {
            (Pending, UnderReview | Approved | Waitlisted | Rejected | Withdrawn) => true,
            (UnderReview, Approved | Waitlisted | Rejected | Withdrawn) => true,
            (Waitlisted, Approved | Rejected | Withdrawn) => true,
            (Approved, Confirmed | Rejected | Withdrawn) => true,
            _ => false,
        }
    }

    /// Returns `true` if the step decides an application that never entered review.
    pub fn skips_review(self, target: ApplicationStatus) -> bool {
        self == Self::Pending && target.is_decision()
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ApplicationStatus {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "under_review" => Ok(Self::UnderReview),
            "approved" => Ok(Self::Approved),
            "waitlisted" => Ok(Self::Waitlisted),
            "rejected" => Ok(Self::Rejected),
            "confirmed" => Ok(Self::Confirmed),
            "withdrawn" => Ok(Self::Withdrawn),
            other => Err(ValidationError::UnknownStatus(other.to_string())),
        }
    }
}

/// One applied step in an application's status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: ApplicationStatus,
    pub to: ApplicationStatus,
    pub actor: ActorRef,
    pub at: DateTime<Utc>,
}

/// A student's application to a course.
///
/// Records are never deleted; rejection and withdrawal are terminal statuses
/// so the history stays auditable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub student_id: StudentId,
    pub course_id: CourseId,
    /// Copied from the course at submission time for access checks.
    pub institution_id: InstitutionId,
    pub status: ApplicationStatus,
    pub applied_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<ActorRef>,
    pub notes: Option<String>,
    pub publication_batch_id: Option<BatchId>,
    /// Seat held for this application while it is approved or confirmed.
    pub reservation: Option<ReservationToken>,
    pub history: Vec<StatusChange>,
}

impl Application {
    pub fn new(
        id: ApplicationId,
        student_id: StudentId,
        course_id: CourseId,
        institution_id: InstitutionId,
        applied_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            student_id,
            course_id,
            institution_id,
            status: ApplicationStatus::Pending,
            applied_at,
            decided_at: None,
            decided_by: None,
            notes: None,
            publication_batch_id: None,
            reservation: None,
            history: Vec::new(),
        }
    }

    /// Sequence of statuses the application has walked through, starting at `Pending`.
    pub fn status_walk(&self) -> Vec<ApplicationStatus> {
        let mut walk = vec![ApplicationStatus::Pending];
        walk.extend(self.history.iter().map(|change| change.to));
        walk
    }

    /// Moves to `to`, recording the step. Callers validate the step first.
    pub(crate) fn record_transition(
        &mut self,
        to: ApplicationStatus,
        actor: ActorRef,
        at: DateTime<Utc>,
    ) {
        debug_assert!(
            self.status.can_transition_to(to),
            "Invariant violated: {} -> {} is not in the status graph",
            self.status,
            to
        );

        self.history.push(StatusChange {
            from: self.status,
            to,
            actor,
            at,
        });
        self.status = to;

        if to.is_decision() && self.decided_at.is_none() {
            self.decided_at = Some(at);
            self.decided_by = Some(actor);
        }
    }
}
