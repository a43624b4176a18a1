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

//! Error types for admission processing.

use crate::application::ApplicationStatus;
use crate::base::{ApplicationId, CourseId};
use thiserror::Error;

/// Admission processing errors.
///
/// Every variant except [`AdmissionError::Store`] is a business outcome that
/// the caller is expected to render; `Store` is an infrastructure failure
/// surfaced as-is.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// The student already holds a live application for this course
    #[error("an application for this course already exists")]
    DuplicateApplication,

    /// Referenced record does not exist
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Target status is not reachable from the current one
    #[error("illegal transition from {from} to {to}")]
    IllegalTransition {
        from: ApplicationStatus,
        to: ApplicationStatus,
    },

    /// Actor is not allowed to perform this operation
    #[error("operation not permitted for this actor")]
    Forbidden,

    /// Application belongs to a published batch
    #[error("application is locked by a published batch")]
    BatchLocked,

    /// No seat left on the course
    #[error("no seats available on this course")]
    CapacityExhausted,

    /// Confirmation requires an approved application
    #[error("application is not approved")]
    NotApproved,

    /// Student already confirmed another offer
    #[error("student already confirmed application {0}")]
    AlreadyConfirmed(ApplicationId),

    /// Batch has already been published
    #[error("batch already published")]
    AlreadyPublished,

    /// Request failed validation
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Backing store is inconsistent or unavailable
    #[error("store error: {0}")]
    Store(String),
}

impl AdmissionError {
    /// Returns `true` for refusals that are part of normal admission flow,
    /// `false` for infrastructure failures.
    pub fn is_business_outcome(&self) -> bool {
        !matches!(self, AdmissionError::Store(_))
    }
}

/// Validation failures for batch creation, course registration and capacity corrections.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("application {0} has not been decided yet")]
    NotDecided(ApplicationId),

    #[error("application {0} already belongs to a batch")]
    AlreadyBatched(ApplicationId),

    #[error("application {0} belongs to another institution")]
    InstitutionMismatch(ApplicationId),

    #[error("batch must contain at least one application")]
    EmptyBatch,

    #[error("course {0} is already registered")]
    DuplicateCourse(CourseId),

    #[error("capacity adjustment would leave negative seats")]
    NegativeCapacity,

    #[error("unknown application status '{0}'")]
    UnknownStatus(String),
}
