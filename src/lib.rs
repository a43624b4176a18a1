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

//! # Admission Ledger
//!
//! This library provides a course admission engine: students apply to
//! courses, institutions review and decide, seats are reserved on approval,
//! decisions are released in publication batches, and students confirm one
//! offer.
//!
//! ## Core Components
//!
//! - [`Engine`]: Status transitions, confirmation and batch publication
//! - [`CapacityLedger`]: Atomic seat reservation per course
//! - [`ApplicationStore`]: Application records with (student, course) uniqueness
//! - [`AccessPolicy`]: Which [`Actor`] may perform which [`Action`]
//! - [`AdmissionError`]: Error types for refused operations
//!
//! ## Example
//!
//! ```
//! use admission_ledger_rs::{
//!     Actor, ActorId, ApplicationStatus, CourseId, CourseListing, Engine, FacultyId,
//!     InstitutionId, StudentId,
//! };
//!
//! let engine = Engine::new();
//! engine
//!     .register_course(CourseListing::new(CourseId(1), InstitutionId(1), FacultyId(1), 1))
//!     .unwrap();
//!
//! let student = StudentId(7);
//! let application = engine
//!     .submit_application(&Actor::student(student), student, CourseId(1))
//!     .unwrap();
//!
//! let staff = Actor::staff(ActorId(100), InstitutionId(1));
//! engine
//!     .decide(application.id, ApplicationStatus::Approved, &staff, None)
//!     .unwrap();
//! assert_eq!(engine.remaining_seats(CourseId(1)).unwrap(), 0);
//!
//! let confirmed = engine.confirm_offer(student, application.id).unwrap();
//! assert_eq!(confirmed.status, ApplicationStatus::Confirmed);
//! ```
//!
//! ## Thread Safety
//!
//! The engine is `Send + Sync`. Concurrent approvals on the same course never
//! overbook it, and concurrent decisions on one application are serialized
//! on that application's record.

pub mod access;
pub mod application;
mod base;
pub mod batch;
pub mod config;
pub mod course;
mod engine;
pub mod error;
pub mod ledger;
pub mod notify;
pub mod store;
pub mod telemetry;

pub use access::{AccessPolicy, Action, Actor};
pub use application::{Application, ApplicationStatus, StatusChange};
pub use base::{ActorId, ActorRef, ApplicationId, BatchId, CourseId, FacultyId, InstitutionId, StudentId};
pub use batch::PublicationBatch;
pub use config::{AppConfig, EngineConfig};
pub use course::{Course, CourseListing, CourseRequirements, Eligibility, StudentTranscript};
pub use engine::Engine;
pub use error::{AdmissionError, ValidationError};
pub use ledger::{CapacityLedger, ReservationToken};
pub use notify::{AdmissionEvent, Notifier, NotifyError};
pub use store::ApplicationStore;
