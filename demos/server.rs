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

//! Simple REST API server example for the admission engine.
//!
//! Run with: `cargo run --example server`
//!
//! The caller is identified by headers; authentication is assumed to happen
//! in front of this service:
//!
//! - `x-actor-role`: `student`, `staff` or `admin`
//! - `x-actor-id`: student id for students, staff or admin id otherwise
//! - `x-institution-id`: required for `staff`
//!
//! ## Endpoints
//!
//! - `POST /applications` - Submit an application
//! - `GET /students/{id}/applications` - List a student's applications
//! - `POST /applications/{id}/confirm` - Confirm an approved offer
//! - `POST /applications/{id}/withdraw` - Withdraw an application
//! - `POST /applications/{id}/decision` - Review, approve, waitlist or reject
//! - `GET /courses/{id}` - Course seats
//! - `GET /courses/{id}/applications?status=` - Review queue of a course
//! - `POST /courses/{id}/capacity` - Adjust capacity (administrators)
//! - `POST /batches` - Create a publication batch
//! - `POST /batches/{id}/publish` - Publish a batch
//!
//! ## Example Usage
//!
//! ```bash
//! # Submit
//! curl -X POST http://localhost:3000/applications \
//!   -H "Content-Type: application/json" \
//!   -H "x-actor-role: student" -H "x-actor-id: 7" \
//!   -d '{"student_id": 7, "course_id": 1}'
//!
//! # Approve
//! curl -X POST http://localhost:3000/applications/1/decision \
//!   -H "Content-Type: application/json" \
//!   -H "x-actor-role: staff" -H "x-actor-id: 100" -H "x-institution-id: 1" \
//!   -d '{"status": "approved", "notes": "strong profile"}'
//!
//! # Confirm
//! curl -X POST http://localhost:3000/applications/1/confirm \
//!   -H "x-actor-role: student" -H "x-actor-id: 7"
//! ```

use admission_ledger_rs::config::AppConfig;
use admission_ledger_rs::notify::LogNotifier;
use admission_ledger_rs::telemetry;
use admission_ledger_rs::{
    Actor, ActorId, AdmissionError, Application, ApplicationId, ApplicationStatus, BatchId,
    CourseId, Engine, InstitutionId, PublicationBatch, StudentId,
};
use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, Query, State},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

// === Request/Response DTOs ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub student_id: u32,
    pub course_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub status: ApplicationStatus,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBatchRequest {
    pub institution_id: u32,
    pub application_ids: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityRequest {
    pub delta: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueQuery {
    pub status: Option<ApplicationStatus>,
}

/// Response body for course seats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseResponse {
    pub course: u32,
    pub institution: u32,
    pub total_seats: u32,
    pub available_seats: u32,
    pub requires_review: bool,
}

/// Response body for errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

/// Shared application state containing the admission engine.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

// === Error Handling ===

/// Converts refused operations into HTTP responses.
pub enum AppError {
    Admission(AdmissionError),
    Unauthenticated(&'static str),
}

impl From<AdmissionError> for AppError {
    fn from(err: AdmissionError) -> Self {
        AppError::Admission(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, error) = match self {
            AppError::Unauthenticated(reason) => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHENTICATED",
                reason.to_string(),
            ),
            AppError::Admission(err) => {
                let (status, code) = match &err {
                    AdmissionError::DuplicateApplication => {
                        (StatusCode::CONFLICT, "DUPLICATE_APPLICATION")
                    }
                    AdmissionError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                    AdmissionError::IllegalTransition { .. } => {
                        (StatusCode::CONFLICT, "ILLEGAL_TRANSITION")
                    }
                    AdmissionError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN"),
                    AdmissionError::BatchLocked => (StatusCode::CONFLICT, "BATCH_LOCKED"),
                    AdmissionError::CapacityExhausted => {
                        (StatusCode::CONFLICT, "CAPACITY_EXHAUSTED")
                    }
                    AdmissionError::NotApproved => (StatusCode::CONFLICT, "NOT_APPROVED"),
                    AdmissionError::AlreadyConfirmed(_) => {
                        (StatusCode::CONFLICT, "ALREADY_CONFIRMED")
                    }
                    AdmissionError::AlreadyPublished => {
                        (StatusCode::CONFLICT, "ALREADY_PUBLISHED")
                    }
                    AdmissionError::Validation(_) => {
                        (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_FAILED")
                    }
                    AdmissionError::Store(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "STORE_UNAVAILABLE")
                    }
                };
                (status, code, err.to_string())
            }
        };

        (
            status,
            Json(ErrorResponse {
                error,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

// === Actor Extraction ===

/// The resolved caller, read from the `x-actor-*` headers.
pub struct CurrentActor(pub Actor);

fn header_u32(parts: &Parts, name: &str) -> Option<u32> {
    parts
        .headers
        .get(name)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

impl<S: Send + Sync> FromRequestParts<S> for CurrentActor {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let role = parts
            .headers
            .get("x-actor-role")
            .and_then(|value| value.to_str().ok())
            .ok_or(AppError::Unauthenticated("missing x-actor-role header"))?;
        let id = header_u32(parts, "x-actor-id")
            .ok_or(AppError::Unauthenticated("missing or invalid x-actor-id header"))?;

        let actor = match role.trim().to_ascii_lowercase().as_str() {
            "student" => Actor::student(StudentId(id)),
            "staff" => {
                let institution = header_u32(parts, "x-institution-id").ok_or(
                    AppError::Unauthenticated("staff requests need an x-institution-id header"),
                )?;
                Actor::staff(ActorId(id), InstitutionId(institution))
            }
            "admin" => Actor::admin(ActorId(id)),
            _ => return Err(AppError::Unauthenticated("unknown x-actor-role")),
        };
        Ok(CurrentActor(actor))
    }
}

// === Handlers ===

/// POST /applications - Submit an application.
async fn submit_application(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(request): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<Application>), AppError> {
    let application = state.engine.submit_application(
        &actor,
        StudentId(request.student_id),
        CourseId(request.course_id),
    )?;
    Ok((StatusCode::CREATED, Json(application)))
}

/// GET /students/{id}/applications - A student's own applications.
async fn list_student_applications(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<u32>,
) -> Result<Json<Vec<Application>>, AppError> {
    Ok(Json(state.engine.list_my_applications(&actor, StudentId(id))?))
}

/// POST /applications/{id}/confirm - Accept an approved offer.
async fn confirm_offer(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<u64>,
) -> Result<Json<Application>, AppError> {
    let application =
        state
            .engine
            .transition(ApplicationId(id), ApplicationStatus::Confirmed, &actor)?;
    Ok(Json(application))
}

/// POST /applications/{id}/withdraw - Withdraw an application.
async fn withdraw_application(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<u64>,
) -> Result<Json<Application>, AppError> {
    let application =
        state
            .engine
            .transition(ApplicationId(id), ApplicationStatus::Withdrawn, &actor)?;
    Ok(Json(application))
}

/// POST /applications/{id}/decision - Move an application along the review path.
async fn decide(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<u64>,
    Json(request): Json<DecisionRequest>,
) -> Result<Json<Application>, AppError> {
    let application =
        state
            .engine
            .decide(ApplicationId(id), request.status, &actor, request.notes)?;
    Ok(Json(application))
}

/// GET /courses/{id} - Course seats.
async fn get_course(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<Json<CourseResponse>, AppError> {
    let course = state.engine.course(CourseId(id))?;
    Ok(Json(CourseResponse {
        course: course.id().0,
        institution: course.institution_id().0,
        total_seats: course.total_seats(),
        available_seats: course.available_seats(),
        requires_review: course.requires_review(),
    }))
}

/// GET /courses/{id}/applications - Review queue, optionally filtered by status.
async fn list_course_applications(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<u32>,
    Query(query): Query<QueueQuery>,
) -> Result<Json<Vec<Application>>, AppError> {
    let applications =
        state
            .engine
            .list_applications_for_course(&actor, CourseId(id), query.status)?;
    Ok(Json(applications))
}

/// POST /courses/{id}/capacity - Administrator capacity correction.
async fn adjust_capacity(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<u32>,
    Json(request): Json<CapacityRequest>,
) -> Result<Json<CourseResponse>, AppError> {
    state
        .engine
        .adjust_capacity(&actor, CourseId(id), request.delta)?;
    get_course(State(state), Path(id)).await
}

/// POST /batches - Group decided applications into a batch.
async fn create_batch(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Json(request): Json<CreateBatchRequest>,
) -> Result<(StatusCode, Json<PublicationBatch>), AppError> {
    let ids: Vec<ApplicationId> = request
        .application_ids
        .into_iter()
        .map(ApplicationId)
        .collect();
    let batch = state.engine.create_publication_batch(
        &actor,
        InstitutionId(request.institution_id),
        &ids,
    )?;
    Ok((StatusCode::CREATED, Json(batch)))
}

/// POST /batches/{id}/publish - Publish a batch.
async fn publish_batch(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<u32>,
) -> Result<Json<PublicationBatch>, AppError> {
    Ok(Json(state.engine.publish_batch(&actor, BatchId(id))?))
}

// === Router ===

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/applications", post(submit_application))
        .route("/applications/{id}/confirm", post(confirm_offer))
        .route("/applications/{id}/withdraw", post(withdraw_application))
        .route("/applications/{id}/decision", post(decide))
        .route("/students/{id}/applications", get(list_student_applications))
        .route("/courses/{id}", get(get_course))
        .route("/courses/{id}/applications", get(list_course_applications))
        .route("/courses/{id}/capacity", post(adjust_capacity))
        .route("/batches", post(create_batch))
        .route("/batches/{id}/publish", post(publish_batch))
        .with_state(state)
}

// === Main ===

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let engine = Engine::with_notifier(config.engine, Arc::new(LogNotifier));
    seed_demo_courses(&engine)?;

    let state = AppState {
        engine: Arc::new(engine),
    };
    let app = create_router(state);

    let addr = config.server.socket_addr()?;
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "admission API server running");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Opens two small courses so the API can be tried out immediately.
fn seed_demo_courses(engine: &Engine) -> Result<(), AdmissionError> {
    use admission_ledger_rs::{CourseListing, FacultyId};

    engine.register_course(CourseListing::new(
        CourseId(1),
        InstitutionId(1),
        FacultyId(1),
        30,
    ))?;
    engine.register_course(
        CourseListing::new(CourseId(2), InstitutionId(1), FacultyId(2), 10).with_review(),
    )?;
    Ok(())
}
