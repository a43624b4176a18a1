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

//! Admission publication batches.
//!
//! A batch groups decided applications of one institution. Publishing sets
//! `published_at` once and for all; there is no way back.

use crate::AdmissionError;
use crate::base::{ActorRef, ApplicationId, BatchId, InstitutionId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationBatch {
    pub id: BatchId,
    pub institution_id: InstitutionId,
    pub created_by: ActorRef,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub application_ids: BTreeSet<ApplicationId>,
}

impl PublicationBatch {
    /// Published batches are immutable.
    pub fn is_published(&self) -> bool {
        self.published_at.is_some()
    }

    pub(crate) fn publish(&mut self, at: DateTime<Utc>) -> Result<(), AdmissionError> {
        if self.is_published() {
            return Err(AdmissionError::AlreadyPublished);
        }
        self.published_at = Some(at);
        Ok(())
    }
}

pub(crate) type SharedBatch = Arc<Mutex<PublicationBatch>>;

/// All batches, keyed by id.
#[derive(Debug)]
pub struct BatchRegistry {
    batches: DashMap<BatchId, SharedBatch>,
    next_id: AtomicU32,
}

impl BatchRegistry {
    pub fn new() -> Self {
        Self {
            batches: DashMap::new(),
            next_id: AtomicU32::new(1),
        }
    }

    /// Stores a new unpublished batch. Membership is validated by the caller.
    pub(crate) fn insert(
        &self,
        institution_id: InstitutionId,
        created_by: ActorRef,
        application_ids: BTreeSet<ApplicationId>,
        created_at: DateTime<Utc>,
    ) -> PublicationBatch {
        let batch = PublicationBatch {
            id: BatchId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            institution_id,
            created_by,
            created_at,
            published_at: None,
            application_ids,
        };
        self.batches
            .insert(batch.id, Arc::new(Mutex::new(batch.clone())));
        batch
    }

    pub(crate) fn record(&self, id: BatchId) -> Result<SharedBatch, AdmissionError> {
        self.batches
            .get(&id)
            .map(|batch| Arc::clone(batch.value()))
            .ok_or(AdmissionError::NotFound("batch"))
    }

    pub fn get(&self, id: BatchId) -> Result<PublicationBatch, AdmissionError> {
        Ok(self.record(id)?.lock().clone())
    }

    /// Whether `id` refers to a published batch. Unknown ids are unpublished.
    pub fn is_published(&self, id: BatchId) -> bool {
        self.record(id)
            .map(|batch| batch.lock().is_published())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

impl Default for BatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}
