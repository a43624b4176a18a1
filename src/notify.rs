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

//! Outbound notifications.
//!
//! Events are queued in an [`Outbox`] once a state change has committed and
//! drained to a [`Notifier`]. Delivery is fire-and-forget: a failing
//! notifier is logged and never undoes the decision that produced the event.

use crate::application::ApplicationStatus;
use crate::base::{ApplicationId, BatchId, InstitutionId, StudentId};
use crossbeam::queue::SegQueue;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Something students or staff may want to hear about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AdmissionEvent {
    Submitted {
        application_id: ApplicationId,
        student_id: StudentId,
    },
    Decided {
        application_id: ApplicationId,
        student_id: StudentId,
        status: ApplicationStatus,
    },
    Confirmed {
        application_id: ApplicationId,
        student_id: StudentId,
    },
    Withdrawn {
        application_id: ApplicationId,
        student_id: StudentId,
    },
    Published {
        batch_id: BatchId,
        institution_id: InstitutionId,
        application_ids: Vec<ApplicationId>,
    },
}

/// Notification delivery error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Delivery hook (e-mail, push, message bus adapters).
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &AdmissionEvent) -> Result<(), NotifyError>;
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _event: &AdmissionEvent) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: &AdmissionEvent) -> Result<(), NotifyError> {
        info!(?event, "admission notification");
        Ok(())
    }
}

/// Lock-free FIFO of events waiting for delivery.
#[derive(Debug, Default)]
pub struct Outbox {
    pending: SegQueue<AdmissionEvent>,
}

impl Outbox {
    pub fn new() -> Self {
        Self {
            pending: SegQueue::new(),
        }
    }

    pub fn push(&self, event: AdmissionEvent) {
        self.pending.push(event);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Delivers queued events in order. Returns how many were delivered
    /// successfully; failed events are dropped.
    pub fn drain_to(&self, notifier: &dyn Notifier) -> usize {
        let mut delivered = 0;
        while let Some(event) = self.pending.pop() {
            match notifier.notify(&event) {
                Ok(()) => delivered += 1,
                Err(error) => warn!(%error, ?event, "dropping undeliverable notification"),
            }
        }
        delivered
    }
}
