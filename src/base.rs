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

//! Core identifier types for students, courses, institutions and admission records.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident($inner:ty)) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub $inner);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Unique identifier for a student (the owning actor of an application).
    StudentId(u32)
);

id_type!(
    /// Unique identifier for a course offered by an institution.
    CourseId(u32)
);

id_type!(
    /// Unique identifier for an institution.
    InstitutionId(u32)
);

id_type!(
    /// Unique identifier for a faculty within an institution.
    FacultyId(u32)
);

id_type!(
    /// Unique identifier for an application.
    ///
    /// Assigned sequentially by the record store, so a smaller id was
    /// created earlier. Used as the tie-breaker for review queue ordering.
    ApplicationId(u64)
);

id_type!(
    /// Unique identifier for a publication batch.
    BatchId(u32)
);

id_type!(
    /// Identity of whoever performed an operation (student, staff member or administrator).
    ActorId(u32)
);

/// Role-tagged identity stamped on history entries, decisions and batches.
///
/// Students and staff are numbered independently, so the role is part of
/// the identity: `Student(4)` and `Staff(4)` are different people.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(tag = "role", content = "id", rename_all = "snake_case")]
pub enum ActorRef {
    Student(StudentId),
    Staff(ActorId),
    Administrator(ActorId),
}

impl fmt::Display for ActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Student(id) => write!(f, "student:{id}"),
            Self::Staff(id) => write!(f, "staff:{id}"),
            Self::Administrator(id) => write!(f, "admin:{id}"),
        }
    }
}
