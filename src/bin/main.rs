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

use admission_ledger_rs::config::AppConfig;
use admission_ledger_rs::telemetry;
use admission_ledger_rs::{
    Actor, ActorId, AdmissionError, Application, ApplicationId, ApplicationStatus, BatchId,
    CourseId, CourseListing, Engine, FacultyId, InstitutionId, StudentId,
};
use clap::{Parser, ValueEnum};
use csv::{ReaderBuilder, Trim, Writer};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::{debug, info};

/// Admission Ledger - Replay admission event CSV files
///
/// Loads courses, replays submissions, decisions, batches and confirmations,
/// and writes the resulting applications or course seats to stdout.
#[derive(Parser, Debug)]
#[command(name = "admission-ledger-rs")]
#[command(about = "An admission engine that replays admission event CSVs", long_about = None)]
struct Args {
    /// Path to CSV file with admission events
    ///
    /// Expected format: type,role,actor,institution,course,application,status,applications,batch,delta,notes
    /// Example: cargo run -- --courses courses.csv events.csv > applications.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Path to CSV file with courses (course,institution,faculty,seats,requires_review)
    #[arg(long, value_name = "FILE")]
    courses: Option<PathBuf>,

    /// Which report to write
    #[arg(long, value_enum, default_value_t = Report::Applications)]
    report: Report,

    /// Keep other approved offers when a student confirms one
    #[arg(long)]
    no_cascade: bool,

    /// Log filter, overrides ADMISSION_LOG_LEVEL
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Report {
    Applications,
    Courses,
}

fn main() {
    let args = Args::parse();

    let mut config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };
    if let Some(level) = args.log_level.clone() {
        config.telemetry.log_level = level;
    }
    if args.no_cascade {
        config.engine.cascade_on_confirm = false;
    }
    if let Err(e) = telemetry::init(&config.telemetry) {
        eprintln!("Error initialising logging: {}", e);
        process::exit(1);
    }

    let engine = Engine::with_config(config.engine);

    if let Some(path) = &args.courses {
        let loaded = open(path).and_then(|file| {
            load_courses(&engine, BufReader::new(file)).map_err(|e| e.to_string())
        });
        match loaded {
            Ok(count) => info!(count, "courses loaded"),
            Err(e) => {
                eprintln!("Error loading courses '{}': {}", path.display(), e);
                process::exit(1);
            }
        }
    }

    let processed = open(&args.input).and_then(|file| {
        process_events(&engine, BufReader::new(file)).map_err(|e| e.to_string())
    });
    if let Err(e) = processed {
        eprintln!("Error processing events: {}", e);
        process::exit(1);
    }

    let written = match args.report {
        Report::Applications => write_applications(&engine, std::io::stdout()),
        Report::Courses => write_courses(&engine, std::io::stdout()),
    };
    if let Err(e) = written {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

fn open(path: &Path) -> Result<File, String> {
    File::open(path).map_err(|e| format!("cannot open '{}': {}", path.display(), e))
}

/// Raw course row: `course, institution, faculty, seats, requires_review`
#[derive(Debug, Deserialize)]
struct CsvCourse {
    course: u32,
    institution: u32,
    faculty: u32,
    seats: u32,
    #[serde(default)]
    requires_review: Option<bool>,
}

/// Registers every valid course row. Returns how many were registered.
pub fn load_courses<R: Read>(engine: &Engine, reader: R) -> Result<usize, csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    let mut registered = 0;
    for result in rdr.deserialize::<CsvCourse>() {
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                debug!(error = %e, "skipping malformed course row");
                continue;
            }
        };
        let mut listing = CourseListing::new(
            CourseId(row.course),
            InstitutionId(row.institution),
            FacultyId(row.faculty),
            row.seats,
        );
        if row.requires_review.unwrap_or(false) {
            listing = listing.with_review();
        }
        match engine.register_course(listing) {
            Ok(_) => registered += 1,
            Err(e) => debug!(course = row.course, error = %e, "skipping course"),
        }
    }
    Ok(registered)
}

/// Raw event row.
///
/// Fields: `type, role, actor, institution, course, application, status, applications, batch, delta, notes`
#[derive(Debug, Deserialize)]
struct CsvEvent {
    #[serde(rename = "type")]
    kind: String,
    role: String,
    actor: u32,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    institution: Option<u32>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    course: Option<u32>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    application: Option<u64>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    applications: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    batch: Option<u32>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    delta: Option<i64>,
    #[serde(default)]
    notes: Option<String>,
}

/// A replayable engine operation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Submit(CourseId),
    Decide {
        application: ApplicationId,
        status: ApplicationStatus,
        notes: Option<String>,
    },
    Batch(InstitutionId, Vec<ApplicationId>),
    Publish(BatchId),
    Adjust(CourseId, i64),
}

impl CsvEvent {
    fn actor(&self) -> Option<Actor> {
        match self.role.to_lowercase().as_str() {
            "student" => Some(Actor::student(StudentId(self.actor))),
            "staff" => Some(Actor::staff(
                ActorId(self.actor),
                InstitutionId(self.institution?),
            )),
            "admin" => Some(Actor::admin(ActorId(self.actor))),
            _ => None,
        }
    }

    /// Converts the row into a command.
    ///
    /// Returns `None` for unknown event types or missing required fields.
    fn into_command(self) -> Option<Command> {
        let application = self.application.map(ApplicationId);
        match self.kind.to_lowercase().as_str() {
            "submit" => Some(Command::Submit(CourseId(self.course?))),
            "review" => Some(Command::Decide {
                application: application?,
                status: ApplicationStatus::UnderReview,
                notes: self.notes,
            }),
            "decide" => Some(Command::Decide {
                application: application?,
                status: self.status?.parse().ok()?,
                notes: self.notes,
            }),
            "confirm" => Some(Command::Decide {
                application: application?,
                status: ApplicationStatus::Confirmed,
                notes: None,
            }),
            "withdraw" => Some(Command::Decide {
                application: application?,
                status: ApplicationStatus::Withdrawn,
                notes: None,
            }),
            "batch" => {
                let ids = self
                    .applications?
                    .split(';')
                    .map(|id| id.trim().parse().map(ApplicationId))
                    .collect::<Result<Vec<_>, _>>()
                    .ok()?;
                Some(Command::Batch(InstitutionId(self.institution?), ids))
            }
            "publish" => Some(Command::Publish(BatchId(self.batch?))),
            "adjust" => Some(Command::Adjust(CourseId(self.course?), self.delta?)),
            _ => None,
        }
    }
}

fn apply(engine: &Engine, actor: &Actor, command: Command) -> Result<(), AdmissionError> {
    match command {
        Command::Submit(course_id) => {
            let Actor::Student { student_id } = *actor else {
                return Err(AdmissionError::Forbidden);
            };
            engine.submit_application(actor, student_id, course_id)?;
        }
        Command::Decide {
            application,
            status,
            notes,
        } => {
            engine.decide(application, status, actor, notes)?;
        }
        Command::Batch(institution_id, ids) => {
            engine.create_publication_batch(actor, institution_id, &ids)?;
        }
        Command::Publish(batch_id) => {
            engine.publish_batch(actor, batch_id)?;
        }
        Command::Adjust(course_id, delta) => {
            engine.adjust_capacity(actor, course_id, delta)?;
        }
    }
    Ok(())
}

/// Replays admission events from a CSV reader.
///
/// Events are applied in file order, so application and batch ids are
/// assigned deterministically starting at 1. Malformed rows and refused
/// operations are skipped and logged at debug level.
///
/// # CSV Format
///
/// ```csv
/// type,role,actor,institution,course,application,status,applications,batch,delta,notes
/// submit,student,1,,10,,,,,,
/// decide,staff,100,1,,1,approved,,,,strong profile
/// batch,staff,100,1,,,,1,,,
/// publish,staff,100,1,,,,,1,,
/// confirm,student,1,,,1,,,,,
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the header is unreadable.
pub fn process_events<R: Read>(engine: &Engine, reader: R) -> Result<(), csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for (line, result) in rdr.deserialize::<CsvEvent>().enumerate() {
        let event = match result {
            Ok(event) => event,
            Err(e) => {
                debug!(line, error = %e, "skipping malformed row");
                continue;
            }
        };
        let Some(actor) = event.actor() else {
            debug!(line, role = %event.role, "skipping row with unknown role");
            continue;
        };
        let Some(command) = event.into_command() else {
            debug!(line, "skipping invalid event record");
            continue;
        };
        if let Err(e) = apply(engine, &actor, command) {
            debug!(line, error = %e, "skipping refused event");
        }
    }

    Ok(())
}

/// Output row for the applications report.
#[derive(Debug, Serialize)]
struct ApplicationRow {
    application: ApplicationId,
    student: StudentId,
    course: CourseId,
    institution: InstitutionId,
    status: ApplicationStatus,
    batch: Option<BatchId>,
    /// Role-tagged, e.g. `staff:100`.
    decided_by: Option<String>,
    notes: Option<String>,
}

impl From<Application> for ApplicationRow {
    fn from(application: Application) -> Self {
        Self {
            application: application.id,
            student: application.student_id,
            course: application.course_id,
            institution: application.institution_id,
            status: application.status,
            batch: application.publication_batch_id,
            decided_by: application.decided_by.map(|actor| actor.to_string()),
            notes: application.notes,
        }
    }
}

/// Writes every application as CSV, ordered by id.
///
/// Columns: `application, student, course, institution, status, batch, decided_by, notes`
pub fn write_applications<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for application in engine.applications() {
        wtr.serialize(ApplicationRow::from(application))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes course seat counts as CSV, ordered by course id.
///
/// Columns: `course, institution, faculty, total_seats, available_seats, reserved_seats`
pub fn write_courses<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut courses: Vec<_> = engine
        .courses()
        .map(|entry| Arc::clone(entry.value()))
        .collect();
    courses.sort_by_key(|course| course.id());

    let mut wtr = Writer::from_writer(writer);
    for course in courses {
        wtr.serialize(course.as_ref())?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const COURSES: &str = "course,institution,faculty,seats,requires_review\n\
                           10,1,1,1,false\n\
                           20,2,1,5,true\n";

    const HEADER: &str =
        "type,role,actor,institution,course,application,status,applications,batch,delta,notes\n";

    fn engine_with(events: &str) -> Engine {
        let engine = Engine::new();
        load_courses(&engine, Cursor::new(COURSES)).unwrap();
        process_events(&engine, Cursor::new(format!("{HEADER}{events}"))).unwrap();
        engine
    }

    fn status(engine: &Engine, id: u64) -> ApplicationStatus {
        engine.get_application(ApplicationId(id)).unwrap().status
    }

    #[test]
    fn load_courses_registers_rows() {
        let engine = Engine::new();
        let count = load_courses(&engine, Cursor::new(COURSES)).unwrap();
        assert_eq!(count, 2);
        assert!(engine.course(CourseId(20)).unwrap().requires_review());
    }

    #[test]
    fn load_courses_skips_malformed_rows() {
        let engine = Engine::new();
        let csv = "course,institution,faculty,seats\n1,1,1,3\nbad,row,here,x\n2,1,1,4\n";
        assert_eq!(load_courses(&engine, Cursor::new(csv)).unwrap(), 2);
    }

    #[test]
    fn replay_submit_and_approve() {
        let engine = engine_with(
            "submit,student,1,,10,,,,,,\n\
             decide,staff,100,1,,1,approved,,,,strong profile\n",
        );
        assert_eq!(status(&engine, 1), ApplicationStatus::Approved);
        assert_eq!(engine.remaining_seats(CourseId(10)).unwrap(), 0);
        assert_eq!(
            engine.get_application(ApplicationId(1)).unwrap().notes.as_deref(),
            Some("strong profile")
        );
    }

    #[test]
    fn replay_skips_refused_events() {
        let engine = engine_with(
            "submit,student,1,,10,,,,,,\n\
             submit,student,2,,10,,,,,,\n\
             decide,staff,100,1,,1,approved,,,,\n\
             decide,staff,100,1,,2,approved,,,,\n\
             decide,staff,100,1,,2,waitlisted,,,,\n",
        );
        assert_eq!(status(&engine, 1), ApplicationStatus::Approved);
        assert_eq!(status(&engine, 2), ApplicationStatus::Waitlisted);
    }

    #[test]
    fn replay_batch_publish_and_confirm() {
        let engine = engine_with(
            "submit,student,1,,10,,,,,,\n\
             decide,staff,100,1,,1,approved,,,,\n\
             batch,staff,100,1,,,,1,,,\n\
             publish,staff,100,1,,,,,1,,\n\
             confirm,student,1,,,1,,,,,\n\
             decide,staff,100,1,,1,rejected,,,,\n",
        );
        assert_eq!(status(&engine, 1), ApplicationStatus::Confirmed);
        assert!(engine.get_batch(BatchId(1)).unwrap().is_published());
    }

    #[test]
    fn replay_requires_review_course() {
        let engine = engine_with(
            "submit,student,1,,20,,,,,,\n\
             decide,staff,200,2,,1,approved,,,,\n",
        );
        assert_eq!(status(&engine, 1), ApplicationStatus::Pending);

        process_events(
            &engine,
            Cursor::new(format!(
                "{HEADER}review,staff,200,2,,1,,,,,\ndecide,staff,200,2,,1,approved,,,,\n"
            )),
        )
        .unwrap();
        assert_eq!(status(&engine, 1), ApplicationStatus::Approved);
    }

    #[test]
    fn replay_admin_adjusts_capacity() {
        let engine = engine_with(
            "adjust,admin,1,,10,,,,,4,\n\
             adjust,staff,100,1,10,,,,,4,\n",
        );
        assert_eq!(engine.remaining_seats(CourseId(10)).unwrap(), 5);
    }

    #[test]
    fn skip_malformed_rows() {
        let engine = engine_with(
            "submit,student,1,,10,,,,,,\n\
             invalid,row,data,here\n\
             submit,wizard,3,,10,,,,,,\n\
             submit,student,2,,10,,,,,,\n",
        );
        assert_eq!(engine.applications().len(), 2);
    }

    #[test]
    fn write_applications_to_csv() {
        let engine = engine_with(
            "submit,student,1,,10,,,,,,\n\
             decide,staff,100,1,,1,rejected,,,,incomplete\n",
        );

        let mut output = Vec::new();
        write_applications(&engine, &mut output).unwrap();

        let output = String::from_utf8(output).unwrap();
        let mut lines = output.lines();
        assert_eq!(
            lines.next(),
            Some("application,student,course,institution,status,batch,decided_by,notes")
        );
        assert_eq!(lines.next(), Some("1,1,10,1,rejected,,staff:100,incomplete"));
    }

    #[test]
    fn write_courses_to_csv() {
        let engine = engine_with(
            "submit,student,1,,10,,,,,,\n\
             decide,staff,100,1,,1,approved,,,,\n",
        );

        let mut output = Vec::new();
        write_courses(&engine, &mut output).unwrap();

        let output = String::from_utf8(output).unwrap();
        assert_eq!(
            output,
            "course,institution,faculty,total_seats,available_seats,reserved_seats\n\
             10,1,1,1,0,1\n\
             20,2,1,5,5,0\n"
        );
    }
}
