use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::communication::messages::{ControllerEvent, EventSink};
use crate::shared_data::current_timestamp;

/// One row of the event log. `detail` holds the full event as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: u64,
    pub sim_time: Option<f64>,
    pub event: String,
    pub vehicle_id: Option<String>,
    pub direction: Option<String>,
    pub detail: String,
}

impl From<&ControllerEvent> for EventRecord {
    fn from(event: &ControllerEvent) -> Self {
        let (vehicle_id, direction) = match event {
            ControllerEvent::CandidateDetected { candidate, .. } => (
                Some(candidate.vehicle_id.to_string()),
                Some(candidate.direction.to_string()),
            ),
            ControllerEvent::TelemetryFault { vehicle_id, .. } => (Some(vehicle_id.to_string()), None),
            ControllerEvent::OverrideActivated {
                vehicle_id,
                direction,
                ..
            }
            | ControllerEvent::OverrideEnded {
                vehicle_id,
                direction,
                ..
            } => (Some(vehicle_id.to_string()), Some(direction.to_string())),
            ControllerEvent::ClearanceIssued {
                previous_direction, ..
            } => (None, Some(previous_direction.to_string())),
            ControllerEvent::NormalResumed { direction, .. } => (None, Some(direction.to_string())),
            _ => (None, None),
        };
        EventRecord {
            timestamp: current_timestamp(),
            sim_time: event.time_s(),
            event: event.kind().to_string(),
            vehicle_id,
            direction,
            detail: serde_json::to_string(event).unwrap_or_default(),
        }
    }
}

/// Appends a record to a CSV file, writing the header only for a new file.
pub fn log_to_csv<T: Serialize>(path: &Path, record: &T) -> Result<(), Box<dyn Error>> {
    let file_exists = path.exists();
    let file = OpenOptions::new().append(true).create(true).open(path)?;
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(file);
    wtr.serialize(record)?;
    wtr.flush()?;
    Ok(())
}

/// Reads every record back, for reports and tests.
pub fn read_events(path: &Path) -> Result<Vec<EventRecord>, Box<dyn Error>> {
    let mut rdr = csv::Reader::from_path(path)?;
    let mut records = Vec::new();
    for result in rdr.deserialize() {
        records.push(result?);
    }
    Ok(records)
}

/// Event sink appending to a CSV file. Status ticks are left out unless asked for.
#[derive(Debug, Clone)]
pub struct CsvEventLog {
    path: PathBuf,
    include_status: bool,
    failures: u64,
}

impl CsvEventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            include_status: false,
            failures: 0,
        }
    }

    pub fn with_status(mut self, include_status: bool) -> Self {
        self.include_status = include_status;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }
}

impl EventSink for CsvEventLog {
    fn emit(&mut self, event: &ControllerEvent) {
        if !self.include_status && matches!(event, ControllerEvent::Status { .. }) {
            return;
        }
        if let Err(e) = log_to_csv(&self.path, &EventRecord::from(event)) {
            // only the first failure is worth a warning
            if self.failures == 0 {
                log::warn!("Error logging event to {}: {}", self.path.display(), e);
            }
            self.failures += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared_data::Direction;
    use std::fs;

    #[test]
    fn appends_rows_under_a_single_header() {
        let path = std::env::temp_dir().join(format!("signal_priority_events_{}.csv", std::process::id()));
        let _ = fs::remove_file(&path);
        let mut sink = CsvEventLog::new(&path);
        sink.emit(&ControllerEvent::OverrideActivated {
            time_s: 5.5,
            vehicle_id: "amb1".into(),
            direction: Direction::NS,
            indication: "GrGr".to_string(),
            duration_s: 10.0,
        });
        sink.emit(&ControllerEvent::Status {
            time_s: 6.0,
            step: 60,
            override_active: true,
            phase: None,
            phase_name: None,
            vehicles: 1,
        });
        sink.emit(&ControllerEvent::ClearanceIssued {
            time_s: 9.0,
            previous_direction: Direction::NS,
            indication: "ryry".to_string(),
            duration_s: 2.0,
        });

        let records = read_events(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event, "override_activated");
        assert_eq!(records[0].vehicle_id.as_deref(), Some("amb1"));
        assert_eq!(records[0].sim_time, Some(5.5));
        assert_eq!(records[1].direction.as_deref(), Some("NS"));
        assert!(records[1].detail.contains("\"ryry\""));
        assert_eq!(fs::read_to_string(&path).unwrap().matches("timestamp").count(), 1);
        assert_eq!(sink.failures(), 0);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn unwritable_path_counts_failures() {
        let path = std::env::temp_dir()
            .join("signal_priority_no_such_dir")
            .join("nested")
            .join("events.csv");
        let mut sink = CsvEventLog::new(path);
        sink.emit(&ControllerEvent::Finished {
            time_s: 1.0,
            steps: 10,
            processed_vehicles: 0,
            overrides_activated: 0,
        });
        assert_eq!(sink.failures(), 1);
    }
}
