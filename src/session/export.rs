//! # Session Export
//!
//! JSON and CSV renderings of a session and its readings.

use serde::{Deserialize, Serialize};

use super::types::{Session, StoredReading};
use crate::error::{Result, SenseBridgeError};

/// CSV column order
pub const CSV_COLUMNS: [&str; 17] = [
    "timestamp",
    "accel_x",
    "accel_y",
    "accel_z",
    "gyro_x",
    "gyro_y",
    "gyro_z",
    "quat_x",
    "quat_y",
    "quat_z",
    "quat_w",
    "temperature",
    "humidity",
    "pressure",
    "bsec",
    "co2",
    "gas",
];

/// Supported export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl std::str::FromStr for ExportFormat {
    type Err = SenseBridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(SenseBridgeError::Export(format!("Unsupported format: {}", other))),
        }
    }
}

/// JSON export document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionExport {
    pub session: Session,
    pub readings: Vec<StoredReading>,
}

/// CSV row, fields in [`CSV_COLUMNS`] order
#[derive(Serialize)]
struct CsvRow {
    timestamp: i64,
    accel_x: Option<f64>,
    accel_y: Option<f64>,
    accel_z: Option<f64>,
    gyro_x: Option<f64>,
    gyro_y: Option<f64>,
    gyro_z: Option<f64>,
    quat_x: Option<f64>,
    quat_y: Option<f64>,
    quat_z: Option<f64>,
    quat_w: Option<f64>,
    temperature: Option<f64>,
    humidity: Option<f64>,
    pressure: Option<f64>,
    bsec: Option<f64>,
    co2: Option<f64>,
    gas: Option<f64>,
}

impl From<&StoredReading> for CsvRow {
    fn from(r: &StoredReading) -> Self {
        Self {
            timestamp: r.timestamp,
            accel_x: r.accel_x,
            accel_y: r.accel_y,
            accel_z: r.accel_z,
            gyro_x: r.gyro_x,
            gyro_y: r.gyro_y,
            gyro_z: r.gyro_z,
            quat_x: r.quat_x,
            quat_y: r.quat_y,
            quat_z: r.quat_z,
            quat_w: r.quat_w,
            temperature: r.temperature,
            humidity: r.humidity,
            pressure: r.pressure,
            bsec: r.bsec,
            co2: r.co2,
            gas: r.gas,
        }
    }
}

/// Render readings as CSV: a header line, then one line per reading
///
/// Missing values are written as empty cells.
///
/// # Errors
///
/// Returns `Export` error if a row cannot be written
pub fn to_csv(readings: &[StoredReading]) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    // Header is written by hand so an empty session still gets one
    writer.write_record(CSV_COLUMNS)?;
    for reading in readings {
        writer.serialize(CsvRow::from(reading))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| SenseBridgeError::Export(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| SenseBridgeError::Export(e.to_string()))
}

/// Render a session and its readings as a pretty-printed JSON document
pub fn to_json(session: &Session, readings: &[StoredReading]) -> Result<String> {
    let doc = SessionExport {
        session: session.clone(),
        readings: readings.to_vec(),
    };
    Ok(serde_json::to_string_pretty(&doc)?)
}

/// Suggested download file name
pub fn file_name(session_id: &str, format: ExportFormat) -> String {
    match format {
        ExportFormat::Json => format!("session-{}.json", session_id),
        ExportFormat::Csv => format!("session-{}.csv", session_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::SessionStatus;
    use std::collections::BTreeSet;

    fn session() -> Session {
        Session {
            id: "s1".to_string(),
            name: "Bench Test".to_string(),
            device_name: "Nicla".to_string(),
            device_id: None,
            notes: None,
            tags: BTreeSet::new(),
            started_at: 1_000,
            ended_at: Some(2_000),
            status: SessionStatus::Completed,
        }
    }

    fn readings() -> Vec<StoredReading> {
        let mut a = StoredReading {
            id: "a".to_string(),
            session_id: "s1".to_string(),
            timestamp: 1_100,
            ..Default::default()
        };
        a.temperature = Some(21.5);

        let mut b = a.clone();
        b.id = "b".to_string();
        b.timestamp = 1_200;
        b.temperature = None;
        b.accel_x = Some(0.5);
        b.accel_y = Some(-0.5);
        b.accel_z = Some(1.0);

        let mut c = a.clone();
        c.id = "c".to_string();
        c.timestamp = 1_300;
        c.temperature = None;
        c.co2 = Some(600.0);

        vec![a, b, c]
    }

    #[test]
    fn test_csv_header_and_rows() {
        let csv = to_csv(&readings()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[0],
            "timestamp,accel_x,accel_y,accel_z,gyro_x,gyro_y,gyro_z,quat_x,quat_y,quat_z,quat_w,temperature,humidity,pressure,bsec,co2,gas"
        );
        for line in &lines[1..] {
            assert_eq!(line.split(',').count(), CSV_COLUMNS.len());
        }
        assert!(lines[1].starts_with("1100,"));
        assert_eq!(lines[1].split(',').nth(11), Some("21.5"));
        assert_eq!(lines[2].split(',').nth(1), Some("0.5"));
        assert_eq!(lines[3].split(',').nth(15), Some("600.0"));
    }

    #[test]
    fn test_csv_empty_session_has_header() {
        let csv = to_csv(&[]).unwrap();
        assert_eq!(csv.lines().count(), 1);
    }

    #[test]
    fn test_json_export_shape() {
        let json = to_json(&session(), &readings()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["session"]["name"], "Bench Test");
        assert_eq!(value["readings"].as_array().unwrap().len(), 3);
        assert_eq!(value["readings"][0]["temperature"], 21.5);
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!("json".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert!("xml".parse::<ExportFormat>().is_err());
        assert_eq!(file_name("abc", ExportFormat::Csv), "session-abc.csv");
    }
}
