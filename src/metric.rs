use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

const BANDWIDTH_FIELD: &str = "bandwidth";

/// Top-level sections of a speedtest result that get written to storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Ping,
    Download,
    Upload,
    Server,
}

impl Section {
    pub const ALL: [Section; 4] = [
        Section::Ping,
        Section::Download,
        Section::Upload,
        Section::Server,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Section::Ping => "ping",
            Section::Download => "download",
            Section::Upload => "upload",
            Section::Server => "server",
        }
    }
}

/// One parsed speedtest result.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub timestamp: DateTime<Utc>,
    pub ping: Map<String, Value>,
    pub download: Map<String, Value>,
    pub upload: Map<String, Value>,
    pub server: Map<String, Value>,
}

impl Measurement {
    pub fn section(&self, section: Section) -> &Map<String, Value> {
        match section {
            Section::Ping => &self.ping,
            Section::Download => &self.download,
            Section::Upload => &self.upload,
            Section::Server => &self.server,
        }
    }

    /// Flattens the measurement into points, all stamped with the
    /// measurement's timestamp.
    pub fn points(&self) -> Vec<Point> {
        let mut points = Vec::new();
        for section in Section::ALL {
            for (key, value) in self.section(section) {
                push_field(&mut points, section, key.clone(), value, self.timestamp);
            }
        }
        points
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    String(String),
    Boolean(bool),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(f) => Some(*f),
            FieldValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: &'static str,
    pub field: String,
    pub value: FieldValue,
    pub timestamp: DateTime<Utc>,
}

/// Converts bytes per second to megabits per second.
pub fn bps_to_mbps(bytes_per_sec: f64) -> f64 {
    bytes_per_sec * 8.0 * 1e-6
}

fn push_field(
    points: &mut Vec<Point>,
    section: Section,
    key: String,
    value: &Value,
    timestamp: DateTime<Utc>,
) {
    let value = match value {
        Value::Null | Value::Array(_) => return,
        Value::Object(children) => {
            for (child, value) in children {
                push_field(points, section, format!("{key}_{child}"), value, timestamp);
            }
            return;
        }
        Value::Bool(b) => FieldValue::Boolean(*b),
        Value::String(s) => FieldValue::String(s.clone()),
        Value::Number(n) => match n.as_i64() {
            Some(i) => FieldValue::Integer(i),
            // u64 above i64::MAX, or a real float.
            None => match n.as_f64() {
                Some(f) => FieldValue::Float(f),
                None => return,
            },
        },
    };

    let mbps = match (key.as_str(), value.as_f64()) {
        (BANDWIDTH_FIELD, Some(bandwidth)) => Some(bps_to_mbps(bandwidth)),
        _ => None,
    };

    points.push(Point {
        measurement: section.name(),
        field: key,
        value,
        timestamp,
    });

    if let Some(mbps) = mbps {
        points.push(Point {
            measurement: section.name(),
            field: format!("{BANDWIDTH_FIELD}_mbps"),
            value: FieldValue::Float(mbps),
            timestamp,
        });
    }
}
