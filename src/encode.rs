use crate::metric::{FieldValue, Point};
use std::io::{self, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("error writing line protocol")]
    Io(#[from] io::Error),
    #[error("field {measurement}.{field} has non-finite value {value}")]
    NonFinite {
        measurement: &'static str,
        field: String,
        value: f64,
    },
    #[error("timestamp of {measurement}.{field} is out of range for nanosecond precision")]
    TimestampOutOfRange {
        measurement: &'static str,
        field: String,
    },
}

/// Writes points as InfluxDB line protocol, one point per line, with
/// nanosecond timestamps.
pub fn encode_points<W: Write>(writable: &mut W, points: &[Point]) -> Result<(), EncodeError> {
    for point in points {
        let timestamp =
            point
                .timestamp
                .timestamp_nanos_opt()
                .ok_or_else(|| EncodeError::TimestampOutOfRange {
                    measurement: point.measurement,
                    field: point.field.clone(),
                })?;
        let value = encode_value(point)?;
        writeln!(
            writable,
            "{} {}={} {}",
            escape(point.measurement, &[',', ' ']),
            escape(&point.field, &[',', '=', ' ']),
            value,
            timestamp
        )?;
    }
    Ok(())
}

pub fn encode_to_string(points: &[Point]) -> Result<String, EncodeError> {
    let mut buf = Vec::new();
    encode_points(&mut buf, points)?;
    // Every piece written above is valid UTF-8.
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn encode_value(point: &Point) -> Result<String, EncodeError> {
    Ok(match &point.value {
        FieldValue::Float(f) => {
            if !f.is_finite() {
                return Err(EncodeError::NonFinite {
                    measurement: point.measurement,
                    field: point.field.clone(),
                    value: *f,
                });
            }
            f.to_string()
        }
        FieldValue::Integer(i) => format!("{i}i"),
        FieldValue::Boolean(b) => b.to_string(),
        FieldValue::String(s) => format!("\"{}\"", escape(s, &['\\', '"'])),
    })
}

fn escape(s: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
pub mod tests {
    use super::{encode_to_string, EncodeError};
    use crate::metric::{tests::sample_measurement, FieldValue, Point};
    use chrono::{TimeZone, Utc};

    fn point(measurement: &'static str, field: &str, value: FieldValue) -> Point {
        Point {
            measurement,
            field: field.to_string(),
            value,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_encode_sample() {
        let points = sample_measurement().points();
        let encoded = encode_to_string(&points).unwrap();
        let lines: Vec<&str> = encoded.lines().collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "ping latency=10.5 1704067200000000000");
        assert_eq!(lines[1], "download bandwidth=12500000i 1704067200000000000");
        assert!(lines[2].starts_with("download bandwidth_mbps=100"));
        assert!(lines[2].ends_with(" 1704067200000000000"));
        assert_eq!(lines[5], "server id=42i 1704067200000000000");
    }

    #[test]
    fn test_encode_nanosecond_timestamp() {
        let mut p = point("ping", "jitter", FieldValue::Float(0.25));
        p.timestamp = Utc.timestamp_nanos(1_704_067_200_123_456_789);
        let encoded = encode_to_string(&[p]).unwrap();
        assert_eq!(encoded, "ping jitter=0.25 1704067200123456789\n");
    }

    #[test]
    fn test_encode_escapes() {
        let encoded = encode_to_string(&[
            point("server", "host name", FieldValue::String("a \"quoted\" \\ name".into())),
            point("server", "a,b=c", FieldValue::Boolean(true)),
        ])
        .unwrap();
        assert_eq!(
            encoded,
            "server host\\ name=\"a \\\"quoted\\\" \\\\ name\" 1704067200000000000\n\
             server a\\,b\\=c=true 1704067200000000000\n"
        );
    }

    #[test]
    fn test_encode_rejects_non_finite() {
        let err = encode_to_string(&[point("ping", "latency", FieldValue::Float(f64::NAN))])
            .unwrap_err();
        assert!(matches!(err, EncodeError::NonFinite { .. }));
    }

    #[test]
    fn test_encode_empty() {
        assert_eq!(encode_to_string(&[]).unwrap(), "");
    }
}
