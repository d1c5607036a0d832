//! # Record Line Schema
//!
//! The drone logs one record per line with a fixed column order:
//!
//! ```text
//! ts,lat,lon,alt,drop_id,speed_mps,sats,fix_ok
//! 1718035200.5,19.4326,-99.1332,2240.0,3,5.2,8,1
//! ```
//!
//! The same format is used for the persisted CSV file, with one header row.

use crate::error::RecordParseError;
use crate::types::Record;

/// Canonical header row.
pub const HEADER: &str = "ts,lat,lon,alt,drop_id,speed_mps,sats,fix_ok";

/// Column names in schema order.
pub const COLUMNS: [&str; FIELD_COUNT] = [
    "ts",
    "lat",
    "lon",
    "alt",
    "drop_id",
    "speed_mps",
    "sats",
    "fix_ok",
];

/// Number of comma-separated fields in a record line.
pub const FIELD_COUNT: usize = 8;

/// Returns true if `line` is the canonical header (surrounding whitespace ignored).
pub fn is_header(line: &str) -> bool {
    let mut fields = line.trim().split(',').map(str::trim);
    COLUMNS.iter().all(|c| fields.next() == Some(*c)) && fields.next().is_none()
}

/// Returns true if `line` has exactly [`FIELD_COUNT`] comma-separated fields.
pub fn has_record_arity(line: &str) -> bool {
    line.split(',').count() == FIELD_COUNT
}

/// Parses one record line.
pub fn parse_line(line: &str) -> Result<Record, RecordParseError> {
    let fields: Vec<&str> = line.trim().split(',').map(str::trim).collect();
    if fields.len() != FIELD_COUNT {
        return Err(RecordParseError::WrongFieldCount {
            found: fields.len(),
        });
    }

    Ok(Record {
        ts: parse_finite(COLUMNS[0], fields[0])?,
        lat: parse_finite(COLUMNS[1], fields[1])?,
        lon: parse_finite(COLUMNS[2], fields[2])?,
        alt: parse_float(COLUMNS[3], fields[3])?,
        drop_id: parse_int(COLUMNS[4], fields[4])?,
        speed_mps: parse_float(COLUMNS[5], fields[5])?,
        sats: parse_int(COLUMNS[6], fields[6])?,
        fix_ok: parse_flag(fields[7])?,
    })
}

/// Formats a record as one line in schema order (no trailing newline).
pub fn format_line(record: &Record) -> String {
    format!(
        "{},{},{},{},{},{},{},{}",
        record.ts,
        record.lat,
        record.lon,
        record.alt,
        record.drop_id,
        record.speed_mps,
        record.sats,
        if record.fix_ok { 1 } else { 0 }
    )
}

/// Parses the `fix_ok` column.
pub fn parse_flag(value: &str) -> Result<bool, RecordParseError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "1.0" | "true" => Ok(true),
        "0" | "0.0" | "false" => Ok(false),
        _ => Err(RecordParseError::InvalidFlag(value.to_string())),
    }
}

fn parse_float(field: &'static str, value: &str) -> Result<f64, RecordParseError> {
    value
        .parse::<f64>()
        .map_err(|_| RecordParseError::InvalidNumber {
            field,
            value: value.to_string(),
        })
}

fn parse_finite(field: &'static str, value: &str) -> Result<f64, RecordParseError> {
    let parsed = parse_float(field, value)?;
    if parsed.is_finite() {
        Ok(parsed)
    } else {
        Err(RecordParseError::NonFinite { field })
    }
}

/// Integer columns also accept an integral float such as `3.0`.
fn parse_int(field: &'static str, value: &str) -> Result<i64, RecordParseError> {
    if let Ok(parsed) = value.parse::<i64>() {
        return Ok(parsed);
    }

    match value.parse::<f64>() {
        Ok(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
        _ => Err(RecordParseError::InvalidNumber {
            field,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reference_line() {
        let record = parse_line("100.0,19.4,-99.1,50.0,3,5.2,8,1").unwrap();
        assert_eq!(record.ts, 100.0);
        assert_eq!(record.lat, 19.4);
        assert_eq!(record.lon, -99.1);
        assert_eq!(record.alt, 50.0);
        assert_eq!(record.drop_id, 3);
        assert_eq!(record.speed_mps, 5.2);
        assert_eq!(record.sats, 8);
        assert!(record.fix_ok);
    }

    #[test]
    fn test_header_detection() {
        assert!(is_header(HEADER));
        assert!(is_header("  ts, lat,lon,alt,drop_id,speed_mps,sats,fix_ok \n"));
        assert!(!is_header("ts,lat,lon"));
        assert!(!is_header("100.0,19.4,-99.1,50.0,3,5.2,8,1"));
    }

    #[test]
    fn test_wrong_arity_rejected() {
        assert_eq!(
            parse_line("1,2,3"),
            Err(RecordParseError::WrongFieldCount { found: 3 })
        );
        assert!(!has_record_arity("1,2,3"));
        assert!(has_record_arity("1,2,3,4,5,6,7,8"));
    }

    #[test]
    fn test_non_numeric_field_rejected() {
        let err = parse_line("100.0,abc,-99.1,50.0,3,5.2,8,1").unwrap_err();
        assert!(matches!(err, RecordParseError::InvalidNumber { field: "lat", .. }));
    }

    #[test]
    fn test_identity_fields_must_be_finite() {
        let err = parse_line("NaN,19.4,-99.1,50.0,3,5.2,8,1").unwrap_err();
        assert_eq!(err, RecordParseError::NonFinite { field: "ts" });

        // altitude without a fix may be logged as nan
        assert!(parse_line("100.0,19.4,-99.1,nan,3,5.2,0,0").is_ok());
    }

    #[test]
    fn test_integral_float_columns() {
        let record = parse_line("100.0,19.4,-99.1,50.0,3.0,5.2,8.0,True").unwrap();
        assert_eq!(record.drop_id, 3);
        assert_eq!(record.sats, 8);
        assert!(record.fix_ok);

        assert!(parse_line("100.0,19.4,-99.1,50.0,3.5,5.2,8,1").is_err());
        assert!(parse_line("100.0,19.4,-99.1,50.0,3,5.2,8,yes").is_err());
    }

    #[test]
    fn test_format_line_reparses() {
        let original = parse_line("1718035200.25,19.4326,-99.1332,2240.5,12,0,0,0").unwrap();
        let line = format_line(&original);
        assert_eq!(line, "1718035200.25,19.4326,-99.1332,2240.5,12,0,0,0");
        assert_eq!(parse_line(&line).unwrap(), original);
    }
}
