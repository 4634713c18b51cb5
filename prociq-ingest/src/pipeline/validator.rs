//! Record Validator
//!
//! Type and range checks over the mapped canonical fields. Hard errors
//! mark the record invalid and halt its progression; the record is still
//! quality-scored for batch reporting but never reaches the resolver or
//! commit engine. Validation failures are local and never abort the batch.

use crate::pipeline::types::{
    CanonicalField, ErrorSeverity, FieldCheck, FieldError, FieldKind, FieldValue, MappedRow,
    ValidationOutcome,
};
use chrono::NaiveDate;

/// Accepted date representations, tried in order
const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%m/%d/%Y", "%d.%m.%Y"];

/// Maximum accepted length for any text field
const MAX_TEXT_LEN: usize = 256;

/// Validate one mapped row, producing typed values plus findings
pub fn validate_row(row: &MappedRow) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::default();

    for field in CanonicalField::ALL {
        let raw = row.get_non_blank(field);

        match raw {
            None => {
                if field.is_required() {
                    outcome.errors.push(FieldError {
                        field: field.name().to_string(),
                        message: "required field is missing or blank".to_string(),
                        severity: ErrorSeverity::Error,
                    });
                    outcome.checks.push(FieldCheck { field, passed: false });
                }
                // Optional absent fields are not checked at all
            }
            Some(raw) => {
                let passed = check_field(field, raw, &mut outcome);
                outcome.checks.push(FieldCheck { field, passed });
            }
        }
    }

    outcome
}

/// Type/range check one present field; returns whether it passed and, on
/// success, stores the typed value
fn check_field(field: CanonicalField, raw: &str, outcome: &mut ValidationOutcome) -> bool {
    match field.kind() {
        FieldKind::Number => match parse_number(raw) {
            Some(n) if n >= 0.0 => {
                if n == 0.0 {
                    // Zero is valid but worth surfacing to quality scoring
                    outcome.errors.push(FieldError {
                        field: field.name().to_string(),
                        message: "value is zero".to_string(),
                        severity: ErrorSeverity::Warning,
                    });
                }
                outcome.typed.insert(field, FieldValue::Number(n));
                true
            }
            Some(_) => {
                outcome.errors.push(FieldError {
                    field: field.name().to_string(),
                    message: format!("negative value not allowed: {}", raw),
                    severity: ErrorSeverity::Error,
                });
                false
            }
            None => {
                outcome.errors.push(FieldError {
                    field: field.name().to_string(),
                    message: format!("not a number: {}", raw),
                    severity: ErrorSeverity::Error,
                });
                false
            }
        },
        FieldKind::Date => match parse_date(raw) {
            Some(date) => {
                outcome.typed.insert(field, FieldValue::Date(date));
                true
            }
            None => {
                outcome.errors.push(FieldError {
                    field: field.name().to_string(),
                    message: format!("unparseable date: {}", raw),
                    severity: ErrorSeverity::Error,
                });
                false
            }
        },
        FieldKind::Text => {
            if raw.len() > MAX_TEXT_LEN {
                outcome.errors.push(FieldError {
                    field: field.name().to_string(),
                    message: format!("exceeds {} characters", MAX_TEXT_LEN),
                    severity: ErrorSeverity::Error,
                });
                false
            } else {
                outcome.typed.insert(field, FieldValue::Text(raw.to_string()));
                true
            }
        }
    }
}

/// Parse a numeric field, tolerating thousands separators and a leading
/// currency symbol
fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches(['$', '€', '£'])
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Parse a date against the fixed allowed format set
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn row(pairs: &[(CanonicalField, &str)]) -> MappedRow {
        let fields: BTreeMap<_, _> = pairs
            .iter()
            .map(|(f, v)| (*f, v.to_string()))
            .collect();
        MappedRow { fields }
    }

    fn complete_row() -> MappedRow {
        row(&[
            (CanonicalField::SupplierName, "Acme Corp"),
            (CanonicalField::MaterialName, "Steel Bolt M8"),
            (CanonicalField::Quantity, "100"),
            (CanonicalField::UnitPrice, "2.50"),
            (CanonicalField::OrderDate, "2026-05-01"),
        ])
    }

    #[test]
    fn test_complete_row_passes() {
        let outcome = validate_row(&complete_row());
        assert!(!outcome.is_invalid(), "errors: {:?}", outcome.errors);
        assert_eq!(
            outcome.typed.get(&CanonicalField::Quantity),
            Some(&FieldValue::Number(100.0))
        );
        assert_eq!(
            outcome.typed.get(&CanonicalField::OrderDate),
            Some(&FieldValue::Date(NaiveDate::from_ymd_opt(2026, 5, 1).unwrap()))
        );
    }

    #[test]
    fn test_missing_required_field_is_hard_error() {
        let mut r = complete_row();
        r.fields.remove(&CanonicalField::SupplierName);
        let outcome = validate_row(&r);
        assert!(outcome.is_invalid());
        assert!(outcome
            .errors
            .iter()
            .any(|e| e.field == "supplier_name" && e.severity == ErrorSeverity::Error));
    }

    #[test]
    fn test_whitespace_only_name_is_hard_error() {
        let mut r = complete_row();
        r.fields
            .insert(CanonicalField::SupplierName, "   ".to_string());
        let outcome = validate_row(&r);
        assert!(outcome.is_invalid());
    }

    #[test]
    fn test_unparseable_date_is_hard_error() {
        let mut r = complete_row();
        r.fields
            .insert(CanonicalField::OrderDate, "not-a-date".to_string());
        let outcome = validate_row(&r);
        assert!(outcome.is_invalid());
    }

    #[test]
    fn test_date_format_set() {
        for raw in ["2026-05-01", "2026/05/01", "01/05/2026", "05/01/2026", "01.05.2026"] {
            assert!(parse_date(raw).is_some(), "{} should parse", raw);
        }
        assert!(parse_date("May 1st 2026").is_none());
    }

    #[test]
    fn test_negative_quantity_rejected() {
        let mut r = complete_row();
        r.fields
            .insert(CanonicalField::Quantity, "-5".to_string());
        let outcome = validate_row(&r);
        assert!(outcome.is_invalid());
    }

    #[test]
    fn test_zero_price_valid_but_flagged() {
        let mut r = complete_row();
        r.fields.insert(CanonicalField::UnitPrice, "0".to_string());
        let outcome = validate_row(&r);
        assert!(!outcome.is_invalid());
        assert!(outcome
            .errors
            .iter()
            .any(|e| e.field == "unit_price" && e.severity == ErrorSeverity::Warning));
    }

    #[test]
    fn test_currency_symbols_and_separators_tolerated() {
        assert_eq!(parse_number("$1,234.50"), Some(1234.5));
        assert_eq!(parse_number("€ 99"), Some(99.0));
        assert_eq!(parse_number("abc"), None);
    }

    #[test]
    fn test_overlong_text_rejected() {
        let mut r = complete_row();
        r.fields
            .insert(CanonicalField::SupplierName, "x".repeat(300));
        let outcome = validate_row(&r);
        assert!(outcome.is_invalid());
    }

    #[test]
    fn test_optional_absent_fields_not_checked() {
        let outcome = validate_row(&complete_row());
        assert!(outcome
            .checks
            .iter()
            .all(|c| c.field != CanonicalField::DeliveryDate));
    }
}
