//! Value transforms applied when a field is written into a cell.
//!
//! None of these fail: a value that cannot be coerced is written unchanged.

use serde_json::Value;

use crate::region::region_name;
use crate::CellValue;

/// Text form of a JSON value (`null` gives an empty string)
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The value as-is, mapped to the closest cell type
pub fn raw(value: Option<&Value>) -> CellValue {
    match value {
        None | Some(Value::Null) => CellValue::empty(),
        Some(Value::String(s)) => CellValue::Text(s.clone()),
        Some(Value::Bool(b)) => CellValue::Bool(*b),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => CellValue::Integer(i),
            None => CellValue::Number(n.as_f64().unwrap_or_default()),
        },
        Some(other) => CellValue::Text(other.to_string()),
    }
}

/// Loose truthiness: `true`, non-empty strings, non-zero numbers and
/// non-empty collections
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}

/// `mark` when the value is truthy, otherwise empty
pub fn mark(value: Option<&Value>, mark: &str) -> CellValue {
    if is_truthy(value) {
        CellValue::text(mark)
    } else {
        CellValue::empty()
    }
}

/// Coerce to an integer, falling back to the raw value.
///
/// Numbers are truncated toward zero; strings may carry surrounding
/// whitespace and a sign.
pub fn integer(value: Option<&Value>) -> CellValue {
    match value {
        Some(Value::String(s)) if !s.is_empty() => match s.trim().parse::<i64>() {
            Ok(i) => CellValue::Integer(i),
            Err(_) => CellValue::Text(s.clone()),
        },
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => CellValue::Integer(i),
            None => match n.as_f64() {
                Some(f) if f.is_finite() && f.abs() < i64::MAX as f64 => {
                    CellValue::Integer(f.trunc() as i64)
                }
                _ => raw(value),
            },
        },
        Some(Value::Bool(b)) => CellValue::Integer(i64::from(*b)),
        other => raw(other),
    }
}

/// Percentage as a fraction (`"50"` → `0.5`).
///
/// Empty or absent gives empty text; anything that does not parse to a
/// finite number is written unchanged.
pub fn percent(value: Option<&Value>) -> CellValue {
    match value {
        None | Some(Value::Null) => CellValue::empty(),
        Some(Value::String(s)) if s.is_empty() => CellValue::empty(),
        Some(Value::String(s)) => match s.trim().parse::<f64>() {
            Ok(f) if f.is_finite() => CellValue::Number(f / 100.0),
            _ => CellValue::Text(s.clone()),
        },
        Some(Value::Number(n)) => match n.as_f64() {
            Some(f) => CellValue::Number(f / 100.0),
            None => raw(value),
        },
        Some(Value::Bool(b)) => CellValue::Number(if *b { 0.01 } else { 0.0 }),
        other => raw(other),
    }
}

/// Combine a code and its label.
///
/// `"1000"` + `"Finance"` → `"1000 Finance"`. When the label already
/// contains the code, or only one side is present, that side is used.
pub fn code_label(code: Option<&Value>, label: Option<&Value>) -> CellValue {
    let code = code.map(value_text).unwrap_or_default();
    let label = label.map(value_text).unwrap_or_default();

    if !code.is_empty() && !label.is_empty() && !label.contains(&code) {
        CellValue::Text(format!("{code} {label}"))
    } else if !label.is_empty() {
        CellValue::Text(label)
    } else {
        CellValue::Text(code)
    }
}

/// Region display name: an explicit label wins, otherwise the code is
/// translated. Unknown codes pass through.
pub fn region(code: Option<&Value>, label: Option<&Value>) -> CellValue {
    if let Some(label) = label.filter(|v| !value_text(v).is_empty()) {
        return raw(Some(label));
    }
    match code {
        Some(Value::String(code)) => CellValue::text(region_name(code).unwrap_or(code.as_str())),
        other => raw(other),
    }
}

/// Replace exact matches with their display form; other values pass through
pub fn normalize(value: Option<&Value>, replacements: &[(&str, &str)]) -> CellValue {
    match value {
        Some(Value::String(s)) => replacements
            .iter()
            .find(|(from, _)| *from == s.as_str())
            .map(|(_, to)| CellValue::text(*to))
            .unwrap_or_else(|| CellValue::Text(s.clone())),
        other => raw(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn marks_follow_truthiness() {
        assert_eq!(mark(Some(&json!(true)), "x"), CellValue::text("x"));
        assert_eq!(mark(Some(&json!(false)), "x"), CellValue::empty());
        assert_eq!(mark(None, "x"), CellValue::empty());
        assert_eq!(mark(Some(&json!("yes")), "X"), CellValue::text("X"));
        assert_eq!(mark(Some(&json!("")), "x"), CellValue::empty());
        assert_eq!(mark(Some(&json!(0)), "x"), CellValue::empty());
        assert_eq!(mark(Some(&json!(1)), "x"), CellValue::text("x"));
    }

    #[test]
    fn percent_scaling() {
        assert_eq!(percent(Some(&json!("50"))), CellValue::Number(0.5));
        assert_eq!(percent(Some(&json!(" 100 "))), CellValue::Number(1.0));
        assert_eq!(percent(Some(&json!(25))), CellValue::Number(0.25));
        assert_eq!(percent(Some(&json!("abc"))), CellValue::text("abc"));
        assert_eq!(percent(Some(&json!("NaN"))), CellValue::text("NaN"));
        assert_eq!(percent(Some(&json!(""))), CellValue::empty());
        assert_eq!(percent(None), CellValue::empty());
    }

    #[test]
    fn integer_coercion() {
        assert_eq!(integer(Some(&json!("123"))), CellValue::Integer(123));
        assert_eq!(integer(Some(&json!(" -7 "))), CellValue::Integer(-7));
        assert_eq!(integer(Some(&json!(4))), CellValue::Integer(4));
        assert_eq!(integer(Some(&json!(4.9))), CellValue::Integer(4));
        assert_eq!(integer(Some(&json!("ABC"))), CellValue::text("ABC"));
        assert_eq!(integer(Some(&json!("12.5"))), CellValue::text("12.5"));
        assert_eq!(integer(Some(&json!(""))), CellValue::empty());
        assert_eq!(integer(None), CellValue::empty());
    }

    #[test]
    fn code_and_label() {
        let c = |code: &str, label: &str| code_label(Some(&json!(code)), Some(&json!(label)));
        assert_eq!(c("1000", "Finance"), CellValue::text("1000 Finance"));
        assert_eq!(c("1000", "1000"), CellValue::text("1000"));
        assert_eq!(c("1000", "1000 Berlin Manufacturing"), CellValue::text("1000 Berlin Manufacturing"));
        assert_eq!(c("", "Finance"), CellValue::text("Finance"));
        assert_eq!(c("1000", ""), CellValue::text("1000"));
        assert_eq!(code_label(None, None), CellValue::empty());
        assert_eq!(code_label(Some(&json!(1001)), Some(&json!("Production"))), CellValue::text("1001 Production"));
    }

    #[test]
    fn region_lookup() {
        assert_eq!(region(Some(&json!("DE")), None), CellValue::text("Germany"));
        assert_eq!(region(Some(&json!("XX")), None), CellValue::text("XX"));
        assert_eq!(region(Some(&json!("DE")), Some(&json!("Deutschland"))), CellValue::text("Deutschland"));
        assert_eq!(region(Some(&json!("NL")), Some(&json!(""))), CellValue::text("Netherlands"));
        assert_eq!(region(None, None), CellValue::empty());
    }

    #[test]
    fn normalization() {
        let table = [("Update", "Change")];
        assert_eq!(normalize(Some(&json!("Update")), &table), CellValue::text("Change"));
        assert_eq!(normalize(Some(&json!("New")), &table), CellValue::text("New"));
        assert_eq!(normalize(None, &table), CellValue::empty());
    }

    #[test]
    fn raw_keeps_types() {
        assert_eq!(raw(Some(&json!(12))), CellValue::Integer(12));
        assert_eq!(raw(Some(&json!(1.5))), CellValue::Number(1.5));
        assert_eq!(raw(Some(&json!(true))), CellValue::Bool(true));
        assert_eq!(raw(Some(&json!(["a"]))), CellValue::text("[\"a\"]"));
    }
}
