use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::form::field_map::keys;

/// Formats tried in order before falling back to a positional split
const DATE_FORMATS: [&str; 3] = ["%d/%m/%Y", "%Y-%m-%d", "%d-%m-%Y"];

/// A date of birth decomposed into form parts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateParts {
    pub day: String,
    pub month: String,
    pub year: String,
}

/// Decompose a raw date cell into zero-padded day, month and four digit year.
///
/// Never fails: unparseable input with exactly three `-` or `/` separated parts is passed
/// through positionally, anything else yields empty parts.
pub fn normalize_date(raw: Option<&str>) -> DateParts {
    let Some(raw) = raw else {
        return DateParts::default();
    };

    // Spreadsheet exports often carry a time component
    let date_str = raw.trim().split(' ').next().unwrap_or_default();
    if date_str.is_empty() {
        return DateParts::default();
    }

    let parts: Vec<&str> = match Regex::new(r"[-/]") {
        Ok(separator) => separator.split(date_str).collect(),
        Err(_) => Vec::new(),
    };

    for format in DATE_FORMATS {
        // chrono's %Y takes short years too; only a written four digit year counts
        let year_at = if format.starts_with("%Y") { 0 } else { 2 };
        let four_digit_year = parts
            .get(year_at)
            .is_some_and(|year| year.len() == 4 && year.chars().all(|c| c.is_ascii_digit()));
        if !four_digit_year {
            continue;
        }

        if let Ok(date) = NaiveDate::parse_from_str(date_str, format) {
            return DateParts {
                day: date.format("%d").to_string(),
                month: date.format("%m").to_string(),
                year: date.format("%Y").to_string(),
            };
        }
    }

    if let [day, month, year] = parts.as_slice() {
        return DateParts {
            day: day.to_string(),
            month: month.to_string(),
            year: year.to_string(),
        };
    }

    DateParts::default()
}

/// Canonicalise a phone number cell to the domestic form.
pub fn normalize_phone(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return String::new();
    };

    // Numeric cells come back as "912345678.0"
    let phone = raw.trim();
    let phone = phone.strip_suffix(".0").unwrap_or(phone).trim();
    let international = phone.strip_prefix('+').unwrap_or(phone);

    match international.strip_prefix("84") {
        Some(rest) => format!("0{}", rest),
        None => phone.to_string(),
    }
}

/// One normalized data row, keyed by logical field key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    values: BTreeMap<String, String>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Value for `key`, empty when absent
    pub fn value(&self, key: &str) -> &str {
        self.get(key).unwrap_or_default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Name used in logs and reports
    pub fn display_name(&self, fallback: &str) -> String {
        match self.get(keys::FULL_NAME).map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => fallback.to_string(),
        }
    }

    /// Build a record from a raw dataset row.
    ///
    /// `column_mapping` maps logical keys to dataset columns. Slot keys are never read from
    /// the row; the date of birth column is looked up under `day` or `date_of_birth` and
    /// decomposed into its three parts.
    pub fn from_row(
        row: &HashMap<String, Option<String>>,
        column_mapping: &BTreeMap<String, Option<String>>,
    ) -> Self {
        let mut record = Record::new();
        let cell = |column: &str| row.get(column).and_then(|value| value.as_deref());

        for (key, column) in column_mapping {
            let Some(column) = column.as_deref() else {
                continue;
            };
            if keys::is_slot(key)
                || matches!(key.as_str(), keys::DAY | keys::MONTH | keys::YEAR | keys::DATE_OF_BIRTH)
                || !row.contains_key(column)
            {
                continue;
            }

            let value = match key.as_str() {
                keys::PHONE_NUMBER => normalize_phone(cell(column)),
                _ => cell(column).map(str::trim).unwrap_or_default().to_string(),
            };
            record.insert(key.clone(), value);
        }

        let birth_column = [keys::DAY, keys::DATE_OF_BIRTH]
            .iter()
            .find_map(|key| column_mapping.get(*key).and_then(|c| c.as_deref()));

        if let Some(column) = birth_column {
            if row.contains_key(column) {
                let parts = normalize_date(cell(column));
                record.insert(keys::DAY, parts.day);
                record.insert(keys::MONTH, parts.month);
                record.insert(keys::YEAR, parts.year);
            }
        }

        record
    }
}

/// Column mapping used when none is supplied: every column named like a logical key maps to itself
pub fn identity_column_mapping(columns: &[String]) -> BTreeMap<String, Option<String>> {
    columns
        .iter()
        .filter(|column| !keys::is_slot(column))
        .map(|column| (column.clone(), Some(column.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(day: &str, month: &str, year: &str) -> DateParts {
        DateParts {
            day: day.to_string(),
            month: month.to_string(),
            year: year.to_string(),
        }
    }

    #[test]
    fn test_normalize_date() {
        assert_eq!(normalize_date(None), DateParts::default());
        assert_eq!(normalize_date(Some("")), DateParts::default());
        assert_eq!(normalize_date(Some("15/03/2024")), parts("15", "03", "2024"));
        assert_eq!(normalize_date(Some("2024-03-15")), parts("15", "03", "2024"));
        assert_eq!(normalize_date(Some("15-03-2024")), parts("15", "03", "2024"));
        assert_eq!(normalize_date(Some("2024-03-15 00:00:00")), parts("15", "03", "2024"));
        assert_eq!(normalize_date(Some("5/3/2024")), parts("05", "03", "2024"));
        assert_eq!(normalize_date(Some("a-b-c")), parts("a", "b", "c"));
        assert_eq!(normalize_date(Some("05/03/90")), parts("05", "03", "90"));
        assert_eq!(normalize_date(Some("90-03-05")), parts("90", "03", "05"));
        assert_eq!(normalize_date(Some("not a date")), DateParts::default());
        assert_eq!(normalize_date(Some("1/2")), DateParts::default());
    }

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone(Some("84912345678")), "0912345678");
        assert_eq!(normalize_phone(Some("+84912345678")), "0912345678");
        assert_eq!(normalize_phone(Some("0912345678.0")), "0912345678");
        assert_eq!(normalize_phone(Some("  0912345678 ")), "0912345678");
        assert_eq!(normalize_phone(None), "");
    }

    #[test]
    fn test_normalization_is_idempotent() {
        for raw in ["15/03/2024", "2024-03-15", "a-b-c", ""] {
            let once = normalize_date(Some(raw));
            let joined = format!("{}/{}/{}", once.day, once.month, once.year);
            let twice = normalize_date(Some(&joined));
            if once != DateParts::default() {
                assert_eq!(once, twice, "date {raw} regressed");
            }
        }

        for raw in ["84912345678", "0912345678.0", "0912345678"] {
            let once = normalize_phone(Some(raw));
            assert_eq!(normalize_phone(Some(&once)), once);
        }
    }

    #[test]
    fn test_record_from_row() {
        let row: HashMap<String, Option<String>> = [
            ("Ho ten", Some("Nguyen Van A")),
            ("Ngay sinh", Some("2001-07-09")),
            ("SDT", Some("84987654321")),
            ("Email", None),
            ("Ngay ban", Some("20/10/2026")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
        .collect();

        let mapping: BTreeMap<String, Option<String>> = [
            ("full_name", Some("Ho ten")),
            ("day", Some("Ngay sinh")),
            ("phone_number", Some("SDT")),
            ("email", Some("Email")),
            ("id_card", None),
            ("sales_date", Some("Ngay ban")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
        .collect();

        let record = Record::from_row(&row, &mapping);

        assert_eq!(record.value("full_name"), "Nguyen Van A");
        assert_eq!(record.value("day"), "09");
        assert_eq!(record.value("month"), "07");
        assert_eq!(record.value("year"), "2001");
        assert_eq!(record.value("phone_number"), "0987654321");
        assert_eq!(record.get("email"), Some(""));
        assert_eq!(record.get("id_card"), None);
        assert_eq!(record.get("sales_date"), None);
        assert_eq!(Record::from_row(&row, &mapping), record);
    }

    #[test]
    fn test_identity_mapping_skips_slots() {
        let columns = vec!["full_name".to_string(), "session".to_string()];
        let mapping = identity_column_mapping(&columns);
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping["full_name"].as_deref(), Some("full_name"));
    }
}
