use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use std::collections::HashSet;
use validator::Validate;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct City {
    pub id: i64,
    pub name: String,
    pub region: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CityInput {
    #[validate(length(min = 1, max = 120, message = "name is required"))]
    pub name: String,
    #[serde(default)]
    #[validate(length(max = 120))]
    pub region: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl CityInput {
    pub fn normalized(mut self) -> Self {
        self.name = self.name.trim().to_string();
        self.region = self.region.trim().to_string();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedEntry {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: Vec<SkippedEntry>,
}

/// Splits an import payload into valid entries and rejected ones.
///
/// The payload is either a JSON array of cities or an object with a
/// `cities` array. Names are compared case-insensitively; a repeated name
/// in the same payload is skipped.
pub fn prepare_import(payload: Value) -> Result<(Vec<CityInput>, Vec<SkippedEntry>), String> {
    let entries = match payload {
        Value::Array(entries) => entries,
        Value::Object(mut map) => match map.remove("cities") {
            Some(Value::Array(entries)) => entries,
            _ => return Err("expected an array of cities or an object with a 'cities' array".to_string()),
        },
        _ => return Err("expected an array of cities or an object with a 'cities' array".to_string()),
    };

    let mut seen = HashSet::new();
    let mut valid = Vec::new();
    let mut skipped = Vec::new();

    for (index, entry) in entries.into_iter().enumerate() {
        let input = match serde_json::from_value::<CityInput>(entry) {
            Ok(input) => input.normalized(),
            Err(e) => {
                skipped.push(SkippedEntry { index, reason: e.to_string() });
                continue;
            }
        };
        if let Err(e) = input.validate() {
            skipped.push(SkippedEntry { index, reason: e.to_string() });
            continue;
        }
        if !seen.insert(input.name.to_lowercase()) {
            skipped.push(SkippedEntry { index, reason: format!("duplicate name '{}' in import", input.name) });
            continue;
        }
        valid.push(input);
    }

    Ok((valid, skipped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_array_and_wrapped_payloads() {
        let (valid, skipped) = prepare_import(json!([{ "name": "Kochi", "region": "Kerala" }])).unwrap();
        assert_eq!(valid.len(), 1);
        assert!(skipped.is_empty());
        assert!(valid[0].is_active);

        let (valid, _) = prepare_import(json!({ "cities": [{ "name": "Alleppey" }] })).unwrap();
        assert_eq!(valid[0].name, "Alleppey");
        assert_eq!(valid[0].region, "");
    }

    #[test]
    fn rejects_non_list_payloads() {
        assert!(prepare_import(json!("Kochi")).is_err());
        assert!(prepare_import(json!({ "items": [] })).is_err());
    }

    #[test]
    fn skips_invalid_and_duplicate_entries() {
        let payload = json!([
            { "name": "  Kumarakom ", "region": "Kerala" },
            { "region": "no name" },
            { "name": "" },
            { "name": "KUMARAKOM" },
            { "name": "Munnar", "isActive": false }
        ]);
        let (valid, skipped) = prepare_import(payload).unwrap();

        let names: Vec<_> = valid.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Kumarakom", "Munnar"]);
        assert!(!valid[1].is_active);

        let indices: Vec<_> = skipped.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
    }
}
