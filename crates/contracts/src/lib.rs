use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub mod forms;

pub const CANDIDATES: &str = "candidates";
pub const POLITICAL_PARTIES: &str = "political_parties";
pub const LOCATIONS: &str = "locations";
pub const SURVEYS: &str = "surveys";
pub const SURVEY_RESULTS: &str = "survey_results";
pub const POLLSTERS: &str = "pollsters";

pub const COLLECTIONS: [&str; 6] = [
    CANDIDATES,
    POLITICAL_PARTIES,
    LOCATIONS,
    SURVEYS,
    SURVEY_RESULTS,
    POLLSTERS,
];

pub fn is_known_collection(collection_id: &str) -> bool {
    COLLECTIONS.contains(&collection_id)
}

/// Reads `null` the same as a missing key. The backend sends `null` for
/// attributes that were never set.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Metadata the document store attaches to every record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMeta {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(rename = "$createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(rename = "$updatedAt", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(
        rename = "$permissions",
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(flatten)]
    pub meta: DocumentMeta,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub target_position: String,
    /// INE code of the constituency.
    #[serde(default, deserialize_with = "null_as_default")]
    pub location: String,
    /// `$id` of the party.
    #[serde(default, deserialize_with = "null_as_default")]
    pub political_party: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foto: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoliticalParty {
    #[serde(flatten)]
    pub meta: DocumentMeta,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub initials: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub hex_colors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(flatten)]
    pub meta: DocumentMeta,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "INE_code", default, deserialize_with = "null_as_default")]
    pub ine_code: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Polygon rings, multi-polygon, GeoJSON geometry, or any of those as a JSON string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Value>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub geo_keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pollster {
    #[serde(flatten)]
    pub meta: DocumentMeta,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub hex_colors: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub oep_registered: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Survey {
    #[serde(flatten)]
    pub meta: DocumentMeta,
    /// `$id` of the pollster.
    #[serde(default, deserialize_with = "null_as_default")]
    pub pollster: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub publication_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technical_sheet_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub margin_error_declared: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Administrative level encoded by the length of an INE code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationLevel {
    Department,
    Province,
    Municipality,
}

impl LocationLevel {
    pub const ALL: [LocationLevel; 3] = [
        LocationLevel::Department,
        LocationLevel::Province,
        LocationLevel::Municipality,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LocationLevel::Department => "department",
            LocationLevel::Province => "province",
            LocationLevel::Municipality => "municipality",
        }
    }

    /// Number of leading code characters that identify this level.
    pub fn code_len(self) -> usize {
        match self {
            LocationLevel::Department => 2,
            LocationLevel::Province => 4,
            LocationLevel::Municipality => 6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_keeps_metadata_and_unknown_fields() {
        let candidate: Candidate = serde_json::from_value(serde_json::json!({
            "$id": "cand_1",
            "$createdAt": "2026-01-10T12:00:00.000+00:00",
            "$permissions": ["read(\"any\")"],
            "name": "Ana Quispe",
            "target_position": "alcalde",
            "location": "040101",
            "political_party": "party_1",
            "website": "https://ana.example"
        }))
        .expect("candidate should decode");

        assert_eq!(candidate.meta.id, "cand_1");
        assert_eq!(candidate.meta.permissions.len(), 1);
        assert_eq!(candidate.location, "040101");
        assert_eq!(
            candidate.extra.get("website").and_then(|v| v.as_str()),
            Some("https://ana.example")
        );
        assert!(!candidate.extra.contains_key("$id"));
        assert!(!candidate.extra.contains_key("name"));
    }

    #[test]
    fn location_reads_ine_code_and_type() {
        let location: Location = serde_json::from_value(serde_json::json!({
            "$id": "loc_1",
            "name": "Cercado",
            "INE_code": "0401",
            "type": "provincia"
        }))
        .expect("location should decode");

        assert_eq!(location.ine_code, "0401");
        assert_eq!(location.kind.as_deref(), Some("provincia"));
        assert!(location.geometry.is_none());

        let encoded = serde_json::to_value(&location).expect("location should encode");
        assert_eq!(encoded.get("INE_code").and_then(|v| v.as_str()), Some("0401"));
    }

    #[test]
    fn missing_optional_fields_fall_back_to_defaults() {
        let survey: Survey = serde_json::from_value(serde_json::json!({ "$id": "s1" }))
            .expect("sparse survey should decode");
        assert_eq!(survey.pollster, "");
        assert!(survey.sample_size.is_none());
    }

    #[test]
    fn null_attributes_read_as_defaults() {
        let location: Location = serde_json::from_value(serde_json::json!({
            "$id": "loc_1",
            "$permissions": null,
            "name": null,
            "INE_code": "04",
            "geo_keywords": null,
            "geometry": null
        }))
        .expect("location with null attributes should decode");
        assert_eq!(location.name, "");
        assert!(location.geo_keywords.is_empty());
        assert!(location.geometry.is_none());

        let candidate: Candidate = serde_json::from_value(serde_json::json!({
            "$id": "cand_1",
            "name": "Ana Quispe",
            "location": null,
            "political_party": null
        }))
        .expect("candidate with null relations should decode");
        assert_eq!(candidate.location, "");

        let party: PoliticalParty = serde_json::from_value(serde_json::json!({
            "$id": "p1",
            "initials": "FN",
            "hex_colors": null
        }))
        .expect("party with null colors should decode");
        assert!(party.hex_colors.is_empty());

        let pollster: Pollster = serde_json::from_value(serde_json::json!({
            "$id": "po1",
            "oep_registered": null
        }))
        .expect("pollster with null flag should decode");
        assert!(!pollster.oep_registered);
    }

    #[test]
    fn one_sparse_record_does_not_fail_the_list() {
        let candidates: Vec<Candidate> = serde_json::from_value(serde_json::json!([
            {"$id": "c1", "name": "Ana Quispe"},
            {"$id": "c2", "name": null, "target_position": null}
        ]))
        .expect("list should decode");
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[1].name, "");
    }

    #[test]
    fn location_level_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(LocationLevel::Municipality).unwrap(),
            serde_json::json!("municipality")
        );
        assert_eq!(LocationLevel::Province.code_len(), 4);
    }
}
