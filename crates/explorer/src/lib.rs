use civica_contracts::{Candidate, DocumentMeta, Location, PoliticalParty, Pollster, Survey};
use serde_json::{Map, Value};

pub mod aggregate;
pub mod filter;
pub mod geo;

pub use aggregate::{CandidateView, CollectionLoad, ElectionSnapshot, Relation, SurveyView};
pub use filter::{FilterOp, FilterState};
pub use self::geo::{Feature, FeatureCollection, GeolocationError, HierarchyEntry};

/// Named-field access used by the filter engine.
///
/// Unknown names return `None`; the engine treats that as "no match" rather
/// than an error.
pub trait Record {
    fn field(&self, name: &str) -> Option<Value>;
}

impl Record for Map<String, Value> {
    fn field(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

impl Record for Value {
    fn field(&self, name: &str) -> Option<Value> {
        self.as_object().and_then(|obj| obj.get(name).cloned())
    }
}

impl<R: Record + ?Sized> Record for &R {
    fn field(&self, name: &str) -> Option<Value> {
        (**self).field(name)
    }
}

fn meta_field(meta: &DocumentMeta, name: &str) -> Option<Option<Value>> {
    let value = match name {
        "$id" => Some(Value::String(meta.id.clone())),
        "$createdAt" => meta.created_at.clone().map(Value::String),
        "$updatedAt" => meta.updated_at.clone().map(Value::String),
        "$permissions" => Some(Value::from(meta.permissions.clone())),
        _ => return None,
    };
    Some(value)
}

fn string(value: &str) -> Option<Value> {
    Some(Value::String(value.to_string()))
}

fn opt_string(value: &Option<String>) -> Option<Value> {
    value.as_deref().and_then(string)
}

fn strings(values: &[String]) -> Option<Value> {
    Some(Value::from(values.to_vec()))
}

impl Record for Candidate {
    fn field(&self, name: &str) -> Option<Value> {
        if let Some(value) = meta_field(&self.meta, name) {
            return value;
        }
        match name {
            "name" => string(&self.name),
            "target_position" => string(&self.target_position),
            "location" => string(&self.location),
            "political_party" => string(&self.political_party),
            "foto" => opt_string(&self.foto),
            "created_by" => opt_string(&self.created_by),
            other => self.extra.get(other).cloned(),
        }
    }
}

impl Record for PoliticalParty {
    fn field(&self, name: &str) -> Option<Value> {
        if let Some(value) = meta_field(&self.meta, name) {
            return value;
        }
        match name {
            "name" => string(&self.name),
            "initials" => string(&self.initials),
            "logo" => opt_string(&self.logo),
            "hex_colors" => strings(&self.hex_colors),
            "created_by" => opt_string(&self.created_by),
            other => self.extra.get(other).cloned(),
        }
    }
}

impl Record for Location {
    fn field(&self, name: &str) -> Option<Value> {
        if let Some(value) = meta_field(&self.meta, name) {
            return value;
        }
        match name {
            "name" => string(&self.name),
            "INE_code" => string(&self.ine_code),
            "type" => opt_string(&self.kind),
            "parent" => opt_string(&self.parent),
            "geometry" => self.geometry.clone(),
            "geo_keywords" => strings(&self.geo_keywords),
            "created_by" => opt_string(&self.created_by),
            other => self.extra.get(other).cloned(),
        }
    }
}

impl Record for Pollster {
    fn field(&self, name: &str) -> Option<Value> {
        if let Some(value) = meta_field(&self.meta, name) {
            return value;
        }
        match name {
            "name" => string(&self.name),
            "logo" => opt_string(&self.logo),
            "hex_colors" => strings(&self.hex_colors),
            "oep_registered" => Some(Value::Bool(self.oep_registered)),
            other => self.extra.get(other).cloned(),
        }
    }
}

impl Record for Survey {
    fn field(&self, name: &str) -> Option<Value> {
        if let Some(value) = meta_field(&self.meta, name) {
            return value;
        }
        match name {
            "pollster" => string(&self.pollster),
            "publication_date" => string(&self.publication_date),
            "sample_size" => self.sample_size.map(Value::from),
            "technical_sheet_url" => opt_string(&self.technical_sheet_url),
            "margin_error_declared" => self.margin_error_declared.map(Value::from),
            "title" => opt_string(&self.title),
            "created_by" => opt_string(&self.created_by),
            other => self.extra.get(other).cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_records_fall_back_to_extra_fields() {
        let candidate: Candidate = serde_json::from_value(serde_json::json!({
            "$id": "c1",
            "name": "Ana",
            "political_party": "p1",
            "email": "ana@example.com"
        }))
        .unwrap();

        assert_eq!(candidate.field("$id"), Some(Value::from("c1")));
        assert_eq!(candidate.field("political_party"), Some(Value::from("p1")));
        assert_eq!(
            candidate.field("email"),
            Some(Value::from("ana@example.com"))
        );
        assert_eq!(candidate.field("foto"), None);
        assert_eq!(candidate.field("no_such_field"), None);
    }

    #[test]
    fn location_exposes_wire_names() {
        let location: Location = serde_json::from_value(serde_json::json!({
            "$id": "l1",
            "name": "Cochabamba",
            "INE_code": "04",
            "type": "departamento"
        }))
        .unwrap();

        assert_eq!(location.field("INE_code"), Some(Value::from("04")));
        assert_eq!(location.field("type"), Some(Value::from("departamento")));
    }
}
