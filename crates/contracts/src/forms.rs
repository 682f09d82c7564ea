use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{CANDIDATES, LOCATIONS, POLITICAL_PARTIES, POLLSTERS, SURVEY_RESULTS, SURVEYS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Textarea,
    Number,
    Float,
    Email,
    Date,
    Boolean,
    Select,
    Relation,
    Image,
    ColorPicker,
    Url,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SelectOption {
    pub value: &'static str,
    pub label: &'static str,
}

fn is_empty_slice<T>(items: &&[T]) -> bool {
    items.is_empty()
}

const fn opt(value: &'static str, label: &'static str) -> SelectOption {
    SelectOption { value, label }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FormField {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub label: &'static str,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<&'static str>,
    #[serde(skip_serializing_if = "is_empty_slice")]
    pub options: &'static [SelectOption],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation_collection: Option<&'static str>,
    pub multiple: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'static str>,
}

impl FormField {
    const fn new(name: &'static str, field_type: FieldType, label: &'static str) -> Self {
        Self {
            name,
            field_type,
            label,
            required: false,
            placeholder: None,
            options: &[],
            relation_collection: None,
            multiple: false,
            min: None,
            max: None,
            description: None,
        }
    }

    const fn required(self) -> Self {
        Self {
            required: true,
            ..self
        }
    }

    const fn placeholder(self, placeholder: &'static str) -> Self {
        Self {
            placeholder: Some(placeholder),
            ..self
        }
    }

    const fn options(self, options: &'static [SelectOption]) -> Self {
        Self { options, ..self }
    }

    const fn relation(self, collection: &'static str) -> Self {
        Self {
            relation_collection: Some(collection),
            ..self
        }
    }

    const fn multiple(self) -> Self {
        Self {
            multiple: true,
            ..self
        }
    }

    const fn min(self, min: f64) -> Self {
        Self {
            min: Some(min),
            ..self
        }
    }

    const fn max(self, max: f64) -> Self {
        Self {
            max: Some(max),
            ..self
        }
    }

    const fn describe(self, description: &'static str) -> Self {
        Self {
            description: Some(description),
            ..self
        }
    }
}

/// Rows created after the parent document, linked back through `parent_field`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SubForm {
    pub collection_id: &'static str,
    pub parent_field: &'static str,
    pub fields: &'static [FormField],
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FormConfig {
    pub id: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub collection_id: &'static str,
    pub fields: &'static [FormField],
    #[serde(skip_serializing_if = "is_empty_slice")]
    pub subforms: &'static [SubForm],
}

use FieldType::*;

const CANDIDATE_FIELDS: &[FormField] = &[
    FormField::new("name", Text, "Nombre Completo")
        .required()
        .placeholder("Juan Pérez García"),
    FormField::new("political_party", Relation, "Partido Político")
        .required()
        .relation(POLITICAL_PARTIES),
    FormField::new("target_position", Select, "Cargo al que aspira")
        .required()
        .options(&[
            opt("gobernador", "Gobernador"),
            opt("alcalde", "Alcalde"),
            opt("asambleista", "Asambleísta"),
            opt("consejal", "Consejal"),
        ]),
    FormField::new("location", Relation, "Ubicación")
        .required()
        .relation(LOCATIONS),
    FormField::new("foto", Image, "Foto del Candidato"),
    FormField::new("description", Textarea, "Biografía")
        .placeholder("Breve descripción del candidato..."),
    FormField::new("website", Url, "Sitio Web").placeholder("https://ejemplo.com"),
    FormField::new("email", Email, "Email de Contacto").placeholder("candidato@ejemplo.com"),
    FormField::new("phone", Text, "Teléfono").placeholder("+591 7xxxxxxx"),
    FormField::new("birth_date", Date, "Fecha de Nacimiento"),
];

const PARTY_FIELDS: &[FormField] = &[
    FormField::new("name", Text, "Nombre del Partido")
        .required()
        .placeholder("Movimiento Al Socialismo"),
    FormField::new("initials", Text, "Sigla")
        .required()
        .placeholder("MAS"),
    FormField::new("logo", Image, "Logo del Partido"),
    FormField::new("hex_colors", ColorPicker, "Colores del Partido")
        .multiple()
        .describe("Selecciona hasta 3 colores representativos"),
    FormField::new("founded_year", Number, "Año de Fundación").min(1800.0),
    FormField::new("website", Url, "Sitio Web Oficial").placeholder("https://partido.bo"),
    FormField::new("description", Textarea, "Descripción")
        .placeholder("Historia y descripción del partido..."),
    FormField::new("ideology", Select, "Ideología").options(&[
        opt("izquierda", "Izquierda"),
        opt("centro-izquierda", "Centro Izquierda"),
        opt("centro", "Centro"),
        opt("centro-derecha", "Centro Derecha"),
        opt("derecha", "Derecha"),
    ]),
];

const SURVEY_FIELDS: &[FormField] = &[
    FormField::new("title", Text, "Título de la Encuesta")
        .required()
        .placeholder("Encuesta CIE Febrero 2026"),
    FormField::new("pollster", Relation, "Encuestadora")
        .required()
        .relation(POLLSTERS),
    FormField::new("publication_date", Date, "Fecha de Publicación").required(),
    FormField::new("survey_date_start", Date, "Fecha de Inicio del Trabajo de Campo").required(),
    FormField::new("survey_date_end", Date, "Fecha de Fin del Trabajo de Campo").required(),
    FormField::new("sample_size", Number, "Tamaño de Muestra")
        .required()
        .min(1.0),
    FormField::new("margin_error_declared", Float, "Margen de Error Declarado (%)")
        .required()
        .min(0.0)
        .max(100.0)
        .describe("Porcentaje (ej: 3.5 para 3.5%)"),
    FormField::new("technical_sheet_url", Url, "URL de Ficha Técnica")
        .placeholder("https://ejemplo.com/ficha-tecnica.pdf"),
];

const SURVEY_RESULT_FIELDS: &[FormField] = &[
    FormField::new("candidate", Relation, "Candidato")
        .required()
        .relation(CANDIDATES),
    FormField::new("percentage", Float, "Porcentaje (%)")
        .required()
        .min(0.0)
        .max(100.0),
    FormField::new("votes", Number, "Votos Absolutos").min(0.0),
    FormField::new("ranking", Number, "Posición").required().min(1.0),
    FormField::new("trend", Select, "Tendencia").options(&[
        opt("up", "↗ Subiendo"),
        opt("down", "↘ Bajando"),
        opt("stable", "→ Estable"),
    ]),
];

const LOCATION_FIELDS: &[FormField] = &[
    FormField::new("name", Text, "Nombre de la Ubicación")
        .required()
        .placeholder("La Paz"),
    FormField::new("type", Select, "Tipo de Ubicación")
        .required()
        .options(&[
            opt("pais", "País"),
            opt("departamento", "Departamento"),
            opt("provincia", "Provincia"),
            opt("distrito", "Distrito"),
            opt("municipio", "Municipio"),
        ]),
    FormField::new("parent_location", Relation, "Ubicación Padre")
        .relation(LOCATIONS)
        .describe("La ubicación de nivel superior (ej: departamento para una provincia)"),
    FormField::new("latitude", Float, "Latitud").min(-90.0).max(90.0),
    FormField::new("longitude", Float, "Longitud").min(-180.0).max(180.0),
    FormField::new("population", Number, "Población").min(0.0),
];

pub static FORM_CONFIGS: &[FormConfig] = &[
    FormConfig {
        id: "candidates",
        title: "Registrar Candidato",
        description: "Agregar un nuevo candidato electoral",
        collection_id: CANDIDATES,
        fields: CANDIDATE_FIELDS,
        subforms: &[],
    },
    FormConfig {
        id: "political_parties",
        title: "Registrar Partido Político",
        description: "Agregar un nuevo partido político",
        collection_id: POLITICAL_PARTIES,
        fields: PARTY_FIELDS,
        subforms: &[],
    },
    FormConfig {
        id: "surveys",
        title: "Registrar Encuesta",
        description: "Agregar una nueva encuesta electoral",
        collection_id: SURVEYS,
        fields: SURVEY_FIELDS,
        subforms: &[SubForm {
            collection_id: SURVEY_RESULTS,
            parent_field: "survey",
            fields: SURVEY_RESULT_FIELDS,
        }],
    },
    FormConfig {
        id: "locations",
        title: "Registrar Ubicación",
        description: "Agregar una nueva ubicación geográfica",
        collection_id: LOCATIONS,
        fields: LOCATION_FIELDS,
        subforms: &[],
    },
];

pub fn form_by_id(id: &str) -> Option<&'static FormConfig> {
    FORM_CONFIGS.iter().find(|form| form.id == id)
}

pub fn all_forms() -> &'static [FormConfig] {
    FORM_CONFIGS
}

/// Field key → message. Sub-form rows use `"{collection}[{row}].{field}"`.
pub type FieldErrors = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormSubmission {
    pub data: Map<String, Value>,
    /// Sub-form rows keyed by sub-form collection id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub subforms: BTreeMap<String, Vec<Map<String, Value>>>,
}

impl FormConfig {
    pub fn validate(&self, submission: &FormSubmission) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        validate_fields(self.fields, &submission.data, "", &mut errors);

        for subform in self.subforms {
            let Some(rows) = submission.subforms.get(subform.collection_id) else {
                continue;
            };
            for (idx, row) in rows.iter().enumerate() {
                let prefix = format!("{}[{}].", subform.collection_id, idx);
                validate_fields(subform.fields, row, &prefix, &mut errors);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Drops keys that are not declared fields of this form.
    pub fn retain_declared(&self, data: &Map<String, Value>) -> Map<String, Value> {
        retain_fields(self.fields, data)
    }
}

impl SubForm {
    pub fn retain_declared(&self, data: &Map<String, Value>) -> Map<String, Value> {
        retain_fields(self.fields, data)
    }
}

fn retain_fields(fields: &[FormField], data: &Map<String, Value>) -> Map<String, Value> {
    data.iter()
        .filter(|(key, value)| {
            !is_missing(Some(value)) && fields.iter().any(|field| field.name == key.as_str())
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

pub fn validate_fields(
    fields: &[FormField],
    data: &Map<String, Value>,
    key_prefix: &str,
    errors: &mut FieldErrors,
) {
    for field in fields {
        let value = data.get(field.name);
        let message = if is_missing(value) {
            field
                .required
                .then(|| format!("{} es requerido", field.label))
        } else {
            value.and_then(|value| check_value(field, value))
        };

        if let Some(message) = message {
            errors.insert(format!("{}{}", key_prefix, field.name), message);
        }
    }
}

pub fn is_missing(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(obj)) => obj.is_empty(),
        Some(Value::Bool(_)) | Some(Value::Number(_)) => false,
    }
}

fn check_value(field: &FormField, value: &Value) -> Option<String> {
    match field.field_type {
        Number | Float => {
            let Some(n) = as_number(value) else {
                return Some(format!("{} debe ser un número", field.label));
            };
            if field.field_type == Number && n.fract() != 0.0 {
                return Some(format!("{} debe ser un número entero", field.label));
            }
            if let Some(min) = field.min
                && n < min
            {
                return Some(format!("{} debe ser mayor o igual a {}", field.label, min));
            }
            if let Some(max) = field.max
                && n > max
            {
                return Some(format!("{} debe ser menor o igual a {}", field.label, max));
            }
            None
        }
        Select if !field.options.is_empty() => {
            let valid = value
                .as_str()
                .is_some_and(|v| field.options.iter().any(|o| o.value == v));
            (!valid).then(|| format!("{} no es una opción válida", field.label))
        }
        Url => {
            let valid = value
                .as_str()
                .map(str::trim)
                .is_some_and(|v| v.starts_with("https://") || v.starts_with("http://"));
            (!valid).then(|| format!("{} debe ser una URL válida", field.label))
        }
        Email => {
            let valid = value.as_str().map(str::trim).is_some_and(|v| {
                v.split_once('@')
                    .is_some_and(|(user, domain)| !user.is_empty() && domain.contains('.'))
            });
            (!valid).then(|| format!("{} debe ser un email válido", field.label))
        }
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(data: Value) -> FormSubmission {
        FormSubmission {
            data: data.as_object().cloned().expect("test data must be an object"),
            subforms: BTreeMap::new(),
        }
    }

    #[test]
    fn catalogue_exposes_four_forms() {
        let ids = all_forms().iter().map(|f| f.id).collect::<Vec<_>>();
        assert_eq!(
            ids,
            vec!["candidates", "political_parties", "surveys", "locations"]
        );
        assert!(form_by_id("missing").is_none());
    }

    #[test]
    fn survey_pollster_relation_points_at_pollsters() {
        let survey = form_by_id("surveys").unwrap();
        let pollster = survey.fields.iter().find(|f| f.name == "pollster").unwrap();
        assert_eq!(pollster.relation_collection, Some(POLLSTERS));
    }

    #[test]
    fn one_error_per_missing_required_field() {
        let form = form_by_id("candidates").unwrap();
        let errors = form
            .validate(&submission(serde_json::json!({
                "name": "Ana Quispe",
                "political_party": "  ",
            })))
            .unwrap_err();

        assert_eq!(errors.len(), 3);
        assert_eq!(
            errors.get("political_party").map(String::as_str),
            Some("Partido Político es requerido")
        );
        assert!(errors.contains_key("target_position"));
        assert!(errors.contains_key("location"));
        assert!(!errors.contains_key("name"));
        assert!(!errors.contains_key("foto"));
    }

    #[test]
    fn zero_and_false_count_as_answers() {
        assert!(!is_missing(Some(&serde_json::json!(0))));
        assert!(!is_missing(Some(&serde_json::json!(false))));
        assert!(is_missing(Some(&serde_json::json!(null))));
        assert!(is_missing(Some(&serde_json::json!([]))));
        assert!(is_missing(Some(&serde_json::json!(" "))));
    }

    #[test]
    fn complete_candidate_passes() {
        let form = form_by_id("candidates").unwrap();
        form.validate(&submission(serde_json::json!({
            "name": "Ana Quispe",
            "political_party": "party_1",
            "target_position": "alcalde",
            "location": "040101",
            "website": "https://ana.example",
        })))
        .expect("complete candidate should validate");
    }

    #[test]
    fn present_fields_are_checked_for_shape() {
        let form = form_by_id("surveys").unwrap();
        let errors = form
            .validate(&submission(serde_json::json!({
                "title": "Encuesta",
                "pollster": "p1",
                "publication_date": "2026-02-01",
                "survey_date_start": "2026-01-20",
                "survey_date_end": "2026-01-25",
                "sample_size": "1200.5",
                "margin_error_declared": 140,
                "technical_sheet_url": "ftp://nope",
            })))
            .unwrap_err();

        assert_eq!(errors.len(), 3);
        assert!(errors["sample_size"].contains("entero"));
        assert!(errors["margin_error_declared"].contains("menor o igual"));
        assert!(errors["technical_sheet_url"].contains("URL"));
    }

    #[test]
    fn subform_rows_are_validated_with_prefixed_keys() {
        let form = form_by_id("surveys").unwrap();
        let mut sub = submission(serde_json::json!({
            "title": "Encuesta",
            "pollster": "p1",
            "publication_date": "2026-02-01",
            "survey_date_start": "2026-01-20",
            "survey_date_end": "2026-01-25",
            "sample_size": 1200,
            "margin_error_declared": 3.5,
        }));
        sub.subforms.insert(
            SURVEY_RESULTS.to_string(),
            vec![
                serde_json::json!({"candidate": "c1", "percentage": 31.2, "ranking": 1})
                    .as_object()
                    .cloned()
                    .unwrap(),
                serde_json::json!({"percentage": 20, "trend": "sideways"})
                    .as_object()
                    .cloned()
                    .unwrap(),
            ],
        );

        let errors = form.validate(&sub).unwrap_err();
        assert_eq!(
            errors.keys().cloned().collect::<Vec<_>>(),
            vec![
                "survey_results[1].candidate".to_string(),
                "survey_results[1].ranking".to_string(),
                "survey_results[1].trend".to_string(),
            ]
        );
    }

    #[test]
    fn retain_declared_drops_unknown_and_blank_keys() {
        let form = form_by_id("political_parties").unwrap();
        let data = serde_json::json!({
            "name": "Frente",
            "initials": "FR",
            "website": "",
            "created_by": "spoofed",
        });
        let kept = form.retain_declared(data.as_object().unwrap());
        assert_eq!(kept.len(), 2);
        assert!(!kept.contains_key("created_by"));
    }
}
