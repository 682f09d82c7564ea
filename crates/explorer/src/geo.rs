use std::collections::HashMap;

use ::geo::{Coord, Intersects, LineString, MultiPolygon, Point, Polygon};
use civica_contracts::{Location, LocationLevel};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometryError {
    message: String,
}

impl GeometryError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for GeometryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for GeometryError {}

/// A boundary tagged with the location code it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub code: String,
    pub name: String,
    pub kind: Option<String>,
    pub shape: MultiPolygon<f64>,
}

impl Feature {
    /// Boundary points count as inside; points in holes do not.
    pub fn contains_point(&self, longitude: f64, latitude: f64) -> bool {
        self.shape.intersects(&Point::new(longitude, latitude))
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeatureCollection {
    features: Vec<Feature>,
    rejected: Vec<(String, GeometryError)>,
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            features,
            rejected: Vec::new(),
        }
    }

    /// Locations without geometry are skipped; unparsable ones are kept in
    /// [`FeatureCollection::rejected`].
    pub fn from_locations(locations: &[Location]) -> Self {
        let mut out = Self::default();
        for location in locations {
            let Some(raw) = location.geometry.as_ref() else {
                continue;
            };
            if location.ine_code.is_empty() {
                continue;
            }
            match parse_geometry(raw) {
                Ok(shape) => out.features.push(Feature {
                    code: location.ine_code.clone(),
                    name: location.name.clone(),
                    kind: location.kind.clone(),
                    shape,
                }),
                Err(err) => out.rejected.push((location.ine_code.clone(), err)),
            }
        }
        out
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn rejected(&self) -> &[(String, GeometryError)] {
        &self.rejected
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn find_feature_at_location(&self, longitude: f64, latitude: f64) -> Option<&Feature> {
        find_feature_at_location(&self.features, longitude, latitude)
    }
}

/// First feature in iteration order whose area contains the point.
pub fn find_feature_at_location(
    features: &[Feature],
    longitude: f64,
    latitude: f64,
) -> Option<&Feature> {
    if !longitude.is_finite() || !latitude.is_finite() {
        return None;
    }
    features
        .iter()
        .find(|feature| feature.contains_point(longitude, latitude))
}

/// Accepts polygon rings, a single ring, a multi-polygon, a GeoJSON geometry
/// or feature, or any of those serialized as a JSON string.
pub fn parse_geometry(raw: &Value) -> Result<MultiPolygon<f64>, GeometryError> {
    match raw {
        Value::String(encoded) => {
            let decoded: Value = serde_json::from_str(encoded)
                .map_err(|err| GeometryError::new(format!("geometry is not valid JSON: {}", err)))?;
            if decoded.is_string() {
                return Err(GeometryError::new("geometry is doubly encoded"));
            }
            parse_geometry(&decoded)
        }
        Value::Object(obj) => {
            if let Some(inner) = obj.get("geometry") {
                return parse_geometry(inner);
            }
            let coordinates = obj
                .get("coordinates")
                .ok_or_else(|| GeometryError::new("geometry object has no coordinates"))?;
            match obj.get("type").and_then(Value::as_str) {
                Some("Polygon") => polygon(coordinates).map(|p| MultiPolygon::new(vec![p])),
                Some("MultiPolygon") => multi_polygon(coordinates),
                Some(other) => Err(GeometryError::new(format!(
                    "unsupported geometry type `{}`",
                    other
                ))),
                None => parse_geometry(coordinates),
            }
        }
        Value::Array(_) => match nesting_depth(raw) {
            2 => ring(raw).map(|exterior| MultiPolygon::new(vec![Polygon::new(exterior, vec![])])),
            3 => polygon(raw).map(|p| MultiPolygon::new(vec![p])),
            4 => multi_polygon(raw),
            depth => Err(GeometryError::new(format!(
                "unexpected coordinate nesting depth {}",
                depth
            ))),
        },
        _ => Err(GeometryError::new("geometry must be an array, object or string")),
    }
}

/// Array levels above the first number: a position is 1, a ring 2.
fn nesting_depth(value: &Value) -> usize {
    let mut depth = 0;
    let mut cursor = value;
    while let Some(first) = cursor.as_array().and_then(|items| items.first()) {
        depth += 1;
        cursor = first;
    }
    depth
}

fn multi_polygon(value: &Value) -> Result<MultiPolygon<f64>, GeometryError> {
    let items = value
        .as_array()
        .ok_or_else(|| GeometryError::new("multipolygon must be an array"))?;
    let polygons = items.iter().map(polygon).collect::<Result<Vec<_>, _>>()?;
    if polygons.is_empty() {
        return Err(GeometryError::new("multipolygon has no polygons"));
    }
    Ok(MultiPolygon::new(polygons))
}

fn polygon(value: &Value) -> Result<Polygon<f64>, GeometryError> {
    let rings = value
        .as_array()
        .ok_or_else(|| GeometryError::new("polygon must be an array of rings"))?;
    let mut rings = rings.iter().map(ring);
    let exterior = rings
        .next()
        .ok_or_else(|| GeometryError::new("polygon has no exterior ring"))??;
    let interiors = rings.collect::<Result<Vec<_>, _>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn ring(value: &Value) -> Result<LineString<f64>, GeometryError> {
    let positions = value
        .as_array()
        .ok_or_else(|| GeometryError::new("ring must be an array of positions"))?;
    let coords = positions.iter().map(position).collect::<Result<Vec<_>, _>>()?;
    if coords.len() < 3 {
        return Err(GeometryError::new("ring needs at least 3 positions"));
    }
    Ok(LineString::new(coords))
}

fn position(value: &Value) -> Result<Coord<f64>, GeometryError> {
    let pair = value.as_array().filter(|items| items.len() >= 2);
    let coord = pair.and_then(|items| Some((items[0].as_f64()?, items[1].as_f64()?)));
    match coord {
        Some((x, y)) if x.is_finite() && y.is_finite() => Ok(Coord { x, y }),
        _ => Err(GeometryError::new("position must be [longitude, latitude]")),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HierarchyEntry {
    pub label: String,
    pub code: String,
    pub level: LocationLevel,
}

/// Department, province and municipality ancestors of `code`, top down.
///
/// A level is emitted only when its code is present in `code_to_label`.
pub fn get_location_hierarchy(
    code: &str,
    code_to_label: &HashMap<String, String>,
) -> Vec<HierarchyEntry> {
    let len = code.chars().count();
    let mut out = Vec::with_capacity(3);

    for level in LocationLevel::ALL {
        let want = level.code_len();
        if level != LocationLevel::Department && len < want {
            break;
        }
        let prefix = match level {
            LocationLevel::Municipality => code.to_string(),
            _ => code.chars().take(want).collect::<String>(),
        };
        if let Some(label) = code_to_label.get(&prefix) {
            out.push(HierarchyEntry {
                label: label.clone(),
                code: prefix,
                level,
            });
        }
    }

    out
}

/// INE code to display name for every location that has a code.
pub fn code_labels(locations: &[Location]) -> HashMap<String, String> {
    locations
        .iter()
        .filter(|location| !location.ine_code.is_empty())
        .map(|location| (location.ine_code.clone(), location.name.clone()))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Marker {
    pub longitude: f64,
    pub latitude: f64,
}

/// What a map shows for a point: the containing feature, if any, its
/// hierarchy and a marker at the point itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapSelection {
    pub code: Option<String>,
    pub name: Option<String>,
    /// Prefix that narrows the candidate list to the selected province.
    pub province_code: Option<String>,
    pub hierarchy: Vec<HierarchyEntry>,
    pub marker: Marker,
}

pub fn select_at(
    features: &FeatureCollection,
    code_to_label: &HashMap<String, String>,
    longitude: f64,
    latitude: f64,
) -> MapSelection {
    let feature = features.find_feature_at_location(longitude, latitude);
    MapSelection {
        code: feature.map(|f| f.code.clone()),
        name: feature.map(|f| f.name.clone()),
        province_code: feature.map(|f| province_prefix(&f.code).to_string()),
        hierarchy: feature
            .map(|f| get_location_hierarchy(&f.code, code_to_label))
            .unwrap_or_default(),
        marker: Marker {
            longitude,
            latitude,
        },
    }
}

/// Leading province-length part of `code`; shorter codes are returned whole.
pub fn province_prefix(code: &str) -> &str {
    let len = LocationLevel::Province.code_len();
    code.char_indices()
        .nth(len)
        .map_or(code, |(idx, _)| &code[..idx])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeolocationError {
    PermissionDenied,
    PositionUnavailable,
    Timeout,
    Unsupported,
    Unknown,
}

impl GeolocationError {
    /// Device error codes: 1 denied, 2 unavailable, 3 timeout.
    pub fn from_code(code: u16) -> Self {
        match code {
            1 => GeolocationError::PermissionDenied,
            2 => GeolocationError::PositionUnavailable,
            3 => GeolocationError::Timeout,
            _ => GeolocationError::Unknown,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            GeolocationError::PermissionDenied => "ERR_GEOLOCATION_DENIED",
            GeolocationError::PositionUnavailable => "ERR_GEOLOCATION_UNAVAILABLE",
            GeolocationError::Timeout => "ERR_GEOLOCATION_TIMEOUT",
            GeolocationError::Unsupported => "ERR_GEOLOCATION_UNSUPPORTED",
            GeolocationError::Unknown => "ERR_GEOLOCATION_UNKNOWN",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            GeolocationError::PermissionDenied => "Permiso de ubicación denegado",
            GeolocationError::PositionUnavailable => "Ubicación no disponible",
            GeolocationError::Timeout => "Tiempo de espera agotado",
            GeolocationError::Unsupported => "Tu navegador no soporta geolocalización",
            GeolocationError::Unknown => "Error al obtener ubicación",
        }
    }
}

impl std::fmt::Display for GeolocationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for GeolocationError {}
