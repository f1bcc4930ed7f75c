use serde_json::Value;

use super::types::GeoCriteria;
use crate::errors::DbError;
use crate::utils::json::{as_f64, type_name};

const RADIUS_KEY: &str = "radius";

/// Reads `{<attr>: [lat, lon] | "lat,lon", radius: n}`. The radius sign is
/// dropped.
///
/// # Errors
/// Returns `InvalidGeo` unless the input has a numeric radius and exactly one
/// other key holding a coordinate pair.
pub fn parse_distance_criteria(v: &Value) -> Result<GeoCriteria, DbError> {
    let obj = v.as_object().ok_or_else(|| {
        DbError::InvalidGeo(format!("distance criteria must be an object, got {}", type_name(v)))
    })?;
    let radius = obj
        .get(RADIUS_KEY)
        .and_then(as_f64)
        .ok_or_else(|| DbError::InvalidGeo("`radius` must be a number".into()))?
        .abs();
    let mut attrs = obj.iter().filter(|(k, _)| k.as_str() != RADIUS_KEY);
    let (Some((attr, coords)), None) = (attrs.next(), attrs.next()) else {
        return Err(DbError::InvalidGeo("expected exactly one coordinate attribute besides `radius`".into()));
    };
    let (latitude, longitude) = coordinate_pair(coords)
        .ok_or_else(|| DbError::InvalidGeo(format!("`{attr}` must be a [lat, lon] pair, got {coords}")))?;
    Ok(GeoCriteria {
        attr_name: attr.clone(),
        radius,
        latitude,
        longitude,
        coordinates: format!("{latitude}, {longitude}"),
    })
}

fn coordinate_pair(v: &Value) -> Option<(f64, f64)> {
    match v {
        Value::Array(items) => match items.as_slice() {
            [lat, lon] => Some((as_f64(lat)?, as_f64(lon)?)),
            _ => None,
        },
        Value::String(s) => {
            let (lat, lon) = s.split_once(',')?;
            let lat = lat.trim().parse::<f64>().ok().filter(|f| f.is_finite())?;
            let lon = lon.trim().parse::<f64>().ok().filter(|f| f.is_finite())?;
            Some((lat, lon))
        }
        _ => None,
    }
}

impl GeoCriteria {
    /// `WITHIN(<collection>, lat, lon, radius)` for a geo-indexed collection.
    #[must_use]
    pub fn within_expr(&self, collection: &str) -> String {
        format!("WITHIN({collection}, {}, {})", self.coordinates, self.radius)
    }
}

/// Normalises an edge-collection list (array of names or a comma-separated
/// string) into `"a, b"`.
///
/// # Errors
/// Returns `InvalidCriteria` for other shapes or an empty list.
pub fn parse_edge_collections(v: &Value) -> Result<String, DbError> {
    let names: Vec<String> = match v {
        Value::String(s) => s.split(',').map(|p| p.trim().to_string()).collect(),
        Value::Array(items) => items
            .iter()
            .map(|i| {
                i.as_str().map(|s| s.trim().to_string()).ok_or_else(|| {
                    DbError::InvalidCriteria(format!("edge collection names must be strings, got {}", type_name(i)))
                })
            })
            .collect::<Result<_, _>>()?,
        other => {
            return Err(DbError::InvalidCriteria(format!(
                "edge collections must be a string or array, got {}",
                type_name(other)
            )));
        }
    };
    let names: Vec<String> = names.into_iter().filter(|n| !n.is_empty()).collect();
    if names.is_empty() {
        return Err(DbError::InvalidCriteria("edge collection list is empty".into()));
    }
    Ok(names.join(", "))
}
