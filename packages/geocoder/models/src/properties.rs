//! Typed `carmen:*` feature properties.
//!
//! Index data arrives as loosely typed GeoJSON property bags. Everything the
//! engine reads is lifted into named fields here; any other key is kept in
//! [`FeatureProperties::extra`] and passed through to output untouched.
//!
//! Several properties accept more than one serialized shape (stringified
//! JSON arrays, comma-joined lists, bare scalars for single-line ranges).
//! They are normalized once, at parse time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Prefix shared by every engine-owned property key.
pub const CARMEN_PREFIX: &str = "carmen:";

/// Prefix of per-language text keys (`carmen:text_en`, `carmen:text_zh_Hant`).
pub const TEXT_PREFIX: &str = "carmen:text_";

/// Prefix of per-type context overrides (`override:region`).
pub const OVERRIDE_PREFIX: &str = "override:";

/// Label used for language-independent text (postcodes and the like).
pub const UNIVERSAL_LANGUAGE: &str = "universal";

/// Errors raised while lifting a raw property bag.
#[derive(Debug, Error)]
pub enum PropertiesError {
    /// A required key is missing.
    #[error("Feature has no {0}")]
    Missing(&'static str),

    /// A key is present but has the wrong shape.
    #[error("Invalid {key}: {message}")]
    Invalid {
        /// The offending property key.
        key: String,
        /// What was wrong with it.
        message: String,
    },
}

/// House-number range values for interpolation, nested per geometry in the
/// collection and then per line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeProperties {
    /// `carmen:rangetype`, e.g. `tiger`.
    pub range_type: String,
    /// `carmen:parityl`: `O`, `E`, `B` or empty per line.
    pub parity_left: Vec<Vec<Option<String>>>,
    /// `carmen:parityr`.
    pub parity_right: Vec<Vec<Option<String>>>,
    /// `carmen:lfromhn`.
    pub left_from: Vec<Vec<Option<String>>>,
    /// `carmen:ltohn`.
    pub left_to: Vec<Vec<Option<String>>>,
    /// `carmen:rfromhn`.
    pub right_from: Vec<Vec<Option<String>>>,
    /// `carmen:rtohn`.
    pub right_to: Vec<Vec<Option<String>>>,
}

impl RangeProperties {
    /// Pads every per-collection list to at least `len` entries.
    pub fn pad_to(&mut self, len: usize) {
        for list in [
            &mut self.parity_left,
            &mut self.parity_right,
            &mut self.left_from,
            &mut self.left_to,
            &mut self.right_from,
            &mut self.right_to,
        ] {
            if list.len() < len {
                list.resize_with(len, Vec::new);
            }
        }
    }
}

/// Typed feature properties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct FeatureProperties {
    /// `carmen:text`: comma-separated synonyms, display text first.
    pub text: String,
    /// `carmen:text_<lang>` keyed by language label (`-` folded to `_`).
    pub localized_text: BTreeMap<String, String>,
    /// `carmen:center` as `[lon, lat]`.
    pub center: Option<[f64; 2]>,
    /// `carmen:score`. Negative scores mark ghost features.
    pub score: Option<f64>,
    /// `carmen:types`. Empty means "the index type".
    pub types: Vec<String>,
    /// `carmen:zxy` tile covers as `z/x/y` strings.
    pub zxy: Vec<String>,
    /// `carmen:geocoder_stack`, usually a country code.
    pub geocoder_stack: Option<String>,
    /// `carmen:addressnumber`, one optional list per collection geometry.
    pub address_numbers: Option<Vec<Option<Vec<String>>>>,
    /// `carmen:address_style` (`standard` or `queens`).
    pub address_style: Option<String>,
    /// `carmen:address_styles`: styles the query number is matched with.
    pub address_styles: Vec<String>,
    /// `carmen:addressprops`: property name to per-point overrides.
    pub address_props: BTreeMap<String, BTreeMap<usize, Value>>,
    /// Interpolation ranges, when `carmen:rangetype` is set.
    pub ranges: Option<RangeProperties>,
    /// `carmen:routable_points`, passed through when routing is requested.
    pub routable_points: Option<Value>,
    /// Every non-engine property.
    pub extra: BTreeMap<String, Value>,
}

impl FeatureProperties {
    /// Builds properties from a display text with no other fields set.
    #[must_use]
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Every synonym of the default text, trimmed.
    pub fn synonyms(&self) -> impl Iterator<Item = &str> {
        self.text.split(',').map(str::trim).filter(|s| !s.is_empty())
    }

    /// The display text: the first default synonym.
    #[must_use]
    pub fn display_text(&self) -> &str {
        first_synonym(&self.text)
    }

    /// Text for the exact language label, if present and non-empty.
    #[must_use]
    pub fn text_for(&self, label: &str) -> Option<&str> {
        self.localized_text
            .get(label)
            .map(String::as_str)
            .filter(|t| !t.is_empty())
    }

    /// Score, treating a missing score as 0.
    #[must_use]
    pub fn score_or_zero(&self) -> f64 {
        self.score.unwrap_or(0.0)
    }

    /// Whether this is a ghost feature (negative score).
    #[must_use]
    pub fn is_ghost(&self) -> bool {
        self.score.is_some_and(|s| s < 0.0)
    }

    /// Whether this feature carries an address-point cluster.
    #[must_use]
    pub const fn has_address_cluster(&self) -> bool {
        self.address_numbers.is_some()
    }

    /// Context overrides: `(type, text)` for every `override:<type>` key.
    pub fn overrides(&self) -> impl Iterator<Item = (&str, &str)> {
        self.extra.iter().filter_map(|(key, value)| {
            let kind = key.strip_prefix(OVERRIDE_PREFIX)?;
            Some((kind, value.as_str()?))
        })
    }

    /// Applies `carmen:addressprops` for the address point at `idx`.
    ///
    /// A `null` override removes the property; `carmen:address_style` is
    /// applied to the typed field.
    pub fn apply_address_props(&mut self, idx: usize) {
        let overrides: Vec<(String, Value)> = self
            .address_props
            .iter()
            .filter_map(|(key, by_idx)| by_idx.get(&idx).map(|v| (key.clone(), v.clone())))
            .collect();

        for (key, value) in overrides {
            if key == "carmen:address_style" {
                self.address_style = value.as_str().map(str::to_string);
            } else if value.is_null() {
                self.extra.remove(&key);
            } else {
                self.extra.insert(key, value);
            }
        }
    }

    /// Address style for the point at `idx`, defaulting to `standard`.
    #[must_use]
    pub fn address_style_at(&self, idx: usize) -> &str {
        let style = self
            .address_props
            .get("carmen:address_style")
            .and_then(|by_idx| by_idx.get(&idx))
            .and_then(Value::as_str)
            .or(self.address_style.as_deref())
            .unwrap_or("standard");
        match style {
            "queens" => "queens",
            _ => "standard",
        }
    }
}

/// The first comma-separated synonym of `text`, trimmed.
#[must_use]
pub fn first_synonym(text: &str) -> &str {
    text.split(',').next().unwrap_or("").trim()
}

impl TryFrom<Map<String, Value>> for FeatureProperties {
    type Error = PropertiesError;

    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        let mut props = Self::default();
        let mut range_type = None;
        let mut range_values: BTreeMap<&'static str, Vec<Vec<Option<String>>>> = BTreeMap::new();

        for (key, value) in map {
            if value.is_null() {
                continue;
            }
            if let Some(label) = key.strip_prefix(TEXT_PREFIX) {
                if let Some(text) = text_value(&value) {
                    props.localized_text.insert(label.replace('-', "_"), text);
                }
                continue;
            }
            match key.as_str() {
                "carmen:text" => {
                    props.text = text_value(&value).ok_or_else(|| invalid(&key, "expected text"))?;
                }
                "carmen:center" => props.center = Some(parse_center(&key, &value)?),
                "carmen:score" => {
                    props.score = Some(
                        value
                            .as_f64()
                            .ok_or_else(|| invalid(&key, "carmen:score is not a number"))?,
                    );
                }
                "carmen:types" => props.types = parse_string_list(&value),
                "carmen:zxy" => props.zxy = parse_string_list(&value),
                "carmen:geocoder_stack" => {
                    props.geocoder_stack = value.as_str().map(str::to_lowercase);
                }
                "carmen:addressnumber" => {
                    props.address_numbers = Some(parse_address_numbers(&key, &value)?);
                }
                "carmen:address_style" => props.address_style = value.as_str().map(str::to_string),
                "carmen:address_styles" => props.address_styles = parse_string_list(&value),
                "carmen:addressprops" => props.address_props = parse_address_props(&key, &value)?,
                "carmen:rangetype" => range_type = value.as_str().map(str::to_string),
                "carmen:parityl" => {
                    range_values.insert("parityl", parse_range_values(&value));
                }
                "carmen:parityr" => {
                    range_values.insert("parityr", parse_range_values(&value));
                }
                "carmen:lfromhn" => {
                    range_values.insert("lfromhn", parse_range_values(&value));
                }
                "carmen:ltohn" => {
                    range_values.insert("ltohn", parse_range_values(&value));
                }
                "carmen:rfromhn" => {
                    range_values.insert("rfromhn", parse_range_values(&value));
                }
                "carmen:rtohn" => {
                    range_values.insert("rtohn", parse_range_values(&value));
                }
                "carmen:routable_points" => props.routable_points = Some(value),
                // Request-scoped bookkeeping never round-trips through storage.
                k if k.starts_with(CARMEN_PREFIX) => {}
                _ => {
                    props.extra.insert(key, value);
                }
            }
        }

        if let Some(range_type) = range_type {
            let mut take = |name: &str| range_values.remove(name).unwrap_or_default();
            props.ranges = Some(RangeProperties {
                range_type,
                parity_left: take("parityl"),
                parity_right: take("parityr"),
                left_from: take("lfromhn"),
                left_to: take("ltohn"),
                right_from: take("rfromhn"),
                right_to: take("rtohn"),
            });
        }

        Ok(props)
    }
}

impl From<FeatureProperties> for Map<String, Value> {
    fn from(props: FeatureProperties) -> Self {
        let mut map: Self = props.extra.into_iter().collect();
        map.insert("carmen:text".to_string(), Value::String(props.text));
        for (label, text) in props.localized_text {
            map.insert(format!("{TEXT_PREFIX}{label}"), Value::String(text));
        }
        if let Some([lon, lat]) = props.center {
            map.insert("carmen:center".to_string(), serde_json::json!([lon, lat]));
        }
        if let Some(score) = props.score {
            map.insert("carmen:score".to_string(), serde_json::json!(score));
        }
        if !props.types.is_empty() {
            map.insert("carmen:types".to_string(), serde_json::json!(props.types));
        }
        if !props.zxy.is_empty() {
            map.insert("carmen:zxy".to_string(), serde_json::json!(props.zxy));
        }
        if let Some(stack) = props.geocoder_stack {
            map.insert("carmen:geocoder_stack".to_string(), Value::String(stack));
        }
        if let Some(numbers) = props.address_numbers {
            map.insert("carmen:addressnumber".to_string(), serde_json::json!(numbers));
        }
        if let Some(style) = props.address_style {
            map.insert("carmen:address_style".to_string(), Value::String(style));
        }
        if !props.address_styles.is_empty() {
            map.insert(
                "carmen:address_styles".to_string(),
                serde_json::json!(props.address_styles),
            );
        }
        if !props.address_props.is_empty() {
            let nested: Map<String, Value> = props
                .address_props
                .into_iter()
                .map(|(key, by_idx)| {
                    let inner: Map<String, Value> =
                        by_idx.into_iter().map(|(i, v)| (i.to_string(), v)).collect();
                    (key, Value::Object(inner))
                })
                .collect();
            map.insert("carmen:addressprops".to_string(), Value::Object(nested));
        }
        if let Some(ranges) = props.ranges {
            map.insert("carmen:rangetype".to_string(), Value::String(ranges.range_type));
            for (key, values) in [
                ("carmen:parityl", ranges.parity_left),
                ("carmen:parityr", ranges.parity_right),
                ("carmen:lfromhn", ranges.left_from),
                ("carmen:ltohn", ranges.left_to),
                ("carmen:rfromhn", ranges.right_from),
                ("carmen:rtohn", ranges.right_to),
            ] {
                map.insert(key.to_string(), serde_json::json!(values));
            }
        }
        if let Some(points) = props.routable_points {
            map.insert("carmen:routable_points".to_string(), points);
        }
        map
    }
}

fn invalid(key: &str, message: &str) -> PropertiesError {
    PropertiesError::Invalid {
        key: key.to_string(),
        message: message.to_string(),
    }
}

/// Text may be stored as a string or an array of synonyms.
fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            Some(parts.join(","))
        }
        _ => None,
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Accepts a JSON array, a stringified JSON array, or a comma-joined string.
fn parse_string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(scalar_string).collect(),
        Value::String(s) if s.starts_with('[') => serde_json::from_str::<Vec<Value>>(s)
            .map(|items| items.iter().filter_map(scalar_string).collect())
            .unwrap_or_default(),
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_center(key: &str, value: &Value) -> Result<[f64; 2], PropertiesError> {
    let coords: Vec<f64> = match value {
        Value::Array(items) => items.iter().filter_map(Value::as_f64).collect(),
        Value::String(s) if s.starts_with('[') => serde_json::from_str(s)
            .map_err(|e| invalid(key, &e.to_string()))?,
        Value::String(s) => s
            .split(',')
            .filter_map(|part| part.trim().parse::<f64>().ok())
            .collect(),
        _ => Vec::new(),
    };
    match coords.as_slice() {
        [lon, lat] => Ok([*lon, *lat]),
        _ => Err(invalid(key, "expected [lon, lat]")),
    }
}

/// A flat list is a single cluster; a nested list is one cluster per
/// collection geometry (with `null` for non-point members).
fn parse_address_numbers(
    key: &str,
    value: &Value,
) -> Result<Vec<Option<Vec<String>>>, PropertiesError> {
    let parsed;
    let value = if let Value::String(s) = value {
        parsed = serde_json::from_str::<Value>(s).map_err(|e| invalid(key, &e.to_string()))?;
        &parsed
    } else {
        value
    };
    let Value::Array(items) = value else {
        return Err(invalid(key, "expected an array"));
    };

    let nested = items.iter().any(|v| v.is_array() || v.is_null());
    let lower = |v: &Value| scalar_string(v).map(|s| s.to_lowercase());

    if nested {
        Ok(items
            .iter()
            .map(|cluster| match cluster {
                Value::Array(numbers) => {
                    Some(numbers.iter().map(|n| lower(n).unwrap_or_default()).collect())
                }
                _ => None,
            })
            .collect())
    } else {
        Ok(vec![Some(
            items.iter().map(|n| lower(n).unwrap_or_default()).collect(),
        )])
    }
}

fn parse_address_props(
    key: &str,
    value: &Value,
) -> Result<BTreeMap<String, BTreeMap<usize, Value>>, PropertiesError> {
    let Value::Object(props) = value else {
        return Err(invalid(key, "expected an object"));
    };
    let mut out = BTreeMap::new();
    for (name, by_idx) in props {
        let mut entries = BTreeMap::new();
        match by_idx {
            Value::Object(obj) => {
                for (idx, v) in obj {
                    let idx = idx
                        .parse::<usize>()
                        .map_err(|_| invalid(key, "address point index must be numeric"))?;
                    entries.insert(idx, v.clone());
                }
            }
            Value::Array(items) => {
                for (idx, v) in items.iter().enumerate() {
                    entries.insert(idx, v.clone());
                }
            }
            _ => return Err(invalid(key, "expected per-point overrides")),
        }
        out.insert(name.clone(), entries);
    }
    Ok(out)
}

/// Scalars describe a single line, flat arrays one multi-line geometry, and
/// nested arrays a full geometry collection.
fn parse_range_values(value: &Value) -> Vec<Vec<Option<String>>> {
    let leaf = |v: &Value| scalar_string(v).filter(|s| !s.is_empty());
    match value {
        Value::Array(items) if items.iter().any(Value::is_array) => items
            .iter()
            .map(|inner| match inner {
                Value::Array(values) => values.iter().map(leaf).collect(),
                _ => Vec::new(),
            })
            .collect(),
        Value::Array(items) => vec![items.iter().map(leaf).collect()],
        other => vec![vec![leaf(other)]],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> FeatureProperties {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn lifts_known_keys_and_keeps_extra() {
        let props = parse(json!({
            "carmen:text": "Main Street,Main St",
            "carmen:text_en": "Main Street",
            "carmen:center": [1.5, 2.5],
            "carmen:score": 10,
            "carmen:types": "place,locality",
            "wikidata": "Q1"
        }));

        assert_eq!(props.display_text(), "Main Street");
        assert_eq!(props.synonyms().collect::<Vec<_>>(), vec!["Main Street", "Main St"]);
        assert_eq!(props.text_for("en"), Some("Main Street"));
        assert_eq!(props.center, Some([1.5, 2.5]));
        assert_eq!(props.score, Some(10.0));
        assert_eq!(props.types, vec!["place", "locality"]);
        assert_eq!(props.extra.get("wikidata"), Some(&json!("Q1")));
    }

    #[test]
    fn parses_stringified_center_and_types() {
        let props = parse(json!({
            "carmen:text": "x",
            "carmen:center": "[3,4]",
            "carmen:types": "[\"poi\"]"
        }));
        assert_eq!(props.center, Some([3.0, 4.0]));
        assert_eq!(props.types, vec!["poi"]);
    }

    #[test]
    fn flat_address_numbers_become_single_cluster() {
        let props = parse(json!({
            "carmen:text": "fake street",
            "carmen:addressnumber": ["9", 10, "7A"]
        }));
        assert_eq!(
            props.address_numbers,
            Some(vec![Some(vec!["9".to_string(), "10".to_string(), "7a".to_string()])])
        );
    }

    #[test]
    fn nested_address_numbers_keep_null_members() {
        let props = parse(json!({
            "carmen:text": "fake street",
            "carmen:addressnumber": [null, ["1", "3"]]
        }));
        assert_eq!(
            props.address_numbers,
            Some(vec![None, Some(vec!["1".to_string(), "3".to_string()])])
        );
    }

    #[test]
    fn range_values_accept_every_nesting() {
        let props = parse(json!({
            "carmen:text": "main st",
            "carmen:rangetype": "tiger",
            "carmen:lfromhn": 1,
            "carmen:ltohn": [9, 19],
            "carmen:rfromhn": [["2"], []]
        }));
        let ranges = props.ranges.unwrap();
        assert_eq!(ranges.left_from, vec![vec![Some("1".to_string())]]);
        assert_eq!(
            ranges.left_to,
            vec![vec![Some("9".to_string()), Some("19".to_string())]]
        );
        assert_eq!(ranges.right_from, vec![vec![Some("2".to_string())], vec![]]);
        assert!(ranges.parity_left.is_empty());
    }

    #[test]
    fn address_props_apply_per_point() {
        let mut props = parse(json!({
            "carmen:text": "main st",
            "postcode": "00001",
            "carmen:addressprops": {
                "postcode": { "1": "00002", "2": null },
                "carmen:address_style": { "1": "queens" }
            }
        }));

        assert_eq!(props.address_style_at(0), "standard");
        assert_eq!(props.address_style_at(1), "queens");

        props.apply_address_props(1);
        assert_eq!(props.extra.get("postcode"), Some(&json!("00002")));
        props.apply_address_props(2);
        assert!(props.extra.get("postcode").is_none());
    }

    #[test]
    fn overrides_are_listed_by_type() {
        let props = parse(json!({
            "carmen:text": "x",
            "override:region": "Somewhere"
        }));
        assert_eq!(props.overrides().collect::<Vec<_>>(), vec![("region", "Somewhere")]);
    }

    #[test]
    fn ghost_detection() {
        let props = parse(json!({ "carmen:text": "x", "carmen:score": -1 }));
        assert!(props.is_ghost());
        assert!(!FeatureProperties::with_text("y").is_ghost());
    }

    #[test]
    fn non_numeric_score_is_rejected() {
        let result: Result<FeatureProperties, _> =
            serde_json::from_value(json!({ "carmen:text": "x", "carmen:score": "high" }));
        assert!(result.is_err());
    }

    #[test]
    fn serializes_back_to_a_property_bag() {
        let props = parse(json!({
            "carmen:text": "x",
            "carmen:center": [0, 0],
            "name": "n"
        }));
        let value = serde_json::to_value(&props).unwrap();
        assert_eq!(value["carmen:text"], json!("x"));
        assert_eq!(value["name"], json!("n"));
        let again: FeatureProperties = serde_json::from_value(value).unwrap();
        assert_eq!(again, props);
    }
}
