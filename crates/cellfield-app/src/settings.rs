//! Configuration loading: JSON files plus dotted `path=value` overrides.

use std::fs;
use std::path::{Path, PathBuf};

use cellfield_core::SimulationConfig;
use serde_json::{Map, Value};
use smallvec::SmallVec;
use thiserror::Error;

/// Errors raised while assembling the run configuration.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    InvalidOverride(String),
    #[error("unknown configuration path: {0}")]
    UnknownPath(String),
    #[error("invalid configuration: {0}")]
    Parse(String),
}

impl SettingsError {
    fn serialization(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Load `path` (or the defaults) and apply every `path=value` override in order.
pub fn load_config(path: Option<&Path>, overrides: &[String]) -> Result<SimulationConfig, SettingsError> {
    let base = match path {
        Some(path) => {
            let raw = fs::read_to_string(path).map_err(|source| SettingsError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            parse_config(&raw)?
        }
        None => SimulationConfig::default(),
    };
    apply_overrides(&base, overrides)
}

/// Deserialize a configuration, reporting the JSON path of the first bad field.
pub fn parse_config(raw: &str) -> Result<SimulationConfig, SettingsError> {
    let mut de = serde_json::Deserializer::from_str(raw);
    serde_path_to_error::deserialize::<_, SimulationConfig>(&mut de).map_err(
        |e: serde_path_to_error::Error<serde_json::Error>| {
            SettingsError::Parse(format!("{} at {}", e, e.path()))
        },
    )
}

/// Split `path=value`; the value is JSON when it parses, a raw string otherwise.
pub fn parse_override(raw: &str) -> Result<(String, Value), SettingsError> {
    let Some((path, value)) = raw.split_once('=') else {
        return Err(SettingsError::InvalidOverride(format!(
            "expected path=value, got '{raw}'"
        )));
    };
    let path = path.trim();
    if path.is_empty() {
        return Err(SettingsError::InvalidOverride("empty override path".into()));
    }
    let value = value.trim();
    let value = serde_json::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_owned()));
    Ok((path.to_owned(), value))
}

/// Merge dotted overrides into `config` and deserialize the result.
pub fn apply_overrides(
    config: &SimulationConfig,
    overrides: &[String],
) -> Result<SimulationConfig, SettingsError> {
    if overrides.is_empty() {
        return Ok(config.clone());
    }
    let mut patch = Map::new();
    for raw in overrides {
        let (path, value) = parse_override(raw)?;
        insert_path(&mut patch, &path, value)?;
    }
    let patch = Value::Object(patch);

    let mut config_value = serde_json::to_value(config).map_err(SettingsError::serialization)?;
    let mut path = SmallVec::<[&str; 8]>::new();
    merge_value(&mut config_value, &patch, &mut path)?;
    let json_str = serde_json::to_string(&config_value).map_err(SettingsError::serialization)?;
    parse_config(&json_str)
}

fn insert_path(map: &mut Map<String, Value>, path: &str, value: Value) -> Result<(), SettingsError> {
    let mut segments = path.split('.').filter(|s| !s.is_empty());
    let Some(mut seg) = segments.next() else {
        return Err(SettingsError::InvalidOverride("empty override path".into()));
    };
    let mut cur = map;

    for next in segments {
        let entry = cur
            .entry(seg.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        cur = entry.as_object_mut().ok_or_else(|| {
            SettingsError::InvalidOverride(format!("segment '{seg}' is set twice with different shapes"))
        })?;
        seg = next;
    }

    cur.insert(seg.to_owned(), value);
    Ok(())
}

fn path_display(path: &[&str]) -> String {
    path.join(".")
}

fn mismatch(path: &[&str]) -> SettingsError {
    SettingsError::InvalidOverride(format!("type mismatch at {}", path_display(path)))
}

fn merge_value<'a>(
    target: &mut Value,
    patch: &'a Value,
    path: &mut SmallVec<[&'a str; 8]>,
) -> Result<(), SettingsError> {
    match target {
        Value::Object(target_map) => {
            let Value::Object(patch_map) = patch else {
                return Err(mismatch(path));
            };
            // A different variant of a tagged enum replaces the whole object.
            if let Some(kind) = patch_map.get("kind") {
                if target_map.get("kind") != Some(kind) {
                    *target = patch.clone();
                    return Ok(());
                }
            }

            for (key, patch_value) in patch_map {
                path.push(key);
                let Some(target_value) = target_map.get_mut(key) else {
                    return Err(SettingsError::UnknownPath(path_display(path)));
                };
                merge_value(target_value, patch_value, path)?;
                path.pop();
            }
            Ok(())
        }
        Value::Array(_) => match patch {
            Value::Array(_) => {
                *target = patch.clone();
                Ok(())
            }
            _ => Err(mismatch(path)),
        },
        Value::Number(_) => match patch {
            Value::Number(_) | Value::Null => {
                *target = patch.clone();
                Ok(())
            }
            Value::String(s) => {
                let s = s.trim();
                let parsed = if target.is_u64() {
                    s.parse::<u64>().ok().map(Value::from)
                } else if target.is_i64() {
                    s.parse::<i64>().ok().map(Value::from)
                } else {
                    s.parse::<f64>()
                        .ok()
                        .and_then(serde_json::Number::from_f64)
                        .map(Value::Number)
                };
                *target = parsed.ok_or_else(|| {
                    SettingsError::InvalidOverride(format!(
                        "cannot parse '{s}' as a number for {}",
                        path_display(path)
                    ))
                })?;
                Ok(())
            }
            _ => Err(mismatch(path)),
        },
        Value::String(_) => match patch {
            Value::String(_) | Value::Null => {
                *target = patch.clone();
                Ok(())
            }
            _ => Err(mismatch(path)),
        },
        Value::Bool(_) => match patch {
            Value::Bool(_) | Value::Null => {
                *target = patch.clone();
                Ok(())
            }
            Value::String(s) => {
                let parsed = match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" | "on" => true,
                    "false" | "0" | "no" | "off" => false,
                    _ => {
                        return Err(SettingsError::InvalidOverride(format!(
                            "cannot coerce '{s}' to bool for {}",
                            path_display(path),
                        )));
                    }
                };
                *target = Value::from(parsed);
                Ok(())
            }
            _ => Err(mismatch(path)),
        },
        Value::Null => {
            *target = patch.clone();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellfield_core::{IndexChoice, UnresolvedPolicy};

    fn overrides(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| (*item).to_owned()).collect()
    }

    #[test]
    fn overrides_patch_nested_fields() {
        let config = apply_overrides(
            &SimulationConfig::default(),
            &overrides(&[
                "parallel.threads=2",
                "solver.stability_factor=0.05",
                "rng_seed=7",
                "compartment.lengths=[8.0, 4.0]",
                "unresolved_variables=abort",
            ]),
        )
        .expect("overrides");
        assert_eq!(config.unresolved_variables, UnresolvedPolicy::Abort);
        assert_eq!(config.parallel.threads, 2);
        assert_eq!(config.solver.stability_factor, 0.05);
        assert_eq!(config.rng_seed, Some(7));
        assert_eq!(config.compartment.lengths, vec![8.0, 4.0]);
    }

    #[test]
    fn string_values_are_coerced_to_target_types() {
        let config = apply_overrides(
            &SimulationConfig::default(),
            &overrides(&["time_step=\"0.5\""]),
        )
        .expect("overrides");
        assert_eq!(config.time_step, 0.5);
    }

    #[test]
    fn unknown_paths_are_rejected() {
        let err = apply_overrides(&SimulationConfig::default(), &overrides(&["solver.order=2"]))
            .expect_err("unknown");
        assert!(matches!(err, SettingsError::UnknownPath(path) if path == "solver.order"));
        let err = apply_overrides(&SimulationConfig::default(), &overrides(&["threads"]))
            .expect_err("malformed");
        assert!(matches!(err, SettingsError::InvalidOverride(_)));
    }

    #[test]
    fn tagged_enum_variants_can_be_swapped() {
        let config = apply_overrides(
            &SimulationConfig::default(),
            &overrides(&[
                r#"collision.index={"kind":"epithelial","layout":{"origin":[0,0],"layer_lengths":[32,1],"cell_lengths":[1,1],"compartment_lengths":[32,32]}}"#,
            ]),
        )
        .expect("overrides");
        assert!(matches!(config.collision.index, IndexChoice::Epithelial { .. }));
    }

    #[test]
    fn unstable_stability_factor_survives_parsing_but_fails_validation() {
        let config = apply_overrides(
            &SimulationConfig::default(),
            &overrides(&["solver.stability_factor=0.5"]),
        )
        .expect("overrides");
        assert!(config.validate().is_err());
    }

    #[test]
    fn parse_errors_name_the_offending_path() {
        let err = parse_config(r#"{"parallel": {"threads": "many"}}"#).expect_err("bad type");
        let message = err.to_string();
        assert!(message.contains("parallel.threads"), "{message}");
    }
}
