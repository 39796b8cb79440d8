//! Data payloads handed to the inference engine.
//!
//! A payload is a named mapping in the CmdStan JSON data format. Before it
//! goes anywhere near the engine it is checked against the descriptor's size
//! bindings, so a length mismatch surfaces here instead of as a sampler error.

use crate::datagen::{
    GroupedObservations, GroupedRegression, Observations, PairedObservations, RegressionData,
    ThreeLevelData,
};
use crate::model::{self, ModelDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("{size_var} = {declared} but '{sequence}' has length {actual}")]
    DimensionMismatch {
        size_var: String,
        declared: usize,
        sequence: String,
        actual: usize,
    },

    #[error("payload is missing variable '{0}'")]
    MissingVariable(String),

    #[error("'{0}' has the wrong type for its declaration")]
    WrongType(String),

    #[error("{variable}[{index}] = {value} is outside 1..={bound}")]
    IndexOutOfRange {
        variable: String,
        index: usize,
        value: i64,
        bound: usize,
    },

    #[error("business {business} is in city {city} of province {expected}, but province_id says {actual}")]
    InconsistentHierarchy {
        business: usize,
        city: usize,
        expected: usize,
        actual: usize,
    },

    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write payload to {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

/// One payload entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataValue {
    Int(i64),
    Real(f64),
    IntArray(Vec<i64>),
    RealArray(Vec<f64>),
}

impl DataValue {
    /// Length of a sequence; `None` for scalars.
    pub fn len(&self) -> Option<usize> {
        match self {
            DataValue::IntArray(v) => Some(v.len()),
            DataValue::RealArray(v) => Some(v.len()),
            DataValue::Int(_) | DataValue::Real(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            DataValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            DataValue::IntArray(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_reals(&self) -> Option<&[f64]> {
        match self {
            DataValue::RealArray(v) => Some(v),
            _ => None,
        }
    }
}

fn to_ints(values: &[usize]) -> Vec<i64> {
    values.iter().map(|&v| v as i64).collect()
}

/// Named variables for one model run. Keys serialize in sorted order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataPayload {
    vars: BTreeMap<String, DataValue>,
}

impl DataPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: DataValue) {
        self.vars.insert(name.into(), value);
    }

    pub fn with_int(mut self, name: &str, value: usize) -> Self {
        self.insert(name, DataValue::Int(value as i64));
        self
    }

    pub fn with_real(mut self, name: &str, value: f64) -> Self {
        self.insert(name, DataValue::Real(value));
        self
    }

    pub fn with_indices(mut self, name: &str, values: &[usize]) -> Self {
        self.insert(name, DataValue::IntArray(to_ints(values)));
        self
    }

    pub fn with_reals(mut self, name: &str, values: &[f64]) -> Self {
        self.insert(name, DataValue::RealArray(values.to_vec()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&DataValue> {
        self.vars.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    fn size_of(&self, size_var: &str) -> Result<usize, PayloadError> {
        let value = self
            .get(size_var)
            .ok_or_else(|| PayloadError::MissingVariable(size_var.to_string()))?;
        match value.as_int() {
            Some(n) if n >= 0 => Ok(n as usize),
            _ => Err(PayloadError::WrongType(size_var.to_string())),
        }
    }

    /// Every declared size variable is present and equals the length of each
    /// sequence it governs.
    pub fn validate_sizes(&self, model: &ModelDescriptor) -> Result<(), PayloadError> {
        for binding in model.size_bindings() {
            let declared = self.size_of(binding.size_var)?;
            for &sequence in binding.sequences {
                let actual = self
                    .get(sequence)
                    .ok_or_else(|| PayloadError::MissingVariable(sequence.to_string()))?
                    .len()
                    .ok_or_else(|| PayloadError::WrongType(sequence.to_string()))?;
                if actual != declared {
                    return Err(PayloadError::DimensionMismatch {
                        size_var: binding.size_var.to_string(),
                        declared,
                        sequence: sequence.to_string(),
                        actual,
                    });
                }
            }
        }
        Ok(())
    }

    /// Every entry of integer array `variable` lies in `1..=<bound_var>`.
    pub fn validate_indices(&self, variable: &str, bound_var: &str) -> Result<(), PayloadError> {
        let bound = self.size_of(bound_var)?;
        let values = self
            .get(variable)
            .ok_or_else(|| PayloadError::MissingVariable(variable.to_string()))?
            .as_ints()
            .ok_or_else(|| PayloadError::WrongType(variable.to_string()))?;
        if let Some((index, &value)) = values
            .iter()
            .enumerate()
            .find(|&(_, &v)| v < 1 || v as usize > bound)
        {
            return Err(PayloadError::IndexOutOfRange {
                variable: variable.to_string(),
                index: index + 1,
                value,
                bound,
            });
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, PayloadError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, path: &Path) -> Result<(), PayloadError> {
        let json = self.to_json()?;
        fs::write(path, json).map_err(|source| PayloadError::Write {
            path: path.display().to_string(),
            source,
        })
    }
}

/// `N`, `y` for the single-group and outlier models.
pub fn single_group(obs: &Observations) -> Result<DataPayload, PayloadError> {
    let payload = DataPayload::new()
        .with_int("N", obs.len())
        .with_reals("y", &obs.values);
    payload.validate_sizes(&model::NORMAL_UNIFORM)?;
    Ok(payload)
}

pub fn paired(obs: &PairedObservations) -> Result<DataPayload, PayloadError> {
    let payload = DataPayload::new()
        .with_int("N", obs.len())
        .with_reals("before", &obs.before)
        .with_reals("after", &obs.after);
    payload.validate_sizes(&model::PAIRED_DIFFERENCE)?;
    Ok(payload)
}

pub fn two_group(obs: &GroupedObservations) -> Result<DataPayload, PayloadError> {
    let payload = DataPayload::new()
        .with_int("N", obs.len())
        .with_int("G", obs.n_groups)
        .with_reals("y", &obs.values)
        .with_indices("group", &obs.groups);
    payload.validate_sizes(&model::TWO_GROUP)?;
    payload.validate_indices("group", "G")?;
    Ok(payload)
}

pub fn linear(data: &RegressionData) -> Result<DataPayload, PayloadError> {
    let payload = DataPayload::new()
        .with_int("N", data.len())
        .with_reals("x", &data.x)
        .with_reals("y", &data.y);
    payload.validate_sizes(&model::LINEAR_REGRESSION)?;
    Ok(payload)
}

pub fn grouped_regression(data: &GroupedRegression) -> Result<DataPayload, PayloadError> {
    let payload = DataPayload::new()
        .with_int("N", data.len())
        .with_int("G", data.n_groups)
        .with_reals("x", &data.x)
        .with_reals("y", &data.y)
        .with_indices("group", &data.groups);
    payload.validate_sizes(&model::HIERARCHICAL_REGRESSION)?;
    payload.validate_indices("group", "G")?;
    Ok(payload)
}

/// Raw inputs of the three-level payload, before any checking.
#[derive(Debug, Clone)]
pub struct ThreeLevelParts<'a> {
    pub nb: usize,
    pub nc: usize,
    pub np: usize,
    pub y: &'a [f64],
    pub city_id: &'a [usize],
    pub province_id: &'a [usize],
    pub city_province_lkp: &'a [usize],
}

/// Builds the three-level payload, failing with `DimensionMismatch` when
/// `city_id`/`province_id` disagree with `Nb` or the lookup disagrees with `Nc`.
pub fn three_level_from_parts(parts: &ThreeLevelParts<'_>) -> Result<DataPayload, PayloadError> {
    let payload = DataPayload::new()
        .with_int("Nb", parts.nb)
        .with_int("Nc", parts.nc)
        .with_int("Np", parts.np)
        .with_reals("y", parts.y)
        .with_indices("city_id", parts.city_id)
        .with_indices("province_id", parts.province_id)
        .with_indices("city_province_lkp", parts.city_province_lkp);

    payload.validate_sizes(&model::THREE_LEVEL)?;
    payload.validate_indices("city_id", "Nc")?;
    payload.validate_indices("province_id", "Np")?;
    payload.validate_indices("city_province_lkp", "Np")?;

    for (b, (&city, &province)) in parts.city_id.iter().zip(parts.province_id).enumerate() {
        let expected = parts.city_province_lkp[city - 1];
        if expected != province {
            return Err(PayloadError::InconsistentHierarchy {
                business: b + 1,
                city,
                expected,
                actual: province,
            });
        }
    }
    Ok(payload)
}

pub fn three_level(data: &ThreeLevelData) -> Result<DataPayload, PayloadError> {
    // businesses must point into the same set of cities the lookup covers
    let city_mismatch = || PayloadError::DimensionMismatch {
        size_var: "Nc".to_string(),
        declared: data.business_city.n_parents(),
        sequence: "city_province_lkp".to_string(),
        actual: data.nc(),
    };
    if data.business_city.n_parents() != data.nc() {
        return Err(city_mismatch());
    }
    let province_id = data.province_id().ok_or_else(city_mismatch)?;
    three_level_from_parts(&ThreeLevelParts {
        nb: data.nb(),
        nc: data.nc(),
        np: data.np(),
        y: &data.values,
        city_id: data.city_id(),
        province_id: &province_id,
        city_province_lkp: data.city_province_lkp(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datagen::{simulate_normal, NormalSpec};

    #[test]
    fn test_single_group_sizes_match() {
        let obs = simulate_normal(&NormalSpec::default(), 2019).unwrap();
        let payload = single_group(&obs).unwrap();
        assert_eq!(payload.get("N"), Some(&DataValue::Int(10)));
        assert_eq!(payload.get("y").and_then(DataValue::len), Some(10));
    }

    #[test]
    fn test_dimension_mismatch_detected() {
        let payload = DataPayload::new()
            .with_int("N", 3)
            .with_reals("y", &[1.0, 2.0]);
        let err = payload.validate_sizes(&model::NORMAL_UNIFORM).unwrap_err();
        match err {
            PayloadError::DimensionMismatch {
                size_var,
                declared,
                sequence,
                actual,
            } => {
                assert_eq!(size_var, "N");
                assert_eq!(declared, 3);
                assert_eq!(sequence, "y");
                assert_eq!(actual, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_size_variable() {
        let payload = DataPayload::new().with_reals("y", &[1.0]);
        assert!(matches!(
            payload.validate_sizes(&model::NORMAL_UNIFORM),
            Err(PayloadError::MissingVariable(name)) if name == "N"
        ));
    }

    #[test]
    fn test_scalar_where_sequence_expected() {
        let payload = DataPayload::new().with_int("N", 1).with_real("y", 1.0);
        assert!(matches!(
            payload.validate_sizes(&model::NORMAL_UNIFORM),
            Err(PayloadError::WrongType(_))
        ));
    }

    #[test]
    fn test_index_out_of_range() {
        let payload = DataPayload::new()
            .with_int("G", 2)
            .with_indices("group", &[1, 2, 3]);
        let err = payload.validate_indices("group", "G").unwrap_err();
        assert!(matches!(
            err,
            PayloadError::IndexOutOfRange { index: 3, value: 3, bound: 2, .. }
        ));
    }

    #[test]
    fn test_json_shape() {
        let payload = DataPayload::new()
            .with_int("N", 2)
            .with_reals("y", &[1.5, 2.5])
            .with_indices("group", &[1, 2]);
        let json: serde_json::Value = serde_json::from_str(&payload.to_json().unwrap()).unwrap();
        assert_eq!(json["N"], 2);
        assert_eq!(json["y"][1], 2.5);
        assert_eq!(json["group"][0], 1);
    }

    #[test]
    fn test_three_level_inconsistent_province() {
        let parts = ThreeLevelParts {
            nb: 2,
            nc: 2,
            np: 2,
            y: &[1.0, 2.0],
            city_id: &[1, 2],
            province_id: &[1, 1],
            city_province_lkp: &[1, 2],
        };
        assert!(matches!(
            three_level_from_parts(&parts),
            Err(PayloadError::InconsistentHierarchy { business: 2, .. })
        ));
    }
}
