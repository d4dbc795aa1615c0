use crate::combination::{build_combinations, Axis, CombinationIter};
use serde::{Deserialize, Serialize};
use serde_yaml::{Number, Value};
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Combination index of parameters that are scanned on their own axis
pub const SINGLE_AXIS: i64 = -1;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("parameter {name}: inspection method {method} requires {fields}")]
    MissingBounds {
        name: String,
        method: InspectionMethod,
        fields: &'static str,
    },
    #[error("parameter {name}: inspection method custom requires `values`")]
    MissingValues { name: String },
    #[error("parameter {name} produces no values")]
    EmptyValues { name: String },
    #[error("parameter {name}: logspace bounds must be strictly positive")]
    NonPositiveLogBound { name: String },
    #[error("parameter {name}: cannot coerce {value} to {target}")]
    Coercion {
        name: String,
        value: String,
        target: ForceType,
    },
    #[error("parameter {name} is part of combination group {group} but has no combination_method")]
    MissingCombinationMethod { name: String, group: i64 },
    #[error("combination group {group} mixes combination methods {first} and {second}")]
    MixedCombinationMethods {
        group: i64,
        first: CombinationMethod,
        second: CombinationMethod,
    },
    #[error("combination group {group} combines individually but {name} has {found} values instead of {expected}")]
    LengthMismatch {
        group: i64,
        name: String,
        expected: usize,
        found: usize,
    },
}

/// How the values of a parameter are generated
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InspectionMethod {
    /// unit steps from `min_value` (inclusive) to `max_value` (exclusive)
    Range,
    /// `n_samples` evenly spaced values, both ends included
    Linspace,
    /// `n_samples` values evenly spaced in log10
    Logspace,
    /// an explicit list given in `values`
    Custom,
}

/// How parameters sharing a combination index are expanded together
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CombinationMethod {
    /// zip the value lists, all members need the same length
    Individual,
    /// full cross product of all members
    Meshgrid,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ForceType {
    Int,
    Float,
    Bool,
    Str,
}

impl fmt::Display for InspectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Range => "range",
            Self::Linspace => "linspace",
            Self::Logspace => "logspace",
            Self::Custom => "custom",
        })
    }
}

impl fmt::Display for CombinationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Individual => "individual",
            Self::Meshgrid => "meshgrid",
        })
    }
}

impl fmt::Display for ForceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Str => "str",
        })
    }
}

/// A parameter as written in the study declaration
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ParameterDeclaration {
    // key path into the case config document, segments split by the study key separator
    pub parameter_name: String,
    pub inspection_method: InspectionMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_samples: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Value>>,
    #[serde(default = "default_combination_idx")]
    pub combination_idx: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combination_method: Option<CombinationMethod>,
    // name used for the case folder, defaults to parameter_name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_type: Option<ForceType>,
}

fn default_combination_idx() -> i64 {
    SINGLE_AXIS
}

/// A validated parameter with all of its values generated
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterSpec {
    pub name: String,
    pub file_name: String,
    pub method: InspectionMethod,
    pub values: Vec<Value>,
    pub combination_idx: i64,
    pub combination_method: Option<CombinationMethod>,
}

impl ParameterSpec {
    /// validate a declaration and materialize its values
    pub fn from_declaration(declaration: &ParameterDeclaration) -> Result<Self, ParameterError> {
        let name = declaration.parameter_name.clone();
        let method = declaration.inspection_method;

        let generated = match method {
            InspectionMethod::Range => {
                let (min, max) = bounds(declaration, "min_value and max_value")?;
                let values = arange(min, max);

                typed(&name, values, declaration.force_type.unwrap_or(ForceType::Int))?
            }
            InspectionMethod::Linspace => {
                let (min, max) = bounds(declaration, "min_value, max_value and n_samples")?;
                let samples = samples(declaration)?;

                typed(
                    &name,
                    linspace(min, max, samples),
                    declaration.force_type.unwrap_or(ForceType::Float),
                )?
            }
            InspectionMethod::Logspace => {
                let (min, max) = bounds(declaration, "min_value, max_value and n_samples")?;
                let samples = samples(declaration)?;

                if min <= 0.0 || max <= 0.0 {
                    return Err(ParameterError::NonPositiveLogBound { name });
                }

                let values = linspace(min.log10(), max.log10(), samples)
                    .into_iter()
                    .map(|exponent| 10f64.powf(exponent))
                    .collect();

                typed(
                    &name,
                    values,
                    declaration.force_type.unwrap_or(ForceType::Float),
                )?
            }
            InspectionMethod::Custom => {
                let values = declaration
                    .values
                    .clone()
                    .ok_or_else(|| ParameterError::MissingValues { name: name.clone() })?;

                match declaration.force_type {
                    Some(target) => values
                        .into_iter()
                        .map(|value| coerce(&name, value, target))
                        .collect::<Result<Vec<_>, _>>()?,
                    None => values,
                }
            }
        };

        if generated.is_empty() {
            return Err(ParameterError::EmptyValues { name });
        }

        if declaration.combination_idx != SINGLE_AXIS && declaration.combination_method.is_none()
        {
            return Err(ParameterError::MissingCombinationMethod {
                name,
                group: declaration.combination_idx,
            });
        }

        debug!(
            parameter = %name,
            method = %method,
            count = generated.len(),
            "Generated parameter values"
        );

        Ok(Self {
            file_name: declaration
                .parameter_file_name
                .clone()
                .unwrap_or_else(|| name.clone()),
            name,
            method,
            values: generated,
            combination_idx: declaration.combination_idx,
            combination_method: declaration.combination_method,
        })
    }

    pub fn is_single(&self) -> bool {
        self.combination_idx == SINGLE_AXIS
    }
}

/// The full list of validated parameters together with their axes.
/// Group consistency is checked here, so a bad declaration fails as soon as it is read.
#[derive(Clone, Debug)]
pub struct ParameterSet {
    specs: Vec<ParameterSpec>,
    axes: Vec<Axis>,
}

impl ParameterSet {
    pub fn new(specs: Vec<ParameterSpec>) -> Result<Self, ParameterError> {
        let axes = build_combinations(&specs)?;

        Ok(Self { specs, axes })
    }

    pub fn from_declarations(declarations: &[ParameterDeclaration]) -> Result<Self, ParameterError> {
        declarations
            .iter()
            .map(ParameterSpec::from_declaration)
            .collect::<Result<Vec<_>, _>>()
            .and_then(Self::new)
    }

    pub fn specs(&self) -> &[ParameterSpec] {
        &self.specs
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    /// number of cases the set expands to
    pub fn total(&self) -> usize {
        self.axes.iter().map(|axis| axis.len).product()
    }

    /// a fresh, deterministic enumeration of all cases
    pub fn cases(&self) -> CombinationIter {
        CombinationIter::new(self.axes.clone())
    }
}

fn bounds(
    declaration: &ParameterDeclaration,
    fields: &'static str,
) -> Result<(f64, f64), ParameterError> {
    match (declaration.min_value, declaration.max_value) {
        (Some(min), Some(max)) => Ok((min, max)),
        _ => Err(ParameterError::MissingBounds {
            name: declaration.parameter_name.clone(),
            method: declaration.inspection_method,
            fields,
        }),
    }
}

fn samples(declaration: &ParameterDeclaration) -> Result<usize, ParameterError> {
    declaration
        .n_samples
        .ok_or_else(|| ParameterError::MissingBounds {
            name: declaration.parameter_name.clone(),
            method: declaration.inspection_method,
            fields: "min_value, max_value and n_samples",
        })
}

fn arange(min: f64, max: f64) -> Vec<f64> {
    let count = (max - min).ceil();

    if !count.is_finite() || count <= 0.0 {
        return Vec::new();
    }

    (0..count as usize).map(|step| min + step as f64).collect()
}

pub(crate) fn linspace(min: f64, max: f64, samples: usize) -> Vec<f64> {
    match samples {
        0 => Vec::new(),
        1 => vec![min],
        _ => {
            let step = (max - min) / (samples - 1) as f64;

            (0..samples)
                .map(|i| {
                    if i == samples - 1 {
                        max
                    } else {
                        min + step * i as f64
                    }
                })
                .collect()
        }
    }
}

fn typed(name: &str, values: Vec<f64>, target: ForceType) -> Result<Vec<Value>, ParameterError> {
    values
        .into_iter()
        .map(|value| coerce(name, Value::Number(Number::from(value)), target))
        .collect()
}

/// coerce a single value into the requested scalar type
pub fn coerce(name: &str, value: Value, target: ForceType) -> Result<Value, ParameterError> {
    let failed = |value: &Value| ParameterError::Coercion {
        name: name.to_owned(),
        value: render(value),
        target,
    };

    let coerced = match (target, &value) {
        (ForceType::Int, Value::Number(number)) => match number.as_i64() {
            Some(int) => Some(Value::from(int)),
            None => number
                .as_f64()
                .filter(|float| float.is_finite())
                .map(|float| Value::from(float.trunc() as i64)),
        },
        (ForceType::Int, Value::Bool(flag)) => Some(Value::from(i64::from(*flag))),
        (ForceType::Int, Value::String(string)) => {
            let trimmed = string.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| {
                    trimmed
                        .parse::<f64>()
                        .ok()
                        .filter(|float| float.is_finite())
                        .map(|float| float.trunc() as i64)
                })
                .map(Value::from)
        }
        (ForceType::Float, Value::Number(number)) => number.as_f64().map(Value::from),
        (ForceType::Float, Value::Bool(flag)) => Some(Value::from(if *flag { 1.0 } else { 0.0 })),
        (ForceType::Float, Value::String(string)) => {
            string.trim().parse::<f64>().ok().map(Value::from)
        }
        (ForceType::Bool, Value::Number(number)) => {
            number.as_f64().map(|float| Value::Bool(float != 0.0))
        }
        (ForceType::Bool, Value::Bool(_)) => Some(value.clone()),
        (ForceType::Bool, Value::String(string)) => match string.trim().to_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        (ForceType::Str, Value::String(_)) => Some(value.clone()),
        (ForceType::Str, Value::Number(number)) => Some(Value::String(number.to_string())),
        (ForceType::Str, Value::Bool(flag)) => Some(Value::String(flag.to_string())),
        _ => None,
    };

    coerced.ok_or_else(|| failed(&value))
}

fn render(value: &Value) -> String {
    serde_yaml::to_string(value)
        .map(|string| string.trim().to_owned())
        .unwrap_or_else(|_| format!("{value:?}"))
}
