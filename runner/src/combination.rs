use crate::parameter::{CombinationMethod, ParameterError, ParameterSpec};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Identifier of a case, equal to the name of its folder
pub type CaseId = String;

/// prefix of every case folder
pub const CASE_PREFIX: &str = "case_";
/// significant digits kept for numeric values in folder names
pub const FRAGMENT_PRECISION: usize = 3;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AxisKind {
    /// a parameter scanned on its own
    Single,
    /// a member of a combination group
    Multi,
}

/// One parameter contributing to an axis, `values` and `indices` have the axis length
#[derive(Clone, Debug, PartialEq)]
pub struct AxisMember {
    pub name: String,
    pub file_name: String,
    pub values: Vec<Value>,
    // index of each value in the parameter's own value list
    pub indices: Vec<usize>,
}

/// One dimension of the case enumeration
#[derive(Clone, Debug, PartialEq)]
pub struct Axis {
    pub kind: AxisKind,
    pub group: i64,
    pub method: Option<CombinationMethod>,
    pub members: Vec<AxisMember>,
    pub len: usize,
}

/// The concrete value of one parameter inside a case
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Assignment {
    pub parameter_name: String,
    pub file_name: String,
    pub value: Value,
    pub kind: AxisKind,
    pub index: usize,
}

impl Assignment {
    /// `<file_name>_<formatted value>`
    pub fn fragment(&self) -> String {
        format!(
            "{}_{}",
            self.file_name,
            format_fragment(&self.value, self.index)
        )
    }
}

/// A fully resolved assignment of every parameter
#[derive(Clone, Debug, PartialEq)]
pub struct Case {
    pub assignments: Vec<Assignment>,
}

impl Case {
    pub fn folder_name(&self) -> CaseId {
        format!(
            "{CASE_PREFIX}{}",
            self.assignments.iter().map(Assignment::fragment).join("_")
        )
    }
}

/// Group the specs into axes: single parameters first (declaration order),
/// then one compound axis per combination index (ascending).
pub fn build_combinations(specs: &[ParameterSpec]) -> Result<Vec<Axis>, ParameterError> {
    let mut axes = specs
        .iter()
        .filter(|spec| spec.is_single())
        .map(|spec| Axis {
            kind: AxisKind::Single,
            group: spec.combination_idx,
            method: None,
            members: vec![AxisMember {
                name: spec.name.clone(),
                file_name: spec.file_name.clone(),
                values: spec.values.clone(),
                indices: (0..spec.values.len()).collect(),
            }],
            len: spec.values.len(),
        })
        .collect_vec();

    let mut groups: BTreeMap<i64, Vec<&ParameterSpec>> = BTreeMap::new();
    specs
        .iter()
        .filter(|spec| !spec.is_single())
        .for_each(|spec| groups.entry(spec.combination_idx).or_default().push(spec));

    for (group, members) in groups {
        axes.push(build_group(group, &members)?);
    }

    debug!(axes = axes.len(), "Built parameter axes");

    Ok(axes)
}

fn build_group(group: i64, members: &[&ParameterSpec]) -> Result<Axis, ParameterError> {
    let method = members
        .iter()
        .map(|spec| {
            spec.combination_method
                .ok_or_else(|| ParameterError::MissingCombinationMethod {
                    name: spec.name.clone(),
                    group,
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let first = method[0];
    if let Some(second) = method.iter().copied().find(|method| *method != first) {
        return Err(ParameterError::MixedCombinationMethods {
            group,
            first,
            second,
        });
    }

    let axis_members = match first {
        CombinationMethod::Individual => {
            let expected = members[0].values.len();

            if let Some(spec) = members.iter().find(|spec| spec.values.len() != expected) {
                return Err(ParameterError::LengthMismatch {
                    group,
                    name: spec.name.clone(),
                    expected,
                    found: spec.values.len(),
                });
            }

            members
                .iter()
                .map(|spec| AxisMember {
                    name: spec.name.clone(),
                    file_name: spec.file_name.clone(),
                    values: spec.values.clone(),
                    indices: (0..expected).collect(),
                })
                .collect_vec()
        }
        CombinationMethod::Meshgrid => {
            // multi_cartesian_product varies its last iterator fastest, so feed the
            // members in reverse to let the first member vary fastest
            let positions = members
                .iter()
                .rev()
                .map(|spec| 0..spec.values.len())
                .multi_cartesian_product()
                .map(|mut position| {
                    position.reverse();
                    position
                })
                .collect_vec();

            members
                .iter()
                .enumerate()
                .map(|(k, spec)| {
                    let indices = positions.iter().map(|position| position[k]).collect_vec();

                    AxisMember {
                        name: spec.name.clone(),
                        file_name: spec.file_name.clone(),
                        values: indices.iter().map(|&i| spec.values[i].clone()).collect(),
                        indices,
                    }
                })
                .collect_vec()
        }
    };

    Ok(Axis {
        kind: AxisKind::Multi,
        group,
        method: Some(first),
        len: axis_members[0].values.len(),
        members: axis_members,
    })
}

/// Lazily enumerate every case of the given specs
pub fn yield_combinations(specs: &[ParameterSpec]) -> Result<CombinationIter, ParameterError> {
    build_combinations(specs).map(CombinationIter::new)
}

/// Mixed-radix counter over all axes, the first axis varies fastest.
/// Not restartable, build a new one to enumerate again.
#[derive(Clone, Debug)]
pub struct CombinationIter {
    axes: Vec<Axis>,
    counter: Vec<usize>,
    remaining: usize,
}

impl CombinationIter {
    pub fn new(axes: Vec<Axis>) -> Self {
        let total: usize = axes.iter().map(|axis| axis.len).product();

        debug!(total, "Starting case enumeration");

        Self {
            counter: vec![0; axes.len()],
            axes,
            remaining: total,
        }
    }

    fn current(&self) -> Case {
        let assignments = self
            .axes
            .iter()
            .zip(self.counter.iter())
            .flat_map(|(axis, &position)| {
                axis.members.iter().map(move |member| Assignment {
                    parameter_name: member.name.clone(),
                    file_name: member.file_name.clone(),
                    value: member.values[position].clone(),
                    kind: axis.kind,
                    index: match axis.kind {
                        AxisKind::Single => position,
                        AxisKind::Multi => member.indices[position],
                    },
                })
            })
            .collect();

        Case { assignments }
    }

    fn advance(&mut self) {
        for (digit, axis) in self.counter.iter_mut().zip(self.axes.iter()) {
            *digit += 1;

            if *digit < axis.len {
                return;
            }

            *digit = 0;
        }
    }
}

impl Iterator for CombinationIter {
    type Item = Case;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let case = self.current();
        self.remaining -= 1;
        self.advance();

        Some(case)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for CombinationIter {}

/// Render a value for a folder name: anything readable as a number (booleans and numeric
/// strings included) with three significant digits and `.` as `d`, everything else (or
/// numbers the rendering would not reproduce) as the fallback index.
pub fn format_fragment(value: &Value, index: usize) -> String {
    let numeric = match value {
        Value::Number(number) => number.as_f64(),
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|float| float.is_finite());

    match numeric {
        Some(float) => {
            let rendered = format_general(float, FRAGMENT_PRECISION);

            if rendered.parse::<f64>().map_or(false, |parsed| parsed == float) {
                rendered.replace('.', "d")
            } else {
                index.to_string()
            }
        }
        None => index.to_string(),
    }
}

/// General float format with `precision` significant digits: fixed notation keeps at
/// least one fractional digit, scientific notation uses a signed two digit exponent.
pub fn format_general(value: f64, precision: usize) -> String {
    if value == 0.0 {
        return if value.is_sign_negative() { "-0.0" } else { "0.0" }.to_owned();
    }

    let precision = precision.max(1);
    let scientific = format!("{:.*e}", precision - 1, value);
    let (mantissa, exponent) = match scientific
        .split_once('e')
        .and_then(|(mantissa, exponent)| Some((mantissa, exponent.parse::<i32>().ok()?)))
    {
        Some(parts) => parts,
        None => return scientific,
    };

    if (-4..precision as i32 - 1).contains(&exponent) {
        let decimals = (precision as i32 - 1 - exponent) as usize;
        let mut fixed = format!("{value:.decimals$}");

        if fixed.contains('.') {
            let trimmed = fixed.trim_end_matches('0').len();
            fixed.truncate(trimmed);
        } else {
            fixed.push('.');
        }
        if fixed.ends_with('.') {
            fixed.push('0');
        }

        fixed
    } else {
        let mantissa = if mantissa.contains('.') {
            mantissa.trim_end_matches('0').trim_end_matches('.')
        } else {
            mantissa
        };
        let sign = if exponent < 0 { '-' } else { '+' };

        format!("{mantissa}e{sign}{:02}", exponent.abs())
    }
}
