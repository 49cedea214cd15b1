use crate::error::Error;
use crate::error::Result;
use crate::store::ColumnType;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Value-comparison regime for a hazard layer. Governs how threshold
/// filtering and "max" reduction are computed over joined values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueClass {
    Ordinal,
    Nominal,
    Discrete,
    Continuous,
}

impl ValueClass {
    /// Column type for the reduced max / max-all columns.
    pub fn max_column_type(self) -> ColumnType {
        match self {
            Self::Ordinal | Self::Nominal => ColumnType::Text,
            Self::Discrete => ColumnType::Integer,
            Self::Continuous => ColumnType::Double,
        }
    }

    /// Numeric cast applied to raw text values for this class.
    pub fn cast(self) -> NumCast {
        match self {
            Self::Discrete => NumCast::Int,
            _ => NumCast::Double,
        }
    }
}

/// Comparison operator for discrete/continuous hazards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
}

impl CmpOp {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            "=" => Some(Self::Eq),
            _ => None,
        }
    }
    /// "Greater" operators reduce to the largest value, all others to the
    /// smallest.
    pub fn direction(self) -> Direction {
        match self {
            Self::Gt | Self::Ge => Direction::Desc,
            _ => Direction::Asc,
        }
    }
    pub fn applies(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => value > threshold,
            Self::Ge => value >= threshold,
            Self::Lt => value < threshold,
            Self::Le => value <= threshold,
            Self::Eq => value == threshold,
        }
    }
}

impl std::fmt::Display for CmpOp {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Gt => write!(f, ">"),
            Self::Ge => write!(f, ">="),
            Self::Lt => write!(f, "<"),
            Self::Le => write!(f, "<="),
            Self::Eq => write!(f, "="),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// Cast used when raw text values are compared or reduced numerically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumCast {
    Int,
    Double,
}

/// Ordering metadata: a ranked list for ordinal hazards, a membership list
/// for nominal hazards, or a literal comparison operator for
/// discrete/continuous ones.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ValueOrder {
    Ranked(Vec<String>),
    Operator(String),
}

/// Threshold: a single rank (ordinal), a membership set (nominal), or a
/// number (discrete/continuous).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Threshold {
    Number(f64),
    Rank(String),
    Members(Vec<String>),
}

/// Row-level filter derived from a hazard definition: either membership in
/// an allow-set, or a numeric comparison against the threshold.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterRule {
    AnyOf(Vec<String>),
    Compare {
        op: CmpOp,
        threshold: f64,
        cast: NumCast,
    },
}

/// Array-to-scalar reduction derived from a hazard definition.
///
/// Nominal reduction is a comma-joined concatenation of every element, not
/// a maximum under any ordering. Published schemas depend on it, so the
/// behavior is kept as-is.
#[derive(Debug, Clone, PartialEq)]
pub enum ReducePlan {
    OrdinalRank(Vec<String>),
    Concat,
    Numeric { direction: Direction, cast: NumCast },
}

/// One hazard layer to intersect against: where it lives, which field
/// carries the hazard value, and how those values compare.
///
/// Immutable once loaded from configuration.
#[derive(Debug, Clone)]
pub struct HazardDefinition {
    pub source_table: String,
    pub geometry_column: String,
    pub value_field: String,
    pub class: ValueClass,
    pub order: ValueOrder,
    pub threshold: Threshold,
}

impl HazardDefinition {
    /// Shape check run at configuration load. The ordinal threshold
    /// membership check is deliberately NOT here; it is an operation-time
    /// error scoped to the filter stage.
    pub fn validate(&self, name: &str) -> Result<()> {
        let bad = |what: &str| {
            Err(Error::Config(format!(
                "hazard {}: {} for {:?} classification",
                name, what, self.class
            )))
        };
        match self.class {
            ValueClass::Ordinal => match (&self.order, &self.threshold) {
                (ValueOrder::Ranked(_), Threshold::Rank(_)) => Ok(()),
                _ => bad("expected a ranked value order and a single rank threshold"),
            },
            ValueClass::Nominal => match &self.threshold {
                Threshold::Members(_) => Ok(()),
                _ => bad("expected a membership list threshold"),
            },
            ValueClass::Discrete | ValueClass::Continuous => match (&self.order, &self.threshold) {
                (ValueOrder::Operator(op), Threshold::Number(_)) => match CmpOp::parse(op) {
                    Some(_) => Ok(()),
                    None => Err(Error::Config(format!(
                        "hazard {}: unknown comparison operator '{}'",
                        name, op
                    ))),
                },
                _ => bad("expected an operator value order and a numeric threshold"),
            },
        }
    }

    /// Derive the threshold filter for this hazard. For ordinal hazards the
    /// passing set is every rank at or above the threshold's position.
    pub fn filter_rule(&self) -> Result<FilterRule> {
        match (self.class, &self.order, &self.threshold) {
            (ValueClass::Ordinal, ValueOrder::Ranked(order), Threshold::Rank(rank)) => {
                let at = order.iter().position(|v| v == rank).ok_or_else(|| {
                    Error::ThresholdNotInOrder {
                        field: self.value_field.clone(),
                        threshold: rank.clone(),
                    }
                })?;
                Ok(FilterRule::AnyOf(order[at..].to_vec()))
            }
            (ValueClass::Nominal, _, Threshold::Members(members)) => {
                Ok(FilterRule::AnyOf(members.clone()))
            }
            (
                ValueClass::Discrete | ValueClass::Continuous,
                ValueOrder::Operator(op),
                Threshold::Number(threshold),
            ) => {
                let op = CmpOp::parse(op)
                    .ok_or_else(|| Error::Config(format!("unknown operator '{}'", op)))?;
                Ok(FilterRule::Compare {
                    op,
                    threshold: *threshold,
                    cast: self.class.cast(),
                })
            }
            _ => Err(Error::Config(format!(
                "hazard field {} has mismatched classification and order/threshold shapes",
                self.value_field
            ))),
        }
    }

    /// Derive the max reduction for this hazard.
    pub fn reduce_plan(&self) -> Result<ReducePlan> {
        match (self.class, &self.order) {
            (ValueClass::Ordinal, ValueOrder::Ranked(order)) => {
                Ok(ReducePlan::OrdinalRank(order.clone()))
            }
            (ValueClass::Nominal, _) => Ok(ReducePlan::Concat),
            (ValueClass::Discrete | ValueClass::Continuous, ValueOrder::Operator(op)) => {
                let op = CmpOp::parse(op)
                    .ok_or_else(|| Error::Config(format!("unknown operator '{}'", op)))?;
                Ok(ReducePlan::Numeric {
                    direction: op.direction(),
                    cast: self.class.cast(),
                })
            }
            _ => Err(Error::Config(format!(
                "hazard field {} has mismatched classification and order shapes",
                self.value_field
            ))),
        }
    }
}

/// All hazard definitions known to the pipeline, keyed by hazard name.
#[derive(Debug, Clone, Default)]
pub struct HazardRegistry {
    hazards: BTreeMap<String, HazardDefinition>,
}

impl HazardRegistry {
    pub fn new(hazards: BTreeMap<String, HazardDefinition>) -> Self {
        Self { hazards }
    }
    pub fn get(&self, name: &str) -> Option<&HazardDefinition> {
        self.hazards.get(name)
    }
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.hazards.keys()
    }
    pub fn len(&self) -> usize {
        self.hazards.len()
    }
    pub fn is_empty(&self) -> bool {
        self.hazards.is_empty()
    }
}

/// The five per-hazard column-name suffixes, injected from configuration so
/// that every intersection table names its derived columns consistently.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnSuffixes {
    pub intersect_col: String,
    pub haz_vals_col: String,
    pub max_col: String,
    pub max_all_col: String,
    pub bool_col: String,
}

impl ColumnSuffixes {
    /// Derived column names for one hazard: `<hazard><suffix>`.
    pub fn columns(&self, hazard: &str) -> HazardColumns {
        HazardColumns {
            intersect: format!("{}{}", hazard, self.intersect_col),
            values: format!("{}{}", hazard, self.haz_vals_col),
            max: format!("{}{}", hazard, self.max_col),
            max_all: format!("{}{}", hazard, self.max_all_col),
            flag: format!("{}{}", hazard, self.bool_col),
        }
    }
}

/// Concrete derived-column names for one hazard on one intersection table.
#[derive(Debug, Clone)]
pub struct HazardColumns {
    pub intersect: String,
    pub values: String,
    pub max: String,
    pub max_all: String,
    pub flag: String,
}
