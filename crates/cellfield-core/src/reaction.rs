//! Reactions as data: stoichiometry plus a product of independent kinetic factors.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Variable values handed to kinetic factors, keyed by variable name.
pub type VariableMap = HashMap<String, f64>;

/// Opaque rate law supplied by an external expression evaluator.
pub trait RateExpression: fmt::Debug + Send + Sync {
    /// Names of the variables the expression reads.
    fn variables(&self) -> Vec<String>;

    /// Evaluate the expression; absent variables read as zero.
    fn evaluate(&self, variables: &VariableMap) -> f64;
}

/// One multiplicative term of a reaction rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KineticFactor {
    /// Constant rate coefficient.
    Constant { k: f64 },
    /// Linear in a variable.
    FirstOrder { variable: String },
    /// Saturating uptake `v / (K + v)`.
    Monod {
        variable: String,
        half_saturation: f64,
    },
    /// Non-competitive inhibition `K / (K + v)`.
    Inhibition { variable: String, constant: f64 },
    /// User-defined rate law; built in code, never read from configuration.
    #[serde(skip)]
    Expression(Arc<dyn RateExpression>),
}

impl KineticFactor {
    /// Names of variables this factor reads.
    #[must_use]
    pub fn variables(&self) -> Vec<String> {
        match self {
            KineticFactor::Constant { .. } => Vec::new(),
            KineticFactor::FirstOrder { variable }
            | KineticFactor::Monod { variable, .. }
            | KineticFactor::Inhibition { variable, .. } => vec![variable.clone()],
            KineticFactor::Expression(expression) => expression.variables(),
        }
    }

    /// Value of the factor for the given variables.
    #[must_use]
    pub fn evaluate(&self, variables: &VariableMap) -> f64 {
        let read = |name: &str| variables.get(name).copied().unwrap_or(0.0);
        match self {
            KineticFactor::Constant { k } => *k,
            KineticFactor::FirstOrder { variable } => read(variable),
            KineticFactor::Monod {
                variable,
                half_saturation,
            } => saturating(read(variable), *half_saturation),
            KineticFactor::Inhibition { variable, constant } => {
                let denominator = constant + read(variable);
                if denominator == 0.0 {
                    0.0
                } else {
                    constant / denominator
                }
            }
            KineticFactor::Expression(expression) => expression.evaluate(variables),
        }
    }
}

fn saturating(value: f64, half_saturation: f64) -> f64 {
    let denominator = half_saturation + value;
    if denominator == 0.0 {
        0.0
    } else {
        value / denominator
    }
}

/// A reaction: participants with signed coefficients and a rate law.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reaction {
    name: String,
    stoichiometry: BTreeMap<String, f64>,
    kinetics: Vec<KineticFactor>,
}

impl Reaction {
    pub fn new(
        name: impl Into<String>,
        stoichiometry: impl IntoIterator<Item = (String, f64)>,
        kinetics: Vec<KineticFactor>,
    ) -> Self {
        Self {
            name: name.into(),
            stoichiometry: stoichiometry.into_iter().collect(),
            kinetics,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn stoichiometry(&self) -> &BTreeMap<String, f64> {
        &self.stoichiometry
    }

    #[must_use]
    pub fn kinetics(&self) -> &[KineticFactor] {
        &self.kinetics
    }

    /// Coefficient of `participant`, zero when it takes no part.
    #[must_use]
    pub fn coefficient(&self, participant: &str) -> f64 {
        self.stoichiometry.get(participant).copied().unwrap_or(0.0)
    }

    /// Union of all variable names read by the kinetic factors.
    #[must_use]
    pub fn variables(&self) -> BTreeSet<String> {
        self.kinetics
            .iter()
            .flat_map(KineticFactor::variables)
            .collect()
    }

    /// Reaction rate: the product of every kinetic factor.
    #[must_use]
    pub fn rate(&self, variables: &VariableMap) -> f64 {
        self.kinetics
            .iter()
            .map(|factor| factor.evaluate(variables))
            .product()
    }

    /// Net production of one participant at the given variables.
    #[must_use]
    pub fn production_rate(&self, variables: &VariableMap, participant: &str) -> f64 {
        self.rate(variables) * self.coefficient(participant)
    }

    /// Stoichiometry scaled by the evaluated rate.
    #[must_use]
    pub fn fluxes(&self, variables: &VariableMap) -> BTreeMap<String, f64> {
        let rate = self.rate(variables);
        self.stoichiometry
            .iter()
            .map(|(name, coefficient)| (name.clone(), rate * coefficient))
            .collect()
    }
}
