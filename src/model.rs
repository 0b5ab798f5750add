//! The output of symbolic generation: a flat DAE ready for a numerical
//! backend, partitioned the way the reference implementation partitions its
//! own `Model` — by declared prefix, into states/algebraics/parameters/
//! constants/inputs/outputs, plus the equation and initial-equation lists.

use indexmap::IndexMap;
use serde::Serialize;

use crate::kernel::{self, Sym};

/// One partitioned model variable. `symbol` is the kernel handle used in
/// every equation that references it; the rest mirror the attributes a
/// `Symbol` carried through flattening.
#[derive(Debug, Clone, Serialize)]
pub struct Variable {
    pub name: String,
    #[serde(skip)]
    pub symbol: Sym,
    pub start: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub nominal: Option<f64>,
    pub fixed: bool,
    pub prefixes: Vec<String>,
}

/// A `delay(x, delay_time)` call site, recorded so a numerical backend can
/// allocate a delay buffer: `name` is the synthesized input symbol
/// (`"<origin_name>_delayed_<delay_time>"`), `origin_name` the delayed
/// variable.
#[derive(Debug, Clone, Serialize)]
pub struct DelayedState {
    pub name: String,
    pub origin_name: String,
    pub delay_time: f64,
}

/// The flat, generated model: every variable partitioned by kind, every
/// equation in residual form (`lhs - rhs = 0`), ready for a numerical
/// solver to consume.
#[derive(Debug, Clone, Serialize)]
pub struct Model {
    #[serde(skip)]
    pub time: Sym,
    pub states: Vec<Variable>,
    pub der_states: Vec<Variable>,
    pub algebraics: Vec<Variable>,
    pub inputs: Vec<Variable>,
    pub outputs: Vec<Variable>,
    pub parameters: Vec<Variable>,
    pub constants: Vec<Variable>,
    #[serde(skip)]
    pub equations: Vec<Sym>,
    #[serde(skip)]
    pub initial_equations: Vec<Sym>,
    pub delayed_states: Vec<DelayedState>,
    /// Symbol names that turned out to be trivially equal to another symbol
    /// and were eliminated, recorded for diagnostics: `alias -> canonical`.
    pub aliases: IndexMap<String, String>,
}

impl Default for Model {
    fn default() -> Self {
        Model {
            time: kernel::symbol("time"),
            states: Vec::new(),
            der_states: Vec::new(),
            algebraics: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            parameters: Vec::new(),
            constants: Vec::new(),
            equations: Vec::new(),
            initial_equations: Vec::new(),
            delayed_states: Vec::new(),
            aliases: IndexMap::new(),
        }
    }
}

impl Model {
    pub fn variable_count(&self) -> usize {
        self.states.len() + self.algebraics.len() + self.inputs.len() + self.outputs.len() + self.parameters.len() + self.constants.len()
    }
}
