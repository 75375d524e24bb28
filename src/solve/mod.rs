use super::dimacs::Dimacs;
use super::matrix::Matrix;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod abstraction;
pub mod analyze;
pub mod cache;
pub mod certificate;
pub mod encoding;
pub mod game;
pub mod qbf;
pub mod ssat;

pub use game::GameSolver;

/// Tolerance used when comparing probabilities.
pub const EPSILON: f64 = 1e-9;

#[derive(Debug, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum SolverResult {
    Satisfiable,
    Unsatisfiable,
    /// Satisfying probability of a stochastic formula.
    Probability(f64),
    Unknown,
}

impl SolverResult {
    pub fn exit_code(&self) -> i32 {
        match *self {
            Self::Satisfiable | Self::Probability(_) => 10,
            Self::Unsatisfiable => 20,
            Self::Unknown => 30,
        }
    }

    pub fn probability(&self) -> Option<f64> {
        match *self {
            Self::Probability(p) => Some(p),
            _ => None,
        }
    }
}

impl Dimacs for SolverResult {
    fn dimacs(&self) -> String {
        match *self {
            Self::Satisfiable => String::from("1"),
            Self::Unsatisfiable => String::from("0"),
            Self::Probability(p) => format!("{}", p),
            Self::Unknown => String::from("-1"),
        }
    }
}

pub trait Solver {
    fn solve(&mut self) -> SolverResult;
}

/// Weighted model counting strategy used for random levels.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum CounterKind {
    /// Incrementally maintained decision-DNNF.
    Compiled,
    /// Disjoint cube cover obtained from a BDD of the covered region.
    DisjointCube,
}

impl CounterKind {
    pub fn values() -> &'static [&'static str] {
        &["compiled", "cube"]
    }

    pub fn other(self) -> CounterKind {
        match self {
            CounterKind::Compiled => CounterKind::DisjointCube,
            CounterKind::DisjointCube => CounterKind::Compiled,
        }
    }
}

impl FromStr for CounterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<CounterKind, String> {
        match s {
            "compiled" => Ok(CounterKind::Compiled),
            "cube" => Ok(CounterKind::DisjointCube),
            _ => Err(format!("unknown counter `{}`", s)),
        }
    }
}

impl fmt::Display for CounterKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CounterKind::Compiled => write!(f, "compiled"),
            CounterKind::DisjointCube => write!(f, "cube"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverOptions {
    pub counter: CounterKind,
    pub cache: bool,
    pub minimize_cores: bool,
    /// Maximal number of SAT calls spent on minimizing a single core.
    pub minimize_limit: usize,
    pub push_unsat_core: bool,
    pub partial_pruning: bool,
    /// Number of disabled session clauses (SSAT) or solve calls (QBF) after which
    /// a level abstraction is rebuilt, `0` disables recycling.
    pub recycle_limit: usize,
    pub universal_reduction: bool,
    pub verify_counting: bool,
    /// Pending clauses handled by inclusion-exclusion before the counter recompiles.
    pub max_pending_clauses: usize,
    pub bdd_node_limit: usize,
    /// Wall-clock budget in seconds.
    pub timeout: Option<u64>,
    pub max_backtracks: Option<usize>,
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions {
            counter: CounterKind::Compiled,
            cache: true,
            minimize_cores: true,
            minimize_limit: 64,
            push_unsat_core: true,
            partial_pruning: true,
            recycle_limit: 0,
            universal_reduction: true,
            verify_counting: false,
            max_pending_clauses: 4,
            bdd_node_limit: 1 << 20,
            timeout: None,
            max_backtracks: None,
        }
    }
}

impl SolverOptions {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Applies the formula transformations enabled by `options` before solving.
///
/// Universal reduction is only applied to QBF and never when certificates are produced,
/// as the certificates refer to the unreduced matrix.
pub fn prepare_matrix(matrix: &mut Matrix, options: &SolverOptions, certify: bool) {
    if options.universal_reduction && !certify && !matrix.is_stochastic() {
        matrix.reduce_universal();
    }
}
