//! Weighted model counting over the random variables of a level.
//!
//! The value of a random level is assembled from regions: every region is described
//! by a clause over the `t` variables of the level (the assignments outside the region
//! satisfy it) and carries the value of the subgame in that region.

use crate::literal::{Literal, Variable};
use crate::matrix::groups::{GroupId, Groups};
use crate::matrix::Matrix;
use crate::solve::encoding::{get_group, get_select, EncGrp};
use crate::solve::{SolverOptions, EPSILON};
use crate::utils::statistics::Statistics;
use rustc_hash::FxHashMap;

pub mod bdd;
pub mod dnnf;

pub use bdd::DisjointCubeCounter;
pub use dnnf::CompiledCounter;

/// Weighted CNF of a random level: the level variables weighted by their
/// probabilities and one `t` variable per group, defined by `t ↔ ∧¬projection`.
///
/// Variables are renumbered from 1. The weights of every variable sum to 1 except for
/// the `t` variables which are weighted `(1, 1)`, they are functionally defined.
#[derive(Debug, Clone)]
pub struct LevelFormula {
    qlev: usize,
    num_vars: usize,
    weights: Vec<(f64, f64)>,
    clauses: Vec<Vec<Literal>>,
    xmap: FxHashMap<Variable, Variable>,
    tmap: FxHashMap<GroupId, Variable>,
}

impl LevelFormula {
    pub fn new(matrix: &Matrix, groups: &Groups, qlev: usize) -> LevelFormula {
        let mut formula = LevelFormula {
            qlev,
            num_vars: 0,
            weights: vec![(0.0, 0.0)],
            clauses: Vec::new(),
            xmap: FxHashMap::default(),
            tmap: FxHashMap::default(),
        };
        for &var in &matrix.prefix.level(qlev).variables {
            let p = matrix.prefix.probability_of(var);
            let local = formula.new_var((p, 1.0 - p));
            formula.xmap.insert(var, local);
        }
        for &g in groups.at_level(qlev) {
            let t = formula.new_var((1.0, 1.0));
            formula.tmap.insert(g, t);
            let t = Literal::new(t, false);
            let mut definition = vec![t];
            for &literal in &groups.group(g).projection {
                let local = formula.x_literal(literal);
                formula.clauses.push(vec![-t, -local]);
                definition.push(local);
            }
            definition.sort();
            formula.clauses.push(definition);
        }
        formula
    }

    fn new_var(&mut self, weight: (f64, f64)) -> Variable {
        self.num_vars += 1;
        self.weights.push(weight);
        self.num_vars as Variable
    }

    fn x_literal(&self, literal: Literal) -> Literal {
        match self.xmap.get(&literal.variable()) {
            Some(&local) => Literal::new(local, literal.signed()),
            None => panic!(
                "literal {} does not belong to level {}",
                literal, self.qlev
            ),
        }
    }

    pub fn level(&self) -> usize {
        self.qlev
    }

    pub fn num_vars(&self) -> usize {
        self.num_vars
    }

    /// Weights indexed by variable, `(weight of v, weight of ¬v)`.
    pub fn weights(&self) -> &[(f64, f64)] {
        &self.weights
    }

    /// The `t` definitions.
    pub fn clauses(&self) -> &[Vec<Literal>] {
        &self.clauses
    }

    pub fn t_literal(&self, group: GroupId) -> Literal {
        match self.tmap.get(&group) {
            Some(&t) => Literal::new(t, false),
            None => panic!("group {} does not belong to level {}", group, self.qlev),
        }
    }

    /// Translates a selection clause into a clause over `t`. A group with dead parent
    /// is never selected, so its positive entries are dropped and a negative entry
    /// satisfies the clause (`None`).
    pub fn translate<F>(&self, clause: &[EncGrp], parent_alive: F) -> Option<Vec<Literal>>
    where
        F: Fn(GroupId) -> bool,
    {
        let mut translated = Vec::with_capacity(clause.len());
        for &enc in clause {
            let group = get_group(enc);
            if parent_alive(group) {
                let t = self.t_literal(group);
                translated.push(if get_select(enc) { t } else { -t });
            } else if !get_select(enc) {
                return None;
            }
        }
        translated.sort();
        translated.dedup();
        Some(translated)
    }

    /// Weighted CNF in the format of the `cachet` counter (`w <var> <weight>` lines,
    /// `-1` for unweighted variables).
    pub fn to_dimacs_weighted(&self, clauses: &[Vec<Literal>]) -> String {
        let mut dimacs = format!(
            "c weighted cnf of random level {}\np cnf {} {}\n",
            self.qlev,
            self.num_vars,
            self.clauses.len() + clauses.len()
        );
        for var in 1..=self.num_vars {
            let (pos, neg) = self.weights[var];
            if (pos + neg - 1.0).abs() < EPSILON {
                dimacs.push_str(&format!("w {} {}\n", var, pos));
            } else {
                dimacs.push_str(&format!("w {} -1\n", var));
            }
        }
        for clause in self.clauses.iter().chain(clauses.iter()) {
            push_clause(&mut dimacs, clause);
        }
        dimacs
    }

    /// Like `to_dimacs_weighted`, but every region clause is guarded by its own enable
    /// variable, numbered after the formula variables in the order of `map`.
    pub fn to_dimacs_cnf_en(&self, map: &ProbMap) -> (String, Vec<Variable>) {
        let regions: Vec<&Vec<Literal>> = map.sorted().into_iter().flat_map(|(_, c)| c).collect();
        let num_vars = self.num_vars + regions.len();
        let mut dimacs = format!(
            "c weighted cnf of random level {} with enabled regions\np cnf {} {}\n",
            self.qlev,
            num_vars,
            self.clauses.len() + regions.len()
        );
        for var in 1..=self.num_vars {
            let (pos, neg) = self.weights[var];
            if (pos + neg - 1.0).abs() < EPSILON {
                dimacs.push_str(&format!("w {} {}\n", var, pos));
            } else {
                dimacs.push_str(&format!("w {} -1\n", var));
            }
        }
        for clause in &self.clauses {
            push_clause(&mut dimacs, clause);
        }
        let mut enables = Vec::with_capacity(regions.len());
        for (i, clause) in regions.into_iter().enumerate() {
            let enable = (self.num_vars + i + 1) as Variable;
            enables.push(enable);
            let mut guarded = vec![Literal::new(enable, true)];
            guarded.extend_from_slice(clause);
            push_clause(&mut dimacs, &guarded);
        }
        (dimacs, enables)
    }
}

fn push_clause(dimacs: &mut String, clause: &[Literal]) {
    for literal in clause {
        dimacs.push_str(&format!("{} ", literal));
    }
    dimacs.push_str("0\n");
}

/// Region clauses of a random level grouped by the value of their region.
#[derive(Debug, Clone, Default)]
pub struct ProbMap {
    entries: Vec<(f64, Vec<Vec<Literal>>)>,
}

impl ProbMap {
    pub fn new() -> ProbMap {
        ProbMap::default()
    }

    pub fn insert(&mut self, prob: f64, clause: Vec<Literal>) {
        match self
            .entries
            .iter_mut()
            .find(|(q, _)| (q - prob).abs() < EPSILON)
        {
            Some((_, clauses)) => clauses.push(clause),
            None => self.entries.push((prob, vec![clause])),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn num_clauses(&self) -> usize {
        self.entries.iter().map(|(_, c)| c.len()).sum()
    }

    /// Entries by descending value.
    pub fn sorted(&self) -> Vec<(f64, &Vec<Vec<Literal>>)> {
        let mut sorted: Vec<(f64, &Vec<Vec<Literal>>)> =
            self.entries.iter().map(|(q, c)| (*q, c)).collect();
        sorted.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        sorted
    }
}

/// Computes the weight of the assignments satisfying a set of clauses over a level formula.
pub trait SelectionCounter {
    /// `None` if the strategy gave up on this query.
    fn satisfied_mass(
        &mut self,
        formula: &LevelFormula,
        clauses: &[Vec<Literal>],
        stats: &mut Statistics,
    ) -> Option<f64>;
}

impl SelectionCounter for CompiledCounter {
    fn satisfied_mass(
        &mut self,
        formula: &LevelFormula,
        clauses: &[Vec<Literal>],
        stats: &mut Statistics,
    ) -> Option<f64> {
        Some(self.incre_calculate_prob(formula, clauses, stats))
    }
}

/// Value of a random level from its regions together with the weight not covered by
/// any region: `Σₖ (qₖ − qₖ₊₁)·(1 − W(C₁ ∧ … ∧ Cₖ))` for values `q₁ > q₂ > …`.
pub fn calculate_prob(
    formula: &LevelFormula,
    map: &ProbMap,
    counter: &mut dyn SelectionCounter,
    stats: &mut Statistics,
) -> Option<(f64, f64)> {
    let sorted = map.sorted();
    let mut clauses: Vec<Vec<Literal>> = Vec::with_capacity(map.num_clauses());
    let mut prob = 0.0;
    let mut uncovered = 1.0;
    for (k, (q, region)) in sorted.iter().enumerate() {
        clauses.extend(region.iter().cloned());
        let satisfied = counter.satisfied_mass(formula, &clauses, stats)?;
        let next = sorted.get(k + 1).map_or(0.0, |e| e.0);
        prob += (q - next) * (1.0 - satisfied);
        uncovered = satisfied;
    }
    Some((prob.max(0.0).min(1.0), uncovered))
}

/// Counting state of one random level.
pub struct LevelCounting {
    pub formula: LevelFormula,
    pub compiled: CompiledCounter,
    pub cube: DisjointCubeCounter,
}

impl LevelCounting {
    pub fn new(
        matrix: &Matrix,
        groups: &Groups,
        qlev: usize,
        options: &SolverOptions,
    ) -> LevelCounting {
        LevelCounting {
            formula: LevelFormula::new(matrix, groups, qlev),
            compiled: CompiledCounter::new(options.max_pending_clauses),
            cube: DisjointCubeCounter::new(options.bdd_node_limit),
        }
    }
}
