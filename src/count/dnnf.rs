//! Exhaustive DPLL compilation into decision-DNNF and weighted counting on the result.

use super::LevelFormula;
use crate::literal::{Literal, Variable};
use crate::utils::statistics::{SolverEvent, SolverPhase, Statistics};
use rustc_hash::FxHashMap;

pub type NodeId = usize;

const FALSE: NodeId = 0;
const TRUE: NodeId = 1;

#[derive(Debug, Clone, PartialEq)]
enum Node {
    False,
    True,
    Lit(Literal),
    And(Vec<NodeId>),
    /// `(var ∧ hi) ∨ (¬var ∧ lo)`
    Decision {
        var: Variable,
        hi: NodeId,
        lo: NodeId,
    },
}

/// A decision-DNNF, children are always created before their parents.
#[derive(Debug, Clone)]
pub struct Dnnf {
    nodes: Vec<Node>,
    root: NodeId,
    num_vars: usize,
}

impl Dnnf {
    pub fn compile(num_vars: usize, clauses: &[Vec<Literal>]) -> Dnnf {
        let mut compiler = Compiler {
            nodes: vec![Node::False, Node::True],
            cache: FxHashMap::default(),
        };
        let mut normalized = Vec::with_capacity(clauses.len());
        for clause in clauses {
            let mut clause = clause.clone();
            clause.sort();
            clause.dedup();
            if clause.windows(2).any(|w| w[0].variable() == w[1].variable()) {
                continue;
            }
            normalized.push(clause);
        }
        let root = compiler.compile(normalized);
        Dnnf {
            nodes: compiler.nodes,
            root,
            num_vars,
        }
    }

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_vars(&self) -> usize {
        self.num_vars
    }

    /// Weighted model count, `weights[v] = (weight of v, weight of ¬v)`.
    ///
    /// Variables that vanish on a path contribute the factor 1, thus the weights of such
    /// variables have to sum up to 1.
    pub fn weighted_count(&self, weights: &[(f64, f64)]) -> f64 {
        let weight = |literal: Literal| {
            let (pos, neg) = weights[literal.variable() as usize];
            if literal.signed() {
                neg
            } else {
                pos
            }
        };
        let mut values = vec![0.0; self.nodes.len()];
        for (id, node) in self.nodes.iter().enumerate() {
            values[id] = match node {
                Node::False => 0.0,
                Node::True => 1.0,
                Node::Lit(literal) => weight(*literal),
                Node::And(children) => children.iter().map(|&c| values[c]).product(),
                Node::Decision { var, hi, lo } => {
                    let (pos, neg) = weights[*var as usize];
                    pos * values[*hi] + neg * values[*lo]
                }
            };
        }
        values[self.root]
    }
}

struct Compiler {
    nodes: Vec<Node>,
    /// Compiled components, clauses sorted.
    cache: FxHashMap<Vec<Vec<Literal>>, NodeId>,
}

impl Compiler {
    fn add(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn conjoin(&mut self, children: Vec<NodeId>) -> NodeId {
        if children.contains(&FALSE) {
            return FALSE;
        }
        let mut children: Vec<NodeId> = children.into_iter().filter(|&c| c != TRUE).collect();
        match children.len() {
            0 => TRUE,
            1 => children.pop().unwrap_or(TRUE),
            _ => self.add(Node::And(children)),
        }
    }

    fn compile(&mut self, clauses: Vec<Vec<Literal>>) -> NodeId {
        let (units, residual) = match propagate(clauses) {
            Some(result) => result,
            None => return FALSE,
        };
        let mut children: Vec<NodeId> = units
            .into_iter()
            .map(|l| self.add(Node::Lit(l)))
            .collect();
        for component in components(residual) {
            let node = self.compile_component(component);
            if node == FALSE {
                return FALSE;
            }
            children.push(node);
        }
        self.conjoin(children)
    }

    fn compile_component(&mut self, mut clauses: Vec<Vec<Literal>>) -> NodeId {
        clauses.sort();
        if let Some(&node) = self.cache.get(&clauses) {
            return node;
        }
        let var = branch_variable(&clauses);
        let hi = self.compile(condition(&clauses, Literal::new(var, false)));
        let lo = self.compile(condition(&clauses, Literal::new(var, true)));
        let node = if hi == FALSE && lo == FALSE {
            FALSE
        } else {
            self.add(Node::Decision { var, hi, lo })
        };
        self.cache.insert(clauses, node);
        node
    }
}

/// Removes satisfied clauses and falsified literals.
fn condition(clauses: &[Vec<Literal>], literal: Literal) -> Vec<Vec<Literal>> {
    clauses
        .iter()
        .filter(|c| !c.contains(&literal))
        .map(|c| c.iter().cloned().filter(|&l| l != -literal).collect())
        .collect()
}

/// Unit propagation, `None` on conflict.
fn propagate(mut clauses: Vec<Vec<Literal>>) -> Option<(Vec<Literal>, Vec<Vec<Literal>>)> {
    let mut units = Vec::new();
    loop {
        if clauses.iter().any(|c| c.is_empty()) {
            return None;
        }
        let unit = match clauses.iter().find(|c| c.len() == 1) {
            Some(c) => c[0],
            None => break,
        };
        units.push(unit);
        clauses = condition(&clauses, unit);
    }
    Some((units, clauses))
}

fn find(parent: &mut FxHashMap<Variable, Variable>, var: Variable) -> Variable {
    let next = *parent.entry(var).or_insert(var);
    if next == var {
        return var;
    }
    let root = find(parent, next);
    parent.insert(var, root);
    root
}

/// Partitions clauses into variable-disjoint components.
fn components(clauses: Vec<Vec<Literal>>) -> Vec<Vec<Vec<Literal>>> {
    let mut parent: FxHashMap<Variable, Variable> = FxHashMap::default();
    for clause in &clauses {
        for pair in clause.windows(2) {
            let a = find(&mut parent, pair[0].variable());
            let b = find(&mut parent, pair[1].variable());
            if a != b {
                parent.insert(a, b);
            }
        }
    }
    let mut index: FxHashMap<Variable, usize> = FxHashMap::default();
    let mut components: Vec<Vec<Vec<Literal>>> = Vec::new();
    for clause in clauses {
        let root = find(&mut parent, clause[0].variable());
        let next = components.len();
        let i = *index.entry(root).or_insert(next);
        if i == next {
            components.push(Vec::new());
        }
        components[i].push(clause);
    }
    components
}

/// Most frequent variable, ties broken by the smaller id.
fn branch_variable(clauses: &[Vec<Literal>]) -> Variable {
    let mut occurrences: FxHashMap<Variable, usize> = FxHashMap::default();
    for literal in clauses.iter().flat_map(|c| c.iter()) {
        *occurrences.entry(literal.variable()).or_insert(0) += 1;
    }
    let mut best: Option<(usize, Variable)> = None;
    for (&var, &count) in &occurrences {
        best = match best {
            Some((c, v)) if c > count || (c == count && v < var) => Some((c, v)),
            _ => Some((count, var)),
        };
    }
    match best {
        Some((_, var)) => var,
        None => panic!("branching on an empty component"),
    }
}

/// Weighted counting on a compiled level formula. Region clauses are compiled with an
/// enable variable each; queries enable the compiled clauses they contain and handle
/// the remaining ones by inclusion-exclusion over their negations (cubes).
pub struct CompiledCounter {
    /// Uncompiled clauses handled per query, each costing a factor of two in weighted
    /// counts. More pending clauses than this recompile the whole formula from scratch.
    max_pending: usize,
    dnnf: Option<Dnnf>,
    enables: FxHashMap<Vec<Literal>, Variable>,
    num_vars: usize,
}

impl CompiledCounter {
    pub fn new(max_pending: usize) -> CompiledCounter {
        CompiledCounter {
            max_pending,
            dnnf: None,
            enables: FxHashMap::default(),
            num_vars: 0,
        }
    }

    /// Compiles the level formula together with `clauses`, each guarded by an enable variable.
    pub fn compile_cnf_to_nnf(
        &mut self,
        formula: &LevelFormula,
        clauses: &[Vec<Literal>],
        stats: &mut Statistics,
    ) {
        let _timer = stats.start(SolverPhase::Counting);
        stats.inc(SolverEvent::Compilation);
        let mut cnf = formula.clauses().to_vec();
        let mut enables = FxHashMap::default();
        let mut next = formula.num_vars() as Variable + 1;
        for clause in clauses {
            if enables.contains_key(clause) {
                continue;
            }
            let mut guarded = vec![Literal::new(next, true)];
            guarded.extend_from_slice(clause);
            cnf.push(guarded);
            enables.insert(clause.clone(), next);
            next += 1;
        }
        self.num_vars = next as usize - 1;
        let dnnf = Dnnf::compile(self.num_vars, &cnf);
        debug!(
            "compiled level {} with {} guarded clauses into {} nodes",
            formula.level(),
            enables.len(),
            dnnf.size()
        );
        self.dnnf = Some(dnnf);
        self.enables = enables;
    }

    /// Formula weights with every enable variable switched off.
    fn base_weights(&self, formula: &LevelFormula) -> Vec<(f64, f64)> {
        let mut weights = formula.weights().to_vec();
        weights.resize(self.num_vars + 1, (0.0, 1.0));
        weights
    }

    fn count(&self, weights: &[(f64, f64)]) -> f64 {
        match &self.dnnf {
            Some(dnnf) => dnnf.weighted_count(weights),
            None => panic!("counting before compilation"),
        }
    }

    /// Weight of the assignments satisfying the formula and all `clauses`. Recompiles
    /// once more than `max_pending` of them are not compiled yet.
    pub fn incre_calculate_prob(
        &mut self,
        formula: &LevelFormula,
        clauses: &[Vec<Literal>],
        stats: &mut Statistics,
    ) -> f64 {
        stats.inc(SolverEvent::WmcCall);
        if self.dnnf.is_none() {
            self.compile_cnf_to_nnf(formula, clauses, stats);
        }
        let mut pending: Vec<&Vec<Literal>> = clauses
            .iter()
            .filter(|c| !self.enables.contains_key(*c))
            .collect();
        pending.sort();
        pending.dedup();
        if pending.len() > self.max_pending {
            self.compile_cnf_to_nnf(formula, clauses, stats);
            pending.clear();
        }
        let _timer = stats.start(SolverPhase::Counting);
        let mut weights = self.base_weights(formula);
        for clause in clauses {
            if let Some(&enable) = self.enables.get(clause) {
                weights[enable as usize] = (1.0, 0.0);
            }
        }
        let mut total = 0.0;
        for mask in 0..(1usize << pending.len()) {
            let mut cube: Vec<Literal> = Vec::new();
            for (j, clause) in pending.iter().enumerate() {
                if mask & (1 << j) != 0 {
                    cube.extend(clause.iter().map(|&l| -l));
                }
            }
            let mut term_weights = weights.clone();
            if !force(&mut term_weights, &cube) {
                continue;
            }
            let term = self.count(&term_weights);
            if mask.count_ones() % 2 == 0 {
                total += term;
            } else {
                total -= term;
            }
        }
        total
    }

    /// Weight of the assignments of the level formula (without region clauses) that
    /// satisfy the cube. Cube literals must have weight 1.
    pub fn assump_level_wmc(
        &mut self,
        formula: &LevelFormula,
        cube: &[Literal],
        stats: &mut Statistics,
    ) -> f64 {
        stats.inc(SolverEvent::AssumptionWmcCall);
        if self.dnnf.is_none() {
            self.compile_cnf_to_nnf(formula, &[], stats);
        }
        let _timer = stats.start(SolverPhase::Counting);
        let mut weights = self.base_weights(formula);
        if !force(&mut weights, cube) {
            return 0.0;
        }
        self.count(&weights)
    }
}

/// Restricts the weights to the cube, false if the cube is contradictory.
fn force(weights: &mut [(f64, f64)], cube: &[Literal]) -> bool {
    let mut forced: FxHashMap<Variable, bool> = FxHashMap::default();
    for &literal in cube {
        let var = literal.variable();
        let value = !literal.signed();
        if let Some(&previous) = forced.get(&var) {
            if previous != value {
                return false;
            }
            continue;
        }
        forced.insert(var, value);
        let (pos, neg) = weights[var as usize];
        weights[var as usize] = if value { (pos, 0.0) } else { (0.0, neg) };
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clauses(cnf: &[&[i32]]) -> Vec<Vec<Literal>> {
        cnf.iter()
            .map(|c| c.iter().map(|&l| Literal::from(l)).collect())
            .collect()
    }

    /// Brute force over all assignments of `num_vars` variables.
    fn brute_force(num_vars: usize, cnf: &[Vec<Literal>], weights: &[(f64, f64)]) -> f64 {
        let mut total = 0.0;
        for bits in 0..(1usize << num_vars) {
            let assignment: Vec<Option<bool>> = (0..=num_vars)
                .map(|v| if v == 0 { None } else { Some(bits & (1 << (v - 1)) != 0) })
                .collect();
            if cnf.iter().all(|c| c.iter().any(|l| l.holds(&assignment))) {
                let mut weight = 1.0;
                for v in 1..=num_vars {
                    let (pos, neg) = weights[v];
                    weight *= if assignment[v] == Some(true) { pos } else { neg };
                }
                total += weight;
            }
        }
        total
    }

    #[test]
    fn weighted_count_matches_enumeration() {
        let cnf = clauses(&[&[1, 2], &[-1, 3]]);
        let weights = vec![(0.0, 0.0), (0.3, 0.7), (0.6, 0.4), (0.2, 0.8)];
        let dnnf = Dnnf::compile(3, &cnf);
        let count = dnnf.weighted_count(&weights);
        assert!((count - 0.48).abs() < 1e-9);
        assert!((count - brute_force(3, &cnf, &weights)).abs() < 1e-9);
    }

    #[test]
    fn components_are_independent() {
        let cnf = clauses(&[&[1, 2], &[3, 4], &[-2, -5, 6]]);
        let weights = vec![(0.0, 0.0); 7]
            .into_iter()
            .enumerate()
            .map(|(v, w)| if v == 0 { w } else { (0.5, 0.5) })
            .collect::<Vec<_>>();
        let dnnf = Dnnf::compile(6, &cnf);
        let count = dnnf.weighted_count(&weights);
        assert!((count - brute_force(6, &cnf, &weights)).abs() < 1e-9);
    }

    #[test]
    fn conflicting_units() {
        let cnf = clauses(&[&[1], &[-1, 2], &[-2]]);
        let dnnf = Dnnf::compile(2, &cnf);
        assert_eq!(dnnf.weighted_count(&[(0.0, 0.0), (0.5, 0.5), (0.5, 0.5)]), 0.0);
        let empty = Dnnf::compile(2, &clauses(&[&[]]));
        assert_eq!(empty.weighted_count(&[(0.0, 0.0), (0.5, 0.5), (0.5, 0.5)]), 0.0);
    }

    #[test]
    fn forcing() {
        let mut weights = vec![(0.0, 0.0), (0.3, 0.7), (1.0, 1.0)];
        assert!(force(&mut weights, &[Literal::from(-1), Literal::from(2)]));
        assert_eq!(weights[1], (0.0, 0.7));
        assert_eq!(weights[2], (1.0, 0.0));
        assert!(!force(&mut weights, &[Literal::from(2), Literal::from(-2)]));
    }
}
