//! Narrow interface to the elementary SAT engine that realizes a level abstraction.

use super::*;
use cryptominisat::{Lbool, Lit, Solver};

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SolveResult {
    Sat,
    Unsat,
    /// The engine gave up, e.g., because it was interrupted.
    Unknown,
}

pub trait SatEngine {
    fn new() -> Self
    where
        Self: Sized;

    /// Makes sure every variable up to (and including) `max_id` exists.
    fn new_variables(&mut self, max_id: Variable);

    /// Allocates a fresh variable with the next free id.
    fn new_var(&mut self) -> Variable;

    fn num_vars(&self) -> Variable;

    /// Adds a permanent clause, returns false if the engine became inconsistent.
    fn add_clause(&mut self, clause: &[Literal]) -> bool;

    fn solve(&mut self, assumptions: &[Literal]) -> SolveResult;

    /// Value of `var` in the model of the last satisfiable call; total on allocated variables.
    fn value(&self, var: Variable) -> bool;

    /// Variables of the assumptions responsible for the last unsatisfiable call.
    fn failed(&self) -> Vec<Variable>;

    /// Hint that `var` was involved in a conflict.
    fn bump(&mut self, _var: Variable) {}
}

/// Adapter around CryptoMiniSat.
///
/// Variable `i` of the interface is the `i`-th allocated engine variable; id 0 is
/// allocated but never used so that ids coincide with DIMACS variables.
pub struct CryptoMiniSat {
    solver: Solver,
    vars: Vec<Lit>,
}

impl CryptoMiniSat {
    fn lit(&self, literal: Literal) -> Lit {
        let var = self.vars[literal.variable() as usize];
        if literal.signed() {
            !var
        } else {
            var
        }
    }
}

impl SatEngine for CryptoMiniSat {
    fn new() -> Self {
        let mut solver = Solver::new();
        solver.set_num_threads(1);
        let zero = solver.new_var();
        CryptoMiniSat {
            solver,
            vars: vec![zero],
        }
    }

    fn new_variables(&mut self, max_id: Variable) {
        while self.num_vars() <= max_id {
            self.new_var();
        }
    }

    fn new_var(&mut self) -> Variable {
        let lit = self.solver.new_var();
        debug_assert_eq!(lit.var() as usize, self.vars.len());
        self.vars.push(lit);
        (self.vars.len() - 1) as Variable
    }

    fn num_vars(&self) -> Variable {
        self.vars.len() as Variable
    }

    fn add_clause(&mut self, clause: &[Literal]) -> bool {
        let lits: Vec<Lit> = clause.iter().map(|&l| self.lit(l)).collect();
        self.solver.add_clause(&lits)
    }

    fn solve(&mut self, assumptions: &[Literal]) -> SolveResult {
        let lits: Vec<Lit> = assumptions.iter().map(|&l| self.lit(l)).collect();
        match self.solver.solve_with_assumptions(&lits) {
            Lbool::True => SolveResult::Sat,
            Lbool::False => SolveResult::Unsat,
            _ => SolveResult::Unknown,
        }
    }

    fn value(&self, var: Variable) -> bool {
        self.solver.is_true(self.vars[var as usize])
    }

    fn failed(&self) -> Vec<Variable> {
        self.solver
            .get_conflict()
            .iter()
            .map(|l| l.var() as Variable)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variables_follow_dimacs_ids() {
        let mut sat = CryptoMiniSat::new();
        sat.new_variables(3);
        assert_eq!(sat.num_vars(), 4);
        assert_eq!(sat.new_var(), 4);
        assert!(sat.add_clause(&[Literal::from(1), Literal::from(4)]));
        assert!(sat.add_clause(&[Literal::from(-4)]));
        assert_eq!(sat.solve(&[]), SolveResult::Sat);
        assert!(sat.value(1));
        assert!(!sat.value(4));
    }

    #[test]
    fn failed_assumptions() {
        let mut sat = CryptoMiniSat::new();
        sat.new_variables(3);
        sat.add_clause(&[Literal::from(-1), Literal::from(-2)]);
        let result = sat.solve(&[Literal::from(1), Literal::from(2), Literal::from(3)]);
        assert_eq!(result, SolveResult::Unsat);
        let mut failed = sat.failed();
        failed.sort();
        assert!(failed.contains(&1) || failed.contains(&2));
        assert!(!failed.contains(&3));
        assert_eq!(sat.solve(&[Literal::from(1)]), SolveResult::Sat);
        assert!(!sat.value(2));
    }
}
