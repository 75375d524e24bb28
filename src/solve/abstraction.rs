use super::encoding::{EncGrp, PinTable};
use crate::literal::{Literal, Variable};
use crate::sat::SatEngine;

/// The solving context of one quantifier level.
///
/// Learned clauses are kept as group/polarity vectors so that the engine can be
/// rebuilt with identical content. Session clauses are guarded by an enable variable
/// and vanish when the session is closed.
pub struct LevelAbstraction<E: SatEngine> {
    pub engine: E,
    pub pins: PinTable,
    learnt: Vec<Vec<EncGrp>>,
    session: Option<Variable>,
    session_clauses: usize,
    disabled_clauses: usize,
    solve_calls: usize,
}

impl<E: SatEngine> LevelAbstraction<E> {
    pub fn new(pins: PinTable, max_var: Variable) -> Self {
        let mut engine = E::new();
        engine.new_variables(max_var);
        LevelAbstraction {
            engine,
            pins,
            learnt: Vec::new(),
            session: None,
            session_clauses: 0,
            disabled_clauses: 0,
            solve_calls: 0,
        }
    }

    /// Replaces the engine by a fresh one, learned clauses have to be replayed by the caller.
    pub fn reset(&mut self, max_var: Variable) {
        assert!(self.session.is_none(), "recycling with an open session");
        let mut engine = E::new();
        engine.new_variables(max_var);
        self.engine = engine;
        self.disabled_clauses = 0;
        self.solve_calls = 0;
    }

    pub fn learnt(&self) -> &[Vec<EncGrp>] {
        &self.learnt
    }

    pub fn push_learnt(&mut self, clause: Vec<EncGrp>) {
        self.learnt.push(clause);
    }

    pub fn solve(&mut self, assumptions: &[Literal]) -> crate::sat::SolveResult {
        self.solve_calls += 1;
        self.engine.solve(assumptions)
    }

    pub fn solve_calls(&self) -> usize {
        self.solve_calls
    }

    pub fn disabled_clauses(&self) -> usize {
        self.disabled_clauses
    }

    /// Starts a session, returns its enable literal which has to be assumed.
    pub fn open_session(&mut self) -> Literal {
        assert!(self.session.is_none(), "nested sessions on one level");
        let enable = self.engine.new_var();
        self.session = Some(enable);
        self.session_clauses = 0;
        Literal::new(enable, false)
    }

    pub fn session(&self) -> Option<Variable> {
        self.session
    }

    pub fn add_session_clause(&mut self, clause: &[Literal]) {
        let enable = match self.session {
            Some(enable) => enable,
            None => panic!("session clause outside of a session"),
        };
        let mut guarded = Vec::with_capacity(clause.len() + 1);
        guarded.push(Literal::new(enable, true));
        guarded.extend_from_slice(clause);
        self.engine.add_clause(&guarded);
        self.session_clauses += 1;
    }

    pub fn close_session(&mut self) {
        if let Some(enable) = self.session.take() {
            self.engine.add_clause(&[Literal::new(enable, true)]);
            self.disabled_clauses += self.session_clauses;
            self.session_clauses = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sat::{CryptoMiniSat, SolveResult};

    #[test]
    fn session_clauses_are_disabled() {
        let mut level: LevelAbstraction<CryptoMiniSat> =
            LevelAbstraction::new(PinTable::new(2), 2);
        let enable = level.open_session();
        level.add_session_clause(&[Literal::from(-1)]);
        level.add_session_clause(&[Literal::from(-2)]);
        assert_eq!(
            level.solve(&[enable, Literal::from(1)]),
            SolveResult::Unsat
        );
        level.close_session();
        assert_eq!(level.disabled_clauses(), 2);
        assert_eq!(level.solve(&[Literal::from(1)]), SolveResult::Sat);
        assert_eq!(level.solve_calls(), 2);

        level.reset(2);
        assert_eq!(level.disabled_clauses(), 0);
        assert_eq!(level.solve_calls(), 0);
    }
}
