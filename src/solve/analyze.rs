//! Conflict analysis of the selection game.
//!
//! A set of facts (group/polarity pairs over one level) together with the player who
//! wins whenever the facts hold is lifted towards the outermost level. At levels of
//! the winner the facts are translated to facts over the parent level that the move
//! enforced, at levels of the loser a clause blocking the facts is learned.

use super::encoding::*;
use super::game::GameSolver;
use crate::matrix::groups::GroupId;
use crate::matrix::Quantifier;
use crate::sat::{SatEngine, SolveResult};
use crate::utils::statistics::{SolverEvent, SolverPhase};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Analysis {
    /// The game is decided in favor of the given player.
    Decided(Quantifier),
    /// A clause was learned at the given level, solving continues there.
    Backtrack(usize),
}

impl<'a, E: SatEngine> GameSolver<'a, E> {
    /// `facts` are facts over level `qlev` that hold in the current state and make
    /// `winner` win.
    pub(super) fn analyze(
        &mut self,
        qlev: usize,
        facts: Vec<EncGrp>,
        winner: Quantifier,
    ) -> Analysis {
        let mut facts = facts;
        let mut level = Some(qlev);
        while let Some(i) = level {
            if self.level_type(i) == winner {
                facts = match winner {
                    Quantifier::Existential => self.analyze_exists(i, &facts),
                    _ => self.analyze_univ(i, &facts),
                };
            } else if !facts.is_empty() {
                if self.options.push_unsat_core {
                    if let Some(pushed) = self.push_unsat_core(i, &facts) {
                        facts = pushed;
                        level = i.checked_sub(1);
                        continue;
                    }
                }
                let clause = self.get_learnt_clause_e(&facts);
                self.add_learnt_clause_e(i, clause);
                return Analysis::Backtrack(i);
            }
            level = i.checked_sub(1);
        }
        Analysis::Decided(winner)
    }

    /// Facts at an existential level the existential player won.
    pub(super) fn analyze_exists(&mut self, qlev: usize, facts: &[EncGrp]) -> Vec<EncGrp> {
        let translated = self.translate(qlev, facts);
        self.analyze_cert(qlev, &translated, true);
        translated
    }

    /// Facts at a universal level the universal player won.
    pub(super) fn analyze_univ(&mut self, qlev: usize, facts: &[EncGrp]) -> Vec<EncGrp> {
        let translated = self.translate(qlev, facts);
        self.analyze_cert(qlev, &translated, false);
        translated
    }

    /// Facts over the parent level that, together with the current move of level
    /// `qlev`, imply `facts`. An alive group needs an alive parent. A dead group whose
    /// projection the move satisfies needs nothing, otherwise its parent was dead.
    pub(super) fn translate(&self, qlev: usize, facts: &[EncGrp]) -> Vec<EncGrp> {
        let mut translated = Vec::with_capacity(facts.len());
        for &fact in facts {
            let g = get_group(fact);
            let parent = self.groups.group(g).parent;
            if get_select(fact) {
                debug_assert!(self.alive[g], "fact alive({}) does not hold", g);
                if let Some(p) = parent {
                    translated.push(encode_sel(p, true));
                }
            } else {
                debug_assert!(!self.alive[g], "fact dead({}) does not hold", g);
                if self.truth[g] {
                    match parent {
                        Some(p) => translated.push(encode_sel(p, false)),
                        None => panic!("group {} on level {} is dead without reason", g, qlev),
                    }
                }
            }
        }
        self.sort_clause(&mut translated);
        self.remove_duplicate_lits(&mut translated);
        translated
    }

    /// Passes the facts through a level of the loser if its move cannot influence them:
    /// alive groups without projection and dead groups whose projection was not
    /// satisfied.
    pub(super) fn push_unsat_core(&mut self, qlev: usize, facts: &[EncGrp]) -> Option<Vec<EncGrp>> {
        self.stats.inc(SolverEvent::PushCoreAttempt);
        let mut pushed = Vec::with_capacity(facts.len());
        for &fact in facts {
            let g = get_group(fact);
            let group = self.groups.group(g);
            if get_select(fact) {
                if !group.projection.is_empty() {
                    return None;
                }
                if let Some(p) = group.parent {
                    pushed.push(encode_sel(p, true));
                }
            } else {
                if !self.truth[g] {
                    return None;
                }
                match group.parent {
                    Some(p) => pushed.push(encode_sel(p, false)),
                    None => return None,
                }
            }
        }
        self.sort_clause(&mut pushed);
        self.remove_duplicate_lits(&mut pushed);
        covered_by!("push_unsat_core");
        self.stats.inc(SolverEvent::PushCoreSuccess);
        trace!("pushed core through {}", self.get_solver_name(qlev));
        Some(pushed)
    }

    /// The clause blocking `facts`.
    pub(super) fn get_learnt_clause_e(&self, facts: &[EncGrp]) -> Vec<EncGrp> {
        let mut clause: Vec<EncGrp> = facts.iter().map(|&f| negate_sel(f)).collect();
        self.sort_clause(&mut clause);
        self.remove_duplicate_lits(&mut clause);
        clause
    }

    /// The clause blocking a core of alive facts that forces the value of a subgame
    /// to zero.
    pub(super) fn get_learnt_clause_r(&self, core: &[EncGrp]) -> Vec<EncGrp> {
        debug_assert!(core.iter().all(|&f| get_select(f)));
        self.get_learnt_clause_e(core)
    }

    /// Orders by level, then group, then polarity.
    pub(super) fn sort_clause(&self, clause: &mut [EncGrp]) {
        clause.sort_unstable_by_key(|&enc| (self.groups.level_of(get_group(enc)), enc));
    }

    /// Expects a sorted clause.
    pub(super) fn remove_duplicate_lits(&self, clause: &mut Vec<EncGrp>) {
        clause.dedup();
    }

    /// Removes the entries with polarity `selected`.
    pub(super) fn remove_lits(&self, clause: &mut Vec<EncGrp>, selected: bool) {
        clause.retain(|&enc| get_select(enc) != selected);
    }

    /// Core of the failed solve call at level `qlev > 0` as facts over level `qlev - 1`.
    ///
    /// Only facts of the polarity that helps the winner are kept: the universal player
    /// never profits from a dead parent, the other players never from an alive one.
    pub(super) fn unsat_core(&mut self, qlev: usize) -> Vec<EncGrp> {
        let mut core = self.failed_facts(qlev);
        if self.level_type(qlev) == Quantifier::Universal {
            self.remove_lits(&mut core, true);
        } else {
            self.remove_lits(&mut core, false);
        }
        self.sort_clause(&mut core);
        if self.options.minimize_cores && core.len() > 1 {
            core = self.minimal_selection_e(qlev, core);
        }
        core
    }

    /// Deletion based minimization of a core over level `qlev - 1`.
    ///
    /// A candidate drops one fact and assumes every parent outside the candidate with
    /// the polarity that is best for the player of level `qlev`. The candidate is a core
    /// iff level `qlev` stays unsatisfiable.
    pub(super) fn minimal_selection_e(&mut self, qlev: usize, core: Vec<EncGrp>) -> Vec<EncGrp> {
        let _timer = self.stats.start(SolverPhase::Minimization);
        let good = self.level_type(qlev) == Quantifier::Universal;
        let parents: Vec<GroupId> = self.groups.at_level(qlev - 1).to_vec();
        let before = core.len();
        let mut kept = core;
        let mut i = 0;
        let mut checks = 0;
        while i < kept.len() && checks < self.options.minimize_limit {
            let removed = kept[i];
            let candidate: Vec<EncGrp> = kept
                .iter()
                .cloned()
                .filter(|&enc| enc != removed)
                .collect();
            let selection: Vec<(GroupId, bool)> = parents
                .iter()
                .map(|&h| {
                    if candidate.binary_search(&encode_sel(h, !good)).is_ok() {
                        (h, !good)
                    } else {
                        (h, good)
                    }
                })
                .collect();
            let assumptions = self.selection_assumptions(qlev, &selection);
            checks += 1;
            self.stats.inc(SolverEvent::MinimizeCheck);
            match self.solve_with(qlev, assumptions) {
                SolveResult::Unsat => {
                    let mut smaller = self.failed_facts(qlev);
                    smaller.retain(|enc| candidate.binary_search(enc).is_ok());
                    self.sort_clause(&mut smaller);
                    self.stats.inc(SolverEvent::MinimizeDrop);
                    i = smaller.iter().filter(|&&enc| enc < removed).count();
                    kept = smaller;
                }
                SolveResult::Sat => i += 1,
                SolveResult::Unknown => break,
            }
        }
        debug!(
            "minimized core on {} from {} to {} facts",
            self.get_solver_name(qlev),
            before,
            kept.len()
        );
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::literal::Literal;
    use crate::matrix::Matrix;
    use crate::parse::sdimacs;
    use crate::solve::SolverOptions;

    fn matrix(instance: &str) -> Matrix {
        sdimacs::parse(instance).unwrap()
    }

    #[test]
    fn clause_helpers() {
        let matrix = matrix("p cnf 2 2\ne 1 0\na 2 0\n1 2 0\n-1 2 0\n");
        let solver = GameSolver::new(&matrix, SolverOptions::default());
        let child = solver.groups.at_level(1)[0];
        let root = solver.groups.at_level(0)[1];
        let mut clause = vec![
            encode_sel(child, true),
            encode_sel(root, false),
            encode_sel(root, false),
            encode_sel(root, true),
        ];
        solver.sort_clause(&mut clause);
        solver.remove_duplicate_lits(&mut clause);
        assert_eq!(
            clause,
            vec![
                encode_sel(root, false),
                encode_sel(root, true),
                encode_sel(child, true)
            ]
        );
        solver.remove_lits(&mut clause, false);
        assert_eq!(clause, vec![encode_sel(root, true), encode_sel(child, true)]);
        assert_eq!(
            solver.get_learnt_clause_e(&clause),
            vec![encode_sel(root, false), encode_sel(child, false)]
        );
    }

    #[test]
    fn universal_win_is_learned_by_existential_level() {
        let matrix = matrix("p cnf 2 1\ne 1 0\na 2 0\n1 2 0\n");
        let mut solver = GameSolver::new(&matrix, SolverOptions::default());
        assert_eq!(
            solver.solve_level(0, &[Literal::from(-1)]),
            SolveResult::Sat
        );
        solver.read_selection(0);
        assert_eq!(
            solver.solve_level(1, &[Literal::from(-2)]),
            SolveResult::Sat
        );
        solver.read_selection(1);
        let end = solver.alive_end(1).unwrap();
        let result = solver.analyze(1, vec![encode_sel(end, true)], Quantifier::Universal);
        assert_eq!(result, Analysis::Backtrack(0));
        let root = solver.groups.at_level(0)[0];
        assert_eq!(solver.levels[0].learnt(), &[vec![encode_sel(root, false)]]);
    }

    #[test]
    fn cores_are_pushed_through_uninfluenced_levels() {
        covers!("push_unsat_core");
        // the second clause has no literal on level 1, its group there has an empty
        // projection and cannot be killed by the universal player
        let matrix = matrix("p cnf 3 2\ne 1 0\na 2 0\ne 3 0\n1 2 3 0\n-1 3 0\n");
        let mut solver = GameSolver::new(&matrix, SolverOptions::default());
        assert_eq!(solver.solve_level(0, &[Literal::from(1)]), SolveResult::Sat);
        solver.read_selection(0);
        assert_eq!(solver.solve_level(1, &[Literal::from(2)]), SolveResult::Sat);
        solver.read_selection(1);
        let alive = solver.alive_facts(1);
        assert_eq!(alive.len(), 1);
        let pushed = solver.push_unsat_core(1, &alive).unwrap();
        let root = solver.groups.group(get_group(alive[0])).parent.unwrap();
        assert_eq!(pushed, vec![encode_sel(root, true)]);
        assert_eq!(solver.statistics().get(SolverEvent::PushCoreSuccess), 1);
    }

    #[test]
    fn minimized_cores_are_locally_minimal() {
        // the existential player refutes both clauses below ¬x1 only if that root is
        // dead, the roots of x2 and x3 are irrelevant
        let matrix = matrix(
            "p cnf 4 4
a 1 2 3 0
e 4 0
1 4 0
1 -4 0
2 4 0
3 4 0
",
        );
        let mut options = SolverOptions::default();
        options.push_unsat_core = false;
        let mut solver = GameSolver::new(&matrix, options);
        let falsify: Vec<Literal> = vec![Literal::from(-1), Literal::from(-2), Literal::from(-3)];
        assert_eq!(solver.solve_level(0, &falsify), SolveResult::Sat);
        solver.read_selection(0);
        assert_eq!(solver.alive_facts(0).len(), 3);

        assert_eq!(solver.solve_level(1, &[]), SolveResult::Unsat);
        let core = solver.unsat_core(1);
        assert_eq!(core.len(), 1);
        assert!(get_select(core[0]));
        assert_eq!(
            solver.groups.group(get_group(core[0])).projection,
            vec![Literal::from(1)]
        );

        let mut all = solver.alive_facts(0);
        solver.sort_clause(&mut all);
        assert_eq!(solver.minimal_selection_e(1, all), core);
        assert!(solver.statistics().get(SolverEvent::MinimizeCheck) >= 2);
    }
}
