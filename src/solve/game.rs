//! The clause-selection game.
//!
//! Every quantifier level owns an abstraction whose variables are the level variables
//! plus selector variables for the groups of the level. A move of a level decides which
//! of its groups stay alive, i.e. are neither satisfied at this level nor below a dead
//! parent. The player of the innermost levels wins if some clause stays alive to its
//! last level, otherwise the existential player wins.

use super::abstraction::LevelAbstraction;
use super::cache::SelectionCache;
use super::certificate::CertificateRecorder;
use super::encoding::*;
use super::{Solver, SolverOptions, SolverResult};
use crate::count::LevelCounting;
use crate::literal::{Literal, Variable};
use crate::matrix::groups::{GroupId, Groups};
use crate::matrix::{Matrix, Quantifier};
use crate::sat::{CryptoMiniSat, SatEngine, SolveResult};
use crate::utils::statistics::{LevelEvent, SolverEvent, SolverPhase, Statistics};
use bit_vec::BitVec;
use rustc_hash::FxHashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct GameSolver<'a, E: SatEngine = CryptoMiniSat> {
    pub(super) matrix: &'a Matrix,
    pub(super) groups: Groups,
    pub(super) options: SolverOptions,
    pub(super) selectors: Selectors,
    pub(super) levels: Vec<LevelAbstraction<E>>,

    /// Groups whose game rules are part of their abstraction.
    pub(super) encoded: BitVec,
    /// Current selection, valid for the levels up to the one last read.
    pub(super) alive: BitVec,
    /// `t` of every group, i.e. no projection literal holds under the last move.
    pub(super) truth: BitVec,
    /// Last move per level.
    pub(super) moves: Vec<Vec<Literal>>,
    /// Stores the assumptions given to the last solve call.
    pub(super) assumptions: Vec<Literal>,

    pub(super) cache: SelectionCache,
    pub(super) certificate: Option<CertificateRecorder>,
    pub(super) counting: Vec<Option<LevelCounting>>,
    pub(super) dump_dir: Option<PathBuf>,

    pub(super) stats: Statistics,
    start: Instant,
    interrupt: Arc<AtomicBool>,
    pub(super) interrupted: bool,
    pub(super) tot_bt_count: usize,
    pub(super) result: SolverResult,
}

impl<'a> GameSolver<'a, CryptoMiniSat> {
    pub fn new(matrix: &'a Matrix, options: SolverOptions) -> Self {
        Self::with_engine(matrix, options)
    }
}

impl<'a, E: SatEngine> GameSolver<'a, E> {
    pub fn with_engine(matrix: &'a Matrix, options: SolverOptions) -> Self {
        let groups = Groups::new(matrix);
        let maxv = matrix.prefix.max_variable();
        let num_levels = groups.num_levels();
        let num_groups = groups.num_groups();
        let (selectors, levels) = Self::allocate_selectors(&groups, maxv);
        let counting = (0..num_levels)
            .map(|qlev| {
                if matrix.prefix.level(qlev).quantifier == Quantifier::Random {
                    Some(LevelCounting::new(matrix, &groups, qlev, &options))
                } else {
                    None
                }
            })
            .collect();
        debug!(
            "{} groups on {} levels, selectors up to {:?}",
            num_groups,
            num_levels,
            (0..num_levels)
                .map(|qlev| selectors.max_var(qlev))
                .collect::<Vec<_>>()
        );

        let mut solver = GameSolver {
            matrix,
            groups,
            options,
            selectors,
            levels,
            encoded: BitVec::from_elem(num_groups, false),
            alive: BitVec::from_elem(num_groups, false),
            truth: BitVec::from_elem(num_groups, false),
            moves: vec![Vec::new(); num_levels],
            assumptions: Vec::new(),
            cache: SelectionCache::new(num_levels),
            certificate: None,
            counting,
            dump_dir: None,
            stats: Statistics::new(num_levels),
            start: Instant::now(),
            interrupt: Arc::new(AtomicBool::new(false)),
            interrupted: false,
            tot_bt_count: 0,
            result: SolverResult::Unknown,
        };
        solver.init_game_rules();
        solver
    }

    /// Allocates the selectors of all levels and one abstraction per level.
    fn allocate_selectors(groups: &Groups, maxv: Variable) -> (Selectors, Vec<LevelAbstraction<E>>) {
        let mut pins = Vec::new();
        let selectors = Selectors::allocate(groups, maxv, &mut pins);
        let levels = pins
            .into_iter()
            .enumerate()
            .map(|(qlev, table)| LevelAbstraction::new(table, selectors.max_var(qlev)))
            .collect();
        (selectors, levels)
    }

    /// The groups of the outermost level are encoded eagerly, every other group once
    /// its parent is alive or a learned clause mentions it.
    fn init_game_rules(&mut self) {
        if self.groups.num_levels() == 0 {
            return;
        }
        let roots = self.groups.at_level(0).to_vec();
        for g in roots {
            self.inst_e(g);
        }
    }

    /// `t ↔ ∧¬projection` and `s ↔ p ∧ t` (`s ↔ t` for groups without parent).
    fn game_definitions(&self, qlev: usize, g: GroupId) -> Vec<Vec<Literal>> {
        let group = self.groups.group(g);
        let s = Literal::new(self.selectors.s(qlev, g), false);
        let t = Literal::new(self.selectors.t(qlev, g), false);
        let mut clauses = Vec::with_capacity(group.projection.len() + 4);

        let mut definition = Vec::with_capacity(group.projection.len() + 1);
        definition.push(t);
        for &literal in &group.projection {
            clauses.push(vec![-t, -literal]);
            definition.push(literal);
        }
        clauses.push(definition);

        match group.parent {
            Some(parent) => {
                let p = Literal::new(self.selectors.p(qlev, parent), false);
                clauses.push(vec![-s, p]);
                clauses.push(vec![-s, t]);
                clauses.push(vec![s, -p, -t]);
            }
            None => {
                clauses.push(vec![-s, t]);
                clauses.push(vec![s, -t]);
            }
        }
        clauses
    }

    /// The existential player has to satisfy every clause before its last level.
    fn init_game_rules_exists(&mut self, qlev: usize, g: GroupId) {
        let mut clauses = self.game_definitions(qlev, g);
        if self.groups.group(g).ends {
            clauses.push(vec![Literal::new(self.selectors.s(qlev, g), true)]);
        }
        self.add_rules(qlev, &clauses);
    }

    fn init_game_rules_univ(&mut self, qlev: usize, g: GroupId) {
        let clauses = self.game_definitions(qlev, g);
        self.add_rules(qlev, &clauses);
    }

    /// Random levels only follow the definitions, their moves are enumerated.
    fn init_game_rules_ssat(&mut self, qlev: usize, g: GroupId) {
        let clauses = self.game_definitions(qlev, g);
        self.add_rules(qlev, &clauses);
    }

    fn add_rules(&mut self, qlev: usize, clauses: &[Vec<Literal>]) {
        let engine = &mut self.levels[qlev].engine;
        for clause in clauses {
            engine.add_clause(clause);
        }
    }

    fn encode_group(&mut self, qlev: usize, g: GroupId) {
        match self.level_type(qlev) {
            Quantifier::Existential => self.init_game_rules_exists(qlev, g),
            Quantifier::Universal => self.init_game_rules_univ(qlev, g),
            Quantifier::Random => self.init_game_rules_ssat(qlev, g),
        }
    }

    /// Makes sure the game rules of `g` are part of its abstraction.
    pub(super) fn inst_e(&mut self, g: GroupId) {
        if self.encoded[g] {
            return;
        }
        self.encoded.set(g, true);
        let qlev = self.groups.level_of(g);
        trace!("encode group {} on {}", g, self.get_solver_name(qlev));
        self.encode_group(qlev, g);
    }

    /// Assumptions fixing the pins of the parent level, encodes the children of alive
    /// parents on demand.
    pub(super) fn selection_assumptions(
        &mut self,
        qlev: usize,
        parents: &[(GroupId, bool)],
    ) -> Vec<Literal> {
        let mut assumptions = Vec::with_capacity(parents.len());
        for &(h, alive) in parents {
            if alive {
                let children = self.groups.group(h).children.clone();
                for c in children {
                    self.inst_e(c);
                }
            }
            assumptions.push(Literal::new(self.selectors.p(qlev, h), !alive));
        }
        assumptions
    }

    /// The current selection of level `qlev - 1` as assumptions of level `qlev`.
    pub(super) fn parent_assumptions(&mut self, qlev: usize) -> Vec<Literal> {
        if qlev == 0 {
            return Vec::new();
        }
        let parents: Vec<(GroupId, bool)> = self
            .groups
            .at_level(qlev - 1)
            .iter()
            .map(|&h| (h, self.alive[h]))
            .collect();
        self.selection_assumptions(qlev, &parents)
    }

    /// Solves level `qlev` under the current parent selection and `extra` assumptions.
    pub(super) fn solve_level(&mut self, qlev: usize, extra: &[Literal]) -> SolveResult {
        if self.budget_exhausted() {
            return SolveResult::Unknown;
        }
        if !self.matrix.is_stochastic() {
            self.maybe_recycle(qlev);
        }
        let mut assumptions = self.parent_assumptions(qlev);
        assumptions.extend_from_slice(extra);
        self.solve_with(qlev, assumptions)
    }

    pub(super) fn solve_with(&mut self, qlev: usize, assumptions: Vec<Literal>) -> SolveResult {
        let result = {
            let _timer = self.stats.start(SolverPhase::Sat);
            self.levels[qlev].solve(&assumptions)
        };
        match result {
            SolveResult::Sat => self.stats.inc_level(qlev, LevelEvent::SelectionSat),
            SolveResult::Unsat => self.stats.inc_level(qlev, LevelEvent::SelectionUnsat),
            SolveResult::Unknown => self.interrupted = true,
        }
        trace!(
            "{} under {} assumptions: {:?}",
            self.get_solver_name(qlev),
            assumptions.len(),
            result
        );
        self.assumptions = assumptions;
        result
    }

    /// Reads the move and the resulting selection of level `qlev` from the last model.
    pub(super) fn read_selection(&mut self, qlev: usize) {
        let engine = &self.levels[qlev].engine;
        for &g in self.groups.at_level(qlev) {
            let group = self.groups.group(g);
            // a literal is false iff its variable is assigned to its sign
            let truth = group
                .projection
                .iter()
                .all(|l| engine.value(l.variable()) == l.signed());
            let parent_alive = group.parent.map_or(true, |p| self.alive[p]);
            let alive = parent_alive && truth;
            debug_assert!(
                !self.encoded[g] || engine.value(self.selectors.s(qlev, g)) == alive,
                "selector of group {} disagrees with the move",
                g
            );
            self.truth.set(g, truth);
            self.alive.set(g, alive);
        }
        let mov = &mut self.moves[qlev];
        mov.clear();
        for &var in &self.matrix.prefix.level(qlev).variables {
            mov.push(Literal::new(var, !engine.value(var)));
        }
    }

    pub(super) fn all_dead(&self, qlev: usize) -> bool {
        self.groups.at_level(qlev).iter().all(|&g| !self.alive[g])
    }

    /// A clause that survived to its last level.
    pub(super) fn alive_end(&self, qlev: usize) -> Option<GroupId> {
        self.groups
            .at_level(qlev)
            .iter()
            .cloned()
            .find(|&g| self.alive[g] && self.groups.group(g).ends)
    }

    /// The alive groups of level `qlev` as facts.
    pub(super) fn alive_facts(&self, qlev: usize) -> Vec<EncGrp> {
        self.groups
            .at_level(qlev)
            .iter()
            .filter(|&&g| self.alive[g])
            .map(|&g| encode_sel(g, true))
            .collect()
    }

    /// The current selection of level `qlev`, increasing in the group ids.
    pub(super) fn selection_key(&self, qlev: usize) -> Vec<EncGrp> {
        self.groups
            .at_level(qlev)
            .iter()
            .map(|&g| encode_sel(g, self.alive[g]))
            .collect()
    }

    /// Facts over the parent level whose pins appear in the failed assumptions of the
    /// last solve call of level `qlev`, with the polarity they were assumed with.
    pub(super) fn failed_facts(&mut self, qlev: usize) -> Vec<EncGrp> {
        if qlev == 0 {
            return Vec::new();
        }
        let failed: FxHashSet<Variable> = self.levels[qlev].engine.failed().into_iter().collect();
        let mut facts = Vec::new();
        for &literal in &self.assumptions {
            let var = literal.variable();
            if !failed.contains(&var) {
                continue;
            }
            if let Some(info) = self.levels[qlev].pins.try_pinfo(var) {
                if info.qlev + 1 == qlev {
                    facts.push(encode_sel(info.group, !literal.signed()));
                }
            }
        }
        for &var in &failed {
            self.levels[qlev].engine.bump(var);
        }
        facts.sort_unstable();
        facts.dedup();
        facts
    }

    fn clause_literals(&self, qlev: usize, clause: &[EncGrp]) -> Vec<Literal> {
        clause
            .iter()
            .map(|&enc| self.selectors.s_lit(qlev, enc))
            .collect()
    }

    /// Adds a learned clause over the selectors of level `qlev` permanently.
    pub(super) fn add_learnt_clause_e(&mut self, qlev: usize, clause: Vec<EncGrp>) {
        for &enc in &clause {
            self.inst_e(get_group(enc));
        }
        let literals = self.clause_literals(qlev, &clause);
        debug!(
            "learnt clause on {}: {}",
            self.get_solver_name(qlev),
            literals
                .iter()
                .map(|l| format!("{}", l))
                .collect::<Vec<_>>()
                .join(" ")
        );
        self.levels[qlev].engine.add_clause(&literals);
        self.stats.inc(SolverEvent::LearntClause);
        self.stats.inc_by(SolverEvent::LearntLiteral, literals.len());
        #[cfg(debug_assertions)]
        self.check_learnt_clause(qlev, &literals);
        self.levels[qlev].push_learnt(clause);
    }

    /// Adds a clause that lives as long as the open session of level `qlev`.
    pub(super) fn add_learnt_clause_r(&mut self, qlev: usize, clause: &[EncGrp]) {
        for &enc in clause {
            self.inst_e(get_group(enc));
        }
        let literals = self.clause_literals(qlev, clause);
        trace!(
            "session clause on {}: {:?}",
            self.get_solver_name(qlev),
            literals
        );
        self.levels[qlev].add_session_clause(&literals);
    }

    /// The negation of a learned clause is a selection that is now unreachable.
    #[cfg(debug_assertions)]
    fn check_learnt_clause(&mut self, qlev: usize, literals: &[Literal]) {
        let negated: Vec<Literal> = literals.iter().map(|&l| -l).collect();
        let result = self.levels[qlev].engine.solve(&negated);
        assert_ne!(
            result,
            SolveResult::Sat,
            "learnt clause is not enforced on level {}",
            qlev
        );
    }

    /// Rebuilds the abstraction of level `qlev` from the game rules of the encoded
    /// groups and the permanent learned clauses.
    pub(super) fn recycle_solver(&mut self, qlev: usize) {
        info!("recycle {}", self.get_solver_name(qlev));
        self.stats.inc(SolverEvent::Recycle);
        self.levels[qlev].reset(self.selectors.max_var(qlev));
        let encoded: Vec<GroupId> = self
            .groups
            .at_level(qlev)
            .iter()
            .cloned()
            .filter(|&g| self.encoded[g])
            .collect();
        for g in encoded {
            self.encode_group(qlev, g);
        }
        let learnt: Vec<Vec<Literal>> = self.levels[qlev]
            .learnt()
            .iter()
            .map(|clause| self.clause_literals(qlev, clause))
            .collect();
        for clause in &learnt {
            self.levels[qlev].engine.add_clause(clause);
        }
        self.cache.clear_level(qlev);
    }

    /// Recycles level `qlev` once it accumulated enough dead weight: disabled session
    /// clauses for stochastic formulas, solve calls otherwise.
    pub(super) fn maybe_recycle(&mut self, qlev: usize) {
        let limit = self.options.recycle_limit;
        if limit == 0 || self.levels[qlev].session().is_some() {
            return;
        }
        let level = &self.levels[qlev];
        let due = if self.matrix.is_stochastic() {
            level.disabled_clauses() >= limit
        } else {
            level.solve_calls() >= limit
        };
        if due {
            self.recycle_solver(qlev);
        }
    }

    /// Checks the interrupt flag, the timeout, and the backtrack limit.
    pub(super) fn budget_exhausted(&mut self) -> bool {
        if self.interrupted {
            return true;
        }
        let reason = if self.interrupt.load(Ordering::Relaxed) {
            Some("interrupted")
        } else if self
            .options
            .timeout
            .map_or(false, |t| self.start.elapsed() >= Duration::from_secs(t))
        {
            Some("timeout")
        } else if self
            .options
            .max_backtracks
            .map_or(false, |max| self.tot_bt_count > max)
        {
            Some("backtrack limit")
        } else {
            None
        };
        if let Some(reason) = reason {
            info!("stop solving: {}", reason);
            self.interrupted = true;
        }
        self.interrupted
    }

    /// The quantifier of level `qlev`, levels beyond the prefix belong to the universal
    /// player who wins if a clause reaches them.
    pub(super) fn level_type(&self, qlev: usize) -> Quantifier {
        if qlev < self.matrix.prefix.num_levels() {
            self.matrix.prefix.level(qlev).quantifier
        } else {
            Quantifier::Universal
        }
    }

    pub fn get_solver_name(&self, qlev: usize) -> String {
        format!("{}{}", self.level_type(qlev).short_name(), qlev)
    }

    /// Shares an interrupt flag with another thread, solving stops with `Unknown` once
    /// the flag is set.
    pub fn set_interrupt(&mut self, interrupt: Arc<AtomicBool>) {
        self.interrupt = interrupt;
    }

    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    /// Weighted CNFs of the random levels are written to `dir` on every count.
    pub fn set_dump_dir(&mut self, dir: Option<&Path>) {
        self.dump_dir = dir.map(Path::to_path_buf);
    }

    pub fn statistics(&self) -> &Statistics {
        &self.stats
    }

    pub fn groups(&self) -> &Groups {
        &self.groups
    }

    pub fn num_backtracks(&self) -> usize {
        self.tot_bt_count
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<'a, E: SatEngine> Solver for GameSolver<'a, E> {
    fn solve(&mut self) -> SolverResult {
        self.start = Instant::now();
        let result = if self.matrix.is_stochastic() {
            self.solve_ssat()
        } else {
            self.solve_qbf()
        };
        info!(
            "{:?} after {} backtracks in {:?}",
            result,
            self.tot_bt_count,
            self.start.elapsed()
        );
        self.result = result;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::sdimacs;

    fn solver_for(instance: &str) -> (Matrix, SolverOptions) {
        (sdimacs::parse(instance).unwrap(), SolverOptions::default())
    }

    #[test]
    fn outermost_groups_are_encoded() {
        let (matrix, options) = solver_for("p cnf 3 2\ne 1 0\na 2 0\ne 3 0\n1 2 0\n-1 3 0\n");
        let solver = GameSolver::new(&matrix, options);
        for &g in solver.groups.at_level(0) {
            assert!(solver.encoded[g]);
        }
        for &g in solver.groups.at_level(1) {
            assert!(!solver.encoded[g]);
        }
        assert_eq!(solver.get_solver_name(0), "E0");
        assert_eq!(solver.get_solver_name(1), "A1");
        assert_eq!(solver.level_type(3), Quantifier::Universal);
    }

    #[test]
    fn selection_follows_moves() {
        let (matrix, options) = solver_for("p cnf 2 2\ne 1 0\na 2 0\n1 2 0\n-1 2 0\n");
        let mut solver = GameSolver::new(&matrix, options);
        let x1 = Literal::from(1);
        assert_eq!(solver.solve_level(0, &[x1]), SolveResult::Sat);
        solver.read_selection(0);
        // x1 satisfies the first clause at level 0, the second one is alive
        let roots = solver.groups.at_level(0).to_vec();
        let alive: Vec<bool> = roots.iter().map(|&g| solver.alive[g]).collect();
        assert_eq!(alive.iter().filter(|&&a| a).count(), 1);
        assert!(!solver.all_dead(0));
        assert_eq!(solver.alive_end(0), None);
        assert_eq!(solver.moves[0], vec![x1]);

        // the universal player keeps the remaining clause alive with ¬x2
        assert_eq!(solver.solve_level(1, &[Literal::from(-2)]), SolveResult::Sat);
        solver.read_selection(1);
        assert!(solver.alive_end(1).is_some());
        assert_eq!(solver.alive_facts(1).len(), 1);
    }

    #[test]
    fn recycling_keeps_learnt_clauses() {
        let (matrix, options) = solver_for("p cnf 2 2\ne 1 0\na 2 0\n1 2 0\n-1 2 0\n");
        let mut solver = GameSolver::new(&matrix, options);
        let roots = solver.groups.at_level(0).to_vec();
        for &g in &roots {
            solver.add_learnt_clause_e(0, vec![encode_sel(g, false)]);
        }
        assert_eq!(solver.solve_level(0, &[]), SolveResult::Unsat);
        solver.recycle_solver(0);
        assert_eq!(solver.statistics().get(SolverEvent::Recycle), 1);
        assert_eq!(solver.solve_level(0, &[]), SolveResult::Unsat);
    }

    #[test]
    fn interrupt_stops_solving() {
        let (matrix, options) = solver_for("p cnf 2 1\ne 1 0\na 2 0\n1 2 0\n");
        let mut solver = GameSolver::new(&matrix, options);
        solver.interrupt_handle().store(true, Ordering::Relaxed);
        assert_eq!(solver.solve(), SolverResult::Unknown);
    }
}
