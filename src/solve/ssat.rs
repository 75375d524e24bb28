//! Depth-first evaluation of stochastic formulas.
//!
//! The value of a level only depends on the selection of its parent level. Existential
//! levels maximize and universal levels minimize over their selections, both blocking
//! every selection that cannot improve on the values seen so far. Random levels
//! enumerate regions of moves whose alive sets are bounded by an inclusion-minimal
//! selection and weight the region values by weighted model counting.

use super::cache::Valuation;
use super::encoding::*;
use super::game::GameSolver;
use super::{CounterKind, SolverResult, EPSILON};
use crate::count::{calculate_prob, ProbMap};
use crate::literal::Literal;
use crate::matrix::groups::GroupId;
use crate::matrix::Quantifier;
use crate::sat::{SatEngine, SolveResult};
use crate::utils::statistics::{LevelEvent, SolverEvent, SolverPhase};
use std::fs;

impl<'a, E: SatEngine> GameSolver<'a, E> {
    pub(super) fn solve_ssat(&mut self) -> SolverResult {
        if self.matrix.conflict() {
            return SolverResult::Probability(0.0);
        }
        if self.matrix.clauses.is_empty() {
            return SolverResult::Probability(1.0);
        }
        let value = self.solve_ssat_recur(0);
        if self.interrupted {
            return SolverResult::Unknown;
        }
        if let Some(threshold) = self.matrix.threshold() {
            info!(
                "threshold {} {}",
                threshold,
                if value.prob + EPSILON >= threshold {
                    "met"
                } else {
                    "not met"
                }
            );
        }
        SolverResult::Probability(value.prob)
    }

    /// Value of level `qlev` under the current selection of level `qlev - 1`.
    pub(super) fn solve_ssat_recur(&mut self, qlev: usize) -> Valuation {
        let key = if qlev == 0 {
            Vec::new()
        } else {
            self.selection_key(qlev - 1)
        };
        if self.options.cache {
            self.stats.inc(SolverEvent::CacheLookup);
            if let Some(value) = self.cache.lookup(qlev, &key) {
                covered_by!("cache_hit");
                self.stats.inc(SolverEvent::CacheHit);
                return value.clone();
            }
        }

        let value = match self.level_type(qlev) {
            Quantifier::Existential => self.solve_ssat_exists(qlev),
            Quantifier::Universal => self.solve_ssat_forall(qlev),
            Quantifier::Random => self.solve_ssat_random(qlev),
        };
        if self.interrupted {
            return value;
        }
        trace!(
            "{} evaluates to {} (core {:?})",
            self.get_solver_name(qlev),
            value.prob,
            value.core
        );
        if self.options.cache {
            self.cache.record(qlev, key, value.clone());
        }
        self.maybe_recycle(qlev);
        value
    }

    /// Value of the current selection of level `qlev`. A zero value comes with facts
    /// over level `qlev` that force it when derivable.
    pub(super) fn evaluate_state(&mut self, qlev: usize) -> Valuation {
        if let Some(g) = self.alive_end(qlev) {
            return Valuation::zero(Some(vec![encode_sel(g, true)]));
        }
        if self.all_dead(qlev) {
            return Valuation::new(1.0);
        }
        self.solve_ssat_recur(qlev + 1)
    }

    fn threshold_at(&self, qlev: usize) -> Option<f64> {
        if qlev == 0 {
            self.matrix.threshold()
        } else {
            None
        }
    }

    fn count_evaluation(&mut self) {
        self.tot_bt_count += 1;
        self.stats.inc(SolverEvent::Backtrack);
    }

    fn solve_ssat_exists(&mut self, qlev: usize) -> Valuation {
        let enable = self.levels[qlev].open_session();
        let threshold = self.threshold_at(qlev);
        let mut best: f64 = 0.0;
        let mut exhausted = false;
        loop {
            match self.solve_level(qlev, &[enable]) {
                SolveResult::Sat => {}
                SolveResult::Unsat => {
                    exhausted = true;
                    break;
                }
                SolveResult::Unknown => break,
            }
            self.read_selection(qlev);
            let value = self.evaluate_state(qlev);
            if self.interrupted {
                break;
            }
            self.count_evaluation();
            match value.core {
                Some(ref core) if value.prob <= EPSILON => {
                    let clause = self.get_learnt_clause_r(core);
                    self.add_learnt_clause_e(qlev, clause);
                }
                _ => {
                    let mut alive = self.alive_facts(qlev);
                    let bound = best.max(value.prob);
                    if self.options.partial_pruning && bound < 1.0 - EPSILON {
                        alive = self.partial_assignment_pruning(qlev, alive, bound);
                        if self.interrupted {
                            break;
                        }
                    }
                    let clause = self.get_learnt_clause_e(&alive);
                    self.add_learnt_clause_r(qlev, &clause);
                }
            }
            best = best.max(value.prob);
            if best >= 1.0 - EPSILON {
                break;
            }
            if threshold.map_or(false, |t| best + EPSILON >= t) {
                info!("threshold reached on {} with {}", self.get_solver_name(qlev), best);
                break;
            }
        }
        let core = if exhausted && best <= EPSILON {
            self.zero_core(qlev, enable)
        } else {
            None
        };
        self.levels[qlev].close_session();
        Valuation { prob: best, core }
    }

    fn solve_ssat_forall(&mut self, qlev: usize) -> Valuation {
        let enable = self.levels[qlev].open_session();
        let threshold = self.threshold_at(qlev);
        let mut best: f64 = 1.0;
        let mut core = None;
        loop {
            match self.solve_level(qlev, &[enable]) {
                SolveResult::Sat => {}
                SolveResult::Unsat | SolveResult::Unknown => break,
            }
            self.read_selection(qlev);
            let value = self.evaluate_state(qlev);
            if self.interrupted {
                break;
            }
            self.count_evaluation();
            if value.prob <= EPSILON {
                best = 0.0;
                core = value.core.map(|c| self.lift_alive_core(&c));
                break;
            }
            best = best.min(value.prob);
            if threshold.map_or(false, |t| best + EPSILON < t) {
                info!("threshold missed on {} with {}", self.get_solver_name(qlev), best);
                break;
            }
            // selections with fewer alive groups cannot be worse for the existential player
            let clause = self.dead_with_alive_parent(qlev);
            self.add_learnt_clause_r(qlev, &clause);
        }
        self.levels[qlev].close_session();
        Valuation { prob: best, core }
    }

    fn solve_ssat_random(&mut self, qlev: usize) -> Valuation {
        let enable = self.levels[qlev].open_session();
        let threshold = self.threshold_at(qlev);
        let mut map = ProbMap::new();
        let mut exhausted = false;
        loop {
            match self.solve_level(qlev, &[enable]) {
                SolveResult::Sat => {}
                SolveResult::Unsat => {
                    exhausted = true;
                    break;
                }
                SolveResult::Unknown => break,
            }
            self.read_selection(qlev);
            self.minimal_alive_selection(qlev, enable);
            if self.interrupted {
                break;
            }
            let value = self.evaluate_state(qlev);
            if self.interrupted {
                break;
            }
            self.count_evaluation();

            let region = self.dead_with_alive_parent(qlev);
            match value.core {
                Some(ref core) if value.prob <= EPSILON => {
                    let clause = self.get_learnt_clause_r(core);
                    self.add_learnt_clause_e(qlev, clause);
                }
                _ if value.prob <= EPSILON => {}
                _ => {
                    let translated = {
                        let alive = &self.alive;
                        let groups = &self.groups;
                        let counting = match &self.counting[qlev] {
                            Some(counting) => counting,
                            None => panic!("no counting state for level {}", qlev),
                        };
                        counting.formula.translate(&region, |g| {
                            groups.group(g).parent.map_or(true, |p| alive[p])
                        })
                    };
                    if let Some(clause) = translated {
                        map.insert(value.prob, clause);
                    }
                }
            }
            self.add_learnt_clause_r(qlev, &region);

            if let Some(t) = threshold {
                let (lower, uncovered) = self.selection_wmc(qlev, &map);
                if lower + EPSILON >= t || lower + uncovered + EPSILON < t {
                    info!(
                        "threshold decided on {} with bounds [{}, {}]",
                        self.get_solver_name(qlev),
                        lower,
                        lower + uncovered
                    );
                    break;
                }
            }
        }
        let prob = if self.interrupted || map.is_empty() {
            0.0
        } else {
            self.selection_wmc(qlev, &map).0
        };
        let core = if exhausted && prob <= EPSILON {
            self.zero_core(qlev, enable)
        } else {
            None
        };
        self.levels[qlev].close_session();
        Valuation { prob, core }
    }

    /// `s_g` for every group of level `qlev` that is dead although its parent is alive.
    fn dead_with_alive_parent(&self, qlev: usize) -> Vec<EncGrp> {
        self.groups
            .at_level(qlev)
            .iter()
            .filter(|&&g| {
                !self.alive[g]
                    && self.groups.group(g).parent.map_or(true, |p| self.alive[p])
            })
            .map(|&g| encode_sel(g, true))
            .collect()
    }

    /// Alive facts over level `qlev` lifted to their parents.
    fn lift_alive_core(&self, core: &[EncGrp]) -> Vec<EncGrp> {
        let mut lifted: Vec<EncGrp> = core
            .iter()
            .filter_map(|&fact| self.groups.group(get_group(fact)).parent)
            .map(|p| encode_sel(p, true))
            .collect();
        self.sort_clause(&mut lifted);
        self.remove_duplicate_lits(&mut lifted);
        lifted
    }

    /// The alive parents that made level `qlev` unsatisfiable, unless the session
    /// clauses took part in the conflict.
    fn zero_core(&mut self, qlev: usize, enable: Literal) -> Option<Vec<EncGrp>> {
        if self.levels[qlev]
            .engine
            .failed()
            .contains(&enable.variable())
        {
            return None;
        }
        let mut core = self.failed_facts(qlev);
        self.remove_lits(&mut core, false);
        trace!("zero core on {}: {:?}", self.get_solver_name(qlev), core);
        Some(core)
    }

    /// Drops alive groups from a selection as long as the value of the smaller
    /// selection stays at most `bound`. Every superset of the result is then blocked.
    pub(super) fn partial_assignment_pruning(
        &mut self,
        qlev: usize,
        alive: Vec<EncGrp>,
        bound: f64,
    ) -> Vec<EncGrp> {
        let mut kept = alive.clone();
        for &fact in &alive {
            let g = get_group(fact);
            self.stats.inc_level(qlev, LevelEvent::DropAttempt);
            self.alive.set(g, false);
            let value = self.evaluate_state(qlev);
            if self.interrupted {
                break;
            }
            if value.prob <= bound + EPSILON {
                self.stats.inc_level(qlev, LevelEvent::DropSuccess);
                kept.retain(|&f| f != fact);
            } else {
                self.alive.set(g, true);
            }
        }
        for &fact in &alive {
            self.alive.set(get_group(fact), true);
        }
        if kept.len() < alive.len() {
            self.stats.inc(SolverEvent::PrunedClause);
            self.stats
                .inc_by(SolverEvent::PrunedLiteral, alive.len() - kept.len());
        }
        kept
    }

    /// Shrinks the alive set of the current move of level `qlev` to an inclusion-minimal
    /// one by forcing one more group dead at a time.
    fn minimal_alive_selection(&mut self, qlev: usize, enable: Literal) {
        let _timer = self.stats.start(SolverPhase::Mcs);
        let candidates: Vec<GroupId> = self
            .groups
            .at_level(qlev)
            .iter()
            .cloned()
            .filter(|&g| self.alive[g])
            .collect();
        for g in candidates {
            if !self.alive[g] {
                continue;
            }
            let mut extra = vec![enable];
            for &h in self.groups.at_level(qlev) {
                let parent_alive = self.groups.group(h).parent.map_or(true, |p| self.alive[p]);
                if parent_alive && (h == g || !self.alive[h]) {
                    extra.push(Literal::new(self.selectors.s(qlev, h), true));
                }
            }
            match self.solve_level(qlev, &extra) {
                SolveResult::Sat => {
                    self.stats.inc(SolverEvent::McsSuccess);
                    self.read_selection(qlev);
                }
                SolveResult::Unsat => self.stats.inc(SolverEvent::McsFailure),
                SolveResult::Unknown => return,
            }
        }
    }

    /// Value of a random level from its regions with the configured counter, together
    /// with the weight no region covers.
    pub(super) fn selection_wmc(&mut self, qlev: usize, map: &ProbMap) -> (f64, f64) {
        let _timer = self.stats.start(SolverPhase::Counting);
        self.dump_level(qlev, map);
        let counter = self.options.counter;
        let result = self.count_with(qlev, map, counter);
        if self.options.verify_counting {
            let other = self.count_with(qlev, map, counter.other());
            if (other.0 - result.0).abs() > 1e-6 {
                warn!(
                    "counters disagree on {}: {} {} vs. {} {}",
                    self.get_solver_name(qlev),
                    counter,
                    result.0,
                    counter.other(),
                    other.0
                );
                self.stats.inc(SolverEvent::CountingMismatch);
            }
        }
        result
    }

    fn count_with(&mut self, qlev: usize, map: &ProbMap, kind: CounterKind) -> (f64, f64) {
        let stats = &mut self.stats;
        let counting = match self.counting[qlev].as_mut() {
            Some(counting) => counting,
            None => panic!("no counting state for level {}", qlev),
        };
        if kind == CounterKind::DisjointCube {
            match calculate_prob(&counting.formula, map, &mut counting.cube, stats) {
                Some(result) => {
                    stats.inc(SolverEvent::DisjointCubeSuccess);
                    return result;
                }
                None => {
                    covered_by!("disjoint_cube_fallback");
                    stats.inc(SolverEvent::DisjointCubeFallback);
                }
            }
        }
        match calculate_prob(&counting.formula, map, &mut counting.compiled, stats) {
            Some(result) => result,
            None => panic!("compiled counting failed on level {}", qlev),
        }
    }

    /// Writes the weighted CNF of the regions of level `qlev` to the dump directory.
    fn dump_level(&mut self, qlev: usize, map: &ProbMap) {
        let dir = match &self.dump_dir {
            Some(dir) => dir.clone(),
            None => return,
        };
        let _timer = self.stats.start(SolverPhase::CountingIo);
        let counting = match &self.counting[qlev] {
            Some(counting) => counting,
            None => return,
        };
        let (dimacs, _) = counting.formula.to_dimacs_cnf_en(map);
        let path = dir.join(format!("level{}.cnf", qlev));
        if let Err(e) = fs::write(&path, dimacs) {
            warn!("cannot write {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Solver, SolverOptions};
    use super::*;
    use crate::matrix::Matrix;
    use crate::parse::sdimacs;

    /// Exhaustive evaluation of the prefix.
    fn oracle(matrix: &Matrix, qlev: usize, assignment: &mut Vec<Option<bool>>) -> f64 {
        if qlev == matrix.prefix.num_levels() {
            let satisfied = matrix
                .clauses
                .iter()
                .all(|clause| clause.is_satisfied_by(assignment));
            return if satisfied { 1.0 } else { 0.0 };
        }
        let level = matrix.prefix.level(qlev);
        let variables = level.variables.clone();
        let mut values = Vec::new();
        for bits in 0..(1usize << variables.len()) {
            let mut weight = 1.0;
            for (i, &var) in variables.iter().enumerate() {
                let value = bits & (1 << i) != 0;
                assignment[var as usize] = Some(value);
                let p = matrix.prefix.probability_of(var);
                weight *= if value { p } else { 1.0 - p };
            }
            values.push((weight, oracle(matrix, qlev + 1, assignment)));
        }
        for &var in &variables {
            assignment[var as usize] = None;
        }
        match level.quantifier {
            Quantifier::Existential => values.iter().map(|v| v.1).fold(0.0, f64::max),
            Quantifier::Universal => values.iter().map(|v| v.1).fold(1.0, f64::min),
            Quantifier::Random => values.iter().map(|(w, v)| w * v).sum(),
        }
    }

    fn expected(matrix: &Matrix) -> f64 {
        if matrix.conflict() {
            return 0.0;
        }
        let mut assignment = vec![None; matrix.prefix.max_variable() as usize + 1];
        oracle(matrix, 0, &mut assignment)
    }

    fn solve(matrix: &Matrix, options: SolverOptions) -> f64 {
        let mut solver = GameSolver::new(matrix, options);
        match solver.solve() {
            SolverResult::Probability(p) => p,
            result => panic!("unexpected result {:?}", result),
        }
    }

    fn variants() -> Vec<SolverOptions> {
        let mut variants = vec![SolverOptions::default()];
        let mut options = SolverOptions::default();
        options.cache = false;
        options.partial_pruning = false;
        variants.push(options);
        let mut options = SolverOptions::default();
        options.counter = CounterKind::DisjointCube;
        options.verify_counting = true;
        variants.push(options);
        let mut options = SolverOptions::default();
        options.recycle_limit = 1;
        options.max_pending_clauses = 0;
        variants.push(options);
        variants
    }

    fn check(instance: &str) {
        let matrix = sdimacs::parse(instance).unwrap();
        let expected = expected(&matrix);
        for options in variants() {
            let prob = solve(&matrix, options);
            assert!(
                (prob - expected).abs() < 1e-6,
                "{} instead of {} with {:?}",
                prob,
                expected,
                options
            );
        }
    }

    #[test]
    fn single_random_variable() {
        let matrix = sdimacs::parse("p cnf 1 1\nr 0.3 1 0\n1 0\n").unwrap();
        for options in variants() {
            assert!((solve(&matrix, options) - 0.3).abs() < 1e-9);
        }
        let matrix = sdimacs::parse("p cnf 1 1\nr 0.3 1 0\n-1 0\n").unwrap();
        assert!((solve(&matrix, SolverOptions::default()) - 0.7).abs() < 1e-9);
    }

    #[test]
    fn trivial_formulas() {
        let matrix = sdimacs::parse("p cnf 1 1\nr 0.3 1 0\n0\n").unwrap();
        assert_eq!(solve(&matrix, SolverOptions::default()), 0.0);
        let matrix = sdimacs::parse("p cnf 1 0\nr 0.3 1 0\n").unwrap();
        assert_eq!(solve(&matrix, SolverOptions::default()), 1.0);
    }

    #[test]
    fn merged_random_level() {
        check(
            "p cnf 3 2
r 0.5 1 0
r 0.25 2 0
e 3 0
1 2 3 0
-3 0
",
        );
    }

    #[test]
    fn random_exists_random() {
        check(
            "p cnf 3 3
r 0.5 1 0
e 2 0
r 0.3 3 0
1 2 0
-2 3 0
-1 -3 0
",
        );
    }

    #[test]
    fn exists_random_forall() {
        check(
            "p cnf 4 4
e 1 0
r 0.6 2 3 0
a 4 0
1 2 4 0
-1 3 0
2 3 -4 0
-2 -3 -1 0
",
        );
    }

    #[test]
    fn alternating_with_existential_choice() {
        check(
            "p cnf 5 5
r 0.4 1 2 0
e 3 0
r 0.7 4 5 0
1 3 4 0
-3 2 0
1 -2 -4 0
-1 -3 5 0
3 -5 4 0
",
        );
    }

    #[test]
    fn existential_outermost() {
        check(
            "p cnf 4 4
e 1 2 0
r 0.5 3 4 0
1 3 0
2 4 0
-1 -2 0
-3 -4 1 0
",
        );
    }

    #[test]
    fn cache_hit_on_repeated_solve() {
        covers!("cache_hit");
        let matrix = sdimacs::parse(
            "p cnf 3 3
r 0.5 1 0
e 2 0
r 0.3 3 0
1 2 0
-2 3 0
-1 -3 0
",
        )
        .unwrap();
        let mut solver = GameSolver::new(&matrix, SolverOptions::default());
        let first = solver.solve();
        let hits = solver.statistics().get(SolverEvent::CacheHit);
        let second = solver.solve();
        assert_eq!(first, second);
        assert_eq!(solver.statistics().get(SolverEvent::CacheHit), hits + 1);
    }

    #[test]
    fn disjoint_cube_overflow_falls_back_to_compiled_counter() {
        covers!("disjoint_cube_fallback");
        let matrix = sdimacs::parse(
            "p cnf 3 2
r 0.5 1 0
r 0.25 2 0
e 3 0
1 2 3 0
-3 0
",
        )
        .unwrap();
        let mut options = SolverOptions::default();
        options.counter = CounterKind::DisjointCube;
        // room for the terminals only
        options.bdd_node_limit = 2;
        let mut solver = GameSolver::new(&matrix, options);
        let prob = match solver.solve() {
            SolverResult::Probability(p) => p,
            result => panic!("unexpected result {:?}", result),
        };
        assert!((prob - expected(&matrix)).abs() < 1e-9);
        assert!((prob - 0.625).abs() < 1e-9);
        assert!(solver.statistics().get(SolverEvent::DisjointCubeFallback) > 0);
    }

    #[test]
    fn recycling_is_transparent() {
        let matrix = sdimacs::parse(
            "p cnf 4 4
e 1 0
r 0.6 2 3 0
a 4 0
1 2 4 0
-1 3 0
2 3 -4 0
-2 -3 -1 0
",
        )
        .unwrap();
        let mut options = SolverOptions::default();
        let plain = solve(&matrix, options);
        options.recycle_limit = 1;
        let mut solver = GameSolver::new(&matrix, options);
        let recycled = match solver.solve() {
            SolverResult::Probability(p) => p,
            result => panic!("unexpected result {:?}", result),
        };
        assert!((plain - recycled).abs() < 1e-9);
        assert!(solver.statistics().get(SolverEvent::Recycle) > 0);
    }

    #[test]
    fn threshold_stops_early() {
        // Pr = 1 - 0.5 * 0.5 = 0.75
        let instance = "p cnf 2 1
t 0.5 0
r 0.5 1 2 0
1 2 0
";
        let matrix = sdimacs::parse(instance).unwrap();
        assert_eq!(matrix.threshold(), Some(0.5));
        let prob = solve(&matrix, SolverOptions::default());
        assert!(prob + EPSILON >= 0.5);
        assert!(prob <= 0.75 + EPSILON);
    }

    #[test]
    fn level_dumps() {
        let dir = tempfile::tempdir().unwrap();
        let matrix = sdimacs::parse("p cnf 2 1\nr 0.5 1 0\ne 2 0\n1 2 0\n").unwrap();
        let mut solver = GameSolver::new(&matrix, SolverOptions::default());
        solver.set_dump_dir(Some(dir.path()));
        assert_eq!(solver.solve(), SolverResult::Probability(1.0));
        let dump = fs::read_to_string(dir.path().join("level0.cnf")).unwrap();
        assert!(dump.starts_with("c weighted cnf of random level 0"));
    }

    #[test]
    fn backtrack_budget() {
        let matrix = sdimacs::parse(
            "p cnf 3 3
r 0.5 1 0
e 2 0
r 0.3 3 0
1 2 0
-2 3 0
-1 -3 0
",
        )
        .unwrap();
        let mut options = SolverOptions::default();
        options.max_backtracks = Some(0);
        let mut solver = GameSolver::new(&matrix, options);
        assert_eq!(solver.solve(), SolverResult::Unknown);
    }
}
