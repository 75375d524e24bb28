use super::analyze::Analysis;
use super::encoding::encode_sel;
use super::game::GameSolver;
use super::SolverResult;
use crate::matrix::Quantifier;
use crate::sat::{SatEngine, SolveResult};
use crate::utils::statistics::SolverEvent;

impl<'a, E: SatEngine> GameSolver<'a, E> {
    /// Plays the selection game level by level, every conflict is analyzed into a
    /// learned clause or decides the game.
    pub(super) fn solve_qbf(&mut self) -> SolverResult {
        if self.matrix.conflict() {
            return SolverResult::Unsatisfiable;
        }
        if self.matrix.clauses.is_empty() {
            return SolverResult::Satisfiable;
        }
        let mut qlev = 0;
        let winner = loop {
            let (level, facts, winner) = match self.solve_level(qlev, &[]) {
                SolveResult::Unknown => return SolverResult::Unknown,
                SolveResult::Sat => {
                    self.read_selection(qlev);
                    if let Some(g) = self.alive_end(qlev) {
                        trace!("group {} survives {}", g, self.get_solver_name(qlev));
                        (qlev, vec![encode_sel(g, true)], Quantifier::Universal)
                    } else if self.all_dead(qlev) {
                        trace!("all groups dead on {}", self.get_solver_name(qlev));
                        let facts = self
                            .groups
                            .at_level(qlev)
                            .iter()
                            .map(|&g| encode_sel(g, false))
                            .collect();
                        (qlev, facts, Quantifier::Existential)
                    } else {
                        qlev += 1;
                        continue;
                    }
                }
                SolveResult::Unsat => {
                    let winner = self.level_type(qlev).opponent();
                    if qlev == 0 {
                        break winner;
                    }
                    (qlev - 1, self.unsat_core(qlev), winner)
                }
            };
            match self.analyze(level, facts, winner) {
                Analysis::Decided(winner) => break winner,
                Analysis::Backtrack(bt) => {
                    debug!(
                        "backtrack from {} to {}",
                        self.get_solver_name(qlev),
                        self.get_solver_name(bt)
                    );
                    self.tot_bt_count += 1;
                    self.stats.inc(SolverEvent::Backtrack);
                    qlev = bt;
                }
            }
        };
        match winner {
            Quantifier::Existential => SolverResult::Satisfiable,
            _ => SolverResult::Unsatisfiable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::certificate::{check_certificate, parse_certificate};
    use super::super::{prepare_matrix, Solver, SolverOptions};
    use super::*;
    use crate::parse::sdimacs;
    use std::io::Read;

    fn solve(instance: &str, options: SolverOptions) -> SolverResult {
        let mut matrix = sdimacs::parse(instance).unwrap();
        prepare_matrix(&mut matrix, &options, false);
        let mut solver = GameSolver::new(&matrix, options);
        solver.solve()
    }

    /// Solves with every option combination that changes the search.
    fn check(instance: &str, expected: SolverResult) {
        for &(minimize, push, reduce) in &[
            (true, true, true),
            (false, false, false),
            (true, false, true),
            (false, true, false),
        ] {
            let mut options = SolverOptions::default();
            options.minimize_cores = minimize;
            options.push_unsat_core = push;
            options.universal_reduction = reduce;
            assert_eq!(solve(instance, options), expected, "{:?}", options);
        }
        let mut options = SolverOptions::default();
        options.recycle_limit = 1;
        assert_eq!(solve(instance, options), expected);
    }

    /// Solves with certification and replays the certificate of the result.
    fn check_certified(instance: &str, expected: SolverResult) {
        let matrix = sdimacs::parse(instance).unwrap();
        let mut solver = GameSolver::new(&matrix, SolverOptions::default());
        solver
            .enable_certification(Box::new(std::io::sink()), Box::new(std::io::sink()))
            .unwrap();
        assert_eq!(solver.solve(), expected);
        let cases = solver.certificate_cases(expected == SolverResult::Satisfiable);
        assert!(check_certificate(&matrix, expected, cases));
    }

    #[test]
    fn test_false() {
        let matrix = sdimacs::parse("p cnf 0 1\n0\n").unwrap();
        assert!(matrix.conflict());
        let mut solver = GameSolver::new(&matrix, SolverOptions::default());
        assert_eq!(solver.solve(), SolverResult::Unsatisfiable);
    }

    #[test]
    fn test_true() {
        check("p cnf 0 0", SolverResult::Satisfiable);
    }

    #[test]
    fn test_sat_example() {
        check_certified("p cnf 2 1\ne 1 0\na 2 0\n1 2 0\n", SolverResult::Satisfiable);
    }

    #[test]
    fn test_unsat_example() {
        check_certified(
            "p cnf 2 2\ne 1 0\na 2 0\n1 2 0\n-1 2 0\n",
            SolverResult::Unsatisfiable,
        );
    }

    #[test]
    fn test_sat_simple() {
        let instance = "c
p cnf 4 4
a 1 2 0
e 3 4 0
1 3 0
-1 4 0
-3 -4 0
-1 2 4 0
";
        check(instance, SolverResult::Satisfiable);
        check_certified(instance, SolverResult::Satisfiable);
    }

    #[test]
    fn test_unsat_simple() {
        let instance = "c
p cnf 4 4
a 1 2 0
e 3 4 0
1 3 0
-1 4 0
-3 -4 0
1 2 4 0
";
        check(instance, SolverResult::Unsatisfiable);
        check_certified(instance, SolverResult::Unsatisfiable);
    }

    #[test]
    fn test_two_alternations() {
        let instance = "c
p cnf 11 24
a 1 0
e 2 0
a 3 0
e 4 5 6 7 8 9 10 11 0
3 5 0
-4 5 0
-3 4 -5 0
-3 6 0
4 6 0
3 -4 -6 0
2 -7 0
5 -7 0
6 -7 0
-2 -5 -6 7 0
-1 8 0
-7 8 0
1 7 -8 0
-2 -9 0
5 -9 0
6 -9 0
2 -5 -6 9 0
1 10 0
-9 10 0
-1 9 -10 0
8 -11 0
10 -11 0
-8 -10 11 0
11 0
";
        check(instance, SolverResult::Satisfiable);
        check_certified(instance, SolverResult::Satisfiable);
    }

    #[test]
    fn test_wrong_sat() {
        let instance = "c
c This instance was falsly characterized as SAT
p cnf 4 3
a 4 0
e 3 0
a 1 0
e 2 0
-3 0
3 -4 0
-2 -1 0
";
        check(instance, SolverResult::Unsatisfiable);
        check_certified(instance, SolverResult::Unsatisfiable);
    }

    #[test]
    fn test_cnf() {
        let instance = "c
c CNF instance without quantifier
p cnf 1 2
-1 0
1 0
";
        check(instance, SolverResult::Unsatisfiable);
    }

    #[test]
    fn test_wrong_unsat() {
        let instance = "c
c This instance was falsly characterized as UNSAT
p cnf 3 2
a 1 2 0
e 3 0
3 -2 0
-3 -1 2 0
";
        check(instance, SolverResult::Satisfiable);
        check_certified(instance, SolverResult::Satisfiable);
    }

    #[test]
    fn test_strong_unsat_crash() {
        let instance = "c
p cnf 4 3
a 2 0
e 1 0
a 4 0
e 3 0
1 3 0
-3 -2 0
3 -4 0
";
        check(instance, SolverResult::Unsatisfiable);
        check_certified(instance, SolverResult::Unsatisfiable);
    }

    #[test]
    fn test_refinement_literal_failure() {
        let instance = "c
p cnf 5 5
a 5 0
e 3 0
a 1 0
e 2 4 0
-2 0
4 5 0
-4 -5 0
-4 -5 -1 0
2 3 0
";
        check(instance, SolverResult::Satisfiable);
        check_certified(instance, SolverResult::Satisfiable);
    }

    #[test]
    fn test_refinement_literal_failure2() {
        let instance = "c
p cnf 4 3
a 4 0
e 1 0
a 3 0
e 2 0
-2 0
2 -3 -4 0
-1 -4 0
";
        check(instance, SolverResult::Unsatisfiable);
        check_certified(instance, SolverResult::Unsatisfiable);
    }

    #[test]
    fn test_backtrack_budget() {
        // the first response of the existential player is learned at level 0
        let instance = "c
p cnf 4 4
a 1 2 0
e 3 4 0
1 3 0
-1 4 0
-3 -4 0
-1 2 4 0
";
        let mut options = SolverOptions::default();
        options.max_backtracks = Some(0);
        assert_eq!(solve(instance, options), SolverResult::Unknown);
    }

    #[test]
    fn test_certificate_files() {
        let instance = "p cnf 2 2\ne 1 0\na 2 0\n1 2 0\n-1 2 0\n";
        let matrix = sdimacs::parse(instance).unwrap();
        let skolem = tempfile::NamedTempFile::new().unwrap();
        let herbrand = tempfile::NamedTempFile::new().unwrap();
        let mut solver = GameSolver::new(&matrix, SolverOptions::default());
        solver
            .enable_certification(
                Box::new(skolem.reopen().unwrap()),
                Box::new(herbrand.reopen().unwrap()),
            )
            .unwrap();
        let result = solver.solve();
        assert_eq!(result, SolverResult::Unsatisfiable);
        solver.certification_close().unwrap();

        let mut content = String::new();
        herbrand.reopen().unwrap().read_to_string(&mut content).unwrap();
        assert!(content.starts_with("c herbrand certificate\n"));
        assert!(content.ends_with("r UNSAT\n"));
        let cases = parse_certificate(&content).unwrap();
        assert!(!cases.is_empty());
        assert!(check_certificate(&matrix, result, &cases));

        let mut content = String::new();
        skolem.reopen().unwrap().read_to_string(&mut content).unwrap();
        assert!(content.starts_with("c skolem certificate\n"));
    }
}
