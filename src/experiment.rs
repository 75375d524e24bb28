use crate::{
    parse::sdimacs,
    solve::{prepare_matrix, GameSolver, Solver, SolverOptions, SolverResult},
};
use atomicwrites::{AllowOverwrite, AtomicFile};
use clap::{App, Arg, SubCommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    collections::HashMap,
    error::Error,
    fmt, fs,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering as AtomicOrdering},
        mpsc::{channel, RecvTimeoutError},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

/// Probabilities of two runs that differ by more than this are reported as inconsistent.
const PROBABILITY_TOLERANCE: f64 = 1e-6;

/// Solving times closer than this count as equal.
const TIME_RESOLUTION: Duration = Duration::from_secs(1);

#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Clone)]
pub struct ExperimentConfig {
    config_file: String,
    mode: ExperimentMode,
    timeout: Duration,
}

#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Clone, Copy)]
pub enum ExperimentMode {
    Run,
    Analyze,
    Compare(usize, usize),
}

#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentResult {
    result: SolverResult,
    backtracks: usize,
    duration: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Results {
    benchmarks: Vec<String>,
    configs: Vec<SolverOptions>,
    /// indexed by `configs`
    results: Vec<HashMap<String, ExperimentResult>>,
}

/// Decided results of one benchmark that do not agree.
#[derive(Debug, Clone, PartialEq)]
struct Inconsistency {
    benchmark: String,
    results: Vec<(usize, SolverResult)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct ConfigSummary {
    config: usize,
    solved: usize,
    sat: usize,
    unsat: usize,
    ssat: usize,
    backtracks: usize,
    duration: Duration,
}

/// Pairwise comparison of two configurations on the benchmarks both have results for.
#[derive(Debug, Clone, Default)]
struct Comparison {
    base: usize,
    other: usize,
    /// equal, base less, other less
    backtracks: (usize, usize, usize),
    times: (usize, usize, usize),
    /// largest probability difference on benchmarks both solved
    deviation: f64,
    disagreements: Vec<String>,
    unique_base: Vec<(String, ExperimentResult)>,
    unique_other: Vec<(String, ExperimentResult)>,
}

impl ExperimentConfig {
    pub fn new(args: &[String]) -> Result<Self, Box<dyn Error>> {
        let flags = App::new("experiment")
            .version(env!("CARGO_PKG_VERSION"))
            .author(env!("CARGO_PKG_AUTHORS"))
            .about("Runs solver configurations on a benchmark set and compares their results.")
            .arg(Arg::with_name("config")
                .long("--config")
                .short("-c")
                .help("Sets the path of the experiment file")
                .required(true)
                .takes_value(true)
            ).arg(Arg::with_name("timeout")
                .long("--timeout")
                .help("Sets the time limit per benchmark in seconds")
                .default_value("60")
                .takes_value(true)
            ).subcommand(
                SubCommand::with_name("create")
                    .about("Creates a new experiment with the default configuration")
                    .arg(
                        Arg::with_name("benchmarks")
                        .long("--benchmarks")
                        .help("Sets the benchmarks to use")
                        .required(true)
                        .takes_value(true)
                        .multiple(true)
                    )
            ).subcommand(SubCommand::with_name("continue").about("Runs all open benchmarks"))
            .subcommand(SubCommand::with_name("analyze").about("Reports per configuration and inconsistent results"))
            .subcommand(SubCommand::with_name("compare").about("Compares two solver configurations")
                .arg(
                        Arg::with_name("solver-configs")
                        .help("Index of the solver configs that should be compared")
                        .required(true)
                        .takes_value(true)
                        .multiple(true)
                    )
            );

        let matches = flags.get_matches_from(args);
        let config_file = matches
            .value_of("config")
            .ok_or("missing experiment file")?
            .to_string();
        let timeout = match matches.value_of("timeout") {
            Some(secs) => Duration::from_secs(secs.parse::<u64>()?),
            None => Duration::from_secs(60),
        };

        let mode = match matches.subcommand() {
            ("create", Some(matches)) => {
                let benchmarks: Vec<String> = matches
                    .values_of("benchmarks")
                    .ok_or("missing benchmarks")?
                    .map(std::string::ToString::to_string)
                    .collect();
                eprintln!("Selected {} benchmarks, writing `{}`", benchmarks.len(), config_file);
                Results::new(benchmarks, SolverOptions::default()).store(&config_file)?;
                ExperimentMode::Run
            }
            ("continue", Some(_)) => ExperimentMode::Run,
            ("analyze", Some(_)) => ExperimentMode::Analyze,
            ("compare", Some(matches)) => {
                let cfgs = matches
                    .values_of("solver-configs")
                    .ok_or("missing solver configs")?
                    .map(|s| {
                        s.parse::<usize>()
                            .map_err(|_| format!("expected index of solver config, found {}", s))
                    })
                    .collect::<Result<Vec<usize>, String>>()?;
                if cfgs.len() != 2 {
                    return Err(format!("expected two solver configs, found {}", cfgs.len()).into());
                }
                ExperimentMode::Compare(cfgs[0], cfgs[1])
            }
            (cmd, _) => return Err(format!("unknown subcommand `{}`", cmd).into()),
        };
        Ok(Self {
            config_file,
            mode,
            timeout,
        })
    }

    pub fn run(&self) -> Result<(), Box<dyn Error>> {
        match self.mode {
            ExperimentMode::Run => {
                self.run_experiment()?;
                self.analyze_experiment()
            }
            ExperimentMode::Analyze => self.analyze_experiment(),
            ExperimentMode::Compare(a, b) => self.compare_solver_configs(a, b),
        }
    }

    fn run_experiment(&self) -> Result<(), Box<dyn Error>> {
        let mut results = Results::load(&self.config_file)?;
        let open = results.open_runs(self.timeout);

        let progress_bar = ProgressBar::new(open.len() as u64);
        progress_bar.set_style(
            ProgressStyle::default_bar().template("{wide_bar} {pos}/{len} {eta} remaining"),
        );
        progress_bar.enable_steady_tick(100);

        for (benchmark, config_idx) in open {
            let options = results.configs[config_idx];
            let result = run_benchmark(&benchmark, options, self.timeout)?;
            results.results[config_idx].insert(benchmark, result);
            results.store(&self.config_file)?;
            progress_bar.inc(1);
        }

        progress_bar.finish();
        Ok(())
    }

    fn analyze_experiment(&self) -> Result<(), Box<dyn Error>> {
        let results = Results::load(&self.config_file)?;
        for inconsistency in results.inconsistencies() {
            println!(
                "inconsistent results on `{}`: {:?}",
                inconsistency.benchmark, inconsistency.results
            );
        }
        for config_idx in 0..results.configs.len() {
            println!("{}", results.summary(config_idx));
        }
        Ok(())
    }

    fn compare_solver_configs(
        &self,
        base_idx: usize,
        other_idx: usize,
    ) -> Result<(), Box<dyn Error>> {
        let results = Results::load(&self.config_file)?;
        let comparison = results.compare(base_idx, other_idx)?;
        println!(
            "{}",
            colored_diff::PrettyDifference {
                expected: &serde_json::to_string_pretty(&results.configs[base_idx])?,
                actual: &serde_json::to_string_pretty(&results.configs[other_idx])?
            }
        );
        println!("{}", comparison);
        Ok(())
    }
}

/// Solves `benchmark` on a worker thread, interrupting the solver after `timeout`.
fn run_benchmark(
    benchmark: &str,
    options: SolverOptions,
    timeout: Duration,
) -> Result<ExperimentResult, Box<dyn Error>> {
    let contents = fs::read_to_string(benchmark)?;
    let mut matrix = sdimacs::parse(&contents)?;

    let (tx, rx) = channel();
    let interrupt = Arc::new(AtomicBool::new(false));
    let interrupted = interrupt.clone();

    // the solver is not `Send`, it is built and dropped on the worker thread
    let child = thread::spawn(move || {
        let start = Instant::now();
        prepare_matrix(&mut matrix, &options, false);
        let mut solver = GameSolver::new(&matrix, options);
        solver.set_interrupt(interrupted);
        let result = solver.solve();
        // the receiver is gone after a timeout
        let _ = tx.send(ExperimentResult::new(
            result,
            solver.num_backtracks(),
            start.elapsed(),
        ));
    });

    let result = match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            interrupt.store(true, AtomicOrdering::Relaxed);
            ExperimentResult::new(SolverResult::Unknown, 0, timeout)
        }
        Err(RecvTimeoutError::Disconnected) => {
            return Err(format!("solver thread failed on `{}`", benchmark).into())
        }
    };
    if child.join().is_err() {
        warn!("solver thread on `{}` panicked", benchmark);
    }
    Ok(result)
}

/// Whether two decided results are the same answer.
fn results_agree(a: SolverResult, b: SolverResult) -> bool {
    match (a, b) {
        (SolverResult::Probability(p), SolverResult::Probability(q)) => {
            (p - q).abs() <= PROBABILITY_TOLERANCE
        }
        (a, b) => a == b,
    }
}

impl ExperimentResult {
    fn new(result: SolverResult, backtracks: usize, duration: Duration) -> Self {
        Self {
            result,
            backtracks,
            duration,
        }
    }

    fn is_decided(&self) -> bool {
        self.result != SolverResult::Unknown
    }

    /// Unknown results are re-run when the time limit has increased since.
    fn needs_rerun(&self, timeout: Duration) -> bool {
        !self.is_decided() && self.duration < timeout
    }
}

impl Results {
    fn new(benchmarks: Vec<String>, options: SolverOptions) -> Self {
        Self {
            benchmarks,
            configs: vec![options],
            results: vec![HashMap::new()],
        }
    }

    fn load<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn Error>> {
        let mut results: Self = serde_json::from_str(&fs::read_to_string(path)?)?;
        if results.results.len() > results.configs.len() {
            return Err(format!(
                "{} result sets for {} solver configs",
                results.results.len(),
                results.configs.len()
            )
            .into());
        }
        // configs added by hand start without results
        results.results.resize_with(results.configs.len(), HashMap::new);
        Ok(results)
    }

    fn store<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn Error>> {
        let af = AtomicFile::new(path, AllowOverwrite);
        af.write(|f| serde_json::to_writer_pretty(f, self))?;
        Ok(())
    }

    /// Benchmark and config pairs without a final result.
    fn open_runs(&self, timeout: Duration) -> Vec<(String, usize)> {
        let mut open = Vec::new();
        for benchmark in &self.benchmarks {
            for (config_idx, results) in self.results.iter().enumerate() {
                if results
                    .get(benchmark)
                    .map_or(true, |result| result.needs_rerun(timeout))
                {
                    open.push((benchmark.clone(), config_idx));
                }
            }
        }
        open
    }

    fn inconsistencies(&self) -> Vec<Inconsistency> {
        let mut found = Vec::new();
        for benchmark in &self.benchmarks {
            let decided: Vec<(usize, SolverResult)> = self
                .results
                .iter()
                .enumerate()
                .filter_map(|(idx, results)| results.get(benchmark).map(|r| (idx, r)))
                .filter(|(_, r)| r.is_decided())
                .map(|(idx, r)| (idx, r.result))
                .collect();
            let consistent = decided
                .iter()
                .all(|&(_, r)| decided.iter().all(|&(_, s)| results_agree(r, s)));
            if !consistent {
                found.push(Inconsistency {
                    benchmark: benchmark.clone(),
                    results: decided,
                });
            }
        }
        found
    }

    fn summary(&self, config: usize) -> ConfigSummary {
        let mut summary = ConfigSummary {
            config,
            ..ConfigSummary::default()
        };
        for result in self.results[config].values() {
            match result.result {
                SolverResult::Unknown => continue,
                SolverResult::Satisfiable => summary.sat += 1,
                SolverResult::Unsatisfiable => summary.unsat += 1,
                SolverResult::Probability(_) => summary.ssat += 1,
            }
            summary.solved += 1;
            summary.backtracks += result.backtracks;
            summary.duration += result.duration;
        }
        summary
    }

    fn compare(&self, base: usize, other: usize) -> Result<Comparison, Box<dyn Error>> {
        if base >= self.configs.len() || other >= self.configs.len() {
            return Err(format!("only {} solver configs exist", self.configs.len()).into());
        }
        let mut comparison = Comparison {
            base,
            other,
            ..Comparison::default()
        };
        for benchmark in &self.benchmarks {
            let (base_res, other_res) = match (
                self.results[base].get(benchmark),
                self.results[other].get(benchmark),
            ) {
                (Some(b), Some(o)) => (b, o),
                _ => continue,
            };
            match (base_res.is_decided(), other_res.is_decided()) {
                (false, false) => continue,
                (false, true) => {
                    comparison
                        .unique_other
                        .push((benchmark.clone(), other_res.clone()));
                    continue;
                }
                (true, false) => {
                    comparison
                        .unique_base
                        .push((benchmark.clone(), base_res.clone()));
                    continue;
                }
                (true, true) => {}
            }
            if let (SolverResult::Probability(p), SolverResult::Probability(q)) =
                (base_res.result, other_res.result)
            {
                comparison.deviation = comparison.deviation.max((p - q).abs());
            }
            if !results_agree(base_res.result, other_res.result) {
                comparison.disagreements.push(benchmark.clone());
            }
            tally(
                &mut comparison.backtracks,
                base_res.backtracks.cmp(&other_res.backtracks),
            );
            let time_order = if base_res.duration + TIME_RESOLUTION < other_res.duration {
                Ordering::Less
            } else if other_res.duration + TIME_RESOLUTION < base_res.duration {
                Ordering::Greater
            } else {
                Ordering::Equal
            };
            tally(&mut comparison.times, time_order);
        }
        Ok(comparison)
    }
}

fn tally(counts: &mut (usize, usize, usize), order: Ordering) {
    match order {
        Ordering::Equal => counts.0 += 1,
        Ordering::Less => counts.1 += 1,
        Ordering::Greater => counts.2 += 1,
    }
}

impl fmt::Display for ConfigSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cfg {}, solved {}, sat {}, unsat {}, ssat {}, backtracks {}, time {:.2}s",
            self.config,
            self.solved,
            self.sat,
            self.unsat,
            self.ssat,
            self.backtracks,
            self.duration.as_secs_f64()
        )
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (base, other) = (self.base, self.other);
        writeln!(
            f,
            "backtracks: equal {}, cfg {} less {}, cfg {} less {}",
            self.backtracks.0, base, self.backtracks.1, other, self.backtracks.2
        )?;
        writeln!(
            f,
            "solving time: equal {}, cfg {} less {}, cfg {} less {}",
            self.times.0, base, self.times.1, other, self.times.2
        )?;
        writeln!(f, "largest probability difference {:e}", self.deviation)?;
        for benchmark in &self.disagreements {
            writeln!(f, "inconsistent results on `{}`", benchmark)?;
        }
        write!(
            f,
            "uniquely solved: cfg {}: {}, cfg {}: {}",
            base,
            self.unique_base.len(),
            other,
            self.unique_other.len()
        )?;
        for (idx, unique) in &[(base, &self.unique_base), (other, &self.unique_other)] {
            if !unique.is_empty() {
                write!(f, "\n\nunique cfg {}", idx)?;
                for (bench, res) in unique.iter() {
                    write!(f, "\n* {}: {:?}", bench, res.result)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(result: SolverResult, backtracks: usize, secs: u64) -> ExperimentResult {
        ExperimentResult::new(result, backtracks, Duration::from_secs(secs))
    }

    /// Two configs over three benchmarks.
    fn two_configs(base: Vec<ExperimentResult>, other: Vec<ExperimentResult>) -> Results {
        let benchmarks: Vec<String> = vec!["a", "b", "c"].into_iter().map(String::from).collect();
        let mut results = Results::new(benchmarks.clone(), SolverOptions::default());
        let mut options = SolverOptions::default();
        options.cache = false;
        results.configs.push(options);
        results.results = vec![
            benchmarks.iter().cloned().zip(base).collect(),
            benchmarks.iter().cloned().zip(other).collect(),
        ];
        results
    }

    #[test]
    fn reruns_only_unknown_results() {
        let timeout = Duration::from_secs(10);
        let solved = result(SolverResult::Probability(0.5), 3, 1);
        assert!(!solved.needs_rerun(timeout));
        let interrupted = result(SolverResult::Unknown, 0, 1);
        assert!(interrupted.needs_rerun(timeout));
        let timed_out = result(SolverResult::Unknown, 0, 10);
        assert!(!timed_out.needs_rerun(timeout));
    }

    #[test]
    fn probabilities_agree_within_tolerance() {
        let p = SolverResult::Probability(0.375);
        assert!(results_agree(p, SolverResult::Probability(0.375 + 1e-9)));
        assert!(!results_agree(p, SolverResult::Probability(0.38)));
        assert!(!results_agree(p, SolverResult::Satisfiable));
        assert!(results_agree(SolverResult::Unsatisfiable, SolverResult::Unsatisfiable));
        assert!(!results_agree(SolverResult::Satisfiable, SolverResult::Unsatisfiable));
    }

    #[test]
    fn open_runs_cover_missing_and_interrupted_results() {
        let mut results = two_configs(
            vec![
                result(SolverResult::Probability(0.5), 1, 1),
                result(SolverResult::Unknown, 0, 5),
                result(SolverResult::Unknown, 0, 10),
            ],
            vec![],
        );
        results.results[1].insert("c".to_string(), result(SolverResult::Satisfiable, 0, 1));
        let open = results.open_runs(Duration::from_secs(10));
        assert_eq!(
            open,
            vec![
                ("a".to_string(), 1),
                ("b".to_string(), 0),
                ("b".to_string(), 1)
            ]
        );
    }

    #[test]
    fn inconsistent_probabilities_are_reported() {
        let results = two_configs(
            vec![
                result(SolverResult::Probability(0.25), 4, 1),
                result(SolverResult::Probability(0.5), 4, 1),
                result(SolverResult::Unknown, 0, 60),
            ],
            vec![
                result(SolverResult::Probability(0.25 + 1e-9), 2, 1),
                result(SolverResult::Probability(0.75), 2, 1),
                result(SolverResult::Probability(0.1), 2, 1),
            ],
        );
        assert_eq!(
            results.inconsistencies(),
            vec![Inconsistency {
                benchmark: "b".to_string(),
                results: vec![
                    (0, SolverResult::Probability(0.5)),
                    (1, SolverResult::Probability(0.75))
                ],
            }]
        );

        let summary = results.summary(0);
        assert_eq!(summary.solved, 2);
        assert_eq!(summary.ssat, 2);
        assert_eq!(summary.backtracks, 8);
        assert_eq!(summary.duration, Duration::from_secs(2));
    }

    #[test]
    fn comparison_of_two_configs() {
        let results = two_configs(
            vec![
                result(SolverResult::Probability(0.25), 4, 1),
                result(SolverResult::Probability(0.5), 1, 30),
                result(SolverResult::Unknown, 0, 60),
            ],
            vec![
                result(SolverResult::Probability(0.25), 4, 1),
                result(SolverResult::Probability(0.625), 9, 2),
                result(SolverResult::Unsatisfiable, 3, 5),
            ],
        );
        let comparison = results.compare(0, 1).unwrap();
        assert_eq!(comparison.backtracks, (1, 1, 0));
        assert_eq!(comparison.times, (1, 0, 1));
        assert!((comparison.deviation - 0.125).abs() < 1e-9);
        assert_eq!(comparison.disagreements, vec!["b".to_string()]);
        assert!(comparison.unique_base.is_empty());
        assert_eq!(comparison.unique_other.len(), 1);
        assert_eq!(comparison.unique_other[0].0, "c");
        assert!(comparison
            .to_string()
            .contains("uniquely solved: cfg 0: 0, cfg 1: 1"));

        assert!(results.compare(0, 2).is_err());
    }

    #[test]
    fn configs_added_by_hand_get_result_sets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("experiment.json");
        let mut results = Results::new(vec!["a".to_string()], SolverOptions::default());
        results.configs.push(SolverOptions::default());
        results.store(&path).unwrap();
        let loaded = Results::load(&path).unwrap();
        assert_eq!(loaded.results.len(), 2);
        assert_eq!(loaded.open_runs(Duration::from_secs(1)).len(), 2);
    }

    #[test]
    fn create_and_run_experiment() {
        let dir = tempfile::tempdir().unwrap();
        let benchmark = dir.path().join("random.sdimacs");
        std::fs::write(&benchmark, "p cnf 1 1\nr 0.25 1 0\n1 0\n").unwrap();
        let config_file = dir.path().join("experiment.json");
        let args: Vec<String> = vec![
            "experiment",
            "-c",
            config_file.to_str().unwrap(),
            "create",
            "--benchmarks",
            benchmark.to_str().unwrap(),
        ]
        .into_iter()
        .map(String::from)
        .collect();
        let config = ExperimentConfig::new(&args).unwrap();
        config.run().unwrap();

        let results = Results::load(&config_file).unwrap();
        assert_eq!(results.configs, vec![SolverOptions::default()]);
        let result = &results.results[0][benchmark.to_str().unwrap()];
        match result.result {
            SolverResult::Probability(p) => assert!((p - 0.25).abs() < 1e-9),
            other => panic!("unexpected result {:?}", other),
        }
        assert!(results.open_runs(Duration::from_secs(60)).is_empty());
        assert!(results.inconsistencies().is_empty());
    }
}
