// extern crates
#[macro_use]
extern crate log;
#[macro_use]
extern crate uncover;

// This defines two macros, `covers!` and `covered_by!`.
// They will be no-ops unless `cfg!(debug_assertions)` is true.
define_uncover_macros!(enable_if(cfg!(debug_assertions)));

use clap::{App, Arg};
use log::LevelFilter;

// Rust stdlib
use std::error::Error;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::str::FromStr;

// modules
mod literal;
pub use self::literal::Literal;
use literal::*;

mod clause;
use clause::*;

pub mod matrix;
pub use self::matrix::Matrix;
use matrix::*;

mod dimacs;
pub use dimacs::*;

pub mod count;
pub mod experiment;
pub mod parse;
pub mod sat;
pub mod solve;
mod utils;

pub use solve::{
    prepare_matrix, CounterKind, GameSolver, Solver, SolverOptions, SolverResult,
};

// Command line parsing

#[derive(Debug)]
pub struct SolverConfig {
    /// None for stdin
    filename: Option<String>,
    verbosity: LevelFilter,
    statistics: bool,
    options: SolverOptions,
    skolem: Option<PathBuf>,
    herbrand: Option<PathBuf>,
    dot: Option<PathBuf>,
    dump_dir: Option<PathBuf>,
}

impl SolverConfig {
    pub const NAME: &'static str = "selsat";
    pub const DESC: &'static str =
        "selsat solves quantified Boolean formulas (QDIMACS) and stochastic Boolean satisfiability problems (SDIMACS) by clause selection.";

    pub fn new(args: &[String]) -> Result<Self, Box<dyn Error>> {
        let default_options = SolverOptions::default();

        let default = |val| match val {
            true => "1",
            false => "0",
        };
        let bool_flag = |name: &'static str, value: bool, help: &'static str| {
            Arg::with_name(name)
                .long(name)
                .default_value(default(value))
                .value_name("bool")
                .takes_value(true)
                .possible_values(&["0", "1"])
                .hide_possible_values(true)
                .help(help)
        };
        let minimize_limit = default_options.minimize_limit.to_string();
        let recycle_limit = default_options.recycle_limit.to_string();
        let max_pending = default_options.max_pending_clauses.to_string();
        let node_limit = default_options.bdd_node_limit.to_string();
        let counter = default_options.counter.to_string();

        let flags = App::new(Self::NAME)
            .version(env!("CARGO_PKG_VERSION"))
            .author(env!("CARGO_PKG_AUTHORS"))
            .about(Self::DESC)
            .arg(
                Arg::with_name("INPUT")
                    .help("Sets the input file to use")
                    .required(false)
                    .index(1),
            )
            .arg(
                Arg::with_name("v")
                    .short("v")
                    .multiple(true)
                    .help("Sets the level of verbosity"),
            )
            .arg(
                Arg::with_name("statistics")
                    .long("--statistics")
                    .help("Prints solving statistics after solving"),
            )
            .arg(
                Arg::with_name("counter")
                    .long("--counter")
                    .default_value(&counter)
                    .takes_value(true)
                    .possible_values(CounterKind::values())
                    .help("Sets the weighted model counter used on random levels"),
            )
            .arg(bool_flag(
                "cache",
                default_options.cache,
                "Controls whether values of solved selections are cached",
            ))
            .arg(bool_flag(
                "minimize-cores",
                default_options.minimize_cores,
                "Controls whether unsat cores are minimized before learning",
            ))
            .arg(
                Arg::with_name("minimize-limit")
                    .long("--minimize-limit")
                    .default_value(&minimize_limit)
                    .takes_value(true)
                    .help("Sets the number of SAT calls spent on minimizing a single core"),
            )
            .arg(bool_flag(
                "push-unsat-core",
                default_options.push_unsat_core,
                "Controls whether cores are pushed through levels that cannot influence them",
            ))
            .arg(bool_flag(
                "partial-pruning",
                default_options.partial_pruning,
                "Controls whether blocking clauses on existential levels are generalized",
            ))
            .arg(bool_flag(
                "universal-reduction",
                default_options.universal_reduction,
                "Controls whether universal reduction is applied to QBF",
            ))
            .arg(bool_flag(
                "verify-counting",
                default_options.verify_counting,
                "Controls whether every count is checked against the other counter",
            ))
            .arg(
                Arg::with_name("recycle-limit")
                    .long("--recycle-limit")
                    .default_value(&recycle_limit)
                    .takes_value(true)
                    .help("Rebuilds a level abstraction after this many disabled clauses, 0 never"),
            )
            .arg(
                Arg::with_name("max-pending-clauses")
                    .long("--max-pending-clauses")
                    .default_value(&max_pending)
                    .takes_value(true)
                    .help("Sets the number of pending clauses before the compiled counter recompiles"),
            )
            .arg(
                Arg::with_name("bdd-node-limit")
                    .long("--bdd-node-limit")
                    .default_value(&node_limit)
                    .takes_value(true)
                    .help("Sets the node limit of the disjoint cube counter"),
            )
            .arg(
                Arg::with_name("timeout")
                    .long("--timeout")
                    .takes_value(true)
                    .value_name("seconds")
                    .help("Stops solving with an unknown result after the given time"),
            )
            .arg(
                Arg::with_name("max-backtracks")
                    .long("--max-backtracks")
                    .takes_value(true)
                    .help("Stops solving with an unknown result after the given number of backtracks"),
            )
            .arg(
                Arg::with_name("skolem")
                    .long("--skolem")
                    .takes_value(true)
                    .value_name("FILE")
                    .help("Writes the Skolem certificate to FILE"),
            )
            .arg(
                Arg::with_name("herbrand")
                    .long("--herbrand")
                    .takes_value(true)
                    .value_name("FILE")
                    .help("Writes the Herbrand certificate to FILE"),
            )
            .arg(
                Arg::with_name("dot")
                    .long("--dot")
                    .takes_value(true)
                    .value_name("FILE")
                    .help("Writes the group trie in Graphviz format to FILE"),
            )
            .arg(
                Arg::with_name("dump-level-cnf")
                    .long("--dump-level-cnf")
                    .takes_value(true)
                    .value_name("DIR")
                    .help("Writes the weighted CNF of every counted random level to DIR"),
            );

        let matches = flags.get_matches_from(args);

        let filename = matches.value_of("INPUT").map(|s| s.to_string());

        let verbosity = match matches.occurrences_of("v") {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        let statistics = matches.is_present("statistics");

        let flag = |name: &str| matches.value_of(name) == Some("1");
        let number = |name: &str| -> Result<Option<usize>, Box<dyn Error>> {
            match matches.value_of(name) {
                None => Ok(None),
                Some(s) => Ok(Some(s.parse::<usize>().map_err(|err| {
                    format!("invalid value `{}` for `--{}`: {}", s, name, err)
                })?)),
            }
        };

        let mut options = SolverOptions::default();
        if let Some(counter) = matches.value_of("counter") {
            options.counter = CounterKind::from_str(counter)?;
        }
        options.cache = flag("cache");
        options.minimize_cores = flag("minimize-cores");
        options.push_unsat_core = flag("push-unsat-core");
        options.partial_pruning = flag("partial-pruning");
        options.universal_reduction = flag("universal-reduction");
        options.verify_counting = flag("verify-counting");
        if let Some(limit) = number("minimize-limit")? {
            options.minimize_limit = limit;
        }
        if let Some(limit) = number("recycle-limit")? {
            options.recycle_limit = limit;
        }
        if let Some(limit) = number("max-pending-clauses")? {
            options.max_pending_clauses = limit;
        }
        if let Some(limit) = number("bdd-node-limit")? {
            options.bdd_node_limit = limit;
        }
        options.timeout = number("timeout")?.map(|t| t as u64);
        options.max_backtracks = number("max-backtracks")?;

        let path = |name: &str| matches.value_of(name).map(PathBuf::from);

        Ok(SolverConfig {
            filename,
            verbosity,
            statistics,
            options,
            skolem: path("skolem"),
            herbrand: path("herbrand"),
            dot: path("dot"),
            dump_dir: path("dump-level-cnf"),
        })
    }

    fn certify(&self) -> bool {
        self.skolem.is_some() || self.herbrand.is_some()
    }

    fn read_input(&self) -> io::Result<String> {
        let mut contents = String::new();
        match self.filename {
            Some(ref filename) => {
                File::open(filename)?.read_to_string(&mut contents)?;
            }
            None => {
                io::stdin().read_to_string(&mut contents)?;
            }
        }
        Ok(contents)
    }

    fn certificate_writer(path: &Option<PathBuf>) -> io::Result<Box<dyn Write>> {
        Ok(match path {
            Some(path) => Box::new(io::BufWriter::new(File::create(path)?)),
            None => Box::new(io::sink()),
        })
    }

    pub fn run(&self) -> Result<SolverResult, Box<dyn Error>> {
        // a logger may already be installed when running several configurations
        let _ = env_logger::Builder::new()
            .filter_level(self.verbosity)
            .format_timestamp(None)
            .try_init();

        let contents = self.read_input()?;
        let mut matrix = parse::sdimacs::parse(&contents)?;
        info!(
            "parsed {} clauses over {} levels",
            matrix.clauses.len(),
            matrix.prefix.num_levels()
        );

        prepare_matrix(&mut matrix, &self.options, self.certify());

        let mut solver = GameSolver::new(&matrix, self.options);

        if let Some(ref path) = self.dot {
            let mut file = File::create(path)?;
            solver.groups().print_dot_repr(&mut file)?;
        }
        if let Some(ref dir) = self.dump_dir {
            fs::create_dir_all(dir)?;
        }
        solver.set_dump_dir(self.dump_dir.as_deref());

        if self.certify() {
            solver.enable_certification(
                Self::certificate_writer(&self.skolem)?,
                Self::certificate_writer(&self.herbrand)?,
            )?;
        }

        let result = solver.solve();

        if self.certify() {
            solver.certification_close()?;
        }

        match result {
            SolverResult::Probability(p) => {
                println!("s {}", p);
                if let Some(threshold) = matrix.threshold() {
                    println!(
                        "c threshold {} {}",
                        threshold,
                        if p >= threshold { "met" } else { "not met" }
                    );
                }
            }
            SolverResult::Satisfiable => println!("s SAT"),
            SolverResult::Unsatisfiable => println!("s UNSAT"),
            SolverResult::Unknown => println!("s UNKNOWN"),
        }
        println!("c solving took {:?}", solver.elapsed());

        if self.statistics {
            print!("{}", solver.statistics());
        }

        Ok(result)
    }
}
