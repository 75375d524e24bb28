use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::cmp::{Eq, Ord};
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct CountingStats<E>
where
    E: Eq + Hash + Ord,
{
    values: FxHashMap<E, usize>,
}

impl<E: Hash + Eq + Ord> CountingStats<E> {
    pub fn new() -> Self {
        Self {
            values: FxHashMap::default(),
        }
    }

    pub fn get(&self, value: &E) -> usize {
        *self.values.get(value).unwrap_or(&0)
    }

    pub fn inc(&mut self, value: E) {
        self.inc_by(value, 1);
    }

    pub fn inc_by(&mut self, value: E, val: usize) {
        let val_entry = self.values.entry(value).or_insert(0);
        *val_entry += val;
    }
}

impl<E: fmt::Display + Hash + Eq + Ord + Copy> fmt::Display for CountingStats<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut vals: Vec<_> = self.values.keys().collect();
        vals.sort();
        for event in &vals {
            writeln!(f, "  {:<24}{}", event, self.get(*event))?;
        }
        Ok(())
    }
}

type TimingStatsValues<E> = FxHashMap<E, Vec<Duration>>;

pub struct Timer<E>
where
    E: Eq + Hash + Copy,
{
    pointer: Rc<RefCell<TimingStatsValues<E>>>,
    phase: E,
    begin: Instant,
    stopped: bool,
}

impl<E: Eq + Hash + Copy> Timer<E> {
    pub fn stop(&mut self) {
        let duration = self.begin.elapsed();
        let mut values = self.pointer.borrow_mut();
        let e = values.entry(self.phase).or_insert_with(Vec::new);
        e.push(duration);
        self.stopped = true;
    }
}

impl<E: Eq + Hash + Copy> Drop for Timer<E> {
    fn drop(&mut self) {
        if !self.stopped {
            self.stop();
        }
    }
}

pub struct TimingStats<E>
where
    E: Eq + Hash + Copy,
{
    pointer: Rc<RefCell<TimingStatsValues<E>>>,
}

impl<E: Eq + Hash + Copy> TimingStats<E> {
    pub fn new() -> Self {
        Self {
            pointer: Rc::new(RefCell::new(FxHashMap::default())),
        }
    }

    pub fn start(&self, phase: E) -> Timer<E> {
        Timer {
            pointer: self.pointer.clone(),
            phase,
            begin: Instant::now(),
            stopped: false,
        }
    }

    pub fn count(&self, phase: E) -> usize {
        let values = self.pointer.borrow();
        values.get(&phase).map_or(0, Vec::len)
    }

    pub fn sum(&self, phase: E) -> Duration {
        let values = self.pointer.borrow();
        values
            .get(&phase)
            .map_or_else(|| Duration::new(0, 0), |v| v.iter().sum())
    }

    pub fn avg(&self, phase: E) -> Duration {
        #[allow(clippy::cast_possible_truncation)]
        let count = self.count(phase) as u32;
        if count == 0 {
            return Duration::new(0, 0);
        }
        self.sum(phase) / count
    }

    pub fn max(&self, phase: E) -> Duration {
        let values = self.pointer.borrow();
        values
            .get(&phase)
            .and_then(|v| v.iter().max().cloned())
            .unwrap_or_else(|| Duration::new(0, 0))
    }
}

impl<E: Eq + Hash + Copy + Ord + fmt::Display> fmt::Display for TimingStats<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut phases: Vec<E> = self.pointer.borrow().keys().cloned().collect();
        phases.sort();
        for phase in phases {
            let sum = self.sum(phase);
            let avg = self.avg(phase);
            let max = self.max(phase);
            writeln!(
                f,
                "  {:<12} count {}  sum {}.{:03}  avg {}.{:03}  max {}.{:03}",
                phase,
                self.count(phase),
                sum.as_secs(),
                sum.subsec_millis(),
                avg.as_secs(),
                avg.subsec_millis(),
                max.as_secs(),
                max.subsec_millis()
            )?;
        }
        Ok(())
    }
}

/// Events counted over the whole solving run.
#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Clone, Copy)]
pub enum SolverEvent {
    Backtrack,
    LearntClause,
    LearntLiteral,
    PushCoreAttempt,
    PushCoreSuccess,
    MinimizeCheck,
    MinimizeDrop,
    McsSuccess,
    McsFailure,
    PrunedClause,
    PrunedLiteral,
    CacheLookup,
    CacheHit,
    WmcCall,
    AssumptionWmcCall,
    Compilation,
    DisjointCubeSuccess,
    DisjointCubeFallback,
    CountingMismatch,
    Recycle,
}

impl fmt::Display for SolverEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            SolverEvent::Backtrack => "backtracks",
            SolverEvent::LearntClause => "learnt clauses",
            SolverEvent::LearntLiteral => "learnt literals",
            SolverEvent::PushCoreAttempt => "push core attempts",
            SolverEvent::PushCoreSuccess => "push core successes",
            SolverEvent::MinimizeCheck => "minimize checks",
            SolverEvent::MinimizeDrop => "minimize drops",
            SolverEvent::McsSuccess => "mcs success",
            SolverEvent::McsFailure => "mcs failure",
            SolverEvent::PrunedClause => "pruned clauses",
            SolverEvent::PrunedLiteral => "pruned literals",
            SolverEvent::CacheLookup => "cache lookups",
            SolverEvent::CacheHit => "cache hits",
            SolverEvent::WmcCall => "wmc calls",
            SolverEvent::AssumptionWmcCall => "assumption wmc calls",
            SolverEvent::Compilation => "compilations",
            SolverEvent::DisjointCubeSuccess => "disjoint cube success",
            SolverEvent::DisjointCubeFallback => "disjoint cube fallback",
            SolverEvent::CountingMismatch => "counting mismatches",
            SolverEvent::Recycle => "recycles",
        };
        write!(f, "{}", name)
    }
}

/// Events counted per quantifier level.
#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Clone, Copy)]
pub enum LevelEvent {
    SelectionSat,
    SelectionUnsat,
    DropAttempt,
    DropSuccess,
}

impl fmt::Display for LevelEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            LevelEvent::SelectionSat => "sel sat",
            LevelEvent::SelectionUnsat => "sel unsat",
            LevelEvent::DropAttempt => "drop attempts",
            LevelEvent::DropSuccess => "drops",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Clone, Copy)]
pub enum SolverPhase {
    Sat,
    Minimization,
    Mcs,
    Counting,
    CountingIo,
    Bdd,
}

impl fmt::Display for SolverPhase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            SolverPhase::Sat => "sat",
            SolverPhase::Minimization => "minimize",
            SolverPhase::Mcs => "mcs",
            SolverPhase::Counting => "wmc",
            SolverPhase::CountingIo => "wmc io",
            SolverPhase::Bdd => "bdd",
        };
        write!(f, "{}", name)
    }
}

/// Passive diagnostics of a solving run, never consulted by the solver itself.
pub struct Statistics {
    pub events: CountingStats<SolverEvent>,
    pub levels: Vec<CountingStats<LevelEvent>>,
    pub timing: TimingStats<SolverPhase>,
}

impl Statistics {
    pub fn new(num_levels: usize) -> Self {
        Self {
            events: CountingStats::new(),
            levels: vec![CountingStats::new(); num_levels],
            timing: TimingStats::new(),
        }
    }

    pub fn inc(&mut self, event: SolverEvent) {
        self.events.inc(event);
    }

    pub fn inc_by(&mut self, event: SolverEvent, val: usize) {
        self.events.inc_by(event, val);
    }

    pub fn get(&self, event: SolverEvent) -> usize {
        self.events.get(&event)
    }

    pub fn inc_level(&mut self, level: usize, event: LevelEvent) {
        self.levels[level].inc(event);
    }

    pub fn get_level(&self, level: usize, event: LevelEvent) -> usize {
        self.levels.get(level).map_or(0, |l| l.get(&event))
    }

    pub fn start(&self, phase: SolverPhase) -> Timer<SolverPhase> {
        self.timing.start(phase)
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "events:")?;
        write!(f, "{}", self.events)?;
        for (level, counts) in self.levels.iter().enumerate() {
            writeln!(
                f,
                "level {}: sel sat {}  sel unsat {}  drops {}/{}",
                level,
                counts.get(&LevelEvent::SelectionSat),
                counts.get(&LevelEvent::SelectionUnsat),
                counts.get(&LevelEvent::DropSuccess),
                counts.get(&LevelEvent::DropAttempt)
            )?;
        }
        let learnt = self.get(SolverEvent::LearntClause);
        if learnt > 0 {
            writeln!(
                f,
                "average learnt clause length {:.2}",
                self.get(SolverEvent::LearntLiteral) as f64 / learnt as f64
            )?;
        }
        writeln!(f, "timing:")?;
        write!(f, "{}", self.timing)
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[derive(PartialEq, Eq, Hash, PartialOrd, Ord, Clone, Copy)]
    enum TestEnum {
        Case1,
        Case2,
    }

    #[test]
    fn counter() {
        let mut counter = CountingStats::new();
        counter.inc(TestEnum::Case1);
        assert_eq!(counter.get(&TestEnum::Case1), 1);
        assert_eq!(counter.get(&TestEnum::Case2), 0);
        counter.inc(TestEnum::Case2);
        counter.inc_by(TestEnum::Case2, 2);
        assert_eq!(counter.get(&TestEnum::Case1), 1);
        assert_eq!(counter.get(&TestEnum::Case2), 3);
    }

    #[test]
    fn timer() {
        let timing = TimingStats::new();
        let mut timer1 = timing.start(TestEnum::Case1);
        let mut timer2 = timing.start(TestEnum::Case2);
        timer1.stop();
        {
            let _timer = timing.start(TestEnum::Case1);
            // atomatically stopped when dropped
        }
        timer2.stop();
        assert_eq!(timing.count(TestEnum::Case1), 2);
        assert_eq!(timing.count(TestEnum::Case2), 1);
        assert!(timing.max(TestEnum::Case1) <= timing.sum(TestEnum::Case1));
    }

    #[test]
    fn level_statistics_report() {
        let mut stats = Statistics::new(2);
        stats.inc_level(1, LevelEvent::DropAttempt);
        stats.inc_level(1, LevelEvent::DropAttempt);
        stats.inc_level(1, LevelEvent::DropSuccess);
        stats.inc(SolverEvent::LearntClause);
        stats.inc_by(SolverEvent::LearntLiteral, 3);
        assert_eq!(stats.get_level(1, LevelEvent::DropAttempt), 2);
        assert_eq!(stats.get_level(0, LevelEvent::DropAttempt), 0);
        assert_eq!(stats.get_level(7, LevelEvent::DropAttempt), 0);
        let report = format!("{}", stats);
        assert!(report.contains("level 1: sel sat 0  sel unsat 0  drops 1/2"));
        assert!(report.contains("average learnt clause length 3.00"));
    }
}
