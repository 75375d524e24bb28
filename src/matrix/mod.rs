use super::*;
use serde::{Deserialize, Serialize};

pub mod groups;

/// Probability assigned to random variables whose prefix line leaves it unspecified (`-1`).
const DEFAULT_PROBABILITY: f64 = 0.5;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Serialize, Deserialize)]
pub enum Quantifier {
    Existential,
    Universal,
    Random,
}

impl Quantifier {
    /// The adversary in the two-player view, random levels count as existential moves
    /// of nature that work against the ∃ player.
    pub fn opponent(self) -> Quantifier {
        match self {
            Quantifier::Existential | Quantifier::Random => Quantifier::Universal,
            Quantifier::Universal => Quantifier::Existential,
        }
    }

    pub fn short_name(self) -> &'static str {
        match self {
            Quantifier::Existential => "E",
            Quantifier::Universal => "A",
            Quantifier::Random => "R",
        }
    }

    fn dimacs_char(self) -> char {
        match self {
            Quantifier::Existential => 'e',
            Quantifier::Universal => 'a',
            Quantifier::Random => 'r',
        }
    }
}

/// One line of the quantifier prefix as it appears in the input.
#[derive(Debug, Clone, PartialEq)]
pub enum PrefixEntry {
    Quantified {
        quantifier: Quantifier,
        probability: Option<f64>,
        variables: Vec<Variable>,
    },
    Threshold(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LevelInfo {
    pub quantifier: Quantifier,
    pub variables: Vec<Variable>,
    /// Common probability of all variables of a random level, `None` if they differ.
    pub probability: Option<f64>,
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VariableInfo {
    pub level: Option<usize>,
    /// Probability of being assigned true, random variables only.
    pub probability: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct Prefix {
    levels: Vec<LevelInfo>,
    variables: Vec<VariableInfo>,
}

impl Prefix {
    /// Builds the level structure from the raw prefix lines.
    ///
    /// Threshold entries are removed and attached to the next quantifier level (the last
    /// one wins if several precede a level), empty levels are dropped and adjacent
    /// levels of the same type are merged.
    pub fn compact(entries: Vec<PrefixEntry>, num_variables: usize) -> Result<Prefix, String> {
        let mut prefix = Prefix {
            levels: Vec::new(),
            variables: vec![VariableInfo::default(); num_variables + 1],
        };
        let mut pending_threshold = None;
        for entry in entries {
            let (quantifier, probability, variables) = match entry {
                PrefixEntry::Threshold(threshold) => {
                    if pending_threshold.is_some() {
                        debug!("threshold {} overrides previous threshold", threshold);
                    }
                    pending_threshold = Some(threshold);
                    continue;
                }
                PrefixEntry::Quantified {
                    quantifier,
                    probability,
                    variables,
                } => (quantifier, probability, variables),
            };
            if variables.is_empty() {
                continue;
            }
            let threshold = pending_threshold.take();
            let probability = match quantifier {
                Quantifier::Random => Some(probability.unwrap_or(DEFAULT_PROBABILITY)),
                _ => None,
            };
            let merge = match prefix.levels.last() {
                Some(last) => last.quantifier == quantifier && threshold.is_none(),
                None => false,
            };
            if merge {
                let last = prefix
                    .levels
                    .last_mut()
                    .ok_or_else(|| "empty prefix".to_string())?;
                if last.probability != probability {
                    last.probability = None;
                }
            } else {
                prefix.levels.push(LevelInfo {
                    quantifier,
                    variables: Vec::new(),
                    probability,
                    threshold,
                });
            }
            let level = prefix.levels.len() - 1;
            for variable in variables {
                prefix.bind(variable, level, probability)?;
            }
        }
        if let Some(threshold) = pending_threshold {
            warn!("threshold {} is not followed by a quantifier level", threshold);
        }
        Ok(prefix)
    }

    fn bind(
        &mut self,
        variable: Variable,
        level: usize,
        probability: Option<f64>,
    ) -> Result<(), String> {
        let index = variable as usize;
        if index >= self.variables.len() {
            self.variables.resize(index + 1, VariableInfo::default());
        }
        if self.variables[index].level.is_some() {
            return Err(format!("variable {} is quantified twice", variable));
        }
        self.variables[index] = VariableInfo {
            level: Some(level),
            probability,
        };
        self.levels[level].variables.push(variable);
        Ok(())
    }

    /// Adds the given variables to an outermost existential level.
    pub fn bind_free_variables(&mut self, free: &[Variable]) {
        if free.is_empty() {
            return;
        }
        let prepend = self
            .levels
            .first()
            .map_or(true, |level| level.quantifier != Quantifier::Existential);
        if prepend {
            let threshold = self.levels.first_mut().and_then(|l| l.threshold.take());
            self.levels.insert(
                0,
                LevelInfo {
                    quantifier: Quantifier::Existential,
                    variables: Vec::new(),
                    probability: None,
                    threshold,
                },
            );
            for info in &mut self.variables {
                if let Some(level) = info.level.as_mut() {
                    *level += 1;
                }
            }
        }
        for &variable in free {
            info!("bind unquantified variable {} existentially", variable);
            if let Err(e) = self.bind(variable, 0, None) {
                panic!("free variable was bound before: {}", e);
            }
        }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, level: usize) -> &LevelInfo {
        &self.levels[level]
    }

    pub fn levels(&self) -> &[LevelInfo] {
        &self.levels
    }

    pub fn variable(&self, variable: Variable) -> VariableInfo {
        self.variables
            .get(variable as usize)
            .cloned()
            .unwrap_or_default()
    }

    /// Level of a bound variable; querying an unbound variable is an invariant violation.
    pub fn level_of(&self, variable: Variable) -> usize {
        match self.variable(variable).level {
            Some(level) => level,
            None => panic!("variable {} is not bound by the prefix", variable),
        }
    }

    pub fn quantifier_of(&self, variable: Variable) -> Quantifier {
        self.levels[self.level_of(variable)].quantifier
    }

    pub fn probability_of(&self, variable: Variable) -> f64 {
        self.variable(variable)
            .probability
            .unwrap_or(DEFAULT_PROBABILITY)
    }

    pub fn max_variable(&self) -> Variable {
        (self.variables.len().max(1) - 1) as Variable
    }

    pub fn is_stochastic(&self) -> bool {
        self.levels
            .iter()
            .any(|l| l.quantifier == Quantifier::Random)
    }
}

#[derive(Debug, Clone)]
pub struct Matrix {
    pub prefix: Prefix,
    pub clauses: Vec<Clause>,
    conflict: bool,
    orig_clause_num: usize,
}

impl Matrix {
    pub fn new(prefix: Prefix, num_clauses: usize) -> Matrix {
        Matrix {
            prefix,
            clauses: Vec::with_capacity(num_clauses),
            conflict: false,
            orig_clause_num: num_clauses,
        }
    }

    /// Adds a clause, returns its id unless it was dropped as tautology or empty clause.
    pub fn add(&mut self, clause: Clause) -> Option<ClauseId> {
        if clause.is_tautology() {
            trace!("drop tautological clause {}", clause.dimacs());
            return None;
        }
        if clause.is_empty() {
            self.conflict = true;
            return None;
        }
        self.clauses.push(clause);
        Some(self.clauses.len() - 1)
    }

    pub fn conflict(&self) -> bool {
        self.conflict
    }

    pub fn orig_clause_num(&self) -> usize {
        self.orig_clause_num
    }

    pub fn is_stochastic(&self) -> bool {
        self.prefix.is_stochastic()
    }

    /// Threshold of the outermost level, used for decision queries `Pr >= θ`.
    pub fn threshold(&self) -> Option<f64> {
        self.prefix.levels.first().and_then(|l| l.threshold)
    }

    /// Binds variables that occur in clauses but not in the prefix.
    pub fn bind_free_variables(&mut self) {
        let mut free: Vec<Variable> = self
            .clauses
            .iter()
            .flat_map(|c| c.iter())
            .map(|l| l.variable())
            .filter(|&v| self.prefix.variable(v).level.is_none())
            .collect();
        free.sort();
        free.dedup();
        self.prefix.bind_free_variables(&free);
    }

    /// Removes universal literals that no existential literal of the clause depends on.
    /// Only sound without random levels.
    pub fn reduce_universal(&mut self) {
        assert!(!self.is_stochastic());
        let prefix = &self.prefix;
        let mut emptied = false;
        for clause in &mut self.clauses {
            let max_exists = clause
                .iter()
                .filter(|l| prefix.quantifier_of(l.variable()) == Quantifier::Existential)
                .map(|l| prefix.level_of(l.variable()))
                .max();
            let before = clause.len();
            clause.retain(|l| {
                prefix.quantifier_of(l.variable()) != Quantifier::Universal
                    || max_exists.map_or(false, |m| prefix.level_of(l.variable()) < m)
            });
            if clause.len() < before {
                trace!("universal reduction removed {} literals", before - clause.len());
            }
            emptied |= clause.is_empty();
        }
        if emptied {
            self.conflict = true;
            self.clauses.retain(|c| !c.is_empty());
        }
    }
}

impl Dimacs for Matrix {
    fn dimacs(&self) -> String {
        let mut dimacs = format!(
            "p cnf {} {}\n",
            self.prefix.max_variable(),
            self.clauses.len()
        );
        for level in &self.prefix.levels {
            if let Some(threshold) = level.threshold {
                dimacs.push_str(&format!("t {}\n", threshold));
            }
            match (level.quantifier, level.probability) {
                (Quantifier::Random, None) => {
                    for &v in &level.variables {
                        dimacs.push_str(&format!("r {} {} 0\n", self.prefix.probability_of(v), v));
                    }
                }
                (quantifier, probability) => {
                    dimacs.push(quantifier.dimacs_char());
                    if let Some(p) = probability {
                        dimacs.push_str(&format!(" {}", p));
                    }
                    for &v in &level.variables {
                        dimacs.push_str(&format!(" {}", v));
                    }
                    dimacs.push_str(" 0\n");
                }
            }
        }
        for clause in &self.clauses {
            dimacs.push_str(&clause.dimacs());
            dimacs.push('\n');
        }
        dimacs
    }
}
