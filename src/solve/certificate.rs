//! Skolem and Herbrand certificates as sequences of guarded moves.
//!
//! Whenever conflict analysis passes a level of the winner, the facts over the parent
//! level that justified the win and the move the winner played are recorded as a
//! case. The strategy of the winner at a level plays the move of the first case whose
//! condition holds. The textual form is
//!
//! ```text
//! c skolem certificate
//! case 2
//! d 1 -3 0
//! a 4 0
//! m -5 6 0
//! r SAT
//! ```
//!
//! where `d` lines list the chain literals of a group that has to be dead (one of them
//! holds), `a` lines those of a group that has to be alive (none of them holds) and the
//! `m` line closes the case with its move.

use super::encoding::*;
use super::game::GameSolver;
use super::SolverResult;
use crate::literal::{Literal, Variable};
use crate::matrix::{Matrix, Quantifier};
use crate::sat::SatEngine;
use std::fmt;
use std::io::{self, Write};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Case {
    pub level: usize,
    pub dead: Vec<Vec<Literal>>,
    pub alive: Vec<Vec<Literal>>,
    pub mov: Vec<Literal>,
}

impl Case {
    pub fn matches(&self, assignment: &[Option<bool>]) -> bool {
        self.dead
            .iter()
            .all(|chain| chain.iter().any(|l| l.holds(assignment)))
            && self
                .alive
                .iter()
                .all(|chain| chain.iter().all(|l| !l.holds(assignment)))
    }

    fn write<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        writeln!(writer, "case {}", self.level)?;
        for chain in &self.dead {
            writeln!(writer, "d {}", DimacsLine(chain))?;
        }
        for chain in &self.alive {
            writeln!(writer, "a {}", DimacsLine(chain))?;
        }
        writeln!(writer, "m {}", DimacsLine(&self.mov))
    }
}

struct DimacsLine<'a>(&'a [Literal]);

impl<'a> fmt::Display for DimacsLine<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for literal in self.0 {
            write!(f, "{} ", literal)?;
        }
        write!(f, "0")
    }
}

/// Collects the cases of both players and streams them to their writers.
pub struct CertificateRecorder {
    skolem: Box<dyn Write>,
    herbrand: Box<dyn Write>,
    skolem_cases: Vec<Case>,
    herbrand_cases: Vec<Case>,
    error: Option<io::Error>,
}

impl CertificateRecorder {
    pub fn new(skolem: Box<dyn Write>, herbrand: Box<dyn Write>) -> CertificateRecorder {
        CertificateRecorder {
            skolem,
            herbrand,
            skolem_cases: Vec::new(),
            herbrand_cases: Vec::new(),
            error: None,
        }
    }

    fn writer(&mut self, skolem: bool) -> &mut dyn Write {
        if skolem {
            &mut *self.skolem
        } else {
            &mut *self.herbrand
        }
    }

    /// Write errors are kept and reported when the certificate is closed.
    pub fn record(&mut self, skolem: bool, case: Case) {
        if self.error.is_none() {
            if let Err(e) = case.write(self.writer(skolem)) {
                self.error = Some(e);
            }
        }
        if skolem {
            self.skolem_cases.push(case);
        } else {
            self.herbrand_cases.push(case);
        }
    }

    pub fn cases(&self, skolem: bool) -> &[Case] {
        if skolem {
            &self.skolem_cases
        } else {
            &self.herbrand_cases
        }
    }
}

impl<'a, E: SatEngine> GameSolver<'a, E> {
    /// Starts recording certificates, only supported for QBF.
    pub fn enable_certification(
        &mut self,
        skolem: Box<dyn Write>,
        herbrand: Box<dyn Write>,
    ) -> io::Result<()> {
        if self.matrix.is_stochastic() {
            warn!("certificates are not supported for stochastic formulas");
            return Ok(());
        }
        self.certificate = Some(CertificateRecorder::new(skolem, herbrand));
        self.certification_open()
    }

    fn certification_open(&mut self) -> io::Result<()> {
        if let Some(recorder) = self.certificate.as_mut() {
            writeln!(recorder.writer(true), "c skolem certificate")?;
            writeln!(recorder.writer(false), "c herbrand certificate")?;
        }
        Ok(())
    }

    /// Writes the result to both certificates and reports the first write error.
    pub fn certification_close(&mut self) -> io::Result<()> {
        let result = match self.result {
            SolverResult::Satisfiable => "SAT",
            SolverResult::Unsatisfiable => "UNSAT",
            _ => "UNKNOWN",
        };
        let mut recorder = match self.certificate.take() {
            Some(recorder) => recorder,
            None => return Ok(()),
        };
        if let Some(e) = recorder.error.take() {
            return Err(e);
        }
        for &skolem in &[true, false] {
            let writer = recorder.writer(skolem);
            writeln!(writer, "r {}", result)?;
            writer.flush()?;
        }
        let (skolem, herbrand) = (recorder.skolem_cases.len(), recorder.herbrand_cases.len());
        info!("certificates: {} skolem and {} herbrand cases", skolem, herbrand);
        Ok(())
    }

    pub fn certificate_cases(&self, skolem: bool) -> &[Case] {
        match &self.certificate {
            Some(recorder) => recorder.cases(skolem),
            None => &[],
        }
    }

    /// Records the move of level `qlev` guarded by the translated facts over `qlev - 1`.
    pub(super) fn analyze_cert(&mut self, qlev: usize, facts: &[EncGrp], skolem: bool) {
        if self.certificate.is_none() {
            return;
        }
        let (dead, alive) = self.analyze_cert_pin(facts);
        let case = Case {
            level: qlev,
            dead,
            alive,
            mov: self.analyze_cert_extract_move(qlev),
        };
        trace!("certificate case {:?}", case);
        if let Some(recorder) = self.certificate.as_mut() {
            recorder.record(skolem, case);
        }
    }

    /// Chain literals of the dead and the alive facts.
    fn analyze_cert_pin(&self, facts: &[EncGrp]) -> (Vec<Vec<Literal>>, Vec<Vec<Literal>>) {
        let mut dead = Vec::new();
        let mut alive = Vec::new();
        for &fact in facts {
            let chain = self.groups.chain_literals(get_group(fact));
            if get_select(fact) {
                alive.push(chain);
            } else {
                dead.push(chain);
            }
        }
        (dead, alive)
    }

    fn analyze_cert_extract_move(&self, qlev: usize) -> Vec<Literal> {
        self.moves[qlev].clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateParseError {
    line: usize,
    message: String,
}

impl fmt::Display for CertificateParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for CertificateParseError {}

/// Reads the cases of a certificate in the textual form.
pub fn parse_certificate(content: &str) -> Result<Vec<Case>, CertificateParseError> {
    let mut cases = Vec::new();
    let mut current: Option<Case> = None;
    for (index, line) in content.lines().enumerate() {
        let error = |message: &str| CertificateParseError {
            line: index + 1,
            message: message.to_string(),
        };
        let mut tokens = line.split_whitespace();
        let kind = match tokens.next() {
            Some(kind) => kind,
            None => continue,
        };
        match kind {
            "c" | "r" => continue,
            "case" => {
                if current.is_some() {
                    return Err(error("case without move"));
                }
                let level = tokens
                    .next()
                    .and_then(|t| t.parse::<usize>().ok())
                    .ok_or_else(|| error("expected level"))?;
                current = Some(Case {
                    level,
                    dead: Vec::new(),
                    alive: Vec::new(),
                    mov: Vec::new(),
                });
            }
            "d" | "a" | "m" => {
                let mut literals = Vec::new();
                let mut terminated = false;
                for token in tokens {
                    let value: i32 = token.parse().map_err(|_| error("expected literal"))?;
                    if value == 0 {
                        terminated = true;
                        break;
                    }
                    literals.push(Literal::from(value));
                }
                if !terminated {
                    return Err(error("missing terminating 0"));
                }
                let case = current.as_mut().ok_or_else(|| error("line outside of a case"))?;
                match kind {
                    "d" => case.dead.push(literals),
                    "a" => case.alive.push(literals),
                    _ => {
                        case.mov = literals;
                        if let Some(case) = current.take() {
                            cases.push(case);
                        }
                    }
                }
            }
            _ => return Err(error("unknown line")),
        }
    }
    if current.is_some() {
        return Err(CertificateParseError {
            line: content.lines().count(),
            message: "case without move".to_string(),
        });
    }
    Ok(cases)
}

/// Plays the certified strategy against every opponent move. Only meant for small
/// formulas, the opponent moves are enumerated.
pub fn check_certificate(matrix: &Matrix, result: SolverResult, cases: &[Case]) -> bool {
    let certifier = match result {
        SolverResult::Satisfiable => Quantifier::Existential,
        SolverResult::Unsatisfiable => Quantifier::Universal,
        _ => return false,
    };
    if matrix.conflict() {
        return certifier == Quantifier::Universal;
    }
    let mut assignment = vec![None; matrix.prefix.max_variable() as usize + 1];
    play(matrix, certifier, cases, 0, &mut assignment)
}

fn play(
    matrix: &Matrix,
    certifier: Quantifier,
    cases: &[Case],
    qlev: usize,
    assignment: &mut Vec<Option<bool>>,
) -> bool {
    if qlev == matrix.prefix.num_levels() {
        let satisfied = matrix
            .clauses
            .iter()
            .all(|clause| clause.is_satisfied_by(assignment));
        return satisfied == (certifier == Quantifier::Existential);
    }
    let variables: Vec<Variable> = matrix.prefix.level(qlev).variables.clone();
    let wins = if matrix.prefix.level(qlev).quantifier == certifier {
        let mov = cases
            .iter()
            .filter(|case| case.level == qlev)
            .find(|case| case.matches(assignment))
            .map(|case| case.mov.clone())
            .unwrap_or_default();
        for &var in &variables {
            assignment[var as usize] = Some(false);
        }
        for literal in mov {
            assignment[literal.variable() as usize] = Some(!literal.signed());
        }
        play(matrix, certifier, cases, qlev + 1, assignment)
    } else {
        (0..1u64 << variables.len()).all(|bits| {
            for (i, &var) in variables.iter().enumerate() {
                assignment[var as usize] = Some(bits & (1 << i) != 0);
            }
            play(matrix, certifier, cases, qlev + 1, assignment)
        })
    };
    for &var in &variables {
        assignment[var as usize] = None;
    }
    wins
}
