use std::fmt;
use std::ops;

pub type Variable = u32;

/// A propositional literal packed into a single word: the variable in the upper
/// bits, the sign in the lowest bit.
#[derive(PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Debug, Hash)]
pub struct Literal {
    x: u32,
}

impl Literal {
    pub fn new(variable: Variable, signed: bool) -> Literal {
        Literal {
            x: variable << 1 | (signed as u32),
        }
    }

    /// Returns true if `Literal` is signed
    ///
    /// # Examples
    ///
    /// ```
    /// assert!(selsat::Literal::new(3, true).signed());
    /// assert!(!selsat::Literal::new(3, false).signed());
    /// ```
    pub fn signed(&self) -> bool {
        (self.x & 1) != 0
    }

    pub fn unsigned(&self) -> Literal {
        Literal { x: self.x & !1 }
    }

    pub fn variable(&self) -> Variable {
        self.x >> 1
    }

    pub fn dimacs(&self) -> i32 {
        let base = self.variable() as i32;
        if self.signed() {
            -base
        } else {
            base
        }
    }

    /// Evaluates the literal under a (partial) assignment indexed by variable.
    /// Unassigned variables count as false.
    pub fn holds(&self, assignment: &[Option<bool>]) -> bool {
        match assignment.get(self.variable() as usize).cloned().flatten() {
            Some(value) => value != self.signed(),
            None => false,
        }
    }
}

impl ops::Neg for Literal {
    type Output = Literal;

    fn neg(self) -> Literal {
        Literal { x: self.x ^ 1 }
    }
}

impl From<i32> for Literal {
    fn from(literal: i32) -> Self {
        let signed = literal < 0;
        let abs = literal.abs() as Variable;
        Literal::new(abs, signed)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.dimacs())
    }
}
