use super::*;

pub type ClauseId = usize;

#[derive(PartialEq, Eq, Debug, Clone)]
pub struct Clause {
    literals: Vec<Literal>,
}

impl Clause {
    /// Creates a new clause from given literals
    ///
    /// The vector containing literals is sorted and deduplicated.
    pub fn new(literals: Vec<Literal>) -> Clause {
        let mut l = literals;
        l.sort();
        l.dedup();
        Self::new_normalized(l)
    }

    /// Creates a new clause from given literals
    ///
    /// Assumes literals to be already normalized, i.e.,
    /// sorted and without duplication.
    pub fn new_normalized(literals: Vec<Literal>) -> Clause {
        debug_assert!(literals.windows(2).all(|w| w[0] < w[1]));
        Clause { literals }
    }

    pub fn len(&self) -> usize {
        self.literals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.literals.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<Literal> {
        self.literals.iter()
    }

    /// Complementary literals are neighbours after normalization.
    pub fn is_tautology(&self) -> bool {
        self.literals
            .windows(2)
            .any(|pair| pair[0].variable() == pair[1].variable())
    }

    /// Keeps only the literals for which `keep` returns true.
    pub fn retain<P>(&mut self, keep: P)
    where
        P: FnMut(&Literal) -> bool,
    {
        self.literals.retain(keep);
    }

    pub fn is_satisfied_by(&self, assignment: &[Option<bool>]) -> bool {
        self.literals.iter().any(|l| l.holds(assignment))
    }
}

impl Dimacs for Clause {
    fn dimacs(&self) -> String {
        let mut dimacs = String::new();
        for &literal in self.iter() {
            dimacs.push_str(&format!("{} ", literal.dimacs()));
        }
        dimacs.push_str("0");
        dimacs
    }
}

#[cfg(test)]
mod clause_tests {
    use std::mem;

    use super::*;

    #[test]
    fn size_of_clause() {
        let result = mem::size_of::<Clause>();
        assert!(
            result == 24,
            "Size of `Clause` should be 24 bytes, was `{}`",
            result
        );
    }

    #[test]
    fn clause_normalization() {
        let lit1 = Literal::new(1, false);
        let lit2 = Literal::new(2, false);
        let literals = vec![lit2, lit1, lit2];
        let clause1 = Clause::new(literals);
        let clause2 = Clause::new_normalized(vec![lit1, lit2]);
        assert_eq!(clause1, clause2);
        assert_eq!(clause1.dimacs(), "1 2 0");
    }

    #[test]
    fn tautology_detection() {
        let clause = Clause::new(vec![3.into(), (-1).into(), 1.into()]);
        assert!(clause.is_tautology());
        let clause = Clause::new(vec![3.into(), (-1).into(), 2.into()]);
        assert!(!clause.is_tautology());
        assert!(!Clause::new(Vec::new()).is_tautology());
    }
}
