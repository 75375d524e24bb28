//! A small reduced ordered BDD package, used to split the region covered by the
//! negated region clauses into pairwise disjoint cubes.

use super::dnnf::CompiledCounter;
use super::{LevelFormula, SelectionCounter};
use crate::literal::{Literal, Variable};
use crate::utils::statistics::{SolverPhase, Statistics};
use rustc_hash::FxHashMap;
use std::error::Error;
use std::fmt;

pub type BddId = usize;

pub const BDD_FALSE: BddId = 0;
pub const BDD_TRUE: BddId = 1;

const TERMINAL: Variable = Variable::max_value();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BddNode {
    var: Variable,
    lo: BddId,
    hi: BddId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BddOverflow;

impl fmt::Display for BddOverflow {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "BDD node limit exceeded")
    }
}

impl Error for BddOverflow {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Op {
    And,
    Or,
}

/// Variables are ordered by id, smaller ids closer to the root.
pub struct BddManager {
    nodes: Vec<BddNode>,
    unique: FxHashMap<BddNode, BddId>,
    cache: FxHashMap<(Op, BddId, BddId), BddId>,
    node_limit: usize,
}

impl BddManager {
    pub fn new(node_limit: usize) -> BddManager {
        let terminal = |id| BddNode {
            var: TERMINAL,
            lo: id,
            hi: id,
        };
        BddManager {
            nodes: vec![terminal(BDD_FALSE), terminal(BDD_TRUE)],
            unique: FxHashMap::default(),
            cache: FxHashMap::default(),
            node_limit,
        }
    }

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    fn mk(&mut self, var: Variable, lo: BddId, hi: BddId) -> Result<BddId, BddOverflow> {
        if lo == hi {
            return Ok(lo);
        }
        let node = BddNode { var, lo, hi };
        if let Some(&id) = self.unique.get(&node) {
            return Ok(id);
        }
        if self.nodes.len() >= self.node_limit {
            return Err(BddOverflow);
        }
        self.nodes.push(node);
        let id = self.nodes.len() - 1;
        self.unique.insert(node, id);
        Ok(id)
    }

    pub fn var(&mut self, var: Variable) -> Result<BddId, BddOverflow> {
        self.mk(var, BDD_FALSE, BDD_TRUE)
    }

    pub fn literal(&mut self, literal: Literal) -> Result<BddId, BddOverflow> {
        if literal.signed() {
            self.mk(literal.variable(), BDD_TRUE, BDD_FALSE)
        } else {
            self.var(literal.variable())
        }
    }

    pub fn and(&mut self, a: BddId, b: BddId) -> Result<BddId, BddOverflow> {
        self.apply(Op::And, a, b)
    }

    pub fn or(&mut self, a: BddId, b: BddId) -> Result<BddId, BddOverflow> {
        self.apply(Op::Or, a, b)
    }

    pub fn not(&mut self, f: BddId) -> Result<BddId, BddOverflow> {
        let mut memo = FxHashMap::default();
        self.negate(f, &mut memo)
    }

    fn negate(
        &mut self,
        f: BddId,
        memo: &mut FxHashMap<BddId, BddId>,
    ) -> Result<BddId, BddOverflow> {
        match f {
            BDD_FALSE => return Ok(BDD_TRUE),
            BDD_TRUE => return Ok(BDD_FALSE),
            _ => {}
        }
        if let Some(&r) = memo.get(&f) {
            return Ok(r);
        }
        let node = self.nodes[f];
        let lo = self.negate(node.lo, memo)?;
        let hi = self.negate(node.hi, memo)?;
        let r = self.mk(node.var, lo, hi)?;
        memo.insert(f, r);
        Ok(r)
    }

    fn apply(&mut self, op: Op, a: BddId, b: BddId) -> Result<BddId, BddOverflow> {
        match op {
            Op::And => {
                if a == BDD_FALSE || b == BDD_FALSE {
                    return Ok(BDD_FALSE);
                }
                if a == BDD_TRUE || a == b {
                    return Ok(b);
                }
                if b == BDD_TRUE {
                    return Ok(a);
                }
            }
            Op::Or => {
                if a == BDD_TRUE || b == BDD_TRUE {
                    return Ok(BDD_TRUE);
                }
                if a == BDD_FALSE || a == b {
                    return Ok(b);
                }
                if b == BDD_FALSE {
                    return Ok(a);
                }
            }
        }
        let key = (op, a.min(b), a.max(b));
        if let Some(&r) = self.cache.get(&key) {
            return Ok(r);
        }
        let (na, nb) = (self.nodes[a], self.nodes[b]);
        let var = na.var.min(nb.var);
        let (a_lo, a_hi) = if na.var == var { (na.lo, na.hi) } else { (a, a) };
        let (b_lo, b_hi) = if nb.var == var { (nb.lo, nb.hi) } else { (b, b) };
        let lo = self.apply(op, a_lo, b_lo)?;
        let hi = self.apply(op, a_hi, b_hi)?;
        let r = self.mk(var, lo, hi)?;
        self.cache.insert(key, r);
        Ok(r)
    }

    pub fn cube(&mut self, literals: &[Literal]) -> Result<BddId, BddOverflow> {
        let mut f = BDD_TRUE;
        for &literal in literals {
            let l = self.literal(literal)?;
            f = self.and(f, l)?;
        }
        Ok(f)
    }

    /// The paths to `BDD_TRUE`: pairwise disjoint cubes whose union is `f`.
    pub fn disjoint_cubes(&self, f: BddId) -> Vec<Vec<Literal>> {
        let mut cubes = Vec::new();
        let mut path = Vec::new();
        self.collect_paths(f, &mut path, &mut cubes);
        cubes
    }

    fn collect_paths(&self, f: BddId, path: &mut Vec<Literal>, cubes: &mut Vec<Vec<Literal>>) {
        match f {
            BDD_FALSE => {}
            BDD_TRUE => cubes.push(path.clone()),
            _ => {
                let node = self.nodes[f];
                path.push(Literal::new(node.var, true));
                self.collect_paths(node.lo, path, cubes);
                path.pop();
                path.push(Literal::new(node.var, false));
                self.collect_paths(node.hi, path, cubes);
                path.pop();
            }
        }
    }
}

/// Counts by splitting the region excluded by the clauses into disjoint cubes, each
/// weighted on the level formula without clauses.
pub struct DisjointCubeCounter {
    node_limit: usize,
    base: CompiledCounter,
}

impl DisjointCubeCounter {
    pub fn new(node_limit: usize) -> DisjointCubeCounter {
        DisjointCubeCounter {
            node_limit,
            base: CompiledCounter::new(0),
        }
    }

    /// A fresh manager for one query over the `t` variables of a level.
    pub fn init_level_bdd_manager(&self) -> BddManager {
        BddManager::new(self.node_limit)
    }

    /// Disjoint cubes covering the assignments that violate some clause.
    pub fn to_disjoint_cube(
        &mut self,
        clauses: &[Vec<Literal>],
        stats: &mut Statistics,
    ) -> Result<Vec<Vec<Literal>>, BddOverflow> {
        let _timer = stats.start(SolverPhase::Bdd);
        let mut manager = self.init_level_bdd_manager();
        let mut covered = BDD_FALSE;
        for clause in clauses {
            let negated: Vec<Literal> = clause.iter().map(|&l| -l).collect();
            let cube = manager.cube(&negated)?;
            covered = manager.or(covered, cube)?;
        }
        let cubes = manager.disjoint_cubes(covered);
        trace!(
            "{} clauses split into {} disjoint cubes ({} nodes)",
            clauses.len(),
            cubes.len(),
            manager.size()
        );
        Ok(cubes)
    }
}

impl SelectionCounter for DisjointCubeCounter {
    fn satisfied_mass(
        &mut self,
        formula: &LevelFormula,
        clauses: &[Vec<Literal>],
        stats: &mut Statistics,
    ) -> Option<f64> {
        let cubes = match self.to_disjoint_cube(clauses, stats) {
            Ok(cubes) => cubes,
            Err(e) => {
                debug!("disjoint cube counting on level {}: {}", formula.level(), e);
                return None;
            }
        };
        let total = self.base.assump_level_wmc(formula, &[], stats);
        let mut covered = 0.0;
        for cube in &cubes {
            covered += self.base.assump_level_wmc(formula, cube, stats);
        }
        Some((total - covered).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_nodes() {
        let mut manager = BddManager::new(1000);
        let x = manager.var(1).unwrap();
        let y = manager.var(2).unwrap();
        let xy = manager.and(x, y).unwrap();
        let yx = manager.and(y, x).unwrap();
        assert_eq!(xy, yx);
        let not_x = manager.not(x).unwrap();
        assert_eq!(manager.or(x, not_x).unwrap(), BDD_TRUE);
        assert_eq!(manager.and(x, not_x).unwrap(), BDD_FALSE);
        assert_eq!(manager.literal(Literal::from(-1)).unwrap(), not_x);
    }

    #[test]
    fn disjoint_cover() {
        let mut manager = BddManager::new(1000);
        let a = manager.cube(&[Literal::from(1), Literal::from(2)]).unwrap();
        let b = manager.cube(&[Literal::from(2), Literal::from(3)]).unwrap();
        let f = manager.or(a, b).unwrap();
        let cubes = manager.disjoint_cubes(f);
        // every assignment of f lies in exactly one cube
        for bits in 0..8usize {
            let assignment: Vec<Option<bool>> = (0..4)
                .map(|v| if v == 0 { None } else { Some(bits & (1 << (v - 1)) != 0) })
                .collect();
            let in_f = (bits & 0b011 == 0b011) || (bits & 0b110 == 0b110);
            let hits = cubes
                .iter()
                .filter(|c| c.iter().all(|l| l.holds(&assignment)))
                .count();
            assert_eq!(hits, if in_f { 1 } else { 0 });
        }
    }

    #[test]
    fn node_limit() {
        let mut manager = BddManager::new(4);
        let x = manager.var(1).unwrap();
        let y = manager.var(2).unwrap();
        assert_eq!(manager.and(x, y), Err(BddOverflow));
    }
}
