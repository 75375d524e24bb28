//! Selector variables of the level abstractions and the packed group/polarity
//! representation used in learned clauses and cache keys.

use crate::literal::{Literal, Variable};
use crate::matrix::groups::{GroupId, Groups};

/// A group together with a selection polarity, `(group << 1) | selected`.
pub type EncGrp = usize;

pub fn encode_sel(group: GroupId, selected: bool) -> EncGrp {
    (group << 1) | (selected as usize)
}

pub fn get_group(enc: EncGrp) -> GroupId {
    enc >> 1
}

pub fn get_select(enc: EncGrp) -> bool {
    enc & 1 != 0
}

/// Flips the polarity, turning a fact into the literal that blocks it.
pub fn negate_sel(enc: EncGrp) -> EncGrp {
    enc ^ 1
}

/// Origin of a pin variable: the group it names and the level of that group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PInfo {
    pub qlev: usize,
    pub group: GroupId,
}

/// Pin variables of one abstraction, numbered consecutively after the formula variables.
#[derive(Debug, Clone)]
pub struct PinTable {
    maxv: Variable,
    infos: Vec<PInfo>,
}

impl PinTable {
    pub fn new(maxv: Variable) -> PinTable {
        PinTable {
            maxv,
            infos: Vec::new(),
        }
    }

    pub fn register(&mut self, var: Variable, info: PInfo) {
        assert_eq!(
            var as usize,
            self.maxv as usize + 1 + self.infos.len(),
            "pins have to be registered in allocation order"
        );
        self.infos.push(info);
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Looks up the origin of a pin. Panics if `var` is not a pin of this table.
    pub fn get_pinfo(&self, var: Variable) -> PInfo {
        match self.try_pinfo(var) {
            Some(info) => info,
            None => panic!(
                "variable {} is outside of the pin range {}..={}",
                var,
                self.maxv + 1,
                self.maxv as usize + self.infos.len()
            ),
        }
    }

    pub fn try_pinfo(&self, var: Variable) -> Option<PInfo> {
        if var <= self.maxv {
            return None;
        }
        let index = (var - self.maxv - 1) as usize;
        self.infos.get(index).cloned()
    }
}

/// Variable ids of `s`, `t` (in the abstraction of the group's level) and `p` (in the
/// abstraction of the next level) for every group.
#[derive(Debug, Clone)]
pub struct Selectors {
    level: Vec<usize>,
    svar: Vec<Variable>,
    tvar: Vec<Variable>,
    pvar: Vec<Option<Variable>>,
    /// Largest selector id per abstraction.
    max_var: Vec<Variable>,
}

impl Selectors {
    /// Assigns selector ids level by level. In abstraction `i` the `p` variables of the
    /// groups of level `i-1` come first, followed by `s` and then `t` of level `i`.
    /// Pins (`p` and `s`) are registered in `pins[i]`.
    pub fn allocate(groups: &Groups, maxv: Variable, pins: &mut Vec<PinTable>) -> Selectors {
        let num_groups = groups.num_groups();
        let mut selectors = Selectors {
            level: (0..num_groups).map(|g| groups.level_of(g)).collect(),
            svar: vec![0; num_groups],
            tvar: vec![0; num_groups],
            pvar: vec![None; num_groups],
            max_var: Vec::with_capacity(groups.num_levels()),
        };
        pins.clear();
        for qlev in 0..groups.num_levels() {
            let mut table = PinTable::new(maxv);
            let mut next = maxv + 1;
            if qlev > 0 {
                for &h in groups.at_level(qlev - 1) {
                    selectors.pvar[h] = Some(next);
                    table.register(next, PInfo { qlev: qlev - 1, group: h });
                    next += 1;
                }
            }
            for &g in groups.at_level(qlev) {
                selectors.svar[g] = next;
                table.register(next, PInfo { qlev, group: g });
                next += 1;
            }
            for &g in groups.at_level(qlev) {
                selectors.tvar[g] = next;
                next += 1;
            }
            selectors.max_var.push(next - 1);
            pins.push(table);
        }
        selectors
    }

    fn check_level(&self, qlev: usize, group: GroupId, expected: usize, name: &str) {
        if self.level[group] != expected {
            panic!(
                "selector {} of group {} (level {}) accessed in abstraction {}",
                name, group, self.level[group], qlev
            );
        }
    }

    pub fn s(&self, qlev: usize, group: GroupId) -> Variable {
        self.check_level(qlev, group, qlev, "s");
        self.svar[group]
    }

    pub fn t(&self, qlev: usize, group: GroupId) -> Variable {
        self.check_level(qlev, group, qlev, "t");
        self.tvar[group]
    }

    /// The variable naming group `group` of level `qlev - 1` in abstraction `qlev`.
    pub fn p(&self, qlev: usize, group: GroupId) -> Variable {
        if qlev == 0 {
            panic!("abstraction 0 has no parent selectors");
        }
        self.check_level(qlev, group, qlev - 1, "p");
        match self.pvar[group] {
            Some(var) => var,
            None => panic!("group {} has no parent selector", group),
        }
    }

    /// Literal of `s` for a learned-clause entry.
    pub fn s_lit(&self, qlev: usize, enc: EncGrp) -> Literal {
        Literal::new(self.s(qlev, get_group(enc)), !get_select(enc))
    }

    pub fn max_var(&self, qlev: usize) -> Variable {
        self.max_var[qlev]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::sdimacs;

    #[test]
    fn encoding_round_trip() {
        for group in &[0usize, 1, 2, 17, 1 << 20] {
            for &selected in &[false, true] {
                let enc = encode_sel(*group, selected);
                assert_eq!(get_group(enc), *group);
                assert_eq!(get_select(enc), selected);
                assert_eq!(get_select(negate_sel(enc)), !selected);
                assert_eq!(get_group(negate_sel(enc)), *group);
            }
        }
    }

    fn two_level_groups() -> Groups {
        let matrix = sdimacs::parse("p cnf 3 2\ne 1 0\na 2 3 0\n1 2 0\n-1 3 0\n").unwrap();
        Groups::new(&matrix)
    }

    #[test]
    fn selector_allocation() {
        let groups = two_level_groups();
        let mut pins = Vec::new();
        let selectors = Selectors::allocate(&groups, 3, &mut pins);
        assert_eq!(pins.len(), 2);

        let g0 = groups.at_level(0)[0];
        let g1 = groups.at_level(0)[1];
        // abstraction 0: s g0, s g1, t g0, t g1
        assert_eq!(selectors.s(0, g0), 4);
        assert_eq!(selectors.s(0, g1), 5);
        assert_eq!(selectors.t(0, g0), 6);
        assert_eq!(selectors.max_var(0), 7);
        assert_eq!(pins[0].len(), 2);
        assert_eq!(pins[0].get_pinfo(5), PInfo { qlev: 0, group: g1 });
        assert_eq!(pins[0].try_pinfo(6), None);
        assert_eq!(pins[0].try_pinfo(3), None);

        // abstraction 1: p g0, p g1, s and t of level 1
        assert_eq!(selectors.p(1, g0), 4);
        assert_eq!(selectors.p(1, g1), 5);
        let h = groups.at_level(1)[0];
        assert_eq!(selectors.s(1, h), 6);
        assert_eq!(pins[1].get_pinfo(4), PInfo { qlev: 0, group: g0 });
        assert_eq!(pins[1].get_pinfo(6), PInfo { qlev: 1, group: h });
        assert_eq!(selectors.s_lit(1, encode_sel(h, false)), Literal::new(6, true));
    }

    #[test]
    #[should_panic]
    fn pin_outside_range() {
        let groups = two_level_groups();
        let mut pins = Vec::new();
        Selectors::allocate(&groups, 3, &mut pins);
        pins[0].get_pinfo(42);
    }

    #[test]
    #[should_panic]
    fn selector_level_mismatch() {
        let groups = two_level_groups();
        let mut pins = Vec::new();
        let selectors = Selectors::allocate(&groups, 3, &mut pins);
        selectors.s(1, groups.at_level(0)[0]);
    }
}
