//! Partition of the clauses into groups, one trie level per quantifier level.
//!
//! A group at level `i` collects the clauses that agree on their literals of the levels
//! `0..=i`. The parent of a level-`i` group is the level-`i-1` group of the same clauses,
//! so the groups of all levels form a trie rooted at an implicit, always alive root.

use super::*;
use rustc_hash::FxHashMap;
use std::io::Write;

pub type GroupId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub level: usize,
    pub parent: Option<GroupId>,
    pub children: Vec<GroupId>,
    /// Literals over variables of `level` shared by all clauses of the group.
    pub projection: Vec<Literal>,
    pub clauses: Vec<ClauseId>,
    /// Some clause of the group contains no literal beyond `level`.
    pub ends: bool,
}

#[derive(Debug, Clone)]
pub struct Groups {
    groups: Vec<Group>,
    levels: Vec<Vec<GroupId>>,
}

impl Groups {
    pub fn new(matrix: &Matrix) -> Groups {
        let num_levels = matrix.prefix.num_levels();
        let mut groups: Vec<Group> = Vec::new();
        let mut levels: Vec<Vec<GroupId>> = vec![Vec::new(); num_levels];
        let mut index: FxHashMap<(Option<GroupId>, Vec<Literal>), GroupId> = FxHashMap::default();

        for (clause_id, clause) in matrix.clauses.iter().enumerate() {
            let mut projections: Vec<Vec<Literal>> = vec![Vec::new(); num_levels];
            let mut last_level = 0;
            for &literal in clause.iter() {
                let level = matrix.prefix.level_of(literal.variable());
                projections[level].push(literal);
                last_level = last_level.max(level);
            }
            let mut parent = None;
            for (level, projection) in projections.into_iter().enumerate() {
                let key = (parent, projection);
                let id = match index.get(&key) {
                    Some(&id) => id,
                    None => {
                        let id = groups.len();
                        groups.push(Group {
                            level,
                            parent,
                            children: Vec::new(),
                            projection: key.1.clone(),
                            clauses: Vec::new(),
                            ends: false,
                        });
                        if let Some(parent) = parent {
                            groups[parent].children.push(id);
                        }
                        levels[level].push(id);
                        index.insert(key, id);
                        id
                    }
                };
                groups[id].clauses.push(clause_id);
                if last_level <= level {
                    groups[id].ends = true;
                }
                parent = Some(id);
            }
        }
        debug!(
            "built {} groups for {} clauses over {} levels",
            groups.len(),
            matrix.clauses.len(),
            num_levels
        );
        Groups { groups, levels }
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn group(&self, group: GroupId) -> &Group {
        &self.groups[group]
    }

    pub fn level_of(&self, group: GroupId) -> usize {
        self.groups[group].level
    }

    /// The groups of a level, in creation order.
    pub fn at_level(&self, level: usize) -> &[GroupId] {
        self.levels.get(level).map_or(&[], Vec::as_slice)
    }

    /// Union of the projections on the path from the root to `group`.
    pub fn chain_literals(&self, group: GroupId) -> Vec<Literal> {
        let mut literals = Vec::new();
        let mut current = Some(group);
        while let Some(g) = current {
            literals.extend_from_slice(&self.groups[g].projection);
            current = self.groups[g].parent;
        }
        literals.sort();
        literals
    }

    pub fn print_dot_repr<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        dot::render(&self, writer)
    }
}

type Nd = usize;
type Ed = (Nd, Nd);

const ROOT: Nd = usize::max_value();

impl<'a> dot::Labeller<'a, Nd, Ed> for &Groups {
    fn graph_id(&'a self) -> dot::Id<'a> {
        dot::Id::new("groups").unwrap()
    }
    fn node_id(&'a self, n: &Nd) -> dot::Id<'a> {
        if *n == ROOT {
            dot::Id::new("root").unwrap()
        } else {
            dot::Id::new(format!("G{}", n)).unwrap()
        }
    }
    fn node_label<'b>(&'b self, n: &Nd) -> dot::LabelText<'b> {
        if *n == ROOT {
            dot::LabelText::LabelStr("root".into())
        } else {
            let group = &self.groups[*n];
            let lits: Vec<String> = group.projection.iter().map(|l| format!("{}", l)).collect();
            let marker = if group.ends { " *" } else { "" };
            dot::LabelText::LabelStr(
                format!("G{} L{}{}\n{}", n, group.level, marker, lits.join(" ")).into(),
            )
        }
    }
}

impl<'a> dot::GraphWalk<'a, Nd, Ed> for &Groups {
    fn nodes(&'a self) -> dot::Nodes<'a, Nd> {
        let mut nodes: Vec<Nd> = (0..self.groups.len()).collect();
        nodes.push(ROOT);
        nodes.into()
    }
    fn edges(&'a self) -> dot::Edges<'a, Ed> {
        let edges: Vec<Ed> = self
            .groups
            .iter()
            .enumerate()
            .map(|(id, group)| (group.parent.unwrap_or(ROOT), id))
            .collect();
        edges.into()
    }
    fn source(&self, e: &Ed) -> Nd {
        e.0
    }
    fn target(&self, e: &Ed) -> Nd {
        e.1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::sdimacs;

    #[test]
    fn trie_shares_common_prefixes() {
        let instance = "p cnf 4 3
e 1 0
a 2 0
e 3 4 0
1 2 3 0
1 2 -4 0
-1 3 0
";
        let matrix = sdimacs::parse(instance).unwrap();
        let groups = Groups::new(&matrix);
        assert_eq!(groups.num_levels(), 3);
        // level 0: {1}, {-1}
        assert_eq!(groups.at_level(0).len(), 2);
        // level 1: (1|2), (-1|)
        assert_eq!(groups.at_level(1).len(), 2);
        // level 2: (1|2|3), (1|2|-4), (-1||3)
        assert_eq!(groups.at_level(2).len(), 3);

        let first = groups.at_level(0)[0];
        assert_eq!(groups.group(first).clauses, vec![0, 1]);
        assert!(!groups.group(first).ends);
        assert_eq!(groups.group(first).children.len(), 1);

        let empty_projection = groups.at_level(1)[1];
        assert!(groups.group(empty_projection).projection.is_empty());
        assert_eq!(groups.group(empty_projection).parent, Some(groups.at_level(0)[1]));

        for &g in groups.at_level(2) {
            assert!(groups.group(g).ends);
        }
        let leaf = groups.at_level(2)[1];
        assert_eq!(
            groups.chain_literals(leaf),
            vec![1.into(), 2.into(), (-4).into()]
        );
    }

    #[test]
    fn ends_marks_finished_clauses() {
        let instance = "p cnf 2 2
e 1 0
a 2 0
1 0
-1 2 0
";
        let matrix = sdimacs::parse(instance).unwrap();
        let groups = Groups::new(&matrix);
        let unit = groups.at_level(0)[0];
        assert!(groups.group(unit).ends);
        let tail = groups.group(unit).children[0];
        assert!(groups.group(tail).ends);
        assert!(groups.group(tail).projection.is_empty());
        assert!(!groups.group(groups.at_level(0)[1]).ends);
    }

    #[test]
    fn dot_output() {
        let matrix = sdimacs::parse("p cnf 2 1\ne 1 0\na 2 0\n1 2 0\n").unwrap();
        let groups = Groups::new(&matrix);
        let mut out = Vec::new();
        groups.print_dot_repr(&mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("digraph groups"));
        assert!(out.contains("root -> G0"));
    }
}
