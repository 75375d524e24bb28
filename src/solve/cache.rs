use super::encoding::EncGrp;
use rustc_hash::FxHashMap;

/// Value of a subgame under a fixed parent selection.
#[derive(Debug, Clone, PartialEq)]
pub struct Valuation {
    pub prob: f64,
    /// Facts over the parent level that force the value to 0 whatever the rest of the
    /// parent selection is, `None` if no such core was derived.
    pub core: Option<Vec<EncGrp>>,
}

impl Valuation {
    pub fn new(prob: f64) -> Valuation {
        Valuation { prob, core: None }
    }

    pub fn zero(core: Option<Vec<EncGrp>>) -> Valuation {
        Valuation { prob: 0.0, core }
    }
}

/// Maps a parent selection to the value of the subgame below it, one table per level.
#[derive(Debug, Clone)]
pub struct SelectionCache {
    levels: Vec<FxHashMap<Vec<EncGrp>, Valuation>>,
}

impl SelectionCache {
    pub fn new(num_levels: usize) -> SelectionCache {
        SelectionCache {
            levels: vec![FxHashMap::default(); num_levels],
        }
    }

    /// `parent_selection` is the sorted selection vector of the parent level.
    pub fn lookup(&self, qlev: usize, parent_selection: &[EncGrp]) -> Option<&Valuation> {
        debug_assert!(parent_selection.windows(2).all(|w| w[0] < w[1]));
        self.levels[qlev].get(parent_selection)
    }

    pub fn record(&mut self, qlev: usize, parent_selection: Vec<EncGrp>, value: Valuation) {
        debug_assert!(parent_selection.windows(2).all(|w| w[0] < w[1]));
        self.levels[qlev].insert(parent_selection, value);
    }

    pub fn clear_level(&mut self, qlev: usize) {
        self.levels[qlev].clear();
    }

    pub fn len(&self, qlev: usize) -> usize {
        self.levels[qlev].len()
    }
}

#[cfg(test)]
mod tests {
    use super::super::encoding::encode_sel;
    use super::*;

    #[test]
    fn lookup_and_clear() {
        let mut cache = SelectionCache::new(2);
        let key = vec![encode_sel(0, true), encode_sel(1, false)];
        assert!(cache.lookup(1, &key).is_none());
        cache.record(1, key.clone(), Valuation::new(0.5));
        assert_eq!(cache.lookup(1, &key), Some(&Valuation::new(0.5)));
        assert!(cache.lookup(0, &key).is_none());

        let other = vec![encode_sel(0, false), encode_sel(1, false)];
        assert!(cache.lookup(1, &other).is_none());

        cache.clear_level(1);
        assert_eq!(cache.len(1), 0);
    }
}
