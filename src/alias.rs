//! Union-find over variable names, used to collapse chains of trivially
//! equal variables (`connect`-generated `a = b` equations, in particular)
//! down to a single canonical representative before a variable is emitted
//! into the final model.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct AliasRelation {
    parent: HashMap<String, String>,
    /// `true` when the link to `parent` carries a sign flip, i.e. `a = -b`.
    sign: HashMap<String, bool>,
}

impl AliasRelation {
    pub fn new() -> Self {
        Self::default()
    }

    fn find(&mut self, name: &str) -> (String, bool) {
        let Some(parent) = self.parent.get(name).cloned() else {
            return (name.to_string(), false);
        };
        if parent == name {
            return (name.to_string(), false);
        }
        let (root, sign) = self.find(&parent);
        let own_sign = *self.sign.get(name).unwrap_or(&false);
        let combined = own_sign ^ sign;
        self.parent.insert(name.to_string(), root.clone());
        self.sign.insert(name.to_string(), combined);
        (root, combined)
    }

    /// Records that `a` and `b` are trivially equal (`negated = true` means
    /// `a = -b`). Keeps the lexicographically smaller canonical name on top
    /// so the choice of representative is deterministic.
    pub fn union(&mut self, a: &str, b: &str, negated: bool) {
        let (root_a, sign_a) = self.find(a);
        let (root_b, sign_b) = self.find(b);
        if root_a == root_b {
            return;
        }
        let relative_sign = sign_a ^ sign_b ^ negated;
        if root_a < root_b {
            self.parent.insert(root_b.clone(), root_a);
            self.sign.insert(root_b, relative_sign);
        } else {
            self.parent.insert(root_a.clone(), root_b);
            self.sign.insert(root_a, relative_sign);
        }
    }

    /// The canonical representative for `name` and whether `name` is negated
    /// relative to it. A name that was never unioned is its own canonical.
    pub fn canonical(&mut self, name: &str) -> (String, bool) {
        self.find(name)
    }

    /// Every non-trivial equivalence class, as `(canonical, member, negated)`
    /// triples, excluding the canonical's self-mapping.
    pub fn aliases(&mut self) -> Vec<(String, String, bool)> {
        let names: Vec<String> = self.parent.keys().cloned().collect();
        let mut out = Vec::new();
        for name in names {
            let (root, sign) = self.find(&name);
            if root != name {
                out.push((root, name, sign));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_compresses_and_tracks_sign() {
        let mut rel = AliasRelation::new();
        rel.union("b", "a", false);
        rel.union("c", "b", true);
        let (root, negated) = rel.canonical("c");
        assert_eq!(root, "a");
        assert!(negated);
    }

    #[test]
    fn deterministic_representative() {
        let mut rel = AliasRelation::new();
        rel.union("z", "a", false);
        assert_eq!(rel.canonical("z").0, "a");
        assert_eq!(rel.canonical("a").0, "a");
    }
}
