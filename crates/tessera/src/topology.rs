//! Expression topology: a `(children, name)` tree describing a primitive
//! and everything reachable from it, used for visualization and debugging.

use serde::{Deserialize, Serialize};

/// One node of the reported expression tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub name: String,
    pub children: Vec<Topology>,
}

impl Topology {
    #[must_use]
    pub fn new(name: impl Into<String>, children: Vec<Self>) -> Self {
        Self { name: name.into(), children }
    }

    #[must_use]
    pub fn leaf(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }

    /// Number of nodes in the tree, this one included.
    #[must_use]
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(Self::size).sum::<usize>()
    }

    /// Serializes the tree in Newick form: `(child,child)name;` with inner
    /// nodes carrying their primitive name as the label.
    #[must_use]
    pub fn newick(&self) -> String {
        let mut out = String::new();
        self.newick_into(&mut out);
        out.push(';');
        out
    }

    fn newick_into(&self, out: &mut String) {
        if !self.children.is_empty() {
            out.push('(');
            for (i, child) in self.children.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                child.newick_into(out);
            }
            out.push(')');
        }
        out.push_str(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newick_of_a_leaf() {
        assert_eq!(Topology::leaf("/tessera/variable$1/0$1").newick(), "/tessera/variable$1/0$1;");
    }

    #[test]
    fn newick_of_a_tree() {
        let tree = Topology::new(
            "add",
            vec![Topology::leaf("x"), Topology::new("mul", vec![Topology::leaf("y"), Topology::leaf("z")])],
        );
        assert_eq!(tree.newick(), "(x,(y,z)mul)add;");
        assert_eq!(tree.size(), 5);
    }
}
