//! Deep validation over heterogeneous rule trees.
//!
//! Each node only checks itself; `validate_tree` walks the node and all of
//! its descendants in pre-order and stops at the first failure.

use crate::error::Result;

/// A node of a validatable tree.
pub trait Validatable {
    /// Validates this node alone, without looking at descendants.
    fn validate_self(&self) -> Result<()>;

    /// Direct children of this node.
    fn children(&self) -> Vec<&dyn Validatable> {
        Vec::new()
    }
}

/// Validates `root` and every descendant, depth first, self before children.
pub fn validate_tree(root: &dyn Validatable) -> Result<()> {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        node.validate_self()?;
        let mut children = node.children();
        children.reverse();
        stack.extend(children);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TelemetryError;
    use parking_lot::Mutex;

    struct Node<'a> {
        label: &'static str,
        valid: bool,
        children: Vec<Node<'a>>,
        visits: &'a Mutex<Vec<&'static str>>,
    }

    impl Validatable for Node<'_> {
        fn validate_self(&self) -> Result<()> {
            self.visits.lock().push(self.label);
            if self.valid {
                Ok(())
            } else {
                Err(TelemetryError::validation(self.label))
            }
        }

        fn children(&self) -> Vec<&dyn Validatable> {
            self.children.iter().map(|c| c as &dyn Validatable).collect()
        }
    }

    fn leaf<'a>(label: &'static str, valid: bool, visits: &'a Mutex<Vec<&'static str>>) -> Node<'a> {
        Node {
            label,
            valid,
            children: Vec::new(),
            visits,
        }
    }

    #[test]
    fn test_walks_self_then_children_in_order() {
        let visits = Mutex::new(Vec::new());
        let tree = Node {
            label: "root",
            valid: true,
            children: vec![leaf("a", true, &visits), leaf("b", true, &visits)],
            visits: &visits,
        };

        assert!(validate_tree(&tree).is_ok());
        assert_eq!(*visits.lock(), vec!["root", "a", "b"]);
    }

    #[test]
    fn test_stops_at_first_invalid_descendant() {
        let visits = Mutex::new(Vec::new());
        let tree = Node {
            label: "root",
            valid: true,
            children: vec![leaf("bad", false, &visits), leaf("never", true, &visits)],
            visits: &visits,
        };

        let err = validate_tree(&tree).unwrap_err();
        assert!(err.to_string().contains("bad"));
        assert_eq!(*visits.lock(), vec!["root", "bad"]);
    }
}
