//! Depth-first pre-order traversal.

use std::ops::ControlFlow;

use super::wrap::Node;

/// Visits `root` and then every descendant in document order.
///
/// Returning [`ControlFlow::Break`] from `visit` ends the whole walk: no
/// further siblings or subtrees are visited, and the break is returned.
/// Attributes are not part of the walk. `visit` must not restructure the
/// tree while the walk is in progress.
pub fn walk<'d, F>(root: Node<'d>, mut visit: F) -> ControlFlow<()>
where
    F: FnMut(Node<'d>) -> ControlFlow<()>,
{
    let mut current = root;
    loop {
        if visit(current).is_break() {
            return ControlFlow::Break(());
        }
        if let Some(child) = current.first_child() {
            current = child;
            continue;
        }
        // Climb until a next sibling exists, never above `root`.
        loop {
            if current == root {
                return ControlFlow::Continue(());
            }
            if let Some(next) = current.next_sibling() {
                current = next;
                break;
            }
            match current.parent_node() {
                Some(parent) => current = parent,
                None => return ControlFlow::Continue(()),
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dom::Document;
    use pretty_assertions::assert_eq;

    fn names(doc: &Document) -> Vec<String> {
        let mut out = Vec::new();
        let root = doc.document_element().unwrap().unwrap();
        let _ = walk(root.into(), |n| {
            out.push(n.node_name());
            ControlFlow::Continue(())
        });
        out
    }

    #[test]
    fn test_pre_order() {
        let doc = Document::parse("<a><b><c/><d/></b><e><f/></e></a>").unwrap();
        assert_eq!(names(&doc), ["a", "b", "c", "d", "e", "f"]);
    }

    #[test]
    fn test_subtree_walk_stays_inside() {
        let doc = Document::parse("<a><b><c/></b><d/></a>").unwrap();
        let b = doc.find_nodes("//b").unwrap()[0];
        let mut seen = Vec::new();
        let flow = b.walk(|n| {
            seen.push(n.node_name());
            ControlFlow::Continue(())
        });
        assert_eq!(flow, ControlFlow::Continue(()));
        assert_eq!(seen, ["b", "c"]);
    }

    #[test]
    fn test_break_stops_everything() {
        let doc = Document::parse("<a><b><c/></b><d/></a>").unwrap();
        let root = doc.document_element().unwrap().unwrap();
        let mut seen = Vec::new();
        let flow = root.walk(|n| {
            seen.push(n.node_name());
            if n.node_name() == "b" {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert_eq!(flow, ControlFlow::Break(()));
        assert_eq!(seen, ["a", "b"]);
    }

    #[test]
    fn test_leaf_root() {
        let doc = Document::parse("<a/>").unwrap();
        assert_eq!(names(&doc), ["a"]);
    }
}
