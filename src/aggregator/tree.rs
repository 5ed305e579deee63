//! Merge per-thread call chains into a shared, weighted tree.
//!
//! Each chain is an ordered path from the outermost caller to the innermost
//! frame. Chains sharing a prefix collapse into one branch whose weight is
//! the number of chains that passed through it.
//!
//! Example: chains `main;foo;bar`, `main;foo;baz` and `main;qux` merge into
//!
//! ```text
//! main - 3 threads
//!   ├foo - 2 threads
//!   │ ├bar
//!   │ └baz
//!   └qux
//! ```

use log::debug;
use std::fmt::{self, Display, Write};

/// Unit used when annotating node weights in rendered trees
const WEIGHT_UNIT: &str = "threads";

/// A node of the merged tree
///
/// `tokens` holds every source token (frame, name...) that collapsed into
/// this node; its length is the node weight. `children` is `None` for leaves.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode<T> {
    pub name: String,
    pub tokens: Vec<T>,
    pub children: Option<Vec<TreeNode<T>>>,
}

impl<T> TreeNode<T> {
    pub fn weight(&self) -> usize {
        self.tokens.len()
    }

    pub fn children(&self) -> &[TreeNode<T>] {
        self.children.as_deref().unwrap_or(&[])
    }

    pub fn is_leaf(&self) -> bool {
        self.children().is_empty()
    }
}

/// Merge chains into a forest sorted by descending weight
///
/// Identical chain multisets produce the same forest regardless of input
/// order: chains are first sorted frame by frame, which groups shared
/// prefixes next to each other for the single adjacent merge pass.
pub fn merge_chains<T, C>(chains: impl IntoIterator<Item = C>) -> Vec<TreeNode<T>>
where
    T: Display,
    C: IntoIterator<Item = T>,
{
    let mut named: Vec<Vec<(String, T)>> = chains
        .into_iter()
        .map(|chain| chain.into_iter().map(|t| (t.to_string(), t)).collect())
        .collect();

    // Compare whole frame names, not a joined path: "Worker+<>c" must not
    // sort between two "Worker" chains.
    named.sort_by(|a, b| {
        a.iter()
            .map(|(name, _)| name)
            .cmp(b.iter().map(|(name, _)| name))
    });

    let trees: Vec<TreeNode<T>> = named
        .into_iter()
        .filter_map(singleton_path)
        .collect();

    debug!("Merging {} chains", trees.len());

    merge_trees(trees)
}

/// Fold a chain from the innermost frame outward into a single path
fn singleton_path<T>(chain: Vec<(String, T)>) -> Option<TreeNode<T>> {
    let mut node: Option<TreeNode<T>> = None;
    for (name, token) in chain.into_iter().rev() {
        node = Some(TreeNode {
            name,
            tokens: vec![token],
            children: node.map(|n| vec![n]),
        });
    }
    node
}

/// Adjacent pairwise merge of an already grouped sibling list
fn merge_trees<T>(trees: Vec<TreeNode<T>>) -> Vec<TreeNode<T>> {
    let mut merged: Vec<TreeNode<T>> = Vec::with_capacity(trees.len());

    for node in trees {
        match merged.last_mut() {
            Some(last) if last.name == node.name => {
                last.tokens.extend(node.tokens);
                if last.children.is_some() || node.children.is_some() {
                    let mut combined = last.children.take().unwrap_or_default();
                    combined.extend(node.children.unwrap_or_default());
                    last.children = Some(merge_children(combined));
                }
            }
            last => {
                if let Some(last) = last {
                    if last.children().len() > 1 {
                        let children = last.children.take().unwrap_or_default();
                        last.children = Some(merge_children(children));
                    }
                }
                merged.push(node);
            }
        }
    }

    // Stable, so equal weights keep their grouped order.
    merged.sort_by(|a, b| b.weight().cmp(&a.weight()));
    merged
}

/// Child lists arrive in whatever order their parents merged; regroup
/// equal names before merging them.
fn merge_children<T>(mut children: Vec<TreeNode<T>>) -> Vec<TreeNode<T>> {
    children.sort_by(|a, b| a.name.cmp(&b.name));
    merge_trees(children)
}

/// Render a merged forest depth-first with box-drawing markers
///
/// A run of single-child nodes is printed as a simple chain, one name per
/// line without branch markers. A node's weight is shown where its chain
/// diverges or ends, or where the weight drops along the chain.
pub fn render_tree<T, W: Write>(out: &mut W, tree: &[TreeNode<T>]) -> fmt::Result {
    let mut parent_lines = Vec::new();
    render_level(out, tree, &mut parent_lines)
}

/// Render a merged forest into a new string
pub fn tree_to_string<T>(tree: &[TreeNode<T>]) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = render_tree(&mut out, tree);
    out
}

fn render_level<T, W: Write>(
    out: &mut W,
    nodes: &[TreeNode<T>],
    parent_lines: &mut Vec<bool>,
) -> fmt::Result {
    for (i, head) in nodes.iter().enumerate() {
        let is_last = i + 1 == nodes.len();
        let mut node = head;
        let mut in_chain = false;

        loop {
            let mut line = prefix(parent_lines);
            if !parent_lines.is_empty() {
                line.push_str(match (in_chain, is_last) {
                    (true, true) => " ",
                    (true, false) => "│",
                    (false, true) => "└",
                    (false, false) => "├",
                });
            }
            line.push_str(&node.name);

            let children = node.children();
            let continues = children.len() == 1;
            if node.weight() > 1 && !(continues && children[0].weight() == node.weight()) {
                line.push_str(&format!(" - {} {}", node.weight(), WEIGHT_UNIT));
            }
            writeln!(out, "{}", line.trim_end())?;

            if !continues {
                if !children.is_empty() {
                    parent_lines.push(!is_last);
                    render_level(out, children, parent_lines)?;
                    parent_lines.pop();
                }
                if in_chain {
                    let mut separator = prefix(parent_lines);
                    separator.push_str(if is_last { " " } else { "│" });
                    writeln!(out, "{}", separator.trim_end())?;
                }
                break;
            }

            in_chain = true;
            node = &children[0];
        }
    }
    Ok(())
}

fn prefix(parent_lines: &[bool]) -> String {
    parent_lines
        .iter()
        .map(|&open| if open { "│ " } else { "  " })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chains(input: &[&[&str]]) -> Vec<Vec<String>> {
        input
            .iter()
            .map(|c| c.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_identical_chains_share_one_path() {
        let tree = merge_chains(chains(&[&["a", "b"], &["a", "b"]]));
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].weight(), 2);
        assert_eq!(tree[0].children()[0].name, "b");
        assert_eq!(tree[0].children()[0].weight(), 2);
        assert!(tree[0].children()[0].is_leaf());
    }

    #[test]
    fn test_empty_chains_are_ignored() {
        let tree = merge_chains(chains(&[&[], &["a"]]));
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].name, "a");
    }

    #[test]
    fn test_regroups_children_after_weight_sort() {
        // After main;b merges twice it outweighs main;a and moves ahead of
        // it; the next main;b must still land on the same child.
        let tree = merge_chains(chains(&[
            &["main", "a"],
            &["main", "b"],
            &["main", "b"],
            &["main", "b"],
        ]));
        let children = tree[0].children();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].name, "b");
        assert_eq!(children[0].weight(), 3);
        assert_eq!(children[1].name, "a");
    }

    #[test]
    fn test_render_simple_chain() {
        let tree = merge_chains(chains(&[&["root", "x", "y"], &["root", "z"]]));
        let expected = "root - 2 threads\n  ├x\n  │y\n  │\n  └z\n";
        assert_eq!(tree_to_string(&tree), expected);
    }

    #[test]
    fn test_render_weight_where_chain_thins() {
        let tree = merge_chains(chains(&[&["a"], &["a", "b"]]));
        assert_eq!(tree_to_string(&tree), "a - 2 threads\nb\n\n");
    }

    #[test]
    fn test_root_names_with_punctuation_group_together() {
        let tree = merge_chains(chains(&[&["Worker"], &["Worker+<>c"], &["Worker", "Run"]]));
        let roots: Vec<(&str, usize)> = tree.iter().map(|n| (n.name.as_str(), n.weight())).collect();
        assert_eq!(roots, vec![("Worker", 2), ("Worker+<>c", 1)]);
        assert_eq!(tree[0].children()[0].name, "Run");
    }
}
