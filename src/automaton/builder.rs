//! Literal pattern builder
//!
//! Produces automata for test fixtures and tooling. Every pattern's output
//! is the pattern itself, so the length of a delivered output is the length
//! of the match that produced it.

use std::collections::{BTreeMap, VecDeque};

use super::{Automaton, DefaultEdge, Node};

/// How the built automaton treats input
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildMode {
    /// Matches must start at the first input byte
    Trie,
    /// Matches may start anywhere in the input
    AhoCorasick,
}

/// Builds an [`Automaton`] from literal patterns
#[derive(Clone, Debug)]
pub struct AutomatonBuilder {
    mode: BuildMode,
    patterns: Vec<Vec<u8>>,
}

#[derive(Default)]
struct TrieNode {
    children: BTreeMap<u8, u32>,
    outputs: Vec<u32>,
}

impl AutomatonBuilder {
    pub fn new(mode: BuildMode) -> Self {
        Self {
            mode,
            patterns: Vec::new(),
        }
    }

    /// Add a pattern; empty patterns are ignored
    pub fn pattern(mut self, pattern: impl AsRef<[u8]>) -> Self {
        let pattern = pattern.as_ref();
        if !pattern.is_empty() {
            self.patterns.push(pattern.to_vec());
        }
        self
    }

    pub fn build(self) -> Automaton {
        let mut trie = vec![TrieNode::default()];
        let mut outputs: Vec<Vec<u8>> = Vec::new();

        for pattern in &self.patterns {
            let mut node = 0usize;
            for &byte in pattern {
                let next = trie.len() as u32;
                let child = *trie[node].children.entry(byte).or_insert(next);
                if child == next {
                    trie.push(TrieNode::default());
                }
                node = child as usize;
            }
            let id = match outputs.iter().position(|o| o == pattern) {
                Some(i) => i as u32,
                None => {
                    outputs.push(pattern.clone());
                    (outputs.len() - 1) as u32
                }
            };
            if !trie[node].outputs.contains(&id) {
                trie[node].outputs.push(id);
            }
        }

        let defaults = match self.mode {
            BuildMode::Trie => vec![None; trie.len()],
            BuildMode::AhoCorasick => link_failures(&mut trie),
        };

        let nodes = trie
            .into_iter()
            .zip(defaults)
            .map(|(t, default)| Node {
                edges: t.children.into_iter().collect(),
                default,
                outputs: t.outputs,
            })
            .collect();

        Automaton::from_parts(0, nodes, outputs)
    }
}

/// Compute failure links as non-consuming default edges, folding the
/// outputs of each failure target into its source. The root loops on
/// every byte it has no edge for.
fn link_failures(trie: &mut [TrieNode]) -> Vec<Option<DefaultEdge>> {
    let mut fail = vec![0u32; trie.len()];
    let mut queue: VecDeque<u32> = trie[0].children.values().copied().collect();

    while let Some(node) = queue.pop_front() {
        let children: Vec<(u8, u32)> = trie[node as usize]
            .children
            .iter()
            .map(|(&b, &c)| (b, c))
            .collect();

        for (byte, child) in children {
            let mut f = fail[node as usize];
            let target = loop {
                if let Some(&next) = trie[f as usize].children.get(&byte) {
                    break next;
                }
                if f == 0 {
                    break 0;
                }
                f = fail[f as usize];
            };
            fail[child as usize] = target;

            let inherited = trie[target as usize].outputs.clone();
            for id in inherited {
                if !trie[child as usize].outputs.contains(&id) {
                    trie[child as usize].outputs.push(id);
                }
            }
            queue.push_back(child);
        }
    }

    fail.iter()
        .enumerate()
        .map(|(i, &target)| {
            Some(DefaultEdge {
                target,
                consumes: i == 0,
            })
        })
        .collect()
}
