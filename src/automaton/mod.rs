//! Compiled Eudoxus automata
//!
//! An automaton is loaded once from a compiled file and then shared
//! read-only between every operator instance and transaction that uses it.
//! All mutable matching state lives in a [`Cursor`].
//!
//! Binary layout (little-endian):
//!
//! ```text
//! "EUDX" | version u16 | reserved u16 | start u32
//! output_count u32 | { len u32 | bytes }*
//! node_count u32   | { flags u8 | [default u32] | output_count u32 | { id u32 }*
//!                    | edge_count u32 | { byte u8 | target u32 }* }*
//! ```

pub mod builder;
pub mod cursor;

pub use builder::{AutomatonBuilder, BuildMode};
pub use cursor::{Command, Cursor, Outcome, OutputObserver};

use std::collections::TryReserveError;
use std::path::Path;

use log::error;
use thiserror::Error;

use crate::error::{EeError, Result};

/// File magic
pub const MAGIC: &[u8; 4] = b"EUDX";
/// Only supported format version
pub const FORMAT_VERSION: u16 = 1;

const FLAG_HAS_DEFAULT: u8 = 0b01;
const FLAG_DEFAULT_CONSUMES: u8 = 0b10;

/// Smallest encoded output (length prefix only)
const MIN_OUTPUT_LEN: usize = 4;
/// Smallest encoded node (flags, output count, edge count)
const MIN_NODE_LEN: usize = 9;

/// Decoding errors for compiled automata
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("bad magic, not a compiled eudoxus automaton")]
    BadMagic,

    #[error("unsupported format version {0}")]
    UnsupportedVersion(u16),

    #[error("truncated at offset {0}")]
    Truncated(usize),

    #[error("{kind} reference {index} out of range at node {node}")]
    BadReference {
        kind: &'static str,
        node: u32,
        index: u32,
    },

    #[error("start node {0} out of range")]
    BadStart(u32),

    #[error("duplicate edge on byte {byte:#04x} at node {node}")]
    DuplicateEdge { node: u32, byte: u8 },

    #[error("non-consuming default edges form a cycle through node {0}")]
    DefaultCycle(u32),

    #[error("output {0} is empty")]
    EmptyOutput(u32),

    #[error("{0} trailing bytes")]
    TrailingBytes(usize),

    #[error("allocation failure while decoding")]
    Allocation(#[from] TryReserveError),
}

/// Default (fallback) edge of a node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct DefaultEdge {
    pub(crate) target: u32,
    /// Whether following the edge consumes the input byte
    pub(crate) consumes: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Node {
    /// Labelled edges, sorted by byte
    pub(crate) edges: Vec<(u8, u32)>,
    pub(crate) default: Option<DefaultEdge>,
    /// Indices into the automaton output table
    pub(crate) outputs: Vec<u32>,
}

impl Node {
    fn edge(&self, byte: u8) -> Option<u32> {
        self.edges
            .binary_search_by_key(&byte, |&(b, _)| b)
            .ok()
            .map(|i| self.edges[i].1)
    }
}

/// One transition decision for a byte
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Step {
    /// Move to the node and consume the byte
    Consume(u32),
    /// Move to the node without consuming the byte
    Follow(u32),
    /// No transition: the automaton has ended
    Dead,
}

/// A compiled, immutable automaton
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Automaton {
    start: u32,
    nodes: Vec<Node>,
    outputs: Vec<Vec<u8>>,
}

impl Automaton {
    pub(crate) fn from_parts(start: u32, nodes: Vec<Node>, outputs: Vec<Vec<u8>>) -> Self {
        Self {
            start,
            nodes,
            outputs,
        }
    }

    /// Load a compiled automaton from a file
    ///
    /// An unreadable file is `NotFound`; a file that does not decode is `Load`.
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            error!("Error accessing eudoxus automata file {}: {}", path.display(), e);
            EeError::NotFound(format!("{}: {}", path.display(), e))
        })?;

        Self::from_bytes(&bytes).map_err(|e| {
            error!("Error loading eudoxus automata file {}: {}", path.display(), e);
            match e {
                FormatError::Allocation(source) => EeError::Allocation(source),
                source => EeError::Load {
                    path: path.to_path_buf(),
                    source,
                },
            }
        })
    }

    /// Decode and validate a compiled automaton
    pub fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, FormatError> {
        let mut r = Reader::new(bytes);

        if r.take(MAGIC.len())? != MAGIC {
            return Err(FormatError::BadMagic);
        }
        let version = r.u16()?;
        if version != FORMAT_VERSION {
            return Err(FormatError::UnsupportedVersion(version));
        }
        let _reserved = r.u16()?;
        let start = r.u32()?;

        let output_count = r.count(MIN_OUTPUT_LEN)?;
        let mut outputs = Vec::new();
        outputs.try_reserve_exact(output_count)?;
        for _ in 0..output_count {
            let len = r.count(1)?;
            let mut output = Vec::new();
            output.try_reserve_exact(len)?;
            output.extend_from_slice(r.take(len)?);
            outputs.push(output);
        }

        let node_count = r.count(MIN_NODE_LEN)?;
        let mut nodes = Vec::new();
        nodes.try_reserve_exact(node_count)?;
        for index in 0..node_count {
            nodes.push(Self::decode_node(&mut r, index as u32)?);
        }

        if !r.is_empty() {
            return Err(FormatError::TrailingBytes(r.remaining()));
        }

        let automaton = Self {
            start,
            nodes,
            outputs,
        };
        automaton.validate()?;
        Ok(automaton)
    }

    fn decode_node(r: &mut Reader<'_>, index: u32) -> std::result::Result<Node, FormatError> {
        let flags = r.u8()?;
        let default = if flags & FLAG_HAS_DEFAULT != 0 {
            Some(DefaultEdge {
                target: r.u32()?,
                consumes: flags & FLAG_DEFAULT_CONSUMES != 0,
            })
        } else {
            None
        };

        let output_count = r.count(4)?;
        let mut outputs = Vec::new();
        outputs.try_reserve_exact(output_count)?;
        for _ in 0..output_count {
            outputs.push(r.u32()?);
        }

        let edge_count = r.count(5)?;
        let mut edges = Vec::new();
        edges.try_reserve_exact(edge_count)?;
        for _ in 0..edge_count {
            let byte = r.u8()?;
            edges.push((byte, r.u32()?));
        }
        edges.sort_unstable_by_key(|&(b, _)| b);
        if let Some(pair) = edges.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(FormatError::DuplicateEdge {
                node: index,
                byte: pair[0].0,
            });
        }

        Ok(Node {
            edges,
            default,
            outputs,
        })
    }

    fn validate(&self) -> std::result::Result<(), FormatError> {
        let node_count = self.nodes.len() as u32;
        let output_count = self.outputs.len() as u32;

        if self.start >= node_count {
            return Err(FormatError::BadStart(self.start));
        }

        // Match length is the output length, so an empty output would be a
        // zero-length match.
        if let Some(id) = self.outputs.iter().position(Vec::is_empty) {
            return Err(FormatError::EmptyOutput(id as u32));
        }

        for (i, node) in self.nodes.iter().enumerate() {
            let node_id = i as u32;
            let bad = |kind, index| FormatError::BadReference {
                kind,
                node: node_id,
                index,
            };
            if let Some(&(_, target)) = node.edges.iter().find(|&&(_, t)| t >= node_count) {
                return Err(bad("edge", target));
            }
            if let Some(d) = node.default.filter(|d| d.target >= node_count) {
                return Err(bad("default", d.target));
            }
            if let Some(&id) = node.outputs.iter().find(|&&id| id >= output_count) {
                return Err(bad("output", id));
            }
        }

        self.check_default_chains()
    }

    /// Every chain of non-consuming default edges must terminate, otherwise
    /// a byte could be followed around forever without being consumed.
    fn check_default_chains(&self) -> std::result::Result<(), FormatError> {
        const UNSEEN: u8 = 0;
        const ON_PATH: u8 = 1;
        const DONE: u8 = 2;

        let mut mark = vec![UNSEEN; self.nodes.len()];
        let mut path = Vec::new();

        for first in 0..self.nodes.len() {
            let mut current = first;
            loop {
                match mark[current] {
                    DONE => break,
                    ON_PATH => return Err(FormatError::DefaultCycle(current as u32)),
                    _ => {}
                }
                mark[current] = ON_PATH;
                path.push(current);
                match self.nodes[current].default {
                    Some(d) if !d.consumes => current = d.target as usize,
                    _ => break,
                }
            }
            for node in path.drain(..) {
                mark[node] = DONE;
            }
        }

        Ok(())
    }

    /// Encode into the binary layout accepted by [`Automaton::from_bytes`]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&self.start.to_le_bytes());

        out.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            out.extend_from_slice(&(output.len() as u32).to_le_bytes());
            out.extend_from_slice(output);
        }

        out.extend_from_slice(&(self.nodes.len() as u32).to_le_bytes());
        for node in &self.nodes {
            let mut flags = 0u8;
            if let Some(d) = node.default {
                flags |= FLAG_HAS_DEFAULT;
                if d.consumes {
                    flags |= FLAG_DEFAULT_CONSUMES;
                }
            }
            out.push(flags);
            if let Some(d) = node.default {
                out.extend_from_slice(&d.target.to_le_bytes());
            }
            out.extend_from_slice(&(node.outputs.len() as u32).to_le_bytes());
            for id in &node.outputs {
                out.extend_from_slice(&id.to_le_bytes());
            }
            out.extend_from_slice(&(node.edges.len() as u32).to_le_bytes());
            for &(byte, target) in &node.edges {
                out.push(byte);
                out.extend_from_slice(&target.to_le_bytes());
            }
        }

        out
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of distinct outputs
    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub(crate) fn start(&self) -> u32 {
        self.start
    }

    pub(crate) fn step(&self, node: u32, byte: u8) -> Step {
        let node = &self.nodes[node as usize];
        if let Some(target) = node.edge(byte) {
            return Step::Consume(target);
        }
        match node.default {
            Some(DefaultEdge {
                target,
                consumes: true,
            }) => Step::Consume(target),
            Some(DefaultEdge { target, .. }) => Step::Follow(target),
            None => Step::Dead,
        }
    }

    pub(crate) fn node_outputs(&self, node: u32) -> &[u32] {
        &self.nodes[node as usize].outputs
    }

    pub(crate) fn output(&self, id: u32) -> &[u8] {
        &self.outputs[id as usize]
    }
}

/// Bounds-checked little-endian reader
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> std::result::Result<&'a [u8], FormatError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(FormatError::Truncated(self.pos))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> std::result::Result<u8, FormatError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> std::result::Result<u16, FormatError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> std::result::Result<u32, FormatError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a u32 element count, rejecting counts the remaining input
    /// cannot possibly hold at `min_len` bytes per element.
    fn count(&mut self, min_len: usize) -> std::result::Result<usize, FormatError> {
        let at = self.pos;
        let count = self.u32()? as usize;
        if count.saturating_mul(min_len) > self.remaining() {
            return Err(FormatError::Truncated(at));
        }
        Ok(count)
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}
