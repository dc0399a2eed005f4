//! On-disk format for context trees.
//!
//! Depth-first pre-order, no header:
//!
//! ```text
//! node  := 0x01 occurrences:u64le ones:u64le          (leaf)
//!        | 0x00 child child                            (inner)
//! child := 0x00                                        (absent)
//!        | 0x01 node                                   (present)
//! ```
//!
//! Inner occurrences are not stored; they are rebuilt as the sum of their leaves.
//! Cluster agreement counts are not part of the format.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::ctxnode::{Node, NodeArena, NodeId, NodeKind};
use crate::ctxpatch::MAX_PATCH_LEN;
use crate::ctxtree::ContextTree;
use crate::{CtxError, Result};

const FLAG_LEAF: u8 = 1;
const FLAG_INNER: u8 = 0;
const FLAG_PRESENT: u8 = 1;
const FLAG_ABSENT: u8 = 0;

/// Serializes `tree` into `out`.
pub fn write_tree<W: Write>(tree: &ContextTree, out: &mut W) -> Result<()> {
    write_node(tree, tree.root(), out)
}

fn write_node<W: Write>(tree: &ContextTree, id: NodeId, out: &mut W) -> Result<()> {
    let node = tree.node_ref(id)?;
    match &node.kind {
        NodeKind::Leaf { ones, .. } => {
            out.write_u8(FLAG_LEAF)?;
            out.write_u64::<LittleEndian>(node.occurrences)?;
            out.write_u64::<LittleEndian>(*ones)?;
        }
        NodeKind::Inner { children } => {
            out.write_u8(FLAG_INNER)?;
            for child in children {
                match child {
                    Some(child) => {
                        out.write_u8(FLAG_PRESENT)?;
                        write_node(tree, *child, out)?;
                    }
                    None => out.write_u8(FLAG_ABSENT)?,
                }
            }
        }
    }
    Ok(())
}

/// Deserializes one tree from `input`, stopping right after its last byte.
///
/// Any short read fails the whole load; a partially decoded tree is never returned.
pub fn read_tree<R: Read>(input: &mut R) -> Result<ContextTree> {
    if read_flag(input, "root node flag")? {
        return Err(CtxError::Malformed {
            message: "root node is a leaf".to_string(),
        });
    }
    let mut arena = NodeArena::new();
    let root = arena.alloc(Node::inner(None, false));
    let mut leaf_depth = None;
    read_children(input, &mut arena, root, 0, &mut leaf_depth)?;
    let k = leaf_depth.unwrap_or(0);
    Ok(ContextTree::from_parts(arena, root, k))
}

/// Reads the two child slots of the inner node `id` at `depth`.
fn read_children<R: Read>(
    input: &mut R,
    arena: &mut NodeArena,
    id: NodeId,
    depth: usize,
    leaf_depth: &mut Option<usize>,
) -> Result<u64> {
    let mut total = 0u64;
    let mut children = [None, None];
    for (slot, child_slot) in children.iter_mut().enumerate() {
        if !read_flag(input, "child presence flag")? {
            continue;
        }
        let child_depth = depth + 1;
        if child_depth > MAX_PATCH_LEN {
            return Err(CtxError::Malformed {
                message: format!("tree deeper than {} levels", MAX_PATCH_LEN),
            });
        }
        let child = if read_flag(input, "node flag")? {
            match *leaf_depth {
                None => *leaf_depth = Some(child_depth),
                Some(expected) if expected != child_depth => {
                    return Err(CtxError::Malformed {
                        message: format!(
                            "leaf at depth {} but earlier leaves are at depth {}",
                            child_depth, expected
                        ),
                    })
                }
                Some(_) => {}
            }
            let occurrences = read_count(input, "leaf occurrences")?;
            let ones = read_count(input, "leaf ones count")?;
            if ones > occurrences {
                return Err(CtxError::Malformed {
                    message: format!("ones count {} exceeds occurrences {}", ones, occurrences),
                });
            }
            let mut leaf = Node::leaf(Some(id), slot == 1);
            leaf.occurrences = occurrences;
            if let NodeKind::Leaf { ones: count, .. } = &mut leaf.kind {
                *count = ones;
            }
            total += occurrences;
            arena.alloc(leaf)
        } else {
            if leaf_depth.is_some_and(|d| child_depth >= d) {
                return Err(CtxError::Malformed {
                    message: format!("inner node at leaf depth {}", child_depth),
                });
            }
            let inner = arena.alloc(Node::inner(Some(id), slot == 1));
            let occurrences = read_children(input, arena, inner, child_depth, leaf_depth)?;
            if let Some(node) = arena.get(inner) {
                if node.children() == [None, None] {
                    return Err(CtxError::Malformed {
                        message: format!("childless inner node at depth {}", child_depth),
                    });
                }
            }
            total += occurrences;
            inner
        };
        *child_slot = Some(child);
    }
    let node = arena.get_mut(id).ok_or(CtxError::StaleNode)?;
    node.occurrences = total;
    node.kind = NodeKind::Inner { children };
    Ok(total)
}

fn read_flag<R: Read>(input: &mut R, context: &'static str) -> Result<bool> {
    match input.read_u8().map_err(|e| short_read(e, context))? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(CtxError::Malformed {
            message: format!("invalid {} byte 0x{:02x}", context, other),
        }),
    }
}

fn read_count<R: Read>(input: &mut R, context: &'static str) -> Result<u64> {
    input
        .read_u64::<LittleEndian>()
        .map_err(|e| short_read(e, context))
}

fn short_read(err: io::Error, context: &'static str) -> CtxError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        CtxError::Truncated { context }
    } else {
        CtxError::Io { source: err }
    }
}

/// Writes `tree` to a statistics file.
pub fn save_stats<P: AsRef<Path>>(path: P, tree: &ContextTree) -> Result<()> {
    let path = path.as_ref();
    let mut out = BufWriter::new(File::create(path)?);
    write_tree(tree, &mut out)?;
    out.flush()?;
    let summary = tree.summary();
    info!(
        "Saved {} contexts ({} occurrences) to {}",
        summary.leaves,
        summary.occurrences,
        path.display()
    );
    Ok(())
}

/// Loads a statistics file; the file must hold exactly one tree.
pub fn load_stats<P: AsRef<Path>>(path: P) -> Result<ContextTree> {
    let path = path.as_ref();
    let mut input = BufReader::new(File::open(path)?);
    let tree = read_tree(&mut input)?;
    let mut probe = [0u8; 1];
    if input.read(&mut probe)? != 0 {
        return Err(CtxError::Malformed {
            message: "trailing bytes after the tree".to_string(),
        });
    }
    debug!(
        "Loaded statistics from {} (k={}, {} nodes)",
        path.display(),
        tree.patch_len(),
        tree.node_count()
    );
    Ok(tree)
}
