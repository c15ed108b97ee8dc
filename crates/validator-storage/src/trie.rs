// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Authenticated Merkle-Radix trie over global state (C2).
//!
//! Keys are the 70 hex characters of an `Address`, walked one nibble (hex
//! character, value 0-15) at a time. Internal structure follows a
//! Merkle-Patricia layout: `Branch` nodes hold up to 16 children keyed by
//! nibble, `Extension` nodes compress a shared run of nibbles above a
//! branch, and `Leaf` nodes compress the remaining suffix above a value.
//! A node's id is the SHA-256 of its canonical (`bcs`) encoding, so two
//! roots are structurally identical, and therefore hash-equal, iff they
//! encode the same address-to-value mapping — collapsing rules below keep
//! the shape independent of insertion/deletion history.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, StorageError};
use crate::kv::{KvStore, WriteOp, CF_TRIE_NODES};

pub type NodeHash = [u8; 32];

/// Root hash of the canonically empty trie (no addresses set).
pub const EMPTY_TRIE_ROOT: NodeHash = [0u8; 32];

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
enum Node {
    Leaf { path: Vec<u8>, value: Vec<u8> },
    Extension { path: Vec<u8>, child: NodeHash },
    Branch { children: Vec<(u8, NodeHash)> },
}

fn hash_node(node: &Node) -> Result<NodeHash> {
    let bytes = bcs::to_bytes(node)?;
    Ok(Sha256::digest(bytes).into())
}

/// A pending set of newly created nodes, flushed as one atomic write batch
/// at the end of `apply`. Untouched subtrees are never rewritten, so this
/// is exactly the "minimum set of nodes on the affected paths" from §4.1.
#[derive(Default)]
struct PendingNodes {
    nodes: HashMap<NodeHash, Node>,
}

impl PendingNodes {
    fn insert(&mut self, node: Node) -> Result<NodeHash> {
        let hash = hash_node(&node)?;
        self.nodes.insert(hash, node);
        Ok(hash)
    }
}

/// Converts a 70-character hex address into 70 nibbles (0-15).
pub fn address_to_nibbles(address: &str) -> Result<Vec<u8>> {
    address
        .bytes()
        .map(|b| {
            (b as char)
                .to_digit(16)
                .map(|d| d as u8)
                .ok_or_else(|| StorageError::Corruption(format!("non-hex address byte {b}")))
        })
        .collect()
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Read-only view of a single trie version. Cheap to clone: `kv` is itself
/// an `Arc<DB>` handle, so a reader carries no borrow on its caller and can
/// be moved freely into spawned work or trait objects.
#[derive(Clone)]
pub struct TrieReader {
    kv: KvStore,
    root: NodeHash,
}

impl TrieReader {
    pub fn new(kv: &KvStore, root: NodeHash) -> Self {
        Self { kv: kv.clone(), root }
    }

    pub fn root(&self) -> NodeHash {
        self.root
    }

    pub fn get(&self, address: &str) -> Result<Option<Vec<u8>>> {
        if self.root == EMPTY_TRIE_ROOT {
            return Ok(None);
        }
        let nibbles = address_to_nibbles(address)?;
        get_rec(&self.kv, self.root, &nibbles)
    }

    /// Returns the set of addresses within `self` whose value exists and
    /// differs from (or is absent from) `other` — used by the journal to
    /// turn a committed receipt into state-delta events. Implemented as a
    /// full walk since the trie does not track per-version dirty sets.
    pub fn get_many(&self, addresses: &[String]) -> Result<Vec<(String, Option<Vec<u8>>)>> {
        addresses
            .iter()
            .map(|addr| Ok((addr.clone(), self.get(addr)?)))
            .collect()
    }
}

fn get_rec(kv: &KvStore, hash: NodeHash, nibbles: &[u8]) -> Result<Option<Vec<u8>>> {
    let node = load_node(kv, &HashMap::new(), hash)?;
    match node {
        Node::Leaf { path, value } => {
            if path == nibbles {
                Ok(Some(value))
            } else {
                Ok(None)
            }
        }
        Node::Extension { path, child } => {
            if nibbles.starts_with(&path[..]) {
                get_rec(kv, child, &nibbles[path.len()..])
            } else {
                Ok(None)
            }
        }
        Node::Branch { children } => {
            let Some((first, rest)) = nibbles.split_first() else {
                return Ok(None);
            };
            match children.iter().find(|(n, _)| n == first) {
                Some((_, child_hash)) => get_rec(kv, *child_hash, rest),
                None => Ok(None),
            }
        }
    }
}

fn load_node(kv: &KvStore, pending: &HashMap<NodeHash, Node>, hash: NodeHash) -> Result<Node> {
    if let Some(node) = pending.get(&hash) {
        return Ok(node.clone());
    }
    let bytes = kv
        .get(CF_TRIE_NODES, &hash)?
        .ok_or_else(|| StorageError::Corruption(format!("missing trie node {}", hex::encode(hash))))?;
    Ok(bcs::from_bytes(&bytes)?)
}

/// A single requested change to global state.
pub enum StateChangeOp {
    Set { address: String, value: Vec<u8> },
    Delete { address: String },
}

/// Applies an ordered list of changes on top of `parent_root`, producing a
/// new root. Writes only the nodes that changed, via one atomic batch.
pub struct TrieWriter {
    kv: KvStore,
}

impl TrieWriter {
    pub fn new(kv: &KvStore) -> Self {
        Self { kv: kv.clone() }
    }

    pub fn apply(&self, parent_root: NodeHash, changes: Vec<StateChangeOp>) -> Result<NodeHash> {
        let mut pending = PendingNodes::default();
        let mut root = if parent_root == EMPTY_TRIE_ROOT { None } else { Some(parent_root) };

        for change in changes {
            match change {
                StateChangeOp::Set { address, value } => {
                    let nibbles = address_to_nibbles(&address)?;
                    root = Some(insert(&self.kv, &mut pending, root, &nibbles, value)?);
                }
                StateChangeOp::Delete { address } => {
                    let nibbles = address_to_nibbles(&address)?;
                    root = delete(&self.kv, &mut pending, root, &nibbles)?;
                }
            }
        }

        let new_root = root.unwrap_or(EMPTY_TRIE_ROOT);
        let ops = pending
            .nodes
            .into_iter()
            .map(|(hash, node)| {
                Ok(WriteOp::Put {
                    cf: CF_TRIE_NODES,
                    key: hash.to_vec(),
                    value: bcs::to_bytes(&node)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.kv.write_batch(ops)?;
        Ok(new_root)
    }
}

fn insert(
    kv: &KvStore,
    pending: &mut PendingNodes,
    node_hash: Option<NodeHash>,
    nibbles: &[u8],
    value: Vec<u8>,
) -> Result<NodeHash> {
    let Some(node_hash) = node_hash else {
        return pending.insert(Node::Leaf { path: nibbles.to_vec(), value });
    };
    let node = load_node(kv, &pending.nodes, node_hash)?;

    match node {
        Node::Leaf { path, value: old_value } => {
            if path == nibbles {
                return pending.insert(Node::Leaf { path, value });
            }
            let cp = common_prefix_len(&path, nibbles);
            let old_slot = pending.insert(Node::Leaf { path: path[cp + 1..].to_vec(), value: old_value })?;
            let new_slot = pending.insert(Node::Leaf { path: nibbles[cp + 1..].to_vec(), value })?;
            let branch = branch_of_two(pending, path[cp], old_slot, nibbles[cp], new_slot)?;
            wrap_with_prefix(pending, &path[..cp], branch)
        }
        Node::Extension { path, child } => {
            let cp = common_prefix_len(&path, nibbles);
            if cp == path.len() {
                let new_child = insert(kv, pending, Some(child), &nibbles[cp..], value)?;
                return pending.insert(Node::Extension { path, child: new_child });
            }
            let old_slot = if path.len() > cp + 1 {
                pending.insert(Node::Extension { path: path[cp + 1..].to_vec(), child })?
            } else {
                child
            };
            let new_slot = pending.insert(Node::Leaf { path: nibbles[cp + 1..].to_vec(), value })?;
            let branch = branch_of_two(pending, path[cp], old_slot, nibbles[cp], new_slot)?;
            wrap_with_prefix(pending, &path[..cp], branch)
        }
        Node::Branch { mut children } => {
            let Some((first, rest)) = nibbles.split_first() else {
                return Err(StorageError::Corruption("branch reached with empty key".into()));
            };
            let existing_child = children.iter().find(|(n, _)| n == first).map(|(_, h)| *h);
            let new_child = insert(kv, pending, existing_child, rest, value)?;
            children.retain(|(n, _)| n != first);
            children.push((*first, new_child));
            children.sort_by_key(|(n, _)| *n);
            pending.insert(Node::Branch { children })
        }
    }
}

/// Builds a 2-entry branch from two diverging (nibble, already-inserted
/// subtree hash) pairs. The two nibbles are always distinct, since they are
/// the first point of divergence between two equal-length nibble paths.
fn branch_of_two(
    pending: &mut PendingNodes,
    nibble_a: u8,
    hash_a: NodeHash,
    nibble_b: u8,
    hash_b: NodeHash,
) -> Result<NodeHash> {
    let mut children = vec![(nibble_a, hash_a), (nibble_b, hash_b)];
    children.sort_by_key(|(n, _)| *n);
    pending.insert(Node::Branch { children })
}

/// Wraps `child` in an `Extension` for `prefix` if non-empty, otherwise
/// returns `child` unchanged.
fn wrap_with_prefix(pending: &mut PendingNodes, prefix: &[u8], child: NodeHash) -> Result<NodeHash> {
    if prefix.is_empty() {
        Ok(child)
    } else {
        pending.insert(Node::Extension { path: prefix.to_vec(), child })
    }
}

/// Removes `nibbles` from the subtree rooted at `node_hash`, returning the
/// new subtree root, or `None` if the subtree is now empty. Collapses
/// branches down to a single child (merging into an `Extension`/`Leaf`) so
/// the resulting shape is independent of how it was built — required for
/// the "equal maps produce equal roots" invariant.
fn delete(kv: &KvStore, pending: &mut PendingNodes, node_hash: Option<NodeHash>, nibbles: &[u8]) -> Result<Option<NodeHash>> {
    let Some(node_hash) = node_hash else {
        return Ok(None);
    };
    let node = load_node(kv, &pending.nodes, node_hash)?;

    match node {
        Node::Leaf { path, .. } => {
            if path == nibbles {
                Ok(None)
            } else {
                Ok(Some(node_hash))
            }
        }
        Node::Extension { path, child } => {
            if !nibbles.starts_with(&path[..]) {
                return Ok(Some(node_hash));
            }
            match delete(kv, pending, Some(child), &nibbles[path.len()..])? {
                None => Ok(None),
                Some(new_child) => Ok(Some(merge_extension(pending, &path, new_child)?)),
            }
        }
        Node::Branch { mut children } => {
            let Some((first, rest)) = nibbles.split_first() else {
                return Ok(Some(node_hash));
            };
            let Some(pos) = children.iter().position(|(n, _)| n == first) else {
                return Ok(Some(node_hash));
            };
            let (_, child_hash) = children[pos];
            match delete(kv, pending, Some(child_hash), rest)? {
                None => {
                    children.remove(pos);
                }
                Some(new_child) => {
                    children[pos] = (*first, new_child);
                }
            }

            match children.len() {
                0 => Ok(None),
                1 => {
                    let (nibble, only_child_hash) = children[0];
                    let only_child = load_node(kv, &pending.nodes, only_child_hash)?;
                    let collapsed = match only_child {
                        Node::Leaf { path, value } => {
                            let mut new_path = vec![nibble];
                            new_path.extend(path);
                            Node::Leaf { path: new_path, value }
                        }
                        Node::Extension { path, child } => {
                            let mut new_path = vec![nibble];
                            new_path.extend(path);
                            Node::Extension { path: new_path, child }
                        }
                        Node::Branch { .. } => Node::Extension { path: vec![nibble], child: only_child_hash },
                    };
                    Ok(Some(pending.insert(collapsed)?))
                }
                _ => Ok(Some(pending.insert(Node::Branch { children })?)),
            }
        }
    }
}

/// Merges an `Extension{path, ..}` with its (already rewritten) child,
/// re-collapsing when the child turns out to also be a `Leaf`/`Extension`.
fn merge_extension(pending: &mut PendingNodes, path: &[u8], child_hash: NodeHash) -> Result<NodeHash> {
    let child = pending
        .nodes
        .get(&child_hash)
        .cloned()
        .ok_or_else(|| StorageError::Corruption("extension child missing from pending set".into()))?;
    match child {
        Node::Leaf { path: child_path, value } => {
            let mut new_path = path.to_vec();
            new_path.extend(child_path);
            pending.insert(Node::Leaf { path: new_path, value })
        }
        Node::Extension { path: child_path, child: grandchild } => {
            let mut new_path = path.to_vec();
            new_path.extend(child_path);
            pending.insert(Node::Extension { path: new_path, child: grandchild })
        }
        Node::Branch { .. } => pending.insert(Node::Extension { path: path.to_vec(), child: child_hash }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator_types::Address;

    fn addr(family: &str, key: &str) -> String {
        Address::from_family_and_key(family, key.as_bytes()).to_string()
    }

    #[test]
    fn get_on_empty_trie_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path()).unwrap();
        let reader = TrieReader::new(&kv, EMPTY_TRIE_ROOT);
        assert_eq!(reader.get(&addr("intkey", "MyKey")).unwrap(), None);
    }

    #[test]
    fn set_then_get_single_address() {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path()).unwrap();
        let writer = TrieWriter::new(&kv);
        let a = addr("intkey", "MyKey");
        let root = writer
            .apply(EMPTY_TRIE_ROOT, vec![StateChangeOp::Set { address: a.clone(), value: b"999".to_vec() }])
            .unwrap();
        let reader = TrieReader::new(&kv, root);
        assert_eq!(reader.get(&a).unwrap(), Some(b"999".to_vec()));
    }

    #[test]
    fn two_equal_change_sets_from_different_orders_yield_same_root() {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path()).unwrap();
        let writer = TrieWriter::new(&kv);
        let a = addr("intkey", "Alpha");
        let b = addr("intkey", "Beta");
        let c = addr("intkey", "Gamma");

        let root1 = writer
            .apply(
                EMPTY_TRIE_ROOT,
                vec![
                    StateChangeOp::Set { address: a.clone(), value: b"1".to_vec() },
                    StateChangeOp::Set { address: b.clone(), value: b"2".to_vec() },
                    StateChangeOp::Set { address: c.clone(), value: b"3".to_vec() },
                ],
            )
            .unwrap();

        let root2 = writer
            .apply(
                EMPTY_TRIE_ROOT,
                vec![
                    StateChangeOp::Set { address: c, value: b"3".to_vec() },
                    StateChangeOp::Set { address: a, value: b"1".to_vec() },
                    StateChangeOp::Set { address: b, value: b"2".to_vec() },
                ],
            )
            .unwrap();

        assert_eq!(root1, root2);
    }

    #[test]
    fn delete_restores_previous_root() {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path()).unwrap();
        let writer = TrieWriter::new(&kv);
        let a = addr("intkey", "Alpha");
        let b = addr("intkey", "Beta");

        let root1 = writer
            .apply(EMPTY_TRIE_ROOT, vec![StateChangeOp::Set { address: a.clone(), value: b"1".to_vec() }])
            .unwrap();
        let root2 = writer
            .apply(root1, vec![StateChangeOp::Set { address: b.clone(), value: b"2".to_vec() }])
            .unwrap();
        let root3 = writer.apply(root2, vec![StateChangeOp::Delete { address: b }]).unwrap();

        assert_eq!(root1, root3);
        let reader = TrieReader::new(&kv, root3);
        assert_eq!(reader.get(&a).unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn different_roots_from_same_parent_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path()).unwrap();
        let writer = TrieWriter::new(&kv);
        let a = addr("intkey", "Alpha");

        let root1 = writer
            .apply(EMPTY_TRIE_ROOT, vec![StateChangeOp::Set { address: a.clone(), value: b"1".to_vec() }])
            .unwrap();
        let root2 = writer
            .apply(root1, vec![StateChangeOp::Set { address: a.clone(), value: b"2".to_vec() }])
            .unwrap();

        // root1 is untouched by the write that produced root2.
        let reader1 = TrieReader::new(&kv, root1);
        let reader2 = TrieReader::new(&kv, root2);
        assert_eq!(reader1.get(&a).unwrap(), Some(b"1".to_vec()));
        assert_eq!(reader2.get(&a).unwrap(), Some(b"2".to_vec()));
    }
}
