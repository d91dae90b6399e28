use crate::block::{Block, BlockId, BlockKind, Input};
use crate::snapshot::SnapshotError;
use log::warn;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct VariableDecl {
    pub id: String,
    pub name: String,
}

/// Read-only snapshot of the editor workspace. The generator never mutates it.
#[derive(Debug, Clone, Default)]
pub struct BlockGraph {
    blocks: Vec<Block>,
    index: HashMap<BlockId, usize>,
    variables: Vec<VariableDecl>,
}

impl BlockGraph {
    pub fn from_blocks(blocks: Vec<Block>, variables: Vec<VariableDecl>) -> Result<Self, SnapshotError> {
        let mut index = HashMap::new();
        for (pos, block) in blocks.iter().enumerate() {
            if index.insert(block.id.clone(), pos).is_some() {
                return Err(SnapshotError {
                    message: format!("Duplicate block id '{}'.", block.id),
                });
            }
        }
        for block in &blocks {
            let linked = block
                .inputs
                .values()
                .filter_map(Input::block_id)
                .chain(block.next.as_deref());
            for id in linked {
                if !index.contains_key(id) {
                    return Err(SnapshotError {
                        message: format!("Block '{}' links to missing block '{}'.", block.id, id),
                    });
                }
            }
        }
        Ok(Self {
            blocks,
            index,
            variables,
        })
    }

    pub fn get(&self, id: &str) -> Option<&Block> {
        self.index.get(id).map(|&pos| &self.blocks[pos])
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn variables(&self) -> &[VariableDecl] {
        &self.variables
    }

    pub fn top_level(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter().filter(|b| b.top_level)
    }

    /// The program's entry block. `None` means there is no program to generate.
    pub fn root(&self) -> Option<&Block> {
        self.top_level()
            .find(|b| b.kind == BlockKind::Start)
            .or_else(|| self.blocks.iter().find(|b| b.kind == BlockKind::Start))
    }

    /// Statement blocks following the root, in execution order.
    pub fn statements(&self) -> Option<Vec<&Block>> {
        let root = self.root()?;
        Some(self.chain_after(&root.id))
    }

    pub fn chain_after(&self, id: &str) -> Vec<&Block> {
        match self.get(id).and_then(|b| b.next.as_deref()) {
            Some(next) => self.chain_from(next),
            None => Vec::new(),
        }
    }

    /// Follows `next` links starting at `id` (inclusive). A cycle is cut where it closes.
    pub fn chain_from(&self, id: &str) -> Vec<&Block> {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        let mut current = self.get(id);
        while let Some(block) = current {
            if !visited.insert(block.id.as_str()) {
                warn!("cyclic statement chain closes at block {}", block.id);
                break;
            }
            out.push(block);
            current = block.next.as_deref().and_then(|next| self.get(next));
        }
        out
    }

    pub fn input_block(&self, block: &Block, name: &str) -> Option<&Block> {
        block.input(name).and_then(|id| self.get(id))
    }

    pub fn function_definitions(&self) -> Vec<&Block> {
        self.top_level()
            .filter(|b| b.kind == BlockKind::FunctionDef)
            .collect()
    }

    /// Every block reachable from the root or from a function definition.
    pub fn reachable(&self) -> HashSet<&str> {
        let mut seen = HashSet::new();
        let mut stack: Vec<&Block> = Vec::new();
        if let Some(root) = self.root() {
            stack.push(root);
        }
        stack.extend(self.function_definitions());
        while let Some(block) = stack.pop() {
            if !seen.insert(block.id.as_str()) {
                continue;
            }
            let children = block
                .inputs
                .values()
                .filter_map(Input::block_id)
                .chain(block.next.as_deref());
            for child in children {
                if let Some(child) = self.get(child) {
                    stack.push(child);
                }
            }
        }
        seen
    }

    /// Blocks that generation never visits. Shadow blocks are left to their owners.
    pub fn orphans(&self) -> Vec<&Block> {
        let reachable = self.reachable();
        self.blocks
            .iter()
            .filter(|b| !b.shadow && !reachable.contains(b.id.as_str()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockRegistry;
    use std::collections::BTreeMap;

    fn block(id: &str, type_name: &str, next: Option<&str>, top: bool) -> Block {
        Block {
            id: id.to_string(),
            type_name: type_name.to_string(),
            kind: BlockRegistry::standard().resolve(type_name),
            fields: BTreeMap::new(),
            inputs: BTreeMap::new(),
            next: next.map(ToString::to_string),
            enabled: true,
            shadow: false,
            top_level: top,
            position: None,
        }
    }

    #[test]
    fn statements_start_after_root() {
        let graph = BlockGraph::from_blocks(
            vec![
                block("s", "start", Some("a"), true),
                block("a", "move_up", Some("b"), false),
                block("b", "move_left", None, false),
            ],
            Vec::new(),
        )
        .unwrap();
        let ids = graph
            .statements()
            .unwrap()
            .iter()
            .map(|b| b.id.clone())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn missing_root_means_no_program() {
        let graph =
            BlockGraph::from_blocks(vec![block("a", "move_up", None, true)], Vec::new()).unwrap();
        assert!(graph.statements().is_none());
    }

    #[test]
    fn orphans_exclude_root_chain_and_function_definitions() {
        let graph = BlockGraph::from_blocks(
            vec![
                block("s", "start", Some("a"), true),
                block("a", "move_up", None, false),
                block("f", "func_def", None, true),
                block("lost", "move_down", Some("lost2"), true),
                block("lost2", "move_down", None, false),
            ],
            Vec::new(),
        )
        .unwrap();
        let orphans = graph.orphans().iter().map(|b| b.id.clone()).collect::<Vec<_>>();
        assert_eq!(orphans, vec!["lost", "lost2"]);
    }

    #[test]
    fn cyclic_chain_is_cut() {
        let graph = BlockGraph::from_blocks(
            vec![
                block("a", "move_up", Some("b"), true),
                block("b", "move_up", Some("a"), false),
            ],
            Vec::new(),
        )
        .unwrap();
        assert_eq!(graph.chain_from("a").len(), 2);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = BlockGraph::from_blocks(
            vec![block("a", "start", None, true), block("a", "move_up", None, true)],
            Vec::new(),
        )
        .unwrap_err();
        assert!(err.message.contains("Duplicate block id"));
    }

    #[test]
    fn dangling_links_are_rejected() {
        let err = BlockGraph::from_blocks(vec![block("a", "start", Some("zz"), true)], Vec::new())
            .unwrap_err();
        assert!(err.message.contains("missing block 'zz'"));
    }
}
