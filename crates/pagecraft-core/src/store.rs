use crate::blocks::Block;

/// In-memory collection of blocks for the currently open page(s).
///
/// Blocks are kept in arrival order; sibling sequences are derived on demand
/// with a stable sort on `created_at`, so timestamp ties preserve arrival
/// order within one process lifetime.
#[derive(Debug, Default)]
pub struct BlockStore {
    blocks: Vec<Block>,
}

impl BlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, block_id: &str) -> Option<&Block> {
        self.blocks.iter().find(|block| block.id == block_id)
    }

    pub fn get_mut(&mut self, block_id: &str) -> Option<&mut Block> {
        self.blocks.iter_mut().find(|block| block.id == block_id)
    }

    pub fn contains(&self, block_id: &str) -> bool {
        self.get(block_id).is_some()
    }

    /// Inserts a block, replacing any existing block with the same id in
    /// place (keeps its arrival position).
    pub fn insert(&mut self, block: Block) {
        if let Some(existing) = self.get_mut(&block.id) {
            *existing = block;
        } else {
            self.blocks.push(block);
        }
    }

    pub fn remove(&mut self, block_id: &str) -> Option<Block> {
        let ix = self.blocks.iter().position(|block| block.id == block_id)?;
        Some(self.blocks.remove(ix))
    }

    /// Replaces all cached blocks for a page with a freshly listed set.
    pub fn replace_page(&mut self, page_id: &str, blocks: Vec<Block>) {
        self.blocks.retain(|block| block.page_id != page_id);
        self.blocks.extend(blocks);
    }

    pub fn page_is_empty(&self, page_id: &str) -> bool {
        !self.blocks.iter().any(|block| block.page_id == page_id)
    }

    /// Root sequence for a page: no parent, ordered by creation time.
    pub fn root_blocks(&self, page_id: &str) -> Vec<&Block> {
        let mut roots: Vec<&Block> = self
            .blocks
            .iter()
            .filter(|block| block.page_id == page_id && block.parent_block_id.is_none())
            .collect();
        roots.sort_by_key(|block| block.created_at);
        roots
    }

    /// Child sequence for a block, ordered by creation time.
    pub fn child_blocks(&self, parent_block_id: &str) -> Vec<&Block> {
        let mut children: Vec<&Block> = self
            .blocks
            .iter()
            .filter(|block| block.parent_block_id.as_deref() == Some(parent_block_id))
            .collect();
        children.sort_by_key(|block| block.created_at);
        children
    }

    /// The sibling scope a block participates in: either the page's root set
    /// or the children of its parent.
    pub fn sibling_scope(&self, page_id: &str, parent_block_id: Option<&str>) -> Vec<&Block> {
        match parent_block_id {
            Some(parent) => self.child_blocks(parent),
            None => self.root_blocks(page_id),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter()
    }
}
