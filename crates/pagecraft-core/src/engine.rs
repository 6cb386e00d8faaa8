use crate::blocks::{Block, BlockPatch};
use crate::storage::{BlockStorage, ChangeEvent, NewBlock, StorageError};
use crate::store::BlockStore;
use tracing::warn;

#[derive(Debug)]
pub enum EngineError {
    AuthRequired,
    Storage(StorageError),
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::AuthRequired => Self::AuthRequired,
            other => Self::Storage(other),
        }
    }
}

/// Mutation layer over the in-memory store and its persistence collaborator.
///
/// Local state is the source of truth for the UI: mutations apply locally
/// first and persist behind the scenes. A remote `NotFound` means the block
/// no longer exists and is reconciled by removing it locally; any other
/// remote failure is logged and the optimistic state kept.
pub struct BlockEngine<S: BlockStorage> {
    store: BlockStore,
    storage: S,
    owner_id: Option<String>,
}

impl<S: BlockStorage> BlockEngine<S> {
    pub fn new(storage: S, owner_id: Option<String>) -> Self {
        Self {
            store: BlockStore::new(),
            storage,
            owner_id,
        }
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    fn owner(&self) -> Result<&str, EngineError> {
        self.owner_id.as_deref().ok_or(EngineError::AuthRequired)
    }

    /// Loads a page from storage, replacing any cached blocks for it. An
    /// empty page is seeded with one empty text block so there is always
    /// somewhere to type.
    pub fn load_page(&mut self, page_id: &str) -> Result<(), EngineError> {
        self.owner()?;
        let blocks = self.storage.list_blocks(page_id)?;
        self.store.replace_page(page_id, blocks);
        self.heal_page(page_id)?;
        Ok(())
    }

    /// Creates an empty text block at the end of its sibling scope.
    /// `after_block_id` records where the request came from but does not
    /// position the block; ordering is by creation time.
    pub fn add_block(
        &mut self,
        page_id: &str,
        _after_block_id: Option<&str>,
        parent_block_id: Option<&str>,
    ) -> Result<Block, EngineError> {
        let owner_id = self.owner()?.to_string();
        let block = self.storage.create_block(NewBlock {
            page_id: page_id.to_string(),
            parent_block_id: parent_block_id.map(str::to_string),
            owner_id,
        })?;
        self.store.insert(block.clone());
        Ok(block)
    }

    /// Applies a patch locally, then persists it. Unknown ids are skipped
    /// quietly; a stale update against a remotely deleted block removes the
    /// local copy.
    pub fn update_block(&mut self, block_id: &str, patch: BlockPatch) {
        if patch.is_empty() {
            return;
        }
        let Some(block) = self.store.get_mut(block_id) else {
            return;
        };
        patch.apply(block);

        match self.storage.update_block_fields(block_id, &patch) {
            Ok(()) => {}
            Err(StorageError::NotFound) => {
                self.store.remove(block_id);
            }
            Err(err) => {
                warn!(block_id, ?err, "block update failed, keeping local state");
            }
        }
    }

    /// Applies a patch to the cached copy only. Used for keystroke-level
    /// content edits that are flushed later via `commit_content`.
    pub fn update_block_local(&mut self, block_id: &str, patch: &BlockPatch) {
        if let Some(block) = self.store.get_mut(block_id) {
            patch.apply(block);
        }
    }

    /// Persists already-applied content for a block.
    pub fn commit_content(&mut self, block_id: &str, content: &str) {
        if !self.store.contains(block_id) {
            return;
        }
        match self
            .storage
            .update_block_fields(block_id, &BlockPatch::content(content))
        {
            Ok(()) => {}
            Err(StorageError::NotFound) => {
                self.store.remove(block_id);
            }
            Err(err) => {
                warn!(block_id, ?err, "content flush failed, keeping local state");
            }
        }
    }

    /// Removes a block locally, then from storage. The local removal sticks
    /// even when the remote delete fails.
    pub fn delete_block(&mut self, block_id: &str) {
        if self.store.remove(block_id).is_none() {
            return;
        }
        match self.storage.delete_block_by_id(block_id) {
            Ok(()) | Err(StorageError::NotFound) => {}
            Err(err) => {
                warn!(block_id, ?err, "block delete failed, keeping local removal");
            }
        }
    }

    pub fn toggle_block_expansion(&mut self, block_id: &str) {
        let Some(block) = self.store.get(block_id) else {
            return;
        };
        let expanded = !block.is_expanded;
        self.update_block(block_id, BlockPatch::expansion(expanded));
    }

    /// Merges one out-of-band change into the local cache. Updates win
    /// field-by-field; a deletion removes the block and re-seeds the page
    /// when it ends up empty.
    pub fn apply_remote_change(&mut self, change: ChangeEvent) -> Result<(), EngineError> {
        match change {
            ChangeEvent::Created(block) => {
                self.store.insert(block);
            }
            ChangeEvent::Updated { id, patch } => {
                if let Some(block) = self.store.get_mut(&id) {
                    patch.apply(block);
                }
            }
            ChangeEvent::Deleted { id } => {
                if let Some(removed) = self.store.remove(&id) {
                    self.heal_page(&removed.page_id)?;
                }
            }
        }
        Ok(())
    }

    /// Drains storage-side change notifications and folds them in.
    pub fn sync_remote_changes(&mut self) -> Result<(), EngineError> {
        let changes = self.storage.poll_changes()?;
        for change in changes {
            self.apply_remote_change(change)?;
        }
        Ok(())
    }

    fn heal_page(&mut self, page_id: &str) -> Result<(), EngineError> {
        if self.store.page_is_empty(page_id) {
            self.add_block(page_id, None, None)?;
        }
        Ok(())
    }

    pub fn block(&self, block_id: &str) -> Option<&Block> {
        self.store.get(block_id)
    }

    pub fn contains_block(&self, block_id: &str) -> bool {
        self.store.contains(block_id)
    }

    pub fn root_blocks(&self, page_id: &str) -> Vec<&Block> {
        self.store.root_blocks(page_id)
    }

    pub fn child_blocks(&self, parent_block_id: &str) -> Vec<&Block> {
        self.store.child_blocks(parent_block_id)
    }

    pub fn sibling_scope(&self, page_id: &str, parent_block_id: Option<&str>) -> Vec<&Block> {
        self.store.sibling_scope(page_id, parent_block_id)
    }
}

#[cfg(test)]
mod tests {
    use super::{BlockEngine, EngineError};
    use crate::blocks::{Block, BlockPatch, BlockType};
    use crate::storage::{BlockStorage, ChangeEvent, NewBlock, SqliteStorage, StorageError};

    fn engine() -> BlockEngine<SqliteStorage> {
        let storage = SqliteStorage::new_in_memory().expect("storage");
        BlockEngine::new(storage, Some("owner".to_string()))
    }

    /// Storage that fails every write with a backend error, for checking the
    /// optimistic paths.
    struct FlakyStorage {
        inner: SqliteStorage,
        fail_writes: bool,
    }

    impl FlakyStorage {
        fn new() -> Self {
            Self {
                inner: SqliteStorage::new_in_memory().expect("storage"),
                fail_writes: false,
            }
        }
    }

    impl BlockStorage for FlakyStorage {
        fn list_blocks(&self, page_id: &str) -> Result<Vec<Block>, StorageError> {
            self.inner.list_blocks(page_id)
        }

        fn create_block(&mut self, fields: NewBlock) -> Result<Block, StorageError> {
            if self.fail_writes {
                return Err(StorageError::Backend("offline".to_string()));
            }
            self.inner.create_block(fields)
        }

        fn update_block_fields(
            &mut self,
            block_id: &str,
            patch: &BlockPatch,
        ) -> Result<(), StorageError> {
            if self.fail_writes {
                return Err(StorageError::Backend("offline".to_string()));
            }
            self.inner.update_block_fields(block_id, patch)
        }

        fn delete_block_by_id(&mut self, block_id: &str) -> Result<(), StorageError> {
            if self.fail_writes {
                return Err(StorageError::Backend("offline".to_string()));
            }
            self.inner.delete_block_by_id(block_id)
        }
    }

    /// Storage with a queue of change notifications, drained by
    /// `poll_changes`.
    struct PushStorage {
        inner: SqliteStorage,
        pending: Vec<ChangeEvent>,
    }

    impl PushStorage {
        fn new() -> Self {
            Self {
                inner: SqliteStorage::new_in_memory().expect("storage"),
                pending: Vec::new(),
            }
        }
    }

    impl BlockStorage for PushStorage {
        fn list_blocks(&self, page_id: &str) -> Result<Vec<Block>, StorageError> {
            self.inner.list_blocks(page_id)
        }

        fn create_block(&mut self, fields: NewBlock) -> Result<Block, StorageError> {
            self.inner.create_block(fields)
        }

        fn update_block_fields(
            &mut self,
            block_id: &str,
            patch: &BlockPatch,
        ) -> Result<(), StorageError> {
            self.inner.update_block_fields(block_id, patch)
        }

        fn delete_block_by_id(&mut self, block_id: &str) -> Result<(), StorageError> {
            self.inner.delete_block_by_id(block_id)
        }

        fn poll_changes(&mut self) -> Result<Vec<ChangeEvent>, StorageError> {
            Ok(std::mem::take(&mut self.pending))
        }
    }

    #[test]
    fn sync_folds_in_every_pending_change() {
        let storage = PushStorage::new();
        let mut engine = BlockEngine::new(storage, Some("owner".to_string()));
        engine.load_page("p1").expect("load");
        let seed = engine.root_blocks("p1")[0].id.clone();

        let arrival = Block {
            id: "remote-1".to_string(),
            page_id: "p1".to_string(),
            parent_block_id: None,
            block_type: BlockType::Text,
            content: "from elsewhere".to_string(),
            checked: false,
            src: None,
            language: None,
            is_expanded: false,
            created_at: i64::MAX,
        };
        engine.storage.pending.push(ChangeEvent::Created(arrival));
        engine.storage.pending.push(ChangeEvent::Updated {
            id: seed.clone(),
            patch: BlockPatch::content("edited elsewhere"),
        });

        engine.sync_remote_changes().expect("sync");
        let roots = engine.root_blocks("p1");
        assert_eq!(roots.len(), 2);
        assert_eq!(roots[0].content, "edited elsewhere");
        assert_eq!(roots[1].id, "remote-1");

        // The queue was drained; a second sync changes nothing.
        engine.sync_remote_changes().expect("sync");
        assert_eq!(engine.root_blocks("p1").len(), 2);
    }

    #[test]
    fn load_page_requires_an_owner() {
        let storage = SqliteStorage::new_in_memory().expect("storage");
        let mut engine: BlockEngine<SqliteStorage> = BlockEngine::new(storage, None);
        let result = engine.load_page("p1");
        assert!(matches!(result, Err(EngineError::AuthRequired)));
    }

    #[test]
    fn load_page_seeds_an_empty_page() {
        let mut engine = engine();
        engine.load_page("p1").expect("load");
        let roots = engine.root_blocks("p1");
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].block_type, BlockType::Text);
        assert_eq!(roots[0].content, "");
    }

    #[test]
    fn added_blocks_append_in_creation_order() {
        let mut engine = engine();
        engine.load_page("p1").expect("load");
        let seed_id = engine.root_blocks("p1")[0].id.clone();
        let second = engine.add_block("p1", Some(&seed_id), None).expect("add");

        let roots = engine.root_blocks("p1");
        assert_eq!(roots.len(), 2);
        assert_eq!(roots[1].id, second.id);
    }

    #[test]
    fn update_applies_locally_and_persists() {
        let mut engine = engine();
        engine.load_page("p1").expect("load");
        let id = engine.root_blocks("p1")[0].id.clone();

        engine.update_block(&id, BlockPatch::content("hello"));
        assert_eq!(engine.block(&id).expect("block").content, "hello");

        engine.load_page("p1").expect("reload");
        assert_eq!(engine.block(&id).expect("block").content, "hello");
    }

    #[test]
    fn update_for_unknown_id_is_a_no_op() {
        let mut engine = engine();
        engine.load_page("p1").expect("load");
        engine.update_block("missing", BlockPatch::content("x"));
        assert!(!engine.contains_block("missing"));
    }

    #[test]
    fn stale_update_removes_the_local_copy() {
        let mut engine = engine();
        engine.load_page("p1").expect("load");
        let id = engine.root_blocks("p1")[0].id.clone();
        let extra = engine.add_block("p1", None, None).expect("add");

        // Deleted behind the engine's back.
        engine.storage.delete_block_by_id(&id).expect("delete");
        engine.update_block(&id, BlockPatch::content("stale"));
        assert!(!engine.contains_block(&id));
        assert!(engine.contains_block(&extra.id));
    }

    #[test]
    fn failed_update_keeps_the_optimistic_state() {
        let storage = FlakyStorage::new();
        let mut engine = BlockEngine::new(storage, Some("owner".to_string()));
        engine.load_page("p1").expect("load");
        let id = engine.root_blocks("p1")[0].id.clone();

        engine.storage.fail_writes = true;
        engine.update_block(&id, BlockPatch::content("kept"));
        assert_eq!(engine.block(&id).expect("block").content, "kept");
    }

    #[test]
    fn delete_is_optimistic_even_when_the_backend_fails() {
        let storage = FlakyStorage::new();
        let mut engine = BlockEngine::new(storage, Some("owner".to_string()));
        engine.load_page("p1").expect("load");
        let id = engine.root_blocks("p1")[0].id.clone();
        let kept = engine.add_block("p1", None, None).expect("add");

        engine.storage.fail_writes = true;
        engine.delete_block(&id);
        assert!(!engine.contains_block(&id));
        assert!(engine.contains_block(&kept.id));
    }

    #[test]
    fn toggle_flips_expansion() {
        let mut engine = engine();
        engine.load_page("p1").expect("load");
        let id = engine.root_blocks("p1")[0].id.clone();
        engine.update_block(
            &id,
            BlockPatch {
                block_type: Some(BlockType::Toggle),
                is_expanded: Some(false),
                ..BlockPatch::default()
            },
        );

        engine.toggle_block_expansion(&id);
        assert!(engine.block(&id).expect("block").is_expanded);
        engine.toggle_block_expansion(&id);
        assert!(!engine.block(&id).expect("block").is_expanded);
    }

    #[test]
    fn remote_delete_reseeds_an_emptied_page() {
        let mut engine = engine();
        engine.load_page("p1").expect("load");
        let id = engine.root_blocks("p1")[0].id.clone();

        engine
            .apply_remote_change(ChangeEvent::Deleted { id: id.clone() })
            .expect("apply");
        assert!(!engine.contains_block(&id));
        assert_eq!(engine.root_blocks("p1").len(), 1);
    }

    #[test]
    fn remote_update_merges_fields() {
        let mut engine = engine();
        engine.load_page("p1").expect("load");
        let id = engine.root_blocks("p1")[0].id.clone();
        engine.update_block(&id, BlockPatch::content("mine"));

        engine
            .apply_remote_change(ChangeEvent::Updated {
                id: id.clone(),
                patch: BlockPatch {
                    checked: Some(true),
                    ..BlockPatch::default()
                },
            })
            .expect("apply");

        let block = engine.block(&id).expect("block");
        assert_eq!(block.content, "mine");
        assert!(block.checked);
    }

    #[test]
    fn commit_content_persists_the_draft() {
        let mut engine = engine();
        engine.load_page("p1").expect("load");
        let id = engine.root_blocks("p1")[0].id.clone();

        engine.update_block_local(&id, &BlockPatch::content("draft"));
        engine.commit_content(&id, "draft");

        engine.load_page("p1").expect("reload");
        assert_eq!(engine.block(&id).expect("block").content, "draft");
    }
}
