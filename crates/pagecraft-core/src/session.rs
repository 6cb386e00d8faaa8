use crate::blocks::BlockPatch;
use crate::commands::{retype_patch, strip_trigger, BLOCK_COMMANDS, MENU_TRIGGER};
use crate::engine::{BlockEngine, EngineError};
use crate::storage::BlockStorage;
use std::collections::HashMap;

/// Where the interaction state machine currently sits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Editing { block_id: String },
    MenuOpen { block_id: String, selected_index: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    Enter,
    Backspace,
    ArrowUp,
    ArrowDown,
    Escape,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaretPlacement {
    Start,
    End,
}

/// A block the UI should move the caret into once it is mounted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FocusIntent {
    pub block_id: String,
    pub placement: CaretPlacement,
}

/// Attempts before a pending focus request is dropped; the target may never
/// mount (deleted before the UI caught up).
pub const FOCUS_ATTEMPT_BUDGET: u32 = 5;

/// Single-slot queue of focus requests. A new request replaces whatever is
/// pending; the UI polls with `try_acquire` each frame until the target
/// block is mounted or the attempt budget runs out.
#[derive(Debug, Default)]
pub struct FocusQueue {
    pending: Option<FocusIntent>,
    attempts: u32,
}

impl FocusQueue {
    pub fn request(&mut self, block_id: impl Into<String>, placement: CaretPlacement) {
        self.pending = Some(FocusIntent {
            block_id: block_id.into(),
            placement,
        });
        self.attempts = 0;
    }

    pub fn pending(&self) -> Option<&FocusIntent> {
        self.pending.as_ref()
    }

    pub fn clear(&mut self) {
        self.pending = None;
        self.attempts = 0;
    }

    /// Hands out the pending intent once its target is mounted. Each miss
    /// burns one attempt; the request is dropped quietly when the budget is
    /// exhausted.
    pub fn try_acquire(&mut self, is_mounted: impl Fn(&str) -> bool) -> Option<FocusIntent> {
        let intent = self.pending.as_ref()?;
        if is_mounted(&intent.block_id) {
            self.attempts = 0;
            return self.pending.take();
        }
        self.attempts += 1;
        if self.attempts >= FOCUS_ATTEMPT_BUDGET {
            self.clear();
        }
        None
    }
}

/// Milliseconds of typing quiet before a content draft is persisted.
pub const CONTENT_FLUSH_WINDOW_MS: u64 = 150;

/// Committed/draft pair for one block's content. Keystrokes land in the
/// draft; the committed side only moves on flush.
#[derive(Clone, Debug)]
pub struct DraftState {
    committed: String,
    draft: String,
    last_edit_ms: u64,
}

impl DraftState {
    pub fn new(committed: impl Into<String>) -> Self {
        let committed = committed.into();
        Self {
            draft: committed.clone(),
            committed,
            last_edit_ms: 0,
        }
    }

    pub fn edit(&mut self, content: impl Into<String>, now_ms: u64) {
        self.draft = content.into();
        self.last_edit_ms = now_ms;
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn is_dirty(&self) -> bool {
        self.draft != self.committed
    }

    pub fn flush_due(&self, now_ms: u64, window_ms: u64) -> bool {
        self.is_dirty() && now_ms.saturating_sub(self.last_edit_ms) >= window_ms
    }

    pub fn mark_flushed(&mut self) {
        self.committed = self.draft.clone();
    }
}

/// True when the content ends with the menu trigger character.
pub fn detect_menu_trigger(content: &str) -> bool {
    content.ends_with(MENU_TRIGGER)
}

/// Steps an index through a fixed-length list, wrapping at both ends.
pub fn cycle_index(current: usize, len: usize, forward: bool) -> usize {
    if len == 0 {
        return 0;
    }
    if forward {
        (current + 1) % len
    } else {
        (current + len - 1) % len
    }
}

/// One user's editing session on one page: owns the interaction state
/// machine, the content drafts, and the focus queue on top of the engine.
pub struct EditorSession<S: BlockStorage> {
    engine: BlockEngine<S>,
    page_id: String,
    state: SessionState,
    focus: FocusQueue,
    drafts: HashMap<String, DraftState>,
}

impl<S: BlockStorage> EditorSession<S> {
    pub fn open(mut engine: BlockEngine<S>, page_id: &str) -> Result<Self, EngineError> {
        engine.load_page(page_id)?;
        Ok(Self {
            engine,
            page_id: page_id.to_string(),
            state: SessionState::Idle,
            focus: FocusQueue::default(),
            drafts: HashMap::new(),
        })
    }

    pub fn engine(&self) -> &BlockEngine<S> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut BlockEngine<S> {
        &mut self.engine
    }

    pub fn page_id(&self) -> &str {
        &self.page_id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn focus_mut(&mut self) -> &mut FocusQueue {
        &mut self.focus
    }

    pub fn begin_editing(&mut self, block_id: &str) {
        if self.engine.contains_block(block_id) {
            self.state = SessionState::Editing {
                block_id: block_id.to_string(),
            };
        }
    }

    fn menu_open_for(&self, block_id: &str) -> Option<usize> {
        match &self.state {
            SessionState::MenuOpen {
                block_id: open_id,
                selected_index,
            } if open_id == block_id => Some(*selected_index),
            _ => None,
        }
    }

    /// Records a keystroke-level content change: updates the local block and
    /// its draft, and opens or closes the command menu on the trigger
    /// character. Persistence happens later via `flush_drafts`.
    pub fn handle_content_change(&mut self, block_id: &str, content: &str, now_ms: u64) {
        let Some(previous) = self.engine.block(block_id).map(|b| b.content.clone()) else {
            return;
        };

        self.drafts
            .entry(block_id.to_string())
            .or_insert_with(|| DraftState::new(previous))
            .edit(content, now_ms);
        self.engine
            .update_block_local(block_id, &BlockPatch::content(content));

        if detect_menu_trigger(content) {
            self.state = SessionState::MenuOpen {
                block_id: block_id.to_string(),
                selected_index: 0,
            };
        } else {
            self.state = SessionState::Editing {
                block_id: block_id.to_string(),
            };
        }
    }

    /// Handles a key press inside a block. Returns true when the key was
    /// consumed and the UI should suppress its default behavior.
    pub fn handle_key_down(
        &mut self,
        key: Key,
        block_id: &str,
        parent_block_id: Option<&str>,
        now_ms: u64,
    ) -> bool {
        match key {
            Key::Enter => {
                if let Some(selected_index) = self.menu_open_for(block_id) {
                    self.choose_menu_entry(block_id, selected_index);
                    return true;
                }
                self.split_after(block_id, parent_block_id, now_ms);
                true
            }
            Key::Backspace => self.backspace_on(block_id, parent_block_id, now_ms),
            Key::ArrowUp | Key::ArrowDown => {
                let Some(selected_index) = self.menu_open_for(block_id) else {
                    return false;
                };
                let forward = key == Key::ArrowDown;
                self.state = SessionState::MenuOpen {
                    block_id: block_id.to_string(),
                    selected_index: cycle_index(selected_index, BLOCK_COMMANDS.len(), forward),
                };
                true
            }
            Key::Escape => {
                if self.menu_open_for(block_id).is_none() {
                    return false;
                }
                self.dismiss_menu(block_id);
                true
            }
        }
    }

    /// Applies the selected menu command to the block and returns to plain
    /// editing with the caret at the end.
    pub fn choose_menu_entry(&mut self, block_id: &str, index: usize) {
        let Some(command) = BLOCK_COMMANDS.get(index) else {
            return;
        };
        let Some(content) = self.engine.block(block_id).map(|b| b.content.clone()) else {
            self.state = SessionState::Idle;
            return;
        };

        let patch = retype_patch(command, &content);
        let committed = patch.content.clone().unwrap_or_default();
        self.engine.update_block(block_id, patch);
        self.drafts
            .insert(block_id.to_string(), DraftState::new(committed));
        self.state = SessionState::Editing {
            block_id: block_id.to_string(),
        };
        self.focus.request(block_id, CaretPlacement::End);
    }

    /// Closes the menu without choosing, stripping the trigger character the
    /// user typed to open it. With the trigger gone the content no longer
    /// ends with it, so refocusing the unchanged block cannot reopen the
    /// menu; typing the trigger again opens it fresh.
    pub fn dismiss_menu(&mut self, block_id: &str) {
        let Some(content) = self.engine.block(block_id).map(|b| b.content.clone()) else {
            self.state = SessionState::Idle;
            return;
        };

        let stripped = strip_trigger(&content).to_string();
        self.engine
            .update_block(block_id, BlockPatch::content(stripped.clone()));
        self.drafts
            .insert(block_id.to_string(), DraftState::new(stripped));
        self.state = SessionState::Editing {
            block_id: block_id.to_string(),
        };
    }

    fn split_after(&mut self, block_id: &str, parent_block_id: Option<&str>, _now_ms: u64) {
        self.flush_all();
        let page_id = self.page_id.clone();
        match self
            .engine
            .add_block(&page_id, Some(block_id), parent_block_id)
        {
            Ok(block) => {
                self.state = SessionState::Editing {
                    block_id: block.id.clone(),
                };
                self.focus.request(block.id, CaretPlacement::End);
            }
            Err(err) => {
                tracing::warn!(?err, "adding a block failed");
            }
        }
    }

    fn backspace_on(&mut self, block_id: &str, parent_block_id: Option<&str>, _now_ms: u64) -> bool {
        let Some(block) = self.engine.block(block_id) else {
            return false;
        };
        if !block.content.is_empty() {
            return false;
        }

        let scope: Vec<String> = self
            .engine
            .sibling_scope(&self.page_id, parent_block_id)
            .iter()
            .map(|b| b.id.clone())
            .collect();
        let Some(position) = scope.iter().position(|id| id == block_id) else {
            return false;
        };

        if scope.len() <= 1 {
            // Last block in its scope stays; the page never goes blank.
            self.focus.request(block_id, CaretPlacement::Start);
            return true;
        }

        self.flush_all();
        self.drafts.remove(block_id);
        self.engine.delete_block(block_id);
        self.state = SessionState::Idle;
        if position > 0 {
            self.focus
                .request(scope[position - 1].clone(), CaretPlacement::End);
        }
        true
    }

    /// Persists drafts whose flush window has elapsed. Drafts for blocks
    /// that no longer exist are discarded.
    pub fn flush_drafts(&mut self, now_ms: u64) {
        let due: Vec<(String, String)> = self
            .drafts
            .iter()
            .filter(|(_, draft)| draft.flush_due(now_ms, CONTENT_FLUSH_WINDOW_MS))
            .map(|(id, draft)| (id.clone(), draft.draft().to_string()))
            .collect();
        for (block_id, content) in due {
            self.commit_draft(&block_id, &content);
        }
        let engine = &self.engine;
        self.drafts.retain(|id, _| engine.contains_block(id));
    }

    /// Persists every dirty draft regardless of the flush window. Runs
    /// before structural mutations so block creation and deletion never race
    /// a stale content write.
    pub fn flush_all(&mut self) {
        let dirty: Vec<(String, String)> = self
            .drafts
            .iter()
            .filter(|(_, draft)| draft.is_dirty())
            .map(|(id, draft)| (id.clone(), draft.draft().to_string()))
            .collect();
        for (block_id, content) in dirty {
            self.commit_draft(&block_id, &content);
        }
    }

    fn commit_draft(&mut self, block_id: &str, content: &str) {
        self.engine.commit_content(block_id, content);
        if let Some(draft) = self.drafts.get_mut(block_id) {
            draft.mark_flushed();
        }
    }
}
