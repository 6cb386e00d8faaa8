use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    #[default]
    Text,
    Heading,
    Todo,
    Image,
    Toggle,
    Divider,
    Code,
}

impl BlockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Text => "text",
            BlockType::Heading => "heading",
            BlockType::Todo => "todo",
            BlockType::Image => "image",
            BlockType::Toggle => "toggle",
            BlockType::Divider => "divider",
            BlockType::Code => "code",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "text" => Some(BlockType::Text),
            "heading" => Some(BlockType::Heading),
            "todo" => Some(BlockType::Todo),
            "image" => Some(BlockType::Image),
            "toggle" => Some(BlockType::Toggle),
            "divider" => Some(BlockType::Divider),
            "code" => Some(BlockType::Code),
            _ => None,
        }
    }

    /// Whether the block renders an editable text field at all.
    pub fn carries_text(&self) -> bool {
        !matches!(self, BlockType::Divider)
    }
}

pub const DEFAULT_CODE_LANGUAGE: &str = "javascript";

pub const CODE_LANGUAGES: &[&str] = &[
    "javascript",
    "python",
    "typescript",
    "html",
    "css",
    "json",
    "plaintext",
];

/// A single typed content unit within a page. Siblings are ordered by
/// `created_at` ascending; identical timestamps fall back to arrival order
/// in the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    pub page_id: String,
    pub parent_block_id: Option<String>,
    pub block_type: BlockType,
    pub content: String,
    pub checked: bool,
    pub src: Option<String>,
    pub language: Option<String>,
    pub is_expanded: bool,
    pub created_at: i64,
}

impl Block {
    pub fn language_or_default(&self) -> &str {
        self.language.as_deref().unwrap_or(DEFAULT_CODE_LANGUAGE)
    }
}

/// Field-level partial update. Blocks are mutated field-by-field, never
/// replaced wholesale; only `Some` fields are merged.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BlockPatch {
    pub block_type: Option<BlockType>,
    pub content: Option<String>,
    pub checked: Option<bool>,
    pub src: Option<String>,
    pub language: Option<String>,
    pub is_expanded: Option<bool>,
}

impl BlockPatch {
    pub fn content(value: impl Into<String>) -> Self {
        Self {
            content: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn expansion(value: bool) -> Self {
        Self {
            is_expanded: Some(value),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.block_type.is_none()
            && self.content.is_none()
            && self.checked.is_none()
            && self.src.is_none()
            && self.language.is_none()
            && self.is_expanded.is_none()
    }

    pub fn apply(&self, block: &mut Block) {
        if let Some(block_type) = self.block_type {
            block.block_type = block_type;
        }
        if let Some(content) = &self.content {
            block.content = content.clone();
        }
        if let Some(checked) = self.checked {
            block.checked = checked;
        }
        if let Some(src) = &self.src {
            block.src = Some(src.clone());
        }
        if let Some(language) = &self.language {
            block.language = Some(language.clone());
        }
        if let Some(is_expanded) = self.is_expanded {
            block.is_expanded = is_expanded;
        }
    }
}
