use crate::blocks::{BlockPatch, BlockType, DEFAULT_CODE_LANGUAGE};

/// Character that opens the block command menu when typed at the end of a
/// block's content.
pub const MENU_TRIGGER: char = '/';

/// One entry in the block command menu.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockCommand {
    pub block_type: BlockType,
    pub label: &'static str,
    pub icon: &'static str,
    pub description: &'static str,
}

/// Fixed menu in display order; selection indices refer to this table.
pub const BLOCK_COMMANDS: &[BlockCommand] = &[
    BlockCommand {
        block_type: BlockType::Text,
        label: "Text",
        icon: "file-text",
        description: "Simple text block",
    },
    BlockCommand {
        block_type: BlockType::Heading,
        label: "Heading",
        icon: "heading-1",
        description: "Large heading text",
    },
    BlockCommand {
        block_type: BlockType::Todo,
        label: "To-do",
        icon: "check-square",
        description: "Checkbox with text",
    },
    BlockCommand {
        block_type: BlockType::Image,
        label: "Image",
        icon: "image",
        description: "Upload and display image",
    },
    BlockCommand {
        block_type: BlockType::Toggle,
        label: "Toggle",
        icon: "chevron-right",
        description: "Collapsible content block",
    },
    BlockCommand {
        block_type: BlockType::Divider,
        label: "Divider",
        icon: "minus",
        description: "Horizontal divider line",
    },
    BlockCommand {
        block_type: BlockType::Code,
        label: "Code",
        icon: "code",
        description: "Code block with syntax",
    },
];

pub fn command_for(block_type: BlockType) -> Option<&'static BlockCommand> {
    BLOCK_COMMANDS.iter().find(|cmd| cmd.block_type == block_type)
}

/// Removes the menu trigger from the end of the content, if present.
pub fn strip_trigger(content: &str) -> &str {
    content.strip_suffix(MENU_TRIGGER).unwrap_or(content)
}

/// Builds the patch that retypes a block via a menu command. The trailing
/// trigger character is stripped from the content; type-specific fields get
/// their initial values.
pub fn retype_patch(command: &BlockCommand, current_content: &str) -> BlockPatch {
    let content = if command.block_type == BlockType::Divider {
        String::new()
    } else {
        strip_trigger(current_content).to_string()
    };

    let mut patch = BlockPatch {
        block_type: Some(command.block_type),
        content: Some(content),
        ..BlockPatch::default()
    };
    match command.block_type {
        BlockType::Todo => patch.checked = Some(false),
        BlockType::Toggle => patch.is_expanded = Some(false),
        BlockType::Code => patch.language = Some(DEFAULT_CODE_LANGUAGE.to_string()),
        _ => {}
    }
    patch
}
