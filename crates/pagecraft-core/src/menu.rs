//! Command menu placement.
//!
//! The menu anchors to the caret, not the block: x advances by the measured
//! width of the text before the caret on its line, and y drops below the
//! line the caret sits on.

/// Bounding box of the focused text field, in the same coordinate space the
/// menu will be positioned in.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnchorRect {
    pub left: f32,
    pub top: f32,
    pub height: f32,
}

/// Everything needed to place the menu for one field.
#[derive(Clone, Debug)]
pub struct AnchorInput<'a> {
    pub rect: AnchorRect,
    pub value: &'a str,
    /// Caret offset in bytes into `value`; clamped to a char boundary.
    pub caret: usize,
    pub line_height: f32,
    pub multiline: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MenuPoint {
    pub x: f32,
    pub y: f32,
}

/// Text width oracle supplied by the UI layer, backed by its real font
/// metrics.
pub trait TextMeasure {
    fn width(&self, text: &str) -> f32;
}

fn clamp_to_char_boundary(value: &str, mut caret: usize) -> usize {
    if caret > value.len() {
        return value.len();
    }
    while caret > 0 && !value.is_char_boundary(caret) {
        caret -= 1;
    }
    caret
}

/// Computes where the top-left corner of the menu goes for a caret position.
///
/// Single-line fields place the menu directly under the field, advanced by
/// the width of the text before the caret. Multiline fields also advance
/// down by one line height per newline before the caret.
pub fn menu_position(anchor: &AnchorInput<'_>, measure: &dyn TextMeasure) -> MenuPoint {
    let caret = clamp_to_char_boundary(anchor.value, anchor.caret);
    let before_caret = &anchor.value[..caret];

    if !anchor.multiline {
        return MenuPoint {
            x: anchor.rect.left + measure.width(before_caret),
            y: anchor.rect.top + anchor.rect.height,
        };
    }

    let line_ix = before_caret.matches('\n').count();
    let current_line = before_caret
        .rsplit('\n')
        .next()
        .unwrap_or(before_caret);
    MenuPoint {
        x: anchor.rect.left + measure.width(current_line),
        y: anchor.rect.top + line_ix as f32 * anchor.line_height + anchor.rect.height,
    }
}
