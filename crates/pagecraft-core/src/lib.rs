//! Block tree editing engine for a page-based document editor.

pub mod blocks;
pub mod commands;
pub mod engine;
pub mod menu;
pub mod session;
pub mod storage;
pub mod store;
