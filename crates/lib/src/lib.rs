//! askdoc core library: streaming chat, document queries, file library, and session
//! identity shared by the CLI.

pub mod api;
pub mod composer;
pub mod config;
pub mod conversation;
pub mod files;
pub mod identity;
pub mod init;
pub mod render;
pub mod store;
