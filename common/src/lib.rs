#![allow(clippy::missing_docs_in_private_items)]

pub mod error;
pub mod llm;
pub mod observability;
pub mod storage;
pub mod utils;
pub mod vector;
