//! Comment collection persisted as a single JSON array file.

pub mod comment;
pub mod error;
mod store;

pub use comment::{Comment, NewComment};
pub use error::StoreError;
pub use store::CommentStore;
