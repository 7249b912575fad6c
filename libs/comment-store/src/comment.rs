use serde::{Deserialize, Serialize};

/// One stored comment. Field order matches the on-disk layout.
///
/// Missing fields in a stored entry decode to their zero value, unknown
/// fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Comment {
    /// Milliseconds since the Unix epoch at submission time.
    pub id: i64,
    pub author: String,
    pub text: String,
}

/// Submitted fields of a comment that has no id yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewComment {
    pub author: String,
    pub text: String,
}

impl NewComment {
    pub fn new(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            text: text.into(),
        }
    }

    pub(crate) fn into_comment(self, id: i64) -> Comment {
        Comment {
            id,
            author: self.author,
            text: self.text,
        }
    }
}
