use std::fs::Permissions;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::comment::{Comment, NewComment};
use crate::error::StoreError;

/// Initial content of a freshly created data file.
const EMPTY_COLLECTION: &[u8] = b"[]";

// ════════════════════════════════════════════════════════════════
//  CommentStore
// ════════════════════════════════════════════════════════════════

/// JSON-file backed comment collection.
///
/// All operations go through one exclusive lock, so at most one of them
/// touches the data file at any time. Waiters are served in lock acquisition
/// order.
pub struct CommentStore {
    path: PathBuf,
    file: Mutex<DataFile>,
}

impl CommentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            file: Mutex::new(DataFile { path: path.clone() }),
            path,
        }
    }

    /// Path of the backing data file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the data file (and its parent directories) if it is missing.
    pub async fn ensure_initialized(&self) -> Result<(), StoreError> {
        let file = self.file.lock().await;
        file.ensure_initialized().await.map(|_| ())
    }

    /// Raw content of the data file, exactly as stored.
    ///
    /// The bytes are not decoded, so a malformed file is returned as-is.
    pub async fn list(&self) -> Result<Vec<u8>, StoreError> {
        let file = self.file.lock().await;
        file.ensure_initialized().await?;
        file.read().await
    }

    /// Append a comment and return the encoded, updated collection.
    pub async fn append(&self, new: NewComment) -> Result<Vec<u8>, StoreError> {
        let file = self.file.lock().await;
        let permissions = file.ensure_initialized().await?;
        let raw = file.read().await?;

        let mut comments = file.decode(&raw)?;
        let comment = new.into_comment(next_id(&comments));
        tracing::debug!(id = comment.id, author = %comment.author, "appending comment");
        comments.push(comment);

        let encoded = encode(&comments)?;
        file.write(&encoded, permissions).await?;
        Ok(encoded)
    }
}

// ════════════════════════════════════════════════════════════════
//  DataFile (only reachable through the lock)
// ════════════════════════════════════════════════════════════════

struct DataFile {
    path: PathBuf,
}

impl DataFile {
    /// Permissions of the data file, creating it with `[]` first if absent.
    async fn ensure_initialized(&self) -> Result<Permissions, StoreError> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => Ok(meta.permissions()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => self.create().await,
            Err(source) => Err(StoreError::Stat {
                path: self.path.clone(),
                source,
            }),
        }
    }

    async fn create(&self) -> Result<Permissions, StoreError> {
        if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            let mut builder = tokio::fs::DirBuilder::new();
            builder.recursive(true);
            #[cfg(unix)]
            builder.mode(0o777);
            builder.create(dir).await.map_err(|source| StoreError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o644);
        let mut f = options.open(&self.path).await.map_err(write_err)?;
        f.write_all(EMPTY_COLLECTION).await.map_err(write_err)?;
        f.flush().await.map_err(write_err)?;
        drop(f);

        tracing::info!(path = %self.path.display(), "created empty data file");

        let meta = tokio::fs::metadata(&self.path)
            .await
            .map_err(|source| StoreError::Stat {
                path: self.path.clone(),
                source,
            })?;
        Ok(meta.permissions())
    }

    async fn read(&self) -> Result<Vec<u8>, StoreError> {
        tokio::fs::read(&self.path)
            .await
            .map_err(|source| StoreError::Read {
                path: self.path.clone(),
                source,
            })
    }

    fn decode(&self, raw: &[u8]) -> Result<Vec<Comment>, StoreError> {
        // A literal `null` counts as an empty collection.
        serde_json::from_slice::<Option<Vec<Comment>>>(raw)
            .map(Option::unwrap_or_default)
            .map_err(|source| StoreError::Decode {
                path: self.path.clone(),
                source,
            })
    }

    /// Replace the content of the data file with `data`, keeping `permissions`.
    ///
    /// Symlinks are resolved first so the file they point to is the one
    /// rewritten. The new content goes to a sibling temp file that is renamed
    /// over the target; when the target cannot be renamed over (a bind-mounted
    /// file, another filesystem) it is truncated and rewritten in place.
    async fn write(&self, data: &[u8], permissions: Permissions) -> Result<(), StoreError> {
        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        let target = tokio::fs::canonicalize(&self.path).await.map_err(write_err)?;
        let tmp = tmp_path(&target);

        match replace_via_rename(&tmp, &target, data, permissions).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                if !needs_in_place_overwrite(&e) {
                    return Err(write_err(e));
                }
                tracing::debug!(
                    path = %target.display(),
                    error = %e,
                    "rename over data file refused, overwriting in place"
                );
                overwrite_in_place(&target, data).await.map_err(write_err)
            }
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Helpers
// ════════════════════════════════════════════════════════════════

async fn replace_via_rename(
    tmp: &Path,
    target: &Path,
    data: &[u8],
    permissions: Permissions,
) -> std::io::Result<()> {
    tokio::fs::write(tmp, data).await?;
    tokio::fs::set_permissions(tmp, permissions).await?;
    tokio::fs::rename(tmp, target).await
}

/// Truncate-and-write; the file keeps its inode, owner and permissions.
async fn overwrite_in_place(target: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut f = tokio::fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(target)
        .await?;
    f.write_all(data).await?;
    f.flush().await
}

/// Rename failures that only mean the target can't be swapped out.
fn needs_in_place_overwrite(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ResourceBusy | std::io::ErrorKind::CrossesDevices
    )
}

fn tmp_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    target.with_file_name(name)
}

/// Pretty JSON with 4-space indentation.
fn encode(comments: &[Comment]) -> Result<Vec<u8>, StoreError> {
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    comments.serialize(&mut ser).map_err(StoreError::Encode)?;
    Ok(buf)
}

/// Wall-clock milliseconds, never lower than the last stored id.
fn next_id(comments: &[Comment]) -> i64 {
    let now = now_ms();
    comments.last().map_or(now, |last| now.max(last.id))
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> CommentStore {
        CommentStore::new(dir.path().join("data").join("comments.json"))
    }

    fn decode(raw: &[u8]) -> Vec<Comment> {
        serde_json::from_slice(raw).unwrap()
    }

    #[tokio::test]
    async fn list_creates_missing_file_with_parents() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(!store.path().exists());

        let raw = store.list().await.unwrap();

        assert_eq!(raw, b"[]");
        assert_eq!(std::fs::read(store.path()).unwrap(), b"[]");
    }

    #[tokio::test]
    async fn ensure_initialized_keeps_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("comments.json");
        std::fs::write(&path, r#"[{"id":1,"author":"a","text":"b"}]"#).unwrap();
        let store = CommentStore::new(&path);

        store.ensure_initialized().await.unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            r#"[{"id":1,"author":"a","text":"b"}]"#
        );
    }

    #[tokio::test]
    async fn append_to_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let raw = store.append(NewComment::new("Alice", "Hello")).await.unwrap();
        let comments = decode(&raw);

        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].author, "Alice");
        assert_eq!(comments[0].text, "Hello");
        assert!(comments[0].id > 0);
    }

    #[tokio::test]
    async fn appends_keep_submission_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        for i in 0..5 {
            store
                .append(NewComment::new(format!("user{i}"), format!("text{i}")))
                .await
                .unwrap();
        }

        let comments = decode(&store.list().await.unwrap());
        let authors: Vec<_> = comments.iter().map(|c| c.author.as_str()).collect();
        assert_eq!(authors, ["user0", "user1", "user2", "user3", "user4"]);
        assert!(comments.windows(2).all(|w| w[0].id <= w[1].id));
    }

    #[tokio::test]
    async fn id_never_goes_below_last_stored_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("comments.json");
        let future_id = i64::MAX - 1;
        let stored = format!(r#"[{{"id":{future_id},"author":"a","text":"b"}}]"#);
        std::fs::write(&path, stored).unwrap();
        let store = CommentStore::new(&path);

        let comments = decode(&store.append(NewComment::default()).await.unwrap());

        assert_eq!(comments[1].id, future_id);
    }

    #[tokio::test]
    async fn missing_fields_default_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let comments = decode(&store.append(NewComment::default()).await.unwrap());

        assert_eq!(comments[0].author, "");
        assert_eq!(comments[0].text, "");
    }

    #[tokio::test]
    async fn writes_four_space_pretty_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.append(NewComment::new("Alice", "Hello")).await.unwrap();

        let on_disk = std::fs::read_to_string(store.path()).unwrap();
        assert!(on_disk.starts_with("[\n    {\n        \"id\": "), "{on_disk}");
        assert!(on_disk.contains("\n        \"author\": \"Alice\",\n"));
        assert!(on_disk.ends_with("\n    }\n]"));
    }

    #[tokio::test]
    async fn malformed_file_fails_append_but_lists_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("comments.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = CommentStore::new(&path);

        let err = store.append(NewComment::new("a", "b")).await.unwrap_err();
        assert!(matches!(err, StoreError::Decode { .. }), "{err}");

        assert_eq!(store.list().await.unwrap(), b"{not json");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{not json");
    }

    #[tokio::test]
    async fn append_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("comments.json");
        let store = CommentStore::new(&path);

        store.append(NewComment::new("a", "b")).await.unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, ["comments.json"]);
    }

    #[tokio::test]
    async fn concurrent_appends_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(store_in(&dir));

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store.append(NewComment::new(format!("u{i}"), "t")).await
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let comments = decode(&store.list().await.unwrap());
        assert_eq!(comments.len(), 20);
        assert!(comments.windows(2).all(|w| w[0].id <= w[1].id));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn new_file_mode_is_at_most_0644() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.ensure_initialized().await.unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777 & !0o644, 0, "mode {mode:o}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rewrite_preserves_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("comments.json");
        std::fs::write(&path, "[]").unwrap();
        std::fs::set_permissions(&path, Permissions::from_mode(0o600)).unwrap();
        let store = CommentStore::new(&path);

        store.append(NewComment::new("a", "b")).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn append_through_symlink_updates_link_target() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real.json");
        let link = dir.path().join("link.json");
        std::fs::write(&real, "[]").unwrap();
        std::os::unix::fs::symlink(&real, &link).unwrap();
        let store = CommentStore::new(&link);

        store.append(NewComment::new("Alice", "Hello")).await.unwrap();

        let link_meta = std::fs::symlink_metadata(&link).unwrap();
        assert!(link_meta.file_type().is_symlink());
        let stored = decode(&std::fs::read(&real).unwrap());
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].author, "Alice");
        assert!(!dir.path().join("real.json.tmp").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn in_place_overwrite_keeps_inode_and_mode() {
        use std::os::unix::fs::{MetadataExt, PermissionsExt};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("comments.json");
        std::fs::write(&path, "[\"a much longer previous content\"]").unwrap();
        std::fs::set_permissions(&path, Permissions::from_mode(0o640)).unwrap();
        let before = std::fs::metadata(&path).unwrap();

        overwrite_in_place(&path, b"[]").await.unwrap();

        let after = std::fs::metadata(&path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"[]");
        assert_eq!(after.ino(), before.ino());
        assert_eq!(after.permissions().mode() & 0o777, 0o640);
    }

    #[test]
    fn busy_or_cross_device_rename_falls_back_to_in_place() {
        use std::io::{Error, ErrorKind};

        assert!(needs_in_place_overwrite(&Error::from(ErrorKind::ResourceBusy)));
        assert!(needs_in_place_overwrite(&Error::from(ErrorKind::CrossesDevices)));
        assert!(!needs_in_place_overwrite(&Error::from(ErrorKind::PermissionDenied)));
    }

    #[test]
    fn tmp_path_is_a_sibling() {
        let target = Path::new("/var/data/comments.json");
        assert_eq!(tmp_path(target), PathBuf::from("/var/data/comments.json.tmp"));
    }
}
