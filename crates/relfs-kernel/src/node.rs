//! The node hierarchy: root → schema → relation → row → field.
//!
//! A [`Node`] is plain data: the names needed to query its children. Every
//! operation asks the catalog again; a node built a moment ago may already
//! be stale, and the operation then answers from the current catalog state.
//!
//! Each `lookup` checks existence at the current level before it builds the
//! child, so no level can be skipped. A failed check is `NotFound`, never an
//! outage.

use std::fmt;

use crate::buffer::{FieldKey, WriteMode};
use crate::catalog::RowAddress;
use crate::fs::RelationalFs;
use crate::pool::BackendError;
use crate::vfs::{DirEntry, FileAttr, FileType, VfsError, VfsResult};

/// One position in the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Root,
    Schema(SchemaNode),
    Relation(RelationNode),
    Row(RowNode),
    Field(FieldNode),
}

/// An attached database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaNode {
    pub schema: String,
}

/// A table with a single-column primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationNode {
    pub schema: String,
    pub relation: String,
    pub pk_column: String,
}

/// A row, named by its primary-key value as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowNode {
    pub relation: RelationNode,
    pub pk_value: String,
}

/// One cell of a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldNode {
    pub row: RowNode,
    pub column: String,
}

impl RowNode {
    pub fn address(&self) -> RowAddress<'_> {
        RowAddress {
            schema: &self.relation.schema,
            relation: &self.relation.relation,
            pk_column: &self.relation.pk_column,
            pk_value: &self.pk_value,
        }
    }
}

impl FieldNode {
    /// Write-buffer key shared by every handle on this field.
    pub fn key(&self) -> FieldKey {
        FieldKey::new(
            &self.row.relation.schema,
            &self.row.relation.relation,
            &self.row.pk_value,
            &self.column,
        )
    }
}

/// A name that could be a child of some node.
///
/// `/` and NUL cannot appear in a path component, and `.`/`..` are the
/// relative entries, so names like these are never listed or resolved.
pub fn is_valid_segment(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\0'])
}

/// Map a catalog failure to the filesystem surface. A statement that
/// referenced an object dropped since the caller resolved it means the node
/// is gone.
fn backend_error(err: BackendError, path: &str) -> VfsError {
    if err.is_missing_object() {
        tracing::debug!(path, error = %err, "object vanished");
        return VfsError::not_found(path);
    }
    tracing::warn!(path, error = %err, "catalog query failed");
    err.into()
}

fn directory_listing(names: Vec<String>, entry: fn(String) -> DirEntry) -> Vec<DirEntry> {
    let mut entries: Vec<DirEntry> = names
        .into_iter()
        .filter(|name| is_valid_segment(name))
        .map(entry)
        .collect();
    entries.extend(DirEntry::relative_pair());
    entries
}

impl Node {
    /// Directory or file.
    pub fn kind(&self) -> FileType {
        match self {
            Node::Field(_) => FileType::File,
            _ => FileType::Directory,
        }
    }

    /// Path of this node from the root, starting with `/`.
    pub fn path(&self) -> String {
        self.to_string()
    }

    fn child_path(&self, name: &str) -> String {
        match self {
            Node::Root => format!("/{name}"),
            other => format!("{other}/{name}"),
        }
    }

    // ========================================================================
    // Directory operations
    // ========================================================================

    /// Attributes. Directories are synthetic and never touch the database.
    pub async fn attr(&self, fs: &RelationalFs) -> VfsResult<FileAttr> {
        match self {
            Node::Field(field) => field.attr(fs).await,
            _ => Ok(FileAttr::directory(fs.settings().dir_mode, fs.owner())),
        }
    }

    /// Resolve `name` as a child of this node.
    pub async fn lookup(&self, fs: &RelationalFs, name: &str) -> VfsResult<Node> {
        let path = self.child_path(name);
        if !is_valid_segment(name) {
            return Err(VfsError::not_found(path));
        }
        let catalog = fs.catalog();

        let found = match self {
            Node::Root => {
                if fs.settings().is_hidden(name) {
                    None
                } else if catalog
                    .schema_exists(name)
                    .await
                    .map_err(|e| backend_error(e, &path))?
                {
                    Some(Node::Schema(SchemaNode {
                        schema: name.to_string(),
                    }))
                } else {
                    None
                }
            }
            Node::Schema(schema) => catalog
                .relation_primary_key(&schema.schema, name)
                .await
                .map_err(|e| backend_error(e, &path))?
                .map(|pk_column| {
                    Node::Relation(RelationNode {
                        schema: schema.schema.clone(),
                        relation: name.to_string(),
                        pk_column,
                    })
                }),
            Node::Relation(relation) => {
                let row = RowNode {
                    relation: relation.clone(),
                    pk_value: name.to_string(),
                };
                let exists = catalog
                    .row_exists(&row.address())
                    .await
                    .map_err(|e| backend_error(e, &path))?;
                exists.then_some(Node::Row(row))
            }
            Node::Row(row) => {
                let relation = &row.relation;
                let column_exists = catalog
                    .column_exists(&relation.schema, &relation.relation, name)
                    .await
                    .map_err(|e| backend_error(e, &path))?;
                let row_exists = column_exists
                    && catalog
                        .row_exists(&row.address())
                        .await
                        .map_err(|e| backend_error(e, &path))?;
                row_exists.then(|| {
                    Node::Field(FieldNode {
                        row: row.clone(),
                        column: name.to_string(),
                    })
                })
            }
            Node::Field(_) => return Err(VfsError::not_a_directory(self.path())),
        };

        tracing::debug!(path, found = found.is_some(), "lookup");
        found.ok_or_else(|| VfsError::not_found(path))
    }

    /// List children. Every directory includes `.` and `..`.
    pub async fn read_dir_all(&self, fs: &RelationalFs) -> VfsResult<Vec<DirEntry>> {
        let path = self.path();
        let catalog = fs.catalog();

        match self {
            Node::Root => {
                let schemas = catalog
                    .list_schemas()
                    .await
                    .map_err(|e| backend_error(e, &path))?
                    .into_iter()
                    .filter(|schema| !fs.settings().is_hidden(schema))
                    .collect();
                Ok(directory_listing(schemas, DirEntry::directory))
            }
            Node::Schema(schema) => {
                let relations = catalog
                    .list_navigable_relations(&schema.schema)
                    .await
                    .map_err(|e| backend_error(e, &path))?;
                Ok(directory_listing(relations, DirEntry::directory))
            }
            Node::Relation(relation) => {
                let keys = catalog
                    .list_row_keys(&relation.schema, &relation.relation, &relation.pk_column)
                    .await
                    .map_err(|e| backend_error(e, &path))?;
                Ok(directory_listing(keys, DirEntry::directory))
            }
            Node::Row(row) => {
                let columns = catalog
                    .list_columns(&row.relation.schema, &row.relation.relation)
                    .await
                    .map_err(|e| backend_error(e, &path))?;
                Ok(directory_listing(columns, DirEntry::file))
            }
            Node::Field(_) => Err(VfsError::not_a_directory(path)),
        }
    }

    // ========================================================================
    // File operations
    // ========================================================================

    fn as_field(&self) -> VfsResult<&FieldNode> {
        match self {
            Node::Field(field) => Ok(field),
            _ => Err(VfsError::is_a_directory(self.path())),
        }
    }

    pub async fn read_all(&self, fs: &RelationalFs) -> VfsResult<Vec<u8>> {
        self.as_field()?.read_all(fs).await
    }

    pub async fn write(&self, fs: &RelationalFs, offset: u64, data: &[u8]) -> VfsResult<u32> {
        self.as_field()?.write(fs, offset, data).await
    }

    pub async fn truncate(&self, fs: &RelationalFs, size: u64) -> VfsResult<()> {
        self.as_field()?.truncate(fs, size).await
    }

    pub async fn flush(&self, fs: &RelationalFs) -> VfsResult<()> {
        self.as_field()?.commit(fs).await
    }

    pub async fn fsync(&self, fs: &RelationalFs) -> VfsResult<()> {
        self.as_field()?.commit(fs).await
    }

    /// Drop the field's pending buffer. True if anything was pending.
    pub async fn discard(&self, fs: &RelationalFs) -> VfsResult<bool> {
        let field = self.as_field()?;
        Ok(fs.buffers().discard(&field.key()).await)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Root => f.write_str("/"),
            Node::Schema(s) => write!(f, "/{}", s.schema),
            Node::Relation(r) => write!(f, "/{}/{}", r.schema, r.relation),
            Node::Row(row) => write!(
                f,
                "/{}/{}/{}",
                row.relation.schema, row.relation.relation, row.pk_value
            ),
            Node::Field(field) => write!(
                f,
                "/{}/{}/{}/{}",
                field.row.relation.schema,
                field.row.relation.relation,
                field.row.pk_value,
                field.column
            ),
        }
    }
}

// ============================================================================
// Field access
// ============================================================================

impl FieldNode {
    fn path(&self) -> String {
        Node::Field(self.clone()).path()
    }

    /// Size is the pending buffer's length when there is one, so a tool that
    /// stats after writing sees its own write.
    async fn attr(&self, fs: &RelationalFs) -> VfsResult<FileAttr> {
        let settings = fs.settings();
        let perm = if settings.read_only {
            settings.file_mode & !0o222
        } else {
            settings.file_mode
        };

        let size = match fs.buffers().pending_len(&self.key()).await {
            Some(len) => len,
            None => fs
                .catalog()
                .cell_length(&self.row.address(), &self.column)
                .await
                .map_err(|e| backend_error(e, &self.path()))?,
        };
        Ok(FileAttr::file(size, perm, fs.owner()))
    }

    async fn stored_content(&self, fs: &RelationalFs) -> VfsResult<Vec<u8>> {
        let path = self.path();
        fs.catalog()
            .cell_content(&self.row.address(), &self.column)
            .await
            .map_err(|e| backend_error(e, &path))?
            .ok_or_else(|| VfsError::not_found(path))
    }

    async fn read_all(&self, fs: &RelationalFs) -> VfsResult<Vec<u8>> {
        match fs.buffers().snapshot(&self.key()).await {
            Some(pending) => Ok(pending),
            None => self.stored_content(fs).await,
        }
    }

    fn check_writable(&self, fs: &RelationalFs) -> VfsResult<()> {
        if fs.settings().read_only {
            return Err(VfsError::permission_denied(format!(
                "{}: filesystem is read-only",
                self.path()
            )));
        }
        Ok(())
    }

    async fn write(&self, fs: &RelationalFs, offset: u64, data: &[u8]) -> VfsResult<u32> {
        self.check_writable(fs)?;
        let len = u32::try_from(data.len())
            .map_err(|_| VfsError::FileTooLarge(format!("{}: write too large", self.path())))?;

        let key = self.key();
        let accepted = match fs.settings().write_mode {
            WriteMode::Append => fs.buffers().append(&key, data).await?,
            WriteMode::Positional => {
                fs.buffers()
                    .write_at(&key, offset, data, self.stored_content(fs))
                    .await?
            }
        };
        tracing::trace!(field = %key, offset, accepted, "buffered write");
        Ok(len)
    }

    async fn truncate(&self, fs: &RelationalFs, size: u64) -> VfsResult<()> {
        self.check_writable(fs)?;
        fs.buffers()
            .truncate(&self.key(), size, self.stored_content(fs))
            .await
    }

    /// Commit the pending buffer with one UPDATE. No pending buffer, no
    /// statement. On failure the buffer is kept for a retry.
    async fn commit(&self, fs: &RelationalFs) -> VfsResult<()> {
        let key = self.key();
        let path = self.path();

        let committed = fs
            .buffers()
            .commit(&key, |data| async move {
                let text = String::from_utf8(data)
                    .map_err(|e| VfsError::InvalidData(format!("{path}: not UTF-8 text: {e}")))?;
                let changed = fs
                    .catalog()
                    .update_cell(&self.row.address(), &self.column, &text)
                    .await
                    .map_err(|e| {
                        if e.is_missing_object() {
                            VfsError::commit_conflict(format!("{path}: {e}"))
                        } else {
                            backend_error(e, &path)
                        }
                    })?;
                if changed == 0 {
                    tracing::warn!(path, "commit matched no row");
                    return Err(VfsError::commit_conflict(format!("{path}: row no longer exists")));
                }
                Ok(())
            })
            .await?;

        if committed {
            tracing::info!(field = %key, "committed pending write");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relation() -> RelationNode {
        RelationNode {
            schema: "bundle".into(),
            relation: "commit".into(),
            pk_column: "id".into(),
        }
    }

    fn field() -> FieldNode {
        FieldNode {
            row: RowNode {
                relation: relation(),
                pk_value: "42".into(),
            },
            column: "message".into(),
        }
    }

    #[test]
    fn test_valid_segments() {
        assert!(is_valid_segment("bundle"));
        assert!(is_valid_segment("with space"));
        assert!(is_valid_segment("...")); // only . and .. are special
        assert!(!is_valid_segment(""));
        assert!(!is_valid_segment("."));
        assert!(!is_valid_segment(".."));
        assert!(!is_valid_segment("a/b"));
        assert!(!is_valid_segment("a\0b"));
    }

    #[test]
    fn test_paths() {
        assert_eq!(Node::Root.path(), "/");
        assert_eq!(
            Node::Schema(SchemaNode { schema: "bundle".into() }).path(),
            "/bundle"
        );
        assert_eq!(Node::Relation(relation()).path(), "/bundle/commit");
        assert_eq!(Node::Field(field()).path(), "/bundle/commit/42/message");
        assert_eq!(Node::Root.child_path("main"), "/main");
        assert_eq!(Node::Relation(relation()).child_path("7"), "/bundle/commit/7");
    }

    #[test]
    fn test_kinds_and_keys() {
        assert!(Node::Root.kind().is_dir());
        assert!(Node::Relation(relation()).kind().is_dir());
        assert!(Node::Field(field()).kind().is_file());
        assert_eq!(field().key().as_str(), "bundle/commit/42/message");
    }

    #[test]
    fn test_row_address() {
        let row = field().row;
        let address = row.address();
        assert_eq!(address.schema, "bundle");
        assert_eq!(address.relation, "commit");
        assert_eq!(address.pk_column, "id");
        assert_eq!(address.pk_value, "42");
    }

    #[test]
    fn test_listing_filters_unreachable_names() {
        let entries = directory_listing(
            vec!["ok".into(), "a/b".into(), ".".into(), "".into()],
            DirEntry::directory,
        );
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["ok", ".", ".."]);
    }
}
