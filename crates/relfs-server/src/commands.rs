//! One function per subcommand. Each resolves its path through the VFS
//! operations and writes plain text to `out`.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

use relfs_kernel::{FileType, RelationalFs, VfsOps};

fn display_name(name: &str, kind: FileType) -> String {
    match kind {
        FileType::Directory => format!("{name}/"),
        FileType::File => name.to_string(),
    }
}

pub async fn ls(fs: &RelationalFs, path: &Path, out: &mut impl Write) -> Result<()> {
    let entries = fs
        .readdir(path)
        .await
        .with_context(|| format!("ls {}", path.display()))?;
    for entry in entries.iter().filter(|e| !e.is_relative()) {
        writeln!(out, "{}", display_name(&entry.name, entry.kind))?;
    }
    Ok(())
}

pub async fn stat(fs: &RelationalFs, path: &Path, out: &mut impl Write) -> Result<()> {
    let attr = fs
        .getattr(path)
        .await
        .with_context(|| format!("stat {}", path.display()))?;
    let kind = if attr.is_dir() { "directory" } else { "file" };
    writeln!(out, "  path: {}", path.display())?;
    writeln!(out, "  type: {kind}")?;
    writeln!(out, "  size: {}", attr.size)?;
    writeln!(out, "  mode: {:o}", attr.perm)?;
    writeln!(out, " links: {}", attr.nlink)?;
    writeln!(out, " owner: {}:{}", attr.uid, attr.gid)?;
    Ok(())
}

pub async fn cat(fs: &RelationalFs, path: &Path, out: &mut impl Write) -> Result<()> {
    let content = fs
        .read_all(path)
        .await
        .with_context(|| format!("cat {}", path.display()))?;
    out.write_all(&content)?;
    out.flush()?;
    Ok(())
}

pub async fn write(fs: &RelationalFs, path: &Path, data: &[u8]) -> Result<()> {
    fs.write_all(path, data)
        .await
        .with_context(|| format!("write {}", path.display()))?;
    tracing::info!(path = %path.display(), bytes = data.len(), "committed");
    Ok(())
}

/// Depth-first listing, children indented under their parent. Stops
/// descending at `depth`; fields are leaves.
pub async fn tree(
    fs: &RelationalFs,
    path: &Path,
    depth: usize,
    out: &mut impl Write,
) -> Result<()> {
    writeln!(out, "{}", path.display())?;
    if depth == 0 {
        return Ok(());
    }

    let mut stack: Vec<(PathBuf, String, FileType, usize)> = Vec::new();
    push_children(fs, path, 1, &mut stack).await?;

    while let Some((child, name, kind, level)) = stack.pop() {
        writeln!(out, "{}{}", "  ".repeat(level), display_name(&name, kind))?;
        if kind.is_dir() && level < depth {
            push_children(fs, &child, level + 1, &mut stack).await?;
        }
    }
    Ok(())
}

async fn push_children(
    fs: &RelationalFs,
    dir: &Path,
    level: usize,
    stack: &mut Vec<(PathBuf, String, FileType, usize)>,
) -> Result<()> {
    let entries = fs
        .readdir(dir)
        .await
        .with_context(|| format!("tree {}", dir.display()))?;
    // Reversed so entries pop in listing order.
    for entry in entries.into_iter().rev().filter(|e| !e.is_relative()) {
        stack.push((dir.join(&entry.name), entry.name, entry.kind, level));
    }
    Ok(())
}
