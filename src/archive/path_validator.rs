//! Path Validator Module - Archive Security
//!
//! 提供统一的归档成员路径验证，防止路径遍历（zip-slip）与符号链接逃逸。
//!
//! 所有检查都是词法检查：成员名在目标目录内规范化，任何越过目标根目录的
//! `..`、绝对路径或驱动器前缀都会被拒绝。

use crate::error::{AppError, Result};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tracing::warn;

/// 将归档成员名规范化为目标目录内的相对路径
///
/// 反斜杠按分隔符处理。返回的路径可能为空（成员即目标根目录本身）。
///
/// # Errors
///
/// `UnsafeArchiveMember`：空名称、绝对路径、驱动器前缀、NUL 字符，
/// 或 `..` 越过根目录。
pub fn normalize_member(member: &str) -> Result<PathBuf> {
    if member.is_empty() {
        return Err(AppError::unsafe_member(member, "empty member name"));
    }
    if member.contains('\0') {
        return Err(AppError::unsafe_member(member, "member name contains NUL"));
    }

    let unified = member.replace('\\', "/");
    if unified.starts_with('/') || has_drive_prefix(&unified) {
        warn!(member = %member, "Absolute path in archive member");
        return Err(AppError::unsafe_member(member, "absolute path"));
    }

    let mut parts: Vec<&str> = Vec::new();
    for component in Path::new(&unified).components() {
        match component {
            Component::Normal(part) => match part.to_str() {
                Some(part) => parts.push(part),
                None => return Err(AppError::unsafe_member(member, "member name is not UTF-8")),
            },
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    warn!(member = %member, "Path traversal detected in archive member");
                    return Err(AppError::unsafe_member(
                        member,
                        "path escapes the extraction directory",
                    ));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(AppError::unsafe_member(member, "absolute path"));
            }
        }
    }

    Ok(parts.iter().collect())
}

/// 验证链接目标
///
/// `target` 相对于 `relative_to`（目标根目录内的目录）解析，结果必须仍在根目录内。
/// 解析过程中经过 `symlinks` 中任一成员（其后还有组件）即拒绝：经过符号链接后的
/// `..` 无法按词法解析。返回解析后的相对路径。
pub fn resolve_link_target(
    member: &str,
    relative_to: &Path,
    target: &str,
    symlinks: &HashSet<PathBuf>,
) -> Result<PathBuf> {
    if target.is_empty() {
        return Err(AppError::unsafe_member(member, "empty link target"));
    }
    let unified = target.replace('\\', "/");
    if unified.starts_with('/') || has_drive_prefix(&unified) {
        warn!(member = %member, target = %target, "Absolute link target in archive member");
        return Err(AppError::unsafe_member(
            member,
            format!("link to absolute path '{}'", target),
        ));
    }

    let mut resolved: PathBuf = relative_to
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect();

    let components: Vec<Component> = Path::new(&unified).components().collect();
    for (index, component) in components.iter().enumerate() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                let followed = index + 1 < components.len();
                if followed && symlinks.contains(&resolved) {
                    warn!(member = %member, target = %target, "Link target passes through a symlink");
                    return Err(AppError::unsafe_member(
                        member,
                        format!(
                            "link to '{}' passes through symbolic link '{}'",
                            target,
                            resolved.display()
                        ),
                    ));
                }
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    warn!(member = %member, target = %target, "Link escapes extraction directory");
                    return Err(AppError::unsafe_member(
                        member,
                        format!("link to '{}' escapes the extraction directory", target),
                    ));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(AppError::unsafe_member(
                    member,
                    format!("link to absolute path '{}'", target),
                ));
            }
        }
    }

    Ok(resolved)
}

/// 检查路径是否经过已声明的符号链接成员
///
/// 只检查严格的祖先目录；路径本身就是符号链接不算经过。
pub fn traverses_symlink(path: &Path, symlinks: &HashSet<PathBuf>) -> Option<PathBuf> {
    let mut prefix = PathBuf::new();
    let mut components = path.components().peekable();
    while let Some(component) = components.next() {
        if components.peek().is_none() {
            break;
        }
        prefix.push(component);
        if symlinks.contains(&prefix) {
            return Some(prefix);
        }
    }
    None
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_normalize_safe_members() {
        assert_eq!(normalize_member("a.txt").unwrap(), PathBuf::from("a.txt"));
        assert_eq!(normalize_member("./dir/b.txt").unwrap(), PathBuf::from("dir/b.txt"));
        assert_eq!(normalize_member("dir/../c.txt").unwrap(), PathBuf::from("c.txt"));
        assert_eq!(normalize_member("dir/").unwrap(), PathBuf::from("dir"));
        assert_eq!(normalize_member("dir\\win.txt").unwrap(), PathBuf::from("dir/win.txt"));
        assert_eq!(normalize_member("./").unwrap(), PathBuf::new());
    }

    #[test]
    fn test_normalize_rejects_traversal() {
        for member in [
            "../evil",
            "../../evil",
            "dir/../../evil",
            "/etc/passwd",
            "\\windows\\system32",
            "C:\\evil.txt",
            "c:evil",
            "",
            "nul\0byte",
        ] {
            let err = normalize_member(member).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::UnsafeArchiveMember, "accepted {:?}", member);
        }
    }

    #[test]
    fn test_link_target_relative_to_link_directory() {
        let none = HashSet::new();
        // dir/link -> ../a.txt resolves to a.txt
        assert_eq!(
            resolve_link_target("dir/link", Path::new("dir"), "../a.txt", &none).unwrap(),
            PathBuf::from("a.txt")
        );
        // link -> ../a.txt from the root escapes
        assert!(resolve_link_target("link", Path::new(""), "../a.txt", &none).is_err());
        assert!(resolve_link_target("dir/link", Path::new("dir"), "../../x", &none).is_err());
        assert!(resolve_link_target("link", Path::new(""), "/etc/passwd", &none).is_err());
        assert!(resolve_link_target("link", Path::new(""), "", &none).is_err());
    }

    #[test]
    fn test_link_target_through_symlink_rejected() {
        let mut symlinks = HashSet::new();
        symlinks.insert(PathBuf::from("a/link"));

        // a/link -> .. makes a/link/.. the parent of the root on disk
        let err = resolve_link_target("esc", Path::new(""), "a/link/..", &symlinks).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsafeArchiveMember);
        assert!(resolve_link_target("esc", Path::new(""), "a/link/x", &symlinks).is_err());
        assert!(resolve_link_target("esc", Path::new("a"), "link/..", &symlinks).is_err());

        // naming the symlink itself is fine
        assert_eq!(
            resolve_link_target("alias", Path::new(""), "a/link", &symlinks).unwrap(),
            PathBuf::from("a/link")
        );
    }

    #[test]
    fn test_traverses_symlink() {
        let mut symlinks = HashSet::new();
        symlinks.insert(PathBuf::from("escape"));

        assert_eq!(
            traverses_symlink(Path::new("escape/passwd"), &symlinks),
            Some(PathBuf::from("escape"))
        );
        assert_eq!(traverses_symlink(Path::new("escape"), &symlinks), None);
        assert_eq!(traverses_symlink(Path::new("other/file"), &symlinks), None);
    }
}
