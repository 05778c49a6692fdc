//! 路径处理工具函数
//!
//! 文件名清理、相对路径计算、链接计数与符号链接创建。

use crate::error::{AppError, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};
use unicode_normalization::UnicodeNormalization;

/// Windows 保留设备名
const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// 清理文件名，使其可以安全地用作单个路径组件
///
/// 处理步骤：
/// 1. NFKD 规范化后丢弃非 ASCII 字符
/// 2. 路径分隔符与空白替换为 `_`
/// 3. 移除 `[A-Za-z0-9_.-]` 以外的字符
/// 4. 去除首尾的 `.` 与 `_`
/// 5. Windows 保留设备名加 `_` 前缀
///
/// 结果可能为空字符串，由调用方决定默认值。
///
/// # 示例
///
/// ```
/// use bucket_store::utils::path::secure_filename;
///
/// assert_eq!(secure_filename("My cool movie.mov"), "My_cool_movie.mov");
/// assert_eq!(secure_filename("../../../etc/passwd"), "etc_passwd");
/// ```
pub fn secure_filename(filename: &str) -> String {
    let ascii: String = filename.nfkd().filter(char::is_ascii).collect();
    let spaced = ascii.replace(['/', '\\'], " ");
    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let stripped: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    let trimmed = stripped.trim_matches(|c| c == '.' || c == '_').to_string();

    if is_windows_reserved_name(&trimmed) {
        format!("_{}", trimmed)
    } else {
        trimmed
    }
}

/// 检查是否为 Windows 保留文件名（忽略扩展名与大小写）
pub fn is_windows_reserved_name(name: &str) -> bool {
    let stem = name.split('.').next().unwrap_or(name);
    let upper = stem.to_ascii_uppercase();
    WINDOWS_RESERVED_NAMES.contains(&upper.as_str())
}

/// 计算 `path` 相对于 `base` 的路径，使用 `/` 连接
///
/// `path` 不在 `base` 之下时返回 `None`。
pub fn relative_path(base: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

/// 将相对路径拼接到公开 URI 上
pub fn join_uri(base: &str, relative: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        relative.trim_start_matches('/')
    )
}

/// 计算从目录 `from_dir` 指向 `target` 的相对路径
///
/// 两个路径都必须是绝对路径。
pub fn relative_link_target(from_dir: &Path, target: &Path) -> Result<PathBuf> {
    if !from_dir.is_absolute() || !target.is_absolute() {
        return Err(AppError::invalid_argument(format!(
            "Cannot relate non-absolute paths '{}' and '{}'",
            from_dir.display(),
            target.display()
        )));
    }

    let from: Vec<Component> = from_dir.components().collect();
    let to: Vec<Component> = target.components().collect();
    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();

    let mut relative = PathBuf::new();
    for _ in common..from.len() {
        relative.push("..");
    }
    for component in &to[common..] {
        relative.push(component.as_os_str());
    }
    Ok(relative)
}

/// 创建符号链接
#[cfg(unix)]
pub fn create_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

/// 创建符号链接（Windows 下按目录链接处理）
#[cfg(windows)]
pub fn create_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

/// 获取硬链接计数（非 Unix 平台恒为 1）
pub fn link_count(path: &Path) -> Result<u64> {
    let metadata = fs::metadata(path).map_err(|e| {
        AppError::io_error(
            format!("Failed to stat file: {}", e),
            Some(path.to_path_buf()),
        )
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        Ok(metadata.nlink())
    }
    #[cfg(not(unix))]
    {
        let _ = metadata;
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secure_filename() {
        assert_eq!(secure_filename("My cool movie.mov"), "My_cool_movie.mov");
        assert_eq!(secure_filename("../../../etc/passwd"), "etc_passwd");
        assert_eq!(
            secure_filename("i contain cool \u{fc}ml\u{e4}uts.txt"),
            "i_contain_cool_umlauts.txt"
        );
        assert_eq!(secure_filename("build.tar.gz"), "build.tar.gz");
        assert_eq!(secure_filename("con.txt"), "_con.txt");
        assert_eq!(secure_filename("..."), "");
        assert_eq!(secure_filename("  __hidden__  "), "hidden");
        assert_eq!(secure_filename("a;b|c$d"), "abcd");
    }

    #[test]
    fn test_is_windows_reserved_name() {
        assert!(is_windows_reserved_name("CON"));
        assert!(is_windows_reserved_name("nul.tar.gz"));
        assert!(is_windows_reserved_name("Lpt1"));
        assert!(!is_windows_reserved_name("console"));
        assert!(!is_windows_reserved_name("normal.txt"));
    }

    #[test]
    fn test_relative_path() {
        let base = Path::new("/srv/archive");
        assert_eq!(
            relative_path(base, Path::new("/srv/archive/blob/ab/cd/abcd1234")).as_deref(),
            Some("blob/ab/cd/abcd1234")
        );
        assert_eq!(relative_path(base, Path::new("/elsewhere/x")), None);
    }

    #[test]
    fn test_join_uri() {
        assert_eq!(
            join_uri("https://files.example.com/", "blob/ab/cd/abcd"),
            "https://files.example.com/blob/ab/cd/abcd"
        );
        assert_eq!(join_uri("/pub", "/x"), "/pub/x");
    }

    #[test]
    fn test_relative_link_target() {
        let target = relative_link_target(
            Path::new("/srv/archive/replica/projects/alpha"),
            Path::new("/srv/archive/explode/ab/cd/abcd1234"),
        )
        .unwrap();
        assert_eq!(target, PathBuf::from("../../../explode/ab/cd/abcd1234"));

        let sibling =
            relative_link_target(Path::new("/a/b"), Path::new("/a/b/c")).unwrap();
        assert_eq!(sibling, PathBuf::from("c"));

        assert!(relative_link_target(Path::new("rel"), Path::new("/abs")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_link_count() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let original = temp_dir.path().join("original");
        fs::write(&original, b"x").unwrap();
        assert_eq!(link_count(&original).unwrap(), 1);

        fs::hard_link(&original, temp_dir.path().join("second")).unwrap();
        assert_eq!(link_count(&original).unwrap(), 2);
    }
}
