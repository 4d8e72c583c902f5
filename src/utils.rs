use std::path::{Path, PathBuf};

use indicatif::ProgressStyle;
use regex::Regex;
use walkdir::WalkDir;

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// 递归扫描目录，返回后缀名匹配的文件，按路径排序
pub fn scan_images(root: &Path, re_suf: &Regex) -> Vec<PathBuf> {
    let mut paths = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.path().extension().and_then(|s| s.to_str()).is_some_and(|s| re_suf.is_match(s)))
        .map(|entry| entry.into_path())
        .collect::<Vec<_>>();
    paths.sort();
    paths
}

/// 将用户输入的描述规范化，空白描述视为没有描述
pub fn normalize_description(description: Option<String>) -> Option<String> {
    description.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn scan_filters_by_suffix() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        for name in ["a.jpg", "b.PNG", "c.txt", "sub/d.jpeg"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let re = Regex::new("(?i)^(jpg|jpeg|png)$").unwrap();
        let names = scan_images(dir.path(), &re)
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a.jpg", "b.PNG", "d.jpeg"]);
    }

    #[test]
    fn blank_description_is_none() {
        assert_eq!(normalize_description(Some("   ".to_string())), None);
        assert_eq!(normalize_description(None), None);
        assert_eq!(normalize_description(Some(" red ".to_string())), Some("red".to_string()));
    }
}
