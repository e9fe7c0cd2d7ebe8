use std::path::{Path, PathBuf};

/// Compute where the result for `path` goes inside `output_dir`.
///
/// Convention: the file name is kept and its extension replaced by `ext`
/// when given. Contents of an installed title
/// (`title/<tid_high>/<tid_low>/content/<name>`) get the title id folded
/// into the name, since every title uses the same content names:
/// `title/00040000/00abcd00/content/00000000.app` → `0004000000abcd00.00000000.app`.
pub fn output_path(output_dir: &Path, path: &Path, ext: Option<&str>) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;

    if let Some(title_id) = installed_title_id(path) {
        let file = match ext {
            Some(ext) => format!("{}.{}", title_id, ext),
            None => format!("{}.{}", title_id, name),
        };
        return Some(output_dir.join(file));
    }

    let mut dest = output_dir.join(name);
    if let Some(ext) = ext {
        dest.set_extension(ext);
    }
    Some(dest)
}

/// `<tid_high><tid_low>` if `path` is `.../title/<8 hex>/<8 hex>/content/<8 hex>.<ext>`.
fn installed_title_id(path: &Path) -> Option<String> {
    let parts: Vec<&str> = path
        .components()
        .rev()
        .take(5)
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    let [name, content, tid_low, tid_high, title] = parts.as_slice() else {
        return None;
    };
    let stem = name.split('.').next()?;
    let is_title = title.eq_ignore_ascii_case("title")
        && content.eq_ignore_ascii_case("content")
        && is_hex8(tid_high)
        && is_hex8(tid_low)
        && is_hex8(stem);
    is_title.then(|| format!("{}{}", tid_high, tid_low).to_ascii_lowercase())
}

fn is_hex8(s: &str) -> bool {
    s.len() == 8 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
#[path = "tests/util_tests.rs"]
mod tests;
