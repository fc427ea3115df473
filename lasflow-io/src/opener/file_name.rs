use std::path::{Path, PathBuf};

/// The components an output file name is composed of:
/// `directory / stem + appendix + zero-padded number . extension`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileNameParts {
    pub directory: Option<PathBuf>,
    pub stem: String,
    pub appendix: String,
    pub number: Option<u64>,
    /// Minimum width of the zero-padded number
    pub digits: usize,
    /// Extension without the leading dot, empty for none
    pub extension: String,
}

impl FileNameParts {
    pub fn compose(&self) -> PathBuf {
        let mut name = String::with_capacity(self.stem.len() + self.appendix.len() + self.digits + 4);
        name.push_str(&self.stem);
        name.push_str(&self.appendix);
        if let Some(number) = self.number {
            name.push_str(&format!("{:0width$}", number, width = self.digits));
        }
        if !self.extension.is_empty() {
            name.push('.');
            name.push_str(&self.extension);
        }
        match &self.directory {
            Some(directory) => directory.join(name),
            None => PathBuf::from(name),
        }
    }
}

/// Removes the last `cut` characters from `stem`
pub fn cut_characters(stem: &str, cut: usize) -> &str {
    let keep = stem.chars().count().saturating_sub(cut);
    match stem.char_indices().nth(keep) {
        Some((byte_index, _)) => &stem[..byte_index],
        None => stem,
    }
}

/// Splits a composed file name back into its parts, given the `appendix` and number of `digits` it was
/// composed with. Returns `None` if `path` cannot have been composed with these settings
pub fn decompose_file_name(path: &Path, appendix: &str, digits: Option<usize>) -> Option<FileNameParts> {
    let directory = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf);
    let extension = path
        .extension()
        .map(|extension| extension.to_str().map(str::to_owned))
        .unwrap_or_else(|| Some(String::new()))?;
    let mut rest = path.file_stem()?.to_str()?;

    let (number, digits) = match digits {
        Some(digits) => {
            let split = rest.len().checked_sub(digits)?;
            if !rest.is_char_boundary(split) {
                return None;
            }
            let (head, number) = rest.split_at(split);
            if number.is_empty() || !number.bytes().all(|byte| byte.is_ascii_digit()) {
                return None;
            }
            rest = head;
            (Some(number.parse().ok()?), digits)
        }
        None => (None, 0),
    };
    let stem = rest.strip_suffix(appendix)?;

    Some(FileNameParts {
        directory,
        stem: stem.to_owned(),
        appendix: appendix.to_owned(),
        number,
        digits,
        extension,
    })
}
