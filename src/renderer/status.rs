use std::path::PathBuf;

const FILE_NAME_KEY: &str = "CURRENT_FILE_NAME=\"";
const FILE_INDEX_KEY: &str = "CURRENT_FILE_INDEX=";

/// A line of viewer status output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerLine {
    /// `CURRENT_FILE_NAME="<path>"`
    CurrentFile(PathBuf),
    /// `CURRENT_FILE_INDEX=<digits>`
    FileIndex(u64),
    Other,
}

pub fn classify_line(line: &str) -> ViewerLine {
    if let Some(path) = current_file(line) {
        return ViewerLine::CurrentFile(PathBuf::from(path));
    }
    if let Some(index) = file_index(line) {
        return ViewerLine::FileIndex(index);
    }
    ViewerLine::Other
}

fn current_file(line: &str) -> Option<&str> {
    let start = line.find(FILE_NAME_KEY)? + FILE_NAME_KEY.len();
    let rest = &line[start..];
    let end = rest.rfind('"')?;
    let path = &rest[..end];
    (!path.is_empty()).then_some(path)
}

fn file_index(line: &str) -> Option<u64> {
    let start = line.find(FILE_INDEX_KEY)? + FILE_INDEX_KEY.len();
    let digits: &str = {
        let rest = &line[start..];
        let len = rest.bytes().take_while(u8::is_ascii_digit).count();
        &rest[..len]
    };
    digits.parse().ok()
}
