//! Load input files as ordered line sequences, one per file.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use flate2::read::GzDecoder;
use log::{debug, info};

const EXTENSIONS: [&str; 2] = ["xyz", "extxyz"];

/// Lines of a single input file.
#[derive(Clone, Debug, Default)]
pub struct SourceText {
    pub path: PathBuf,
    pub lines: Vec<String>,
}

/// Input files in read order. Blocks never span two sources.
#[derive(Clone, Debug, Default)]
pub struct InputText {
    pub sources: Vec<SourceText>,
}

impl InputText {
    pub fn line_count(&self) -> usize {
        self.sources.iter().map(|s| s.lines.len()).sum()
    }
}

/// Read `path`: a plain or gzip-compressed file, or a directory of them.
pub fn read_input(path: &Path) -> Result<InputText> {
    if !path.exists() {
        bail!("input '{}' does not exist", path.display());
    }
    let files = if path.is_dir() {
        let files = discover_inputs(path)?;
        if files.is_empty() {
            bail!("no .xyz/.extxyz files found under {}", path.display());
        }
        info!("Discovered {} input files", files.len());
        files
    } else {
        vec![path.to_path_buf()]
    };

    let mut input = InputText::default();
    for file in files {
        let mut lines = Vec::new();
        read_lines(&file, &mut lines)?;
        debug!("Read {} lines from {}", lines.len(), file.display());
        input.sources.push(SourceText { path: file, lines });
    }
    Ok(input)
}

/// Every structure file below `root`, in sorted path order.
pub fn discover_inputs(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if is_structure_file(entry.path()) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

fn is_structure_file(path: &Path) -> bool {
    let name = match path.file_name().and_then(|s| s.to_str()) {
        Some(n) => n,
        None => return false,
    };
    let name = name.strip_suffix(".gz").unwrap_or(name);
    EXTENSIONS
        .iter()
        .any(|ext| name.rsplit_once('.').is_some_and(|(_, e)| e == *ext))
}

fn is_gzip(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("gz")
}

fn read_lines(path: &Path, out: &mut Vec<String>) -> Result<()> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let source: Box<dyn Read> = if is_gzip(path) {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let reader = BufReader::new(source);
    for (line_idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| {
            format!("failed to read line {} of {}", line_idx + 1, path.display())
        })?;
        out.push(line);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn reads_plain_and_gzip_files() {
        let tmp = tempdir().unwrap();
        let plain = tmp.path().join("a.xyz");
        fs::write(&plain, "1\nc\nH 0 0 0\r\n").unwrap();
        let input = read_input(&plain).unwrap();
        assert_eq!(input.sources.len(), 1);
        assert_eq!(input.sources[0].path, plain);
        assert_eq!(input.sources[0].lines, vec!["1", "c", "H 0 0 0"]);

        let gz = tmp.path().join("b.extxyz.gz");
        let mut enc = GzEncoder::new(File::create(&gz).unwrap(), Compression::default());
        enc.write_all(b"1\nc\nHe 0 0 0\n").unwrap();
        enc.finish().unwrap();
        let input = read_input(&gz).unwrap();
        assert_eq!(input.sources[0].lines, vec!["1", "c", "He 0 0 0"]);
    }

    #[test]
    fn directory_inputs_are_sorted_and_filtered() {
        let tmp = tempdir().unwrap();
        let nested = tmp.path().join("nested");
        fs::create_dir_all(&nested).unwrap();
        fs::write(tmp.path().join("b.xyz"), "b\n").unwrap();
        fs::write(tmp.path().join("a.extxyz"), "a\n").unwrap();
        fs::write(nested.join("c.xyz"), "c\n").unwrap();
        fs::write(tmp.path().join("notes.txt"), "ignored\n").unwrap();

        let input = read_input(tmp.path()).unwrap();
        let names: Vec<_> = input
            .sources
            .iter()
            .map(|s| s.path.strip_prefix(tmp.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("a.extxyz"),
                PathBuf::from("b.xyz"),
                PathBuf::from("nested/c.xyz")
            ]
        );
        assert_eq!(input.sources[2].lines, vec!["c"]);
        assert_eq!(input.line_count(), 3);
    }

    #[test]
    fn missing_or_empty_inputs_fail() {
        let tmp = tempdir().unwrap();
        assert!(read_input(&tmp.path().join("nope.xyz")).is_err());
        assert!(read_input(tmp.path()).is_err());
    }

    #[test]
    fn structure_file_names() {
        assert!(is_structure_file(Path::new("set.xyz")));
        assert!(is_structure_file(Path::new("set.extxyz.gz")));
        assert!(!is_structure_file(Path::new("set.gz")));
        assert!(!is_structure_file(Path::new("xyz")));
        assert!(!is_structure_file(Path::new("set.json")));
    }
}
