use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Writes `urls` to `path`, one per line, in order. An empty list produces an empty file.
pub fn write_granule_list(path: &Path, urls: &[String]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
    }

    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    for url in urls {
        writeln!(out, "{}", url)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    out.flush()
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Reads a URL list, skipping blank lines and `#` comments.
pub fn read_granule_list(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read granule list {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_url_per_line_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lists").join("aster.txt");
        let urls = vec![
            "https://host/b.hdf".to_string(),
            "https://host/a.hdf".to_string(),
            "https://host/c.hdf".to_string(),
        ];

        write_granule_list(&path, &urls).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "https://host/b.hdf\nhttps://host/a.hdf\nhttps://host/c.hdf\n"
        );
        assert_eq!(read_granule_list(&path).unwrap(), urls);
    }

    #[test]
    fn empty_result_still_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("none.txt");
        write_granule_list(&path, &[]).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
        assert!(read_granule_list(&path).unwrap().is_empty());
    }

    #[test]
    fn hand_edited_lists_skip_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edited.txt");
        std::fs::write(&path, "# february\n\nhttps://host/a.hdf\n  https://host/b.hdf  \n").unwrap();
        assert_eq!(
            read_granule_list(&path).unwrap(),
            ["https://host/a.hdf", "https://host/b.hdf"]
        );
    }

    #[test]
    fn missing_list_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_granule_list(&dir.path().join("nope.txt")).unwrap_err();
        assert!(err.to_string().contains("failed to read granule list"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn write_failures_name_the_list_file() {
        let full = Path::new("/dev/full");
        if !full.exists() {
            return;
        }
        // Enough lines to overflow the write buffer before the final flush.
        let urls: Vec<String> = (0..2000)
            .map(|i| format!("https://host/granule-{:05}.hdf", i))
            .collect();
        let err = write_granule_list(full, &urls).unwrap_err();
        assert!(err.to_string().contains("failed to write /dev/full"));
    }
}
