//! Directory scanning.
//!
//! Walks a source tree and produces the list of album directories: each
//! local directory that transitively contains at least one uploadable media
//! file becomes one album, titled by its path relative to the root with
//! `": "` joining the components. The root itself is always returned, with
//! no title — its files are uploaded without an album.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;

use chrono::NaiveDateTime;
use regex::Regex;

use crate::error::UploadError;

/// Directory names created by platforms and tools, never albums.
const METADATA_DIR_NAMES: &[&str] = &["DS_Store", "__MACOSX", "@eaDir"];

/// Extensions the photos service accepts.
const MEDIA_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "heic", "tif", "tiff", "mp4", "mov", "avi", "mkv",
    "m4v", "mpg", "webm",
];

/// A local directory that becomes, or binds to, one cloud album.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumDirectory {
    pub path: PathBuf,
    /// Absent for the root directory.
    pub title: Option<String>,
    /// Uploadable files directly in this directory, unsorted. Call
    /// [`sort_for_upload`] before submitting them.
    pub files: Vec<PathBuf>,
}

/// Scans `root` and returns album directories in a deterministic
/// depth-first order, root first.
pub fn scan(root: &Path) -> Result<Vec<AlbumDirectory>, UploadError> {
    let mut dirs = Vec::new();
    // The root entry survives even with nothing to upload; `walk` only
    // prunes titled directories.
    walk(root, None, &mut dirs)?;
    Ok(dirs)
}

/// Walks `dir` depth-first. Returns whether the subtree contains at least
/// one uploadable file; only such directories yield albums.
fn walk(
    dir: &Path,
    title: Option<&str>,
    out: &mut Vec<AlbumDirectory>,
) -> Result<bool, UploadError> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    let mut files = Vec::new();
    let mut subdirs = Vec::new();
    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if !is_skippable_dir(&name) {
                subdirs.push((entry.path(), name));
            }
        } else if file_type.is_file() && is_uploadable(&name) {
            files.push(entry.path());
        }
    }

    let index = out.len();
    out.push(AlbumDirectory {
        path: dir.to_path_buf(),
        title: title.map(String::from),
        files,
    });

    let mut subtree_has_files = !out[index].files.is_empty();
    for (path, name) in subdirs {
        let child_title = match title {
            Some(parent) => format!("{parent}: {name}"),
            None => name,
        };
        subtree_has_files |= walk(&path, Some(&child_title), out)?;
    }

    // A directory with only skippable content (transitively) is not an
    // album. The root stays regardless.
    if !subtree_has_files && title.is_some() {
        out.remove(index);
    }
    Ok(subtree_has_files)
}

fn is_skippable_dir(name: &str) -> bool {
    name.starts_with('.') || METADATA_DIR_NAMES.contains(&name)
}

/// A file is uploadable unless it is hidden, a tool artifact, or not a known
/// media type.
pub fn is_uploadable(file_name: &str) -> bool {
    if file_name.starts_with('.') || file_name.eq_ignore_ascii_case("picasa.ini") {
        return false;
    }
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            MEDIA_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Sorts files by the creation-time heuristic: a `YYYY_MM_DD_HH_MM_SS`
/// stamp embedded in the name wins, then filesystem mtime, then the name.
///
/// Submission order is preserved all the way to the remote album, so this
/// makes the album read in shooting order.
pub fn sort_for_upload(files: &mut Vec<PathBuf>) {
    let mut keyed: Vec<(SystemTime, PathBuf)> = files
        .drain(..)
        .map(|path| (creation_time_of(&path), path))
        .collect();
    keyed.sort_by(|(ta, pa), (tb, pb)| ta.cmp(tb).then_with(|| pa.file_name().cmp(&pb.file_name())));
    files.extend(keyed.into_iter().map(|(_, path)| path));
}

fn creation_time_of(path: &Path) -> SystemTime {
    if let Some(stamped) = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(timestamp_from_name)
    {
        return stamped;
    }
    fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

fn timestamp_from_name(name: &str) -> Option<SystemTime> {
    static STAMP: OnceLock<Regex> = OnceLock::new();
    let stamp = STAMP
        .get_or_init(|| Regex::new(r"(\d{4}_\d{2}_\d{2}_\d{2}_\d{2}_\d{2})").unwrap());

    let captured = stamp.captures(name)?.get(1)?.as_str();
    let parsed = NaiveDateTime::parse_from_str(captured, "%Y_%m_%d_%H_%M_%S").ok()?;
    let secs = parsed.and_utc().timestamp();
    u64::try_from(secs)
        .ok()
        .map(|s| SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn titles(dirs: &[AlbumDirectory]) -> Vec<Option<&str>> {
        dirs.iter().map(|d| d.title.as_deref()).collect()
    }

    #[test]
    fn scans_nested_tree() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join("root-photo.jpg"), [0]).unwrap();

        let outer = root.join("outer-album");
        fs::create_dir(&outer).unwrap();
        fs::write(outer.join("outer-album-photo.jpg"), [1]).unwrap();
        fs::write(outer.join("picasa.ini"), [1]).unwrap();

        let inner = outer.join("inner-album");
        fs::create_dir(&inner).unwrap();
        fs::write(inner.join("inner-album-photo.jpg"), [2]).unwrap();

        fs::create_dir(root.join("DS_Store")).unwrap();

        let dirs = scan(root).unwrap();
        assert_eq!(
            titles(&dirs),
            vec![None, Some("outer-album"), Some("outer-album: inner-album")]
        );
        assert_eq!(dirs[0].files.len(), 1);
        // picasa.ini is not a file of the album.
        assert_eq!(dirs[1].files.len(), 1);
        assert_eq!(dirs[2].files.len(), 1);
    }

    #[test]
    fn root_always_yielded_even_when_empty() {
        let tmp = TempDir::new().unwrap();
        let dirs = scan(tmp.path()).unwrap();
        assert_eq!(titles(&dirs), vec![None]);
        assert!(dirs[0].files.is_empty());
    }

    #[test]
    fn directories_with_only_skippable_content_yield_no_album() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join("keep.jpg"), [0]).unwrap();

        let skippable = root.join("skippable-dir");
        fs::create_dir(&skippable).unwrap();
        fs::write(skippable.join(".hiddenfile"), [0]).unwrap();
        let sub = skippable.join("skippable-sub-dir");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join(".hiddenfile2"), [0]).unwrap();
        fs::create_dir(skippable.join("skippable-sub-dir2-empty")).unwrap();

        let dirs = scan(root).unwrap();
        assert_eq!(titles(&dirs), vec![None]);
    }

    #[test]
    fn directory_with_only_non_media_files_yields_no_album() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join("keep.jpg"), [0]).unwrap();
        let docs = root.join("docs");
        fs::create_dir(&docs).unwrap();
        fs::write(docs.join("readme.txt"), [0]).unwrap();

        let dirs = scan(root).unwrap();
        assert_eq!(titles(&dirs), vec![None]);
    }

    #[test]
    fn non_media_extensions_are_not_uploadable() {
        assert!(is_uploadable("photo.jpg"));
        assert!(is_uploadable("clip.MOV"));
        assert!(!is_uploadable("excluded-file.txt"));
        assert!(!is_uploadable(".hidden.jpg"));
        assert!(!is_uploadable("Picasa.INI"));
        assert!(!is_uploadable("no-extension"));
    }

    #[test]
    fn empty_album_dir_is_kept_when_subtree_has_files() {
        // outer/ holds nothing uploadable itself but inner/ does; both the
        // outer and inner directories must appear so the title chain exists.
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join("r.jpg"), [0]).unwrap();
        let outer = root.join("outer");
        fs::create_dir(&outer).unwrap();
        let inner = outer.join("inner");
        fs::create_dir(&inner).unwrap();
        fs::write(inner.join("i.jpg"), [0]).unwrap();

        let dirs = scan(root).unwrap();
        assert_eq!(titles(&dirs), vec![None, Some("outer"), Some("outer: inner")]);
        assert!(dirs[1].files.is_empty());
    }

    #[test]
    fn sorts_by_embedded_timestamp_before_mtime() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let f3 = root.join("creation-time-2020_01_03_00_00_00.jpg");
        let f1 = root.join("creation-time-2020_01_01_00_00_00.jpg");
        let f2 = root.join("creation-time-2020_01_02_00_00_00.jpg");
        // Written out of order on purpose.
        fs::write(&f3, [0]).unwrap();
        fs::write(&f1, [0]).unwrap();
        fs::write(&f2, [0]).unwrap();

        let mut files = vec![f3.clone(), f1.clone(), f2.clone()];
        sort_for_upload(&mut files);
        assert_eq!(files, vec![f1, f2, f3]);
    }

    #[test]
    fn sort_ties_break_on_file_name() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let b = root.join("b-2020_01_01_00_00_00.jpg");
        let a = root.join("a-2020_01_01_00_00_00.jpg");
        fs::write(&b, [0]).unwrap();
        fs::write(&a, [0]).unwrap();

        let mut files = vec![b.clone(), a.clone()];
        sort_for_upload(&mut files);
        assert_eq!(files, vec![a, b]);
    }

    #[test]
    fn malformed_timestamp_falls_back_to_mtime() {
        assert!(timestamp_from_name("photo-2020_13_45_99_99_99.jpg").is_none());
        assert!(timestamp_from_name("plain.jpg").is_none());
        assert!(timestamp_from_name("x-2020_01_02_03_04_05-y.jpg").is_some());
    }
}
