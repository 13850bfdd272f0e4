use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;
use zip::ZipArchive;

use crate::error::SlaError;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tif", "tiff", "gif"];

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<(), SlaError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| SlaError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| SlaError::Extraction(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| SlaError::Extraction(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(SlaError::Extraction(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| SlaError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| SlaError::Filesystem(err.to_string()))?;
        }
        let mut outfile =
            fs::File::create(&entry_path).map_err(|err| SlaError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile).map_err(|err| SlaError::Filesystem(err.to_string()))?;
    }
    Ok(())
}

/// RAR archives are unpacked by an external tool located through `find_tool`; `unrar` is
/// preferred over `7z`.
pub fn extract_rar<F>(archive_path: &Path, target_dir: &Path, find_tool: F) -> Result<(), SlaError>
where
    F: Fn(&str) -> Option<PathBuf>,
{
    fs::create_dir_all(target_dir).map_err(|err| SlaError::Filesystem(err.to_string()))?;
    let archive = archive_path.to_string_lossy().to_string();

    if let Some(unrar) = find_tool("unrar") {
        let target = format!("{}{}", target_dir.display(), std::path::MAIN_SEPARATOR);
        let args = vec!["x".to_string(), "-o+".to_string(), archive, target];
        return run_cmd(&unrar, &args);
    }
    if let Some(seven_zip) = find_tool("7z").or_else(|| find_tool("7za")) {
        let args = vec![
            "x".to_string(),
            "-y".to_string(),
            format!("-o{}", target_dir.display()),
            archive,
        ];
        return run_cmd(&seven_zip, &args);
    }
    Err(SlaError::MissingTool(
        "no RAR extractor (`unrar` or `7z`) found on PATH".to_string(),
    ))
}

fn run_cmd(program: &Path, args: &[String]) -> Result<(), SlaError> {
    debug!(program = %program.display(), ?args, "running extractor");
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|err| SlaError::Extraction(err.to_string()))?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let message = if stderr.is_empty() {
        format!("command failed: {}", program.display())
    } else {
        stderr
    };
    Err(SlaError::Extraction(message))
}

pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}

pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|value| value.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

pub fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|value| value.to_str())
        .map(|value| value.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

pub fn find_files<F>(root: &Path, keep: F) -> Result<Vec<PathBuf>, SlaError>
where
    F: Fn(&Path) -> bool,
{
    let mut out = Vec::new();
    if !root.exists() {
        return Ok(out);
    }
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = fs::read_dir(&dir).map_err(|err| SlaError::Filesystem(err.to_string()))?;
        for entry in entries {
            let path = entry
                .map_err(|err| SlaError::Filesystem(err.to_string()))?
                .path();
            if path.is_dir() {
                stack.push(path);
            } else if keep(&path) {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

pub fn image_stems(root: &Path) -> Result<BTreeSet<String>, SlaError> {
    Ok(find_files(root, is_image)?
        .iter()
        .filter_map(|path| path.file_stem().and_then(|stem| stem.to_str()))
        .map(str::to_string)
        .collect())
}

pub fn move_files(files: &[PathBuf], target_dir: &Path) -> Result<usize, SlaError> {
    fs::create_dir_all(target_dir).map_err(|err| SlaError::Filesystem(err.to_string()))?;
    let mut moved = 0;
    for file in files {
        let Some(name) = file.file_name() else {
            continue;
        };
        let target = target_dir.join(name);
        if *file == target {
            continue;
        }
        if fs::rename(file, &target).is_err() {
            fs::copy(file, &target).map_err(|err| SlaError::Filesystem(err.to_string()))?;
            fs::remove_file(file).map_err(|err| SlaError::Filesystem(err.to_string()))?;
        }
        moved += 1;
    }
    Ok(moved)
}

pub fn remove_empty_dirs(root: &Path) -> Result<usize, SlaError> {
    if !root.is_dir() {
        return Ok(0);
    }
    let mut dirs = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = fs::read_dir(&dir).map_err(|err| SlaError::Filesystem(err.to_string()))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path.clone());
                dirs.push(path);
            }
        }
    }
    dirs.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));

    let mut removed = 0;
    for dir in dirs {
        let is_empty = fs::read_dir(&dir)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if is_empty {
            fs::remove_dir(&dir).map_err(|err| SlaError::Filesystem(err.to_string()))?;
            removed += 1;
        }
    }
    Ok(removed)
}

pub fn strip_sidecars(images_dir: &Path) -> Result<Vec<PathBuf>, SlaError> {
    let mut removed = Vec::new();
    if !images_dir.is_dir() {
        return Ok(removed);
    }
    let entries = fs::read_dir(images_dir).map_err(|err| SlaError::Filesystem(err.to_string()))?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() && !is_image(&path) {
            fs::remove_file(&path).map_err(|err| SlaError::Filesystem(err.to_string()))?;
            removed.push(path);
        }
    }
    Ok(removed)
}

pub fn count_images(dir: &Path) -> Result<usize, SlaError> {
    if !dir.is_dir() {
        return Ok(0);
    }
    let entries = fs::read_dir(dir).map_err(|err| SlaError::Filesystem(err.to_string()))?;
    Ok(entries
        .flatten()
        .filter(|entry| entry.path().is_file() && is_image(&entry.path()))
        .count())
}
