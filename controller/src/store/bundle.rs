use std::{io::Cursor, path::Path};

use log::warn;
use zip::ZipArchive;

use crate::{Result, error::StoreErr, store::write_file};

/// Extracts a zip transfer bundle into `dest`, creating it if needed.
///
/// Entries are written below `dest` only; names escaping it are rejected by
/// the archive reader.
///
/// # Returns
/// The number of files extracted.
pub fn unpack(bytes: &[u8], dest: &Path) -> Result<usize> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(StoreErr::from)?;
    let mut files = 0;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(StoreErr::from)?;
        let Some(relative) = entry.enclosed_name() else {
            warn!("skipping unsafe bundle entry {}", entry.name());
            continue;
        };

        let target = dest.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| StoreErr::io(&target, e))?;
            continue;
        }

        let mut content = Vec::new();
        std::io::copy(&mut entry, &mut content).map_err(|e| StoreErr::io(&target, e))?;
        write_file(&target, &content)?;
        files += 1;
    }

    Ok(files)
}
