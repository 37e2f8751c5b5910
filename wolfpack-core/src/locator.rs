use crate::errors::PipelineError;
use std::path::{Path, PathBuf};
use sysinfo::Disks;
use tracing::info;

/// The game directory this pipeline is allowed to mutate, plus its
/// filesystem root for free-space queries.
#[derive(Debug, Clone)]
pub struct InstallationTarget {
    pub path: PathBuf,
    pub drive_root: PathBuf,
}

impl InstallationTarget {
    pub fn new(path: PathBuf) -> Self {
        let drive_root = path
            .ancestors()
            .last()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self { path, drive_root }
    }

    /// Free bytes on the disk holding the target, picked by the longest
    /// mount-point prefix match. `None` when no disk matches.
    pub fn available_space(&self) -> Option<u64> {
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|d| self.path.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .map(|d| d.available_space())
    }
}

/// Probe an ordered list of Steam `common` roots for the game folder and
/// return the first hit. A missing root is "not found", never an error, so
/// absent drives fall through silently.
pub fn locate_in_roots(
    roots: impl IntoIterator<Item = PathBuf>,
    game_name: &str,
) -> Option<PathBuf> {
    for root in roots {
        let candidate = root.join(game_name);
        if candidate.is_dir() {
            info!("Found game at {}", candidate.display());
            return Some(candidate);
        }
    }
    None
}

/// Fixed probe order: drives C through L.
#[cfg(windows)]
pub fn candidate_roots() -> Vec<PathBuf> {
    ('C'..='L')
        .map(|drive| PathBuf::from(format!("{drive}:\\SteamLibrary\\steamapps\\common")))
        .collect()
}

#[cfg(unix)]
pub fn candidate_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Ok(home) = std::env::var("HOME") {
        let home = PathBuf::from(home);
        roots.push(home.join(".local/share/Steam/steamapps/common"));
        roots.push(home.join(".steam/steam/steamapps/common"));
        roots.push(home.join(".var/app/com.valvesoftware.Steam/.local/share/Steam/steamapps/common"));
    }
    roots
}

pub fn locate_game(game_name: &str) -> Result<InstallationTarget, PipelineError> {
    info!("Locating game directory for '{game_name}'...");
    locate_in_roots(candidate_roots(), game_name)
        .map(InstallationTarget::new)
        .ok_or(PipelineError::GameNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::fs;

    #[test]
    fn returns_first_match_and_stops_probing() {
        let tmp = tempfile::tempdir().unwrap();
        let roots: Vec<PathBuf> = ('a'..='f').map(|c| tmp.path().join(format!("{c}_root"))).collect();
        fs::create_dir_all(roots[2].join("Lethal Company")).unwrap();
        fs::create_dir_all(roots[4].join("Lethal Company")).unwrap();

        let probed = Cell::new(0usize);
        let found = locate_in_roots(
            roots.iter().cloned().inspect(|_| probed.set(probed.get() + 1)),
            "Lethal Company",
        );

        assert_eq!(found, Some(roots[2].join("Lethal Company")));
        // early exit: roots after the match were never pulled
        assert_eq!(probed.get(), 3);
    }

    #[test]
    fn no_match_across_all_roots_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let roots = vec![tmp.path().join("x"), tmp.path().join("y")];
        assert_eq!(locate_in_roots(roots, "Lethal Company"), None);
    }

    #[test]
    fn target_derives_filesystem_root() {
        let target = InstallationTarget::new(
            std::env::temp_dir().join("SteamLibrary/steamapps/common/Lethal Company"),
        );
        assert!(target.path.starts_with(&target.drive_root));
    }
}
