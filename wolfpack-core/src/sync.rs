use crate::errors::PipelineError;
use crate::profile::ModpackProfile;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Scan the game directory's immediate children for the dependency folder.
/// Recomputed on every call, so it can never go stale.
pub fn is_dependency_installed(game_dir: &Path, dependency_name: &str) -> Result<bool, PipelineError> {
    if !game_dir.is_dir() {
        return Err(PipelineError::GameNotFound);
    }
    for entry in fs::read_dir(game_dir)? {
        let entry = entry?;
        if entry.path().is_dir() && entry.file_name().to_string_lossy() == dependency_name {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Everything a modpack sync requires before it stages a single byte.
/// A failure here means the game directory was not touched.
pub fn modpack_preconditions(
    extracted_root: &Path,
    game_dir: &Path,
    profile: &ModpackProfile,
) -> Result<(), PipelineError> {
    if !extracted_root.is_dir() {
        return Err(PipelineError::ArtifactMissing(extracted_root.to_path_buf()));
    }
    if !game_dir.is_dir() {
        return Err(PipelineError::GameNotFound);
    }
    if !game_dir.join(&profile.dependency_name).is_dir() {
        return Err(PipelineError::DependencyMissing(profile.dependency_name.clone()));
    }
    Ok(())
}

/// Preconditions for the additive dependency merge.
pub fn dependency_preconditions(
    extracted_root: &Path,
    game_dir: &Path,
) -> Result<(), PipelineError> {
    if !extracted_root.is_dir() {
        return Err(PipelineError::ArtifactMissing(extracted_root.to_path_buf()));
    }
    if !game_dir.is_dir() {
        return Err(PipelineError::GameNotFound);
    }
    Ok(())
}

/// Releases are published wrapped in one extra top-level folder; find it.
fn wrapped_root(extracted: &Path) -> Result<PathBuf, PipelineError> {
    for entry in fs::read_dir(extracted)? {
        let entry = entry?;
        if entry.path().is_dir() {
            return Ok(entry.path());
        }
    }
    Err(PipelineError::ArtifactMissing(extracted.to_path_buf()))
}

fn copy_contents_into(src: &Path, dst: &Path) -> Result<(), PipelineError> {
    fs::create_dir_all(dst)?;
    let mut opts = fs_extra::dir::CopyOptions::new();
    opts.content_only = true;
    opts.overwrite = true;
    fs_extra::dir::copy(src, dst, &opts).map_err(|e| {
        PipelineError::Install(format!("copy {} -> {}: {e}", src.display(), dst.display()))
    })?;
    Ok(())
}

/// Replace `dest_folder` with the tree at `src_folder` via a staged swap:
/// build the new tree in a temporary sibling, rename the old folder aside,
/// rename the staging folder into place, and only then delete the old tree.
/// At no point is the destination name empty-or-missing unless the swap
/// itself fails, and a failed swap puts the old folder back.
fn swap_in(src_folder: &Path, dest_folder: &Path) -> Result<(), PipelineError> {
    let parent = dest_folder
        .parent()
        .ok_or_else(|| PipelineError::Install(format!("{} has no parent", dest_folder.display())))?;
    let name = dest_folder
        .file_name()
        .ok_or_else(|| PipelineError::Install(format!("{} has no name", dest_folder.display())))?
        .to_string_lossy()
        .to_string();
    let staging = parent.join(format!(".{name}.staging"));
    let displaced = parent.join(format!(".{name}.old"));

    // leftovers from an interrupted earlier run
    let _ = fs::remove_dir_all(&staging);
    let _ = fs::remove_dir_all(&displaced);

    copy_contents_into(src_folder, &staging)?;

    if dest_folder.exists() {
        fs::rename(dest_folder, &displaced).map_err(|e| {
            PipelineError::Install(format!("set aside {}: {e}", dest_folder.display()))
        })?;
    }
    if let Err(e) = fs::rename(&staging, dest_folder) {
        // put the old tree back before reporting
        if displaced.exists() {
            let _ = fs::rename(&displaced, dest_folder);
        }
        let _ = fs::remove_dir_all(&staging);
        return Err(PipelineError::Install(format!(
            "swap {} into place: {e}",
            dest_folder.display()
        )));
    }
    let _ = fs::remove_dir_all(&displaced);
    Ok(())
}

/// Install the modpack: replace each synced subfolder of the dependency
/// directory with its counterpart from the extracted release. Unrelated
/// siblings are never touched.
pub fn install_modpack_files(
    extracted_root: &Path,
    game_dir: &Path,
    profile: &ModpackProfile,
    mut progress: impl FnMut(&str, u8),
) -> Result<(), PipelineError> {
    modpack_preconditions(extracted_root, game_dir, profile)?;
    let dep_dir = game_dir.join(&profile.dependency_name);

    let source_root = wrapped_root(extracted_root)?;
    info!("Installing modpack from {}", source_root.display());

    let total = profile.synced_folders.len().max(1);
    for (i, folder) in profile.synced_folders.iter().enumerate() {
        let src = source_root.join(folder);
        if !src.is_dir() {
            return Err(PipelineError::ArtifactMissing(src));
        }
        progress(&format!("Installing {folder}"), ((i * 100) / total) as u8);
        swap_in(&src, &dep_dir.join(folder))?;
        info!("Installed {folder}.");
    }
    progress("Modpack files installed", 100);
    Ok(())
}

/// Install the dependency package: merge its contents into the game
/// directory additively, overwriting on collision, removing nothing.
pub fn install_dependency_files(
    extracted_root: &Path,
    game_dir: &Path,
    profile: &ModpackProfile,
    mut progress: impl FnMut(&str, u8),
) -> Result<(), PipelineError> {
    dependency_preconditions(extracted_root, game_dir)?;

    let packaged = extracted_root.join(&profile.dependency_package_dir);
    let source = if packaged.is_dir() { packaged } else { wrapped_root(extracted_root)? };

    progress(&format!("Installing {}", profile.dependency_name), 10);
    copy_contents_into(&source, game_dir)?;
    progress(&format!("{} installed", profile.dependency_name), 100);
    info!("Dependency files merged into {}", game_dir.display());
    Ok(())
}

/// Remove only the dependency's folder subtree; everything else in the game
/// directory is out of bounds.
pub fn uninstall_dependency(game_dir: &Path, dependency_name: &str) -> Result<(), PipelineError> {
    if !game_dir.is_dir() {
        return Err(PipelineError::GameNotFound);
    }
    let dep_dir = game_dir.join(dependency_name);
    if dep_dir.is_dir() {
        fs::remove_dir_all(&dep_dir)
            .map_err(|e| PipelineError::Install(format!("remove {}: {e}", dep_dir.display())))?;
        info!("Removed {}", dep_dir.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    /// Extracted release layout: one wrapper folder holding the three synced
    /// subfolders.
    fn fake_release(root: &Path) {
        write(&root.join("TheWolfPack-1.3/plugins/NewMod.dll"), "new plugin");
        write(&root.join("TheWolfPack-1.3/config/new.cfg"), "fresh");
        write(&root.join("TheWolfPack-1.3/patchers/Patch.dll"), "patcher");
    }

    fn fake_game(root: &Path) {
        write(&root.join("Lethal Company.exe"), "game");
        write(&root.join("BepInEx/plugins/OldMod.dll"), "old plugin");
        write(&root.join("BepInEx/config/old.cfg"), "stale");
        write(&root.join("BepInEx/patchers/OldPatch.dll"), "old");
        write(&root.join("BepInEx/unrelated_folder/keep.txt"), "precious");
        write(&root.join("BepInEx/core/BepInEx.dll"), "runtime");
    }

    #[test]
    fn sync_replaces_owned_folders_only() {
        let tmp = tempfile::tempdir().unwrap();
        let extracted = tmp.path().join("extracted");
        let game = tmp.path().join("game");
        fake_release(&extracted);
        fake_game(&game);

        install_modpack_files(&extracted, &game, &ModpackProfile::default(), |_, _| {}).unwrap();

        let bepinex = game.join("BepInEx");
        assert!(bepinex.join("plugins/NewMod.dll").exists());
        assert!(!bepinex.join("plugins/OldMod.dll").exists());
        assert_eq!(fs::read_to_string(bepinex.join("config/new.cfg")).unwrap(), "fresh");
        assert!(!bepinex.join("config/old.cfg").exists());
        // unrelated content is untouched
        assert_eq!(
            fs::read_to_string(bepinex.join("unrelated_folder/keep.txt")).unwrap(),
            "precious"
        );
        assert!(bepinex.join("core/BepInEx.dll").exists());
        assert!(game.join("Lethal Company.exe").exists());
        // no staging or displaced leftovers
        assert!(!bepinex.join(".plugins.staging").exists());
        assert!(!bepinex.join(".plugins.old").exists());
    }

    #[test]
    fn sync_with_missing_source_folder_keeps_old_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let extracted = tmp.path().join("extracted");
        let game = tmp.path().join("game");
        // release without a patchers folder
        write(&extracted.join("TheWolfPack-1.3/plugins/NewMod.dll"), "new plugin");
        write(&extracted.join("TheWolfPack-1.3/config/new.cfg"), "fresh");
        fake_game(&game);

        let err =
            install_modpack_files(&extracted, &game, &ModpackProfile::default(), |_, _| {})
                .unwrap_err();
        assert!(matches!(err, PipelineError::ArtifactMissing(_)));
        // patchers was never cleared; the old tree survives the failure
        assert!(game.join("BepInEx/patchers/OldPatch.dll").exists());
    }

    #[test]
    fn modpack_install_requires_dependency() {
        let tmp = tempfile::tempdir().unwrap();
        let extracted = tmp.path().join("extracted");
        let game = tmp.path().join("game");
        fake_release(&extracted);
        write(&game.join("Lethal Company.exe"), "game");

        let err =
            install_modpack_files(&extracted, &game, &ModpackProfile::default(), |_, _| {})
                .unwrap_err();
        assert!(matches!(err, PipelineError::DependencyMissing(_)));
    }

    #[test]
    fn dependency_install_is_additive() {
        let tmp = tempfile::tempdir().unwrap();
        let extracted = tmp.path().join("extracted");
        let game = tmp.path().join("game");
        write(&extracted.join("BepInExPack/BepInEx/core/BepInEx.dll"), "runtime");
        write(&extracted.join("BepInExPack/winhttp.dll"), "shim");
        write(&game.join("Lethal Company.exe"), "game");
        write(&game.join("Data/globalgamemanagers"), "unity");

        install_dependency_files(&extracted, &game, &ModpackProfile::default(), |_, _| {})
            .unwrap();

        assert!(game.join("BepInEx/core/BepInEx.dll").exists());
        assert!(game.join("winhttp.dll").exists());
        // nothing pre-existing was removed
        assert!(game.join("Lethal Company.exe").exists());
        assert!(game.join("Data/globalgamemanagers").exists());
    }

    #[test]
    fn uninstall_removes_only_dependency_subtree() {
        let tmp = tempfile::tempdir().unwrap();
        let game = tmp.path().join("game");
        fake_game(&game);

        uninstall_dependency(&game, "BepInEx").unwrap();

        assert!(!game.join("BepInEx").exists());
        assert!(game.join("Lethal Company.exe").exists());
    }

    #[test]
    fn dependency_scan_is_exact_name_match() {
        let tmp = tempfile::tempdir().unwrap();
        let game = tmp.path().join("game");
        write(&game.join("BepInExOld/readme.txt"), "not it");
        assert!(!is_dependency_installed(&game, "BepInEx").unwrap());
        fs::create_dir_all(game.join("BepInEx")).unwrap();
        assert!(is_dependency_installed(&game, "BepInEx").unwrap());
    }

    #[test]
    fn dependency_scan_without_game_dir_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let err = is_dependency_installed(&tmp.path().join("nope"), "BepInEx").unwrap_err();
        assert!(matches!(err, PipelineError::GameNotFound));
    }
}
