use serde::{Deserialize, Serialize};

/// Cache entry name for the modpack archive.
pub const MODPACK_ARTIFACT: &str = "latest_release";
/// Cache entry name for the runtime dependency archive.
pub const DEPENDENCY_ARTIFACT: &str = "dependency";

/// Everything that identifies one modpack deployment: where releases come
/// from, which game they target and which runtime dependency must be present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModpackProfile {
    /// GitHub owner of the modpack release feed.
    pub owner: String,
    /// GitHub repository of the modpack release feed.
    pub repo: String,
    /// Folder name of the game under a Steam library's `common` directory.
    pub game_name: String,
    /// Folder the dependency creates inside the game directory.
    pub dependency_name: String,
    /// Pinned download URL for the dependency archive; the version lives in
    /// the URL itself, no metadata fetch precedes it.
    pub dependency_url: String,
    /// Wrapper directory inside the dependency archive whose contents are
    /// merged into the game directory.
    pub dependency_package_dir: String,
    /// Subfolders of the dependency directory the modpack sync owns
    /// exclusively. Everything else is left untouched.
    pub synced_folders: Vec<String>,
}

impl Default for ModpackProfile {
    fn default() -> Self {
        Self {
            owner: "m-riley04".to_string(),
            repo: "TheWolfPack".to_string(),
            game_name: "Lethal Company".to_string(),
            dependency_name: "BepInEx".to_string(),
            dependency_url: "https://thunderstore.io/package/download/BepInEx/BepInExPack/5.4.2100/"
                .to_string(),
            dependency_package_dir: "BepInExPack".to_string(),
            synced_folders: vec![
                "plugins".to_string(),
                "config".to_string(),
                "patchers".to_string(),
            ],
        }
    }
}
