pub mod cache;
pub mod errors;
pub mod extract;
pub mod locator;
pub mod logging;
pub mod pipeline;
pub mod profile;
pub mod release;
pub mod settings;
pub mod sync;

pub use cache::ArtifactCache;
pub use errors::PipelineError;
pub use extract::{extract_archive, ExtractReport, SkipReason, SkippedEntry};
pub use locator::{candidate_roots, locate_game, locate_in_roots, InstallationTarget};
pub use logging::{init_logging, init_logging_to, ProgressThrottle};
pub use pipeline::{
    update_action, FailureScope, OperationHandle, OperationKind, Outcome, Pipeline,
    PipelineEvent, PipelineState, Stage, UpdateAction,
};
pub use profile::{ModpackProfile, DEPENDENCY_ARTIFACT, MODPACK_ARTIFACT};
pub use release::{GitHubRelease, ReleaseMetadata, ReleaseResolver};
pub use settings::{AppSettings, SettingsStore};
pub use sync::{
    dependency_preconditions, install_dependency_files, install_modpack_files,
    is_dependency_installed, modpack_preconditions, uninstall_dependency,
};
