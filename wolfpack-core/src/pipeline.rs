use crate::cache::ArtifactCache;
use crate::errors::PipelineError;
use crate::extract::ExtractReport;
use crate::locator::{self, InstallationTarget};
use crate::profile::{ModpackProfile, DEPENDENCY_ARTIFACT, MODPACK_ARTIFACT};
use crate::release::{ReleaseMetadata, ReleaseResolver};
use crate::settings::SettingsStore;
use crate::sync;
use humansize::{format_size, DECIMAL};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    InstallModpack,
    InstallDependency,
    Update,
    Uninstall,
    CheckForUpdate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    LocatingGame,
    CheckingDependency,
    DownloadingDependency,
    ExtractingDependency,
    InstallingDependency,
    FetchingMetadata,
    DownloadingModpack,
    ExtractingModpack,
    InstallingModpack,
    Uninstalling,
    Done,
    Error,
    Canceled,
}

impl Stage {
    /// Terminal stages admit a new operation; everything else holds the
    /// exclusivity guard on the target directory.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Idle | Stage::Done | Stage::Error | Stage::Canceled)
    }
}

/// Whether a failure happened before or after the pipeline started writing
/// to the target directory. Pre-flight failures are always safe to retry;
/// partially-applied ones may need manual cleanup first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureScope {
    Preflight,
    PartiallyApplied,
}

#[derive(Debug)]
pub enum Outcome {
    Done,
    UpToDate,
    OutOfDate(String),
    Canceled,
    Failed { stage: Stage, scope: FailureScope, error: PipelineError },
}

#[derive(Debug)]
pub enum PipelineEvent {
    StageStarted(Stage),
    Progress { stage: Stage, message: String, percent: u8 },
    /// `extraction` is set for the extract stages so hosts can inspect
    /// skipped entries before the install stage runs.
    StageCompleted { stage: Stage, extraction: Option<ExtractReport> },
    Finished(Outcome),
}

#[derive(Debug, Clone)]
pub struct PipelineState {
    pub stage: Stage,
    pub operation: Option<OperationKind>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self { stage: Stage::Idle, operation: None }
    }
}

/// What the update operation should do given the installed and latest tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateAction {
    UpToDate,
    Proceed,
}

pub fn update_action(installed: Option<&str>, latest: &str) -> UpdateAction {
    match installed {
        Some(tag) if tag == latest => UpdateAction::UpToDate,
        _ => UpdateAction::Proceed,
    }
}

/// Handle to a running operation: the event stream plus the worker join
/// handle. Dropping the handle does not cancel the operation.
#[derive(Debug)]
pub struct OperationHandle {
    pub events: Receiver<PipelineEvent>,
    join: JoinHandle<()>,
}

impl OperationHandle {
    /// Drain events until the terminal one and return it.
    pub fn wait(self) -> Outcome {
        let mut outcome = None;
        for event in self.events.iter() {
            if let PipelineEvent::Finished(o) = event {
                outcome = Some(o);
            }
        }
        let _ = self.join.join();
        outcome.unwrap_or(Outcome::Failed {
            stage: Stage::Error,
            scope: FailureScope::Preflight,
            error: PipelineError::Install("pipeline worker terminated without a result".into()),
        })
    }
}

/// Drives install/update operations as a strict sequence of stages.
///
/// One operation at a time: starting a second while the state is
/// non-terminal is rejected, which is also what keeps two writers out of
/// the target directory's subfolders.
pub struct Pipeline {
    profile: ModpackProfile,
    cache: ArtifactCache,
    store: SettingsStore,
    state: Arc<Mutex<PipelineState>>,
    cancel: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(profile: ModpackProfile, cache: ArtifactCache, store: SettingsStore) -> Self {
        Self {
            profile,
            cache,
            store,
            state: Arc::new(Mutex::new(PipelineState::default())),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state.lock().map(|st| st.clone()).unwrap_or_default()
    }

    pub fn is_busy(&self) -> bool {
        !self.state().stage.is_terminal()
    }

    /// Request cancellation. The in-flight stage finishes; no later stage
    /// starts. Side effects already applied by that stage are not rolled
    /// back.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn start(&self, op: OperationKind) -> Result<OperationHandle, PipelineError> {
        let first = first_stage(op);
        {
            let mut st = self
                .state
                .lock()
                .map_err(|_| PipelineError::Install("pipeline state poisoned".into()))?;
            if !st.stage.is_terminal() {
                return Err(PipelineError::OperationInProgress);
            }
            *st = PipelineState { stage: first, operation: Some(op) };
        }
        self.cancel.store(false, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel();
        let worker = Worker {
            profile: self.profile.clone(),
            cache: self.cache.clone(),
            resolver: ReleaseResolver::new(),
            store: self.store.clone(),
            state: Arc::clone(&self.state),
            cancel: Arc::clone(&self.cancel),
            tx,
            current: first,
            target_mutated: false,
        };

        let spawned = std::thread::Builder::new()
            .name("wolfpack-pipeline".into())
            .spawn(move || match tokio::runtime::Runtime::new() {
                Ok(rt) => rt.block_on(worker.run(op)),
                Err(e) => worker.fail_to_start(e),
            });
        let join = match spawned {
            Ok(join) => join,
            Err(e) => {
                // no worker exists yet to terminalize the state; release the
                // guard here or every later start is rejected
                self.release_guard();
                return Err(PipelineError::Io(e));
            }
        };

        Ok(OperationHandle { events: rx, join })
    }

    fn release_guard(&self) {
        if let Ok(mut st) = self.state.lock() {
            *st = PipelineState::default();
        }
    }
}

fn first_stage(op: OperationKind) -> Stage {
    match op {
        OperationKind::CheckForUpdate => Stage::FetchingMetadata,
        _ => Stage::LocatingGame,
    }
}

struct Worker {
    profile: ModpackProfile,
    cache: ArtifactCache,
    resolver: ReleaseResolver,
    store: SettingsStore,
    state: Arc<Mutex<PipelineState>>,
    cancel: Arc<AtomicBool>,
    tx: Sender<PipelineEvent>,
    current: Stage,
    target_mutated: bool,
}

impl Worker {
    async fn run(mut self, op: OperationKind) {
        let outcome = match self.drive(op).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let scope = if self.target_mutated {
                    FailureScope::PartiallyApplied
                } else {
                    FailureScope::Preflight
                };
                error!("Operation {:?} failed during {:?}: {e}", op, self.current);
                Outcome::Failed { stage: self.current, scope, error: e }
            }
        };
        self.finish(outcome);
    }

    fn fail_to_start(self, e: std::io::Error) {
        self.finish(Outcome::Failed {
            stage: Stage::Idle,
            scope: FailureScope::Preflight,
            error: PipelineError::Io(e),
        });
    }

    fn finish(&self, outcome: Outcome) {
        let terminal = match &outcome {
            Outcome::Done | Outcome::UpToDate | Outcome::OutOfDate(_) => Stage::Done,
            Outcome::Canceled => Stage::Canceled,
            Outcome::Failed { .. } => Stage::Error,
        };
        if let Ok(mut st) = self.state.lock() {
            st.stage = terminal;
        }
        let _ = self.tx.send(PipelineEvent::Finished(outcome));
    }

    async fn drive(&mut self, op: OperationKind) -> Result<Outcome, PipelineError> {
        match op {
            OperationKind::InstallModpack => self.install_modpack().await,
            OperationKind::InstallDependency => self.install_dependency().await,
            OperationKind::Update => self.update().await,
            OperationKind::Uninstall => self.uninstall().await,
            OperationKind::CheckForUpdate => self.check_for_update().await,
        }
    }

    /// Returns true when a cancel request arrived; the caller terminalizes.
    fn begin(&mut self, stage: Stage) -> bool {
        if self.cancel.load(Ordering::SeqCst) {
            info!("Cancel requested; stopping before {:?}", stage);
            return true;
        }
        self.current = stage;
        if let Ok(mut st) = self.state.lock() {
            st.stage = stage;
        }
        let _ = self.tx.send(PipelineEvent::StageStarted(stage));
        false
    }

    fn complete(&self, stage: Stage, extraction: Option<ExtractReport>) {
        let _ = self.tx.send(PipelineEvent::StageCompleted { stage, extraction });
    }

    fn progress_sender(&self) -> impl FnMut(&str, u8) + Send + 'static {
        let tx = self.tx.clone();
        let stage = self.current;
        move |message: &str, percent: u8| {
            let _ = tx.send(PipelineEvent::Progress {
                stage,
                message: message.to_string(),
                percent,
            });
        }
    }

    fn log_skips(&self, report: &ExtractReport) {
        for skipped in &report.skipped {
            warn!("Extraction skipped {}: {:?}", skipped.name, skipped.reason);
        }
    }

    fn locate_target(&self) -> Result<InstallationTarget, PipelineError> {
        let settings = self.store.load().unwrap_or_default();
        let target = match settings.manually_specified_game_path {
            Some(p) if Path::new(&p).is_dir() => InstallationTarget::new(PathBuf::from(p)),
            _ => locator::locate_game(&self.profile.game_name)?,
        };
        if let Some(free) = target.available_space() {
            info!(
                "{} free on {}",
                format_size(free, DECIMAL),
                target.drive_root.display()
            );
        }
        Ok(target)
    }

    async fn install_modpack(&mut self) -> Result<Outcome, PipelineError> {
        if self.begin(Stage::LocatingGame) {
            return Ok(Outcome::Canceled);
        }
        let target = self.locate_target()?;
        self.complete(Stage::LocatingGame, None);

        if self.begin(Stage::CheckingDependency) {
            return Ok(Outcome::Canceled);
        }
        let has_dependency =
            sync::is_dependency_installed(&target.path, &self.profile.dependency_name)?;
        self.complete(Stage::CheckingDependency, None);

        if !has_dependency {
            if let Some(early) = self.dependency_stages(&target).await? {
                return Ok(early);
            }
        }

        if self.begin(Stage::FetchingMetadata) {
            return Ok(Outcome::Canceled);
        }
        let latest = self
            .resolver
            .resolve_latest(&self.profile.owner, &self.profile.repo)
            .await?;
        info!("Latest release: {}", latest.tag);
        self.complete(Stage::FetchingMetadata, None);

        if let Some(early) = self.modpack_stages(&target, &latest).await? {
            return Ok(early);
        }
        Ok(Outcome::Done)
    }

    async fn install_dependency(&mut self) -> Result<Outcome, PipelineError> {
        if self.begin(Stage::LocatingGame) {
            return Ok(Outcome::Canceled);
        }
        let target = self.locate_target()?;
        self.complete(Stage::LocatingGame, None);

        if let Some(early) = self.dependency_stages(&target).await? {
            return Ok(early);
        }
        Ok(Outcome::Done)
    }

    async fn update(&mut self) -> Result<Outcome, PipelineError> {
        if self.begin(Stage::LocatingGame) {
            return Ok(Outcome::Canceled);
        }
        let target = self.locate_target()?;
        self.complete(Stage::LocatingGame, None);

        if self.begin(Stage::FetchingMetadata) {
            return Ok(Outcome::Canceled);
        }
        let latest = self
            .resolver
            .resolve_latest(&self.profile.owner, &self.profile.repo)
            .await?;
        let installed = self.store.load().unwrap_or_default().installed_tag;
        self.complete(Stage::FetchingMetadata, None);

        if update_action(installed.as_deref(), &latest.tag) == UpdateAction::UpToDate {
            info!("Modpack already up to date at {}", latest.tag);
            return Ok(Outcome::UpToDate);
        }
        info!(
            "Update available: {} -> {}",
            installed.as_deref().unwrap_or("none"),
            latest.tag
        );
        // the cached modpack archive belongs to the old tag; this is the one
        // case where presence-only freshness is provably wrong
        self.cache.invalidate(MODPACK_ARTIFACT)?;

        if let Some(early) = self.modpack_stages(&target, &latest).await? {
            return Ok(early);
        }
        Ok(Outcome::Done)
    }

    async fn uninstall(&mut self) -> Result<Outcome, PipelineError> {
        if self.begin(Stage::LocatingGame) {
            return Ok(Outcome::Canceled);
        }
        let target = self.locate_target()?;
        self.complete(Stage::LocatingGame, None);

        if self.begin(Stage::Uninstalling) {
            return Ok(Outcome::Canceled);
        }
        self.target_mutated = true;
        let game_dir = target.path.clone();
        let dependency = self.profile.dependency_name.clone();
        tokio::task::spawn_blocking(move || sync::uninstall_dependency(&game_dir, &dependency))
            .await
            .map_err(|e| PipelineError::Install(format!("uninstall worker: {e}")))??;
        self.complete(Stage::Uninstalling, None);
        Ok(Outcome::Done)
    }

    async fn check_for_update(&mut self) -> Result<Outcome, PipelineError> {
        if self.begin(Stage::FetchingMetadata) {
            return Ok(Outcome::Canceled);
        }
        let latest = self
            .resolver
            .resolve_latest(&self.profile.owner, &self.profile.repo)
            .await?;
        self.complete(Stage::FetchingMetadata, None);

        let installed = self.store.load().unwrap_or_default().installed_tag;
        Ok(match update_action(installed.as_deref(), &latest.tag) {
            UpdateAction::UpToDate => Outcome::UpToDate,
            UpdateAction::Proceed => Outcome::OutOfDate(latest.tag),
        })
    }

    /// Download → extract → install for the runtime dependency. Returns
    /// `Some(outcome)` when the sequence ended early (cancel).
    async fn dependency_stages(
        &mut self,
        target: &InstallationTarget,
    ) -> Result<Option<Outcome>, PipelineError> {
        if self.begin(Stage::DownloadingDependency) {
            return Ok(Some(Outcome::Canceled));
        }
        let mut progress = self.progress_sender();
        self.cache
            .ensure_downloaded(&self.profile.dependency_url, DEPENDENCY_ARTIFACT, &mut progress)
            .await?;
        self.complete(Stage::DownloadingDependency, None);

        if self.begin(Stage::ExtractingDependency) {
            return Ok(Some(Outcome::Canceled));
        }
        let cache = self.cache.clone();
        let mut progress = self.progress_sender();
        let (files_dir, report) = tokio::task::spawn_blocking(move || {
            cache.ensure_extracted(DEPENDENCY_ARTIFACT, &mut progress)
        })
        .await
        .map_err(|e| PipelineError::Install(format!("extract worker: {e}")))??;
        self.log_skips(&report);
        self.complete(Stage::ExtractingDependency, Some(report));

        if self.begin(Stage::InstallingDependency) {
            return Ok(Some(Outcome::Canceled));
        }
        sync::dependency_preconditions(&files_dir, &target.path)?;
        self.target_mutated = true;
        let game_dir = target.path.clone();
        let profile = self.profile.clone();
        let mut progress = self.progress_sender();
        tokio::task::spawn_blocking(move || {
            sync::install_dependency_files(&files_dir, &game_dir, &profile, &mut progress)
        })
        .await
        .map_err(|e| PipelineError::Install(format!("install worker: {e}")))??;
        // hosts watch for this completion to run the game's one-time
        // bootstrap launch of the freshly installed dependency
        self.complete(Stage::InstallingDependency, None);
        Ok(None)
    }

    /// Download → extract → install for the modpack release, then record the
    /// installed version.
    async fn modpack_stages(
        &mut self,
        target: &InstallationTarget,
        latest: &ReleaseMetadata,
    ) -> Result<Option<Outcome>, PipelineError> {
        if self.begin(Stage::DownloadingModpack) {
            return Ok(Some(Outcome::Canceled));
        }
        let mut progress = self.progress_sender();
        self.cache
            .ensure_downloaded(&latest.archive_url, MODPACK_ARTIFACT, &mut progress)
            .await?;
        self.complete(Stage::DownloadingModpack, None);

        if self.begin(Stage::ExtractingModpack) {
            return Ok(Some(Outcome::Canceled));
        }
        let cache = self.cache.clone();
        let mut progress = self.progress_sender();
        let (files_dir, report) = tokio::task::spawn_blocking(move || {
            cache.ensure_extracted(MODPACK_ARTIFACT, &mut progress)
        })
        .await
        .map_err(|e| PipelineError::Install(format!("extract worker: {e}")))??;
        self.log_skips(&report);
        self.complete(Stage::ExtractingModpack, Some(report));

        if self.begin(Stage::InstallingModpack) {
            return Ok(Some(Outcome::Canceled));
        }
        sync::modpack_preconditions(&files_dir, &target.path, &self.profile)?;
        self.target_mutated = true;
        let game_dir = target.path.clone();
        let profile = self.profile.clone();
        let mut progress = self.progress_sender();
        tokio::task::spawn_blocking(move || {
            sync::install_modpack_files(&files_dir, &game_dir, &profile, &mut progress)
        })
        .await
        .map_err(|e| PipelineError::Install(format!("install worker: {e}")))??;
        self.complete(Stage::InstallingModpack, None);

        self.record_installed(latest);
        Ok(None)
    }

    fn record_installed(&self, latest: &ReleaseMetadata) {
        let mut settings = self.store.load().unwrap_or_default();
        settings.installed_tag = Some(latest.tag.clone());
        settings.installed_changelog = Some(latest.changelog.clone());
        settings.first_run = false;
        if let Err(e) = self.store.save(&settings) {
            warn!("Failed to record installed version: {e}");
        }
    }
}
