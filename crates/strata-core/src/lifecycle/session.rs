//! Drives one model through its lifecycle using the shared context.
//!
//! Every stage moves the state machine first and then does the work; a
//! failure moves the model to `Error` and keeps the reason. Cancelling a
//! download is the exception: the model stays in `Downloading` so the
//! transfer can be resumed.

use super::{LifecycleState, LifecycleStateMachine};
use crate::cancel::CancellationToken;
use crate::context::ModelContext;
use crate::download::{DownloadProgress, Fetcher, ModelDownloader};
use crate::error::{DownloadError, LifecycleError, Result, StrataError};
use crate::models::{check_model_id, ModelDescriptor};
use crate::registry::ExecutionBackend;
use crate::storage::{extract_archive, required_storage_with_margin};
use crate::validation::ValidationVerdict;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Default)]
struct SessionData {
    /// Artifact produced by the latest stage (download, extraction or install).
    artifact: Option<PathBuf>,
    backend: Option<Arc<dyn ExecutionBackend>>,
    verdict: Option<ValidationVerdict>,
    last_error: Option<String>,
    /// Extraction directory protected from cache cleanup until install.
    staging: Option<PathBuf>,
}

pub struct ModelSession {
    descriptor: ModelDescriptor,
    context: Arc<ModelContext>,
    machine: Arc<LifecycleStateMachine>,
    data: Mutex<SessionData>,
}

impl ModelSession {
    pub fn new(descriptor: ModelDescriptor, context: Arc<ModelContext>) -> Self {
        let machine = Arc::new(LifecycleStateMachine::new(descriptor.id.clone()));
        Self {
            descriptor,
            context,
            machine,
            data: Mutex::new(SessionData::default()),
        }
    }

    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> LifecycleState {
        self.machine.current_state()
    }

    /// The state machine, for observers and watchers.
    pub fn machine(&self) -> &Arc<LifecycleStateMachine> {
        &self.machine
    }

    pub fn artifact_path(&self) -> Option<PathBuf> {
        self.lock().artifact.clone()
    }

    pub fn last_verdict(&self) -> Option<ValidationVerdict> {
        self.lock().verdict.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    /// `Uninitialized -> Discovered`.
    pub fn discover(&self) -> Result<()> {
        check_model_id(&self.descriptor.id)?;
        self.machine.transition_to(LifecycleState::Discovered)?;
        Ok(())
    }

    /// Fetch the artifact into `Downloads/`.
    ///
    /// Free space is checked before entering `Downloading`. A cancelled
    /// transfer leaves the model in `Downloading`; calling this again resumes.
    pub async fn download(
        &self,
        fetcher: Arc<dyn Fetcher>,
        token: &CancellationToken,
        progress: Option<mpsc::Sender<DownloadProgress>>,
    ) -> Result<PathBuf> {
        if self.descriptor.is_local {
            return Err(DownloadError::LocalModel {
                model_id: self.descriptor.id.clone(),
            }
            .into());
        }
        if self.descriptor.download_url.is_none() {
            return Err(DownloadError::NoUrl.into());
        }
        if self.state() != LifecycleState::Downloading {
            let size = self.descriptor.expected_size.unwrap_or(0);
            self.context
                .downloads
                .verify_space(required_storage_with_margin(size, self.descriptor.is_archive))?;
            self.machine.transition_to(LifecycleState::Downloading)?;
        }

        let downloader = ModelDownloader::new(Arc::clone(&self.context.downloads), fetcher);
        match downloader.download(&self.descriptor, token, progress).await {
            Ok(path) => {
                self.machine.transition_to(LifecycleState::Downloaded)?;
                self.lock().artifact = Some(path.clone());
                Ok(path)
            }
            Err(StrataError::Download(DownloadError::Cancelled)) => {
                info!(model_id = %self.descriptor.id, "Download cancelled, partial kept");
                Err(DownloadError::Cancelled.into())
            }
            Err(e) => Err(self.fail_with(e)),
        }
    }

    /// Take an artifact that is already on local storage, install and
    /// validate it, and move straight from `Discovered` to `Validated`.
    ///
    /// Only models marked local may skip the download.
    pub async fn adopt_local(&self, path: &Path) -> Result<ValidationVerdict> {
        if !self.descriptor.is_local {
            return Err(LifecycleError::NotLocal {
                model_id: self.descriptor.id.clone(),
            }
            .into());
        }
        if self.state() != LifecycleState::Discovered {
            return Err(LifecycleError::InvalidTransition {
                from: self.state(),
                to: LifecycleState::Validated,
            }
            .into());
        }

        let installed = self.install(path, false)?;
        let verdict = self.validate(&installed).await?;
        if !verdict.is_valid {
            return Err(self.reject(&verdict));
        }
        self.machine.transition_to(LifecycleState::Validated)?;
        Ok(verdict)
    }

    /// Unpack a downloaded archive into the staging area.
    ///
    /// A non-archive download is left as is and the state does not change.
    pub fn extract(&self) -> Result<PathBuf> {
        let archive = self.current_artifact()?;
        if !self.descriptor.is_archive {
            debug!(model_id = %self.descriptor.id, "Not an archive, nothing to extract");
            return Ok(archive);
        }

        self.machine.transition_to(LifecycleState::Extracting)?;
        let dest = self
            .context
            .paths
            .extract_dir()
            .join(self.descriptor.storage_key());
        self.context.downloads.track_staging(&dest, &self.descriptor.id);
        self.lock().staging = Some(dest.clone());
        match extract_archive(&archive, &dest) {
            Ok(root) => {
                self.machine.transition_to(LifecycleState::Extracted)?;
                self.lock().artifact = Some(root.clone());
                if let Err(e) = std::fs::remove_file(&archive) {
                    warn!(path = %archive.display(), error = %e, "Could not remove extracted archive");
                }
                Ok(root)
            }
            Err(e) => {
                self.release_staging();
                Err(self.fail_with(e))
            }
        }
    }

    /// Install the current artifact into `Models/` and validate it there.
    ///
    /// Only a passing verdict reaches `Validated`; a failing one ends in
    /// `Error` with the verdict kept in [`last_verdict`](Self::last_verdict).
    pub async fn install_and_validate(&self, replace_existing: bool) -> Result<ValidationVerdict> {
        let source = self.current_artifact()?;
        self.machine.transition_to(LifecycleState::Validating)?;

        let installed = self.install(&source, replace_existing)?;
        let verdict = self.validate(&installed).await?;
        if !verdict.is_valid {
            return Err(self.reject(&verdict));
        }
        self.machine.transition_to(LifecycleState::Validated)?;
        Ok(verdict)
    }

    /// Pick the first compatible backend that is registered and serves the
    /// model's modality.
    pub fn initialize(&self) -> Result<String> {
        self.machine.transition_to(LifecycleState::Initializing)?;

        let backends = &self.context.backends;
        let chosen = self
            .descriptor
            .compatible_backends
            .iter()
            .find(|key| backends.supports(key, self.descriptor.modality))
            .and_then(|key| backends.get(key).map(|backend| (key.clone(), backend)));

        let Some((key, backend)) = chosen else {
            return Err(self.fail_with(StrataError::BackendUnavailable {
                model_id: self.descriptor.id.clone(),
            }));
        };
        self.lock().backend = Some(backend);
        self.machine.transition_to(LifecycleState::Initialized)?;
        debug!(model_id = %self.descriptor.id, backend = %key, "Backend selected");
        Ok(key)
    }

    /// Load the validated artifact into the selected backend and become `Ready`.
    pub async fn load(&self) -> Result<()> {
        self.machine.transition_to(LifecycleState::Loading)?;

        let backend = self.lock().backend.clone();
        let (Some(backend), Some(path)) = (backend, self.machine.validated_path()) else {
            return Err(self.fail_with(StrataError::BackendUnavailable {
                model_id: self.descriptor.id.clone(),
            }));
        };

        if let Err(e) = backend.load(&path).await {
            return Err(self.fail_with(StrataError::Backend {
                backend: backend.name().to_string(),
                message: e.to_string(),
            }));
        }
        self.machine.transition_to(LifecycleState::Loaded)?;
        self.machine.transition_to(LifecycleState::Ready)?;
        info!(model_id = %self.descriptor.id, backend = backend.name(), "Model ready");
        Ok(())
    }

    /// Run one invocation against the loaded backend.
    ///
    /// The model is `Executing` for the duration and returns to `Ready`
    /// whether or not the invocation succeeded.
    pub async fn execute<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn ExecutionBackend>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let backend = self
            .lock()
            .backend
            .clone()
            .ok_or_else(|| StrataError::BackendUnavailable {
                model_id: self.descriptor.id.clone(),
            })?;
        self.machine.transition_to(LifecycleState::Executing)?;
        let outcome = f(backend).await;
        self.machine.transition_to(LifecycleState::Ready)?;
        outcome
    }

    /// Move to `Error`, recording `reason`.
    pub fn fail(&self, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        self.machine.transition_to(LifecycleState::Error)?;
        warn!(model_id = %self.descriptor.id, %reason, "Model failed");
        self.lock().last_error = Some(reason);
        Ok(())
    }

    /// `Error -> Discovered`, forgetting the failed attempt.
    pub fn retry(&self) -> Result<()> {
        self.machine.transition_to(LifecycleState::Discovered)?;
        self.release_staging();
        *self.lock() = SessionData::default();
        Ok(())
    }

    /// Unload if needed and return to `Uninitialized` through `Cleanup`.
    pub async fn reset(&self) -> Result<()> {
        let backend = self.lock().backend.take();
        if let Some(backend) = backend {
            if matches!(self.state(), LifecycleState::Ready | LifecycleState::Executing) {
                if let Err(e) = backend.unload().await {
                    warn!(model_id = %self.descriptor.id, error = %e, "Backend unload failed");
                }
            }
        }
        self.machine.reset()?;
        self.release_staging();
        *self.lock() = SessionData::default();
        Ok(())
    }

    fn install(&self, source: &Path, replace_existing: bool) -> Result<PathBuf> {
        let already_installed = source.starts_with(self.context.paths.models_dir());
        let installed = if already_installed {
            Ok(source.to_path_buf())
        } else {
            self.context
                .installer
                .install(&self.descriptor, source, replace_existing)
        };
        match installed {
            Ok(path) => {
                self.lock().artifact = Some(path.clone());
                self.release_staging();
                Ok(path)
            }
            Err(e) => Err(self.fail_with(e)),
        }
    }

    async fn validate(&self, installed: &Path) -> Result<ValidationVerdict> {
        let verdict = match self
            .context
            .validator
            .validate_model_async(&self.descriptor, installed)
            .await
        {
            Ok(verdict) => verdict,
            Err(e) => return Err(self.fail_with(e)),
        };
        self.machine.record_verdict(installed, verdict.is_valid);
        self.lock().verdict = Some(verdict.clone());
        Ok(verdict)
    }

    /// Stop protecting the extraction directory and remove what the install
    /// left of it.
    fn release_staging(&self) {
        let Some(dir) = self.lock().staging.take() else {
            return;
        };
        self.context.downloads.release_staging(&dir);
        if dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                warn!(path = %dir.display(), error = %e, "Could not remove staging directory");
            }
        }
    }

    fn reject(&self, verdict: &ValidationVerdict) -> StrataError {
        self.fail_with(StrataError::ValidationFailed {
            model_id: self.descriptor.id.clone(),
            error_count: verdict.errors.len(),
        })
    }

    fn current_artifact(&self) -> Result<PathBuf> {
        self.artifact_path().ok_or_else(|| StrataError::ModelNotFound {
            model_id: self.descriptor.id.clone(),
        })
    }

    /// Record `err`, move to `Error` and hand the error back.
    fn fail_with(&self, err: StrataError) -> StrataError {
        if let Err(e) = self.fail(err.to_string()) {
            debug!(model_id = %self.descriptor.id, error = %e, "Already in error state");
        }
        err
    }

    fn lock(&self) -> MutexGuard<'_, SessionData> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for ModelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSession")
            .field("model_id", &self.descriptor.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::MemoryFetcher;
    use crate::models::{Modality, ModelFormat};
    use crate::platform::{DiskProbe, DiskSpace, HostProbe};
    use crate::registry::{BackendRegistry, NullBackend};
    use std::path::Path;
    use tempfile::TempDir;
    use LifecycleState::*;

    struct Disk(u64);

    impl DiskProbe for Disk {
        fn space(&self, _path: &Path) -> Result<DiskSpace> {
            Ok(DiskSpace {
                total: self.0 * 2,
                available: self.0,
            })
        }
    }

    struct Host;

    impl HostProbe for Host {
        fn available_memory(&self) -> Option<u64> {
            Some(1 << 34)
        }

        fn os_version(&self) -> Option<String> {
            Some("14.0".into())
        }
    }

    fn gguf_bytes() -> Vec<u8> {
        let mut bytes = b"GGUF".to_vec();
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&1u64.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.resize(256, 0);
        bytes
    }

    fn context(tmp: &TempDir, free: u64) -> Arc<ModelContext> {
        let mut backends = BackendRegistry::new();
        backends.register("llama.cpp", || {
            Arc::new(NullBackend::new("llama.cpp", &[Modality::TextGeneration]))
        });
        backends.register("sherpa-onnx", || {
            Arc::new(NullBackend::new("sherpa-onnx", &[Modality::TextToSpeech]))
        });
        Arc::new(
            ModelContext::builder(tmp.path())
                .auto_create_dirs(true)
                .backends(backends)
                .disk_probe(Arc::new(Disk(free)))
                .host_probe(Arc::new(Host))
                .build()
                .unwrap(),
        )
    }

    fn descriptor() -> ModelDescriptor {
        ModelDescriptor {
            download_url: Some("https://example.com/tiny.gguf".into()),
            expected_size: Some(256),
            compatible_backends: vec!["llama.cpp".into()],
            ..ModelDescriptor::new("org/tiny", "Tiny", ModelFormat::Gguf)
        }
    }

    #[tokio::test]
    async fn test_full_lifecycle_to_execution() {
        let tmp = TempDir::new().unwrap();
        let session = ModelSession::new(descriptor(), context(&tmp, 1 << 30));

        session.discover().unwrap();
        session
            .download(Arc::new(MemoryFetcher::new(gguf_bytes())), &CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(session.state(), Downloaded);

        // Not an archive: extraction is skipped and validation follows the download.
        let downloaded = session.extract().unwrap();
        assert_eq!(session.artifact_path(), Some(downloaded));
        assert_eq!(session.state(), Downloaded);

        let verdict = session.install_and_validate(false).await.unwrap();
        assert!(verdict.is_valid, "{:?}", verdict.errors);
        assert_eq!(session.state(), Validated);

        assert_eq!(session.initialize().unwrap(), "llama.cpp");
        session.load().await.unwrap();
        assert_eq!(session.state(), Ready);

        let name = session
            .execute(|backend| async move { Ok(backend.name().to_string()) })
            .await
            .unwrap();
        assert_eq!(name, "llama.cpp");
        assert_eq!(session.state(), Ready);

        session.reset().await.unwrap();
        assert_eq!(session.state(), Uninitialized);
    }

    #[tokio::test]
    async fn test_insufficient_space_stays_discovered() {
        let tmp = TempDir::new().unwrap();
        let session = ModelSession::new(descriptor(), context(&tmp, 10));
        session.discover().unwrap();

        let err = session
            .download(Arc::new(MemoryFetcher::new(gguf_bytes())), &CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StrataError::Storage(crate::error::StorageError::InsufficientSpace { .. })
        ));
        assert_eq!(session.state(), Discovered);
    }

    #[tokio::test]
    async fn test_cancel_keeps_downloading() {
        let tmp = TempDir::new().unwrap();
        let session = ModelSession::new(descriptor(), context(&tmp, 1 << 30));
        session.discover().unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let fetcher = Arc::new(MemoryFetcher::new(gguf_bytes()));
        let err = session.download(fetcher.clone(), &token, None).await.unwrap_err();
        assert!(matches!(err, StrataError::Download(DownloadError::Cancelled)));
        assert_eq!(session.state(), Downloading);

        session
            .download(fetcher, &CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(session.state(), Downloaded);
    }

    #[tokio::test]
    async fn test_invalid_artifact_ends_in_error_and_retry() {
        let tmp = TempDir::new().unwrap();
        let d = ModelDescriptor {
            expected_size: None,
            ..descriptor()
        };
        let session = ModelSession::new(d, context(&tmp, 1 << 30));
        session.discover().unwrap();
        session
            .download(
                Arc::new(MemoryFetcher::new(b"not a model at all".to_vec())),
                &CancellationToken::new(),
                None,
            )
            .await
            .unwrap();

        let err = session.install_and_validate(false).await.unwrap_err();
        assert!(matches!(err, StrataError::ValidationFailed { .. }));
        assert_eq!(session.state(), Error);
        assert!(!session.last_verdict().unwrap().is_valid);
        assert!(session.last_error().is_some());

        session.retry().unwrap();
        assert_eq!(session.state(), Discovered);
        assert!(session.last_verdict().is_none());
    }

    #[tokio::test]
    async fn test_adopt_local_skips_download() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("incoming.gguf");
        std::fs::write(&source, gguf_bytes()).unwrap();

        let d = ModelDescriptor {
            is_local: true,
            download_url: None,
            ..descriptor()
        };
        let session = ModelSession::new(d, context(&tmp, 1 << 30));
        session.discover().unwrap();
        session.adopt_local(&source).await.unwrap();
        assert_eq!(session.state(), Validated);
        assert!(session
            .artifact_path()
            .unwrap()
            .starts_with(tmp.path().join("Models")));
    }

    #[tokio::test]
    async fn test_unregistered_backend_fails_validation() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("incoming.gguf");
        std::fs::write(&source, gguf_bytes()).unwrap();
        let d = ModelDescriptor {
            is_local: true,
            compatible_backends: vec!["missing".into()],
            ..descriptor()
        };
        let session = ModelSession::new(d, context(&tmp, 1 << 30));
        session.discover().unwrap();

        // Unregistered backend is reported as a missing dependency.
        assert!(session.adopt_local(&source).await.is_err());
        assert_eq!(session.state(), Error);
    }

    #[tokio::test]
    async fn test_adopt_local_requires_local_model() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("incoming.gguf");
        std::fs::write(&source, gguf_bytes()).unwrap();
        let session = ModelSession::new(descriptor(), context(&tmp, 1 << 30));
        session.discover().unwrap();

        let err = session.adopt_local(&source).await.unwrap_err();
        assert!(matches!(
            err,
            StrataError::Lifecycle(LifecycleError::NotLocal { .. })
        ));
        assert_eq!(session.state(), Discovered);
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_local_model_refuses_download() {
        let tmp = TempDir::new().unwrap();
        let d = ModelDescriptor {
            is_local: true,
            ..descriptor()
        };
        let session = ModelSession::new(d, context(&tmp, 1 << 30));
        session.discover().unwrap();

        let err = session
            .download(Arc::new(MemoryFetcher::new(gguf_bytes())), &CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StrataError::Download(DownloadError::LocalModel { .. })
        ));
        assert_eq!(session.state(), Discovered);
    }

    fn voice_archive() -> Vec<u8> {
        let mut onnx = vec![0x08, 0x07, 0x12, 0x04];
        onnx.extend_from_slice(b"onnx-voice-graph");
        onnx.resize(128, 0);

        let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, bytes) in [("voice/model.onnx", onnx.as_slice()), ("voice/tokens.txt", b"a 0\n".as_slice())] {
            let mut header = tar::Header::new_gnu();
            header.set_size(bytes.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, bytes).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[tokio::test]
    async fn test_archived_onnx_reaches_ready() {
        let tmp = TempDir::new().unwrap();
        let archive = voice_archive();
        let d = ModelDescriptor {
            download_url: Some("https://example.com/voice.tar.gz".into()),
            expected_size: Some(archive.len() as u64),
            is_archive: true,
            modality: Modality::TextToSpeech,
            compatible_backends: vec!["sherpa-onnx".into()],
            tags: vec!["sherpa-tts".into()],
            ..ModelDescriptor::new("voices/en-amy", "Amy", ModelFormat::Onnx)
        };
        let staging = tmp.path().join("Downloads/Extracted").join(d.storage_key());
        let context = context(&tmp, 1 << 30);
        let session = ModelSession::new(d, Arc::clone(&context));

        session.discover().unwrap();
        session
            .download(Arc::new(MemoryFetcher::new(archive)), &CancellationToken::new(), None)
            .await
            .unwrap();

        let root = session.extract().unwrap();
        assert_eq!(session.state(), Extracted);
        assert!(root.join("model.onnx").is_file());
        assert!(context.downloads.is_staged(&root));

        let verdict = session.install_and_validate(false).await.unwrap();
        assert!(verdict.is_valid, "{:?}", verdict.errors);
        assert_eq!(session.state(), Validated);
        assert!(!context.downloads.is_staged(&staging));
        assert!(!staging.exists());

        assert_eq!(session.initialize().unwrap(), "sherpa-onnx");
        session.load().await.unwrap();
        assert_eq!(session.state(), Ready);
        let installed = session.artifact_path().unwrap();
        assert!(installed.starts_with(tmp.path().join("Models")));
        assert!(installed.join("tokens.txt").is_file());
    }
}
