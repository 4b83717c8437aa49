//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tokio::time::sleep;
use uuid::Uuid;

use crate::node::{CommandOutput, CommandRunner, MountError, MountExecutor};
use crate::provider::{
    CloudStorageClient, CreateVolumeSpec, OperationHandle, OperationStatus, ProviderError,
    ProviderFuture, ProviderVolume, VolumeCreation,
};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Provider calls counted by [`FakeCloud`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FakeCall {
    /// `create_volume`.
    Create,
    /// `delete_volume`.
    Delete,
    /// `attach_volume`.
    Attach,
    /// `detach_volume`.
    Detach,
    /// `get_operation`.
    GetOperation,
    /// `list_volumes`.
    List,
}

#[derive(Debug)]
struct FakeState {
    volumes: BTreeMap<String, ProviderVolume>,
    operations: HashMap<String, VecDeque<OperationStatus>>,
    script: Vec<OperationStatus>,
    failures: HashMap<FakeCall, VecDeque<ProviderError>>,
    calls: HashMap<FakeCall, usize>,
    latency: Duration,
    next_volume: u64,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            volumes: BTreeMap::new(),
            operations: HashMap::new(),
            script: vec![OperationStatus::Succeeded],
            failures: HashMap::new(),
            calls: HashMap::new(),
            latency: Duration::ZERO,
            next_volume: 1000,
        }
    }
}

impl FakeState {
    fn start_operation(&mut self) -> (OperationHandle, bool) {
        let handle = OperationHandle::new(Uuid::new_v4().to_string());
        let succeeds = matches!(self.script.last(), None | Some(OperationStatus::Succeeded));
        self.operations
            .insert(handle.id.clone(), self.script.iter().cloned().collect());
        (handle, succeeds)
    }

    fn volume_mut(&mut self, volume_id: &str) -> Result<&mut ProviderVolume, ProviderError> {
        self.volumes
            .get_mut(volume_id)
            .ok_or_else(|| ProviderError::NotFound {
                resource: String::from("volume"),
                id: volume_id.to_owned(),
            })
    }
}

/// In-memory [`CloudStorageClient`] with scripted jobs, injectable failures
/// and call counters.
///
/// Side effects of attach, detach and create apply immediately when the
/// scripted job ends in success.
#[derive(Clone, Debug, Default)]
pub struct FakeCloud {
    state: Arc<Mutex<FakeState>>,
}

impl FakeCloud {
    /// Creates an empty cloud whose jobs succeed on the first poll.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Statuses every subsequently started job reports, in order; the last
    /// one repeats.
    pub fn script_operations(&self, statuses: Vec<OperationStatus>) {
        lock(&self.state).script = statuses;
    }

    /// Delay applied to every call before it takes effect.
    pub fn set_latency(&self, latency: Duration) {
        lock(&self.state).latency = latency;
    }

    /// Makes the next `call` fail with `error`. Queued errors are consumed in
    /// order.
    pub fn fail_next(&self, call: FakeCall, error: ProviderError) {
        lock(&self.state)
            .failures
            .entry(call)
            .or_default()
            .push_back(error);
    }

    /// Registers a pre-existing volume.
    pub fn seed_volume(&self, volume: ProviderVolume) {
        lock(&self.state).volumes.insert(volume.id.clone(), volume);
    }

    /// Registers a job reporting `statuses` in order; the last one repeats.
    #[must_use]
    pub fn push_operation(&self, statuses: Vec<OperationStatus>) -> OperationHandle {
        let handle = OperationHandle::new(Uuid::new_v4().to_string());
        lock(&self.state)
            .operations
            .insert(handle.id.clone(), statuses.into_iter().collect());
        handle
    }

    /// Number of times `call` was invoked.
    #[must_use]
    pub fn calls(&self, call: FakeCall) -> usize {
        lock(&self.state).calls.get(&call).copied().unwrap_or_default()
    }

    /// Provider-side view of a volume.
    #[must_use]
    pub fn volume(&self, volume_id: &str) -> Option<ProviderVolume> {
        lock(&self.state).volumes.get(volume_id).cloned()
    }

    /// Number of volumes held by the provider.
    #[must_use]
    pub fn volume_count(&self) -> usize {
        lock(&self.state).volumes.len()
    }

    async fn enter(&self, call: FakeCall) -> Result<(), ProviderError> {
        let (latency, failure) = {
            let mut state = lock(&self.state);
            *state.calls.entry(call).or_default() += 1;
            let failure = state
                .failures
                .get_mut(&call)
                .and_then(VecDeque::pop_front);
            (state.latency, failure)
        };
        if !latency.is_zero() {
            sleep(latency).await;
        }
        failure.map_or(Ok(()), Err)
    }
}

impl CloudStorageClient for FakeCloud {
    fn create_volume<'a>(&'a self, spec: &'a CreateVolumeSpec) -> ProviderFuture<'a, VolumeCreation> {
        Box::pin(async move {
            self.enter(FakeCall::Create).await?;
            let mut state = lock(&self.state);
            state.next_volume += 1;
            let id = state.next_volume.to_string();
            let volume = ProviderVolume {
                linux_device: format!("/dev/disk/by-id/scsi-0HC_Volume_{id}"),
                id,
                name: spec.name.clone(),
                size_gb: spec.size_gb,
                location: spec.location.clone(),
                server_id: None,
            };
            let (operation, succeeds) = state.start_operation();
            if succeeds {
                state.volumes.insert(volume.id.clone(), volume.clone());
            }
            Ok(VolumeCreation {
                volume,
                operation: Some(operation),
            })
        })
    }

    fn delete_volume<'a>(&'a self, volume_id: &'a str) -> ProviderFuture<'a, Option<OperationHandle>> {
        Box::pin(async move {
            self.enter(FakeCall::Delete).await?;
            let mut state = lock(&self.state);
            if let Some(server) = state.volume_mut(volume_id)?.server_id.clone() {
                return Err(ProviderError::Rejected {
                    code: String::from("volume_attached"),
                    message: format!("volume {volume_id} is attached to server {server}"),
                });
            }
            state.volumes.remove(volume_id);
            Ok(None)
        })
    }

    fn attach_volume<'a>(
        &'a self,
        volume_id: &'a str,
        server_id: &'a str,
    ) -> ProviderFuture<'a, OperationHandle> {
        Box::pin(async move {
            self.enter(FakeCall::Attach).await?;
            let mut state = lock(&self.state);
            if let Some(current) = state.volume_mut(volume_id)?.server_id.clone()
                && current != server_id
            {
                return Err(ProviderError::Rejected {
                    code: String::from("volume_already_attached"),
                    message: format!("volume {volume_id} is attached to server {current}"),
                });
            }
            let (operation, succeeds) = state.start_operation();
            if succeeds {
                state.volume_mut(volume_id)?.server_id = Some(server_id.to_owned());
            }
            Ok(operation)
        })
    }

    fn detach_volume<'a>(&'a self, volume_id: &'a str) -> ProviderFuture<'a, OperationHandle> {
        Box::pin(async move {
            self.enter(FakeCall::Detach).await?;
            let mut state = lock(&self.state);
            state.volume_mut(volume_id)?;
            let (operation, succeeds) = state.start_operation();
            if succeeds {
                state.volume_mut(volume_id)?.server_id = None;
            }
            Ok(operation)
        })
    }

    fn get_operation<'a>(
        &'a self,
        handle: &'a OperationHandle,
    ) -> ProviderFuture<'a, OperationStatus> {
        Box::pin(async move {
            self.enter(FakeCall::GetOperation).await?;
            let mut state = lock(&self.state);
            let statuses = state
                .operations
                .get_mut(&handle.id)
                .ok_or_else(|| ProviderError::NotFound {
                    resource: String::from("action"),
                    id: handle.id.clone(),
                })?;
            let status = if statuses.len() > 1 {
                statuses.pop_front()
            } else {
                statuses.front().cloned()
            };
            Ok(status.unwrap_or(OperationStatus::Succeeded))
        })
    }

    fn list_volumes(&self) -> ProviderFuture<'_, Vec<ProviderVolume>> {
        Box::pin(async move {
            self.enter(FakeCall::List).await?;
            Ok(lock(&self.state).volumes.values().cloned().collect())
        })
    }
}

#[derive(Debug, Default)]
struct MounterState {
    mounts: BTreeMap<Utf8PathBuf, String>,
    calls: Vec<String>,
    failure: Option<MountError>,
}

/// In-memory [`MountExecutor`] that records calls and tracks mount points.
#[derive(Clone, Debug, Default)]
pub struct RecordingMounter {
    state: Arc<Mutex<MounterState>>,
}

impl RecordingMounter {
    /// Creates a mounter with an empty mount table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls made so far, rendered as `operation arg...`.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }

    /// Source mounted at `target`, if any.
    #[must_use]
    pub fn source_of(&self, target: &Utf8Path) -> Option<String> {
        lock(&self.state).mounts.get(target).cloned()
    }

    /// Marks `target` as already mounted from `source`.
    pub fn mark_mounted(&self, target: &Utf8Path, source: &str) {
        lock(&self.state)
            .mounts
            .insert(target.to_path_buf(), source.to_owned());
    }

    /// Makes the next mutating call fail with `error`.
    pub fn fail_next(&self, error: MountError) {
        lock(&self.state).failure = Some(error);
    }

    fn record(&self, call: String, mount: Option<(&Utf8Path, &str)>) -> Result<(), MountError> {
        let mut state = lock(&self.state);
        state.calls.push(call);
        if let Some(error) = state.failure.take() {
            return Err(error);
        }
        if let Some((target, source)) = mount {
            state.mounts.insert(target.to_path_buf(), source.to_owned());
        }
        Ok(())
    }
}

impl MountExecutor for RecordingMounter {
    fn is_mounted(&self, target: &Utf8Path) -> Result<bool, MountError> {
        Ok(lock(&self.state).mounts.contains_key(target))
    }

    fn format_and_mount(
        &self,
        device: &str,
        target: &Utf8Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<(), MountError> {
        let mut call = format!("format_and_mount {device} {target} {fs_type}");
        if !options.is_empty() {
            call.push_str(&format!(" {}", options.join(",")));
        }
        self.record(call, Some((target, device)))
    }

    fn bind_mount(
        &self,
        source: &Utf8Path,
        target: &Utf8Path,
        readonly: bool,
    ) -> Result<(), MountError> {
        let mode = if readonly { "ro" } else { "rw" };
        self.record(
            format!("bind_mount {source} {target} {mode}"),
            Some((target, source.as_str())),
        )
    }

    fn unmount(&self, target: &Utf8Path) -> Result<(), MountError> {
        self.record(format!("unmount {target}"), None)?;
        lock(&self.state).mounts.remove(target);
        Ok(())
    }
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    responses: VecDeque<CommandOutput>,
    invocations: Vec<CommandInvocation>,
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.state).invocations.clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a specific exit code.
    pub fn push_exit_code(&self, code: i32) {
        self.push_output(Some(code), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        lock(&self.state).responses.push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, MountError> {
        let mut state = lock(&self.state);
        state.invocations.push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        state
            .responses
            .pop_front()
            .ok_or_else(|| MountError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets and clears environment variables while holding a global mutex.
    /// A `None` value removes the variable for the guard's lifetime.
    pub async fn set_vars(pairs: &[(&str, Option<&str>)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe {
                match value {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
