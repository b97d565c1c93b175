//! Runs the historian as a child process.
//!
//! Each installed instance gets a private working directory holding its
//! configuration (`historian.json`) and the health file it is asked to write
//! (`historian.health`). The binary is launched as
//! `<binary> --config <file> --identity <identity> --health-file <file>`.

use std::collections::BTreeMap;
use std::env;
use std::ffi::{OsStr, OsString};
use std::io;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs::Dir;
use tempfile::TempDir;
use tracing::{debug, info, warn};

#[cfg(unix)]
use libc::{ESRCH, SIGTERM, kill};

use super::{ServiceController, ServiceError, ServiceHandle, ServiceSpec};
use crate::readiness::{PollPolicy, poll_until};

const SERVICE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::service");
const BINARY_ENV: &str = "HISTORIAN_BIN";
const DEFAULT_BINARY: &str = "historian";
const CONFIG_FILE: &str = "historian.json";
const HEALTH_FILE: &str = "historian.health";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

struct Instance {
    identity: String,
    workspace: TempDir,
    config_path: Utf8PathBuf,
    health_path: Utf8PathBuf,
    child: Option<Child>,
}

impl Instance {
    fn running_pid(&mut self) -> Result<Option<u32>, ServiceError> {
        let Some(child) = self.child.as_mut() else {
            return Ok(None);
        };
        let pid = child.id();
        match child.try_wait() {
            Ok(None) => Ok(Some(pid)),
            Ok(Some(status)) => {
                debug!(target: SERVICE_TARGET, pid, %status, "historian process has exited");
                Ok(None)
            }
            Err(source) => Err(ServiceError::Monitor { pid, source }),
        }
    }
}

/// [`ServiceController`] that spawns the historian binary locally.
pub struct ProcessServiceController {
    binary: OsString,
    shutdown_grace: Duration,
    instances: BTreeMap<String, Instance>,
    next_id: u64,
}

impl ProcessServiceController {
    /// Uses `HISTORIAN_BIN` when set, otherwise `historian` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_binary_override(None)
    }

    /// Uses `binary` regardless of the environment.
    #[must_use]
    pub fn with_binary(binary: impl AsRef<OsStr>) -> Self {
        Self::with_binary_override(Some(binary.as_ref()))
    }

    fn with_binary_override(binary_override: Option<&OsStr>) -> Self {
        Self {
            binary: resolve_binary(binary_override),
            shutdown_grace: SHUTDOWN_GRACE,
            instances: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Sets how long a stopped process may take to exit before it is killed.
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Binary launched by [`ServiceController::start`].
    #[must_use]
    pub fn binary(&self) -> &OsStr {
        &self.binary
    }

    /// Configuration file written for an instance.
    #[must_use]
    pub fn config_path(&self, handle: &ServiceHandle) -> Option<&Utf8Path> {
        self.instances
            .get(handle.id())
            .map(|instance| instance.config_path.as_path())
    }

    /// Health file an instance is asked to maintain.
    #[must_use]
    pub fn health_path(&self, handle: &ServiceHandle) -> Option<&Utf8Path> {
        self.instances
            .get(handle.id())
            .map(|instance| instance.health_path.as_path())
    }

    fn instance(&mut self, handle: &ServiceHandle) -> Result<&mut Instance, ServiceError> {
        self.instances
            .get_mut(handle.id())
            .ok_or_else(|| ServiceError::UnknownInstance {
                id: handle.id().to_owned(),
            })
    }
}

impl Default for ProcessServiceController {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceController for ProcessServiceController {
    fn install(&mut self, spec: &ServiceSpec) -> Result<ServiceHandle, ServiceError> {
        let workspace = tempfile::Builder::new()
            .prefix("historian-")
            .tempdir()
            .map_err(|source| ServiceError::Workspace { source })?;
        let root = Utf8PathBuf::from_path_buf(workspace.path().to_path_buf())
            .map_err(|path| ServiceError::NonUtf8Workspace { path })?;
        let config_path = root.join(CONFIG_FILE);
        let document = serde_json::to_vec_pretty(&spec.config)?;
        Dir::open_ambient_dir(&root, ambient_authority())
            .and_then(|dir| dir.write(CONFIG_FILE, &document))
            .map_err(|source| ServiceError::WriteConfig {
                path: config_path.clone(),
                source,
            })?;

        self.next_id += 1;
        let id = format!("{}-{}", spec.identity, self.next_id);
        info!(
            target: SERVICE_TARGET,
            id = %id,
            identity = %spec.identity,
            config = %config_path,
            "historian installed"
        );
        self.instances.insert(
            id.clone(),
            Instance {
                identity: spec.identity.clone(),
                health_path: root.join(HEALTH_FILE),
                config_path,
                workspace,
                child: None,
            },
        );
        Ok(ServiceHandle::new(id, spec.identity.as_str()))
    }

    fn start(&mut self, handle: &ServiceHandle) -> Result<(), ServiceError> {
        let binary = self.binary.clone();
        let instance = self.instance(handle)?;
        if instance.running_pid()?.is_some() {
            return Err(ServiceError::AlreadyRunning {
                id: handle.id().to_owned(),
            });
        }
        let mut command = Command::new(&binary);
        command
            .arg("--config")
            .arg(&instance.config_path)
            .arg("--identity")
            .arg(&instance.identity)
            .arg("--health-file")
            .arg(&instance.health_path)
            .current_dir(instance.workspace.path())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        let child = command
            .spawn()
            .map_err(|source| ServiceError::Launch { binary, source })?;
        info!(
            target: SERVICE_TARGET,
            id = handle.id(),
            pid = child.id(),
            "historian started"
        );
        instance.child = Some(child);
        Ok(())
    }

    fn is_running(&mut self, handle: &ServiceHandle) -> Result<bool, ServiceError> {
        Ok(self.instance(handle)?.running_pid()?.is_some())
    }

    fn stop(&mut self, handle: &ServiceHandle) -> Result<(), ServiceError> {
        let grace = self.shutdown_grace;
        let instance = self.instance(handle)?;
        let Some(pid) = instance.running_pid()? else {
            return Ok(());
        };
        request_termination(instance, pid)?;
        let exited = poll_until(PollPolicy::with_timeout(grace), || {
            Ok::<_, ServiceError>(instance.running_pid()?.is_none().then_some(()))
        })?;
        if exited.is_none() {
            warn!(
                target: SERVICE_TARGET,
                id = handle.id(),
                pid,
                grace = ?grace,
                "historian ignored termination request; killing"
            );
            force_exit(instance);
        }
        info!(target: SERVICE_TARGET, id = handle.id(), pid, "historian stopped");
        Ok(())
    }

    fn remove(&mut self, handle: &ServiceHandle) -> Result<(), ServiceError> {
        let mut instance =
            self.instances
                .remove(handle.id())
                .ok_or_else(|| ServiceError::UnknownInstance {
                    id: handle.id().to_owned(),
                })?;
        if instance.running_pid()?.is_some() {
            force_exit(&mut instance);
        }
        info!(target: SERVICE_TARGET, id = handle.id(), "historian removed");
        Ok(())
    }
}

impl Drop for ProcessServiceController {
    fn drop(&mut self) {
        for instance in self.instances.values_mut() {
            if matches!(instance.running_pid(), Ok(Some(_))) {
                force_exit(instance);
            }
        }
    }
}

fn resolve_binary(binary_override: Option<&OsStr>) -> OsString {
    binary_override
        .map(OsString::from)
        .or_else(|| env::var_os(BINARY_ENV))
        .unwrap_or_else(|| OsString::from(DEFAULT_BINARY))
}

#[cfg(unix)]
fn request_termination(_instance: &mut Instance, pid: u32) -> Result<(), ServiceError> {
    let target = libc::pid_t::try_from(pid).map_err(|_| ServiceError::Signal {
        pid,
        source: io::Error::new(io::ErrorKind::InvalidInput, "process id out of range"),
    })?;
    // SAFETY: `kill(2)` only inspects its integer arguments; an invalid PID
    // yields an error return rather than undefined behaviour.
    let result = unsafe { kill(target, SIGTERM) };
    if result == 0 {
        return Ok(());
    }
    let source = io::Error::last_os_error();
    if source.raw_os_error() == Some(ESRCH) {
        // Exited between the liveness check and the signal.
        return Ok(());
    }
    Err(ServiceError::Signal { pid, source })
}

#[cfg(not(unix))]
fn request_termination(instance: &mut Instance, pid: u32) -> Result<(), ServiceError> {
    match instance.child.as_mut() {
        Some(child) => child
            .kill()
            .map_err(|source| ServiceError::Signal { pid, source }),
        None => Ok(()),
    }
}

fn force_exit(instance: &mut Instance) {
    let Some(child) = instance.child.as_mut() else {
        return;
    };
    let pid = child.id();
    if let Err(error) = child.kill() {
        warn!(target: SERVICE_TARGET, pid, %error, "failed to kill historian process");
    }
    if let Err(error) = child.wait() {
        warn!(target: SERVICE_TARGET, pid, %error, "failed to reap historian process");
    }
}

#[cfg(test)]
mod tests {
    use historian_config::{ConnectionParams, HistorianConfig, TableNames};

    use super::*;

    fn spec() -> ServiceSpec {
        ServiceSpec::new(
            "platform.historian",
            HistorianConfig::postgresql(
                ConnectionParams::new("localhost", 5432, "postgres", "secret", "test_historian"),
                TableNames::default(),
            ),
        )
    }

    #[test]
    fn binary_override_wins() {
        let resolved = resolve_binary(Some(OsStr::new("/opt/historian/bin/historian")));
        assert_eq!(resolved, OsString::from("/opt/historian/bin/historian"));
    }

    #[test]
    fn binary_falls_back_to_environment_or_default() {
        let resolved = resolve_binary(None);
        match env::var_os(BINARY_ENV) {
            Some(binary) => assert_eq!(resolved, binary),
            None => assert_eq!(resolved, OsString::from(DEFAULT_BINARY)),
        }
    }

    #[test]
    fn install_writes_configuration_document() {
        let mut controller = ProcessServiceController::with_binary("historian-missing");
        let handle = controller.install(&spec()).expect("install succeeds");
        assert_eq!(handle.identity(), "platform.historian");

        let path = controller
            .config_path(&handle)
            .expect("instance is installed")
            .to_owned();
        let written: HistorianConfig =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("config readable"))
                .expect("config parses");
        assert_eq!(written, spec().config);
        assert!(!controller.is_running(&handle).expect("state readable"));

        controller.remove(&handle).expect("remove succeeds");
        assert!(!path.exists(), "workspace is deleted on removal");
    }

    #[test]
    fn start_reports_missing_binary() {
        let mut controller =
            ProcessServiceController::with_binary("/nonexistent/historian-binary");
        let handle = controller.install(&spec()).expect("install succeeds");
        let error = controller.start(&handle).expect_err("binary does not exist");
        assert!(matches!(
            error,
            ServiceError::Launch { ref binary, .. } if binary == "/nonexistent/historian-binary"
        ));
    }

    #[test]
    fn unknown_handles_are_rejected() {
        let mut controller = ProcessServiceController::with_binary("historian");
        let stray = ServiceHandle::new("platform.historian-9", "platform.historian");
        assert!(matches!(
            controller.is_running(&stray),
            Err(ServiceError::UnknownInstance { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn stop_terminates_a_running_process() {
        let scripts = TempDir::new().expect("script dir");
        let script_path = scripts.path().join("historian");
        std::fs::write(&script_path, "#!/bin/sh\nexec sleep 30\n").expect("write script");
        let mut permissions = std::fs::metadata(&script_path)
            .expect("script metadata")
            .permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut permissions, 0o755);
        std::fs::set_permissions(&script_path, permissions).expect("chmod script");

        let mut controller = ProcessServiceController::with_binary(&script_path)
            .with_shutdown_grace(Duration::from_secs(5));
        let handle = controller.install(&spec()).expect("install succeeds");
        controller.start(&handle).expect("start succeeds");
        assert!(controller.is_running(&handle).expect("state readable"));

        controller.stop(&handle).expect("stop succeeds");
        assert!(!controller.is_running(&handle).expect("state readable"));
        controller.remove(&handle).expect("remove succeeds");
    }
}
