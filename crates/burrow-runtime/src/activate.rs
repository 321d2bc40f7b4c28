use crate::compose::ComposedEnvironment;
use crate::script::ScriptFormat;
use crate::ActivationError;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus};
use tracing::{debug, info, warn};

/// Where an emitted script goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptTarget {
    Memory,
    /// Written atomically; removed again on teardown unless persisted.
    File(PathBuf),
}

/// How a composed environment is materialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationMode {
    /// Run a program whose environment table is exactly the composed one.
    Spawn {
        program: String,
        args: Vec<String>,
        cwd: Option<PathBuf>,
    },
    /// Emit a sourceable script. With `deactivate` the file target receives
    /// the restoring script instead of the activating one.
    Script {
        format: ScriptFormat,
        target: ScriptTarget,
        deactivate: bool,
    },
}

/// Both directions of a rendered script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedScript {
    pub format: ScriptFormat,
    pub activate: String,
    pub deactivate: String,
}

pub struct Activator {
    mode: ActivationMode,
}

impl Activator {
    pub fn new(mode: ActivationMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> &ActivationMode {
        &self.mode
    }

    /// Apply `env` in a single step. Nothing is observable until the whole
    /// environment table or script has been built in memory.
    pub fn activate(&self, env: &ComposedEnvironment) -> Result<ActivationHandle, ActivationError> {
        match &self.mode {
            ActivationMode::Spawn { program, args, cwd } => {
                for (key, _) in env.variables() {
                    check_env_key(key)?;
                }
                let table = env.full();
                let mut cmd = Command::new(program);
                cmd.args(args).env_clear().envs(&table);
                if let Some(dir) = cwd {
                    cmd.current_dir(dir);
                }
                let child = cmd.spawn().map_err(|source| ActivationError::Spawn {
                    program: program.clone(),
                    source,
                })?;
                info!("spawned '{program}' (pid {}) with {} variables", child.id(), table.len());
                Ok(ActivationHandle::new(Resource::Child(child), None))
            }
            ActivationMode::Script {
                format,
                target,
                deactivate,
            } => {
                let script = EmittedScript {
                    format: *format,
                    activate: format.render_activate(env)?,
                    deactivate: format.render_deactivate(env)?,
                };
                let resource = match target {
                    ScriptTarget::Memory => Resource::None,
                    ScriptTarget::File(path) => {
                        let body = if *deactivate {
                            &script.deactivate
                        } else {
                            &script.activate
                        };
                        write_atomic(path, body)?;
                        info!("wrote {format} script to {}", path.display());
                        Resource::ScriptFile {
                            path: path.clone(),
                            persisted: false,
                        }
                    }
                };
                Ok(ActivationHandle::new(resource, Some(script)))
            }
        }
    }
}

/// Names the OS environment table cannot represent.
fn check_env_key(key: &str) -> Result<(), ActivationError> {
    if key.is_empty() || key.contains('=') || key.contains('\0') {
        return Err(ActivationError::InvalidVariable(key.to_owned()));
    }
    Ok(())
}

fn write_atomic(path: &Path, body: &str) -> Result<(), ActivationError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(body.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| ActivationError::Io(e.error))?;
    Ok(())
}

enum Resource {
    None,
    Child(Child),
    ScriptFile { path: PathBuf, persisted: bool },
}

/// An applied environment. Dropping the handle tears it down.
pub struct ActivationHandle {
    resource: Resource,
    script: Option<EmittedScript>,
    status: Option<ExitStatus>,
    released: bool,
}

impl ActivationHandle {
    fn new(resource: Resource, script: Option<EmittedScript>) -> Self {
        Self {
            resource,
            script,
            status: None,
            released: false,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        match &self.resource {
            Resource::Child(child) => Some(child.id()),
            _ => None,
        }
    }

    pub fn script(&self) -> Option<&EmittedScript> {
        self.script.as_ref()
    }

    pub fn script_path(&self) -> Option<&Path> {
        match &self.resource {
            Resource::ScriptFile { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Keep an emitted script file past teardown.
    pub fn persist(&mut self) -> Option<PathBuf> {
        match &mut self.resource {
            Resource::ScriptFile { path, persisted } => {
                *persisted = true;
                Some(path.clone())
            }
            _ => None,
        }
    }

    /// Wait for the spawned child. The exit status is cached, so repeated
    /// calls return the same value.
    pub fn wait(&mut self) -> Result<ExitStatus, ActivationError> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let Resource::Child(child) = &mut self.resource else {
            return Err(ActivationError::NotAProcess);
        };
        let status = child.wait()?;
        debug!("child {} exited with {status}", child.id());
        self.status = Some(status);
        Ok(status)
    }

    pub fn is_active(&self) -> bool {
        !self.released
    }

    /// Release everything this activation acquired: a still-running child is
    /// killed and reaped, an unpersisted script file is removed. Calling it
    /// again does nothing. Failures are logged, not returned.
    pub fn teardown(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        match &mut self.resource {
            Resource::None => {}
            Resource::Child(child) => {
                if self.status.is_some() {
                    return;
                }
                match child.try_wait() {
                    Ok(Some(status)) => self.status = Some(status),
                    Ok(None) => {
                        if let Err(e) = child.kill() {
                            warn!("failed to kill child {}: {e}", child.id());
                        }
                        match child.wait() {
                            Ok(status) => self.status = Some(status),
                            Err(e) => warn!("failed to reap child {}: {e}", child.id()),
                        }
                    }
                    Err(e) => warn!("failed to poll child {}: {e}", child.id()),
                }
            }
            Resource::ScriptFile { path, persisted } => {
                if *persisted {
                    return;
                }
                match std::fs::remove_file(&*path) {
                    Ok(()) => debug!("removed script {}", path.display()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!("failed to remove script {}: {e}", path.display()),
                }
            }
        }
    }
}

impl Drop for ActivationHandle {
    fn drop(&mut self) {
        self.teardown();
    }
}
