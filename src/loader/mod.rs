//! Module loading
//!
//! The capability interface between the coordination core and whatever
//! actually executes a test module. `require` registers a module, `unsee`
//! forgets it, `load` runs everything registered and reports per-module
//! outcomes. A module that cannot be loaded or started is reported as a
//! failing outcome, never as a run abort.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::models::ModuleOutcome;
use crate::utils::Timer;

/// Capability interface for making modules executable.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    /// Registers a module for execution without running it.
    fn require(&self, name: &str);

    /// Forgets a previously required module.
    fn unsee(&self, name: &str);

    /// Executes every required module in registration order and drains the
    /// pending set.
    async fn load(&self) -> Vec<ModuleOutcome>;
}

/// Requires and immediately loads a single module.
pub async fn load_one(loader: &dyn ModuleLoader, name: &str) -> ModuleOutcome {
    loader.require(name);
    loader
        .load()
        .await
        .into_iter()
        .next()
        .unwrap_or_else(|| ModuleOutcome::error(name, "loader produced no outcome"))
}

/// Runs each module through a shell command template.
///
/// `{module}` in the template is replaced with the module name; the command
/// runs in the artifact directory when one is configured. Exit status zero
/// is a pass, anything else a failure, and a command that cannot be spawned
/// or outlives the timeout is reported against the module it ran.
pub struct CommandLoader {
    template: String,
    workdir: Option<PathBuf>,
    timeout: Duration,
    pending: Mutex<Vec<String>>,
}

impl CommandLoader {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            workdir: None,
            timeout: Duration::from_secs(300),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Set the directory commands run in (the pre-built artifact).
    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    /// Set the per-module execution timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run_module(&self, module: &str) -> ModuleOutcome {
        let command_line = self.template.replace("{module}", module);
        debug!("running module {module}: {command_line}");

        let mut command = tokio::process::Command::new("sh");
        command.arg("-c").arg(&command_line);
        if let Some(dir) = &self.workdir {
            command.current_dir(dir);
        }

        let timer = Timer::start(module.to_string());
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("failed to start module {module}: {e}");
                return ModuleOutcome::error(module, format!("failed to start: {e}"));
            }
        };

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => ModuleOutcome::pass(module, timer.elapsed_ms()),
            Ok(Ok(status)) => ModuleOutcome::fail(
                module,
                timer.elapsed_ms(),
                format!("exited with {status}"),
            ),
            Ok(Err(e)) => ModuleOutcome::error(module, format!("failed to wait: {e}")),
            Err(_) => {
                let _ = child.kill().await;
                ModuleOutcome::fail(
                    module,
                    timer.elapsed_ms(),
                    format!("timed out after {} s", self.timeout.as_secs()),
                )
            }
        }
    }
}

#[async_trait]
impl ModuleLoader for CommandLoader {
    fn require(&self, name: &str) {
        self.pending
            .lock()
            .expect("loader poisoned")
            .push(name.to_string());
    }

    fn unsee(&self, name: &str) {
        self.pending
            .lock()
            .expect("loader poisoned")
            .retain(|pending| pending != name);
    }

    async fn load(&self) -> Vec<ModuleOutcome> {
        let pending: Vec<String> = {
            let mut guard = self.pending.lock().expect("loader poisoned");
            std::mem::take(&mut *guard)
        };

        let mut outcomes = Vec::with_capacity(pending.len());
        for module in pending {
            outcomes.push(self.run_module(&module).await);
        }
        outcomes
    }
}

/// Marks every module as passed without executing anything.
///
/// Used when no `--exec` template is configured, so the distribution
/// machinery can be exercised on its own.
#[derive(Default)]
pub struct DryRunLoader {
    pending: Mutex<Vec<String>>,
}

impl DryRunLoader {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ModuleLoader for DryRunLoader {
    fn require(&self, name: &str) {
        self.pending
            .lock()
            .expect("loader poisoned")
            .push(name.to_string());
    }

    fn unsee(&self, name: &str) {
        self.pending
            .lock()
            .expect("loader poisoned")
            .retain(|pending| pending != name);
    }

    async fn load(&self) -> Vec<ModuleOutcome> {
        let pending: Vec<String> = {
            let mut guard = self.pending.lock().expect("loader poisoned");
            std::mem::take(&mut *guard)
        };
        pending
            .into_iter()
            .map(|module| ModuleOutcome::pass(module, 0))
            .collect()
    }
}
