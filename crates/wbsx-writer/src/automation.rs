//! Writer that hands the fill to an external spreadsheet automation host.
//!
//! The host is any program that accepts a template path, an output path and
//! a JSON cell plan, fills the sheet and saves the output. Each fill runs in
//! its own temporary directory which is removed afterwards. On unix the host
//! leads its own process group, and the whole group is killed when the fill
//! ends, so helpers the host started in the background go with it.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tracing::{debug, warn};
use wbsx_core::{DocumentWriter, FillError, SheetPlan};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const OUTPUT_NAME: &str = "output.xlsm";
const PLAN_NAME: &str = "plan.json";
const LOG_NAME: &str = "host.log";
/// Characters of host stderr quoted in error messages
const LOG_EXCERPT: usize = 500;

/// Drives an external program to produce the document
#[derive(Clone, Debug)]
pub struct AutomationWriter {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    poll_interval: Duration,
}

impl AutomationWriter {
    /// Host invoked as `program {template} {output} {plan}`
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec!["{template}".into(), "{output}".into(), "{plan}".into()],
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Replace the argument template.
    ///
    /// `{template}`, `{output}`, `{plan}` and `{sheet}` are substituted.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Maximum run time of one host invocation
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn command_args(&self, template: &Path, output: &Path, plan_file: &Path, sheet: &str) -> Vec<String> {
        let template = template.to_string_lossy();
        let output = output.to_string_lossy();
        let plan_file = plan_file.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{template}", &template)
                    .replace("{output}", &output)
                    .replace("{plan}", &plan_file)
                    .replace("{sheet}", sheet)
            })
            .collect()
    }

    fn run(&self, workdir: &TempDir, template: &Path, plan: &SheetPlan) -> Result<Vec<u8>, FillError> {
        let plan_path = workdir.path().join(PLAN_NAME);
        let output_path = workdir.path().join(OUTPUT_NAME);
        let log_path = workdir.path().join(LOG_NAME);

        let plan_json = serde_json::to_vec_pretty(plan)
            .map_err(|e| FillError::Host(format!("failed to encode cell plan: {e}")))?;
        std::fs::write(&plan_path, plan_json)?;

        let args = self.command_args(template, &output_path, &plan_path, &plan.sheet);
        debug!(program = %self.program.display(), ?args, "starting automation host");

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .current_dir(workdir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(File::create(&log_path)?);
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut command, 0);

        let child = command.spawn().map_err(|e| {
            FillError::Host(format!("failed to start {}: {e}", self.program.display()))
        })?;

        let mut host = HostProcess::new(child);
        let status = host.wait_timeout(self.timeout, self.poll_interval)?;

        if !status.success() {
            let log = std::fs::read_to_string(&log_path).unwrap_or_default();
            let excerpt: String = log.trim().chars().take(LOG_EXCERPT).collect();
            return Err(FillError::Host(if excerpt.is_empty() {
                format!("host exited with {status}")
            } else {
                format!("host exited with {status}: {excerpt}")
            }));
        }

        if !output_path.is_file() {
            return Err(FillError::Host("host finished without writing an output file".into()));
        }
        Ok(std::fs::read(&output_path)?)
    }
}

impl DocumentWriter for AutomationWriter {
    fn name(&self) -> &'static str {
        "automation"
    }

    fn write(&self, template: &Path, plan: &SheetPlan) -> Result<Vec<u8>, FillError> {
        // The host may resolve paths against its own working directory.
        let template = std::fs::canonicalize(template)
            .map_err(|_| FillError::TemplateNotFound(template.to_path_buf()))?;
        let workdir = tempfile::Builder::new().prefix("wbsx-host-").tempdir()?;
        self.run(&workdir, &template, plan)
    }

    fn exclusive(&self) -> bool {
        true
    }
}

/// A running host. Dropping it kills the host's process group and reaps
/// the host if it has not exited yet.
struct HostProcess {
    child: Child,
    /// Host exited and was reaped
    finished: bool,
    /// Process group already signalled
    released: bool,
}

impl HostProcess {
    fn new(child: Child) -> Self {
        Self {
            child,
            finished: false,
            released: false,
        }
    }

    fn wait_timeout(&mut self, timeout: Duration, poll: Duration) -> Result<ExitStatus, FillError> {
        let started = Instant::now();
        loop {
            if let Some(status) = self.child.try_wait()? {
                self.finished = true;
                return Ok(status);
            }
            if started.elapsed() >= timeout {
                warn!(pid = self.child.id(), ?timeout, "automation host timed out");
                self.kill();
                return Err(FillError::Timeout(timeout));
            }
            thread::sleep(poll);
        }
    }

    fn kill(&mut self) {
        if !self.released {
            self.released = true;
            self.kill_group();
        }
        if self.finished {
            return;
        }
        if let Err(e) = self.child.kill() {
            debug!(error = %e, "kill of automation host failed");
        }
        let _ = self.child.wait();
        self.finished = true;
    }

    /// SIGKILL every process left in the host's group
    #[cfg(unix)]
    fn kill_group(&self) {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Ok(pid) = i32::try_from(self.child.id()) else {
            return;
        };
        match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
            Ok(()) => debug!(pgid = pid, "killed automation host process group"),
            Err(Errno::ESRCH) => {}
            Err(e) => debug!(pgid = pid, error = %e, "kill of automation host group failed"),
        }
    }

    #[cfg(not(unix))]
    fn kill_group(&self) {}
}

impl Drop for HostProcess {
    fn drop(&mut self) {
        self.kill();
    }
}
