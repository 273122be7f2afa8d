use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hakoniwa::seccomp::{Action, Arch, Filter};
use hakoniwa::{Container, Namespace, Rlimit, Runctl, Stdio};
use metrics::{counter, gauge, histogram};
use regex::Regex;

use crate::error::ExecutionError;
use crate::executor::{ExecutionLimits, Executor};
use crate::languages::LanguageProfile;
use crate::types::Language;

const BANNED_SYSCALLS: &[&str] = &[
    "mount", "umount2", "pivot_root", "chroot", "poweroff", "reboot", "kexec_load",
    "init_module", "finit_module", "delete_module", "swapon", "swapoff", "ptrace",
    "process_vm_readv", "process_vm_writev", "setns", "unshare", "socket", "bind",
    "connect", "listen", "accept", "accept4", "sendto", "recvfrom",
];

// Host directories the interpreters need. Everything else stays invisible.
const SYSTEM_DIRS: &[&str] = &["/bin", "/lib", "/lib64", "/usr"];

const WATCHDOG_GRACE: Duration = Duration::from_secs(2);
const MAX_FAULT_LEN: usize = 512;

static ERROR_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[A-Za-z_][\w.]*)?(?:Error|Exception)\b(?::.*)?$").expect("valid regex")
});
static OUT_OF_MEMORY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)out of memory|\bMemoryError\b|allocation failed|cannot allocate memory")
        .expect("valid regex")
});
static HOST_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(^|[\s'"(\[=])/[^\s'":()\]]+"#).expect("valid regex")
});

/// Per-execution directory on the host. `src` is mounted read-only at `/box`,
/// `out` read-write at `/out`. Removed when dropped.
struct Workspace {
    path: PathBuf,
}

impl Workspace {
    fn create(base: &Path) -> io::Result<Self> {
        let id: String = std::iter::repeat_with(fastrand::alphanumeric)
            .take(12)
            .collect();
        let path = base.join(id);
        fs::create_dir_all(path.join("src"))?;
        fs::create_dir_all(path.join("out"))?;
        Ok(Self { path })
    }

    fn src(&self) -> PathBuf {
        self.path.join("src")
    }

    fn out(&self) -> PathBuf {
        self.path.join("out")
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            tracing::warn!(path = %self.path.display(), "failed to remove workspace: {}", e);
        }
    }
}

struct RawRun {
    exit_code: i32,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    wall_time: Duration,
    cpu_time: Duration,
}

pub struct SandboxExecutor {
    profile: LanguageProfile,
    base_path: PathBuf,
}

impl SandboxExecutor {
    pub fn new(profile: LanguageProfile, base_path: PathBuf) -> Self {
        Self { profile, base_path }
    }
}

#[async_trait]
impl Executor for SandboxExecutor {
    fn language(&self) -> Language {
        self.profile.language
    }

    async fn execute(
        &self,
        code: &str,
        input: &str,
        limits: &ExecutionLimits,
    ) -> Result<String, ExecutionError> {
        ensure_program(&self.profile)?;

        let workspace = Workspace::create(&self.base_path).map_err(|e| {
            tracing::error!("failed to create workspace: {}", e);
            ExecutionError::SandboxUnavailable("failed to prepare workspace".to_string())
        })?;
        fs::write(
            workspace.src().join(self.profile.source_file()),
            self.profile.render(code),
        )
        .map_err(|e| {
            tracing::error!("failed to write program: {}", e);
            ExecutionError::SandboxUnavailable("failed to prepare workspace".to_string())
        })?;

        let profile = self.profile.clone();
        let src = workspace.src();
        let out = workspace.out();
        let stdin = input.as_bytes().to_vec();
        let run_limits = *limits;

        gauge!("active_executions").increment(1.0);
        let task = tokio::task::spawn_blocking(move || {
            run_contained(&profile, &src, &out, stdin, &run_limits)
        });
        let joined = tokio::time::timeout(limits.time_limit + WATCHDOG_GRACE, task).await;
        gauge!("active_executions").decrement(1.0);

        let result = match joined {
            // the container supervisor still kills the guest on its own deadline
            Err(_) => {
                tracing::warn!(language = %self.profile.language, "watchdog expired");
                Err(ExecutionError::Timeout)
            }
            Ok(Err(e)) => {
                tracing::error!("sandbox task failed: {}", e);
                Err(ExecutionError::SandboxUnavailable(
                    "sandbox worker failed".to_string(),
                ))
            }
            Ok(Ok(run)) => run.and_then(|run| {
                histogram!("execution_time_ms").record(run.wall_time.as_millis() as f64);
                classify(run, limits)
            }),
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(ExecutionError::Timeout) => "timeout",
            Err(ExecutionError::RuntimeFault(_)) => "fault",
            Err(_) => "error",
        };
        counter!("executions_total", "outcome" => outcome).increment(1);

        drop(workspace);
        result
    }
}

fn build_container(
    profile: &LanguageProfile,
    src: &Path,
    out: &Path,
    limits: &ExecutionLimits,
) -> Container {
    let mut container = Container::new();
    let mut filter = Filter::new(Action::Allow);

    #[cfg(target_arch = "x86_64")]
    {
        filter.add_arch(Arch::X8664);
        filter.add_arch(Arch::X86);
        filter.add_arch(Arch::X32);
    }

    container
        .unshare(Namespace::Cgroup)
        .unshare(Namespace::Ipc)
        .unshare(Namespace::Uts)
        .unshare(Namespace::Network);

    BANNED_SYSCALLS.iter().for_each(|syscall| {
        filter.add_rule(Action::Errno(libc::EPERM), syscall);
    });

    for dir in SYSTEM_DIRS.iter().filter(|dir| Path::new(dir).exists()) {
        container.bindmount_ro(dir, dir);
    }
    container.bindmount_ro(&src.to_string_lossy(), "/box");
    container.bindmount_rw(&out.to_string_lossy(), "/out");
    container.devfsmount("/dev").tmpfsmount("/tmp");
    container.seccomp_filter(filter);
    container.runctl(Runctl::GetProcPidStatus);

    let cpu_secs = ceil_secs(limits.time_limit);
    container.setrlimit(Rlimit::Cpu, cpu_secs, cpu_secs);
    let (memory, bytes) = profile.memory_rlimit(limits);
    container.setrlimit(memory, bytes, bytes);
    // anything past the output cap trips SIGXFSZ
    let fsize = limits.output_limit_bytes as u64 + 1;
    container.setrlimit(Rlimit::Fsize, fsize, fsize);

    container
}

fn run_contained(
    profile: &LanguageProfile,
    src: &Path,
    out: &Path,
    stdin: Vec<u8>,
    limits: &ExecutionLimits,
) -> Result<RawRun, ExecutionError> {
    let container = build_container(profile, src, out, limits);

    // stdout and stderr go to files so RLIMIT_FSIZE bounds them
    let mut args = vec![
        "-c".to_string(),
        r#"exec "$0" "$@" >/out/stdout 2>/out/stderr"#.to_string(),
        profile.program.clone(),
    ];
    args.extend(profile.args(limits));

    let mut cmd = container.command("/bin/sh");
    cmd.current_dir("/box")
        .args(args)
        .env("PATH", "/usr/local/bin:/usr/bin:/bin")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    cmd.wait_timeout(ceil_secs(limits.time_limit));

    let started = Instant::now();
    let mut proc = cmd.spawn().map_err(|e| {
        tracing::error!(language = %profile.language, "failed to spawn sandbox: {}", e);
        ExecutionError::SandboxUnavailable("failed to start sandbox".to_string())
    })?;

    if let Some(mut proc_stdin) = proc.stdin.take() {
        if proc_stdin.write_all(&stdin).is_err() {
            tracing::debug!("guest closed stdin early");
        }
        drop(proc_stdin);
    }

    let output = proc.wait_with_output().map_err(|e| {
        tracing::error!("failed to wait for sandbox: {}", e);
        ExecutionError::SandboxUnavailable("sandbox wait failed".to_string())
    })?;
    let wall_time = started.elapsed();

    let cpu_time = output
        .status
        .rusage
        .map(|r| r.user_time + r.system_time)
        .unwrap_or_default();

    tracing::debug!(
        code = output.status.code,
        reason = %output.status.reason,
        wall_ms = wall_time.as_millis() as u64,
        "sandbox exited"
    );

    Ok(RawRun {
        exit_code: output.status.code,
        stdout: fs::read(out.join("stdout")).unwrap_or_default(),
        stderr: fs::read(out.join("stderr")).unwrap_or_default(),
        wall_time,
        cpu_time,
    })
}

/// The interpreter must exist on the host and sit under a directory that is
/// mounted into the container. Otherwise the shell would exit 127 and the
/// failure would read as a guest fault.
fn ensure_program(profile: &LanguageProfile) -> Result<(), ExecutionError> {
    let program = Path::new(&profile.program);
    let mounted = SYSTEM_DIRS.iter().any(|dir| program.starts_with(dir));
    if mounted && program.is_file() {
        return Ok(());
    }
    tracing::error!(
        language = %profile.language,
        program = %profile.program,
        "interpreter missing or outside the sandbox mounts"
    );
    Err(ExecutionError::SandboxUnavailable(
        "interpreter unavailable".to_string(),
    ))
}

pub fn program_available(profile: &LanguageProfile) -> bool {
    ensure_program(profile).is_ok()
}

fn ceil_secs(duration: Duration) -> u64 {
    duration.as_millis().div_ceil(1000).max(1) as u64
}

fn classify(run: RawRun, limits: &ExecutionLimits) -> Result<String, ExecutionError> {
    let timed_out = run.wall_time >= limits.time_limit
        || run.cpu_time >= limits.time_limit
        || run.exit_code == 128 + libc::SIGXCPU;
    if timed_out {
        return Err(ExecutionError::Timeout);
    }

    if run.exit_code == 128 + libc::SIGXFSZ || run.stdout.len() > limits.output_limit_bytes {
        return Err(ExecutionError::RuntimeFault(
            "output limit exceeded".to_string(),
        ));
    }

    if run.exit_code != 0 && OUT_OF_MEMORY.is_match(&String::from_utf8_lossy(&run.stderr)) {
        return Err(ExecutionError::RuntimeFault(
            "memory limit exceeded".to_string(),
        ));
    }

    if run.exit_code != 0 {
        return Err(ExecutionError::RuntimeFault(sanitize_fault(
            &run.stderr,
            run.exit_code,
        )));
    }

    Ok(String::from_utf8_lossy(&run.stdout).trim().to_string())
}

/// Reduces guest stderr to its final error line with host paths masked.
fn sanitize_fault(stderr: &[u8], exit_code: i32) -> String {
    let text = String::from_utf8_lossy(stderr);
    let line = text
        .lines()
        .map(str::trim_end)
        .filter(|line| ERROR_LINE.is_match(line))
        .last();

    match line {
        Some(line) => HOST_PATH
            .replace_all(line, "${1}<path>")
            .chars()
            .take(MAX_FAULT_LEN)
            .collect(),
        None if exit_code > 128 => format!("process killed by signal {}", exit_code - 128),
        None => format!("process exited with status {}", exit_code),
    }
}
