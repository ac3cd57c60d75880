//! CLI entry point for the qrexec data-plane mediator: wires the three
//! mode entry points in [`qrexec_mediator::dispatcher`] to command-line
//! flags. Argument parsing, user lookup, and RPC policy are the "external
//! glue" spec.md §1 places outside the core; this binary is the thinnest
//! possible caller of that core.

use std::fmt;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::fmt::time::FormatTime;

use qrexec_mediator::MediatorResult;
use qrexec_mediator::dispatcher::{self, Endpoint, MediatorConfig};
use qrexec_mediator::fd::{FdKind, ManagedFd};
use qrexec_mediator::sanitize::ReplaceChars;
use qrexec_mediator::spawn::ShellSpawner;

struct Elapsed(Instant);

impl FormatTime for Elapsed {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let d = self.0.elapsed();
        let total_secs = d.as_secs();
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        let millis = d.subsec_millis();
        write!(w, "[{mins:02}:{secs:02}:{millis:03}]")
    }
}

#[derive(Parser)]
#[command(name = "qrexec-agent-mediator", version)]
struct Cli {
    /// Target domain id for the vchan endpoint (client modes connect to it,
    /// service-connect listens on it).
    #[arg(long)]
    domain: i32,

    /// vchan port number.
    #[arg(long)]
    port: i32,

    /// Per-direction ring buffer size in bytes; must be a power of two.
    /// Only meaningful for service-connect, which creates the vchan server.
    #[arg(long, default_value_t = vchan::DEFAULT_RING_SIZE)]
    ring_size: usize,

    /// Protocol version advertised in this session's HELLO.
    #[arg(long, default_value_t = qrexec_proto::LOCAL_VERSION)]
    protocol_version: u32,

    /// Replace unsafe control bytes with `_` in outbound STDOUT frames.
    #[arg(long, value_enum, default_value = "inherit")]
    sanitize_stdout: SanitizeMode,

    /// Replace unsafe control bytes with `_` in outbound STDERR frames.
    #[arg(long, value_enum, default_value = "inherit")]
    sanitize_stderr: SanitizeMode,

    /// What a per-stream `inherit` knob resolves to when neither
    /// `--sanitize-stdout` nor `--sanitize-stderr` says otherwise.
    #[arg(long)]
    sanitize_by_default: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SanitizeMode {
    Off,
    On,
    Inherit,
}

impl From<SanitizeMode> for ReplaceChars {
    fn from(mode: SanitizeMode) -> Self {
        match mode {
            SanitizeMode::Off => Self::Off,
            SanitizeMode::On => Self::On,
            SanitizeMode::Inherit => Self::Inherit,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Execute-and-wait: connect as vchan client, spawn `cmdline` locally,
    /// bridge its stdio, and report its exit code to the peer.
    ExecWait {
        /// Shell command line to run via `/bin/sh -c`.
        cmdline: String,
    },
    /// Execute-and-detach: connect as vchan client, spawn `cmdline` with
    /// stdio on `/dev/null`, report exit code 0 immediately, and return
    /// while the child keeps running.
    ExecDetach {
        /// Shell command line to run via `/bin/sh -c`.
        cmdline: String,
    },
    /// Service-connect: create the vchan as server, await the peer, and
    /// bridge three pre-supplied file descriptors instead of a forked
    /// child.
    ServiceConnect {
        #[arg(long)]
        stdin_fd: RawFd,
        #[arg(long)]
        stdout_fd: RawFd,
        #[arg(long)]
        stderr_fd: RawFd,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_timer(Elapsed(Instant::now()))
        .init();

    let cli = Cli::parse();
    tracing::debug!(domain = cli.domain, port = cli.port, "starting mediator session");
    let config = MediatorConfig {
        endpoint: Endpoint {
            domain: cli.domain,
            port: cli.port,
        },
        ring_size: cli.ring_size,
        local_protocol_version: cli.protocol_version,
        sanitize_by_default: cli.sanitize_by_default,
        replace_chars_stdout: cli.sanitize_stdout.into(),
        replace_chars_stderr: cli.sanitize_stderr.into(),
    };

    let result = match cli.command {
        Command::ExecWait { cmdline } => {
            dispatcher::exec_cmdline(&config, &cmdline, &ShellSpawner)
        }
        Command::ExecDetach { cmdline } => dispatcher::exec_detach(&config, &cmdline),
        Command::ServiceConnect {
            stdin_fd,
            stdout_fd,
            stderr_fd,
        } => run_service_connect(&config, stdin_fd, stdout_fd, stderr_fd),
    };

    match result {
        Ok(code) => exit_code_from_i32(code),
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_service_connect(
    config: &MediatorConfig,
    stdin_fd: RawFd,
    stdout_fd: RawFd,
    stderr_fd: RawFd,
) -> MediatorResult<i32> {
    let stdin = managed_fd_from_raw(stdin_fd)?;
    let stdout = managed_fd_from_raw(stdout_fd)?;
    let stderr = managed_fd_from_raw(stderr_fd)?;
    dispatcher::service_connect(config, stdin, stdout, stderr)
}

/// Adopt a caller-supplied raw fd, classify its kind so the scheduler's
/// shutdown discipline applies correctly, and put it in non-blocking mode.
fn managed_fd_from_raw(raw: RawFd) -> MediatorResult<ManagedFd> {
    let kind = FdKind::detect(raw)?;
    qrexec_mediator::fd::set_nonblocking(raw)?;
    // SAFETY: `raw` is a fd the caller handed us to own for the session's
    // duration, per the service-connect mode contract (spec.md §1 mode 3).
    let owned = unsafe { OwnedFd::from_raw_fd(raw) };
    Ok(ManagedFd::new(owned, kind))
}

/// The wire exit code is an arbitrary `i32`; the process exit code this
/// binary itself returns is clamped to a `u8`, matching how a POSIX shell
/// already truncates any exit status above 255.
fn exit_code_from_i32(code: i32) -> ExitCode {
    ExitCode::from(code.rem_euclid(256) as u8)
}
