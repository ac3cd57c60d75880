//! Component G: the three entry points spec.md §4.G names, each wiring
//! handshake -> scheduler -> exit-code handling around a connected vchan.

use vchan::{SysVchan, VchanConnection};

use crate::error::MediatorResult;
use crate::fd::ManagedFd;
use crate::sanitize::ReplaceChars;
use crate::scheduler::{self, SchedulerOutcome};
use crate::session::Session;
use crate::spawn::{ChildSpawner, spawn_detached};
use crate::{exit_code, handshake, signals};

/// Where a client-mode vchan connects to, or a server-mode vchan listens on.
#[derive(Debug, Clone, Copy)]
pub struct Endpoint {
    pub domain: i32,
    pub port: i32,
}

/// Knobs the CLI builds from its flags and hands to the dispatcher.
#[derive(Debug, Clone)]
pub struct MediatorConfig {
    pub endpoint: Endpoint,
    pub ring_size: usize,
    pub local_protocol_version: u32,
    /// Session-wide default a per-stream `Inherit` knob resolves to.
    pub sanitize_by_default: bool,
    pub replace_chars_stdout: ReplaceChars,
    pub replace_chars_stderr: ReplaceChars,
}

/// `service-connect` mode (§4.G): the peer already has a running process on
/// the other end; this side owns no child and just bridges `fds` in from
/// the vchan's stdin message type. Returns the remote's reported exit code.
pub fn service_connect(
    config: &MediatorConfig,
    stdin: ManagedFd,
    stdout: ManagedFd,
    stderr: ManagedFd,
) -> MediatorResult<i32> {
    signals::install()?;
    let mut conn = SysVchan::server_init(
        config.endpoint.domain,
        config.endpoint.port,
        config.ring_size,
    )?;

    let negotiated = handshake::perform(&mut conn, config.local_protocol_version)?;
    // SAFETY: called once, single-threaded, before the scheduler or any
    // child is spawned.
    unsafe { signals::set_agent_pid_env() };

    let mut session = Session::new(negotiated);
    session.sanitize_by_default = config.sanitize_by_default;
    session.replace_chars_stdout = config.replace_chars_stdout;
    session.replace_chars_stderr = config.replace_chars_stderr;
    session.stdin_fd = Some(stdin);
    session.stdout_fd = Some(stdout);
    session.stderr_fd = Some(stderr);

    let outcome = scheduler::run(&mut conn, &mut session, true)?;
    conn.close();

    let code = match outcome {
        SchedulerOutcome::RemoteExitedEarly(code) => code,
        SchedulerOutcome::Done => session.remote_exit_code.unwrap_or(1),
    };
    tracing::info!(exit_code = code, "service-connect session finished");
    Ok(code)
}

/// `exec-cmdline` / execute-and-wait mode (§4.G): spawn `cmdline` locally,
/// bridge its stdio to the vchan, and report its exit code to the peer
/// before closing.
pub fn exec_cmdline(
    config: &MediatorConfig,
    cmdline: &str,
    spawner: &impl ChildSpawner,
) -> MediatorResult<i32> {
    check_cmdline_len(cmdline)?;
    signals::install()?;
    let mut conn = SysVchan::client_init(config.endpoint.domain, config.endpoint.port)?;

    let negotiated = handshake::perform(&mut conn, config.local_protocol_version)?;
    // SAFETY: called once, single-threaded, before the scheduler or any
    // child is spawned.
    unsafe { signals::set_agent_pid_env() };
    let spawned = spawner.spawn(cmdline)?;

    let mut session = Session::new(negotiated);
    session.sanitize_by_default = config.sanitize_by_default;
    session.replace_chars_stdout = config.replace_chars_stdout;
    session.replace_chars_stderr = config.replace_chars_stderr;
    session.child_pid = Some(spawned.pid);
    session.stdin_fd = Some(spawned.stdin);
    session.stdout_fd = Some(spawned.stdout);
    session.stderr_fd = Some(spawned.stderr);
    session.stdin_buffer = spawned.initial_stdin;

    scheduler::run(&mut conn, &mut session, false)?;

    let local_code = session.child_exit_code.unwrap_or(0);
    exit_code::send(&mut conn, local_code)?;
    conn.close();

    tracing::info!(exit_code = local_code, "exec-cmdline session finished");
    Ok(local_code)
}

/// Execute-and-detach mode (§4.G): stdio go to `/dev/null`, the child keeps
/// running after the vchan closes, and the reported exit code is always 0
/// since nothing is waited on.
pub fn exec_detach(config: &MediatorConfig, cmdline: &str) -> MediatorResult<i32> {
    check_cmdline_len(cmdline)?;
    signals::install()?;
    let mut conn = SysVchan::client_init(config.endpoint.domain, config.endpoint.port)?;
    let _negotiated = handshake::perform(&mut conn, config.local_protocol_version)?;
    // SAFETY: called once, single-threaded, before any child is spawned.
    unsafe { signals::set_agent_pid_env() };

    let _pid = spawn_detached(cmdline)?;
    exit_code::send(&mut conn, 0)?;
    conn.close();

    tracing::info!("execute-and-detach session finished");
    Ok(0)
}

/// Reject a command line over [`qrexec_proto::MAX_QREXEC_CMD_LEN`] bytes
/// before it ever reaches the shell, per §6.
fn check_cmdline_len(cmdline: &str) -> MediatorResult<()> {
    if cmdline.len() > qrexec_proto::MAX_QREXEC_CMD_LEN {
        return Err(crate::error::MediatorError::CommandTooLong(cmdline.len()));
    }
    Ok(())
}
