/// Errors the mediator surfaces, grouped by the taxonomy in the design
/// doc: `ProtocolIncompatible` and `ProtocolError` are fatal with no further
/// I/O, `VchanError` is fatal and skips the exit-code frame, `SpawnError`
/// and `FdError` are fatal for the session that raised them.
#[derive(Debug, thiserror::Error)]
pub enum MediatorError {
    #[error("handshake failed: {0}")]
    ProtocolIncompatible(#[from] qrexec_proto::ProtocolError),

    #[error("vchan error: {0}")]
    Vchan(#[from] vchan::VchanError),

    #[error("failed to spawn child: {0}")]
    Spawn(std::io::Error),

    #[error("command line too long: {0} bytes (max {max})", max = qrexec_proto::MAX_QREXEC_CMD_LEN)]
    CommandTooLong(usize),

    #[error("fd operation failed: {0}")]
    Fd(std::io::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("nix error: {0}")]
    Nix(#[from] nix::Error),
}

pub type MediatorResult<T> = Result<T, MediatorError>;
