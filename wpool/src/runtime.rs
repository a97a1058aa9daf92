//! Worker-side runtime: command dispatch loop over a framed connection
//!
//! A worker process connects back to the endpoint it was handed, then
//! answers command frames until it is told to disconnect or the peer goes
//! away. Handler failures are reported as ERROR frames; the worker stays up
//! and serves the next command.

use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::commands::{Command, ErrorKind, JobFlags};
use crate::connection::Connection;
use crate::error::{PoolError, Result};
use crate::payload::{
    self, ChmodArgs, ConfigPayload, DelArgs, DirEntry, DuResult, ErrorPayload, FileStat, HostPayload,
    ListEntriesPayload, PathArgs, PutArgs, SrcDestArgs, TruncateArgs,
};

const DATA_CHUNK: usize = 64 * 1024;

/// Protocol implementation behind a worker process.
///
/// One handler instance serves one connection; operations arrive strictly
/// sequentially.
#[async_trait]
pub trait ProtocolHandler: Send {
    fn name(&self) -> &str;

    /// Called when the application binds a host for this session
    fn set_host(&mut self, _host: &HostPayload) {}

    /// Called when the application pushes a configuration map
    fn set_config(&mut self, _config: &ConfigPayload) {}

    async fn stat(&mut self, path: &str) -> Result<FileStat>;
    async fn get(&mut self, path: &str) -> Result<Vec<u8>>;
    async fn put(&mut self, path: &str, data: Vec<u8>, flags: JobFlags) -> Result<()>;
    async fn listdir(&mut self, path: &str) -> Result<Vec<DirEntry>>;
    async fn mkdir(&mut self, path: &str) -> Result<()>;
    async fn rename(&mut self, src: &str, dest: &str, flags: JobFlags) -> Result<()>;
    async fn copy(&mut self, src: &str, dest: &str, flags: JobFlags) -> Result<()>;
    async fn del(&mut self, path: &str, is_file: bool) -> Result<()>;
    async fn chmod(&mut self, path: &str, mode: u32) -> Result<()>;
    async fn truncate(&mut self, path: &str, length: u64) -> Result<()>;
    async fn du(&mut self, path: &str, recursive: bool) -> Result<DuResult>;

    /// Protocol-specific escape hatch; unsupported by default
    async fn special(&mut self, _data: &[u8]) -> Result<Vec<u8>> {
        Err(PoolError::job(ErrorKind::UnsupportedAction, "special not supported"))
    }
}

/// Connect back to the pool and serve commands until disconnected
pub async fn serve(endpoint: &Path, handler: impl ProtocolHandler) -> Result<()> {
    let connection = Connection::connect_to(endpoint).await?;
    serve_connection(connection, handler).await
}

/// Serve commands on an established connection (used directly by tests)
pub async fn serve_connection(mut connection: Connection, mut handler: impl ProtocolHandler) -> Result<()> {
    debug!(protocol = handler.name(), "worker runtime: dispatch loop started");

    loop {
        let task = match connection.next_command().await {
            Ok(task) => task,
            Err(PoolError::Disconnected) => {
                debug!("worker runtime: peer disconnected");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let cmd = match Command::try_from(task.cmd) {
            Ok(cmd) => cmd,
            Err(code) => {
                warn!(code, "worker runtime: unknown command code");
                send_error(
                    &mut connection,
                    ErrorKind::UnsupportedAction,
                    &format!("unknown command code {code}"),
                )
                .await?;
                continue;
            }
        };

        match cmd {
            Command::Host => {
                if let Ok(host) = payload::from_bytes::<HostPayload>(&task.payload) {
                    handler.set_host(&host);
                }
            }
            Command::Config => {
                if let Ok(config) = payload::from_bytes::<ConfigPayload>(&task.payload) {
                    handler.set_config(&config);
                }
            }
            Command::Connect | Command::None => {}
            Command::Disconnect => {
                debug!("worker runtime: disconnect requested");
                return Ok(());
            }
            op => {
                if let Err(e) = execute(&mut connection, &mut handler, op, &task.payload).await {
                    match e {
                        PoolError::Disconnected => return Ok(()),
                        e => send_error(&mut connection, e.kind(), &e.to_string()).await?,
                    }
                }
            }
        }
    }
}

async fn send_error(connection: &mut Connection, code: ErrorKind, message: &str) -> Result<()> {
    let body = payload::to_bytes(&ErrorPayload {
        code,
        message: message.to_string(),
    })?;
    connection.send(Command::Error.code(), &body).await
}

async fn send_finished(connection: &mut Connection) -> Result<()> {
    connection.send(Command::Finished.code(), b"").await
}

/// Run one operation and stream its replies; the caller turns errors into
/// ERROR frames
async fn execute(
    connection: &mut Connection,
    handler: &mut impl ProtocolHandler,
    cmd: Command,
    body: &[u8],
) -> Result<()> {
    match cmd {
        Command::Stat => {
            let args: PathArgs = payload::from_bytes(body)?;
            let stat = handler.stat(&args.path).await?;
            connection
                .send(Command::StatEntry.code(), &payload::to_bytes(&stat)?)
                .await?;
            send_finished(connection).await
        }

        Command::Get => {
            let args: PathArgs = payload::from_bytes(body)?;
            let data = handler.get(&args.path).await?;
            for chunk in data.chunks(DATA_CHUNK) {
                connection.send(Command::Data.code(), chunk).await?;
            }
            send_finished(connection).await
        }

        Command::Put => {
            let args: PutArgs = payload::from_bytes(body)?;
            // File bytes arrive as DATA frames; an empty one marks EOF
            let mut data = Vec::new();
            loop {
                let task = connection.next_command().await?;
                if task.cmd != Command::Data.code() {
                    return Err(PoolError::job(
                        ErrorKind::Unknown,
                        format!("expected DATA during put, got {}", task.cmd),
                    ));
                }
                if task.payload.is_empty() {
                    break;
                }
                data.extend_from_slice(&task.payload);
            }
            handler.put(&args.path, data, args.flags).await?;
            send_finished(connection).await
        }

        Command::ListDir => {
            let args: PathArgs = payload::from_bytes(body)?;
            let entries = handler.listdir(&args.path).await?;
            connection
                .send(
                    Command::ListEntries.code(),
                    &payload::to_bytes(&ListEntriesPayload { entries })?,
                )
                .await?;
            send_finished(connection).await
        }

        Command::Mkdir => {
            let args: PathArgs = payload::from_bytes(body)?;
            handler.mkdir(&args.path).await?;
            send_finished(connection).await
        }

        Command::Rename => {
            let args: SrcDestArgs = payload::from_bytes(body)?;
            handler.rename(&args.src, &args.dest, args.flags).await?;
            send_finished(connection).await
        }

        Command::Copy => {
            let args: SrcDestArgs = payload::from_bytes(body)?;
            handler.copy(&args.src, &args.dest, args.flags).await?;
            send_finished(connection).await
        }

        Command::Del => {
            let args: DelArgs = payload::from_bytes(body)?;
            handler.del(&args.path, args.is_file).await?;
            send_finished(connection).await
        }

        Command::Chmod => {
            let args: ChmodArgs = payload::from_bytes(body)?;
            handler.chmod(&args.path, args.mode).await?;
            send_finished(connection).await
        }

        Command::Truncate => {
            let args: TruncateArgs = payload::from_bytes(body)?;
            handler.truncate(&args.path, args.length).await?;
            send_finished(connection).await
        }

        Command::Du | Command::DuRecursive => {
            let args: PathArgs = payload::from_bytes(body)?;
            let usage = handler.du(&args.path, cmd == Command::DuRecursive).await?;
            connection
                .send(Command::Data.code(), &payload::to_bytes(&usage)?)
                .await?;
            send_finished(connection).await
        }

        Command::Special => {
            let reply = handler.special(body).await?;
            if !reply.is_empty() {
                connection.send(Command::Data.code(), &reply).await?;
            }
            send_finished(connection).await
        }

        other => Err(PoolError::job(
            ErrorKind::UnsupportedAction,
            format!("unsupported operation: {other:?}"),
        )),
    }
}
