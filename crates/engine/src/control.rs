//! Line commands for a running robot over a Unix socket in its home
//! directory: `quit`, `reload` and `dump`.

use std::path::{Path, PathBuf};

#[cfg(unix)]
use {
    std::sync::Arc,
    tokio::{
        io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
        net::{UnixListener, UnixStream},
    },
    tracing::{debug, info, warn},
};

use {crate::engine::Shared, warren_config::Severity};

pub const SOCKET_NAME: &str = ".warren.sock";

pub fn socket_path(home: &Path) -> PathBuf {
    home.join(SOCKET_NAME)
}

fn respond(shared: &Shared, command: &str) -> String {
    match command {
        "quit" => {
            shared.shutdown();
            "ok: shutting down\n".into()
        },
        "reload" => match shared.reload() {
            Ok(report) => format!(
                "ok: reloaded with {} warning(s)\n",
                report.count(Severity::Warning)
            ),
            Err(e) => format!("error: {e}\n"),
        },
        "dump" => match shared.snapshot().dump() {
            Ok(yaml) => yaml,
            Err(e) => format!("error: {e}\n"),
        },
        other => format!("error: unknown command \"{other}\"\n"),
    }
}

#[cfg(unix)]
pub(crate) async fn serve(shared: Arc<Shared>, path: PathBuf) {
    // A socket left by a robot that did not exit cleanly.
    let _ = std::fs::remove_file(&path);
    let listener = match UnixListener::bind(&path) {
        Ok(l) => l,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "control socket unavailable");
            return;
        },
    };
    info!(path = %path.display(), "control socket listening");
    loop {
        tokio::select! {
            () = shared.stop.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let shared = Arc::clone(&shared);
                    tokio::spawn(async move {
                        if let Err(e) = handle(&shared, stream).await {
                            debug!(error = %e, "control connection");
                        }
                    });
                },
                Err(e) => warn!(error = %e, "control socket accept"),
            },
        }
    }
    let _ = std::fs::remove_file(&path);
}

#[cfg(unix)]
async fn handle(shared: &Shared, stream: UnixStream) -> std::io::Result<()> {
    let (rd, mut wr) = stream.into_split();
    let mut lines = BufReader::new(rd).lines();
    if let Some(line) = lines.next_line().await? {
        let command = line.trim();
        info!(command, "control command");
        wr.write_all(respond(shared, command).as_bytes()).await?;
    }
    wr.shutdown().await
}

/// Send one command to the robot whose home is `home` and return its
/// answer.
#[cfg(unix)]
pub async fn send_command(home: &Path, command: &str) -> std::io::Result<String> {
    let mut stream = UnixStream::connect(socket_path(home)).await?;
    stream.write_all(format!("{command}\n").as_bytes()).await?;
    let mut reply = String::new();
    stream.read_to_string(&mut reply).await?;
    Ok(reply)
}

#[cfg(not(unix))]
pub async fn send_command(_home: &Path, _command: &str) -> std::io::Result<String> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "the control socket needs a unix platform",
    ))
}
