//! Supervision of the local reference server.
//!
//! The server is this same executable run with `serve-knowledge`. If the
//! configured port already accepts connections the existing listener is used
//! as is and never stopped by us.

use responder_core::AppConfig;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidecarState {
    NotStarted,
    Starting,
    Ready,
    /// Someone else owns the listener.
    External,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct SidecarOptions {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub host: String,
    pub port: u16,
    pub ready_attempts: u32,
    pub ready_interval: Duration,
    pub stop_grace: Duration,
}

impl SidecarOptions {
    /// Options that re-run `program` as the reference server described by
    /// `config`.
    pub fn serve_knowledge(program: impl Into<PathBuf>, config: &AppConfig) -> Self {
        let sidecar = &config.sidecar;
        let args = vec![
            "serve-knowledge".to_string(),
            "--root".to_string(),
            config.knowledge.path.display().to_string(),
            "--host".to_string(),
            sidecar.host.clone(),
            "--port".to_string(),
            sidecar.port.to_string(),
            "--path".to_string(),
            sidecar.path.clone(),
            "--server-name".to_string(),
            config.llm.mcp.server_name.clone(),
            "--instruction-file".to_string(),
            config.knowledge.instruction_file.clone(),
        ];
        Self {
            program: program.into(),
            args,
            host: sidecar.host.clone(),
            port: sidecar.port,
            ready_attempts: sidecar.ready_attempts.max(1),
            ready_interval: Duration::from_millis(sidecar.ready_interval_ms),
            stop_grace: Duration::from_secs(sidecar.stop_grace_secs),
        }
    }
}

pub struct ReferenceSidecar {
    options: SidecarOptions,
    state: SidecarState,
    child: Option<Child>,
}

impl ReferenceSidecar {
    pub fn new(options: SidecarOptions) -> Self {
        Self {
            options,
            state: SidecarState::NotStarted,
            child: None,
        }
    }

    pub fn state(&self) -> SidecarState {
        self.state
    }

    /// Ensures a server is listening. Returns `true` when one is usable,
    /// either ours or an external one.
    pub async fn start(&mut self) -> bool {
        if matches!(self.state, SidecarState::Ready | SidecarState::External) {
            return true;
        }

        if self.port_open().await {
            info!(
                "Reference server already listening on {}:{}; using it",
                self.options.host, self.options.port
            );
            self.state = SidecarState::External;
            return true;
        }

        let mut command = Command::new(&self.options.program);
        command
            .args(&self.options.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(
                    "Failed to launch reference server {}: {}",
                    self.options.program.display(),
                    e
                );
                self.state = SidecarState::Stopped;
                return false;
            }
        };
        info!("Reference server launched (pid {:?})", child.id());
        self.child = Some(child);
        self.state = SidecarState::Starting;

        for attempt in 1..=self.options.ready_attempts {
            if self.port_open().await {
                info!("Reference server ready after {} probes", attempt);
                self.state = SidecarState::Ready;
                return true;
            }
            if let Some(child) = self.child.as_mut() {
                if let Ok(Some(status)) = child.try_wait() {
                    error!("Reference server exited during startup: {}", status);
                    self.child = None;
                    self.state = SidecarState::Stopped;
                    return false;
                }
            }
            tokio::time::sleep(self.options.ready_interval).await;
        }

        warn!(
            "Reference server not ready after {} probes; stopping it",
            self.options.ready_attempts
        );
        self.stop().await;
        false
    }

    /// Terminates a server we launched. External listeners are left alone.
    pub async fn stop(&mut self) {
        if self.state == SidecarState::External {
            debug!("Leaving external reference server running");
        }
        if let Some(child) = self.child.take() {
            shutdown(child, self.options.stop_grace).await;
        }
        if self.state != SidecarState::NotStarted {
            self.state = SidecarState::Stopped;
        }
    }

    async fn port_open(&self) -> bool {
        let addr = (self.options.host.as_str(), self.options.port);
        matches!(
            tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await,
            Ok(Ok(_))
        )
    }
}

async fn shutdown(mut child: Child, grace: Duration) {
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }
    if request_termination(&child) {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                info!("Reference server stopped ({})", status);
                return;
            }
            Ok(Err(e)) => warn!("Waiting for reference server failed: {}", e),
            Err(_) => warn!("Reference server ignored termination for {:?}; killing", grace),
        }
    }
    if let Err(e) = child.kill().await {
        warn!("Failed to kill reference server: {}", e);
    }
}

#[cfg(unix)]
fn request_termination(child: &Child) -> bool {
    let Some(pid) = child.id() else {
        return false;
    };
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: plain signal delivery to a child we spawned.
    unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn request_termination(_child: &Child) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn options(program: &str, args: &[&str], port: u16) -> SidecarOptions {
        SidecarOptions {
            program: PathBuf::from(program),
            args: args.iter().map(|a| a.to_string()).collect(),
            host: "127.0.0.1".to_string(),
            port,
            ready_attempts: 50,
            ready_interval: Duration::from_millis(20),
            stop_grace: Duration::from_secs(3),
        }
    }

    async fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn test_serve_knowledge_arguments() {
        let config = AppConfig::default();
        let options = SidecarOptions::serve_knowledge("/usr/bin/forum-responder", &config);
        assert_eq!(options.args[0], "serve-knowledge");
        let port_flag = options.args.iter().position(|a| a == "--port").unwrap();
        assert_eq!(options.args[port_flag + 1], "8765");
        assert_eq!(options.ready_attempts, 50);
        assert_eq!(options.stop_grace, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_existing_listener_is_external_and_survives_stop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut sidecar = ReferenceSidecar::new(options("/nonexistent/forum-responder", &[], port));

        assert!(sidecar.start().await);
        assert_eq!(sidecar.state(), SidecarState::External);

        sidecar.stop().await;
        assert_eq!(sidecar.state(), SidecarState::Stopped);
        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_ok());
    }

    #[tokio::test]
    async fn test_spawn_failure_reports_stopped() {
        let port = free_port().await;
        let mut sidecar = ReferenceSidecar::new(options("/nonexistent/forum-responder", &[], port));
        assert!(!sidecar.start().await);
        assert_eq!(sidecar.state(), SidecarState::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_child_exiting_early_is_not_ready() {
        let port = free_port().await;
        let mut sidecar = ReferenceSidecar::new(options("sh", &["-c", "exit 3"], port));
        assert!(!sidecar.start().await);
        assert_eq!(sidecar.state(), SidecarState::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ready_child_is_terminated_on_stop() {
        let port = free_port().await;
        // the child only idles; the test opens the port on its behalf
        let mut sidecar = ReferenceSidecar::new(options("sleep", &["30"], port));
        let opener = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            TcpListener::bind(("127.0.0.1", port)).await.unwrap()
        });

        assert!(sidecar.start().await);
        assert_eq!(sidecar.state(), SidecarState::Ready);
        let _listener = opener.await.unwrap();

        let started = std::time::Instant::now();
        sidecar.stop().await;
        assert_eq!(sidecar.state(), SidecarState::Stopped);
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
