use super::packet::{decode_command, NrpeError, Packet, PacketType};
use crate::checks::{run_blocking, CheckRegistry, CheckResult, CheckState};
use crate::config::NrpeConfig;
use crate::metrics::Metrics;
use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const NRPE_CHECK_COMMAND: &str = "_NRPE_CHECK";

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_secs(1);

const NASTY_CHARACTERS: &[char] = &[
    '$', '|', '`', '&', '>', '<', '\'', '"', '\\', '[', ']', '{', '}',
];

#[derive(Debug, Clone)]
pub struct NrpePolicy {
    pub allowed_hosts: Vec<IpAddr>,
    pub allow_arguments: bool,
    pub allow_nasty_characters: bool,
    pub timeout: Duration,
}

impl NrpePolicy {
    pub fn from_config(cfg: &NrpeConfig) -> Self {
        Self {
            allowed_hosts: cfg.allowed_hosts(),
            allow_arguments: cfg.allow_arguments,
            allow_nasty_characters: cfg.allow_nasty_characters,
            timeout: cfg.timeout(),
        }
    }

    pub fn is_allowed(&self, peer: IpAddr) -> bool {
        self.allowed_hosts.is_empty() || self.allowed_hosts.contains(&peer)
    }
}

#[derive(Clone)]
pub struct NrpeServer {
    registry: Arc<CheckRegistry>,
    metrics: Arc<Metrics>,
    policy: Arc<NrpePolicy>,
}

impl NrpeServer {
    pub fn new(registry: Arc<CheckRegistry>, metrics: Arc<Metrics>, policy: NrpePolicy) -> Self {
        Self {
            registry,
            metrics,
            policy: Arc::new(policy),
        }
    }

    pub async fn serve(self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(err) => {
                            handle_accept_error(err).await;
                            continue;
                        }
                    };
                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(err) = server.handle_connection(stream, peer).await {
                            warn!(peer = %peer, error = %err, "nrpe request failed");
                            server.metrics.inc_nrpe_request("error");
                        }
                    });
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("nrpe listener stopped");
                        break;
                    }
                }
            }
        }
    }

    pub async fn handle_connection<S>(
        &self,
        mut stream: S,
        peer: SocketAddr,
    ) -> Result<(), NrpeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if !self.policy.is_allowed(peer.ip()) {
            warn!(peer = %peer, "nrpe connection from host not in allowed_hosts");
            self.metrics.inc_nrpe_request("denied");
            return Ok(());
        }

        let timeout = self.policy.timeout;
        let request = with_timeout(timeout, Packet::read_from(&mut stream)).await?;
        request.verify(PacketType::Query)?;

        let (command, args) = decode_command(&request.payload_str());
        debug!(peer = %peer, command = %command, args = args.len(), "nrpe query");

        let result = self.execute(command, args).await;
        let response = Packet::response(result.state.code(), &result.plugin_output());
        with_timeout(timeout, response.write_to(&mut stream)).await?;

        self.metrics.inc_nrpe_request("ok");
        Ok(())
    }

    pub async fn execute(&self, command: String, args: Vec<String>) -> CheckResult {
        if command == NRPE_CHECK_COMMAND {
            return CheckResult::new(CheckState::Ok, crate::agent_version());
        }
        if !args.is_empty() && !self.policy.allow_arguments {
            return CheckResult::unknown("Arguments not allowed");
        }
        if !self.policy.allow_nasty_characters
            && args.iter().any(|a| a.contains(NASTY_CHARACTERS))
        {
            return CheckResult::unknown("Nasty characters in arguments");
        }

        let result = run_blocking(self.registry.clone(), command.clone(), args).await;
        self.metrics.inc_check_execution(&command, result.state);
        result
    }
}

fn is_connection_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

// Peer aborts retry at once; resource errors such as EMFILE back off.
async fn handle_accept_error(err: io::Error) {
    if is_connection_error(&err) {
        debug!(error = %err, "nrpe accept aborted by peer");
        return;
    }
    warn!(error = %err, backoff = ?ACCEPT_ERROR_BACKOFF, "nrpe accept failed");
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}

async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, NrpeError>
where
    F: Future<Output = Result<T, NrpeError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(NrpeError::Timeout(limit)),
    }
}
