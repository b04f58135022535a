use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, Payload},
    specs::{
        ContributionsIns, ContributionsRes, DisconnectRes, EvaluateIns, EvaluateRes, FitIns,
        FitRes, GetParametersIns, GetParametersRes, GradientsRes, IdentifyRes, ReconnectIns,
    },
};
use log::{debug, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    sync::Mutex,
    time,
};
use tokio_util::sync::CancellationToken;

use crate::orchestra::{
    error::{OrchestratorError, Result},
    registry::WorkerRegistry,
    worker::{Worker, WorkerId},
};

/// How long a freshly connected worker has to introduce itself.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// The largest `Connect` frame accepted from a connection that hasn't introduced itself.
const HANDSHAKE_FRAME_LEN: usize = 4 * 1024;

/// A worker reached through a framed `comms` channel.
///
/// Calls are strictly request/reply, one at a time. A call that times out leaves its
/// reply somewhere in the stream, so the worker is considered lost from then on.
pub struct RemoteWorker<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    id: WorkerId,
    channel: Mutex<(OnoReceiver<R>, OnoSender<W>)>,
    lost: AtomicBool,
}

impl<R, W> RemoteWorker<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Creates a new `RemoteWorker`.
    ///
    /// # Arguments
    /// * `id` - The id the worker introduced itself with.
    /// * `rx` - The receiving end of the worker's channel.
    /// * `tx` - The sending end of the worker's channel.
    pub fn new(id: WorkerId, rx: OnoReceiver<R>, tx: OnoSender<W>) -> Self {
        Self {
            id,
            channel: Mutex::new((rx, tx)),
            lost: AtomicBool::new(false),
        }
    }

    /// Sends a command and waits for the worker's reply.
    ///
    /// # Returns
    /// The reply's payload or an io error if the exchange failed.
    async fn call(&self, cmd: Command, timeout: Option<Duration>) -> io::Result<Payload> {
        if self.lost.load(Ordering::Acquire) {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "worker was lost in a previous call",
            ));
        }

        let kind = cmd.kind();
        let exchange = async {
            let mut channel = self.channel.lock().await;
            let (rx, tx) = &mut *channel;

            debug!(worker_id = self.id.as_str(); "sending {kind}");
            tx.send(&Msg::Control(cmd)).await?;

            match rx.recv().await? {
                Msg::Data(payload) => Ok(payload),
                Msg::Err(e) => Err(io::Error::other(e)),
                msg => Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unexpected reply to {kind}: {msg:?}"),
                )),
            }
        };

        let res = match timeout {
            Some(duration) => time::timeout(duration, exchange).await.unwrap_or_else(|_| {
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("{kind} timed out after {duration:?}"),
                ))
            }),
            None => exchange.await,
        };

        // Error replies and undecodable frames leave the stream in sync.
        if let Err(e) = &res {
            if !matches!(e.kind(), io::ErrorKind::Other | io::ErrorKind::InvalidData) {
                self.lost.store(true, Ordering::Release);
            }
        }

        res
    }
}

fn mismatch(expected: &str, payload: Payload) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("expected a {expected} reply, got {}", payload.kind()),
    )
}

#[async_trait]
impl<R, W> Worker for RemoteWorker<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn id(&self) -> &WorkerId {
        &self.id
    }

    fn is_connected(&self) -> bool {
        !self.lost.load(Ordering::Acquire)
    }

    async fn fit(&self, ins: FitIns, timeout: Option<Duration>) -> io::Result<FitRes> {
        match self.call(Command::Fit(ins), timeout).await? {
            Payload::Fit(res) => Ok(res),
            other => Err(mismatch("fit", other)),
        }
    }

    async fn evaluate(
        &self,
        ins: EvaluateIns,
        timeout: Option<Duration>,
    ) -> io::Result<EvaluateRes> {
        match self.call(Command::Evaluate(ins), timeout).await? {
            Payload::Evaluate(res) => Ok(res),
            other => Err(mismatch("evaluate", other)),
        }
    }

    async fn get_parameters(
        &self,
        ins: GetParametersIns,
        timeout: Option<Duration>,
    ) -> io::Result<GetParametersRes> {
        match self.call(Command::GetParameters(ins), timeout).await? {
            Payload::GetParameters(res) => Ok(res),
            other => Err(mismatch("get_parameters", other)),
        }
    }

    async fn get_gradients(&self, timeout: Option<Duration>) -> io::Result<GradientsRes> {
        match self.call(Command::GetGradients, timeout).await? {
            Payload::Gradients(res) => Ok(res),
            other => Err(mismatch("gradients", other)),
        }
    }

    async fn get_contributions(
        &self,
        ins: ContributionsIns,
        timeout: Option<Duration>,
    ) -> io::Result<ContributionsRes> {
        match self.call(Command::GetContributions(ins), timeout).await? {
            Payload::Contributions(res) => Ok(res),
            other => Err(mismatch("contributions", other)),
        }
    }

    async fn reconnect(
        &self,
        ins: ReconnectIns,
        timeout: Option<Duration>,
    ) -> io::Result<DisconnectRes> {
        match self.call(Command::Reconnect(ins), timeout).await? {
            Payload::Disconnect(res) => Ok(res),
            other => Err(mismatch("disconnect", other)),
        }
    }

    async fn identify(&self, timeout: Option<Duration>) -> io::Result<IdentifyRes> {
        match self.call(Command::Identify, timeout).await? {
            Payload::Identify(res) => Ok(res),
            other => Err(mismatch("identify", other)),
        }
    }
}

/// Binds the listener workers connect to.
///
/// # Errors
/// Returns `ConnectionFailed` if the address can't be bound.
pub async fn listen(addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| OrchestratorError::ConnectionFailed {
            addr: addr.to_string(),
            source,
        })
}

/// Accepts workers until cancelled, registering each one once it introduces itself.
///
/// # Arguments
/// * `listener` - The bound listener.
/// * `registry` - Where connected workers get registered.
/// * `cancel` - Stops accepting when cancelled.
pub async fn accept_workers(
    listener: TcpListener,
    registry: Arc<WorkerRegistry>,
    cancel: CancellationToken,
) -> io::Result<()> {
    loop {
        let (stream, addr) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = cancel.cancelled() => return Ok(()),
        };

        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            let (rx, tx) = stream.into_split();
            let handshake = register_worker(rx, tx, &registry);

            match time::timeout(HANDSHAKE_TIMEOUT, handshake).await {
                Ok(Ok(id)) => info!(worker_id = id.as_str(); "worker connected from {addr}"),
                Ok(Err(e)) => warn!("connection from {addr} rejected: {e}"),
                Err(_) => warn!("connection from {addr} never introduced itself"),
            }
        });
    }
}

/// Waits for a worker's `Connect` message and registers it.
///
/// # Arguments
/// * `rx` - The reading half of the connection.
/// * `tx` - The writing half of the connection.
/// * `registry` - Where the worker gets registered.
///
/// # Returns
/// The worker's id or an io error if the handshake or the registration failed.
pub async fn register_worker<R, W>(rx: R, tx: W, registry: &WorkerRegistry) -> io::Result<WorkerId>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (mut rx, tx) = comms::channel(rx, tx);
    rx.set_max_frame_len(HANDSHAKE_FRAME_LEN);

    let worker_id = match rx.recv().await? {
        Msg::Connect { worker_id } => WorkerId::new(worker_id),
        msg => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("expected a connect message, got {msg:?}"),
            ));
        }
    };

    rx.set_max_frame_len(comms::MAX_FRAME_LEN);
    let worker = RemoteWorker::new(worker_id.clone(), rx, tx);
    if !registry.register(Arc::new(worker)) {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("worker {worker_id} is already registered"),
        ));
    }

    Ok(worker_id)
}
