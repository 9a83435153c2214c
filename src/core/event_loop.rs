// Coordinator actor: a single task multiplexing commands, the in-flight step,
// the refresh ticker, submission outcomes and the auto-submit timer

use crate::core::coordinator::{
    next_completion, Coordinator, CoordinatorError, CoordinatorResult, CoordinatorStatus,
};
use crate::core::submitter::AUTO_SUBMIT_PERIOD;
use crate::models::capture::SourceInfo;
use crate::models::pose::Variant;
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

const COMMAND_BUFFER: usize = 32;

type Reply<T> = oneshot::Sender<CoordinatorResult<T>>;

enum Request {
    AcquireWebcam(Reply<SourceInfo>),
    AcquireImage(Vec<u8>, Reply<SourceInfo>),
    AcquireVideoFile(Vec<u8>, Reply<SourceInfo>),
    Start(Reply<()>),
    Stop(Reply<()>),
    Release(Reply<()>),
    SwitchVariant(Variant, Reply<bool>),
    SubmitFrame(Reply<()>),
    SetAutoSubmit(bool, Reply<()>),
    SetBackendUrl(Option<String>, Reply<()>),
    Export(Reply<Vec<u8>>),
    ExportTo(Option<PathBuf>, Reply<PathBuf>),
    Status(Reply<CoordinatorStatus>),
    Shutdown(Reply<()>),
}

/// Cloneable handle for driving a spawned coordinator
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Request>,
}

impl CoordinatorHandle {
    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Request) -> CoordinatorResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| CoordinatorError::Closed)?;
        rx.await.map_err(|_| CoordinatorError::Closed)?
    }

    pub async fn acquire_webcam(&self) -> CoordinatorResult<SourceInfo> {
        self.call(Request::AcquireWebcam).await
    }

    pub async fn acquire_image(&self, bytes: Vec<u8>) -> CoordinatorResult<SourceInfo> {
        self.call(|reply| Request::AcquireImage(bytes, reply)).await
    }

    pub async fn acquire_video_file(&self, bytes: Vec<u8>) -> CoordinatorResult<SourceInfo> {
        self.call(|reply| Request::AcquireVideoFile(bytes, reply)).await
    }

    pub async fn start(&self) -> CoordinatorResult<()> {
        self.call(Request::Start).await
    }

    pub async fn stop(&self) -> CoordinatorResult<()> {
        self.call(Request::Stop).await
    }

    pub async fn release(&self) -> CoordinatorResult<()> {
        self.call(Request::Release).await
    }

    /// Returns whether detection resumed after the switch
    pub async fn switch_variant(&self, variant: Variant) -> CoordinatorResult<bool> {
        self.call(|reply| Request::SwitchVariant(variant, reply)).await
    }

    pub async fn submit_frame(&self) -> CoordinatorResult<()> {
        self.call(Request::SubmitFrame).await
    }

    pub async fn set_auto_submit(&self, enabled: bool) -> CoordinatorResult<()> {
        self.call(|reply| Request::SetAutoSubmit(enabled, reply)).await
    }

    pub async fn set_backend_url(&self, url: Option<String>) -> CoordinatorResult<()> {
        self.call(|reply| Request::SetBackendUrl(url, reply)).await
    }

    pub async fn export(&self) -> CoordinatorResult<Vec<u8>> {
        self.call(Request::Export).await
    }

    pub async fn export_to(&self, path: Option<PathBuf>) -> CoordinatorResult<PathBuf> {
        self.call(|reply| Request::ExportTo(path, reply)).await
    }

    pub async fn status(&self) -> CoordinatorResult<CoordinatorStatus> {
        self.call(Request::Status).await
    }

    /// Release all resources and end the actor task
    pub async fn shutdown(&self) -> CoordinatorResult<()> {
        self.call(Request::Shutdown).await
    }
}

/// Spawn the coordinator on its own task
pub fn spawn(coordinator: Coordinator) -> (CoordinatorHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    let task = tokio::spawn(run(coordinator, rx));
    (CoordinatorHandle { tx }, task)
}

async fn run(mut coordinator: Coordinator, mut commands: mpsc::Receiver<Request>) {
    let mut refresh = time::interval(coordinator.config().frame_interval());
    refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut auto_submit = time::interval_at(Instant::now() + AUTO_SUBMIT_PERIOD, AUTO_SUBMIT_PERIOD);
    auto_submit.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut submissions = coordinator.take_submission_events();
    info!("Coordinator task started");

    loop {
        let wants_tick = coordinator.wants_tick();

        tokio::select! {
            request = commands.recv() => {
                let Some(request) = request else {
                    debug!("All coordinator handles dropped");
                    break;
                };
                if let Some(done) = handle(&mut coordinator, request).await {
                    let _ = done.send(Ok(()));
                    info!("Coordinator task stopped");
                    return;
                }
            }

            completion = next_completion(&mut coordinator.in_flight) => {
                coordinator.finish_step(completion);
            }

            _ = refresh.tick(), if wants_tick => {
                coordinator.tick();
            }

            Some(result) = recv_submission(&mut submissions) => {
                coordinator.handle_submission(result);
            }

            _ = auto_submit.tick() => {
                coordinator.auto_submit_due();
            }
        }
    }

    coordinator.shutdown().await;
    info!("Coordinator task stopped");
}

async fn recv_submission<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Apply one request. Returns the reply channel when the request was a shutdown.
async fn handle(coordinator: &mut Coordinator, request: Request) -> Option<Reply<()>> {
    match request {
        Request::AcquireWebcam(reply) => {
            let _ = reply.send(coordinator.acquire_webcam().await);
        }
        Request::AcquireImage(bytes, reply) => {
            let _ = reply.send(coordinator.acquire_image(&bytes).await);
        }
        Request::AcquireVideoFile(bytes, reply) => {
            let _ = reply.send(coordinator.acquire_video_file(&bytes).await);
        }
        Request::Start(reply) => {
            let _ = reply.send(coordinator.start().await);
        }
        Request::Stop(reply) => {
            coordinator.stop();
            let _ = reply.send(Ok(()));
        }
        Request::Release(reply) => {
            coordinator.release();
            let _ = reply.send(Ok(()));
        }
        Request::SwitchVariant(variant, reply) => {
            let _ = reply.send(coordinator.switch_variant(variant).await);
        }
        Request::SubmitFrame(reply) => {
            let _ = reply.send(coordinator.submit_frame());
        }
        Request::SetAutoSubmit(enabled, reply) => {
            coordinator.set_auto_submit(enabled);
            let _ = reply.send(Ok(()));
        }
        Request::SetBackendUrl(url, reply) => {
            let _ = reply.send(coordinator.set_backend_url(url).await);
        }
        Request::Export(reply) => {
            let _ = reply.send(coordinator.export());
        }
        Request::ExportTo(path, reply) => {
            let _ = reply.send(coordinator.export_to(path.as_deref()));
        }
        Request::Status(reply) => {
            let _ = reply.send(Ok(coordinator.status()));
        }
        Request::Shutdown(reply) => {
            coordinator.shutdown().await;
            return Some(reply);
        }
    }
    None
}
