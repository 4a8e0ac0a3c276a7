use tokio::sync::mpsc::UnboundedReceiver;

use crate::api::BatchClient;
use crate::config::types::ServiceConfig;

use super::interface::{Engine, EngineHandle, Event, Request};

/// The real engine, talking to the batch service over HTTP.
pub struct HttpEngine {
    service: ServiceConfig,
}

impl HttpEngine {
    pub fn new(service: ServiceConfig) -> Self {
        Self { service }
    }
}

impl Engine for HttpEngine {
    fn start(self) -> EngineHandle {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Request>();
        let handle = EngineHandle::new(tx);
        let _ = std::thread::Builder::new()
            .name("batch-engine".to_owned())
            .spawn(move || {
                let rt = tokio::runtime::Runtime::new().expect("tokio runtime init");
                rt.block_on(self.run_loop(rx));
            });
        handle
    }
}

impl HttpEngine {
    async fn run_loop(self, mut rx: UnboundedReceiver<Request>) {
        let client = match BatchClient::new(&self.service) {
            Ok(client) => client,
            Err(e) => {
                tracing::error!("engine: cannot build client: {e:#}");
                fail_all(rx, &format!("{e:#}")).await;
                return;
            }
        };

        while let Some(req) = rx.recv().await {
            if matches!(req, Request::Shutdown) {
                tracing::debug!("engine: shutting down");
                break;
            }
            handle_request(req, &client).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Request dispatch
// ---------------------------------------------------------------------------

async fn handle_request(req: Request, client: &BatchClient) {
    tracing::debug!("engine: received request");
    match req {
        // --- Fetch items ---
        Request::FetchItems {
            filter,
            limit,
            reply_tx,
        } => match client.search(&filter, limit).await {
            Ok((items, total)) => {
                tracing::debug!(
                    "engine: sending ItemsFetched count={} total={total}",
                    items.len()
                );
                let _ = reply_tx.send(Event::ItemsFetched { items, total });
            }
            Err(e) => {
                tracing::debug!("engine: FetchItems error: {e:#}");
                let _ = reply_tx.send(Event::FetchError {
                    context: "FetchItems".to_owned(),
                    message: format!("{e:#}"),
                });
            }
        },

        // --- Batch dispatch ---
        Request::DispatchBatch {
            dispatch_id,
            action,
            payload,
            params,
            reply_tx,
        } => match client.dispatch(action, &payload, params).await {
            Ok(result) => {
                tracing::debug!(
                    "engine: sending BatchCompleted #{dispatch_id} {} ok={} failed={}",
                    action.name(),
                    result.successful.len(),
                    result.failed.len()
                );
                let _ = reply_tx.send(Event::BatchCompleted {
                    dispatch_id,
                    action,
                    result,
                });
            }
            Err(e) => {
                tracing::debug!("engine: DispatchBatch #{dispatch_id} error: {e:#}");
                let _ = reply_tx.send(Event::BatchFailed {
                    dispatch_id,
                    action,
                    message: format!("{e:#}"),
                });
            }
        },

        Request::Shutdown => {}
    }
}

/// Answer every request with an error when no client could be built.
async fn fail_all(mut rx: UnboundedReceiver<Request>, message: &str) {
    while let Some(req) = rx.recv().await {
        match req {
            Request::FetchItems { reply_tx, .. } => {
                let _ = reply_tx.send(Event::FetchError {
                    context: "FetchItems".to_owned(),
                    message: message.to_owned(),
                });
            }
            Request::DispatchBatch {
                dispatch_id,
                action,
                reply_tx,
                ..
            } => {
                let _ = reply_tx.send(Event::BatchFailed {
                    dispatch_id,
                    action,
                    message: message.to_owned(),
                });
            }
            Request::Shutdown => break,
        }
    }
}
