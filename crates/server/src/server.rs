use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};

use facestream_core::pipeline::frame_dispatcher::FrameDispatcher;
use facestream_core::stream::decoder_process::DecoderLauncher;
use facestream_core::stream::throttle::ThrottleConfig;

use crate::connection;
use crate::proxy::{self, ReverseProxy};

/// Process-wide collaborators shared by every connection.
pub struct AppState {
    pub ws_path: String,
    pub launcher: Arc<dyn DecoderLauncher>,
    pub dispatcher: FrameDispatcher,
    pub throttle: ThrottleConfig,
    pub proxy: Option<ReverseProxy>,
    next_session: AtomicU64,
}

impl AppState {
    pub fn new(
        ws_path: String,
        launcher: Arc<dyn DecoderLauncher>,
        dispatcher: FrameDispatcher,
        throttle: ThrottleConfig,
        proxy: Option<ReverseProxy>,
    ) -> Self {
        Self {
            ws_path,
            launcher,
            dispatcher,
            throttle,
            proxy,
            next_session: AtomicU64::new(1),
        }
    }

    pub fn next_session_id(&self) -> u64 {
        self.next_session.fetch_add(1, Ordering::Relaxed)
    }
}

pub async fn serve<F>(addr: SocketAddr, state: Arc<AppState>, shutdown: F) -> Result<(), hyper::Error>
where
    F: Future<Output = ()>,
{
    let make_svc = make_service_fn(move |_conn| {
        let state = Arc::clone(&state);
        async move {
            Ok::<_, Infallible>(service_fn(move |req| handle_request(req, Arc::clone(&state))))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_svc);
    log::info!("Listening on http://{}", server.local_addr());

    server.with_graceful_shutdown(shutdown).await
}

async fn handle_request(
    req: Request<Body>,
    state: Arc<AppState>,
) -> Result<Response<Body>, Infallible> {
    if req.uri().path() == state.ws_path {
        return Ok(connection::upgrade(req, state));
    }

    let response = match &state.proxy {
        Some(proxy) => proxy.handle(req).await,
        None => proxy::json_error(StatusCode::NOT_FOUND, "Not found"),
    };
    Ok(response)
}
