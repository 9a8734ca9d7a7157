// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! HTTP/1.1 control plane.
//!
//! Two routes: `GET /check_subscriber?imsi=<digits>` for subscriber lookup
//! and `GET|POST /stop` to initiate graceful shutdown. `/stop` only
//! publishes the shutdown event; the accept loop exits through the engine's
//! own shutdown subscription like every other long-running loop.

use std::{io, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    Method, Request, Response, StatusCode,
    body::Incoming,
    header::{self, HeaderValue},
    server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    models::bcd::is_valid_imsi,
    server::{bus::EventBus, registry::SessionRegistry},
};

const SERVER_NAME: &str = concat!("pgw-server-rs/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum HttpEngineError {
    #[error("failed to bind HTTP listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: io::Error,
    },
}

pub struct HttpEngine {
    listener: TcpListener,
    registry: Arc<SessionRegistry>,
    bus: Arc<EventBus>,
    stop: CancellationToken,
}

impl HttpEngine {
    pub async fn bind(
        addr: SocketAddr,
        registry: Arc<SessionRegistry>,
        bus: Arc<EventBus>,
    ) -> Result<Self, HttpEngineError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| HttpEngineError::Bind { addr, source })?;
        info!(%addr, "HTTP engine listening");

        Ok(Self {
            listener,
            registry,
            bus,
            stop: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Accept loop; one task per connection. Requests within a connection
    /// are served in order by the HTTP/1.1 pipeline.
    pub async fn run(&self) -> Result<(), HttpEngineError> {
        loop {
            let (stream, peer) = tokio::select! {
                _ = self.stop.cancelled() => break,
                res = self.listener.accept() => match res {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("HTTP accept error: {e}");
                        continue;
                    },
                },
            };

            debug!(%peer, "new HTTP connection");
            let registry = self.registry.clone();
            let bus = self.bus.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let registry = registry.clone();
                    let bus = bus.clone();
                    async move {
                        Ok::<_, std::convert::Infallible>(handle_request(
                            &req, &registry, &bus,
                        ))
                    }
                });

                if let Err(e) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    debug!(%peer, "HTTP connection closed with error: {e}");
                }
            });
        }

        info!("HTTP engine stopped");
        Ok(())
    }
}

fn handle_request(
    req: &Request<Incoming>,
    registry: &SessionRegistry,
    bus: &EventBus,
) -> Response<Full<Bytes>> {
    debug!(method = %req.method(), target = %req.uri(), "HTTP request");

    match (req.method(), req.uri().path()) {
        (&Method::GET, "/check_subscriber") => {
            check_subscriber(req.uri().query(), registry)
        },
        (_, "/check_subscriber") => {
            text_response(StatusCode::BAD_REQUEST, "Unknown HTTP-method")
        },
        (&Method::GET | &Method::POST, "/stop") => {
            info!("received stop request via HTTP API");
            bus.publish_shutdown();
            text_response(StatusCode::OK, "Server shutdown initiated")
        },
        (_, "/stop") => text_response(StatusCode::BAD_REQUEST, "Unknown HTTP-method"),
        (_, path) => text_response(
            StatusCode::NOT_FOUND,
            format!("The resource '{path}' was not found."),
        ),
    }
}

fn check_subscriber(
    query: Option<&str>,
    registry: &SessionRegistry,
) -> Response<Full<Bytes>> {
    let Some(imsi) = query.and_then(|q| query_param(q, "imsi")) else {
        return text_response(
            StatusCode::BAD_REQUEST,
            "Missing imsi parameter. Expected: /check_subscriber?imsi=<6-15 digits>",
        );
    };

    if imsi.is_empty() || !is_valid_imsi(imsi) {
        return text_response(
            StatusCode::BAD_REQUEST,
            "Invalid IMSI format. Expected: /check_subscriber?imsi=<6-15 digits>",
        );
    }

    let body = if registry.has_active(imsi) {
        "active"
    } else {
        "not active"
    };
    info!(imsi, status = body, "subscriber status");

    text_response(StatusCode::OK, body)
}

fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        (k == key).then_some(v)
    })
}

fn text_response(
    status: StatusCode,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut res = Response::new(Full::new(body.into()));
    *res.status_mut() = status;
    res.headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    res.headers_mut()
        .insert(header::SERVER, HeaderValue::from_static(SERVER_NAME));
    res
}
