// src/stream.rs
//! Periodic publisher behind the live endpoints.
//!
//! Each subscriber gets its own task that recomputes a snapshot on a fixed
//! interval and pushes it as a Server-Sent Events frame. Dropping the
//! [`Subscription`] (the client went away) aborts the task and its timer.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use actix_web::http::header;
use actix_web::{web, HttpResponse};
use futures_util::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::error::ApiResult;
use crate::monitoring::StreamGuard;

/// Frames buffered per subscriber before the publisher waits.
const CHANNEL_CAPACITY: usize = 4;

/// `data: <json>\n\n`
pub fn sse_frame<T: Serialize>(value: &T) -> Result<web::Bytes, serde_json::Error> {
    let json = serde_json::to_string(value)?;
    Ok(web::Bytes::from(format!("data: {}\n\n", json)))
}

pub struct Subscription {
    rx: mpsc::Receiver<web::Bytes>,
    task: JoinHandle<()>,
    _guard: Option<StreamGuard>,
}

impl Stream for Subscription {
    type Item = Result<web::Bytes, actix_web::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx).map(|frame| frame.map(Ok))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Emits `compute()` immediately, then every `period`, until the subscription is dropped.
///
/// A failed computation is logged and skipped; the next tick tries again.
pub fn subscribe<T, F, Fut>(name: &'static str, period: Duration, guard: Option<StreamGuard>, compute: F) -> Subscription
where
    T: Serialize + Send + 'static,
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ApiResult<T>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    let task = tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log::debug!("{} stream opened", name);

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                _ = ticker.tick() => {}
            }

            let frame = match compute().await {
                Ok(snapshot) => match sse_frame(&snapshot) {
                    Ok(frame) => frame,
                    Err(e) => {
                        log::error!("{} stream: failed to encode snapshot: {}", name, e);
                        continue;
                    }
                },
                Err(e) => {
                    log::warn!("{} stream: recompute failed, retrying next tick: {}", name, e);
                    continue;
                }
            };

            if tx.send(frame).await.is_err() {
                break;
            }
        }

        log::debug!("{} stream closed", name);
    });

    Subscription { rx, task, _guard: guard }
}

pub fn sse_response(subscription: Subscription) -> HttpResponse {
    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        // Keeps the Compress middleware from buffering frames
        .insert_header((header::CONTENT_ENCODING, "identity"))
        .streaming(subscription)
}
