//! Response body tee.
//!
//! # Responsibilities
//! - Pass every response frame to the client unchanged and immediately
//! - Mirror data frames into a side buffer
//! - Report the captured response exactly once, when the body is complete
//!
//! # Design Decisions
//! - Completion is detected three ways: the stream yields `None`, the inner
//!   body reports end-of-stream, or the declared `Content-Length` has been
//!   reached (hyper stops polling a length-delimited body once it is full)
//! - A body dropped before completion (client went away) reports nothing
//! - An upstream error mid-stream reports what was captured so far

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::http::{header, StatusCode};
use axum::response::Response;
use bytes::BytesMut;
use http_body::{Body as HttpBody, Frame, SizeHint};

use crate::capture::normalize::is_gzip_encoded;

/// Status and bytes the client actually received.
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub status: StatusCode,
    pub gzip: bool,
    pub body: Bytes,
}

type OnComplete = Box<dyn FnOnce(CapturedResponse) + Send + 'static>;

/// A body wrapper that tees data frames into a buffer.
pub struct CaptureBody {
    inner: Body,
    buffer: BytesMut,
    status: StatusCode,
    gzip: bool,
    expected_len: Option<u64>,
    on_complete: Option<OnComplete>,
}

impl CaptureBody {
    /// Wrap a response so its body is captured; `on_complete` runs once the
    /// whole body has been handed to the client.
    pub fn wrap<F>(response: Response, on_complete: F) -> Response
    where
        F: FnOnce(CapturedResponse) + Send + 'static,
    {
        let (parts, body) = response.into_parts();

        let expected_len = parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .or_else(|| body.size_hint().exact());

        let capture = CaptureBody {
            status: parts.status,
            gzip: is_gzip_encoded(&parts.headers),
            buffer: BytesMut::with_capacity(expected_len.unwrap_or(0).min(64 * 1024) as usize),
            expected_len,
            inner: body,
            on_complete: Some(Box::new(on_complete)),
        };

        Response::from_parts(parts, Body::new(capture))
    }

    fn is_complete(&self) -> bool {
        self.inner.is_end_stream()
            || self
                .expected_len
                .is_some_and(|len| self.buffer.len() as u64 >= len)
    }

    fn finish(&mut self) {
        if let Some(on_complete) = self.on_complete.take() {
            on_complete(CapturedResponse {
                status: self.status,
                gzip: self.gzip,
                body: self.buffer.split().freeze(),
            });
        }
    }
}

impl HttpBody for CaptureBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.buffer.extend_from_slice(data);
                }
                if this.is_complete() {
                    this.finish();
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => {
                tracing::debug!(error = %e, "Response body ended with an error");
                this.finish();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for CaptureBody {
    fn drop(&mut self) {
        // Bodies that were never polled (already empty) still complete.
        if self.on_complete.is_some() && self.is_complete() {
            self.finish();
        }
    }
}
