//! Streaming response encoders.
//!
//! A [`ResponseEncoder`] is a decorator over a write sink: bytes go in through
//! [`ResponseEncoder::write`], compressed bytes come out, and
//! [`ResponseEncoder::close`] flushes the trailer. One encoder is built per
//! response and dropped with it.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};

use super::ContentEncoding;

/// Brotli quality used for on-the-fly compression (0-11)
const BROTLI_QUALITY: u32 = 5;

/// Brotli window size (log2)
const BROTLI_WINDOW: u32 = 22;

/// Internal buffer of the brotli compressor
const BROTLI_BUFFER_SIZE: usize = 4096;

pub trait ResponseEncoder: Send {
    /// Feed `chunk` through the encoder and return whatever compressed output
    /// is ready. The result may be empty while the compressor buffers input.
    fn write(&mut self, chunk: &[u8]) -> io::Result<Bytes>;

    /// Finish the stream and return the remaining compressed output.
    fn close(self: Box<Self>) -> io::Result<Bytes>;

    fn encoding(&self) -> ContentEncoding;
}

/// Build the encoder for `encoding`. Identity has no encoder.
pub fn for_encoding(encoding: ContentEncoding) -> Option<Box<dyn ResponseEncoder>> {
    match encoding {
        ContentEncoding::Brotli => Some(Box::new(BrotliEncoder::new())),
        ContentEncoding::Gzip => Some(Box::new(GzipEncoder::new())),
        ContentEncoding::Identity => None,
    }
}

/// Output buffer shared between a compressor and its owning encoder.
#[derive(Clone, Default)]
struct ChunkSink(Arc<Mutex<BytesMut>>);

impl ChunkSink {
    fn take(&self) -> io::Result<Bytes> {
        let mut buf = self
            .0
            .lock()
            .map_err(|_| io::Error::other("encoder output buffer poisoned"))?;
        Ok(buf.split().freeze())
    }
}

impl Write for ChunkSink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut buf = self
            .0
            .lock()
            .map_err(|_| io::Error::other("encoder output buffer poisoned"))?;
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct GzipEncoder {
    inner: flate2::write::GzEncoder<ChunkSink>,
    sink: ChunkSink,
}

impl GzipEncoder {
    pub fn new() -> Self {
        let sink = ChunkSink::default();
        Self {
            inner: flate2::write::GzEncoder::new(sink.clone(), flate2::Compression::default()),
            sink,
        }
    }
}

impl Default for GzipEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseEncoder for GzipEncoder {
    fn write(&mut self, chunk: &[u8]) -> io::Result<Bytes> {
        self.inner.write_all(chunk)?;
        self.sink.take()
    }

    fn close(self: Box<Self>) -> io::Result<Bytes> {
        let GzipEncoder { inner, sink } = *self;
        inner.finish()?;
        sink.take()
    }

    fn encoding(&self) -> ContentEncoding {
        ContentEncoding::Gzip
    }
}

pub struct BrotliEncoder {
    inner: brotli::CompressorWriter<ChunkSink>,
    sink: ChunkSink,
}

impl BrotliEncoder {
    pub fn new() -> Self {
        let sink = ChunkSink::default();
        Self {
            inner: brotli::CompressorWriter::new(
                sink.clone(),
                BROTLI_BUFFER_SIZE,
                BROTLI_QUALITY,
                BROTLI_WINDOW,
            ),
            sink,
        }
    }
}

impl Default for BrotliEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseEncoder for BrotliEncoder {
    fn write(&mut self, chunk: &[u8]) -> io::Result<Bytes> {
        self.inner.write_all(chunk)?;
        self.sink.take()
    }

    fn close(self: Box<Self>) -> io::Result<Bytes> {
        let BrotliEncoder { inner, sink } = *self;
        // into_inner flushes the final metablock into the sink
        drop(inner.into_inner());
        sink.take()
    }

    fn encoding(&self) -> ContentEncoding {
        ContentEncoding::Brotli
    }
}

struct EncodeState<S> {
    upstream: S,
    encoder: Option<Box<dyn ResponseEncoder>>,
}

/// Close the encoder if it is still open. Returns the trailer, or `None`
/// when the encoder was already closed or failed to close.
fn close_encoder(encoder: &mut Option<Box<dyn ResponseEncoder>>) -> Option<Bytes> {
    let encoder = encoder.take()?;
    let encoding = encoder.encoding();
    match encoder.close() {
        Ok(trailer) => Some(trailer),
        Err(e) => {
            tracing::warn!(error = %e, encoding = encoding.as_str(), "Failed to close response encoder");
            None
        }
    }
}

/// Wrap `body` so every data frame passes through `encoder`.
///
/// The encoder is closed exactly once: when the upstream body ends, when it
/// fails, or when encoding itself fails. A failure to close is logged and
/// the response ends without the trailer.
pub fn encode_body(body: Body, encoder: Box<dyn ResponseEncoder>) -> Body {
    let state = EncodeState {
        upstream: body.into_data_stream(),
        encoder: Some(encoder),
    };
    Body::from_stream(encoded_stream(state))
}

fn encoded_stream<S, E>(state: EncodeState<S>) -> impl Stream<Item = io::Result<Bytes>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: std::fmt::Display + Send + 'static,
{
    futures::stream::unfold(state, |mut state| async move {
        loop {
            // A closed encoder means the stream already ended
            state.encoder.as_ref()?;

            match state.upstream.next().await {
                Some(Ok(chunk)) => {
                    let written = match state.encoder.as_mut() {
                        Some(encoder) => encoder.write(&chunk),
                        None => return None,
                    };
                    match written {
                        Ok(out) if out.is_empty() => continue,
                        Ok(out) => return Some((Ok(out), state)),
                        Err(e) => {
                            tracing::warn!(error = %e, "Response encoding failed");
                            close_encoder(&mut state.encoder);
                            return Some((Err(e), state));
                        }
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Handler body failed while encoding");
                    close_encoder(&mut state.encoder);
                    return Some((Err(io::Error::other(e.to_string())), state));
                }
                None => {
                    return close_encoder(&mut state.encoder)
                        .filter(|trailer| !trailer.is_empty())
                        .map(|trailer| (Ok(trailer), state));
                }
            }
        }
    })
}
