use core::pin::Pin;
use core::task::{Context, Poll};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_core::stream::Stream;
use pin_project::pin_project;

use crate::Digester;

/// Wrapper around a byte stream that feeds every chunk through a [`Digester`]
/// as it is read and forwarded to the next consumer.
#[pin_project]
pub struct DigestStream<S> {
    #[pin]
    inner: S,
    digester: Arc<Mutex<Digester>>,
}

impl<S> DigestStream<S> {
    pub fn new(inner: S, digester: Arc<Mutex<Digester>>) -> Self {
        Self { inner, digester }
    }
}

impl<S, E> Stream for DigestStream<S>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
{
    type Item = std::result::Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(bytes))) => {
                {
                    let mut g = this.digester.lock().expect(
                        "only one instance of the digester should ever be active at a time",
                    );
                    g.update(bytes.as_ref());
                }
                Poll::Ready(Some(Ok(bytes)))
            }
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}
