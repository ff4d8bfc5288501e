//! Functions/types for reading incoming messages from UDP
use futures::ready;
use pin_project::pin_project;
use tokio_stream::Stream;
use tokio_util::codec::BytesCodec;
use unix_udp_sock::{framed::UdpFramed, UdpSocket};

use std::{
    borrow::Borrow,
    io,
    pin::Pin,
    sync::Arc,
    task::{self, Poll},
};

use crate::{
    handler::{MsgContext, State},
    server::msg::SerialMsg,
};

/// Abstracts reading buffers off of a `UdpSocket` and converting
/// that raw data into a stream of [`MsgContext`]
///
/// [`MsgContext`]: crate::server::context::MsgContext
#[pin_project]
#[derive(Debug)]
pub(crate) struct UdpStream<S> {
    #[pin]
    stream: UdpFramed<BytesCodec, S>,
    state: Arc<State>,
}

impl<S> UdpStream<S>
where
    S: Borrow<UdpSocket>,
{
    /// Create a new stream from a socket and `State`
    pub(crate) fn new(stream: S, state: Arc<State>) -> Self {
        // we just want a stream of bytes, messages will be decoded later
        UdpStream {
            stream: UdpFramed::new(stream, BytesCodec::new()),
            state,
        }
    }
}

impl<S> Stream for UdpStream<S>
where
    S: Borrow<UdpSocket>,
{
    type Item = io::Result<MsgContext>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Option<Self::Item>> {
        let pin = self.project();
        match ready!(pin.stream.poll_next(cx)) {
            Some(res) => {
                let (buf, meta) = res?;
                if buf.len() > proto::v4::MAX_DGRAM_SIZE {
                    return Poll::Ready(Some(Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "datagram exceeds maximum size",
                    ))));
                }
                let msg = SerialMsg::new(buf.freeze(), meta.addr);
                Poll::Ready(Some(MsgContext::new(msg, meta, Arc::clone(pin.state))))
            }
            None => Poll::Ready(None),
        }
    }
}
