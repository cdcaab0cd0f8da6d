use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;

use crate::error::DecodeError;
use crate::parser::{Event, Parser};

/// Decodes a stream of byte chunks into a stream of [`Event`]s.
///
/// Wraps any `Stream<Item = Result<_, E>>` of byte chunks, such as an HTTP
/// response body, and yields the events it contains. End of input uses
/// soft-EOF semantics: a pending event without a trailing blank line is
/// still dispatched.
///
/// After any error (transport or parse) the stream is fused and yields
/// nothing further.
#[derive(Debug)]
pub struct EventStream<S> {
    inner: S,
    parser: Parser,
    ready: VecDeque<Event>,
    done: bool,
}

impl<S> EventStream<S> {
    pub fn new(inner: S) -> Self {
        Self::with_parser(inner, Parser::new())
    }

    /// Uses a preconfigured parser, e.g. one with a custom event size limit.
    pub fn with_parser(inner: S, parser: Parser) -> Self {
        Self {
            inner,
            parser,
            ready: VecDeque::new(),
            done: false,
        }
    }
}

impl<S, B, E> Stream for EventStream<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
{
    type Item = Result<Event, DecodeError<E>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(event) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if this.done {
                return Poll::Ready(None);
            }
            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => match this.parser.feed(chunk.as_ref()) {
                    Ok(events) => this.ready.extend(events),
                    Err(err) => {
                        this.done = true;
                        return Poll::Ready(Some(Err(err.into())));
                    }
                },
                Poll::Ready(Some(Err(err))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(DecodeError::Transport(err))));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    if let Some(event) = this.parser.finish() {
                        return Poll::Ready(Some(Ok(event)));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    use futures::StreamExt;

    fn chunked(parts: Vec<&'static str>) -> impl Stream<Item = Result<&'static [u8], Infallible>> {
        futures::stream::iter(parts.into_iter().map(|p| Ok(p.as_bytes())))
    }

    #[tokio::test]
    async fn decodes_events_across_chunk_boundaries() {
        let body = chunked(vec!["data:he", "llo\n", "\ndata:world\n\n"]);
        let events: Vec<_> = EventStream::new(body)
            .map(|e| e.unwrap().data)
            .collect()
            .await;
        assert_eq!(events, vec!["hello", "world"]);
    }

    #[tokio::test]
    async fn soft_eof_dispatches_the_tail() {
        let body = chunked(vec!["data:tail"]);
        let events: Vec<_> = EventStream::new(body)
            .map(|e| e.unwrap().data)
            .collect()
            .await;
        assert_eq!(events, vec!["tail"]);
    }

    #[tokio::test]
    async fn transport_errors_fuse_the_stream() {
        let body = futures::stream::iter(vec![
            Ok(b"data:x\n\n" as &[u8]),
            Err("boom"),
            Ok(b"data:y\n\n" as &[u8]),
        ]);
        let mut stream = EventStream::new(body);

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.data, "x");
        assert!(matches!(
            stream.next().await,
            Some(Err(DecodeError::Transport("boom")))
        ));
        assert!(stream.next().await.is_none());
    }
}
