use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::delivery::event::{Envelope, EventSender, TransportEvent};
use crate::types::types::RequestId;

/// Request body for `body`, reporting an upload-progress tick for every slice
/// the HTTP client pulls when `events` is given.
pub(crate) fn upload_body(
    id: RequestId,
    body: Bytes,
    slice: usize,
    events: Option<EventSender>,
) -> reqwest::Body {
    match events {
        Some(events) => reqwest::Body::wrap_stream(progress_stream(id, body, slice, events)),
        None => reqwest::Body::from(body),
    }
}

/// Intermediate ticks go through `try_send`: a full channel drops a tick
/// rather than stalling the upload. The final tick (position == size) waits
/// for room so the peer always sees the upload finish.
fn progress_stream(
    id: RequestId,
    body: Bytes,
    slice: usize,
    events: EventSender,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    let size = body.len() as u64;
    let pieces: Vec<(Bytes, u64)> = split(body, slice)
        .into_iter()
        .scan(0u64, |sent, piece| {
            *sent += piece.len() as u64;
            Some((piece, *sent))
        })
        .collect();

    futures::stream::iter(pieces).then(move |(piece, position)| {
        let events = events.clone();
        async move {
            let envelope = Envelope {
                id,
                event: TransportEvent::UploadProgress { position, size },
            };
            if position == size {
                // Receiver gone means the load is over; nothing to report to.
                let _ = events.send(envelope).await;
            } else {
                let _ = events.try_send(envelope);
            }
            Ok::<_, std::io::Error>(piece)
        }
    })
}

fn split(mut body: Bytes, slice: usize) -> Vec<Bytes> {
    let slice = slice.max(1);
    let mut pieces = Vec::with_capacity(body.len() / slice + 1);
    while !body.is_empty() {
        let n = slice.min(body.len());
        pieces.push(body.split_to(n));
    }
    pieces
}
