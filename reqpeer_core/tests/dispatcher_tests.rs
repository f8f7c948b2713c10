mod common;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use common::{calls, redirect_to, response_info, Call, RecordingPeer};
use reqpeer_core::net_error;
use reqpeer_core::{
    CompletionInfo, DeliveryError, DeliveryState, Dispatcher, Envelope, RequestId,
    RequestSession, TransportEvent,
};

fn envelope(id: u64, event: TransportEvent) -> Envelope {
    Envelope {
        id: RequestId(id),
        event,
    }
}

fn data(bytes: &'static [u8]) -> TransportEvent {
    TransportEvent::Data {
        payload: Bytes::from_static(bytes),
        encoded_len: bytes.len() as u64,
    }
}

#[test]
fn test_routes_events_by_request_id() {
    let mut dispatcher = Dispatcher::new();
    let (first, first_log) = RecordingPeer::new();
    let (second, second_log) = RecordingPeer::new();
    dispatcher.add(RequestSession::new(RequestId(1), first)).unwrap();
    dispatcher.add(RequestSession::new(RequestId(2), second)).unwrap();

    dispatcher
        .dispatch(envelope(2, TransportEvent::Response(response_info(404))))
        .unwrap();
    dispatcher
        .dispatch(envelope(1, TransportEvent::Response(response_info(200))))
        .unwrap();
    dispatcher.dispatch(envelope(1, data(b"first"))).unwrap();
    dispatcher
        .dispatch(envelope(1, TransportEvent::Completed(CompletionInfo::success(5))))
        .unwrap();

    assert_eq!(
        calls(&first_log),
        vec![
            Call::Response(200),
            Call::Data(b"first".to_vec(), 5),
            Call::Completed(net_error::OK),
        ]
    );
    assert_eq!(calls(&second_log), vec![Call::Response(404)]);

    assert!(!dispatcher.contains(RequestId(1)));
    assert!(dispatcher.contains(RequestId(2)));
    assert_eq!(dispatcher.live(), 1);

    let outcome = &dispatcher.outcomes()[0];
    assert_eq!(outcome.id, RequestId(1));
    assert_eq!(outcome.state, DeliveryState::Completed);
    assert_eq!(outcome.snapshot.counters.bytes_received, 5);
    assert!(outcome.result().is_ok());
}

#[test]
fn test_duplicate_live_id_is_rejected() {
    let mut dispatcher = Dispatcher::new();
    let (a, _) = RecordingPeer::new();
    let (b, _) = RecordingPeer::new();
    dispatcher.add(RequestSession::new(RequestId(7), a)).unwrap();

    assert_eq!(
        dispatcher.add(RequestSession::new(RequestId(7), b)),
        Err(DeliveryError::DuplicateRequest(RequestId(7)))
    );
}

#[test]
fn test_retired_id_can_be_reused() {
    let mut dispatcher = Dispatcher::new();
    let (a, _) = RecordingPeer::new();
    dispatcher.add(RequestSession::new(RequestId(7), a)).unwrap();
    dispatcher
        .dispatch(envelope(7, TransportEvent::Completed(CompletionInfo::success(0))))
        .unwrap();

    let (b, _) = RecordingPeer::new();
    dispatcher.add(RequestSession::new(RequestId(7), b)).unwrap();
    assert!(dispatcher.contains(RequestId(7)));
}

#[test]
fn test_unknown_id_is_discarded_and_redirect_declined() {
    let mut dispatcher = Dispatcher::new();
    dispatcher.dispatch(envelope(99, data(b"orphan"))).unwrap();

    let (reply, answer) = oneshot::channel();
    dispatcher
        .dispatch(envelope(
            99,
            TransportEvent::Redirect {
                redirect: redirect_to("http://example.test/next"),
                info: response_info(301),
                reply,
            },
        ))
        .unwrap();

    assert_eq!(answer.blocking_recv(), Ok(false));
    assert!(dispatcher.outcomes().is_empty());
}

#[test]
fn test_redirect_reply_carries_peer_decision() {
    let mut dispatcher = Dispatcher::new();
    let (follow, follow_log) = RecordingPeer::new();
    let (veto, _) = RecordingPeer::vetoing_redirects();
    dispatcher.add(RequestSession::new(RequestId(1), follow)).unwrap();
    dispatcher.add(RequestSession::new(RequestId(2), veto)).unwrap();

    let mut answers = Vec::new();
    for id in [1, 2] {
        let (reply, answer) = oneshot::channel();
        dispatcher
            .dispatch(envelope(
                id,
                TransportEvent::Redirect {
                    redirect: redirect_to("http://example.test/moved"),
                    info: response_info(302),
                    reply,
                },
            ))
            .unwrap();
        answers.push(answer.blocking_recv().unwrap());
    }

    assert_eq!(answers, vec![true, false]);
    assert_eq!(
        calls(&follow_log),
        vec![Call::Redirect("http://example.test/moved".to_string())]
    );
}

#[test]
fn test_violation_fails_session_and_is_recorded() {
    let mut dispatcher = Dispatcher::new();
    let (peer, log) = RecordingPeer::new();
    let session = RequestSession::new(RequestId(4), peer);
    let token = session.cancel_handle();
    dispatcher.add(session).unwrap();

    let err = dispatcher.dispatch(envelope(4, data(b"no headers"))).unwrap_err();
    assert!(matches!(
        err,
        DeliveryError::ProtocolViolation {
            state: DeliveryState::Pending,
            ..
        }
    ));

    assert!(token.is_cancelled());
    assert_eq!(calls(&log), vec![Call::Completed(net_error::ERR_FAILED)]);
    assert!(!dispatcher.contains(RequestId(4)));

    let outcome = &dispatcher.outcomes()[0];
    assert_eq!(outcome.state, DeliveryState::Completed);
    assert_eq!(outcome.error.as_ref(), Some(&err));
    assert_eq!(outcome.result().unwrap_err(), err);
}

#[test]
fn test_mid_stream_violation_still_completes_peer() {
    let mut dispatcher = Dispatcher::new();
    let (peer, log) = RecordingPeer::new();
    dispatcher.add(RequestSession::new(RequestId(6), peer)).unwrap();

    dispatcher
        .dispatch(envelope(6, TransportEvent::Response(response_info(200))))
        .unwrap();
    dispatcher
        .dispatch(envelope(
            6,
            TransportEvent::DownloadedData {
                len: 4,
                encoded_len: 4,
            },
        ))
        .unwrap();
    let err = dispatcher.dispatch(envelope(6, data(b"mixed"))).unwrap_err();
    dispatcher.dispatch(envelope(6, data(b"discarded"))).unwrap();

    assert_eq!(
        err,
        DeliveryError::ProtocolViolation {
            state: DeliveryState::Streaming,
            operation: "deliver_chunk",
        }
    );
    assert_eq!(
        calls(&log),
        vec![
            Call::Response(200),
            Call::DownloadedData(4, 4),
            Call::Completed(net_error::ERR_FAILED),
        ]
    );
    let outcome = &dispatcher.outcomes()[0];
    assert_eq!(outcome.completion.as_ref().map(|c| c.total_transfer_size), Some(4));
    assert_eq!(outcome.error.as_ref(), Some(&err));
}

#[test]
fn test_cancel_retires_and_silences() {
    let mut dispatcher = Dispatcher::new();
    let (peer, log) = RecordingPeer::new();
    dispatcher.add(RequestSession::new(RequestId(1), peer)).unwrap();
    dispatcher
        .dispatch(envelope(1, TransportEvent::Response(response_info(200))))
        .unwrap();

    dispatcher.cancel(RequestId(1)).unwrap();
    dispatcher.dispatch(envelope(1, data(b"late"))).unwrap();
    dispatcher.cancel(RequestId(1)).unwrap();

    assert_eq!(calls(&log), vec![Call::Response(200)]);
    let outcome = &dispatcher.outcomes()[0];
    assert_eq!(outcome.state, DeliveryState::Cancelled);
    assert_eq!(outcome.result().unwrap_err(), DeliveryError::Cancelled);
}

#[test]
fn test_finish_completes_open_sessions_with_failure() {
    let mut dispatcher = Dispatcher::new();
    let (open, open_log) = RecordingPeer::new();
    let (torn_down, torn_log) = RecordingPeer::new();
    dispatcher.add(RequestSession::new(RequestId(1), open)).unwrap();
    let session = RequestSession::new(RequestId(2), torn_down);
    let token = session.cancel_handle();
    dispatcher.add(session).unwrap();

    dispatcher
        .dispatch(envelope(1, TransportEvent::Response(response_info(200))))
        .unwrap();
    dispatcher.dispatch(envelope(1, data(b"partial"))).unwrap();
    token.cancel();

    let mut outcomes = dispatcher.finish();
    outcomes.sort_by_key(|o| o.id);

    assert_eq!(
        calls(&open_log).last(),
        Some(&Call::Completed(net_error::ERR_FAILED))
    );
    assert!(calls(&torn_log).is_empty());

    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].state, DeliveryState::Completed);
    assert_eq!(
        outcomes[0].result().unwrap_err(),
        DeliveryError::Network(net_error::ERR_FAILED)
    );
    assert_eq!(outcomes[1].state, DeliveryState::Cancelled);
    assert_eq!(dispatcher.live(), 0);
}

#[tokio::test]
async fn test_run_drains_channel_until_senders_drop() {
    let mut dispatcher = Dispatcher::new();
    let (peer, log) = RecordingPeer::new();
    dispatcher.add(RequestSession::new(RequestId(1), peer)).unwrap();

    let (tx, rx) = mpsc::channel(4);
    let producer = tokio::spawn(async move {
        let events = vec![
            TransportEvent::UploadProgress {
                position: 3,
                size: 3,
            },
            TransportEvent::Response(response_info(200)),
            data(b"ab"),
            data(b"cd"),
            TransportEvent::Completed(CompletionInfo::success(4)),
            data(b"after completion"),
        ];
        for event in events {
            tx.send(envelope(1, event)).await.unwrap();
        }
    });

    dispatcher.run(rx).await;
    producer.await.unwrap();

    assert_eq!(
        calls(&log),
        vec![
            Call::UploadProgress(3, 3),
            Call::Response(200),
            Call::Data(b"ab".to_vec(), 2),
            Call::Data(b"cd".to_vec(), 2),
            Call::Completed(net_error::OK),
        ]
    );
    let outcomes = dispatcher.finish();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].snapshot.counters.chunks, 2);
}

#[tokio::test]
async fn test_owner_cancel_silences_queued_events() {
    let mut dispatcher = Dispatcher::new();
    let (peer, log) = RecordingPeer::new();
    let session = RequestSession::new(RequestId(1), peer);
    let token = session.cancel_handle();
    dispatcher.add(session).unwrap();

    let (tx, rx) = mpsc::channel(8);
    tx.send(envelope(1, TransportEvent::Response(response_info(200))))
        .await
        .unwrap();
    token.cancel();
    tx.send(envelope(1, data(b"ignored"))).await.unwrap();
    drop(tx);

    dispatcher.run(rx).await;

    assert!(calls(&log).is_empty());
    assert_eq!(dispatcher.live(), 0);
    assert_eq!(dispatcher.outcomes()[0].state, DeliveryState::Cancelled);
}

#[test]
fn test_outcome_serializes_for_reports() {
    let mut dispatcher = Dispatcher::new();
    let (peer, _log) = RecordingPeer::new();
    dispatcher.add(RequestSession::new(RequestId(3), peer)).unwrap();
    dispatcher
        .dispatch(envelope(3, TransportEvent::Response(response_info(200))))
        .unwrap();
    dispatcher.dispatch(envelope(3, data(b"xyz"))).unwrap();
    dispatcher
        .dispatch(envelope(3, TransportEvent::Completed(CompletionInfo::success(3))))
        .unwrap();

    let json = serde_json::to_value(&dispatcher.outcomes()[0]).unwrap();
    assert_eq!(json["id"], 3);
    assert_eq!(json["state"], "completed");
    assert_eq!(json["snapshot"]["bytes_received"], 3);
    assert_eq!(json["snapshot"]["body_mode"], "in_memory");
    assert_eq!(json["completion"]["error_code"], 0);
    assert!(json["error"].is_null());
}
