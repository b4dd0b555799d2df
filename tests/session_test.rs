//! Session tests: handshake, numbering, header decoration, and processing of
//! the service's protocol headers.

mod common;

use common::{echo, header_names, init_tracing, notify, session_with, LoopbackService};
use std::time::Duration;
use wsrm_tokio::protocol::{names, AckRange, SequenceAcknowledgementHeader, SequenceHeader};
use wsrm_tokio::{Envelope, ProtocolVersion, RmConfig, RmError, SequenceId, SessionState};

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_first_invoke_opens_both_sequences() {
    init_tracing();
    let service = LoopbackService::new(ProtocolVersion::Rm11);
    let session = session_with(RmConfig::testing(), &service);
    assert_eq!(session.state(), SessionState::Uninitialized);
    assert!(service.received().is_empty());

    let response = session.invoke(echo("hello"), false).await.unwrap().unwrap();
    assert_eq!(response.action(), Some("urn:test:EchoResponse"));
    assert_eq!(&response.body[..], b"hello");

    assert_eq!(session.state(), SessionState::Initialized);
    assert_eq!(service.create_attempts(), 1);
    assert_eq!(session.outbound_sequence_id(), service.client_outbound());
    assert_eq!(session.inbound_sequence_id(), service.service_outbound());
    assert!(session.inbound_sequence_id().is_some());

    let actions = service.received_actions();
    assert_eq!(actions[0], ProtocolVersion::Rm11.actions().create_sequence);
    assert_eq!(actions[1], "urn:test:Echo");
    assert_eq!(session.metrics().handshake_attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_offer_declined_leaves_inbound_unbound() {
    let service = LoopbackService::new(ProtocolVersion::Rm11);
    service.set_accept_offer(false);
    let session = session_with(RmConfig::testing(), &service);

    session.invoke(echo("a"), false).await.unwrap();
    assert!(session.outbound_sequence_id().is_some());
    assert!(session.inbound_sequence_id().is_none());

    let request = &service.application_requests()[0];
    assert!(!request
        .headers
        .contains(ProtocolVersion::Rm11.namespace_uri(), names::SEQUENCE_ACKNOWLEDGEMENT));
}

#[tokio::test(start_paused = true)]
async fn test_no_offer_when_request_response_not_detected() {
    let service = LoopbackService::new(ProtocolVersion::Rm11);
    let session = session_with(RmConfig::testing().request_response_detected(false), &service);

    session.invoke(notify("a"), true).await.unwrap();
    assert!(session.inbound_sequence_id().is_none());
    assert!(service.service_outbound().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_transient_create_failures_are_retried() {
    let service = LoopbackService::new(ProtocolVersion::Rm11);
    service.fail_create_sequence(2);
    let session = session_with(RmConfig::testing(), &service);

    session.invoke(echo("a"), false).await.unwrap();
    assert_eq!(service.create_attempts(), 3);
    assert_eq!(session.metrics().handshake_attempts, 3);
    assert_eq!(session.state(), SessionState::Initialized);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_create_failure_gives_up_after_three_attempts() {
    let service = LoopbackService::new(ProtocolVersion::Rm11);
    service.fail_create_sequence(5);
    let session = session_with(RmConfig::testing(), &service);

    let err = session.invoke(echo("a"), false).await.unwrap_err();
    assert!(matches!(err, RmError::CreateSequenceFailure { attempts: 3, .. }));
    assert!(err.is_fatal());
    assert_eq!(service.create_attempts(), 3);
    assert_eq!(session.state(), SessionState::Uninitialized);
    assert!(session.outbound_sequence_id().is_none());
    assert!(service.application_requests().is_empty());

    // Two injected failures left; the third attempt of the next call succeeds.
    session.invoke(echo("b"), false).await.unwrap();
    assert_eq!(service.create_attempts(), 6);
    assert_eq!(session.state(), SessionState::Initialized);
    assert_eq!(service.application_numbers(), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_create_response_is_not_retried() {
    let service = LoopbackService::new(ProtocolVersion::Rm11);
    service.corrupt_create_response();
    let session = session_with(RmConfig::testing(), &service);

    let err = session.invoke(echo("a"), false).await.unwrap_err();
    assert!(matches!(err, RmError::CreateSequenceFailure { attempts: 1, .. }));
    assert_eq!(service.create_attempts(), 1);
    assert!(session.sequence_manager().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_calls_share_one_handshake() {
    init_tracing();
    let service = LoopbackService::new(ProtocolVersion::Rm11);
    service.delay_create_sequence(Duration::from_millis(50));
    let session = session_with(RmConfig::testing(), &service);

    let calls: Vec<_> = (0..8)
        .map(|i| {
            let session = session.clone();
            tokio::spawn(async move { session.invoke(echo(&format!("m{i}")), false).await })
        })
        .collect();
    for call in calls {
        call.await.unwrap().unwrap();
    }

    assert_eq!(service.create_attempts(), 1);
    assert_eq!(session.metrics().handshake_attempts, 1);
    let mut numbers = service.application_numbers();
    numbers.sort_unstable();
    assert_eq!(numbers, (1..=8).collect::<Vec<u64>>());
}

#[tokio::test(start_paused = true)]
async fn test_invoke_requires_action() {
    let service = LoopbackService::new(ProtocolVersion::Rm11);
    let session = session_with(RmConfig::testing(), &service);

    let err = session.invoke(Envelope::new(), false).await.unwrap_err();
    assert!(matches!(err, RmError::Protocol { .. }));
    assert_eq!(session.state(), SessionState::Uninitialized);
    assert_eq!(service.create_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_model_request_is_first_application_request() {
    let service = LoopbackService::new(ProtocolVersion::Rm11);
    let session = session_with(RmConfig::testing(), &service);
    assert!(session.model_request().is_none());

    session.invoke(echo("first"), false).await.unwrap();
    session.invoke(echo("second"), false).await.unwrap();
    let model = session.model_request().unwrap();
    assert_eq!(&model.body[..], b"first");
}

// ---------------------------------------------------------------------------
// Outgoing decoration
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_message_numbers_are_dense() {
    let service = LoopbackService::new(ProtocolVersion::Rm11);
    let session = session_with(RmConfig::testing(), &service);

    for i in 0..5 {
        session.invoke(echo(&i.to_string()), false).await.unwrap();
    }
    assert_eq!(service.application_numbers(), vec![1, 2, 3, 4, 5]);

    let outbound = session.outbound_sequence_id().unwrap();
    let ids: Vec<SequenceId> = service
        .application_requests()
        .iter()
        .map(|e| {
            ProtocolVersion::Rm11
                .codec()
                .read_sequence(&e.headers)
                .unwrap()
                .unwrap()
                .id
        })
        .collect();
    assert!(ids.iter().all(|id| *id == outbound));
}

#[tokio::test(start_paused = true)]
async fn test_headers_written_in_order() {
    let service = LoopbackService::new(ProtocolVersion::Rm11);
    let session = session_with(RmConfig::testing(), &service);

    session.invoke(echo("a"), false).await.unwrap();
    let request = &service.application_requests()[0];
    assert_eq!(
        header_names(request),
        vec![
            names::SEQUENCE,
            names::ACK_REQUESTED,
            names::SEQUENCE_ACKNOWLEDGEMENT
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_process_outgoing_packet_numbers_and_decorates() {
    let service = LoopbackService::new(ProtocolVersion::Rm11);
    let session = session_with(RmConfig::testing(), &service);

    let first = session.process_outgoing_packet(echo("a")).await.unwrap();
    let second = session.process_outgoing_packet(echo("b")).await.unwrap();
    let codec = ProtocolVersion::Rm11.codec();
    assert_eq!(codec.read_sequence(&first.headers).unwrap().unwrap().message_number, 1);
    assert_eq!(codec.read_sequence(&second.headers).unwrap().unwrap().message_number, 2);
    // Nothing is sent by decoration alone beyond the handshake.
    assert!(service.application_requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_ack_requested_is_throttled() {
    let service = LoopbackService::new(ProtocolVersion::Rm11);
    service.set_acknowledge(false);
    let session = session_with(RmConfig::testing(), &service);
    let ns = ProtocolVersion::Rm11.namespace_uri();
    let ack_requested = ProtocolVersion::Rm11.actions().ack_requested;

    session.invoke(echo("1"), false).await.unwrap();
    session.invoke(echo("2"), false).await.unwrap();
    let requests = service.application_requests();
    assert!(requests[0].headers.contains(ns, names::ACK_REQUESTED));
    assert!(!requests[1].headers.contains(ns, names::ACK_REQUESTED));

    // The background task claims the next slot with a standalone request.
    tokio::time::sleep(Duration::from_millis(25)).await;
    assert_eq!(service.count_action(ack_requested), 1);

    session.invoke(echo("3"), false).await.unwrap();
    let requests = service.application_requests();
    assert!(!requests[2].headers.contains(ns, names::ACK_REQUESTED));
    assert_eq!(session.metrics().ack_requests_sent, 2);
}

#[tokio::test(start_paused = true)]
async fn test_no_ack_request_when_everything_acknowledged() {
    let service = LoopbackService::new(ProtocolVersion::Rm11);
    let session = session_with(RmConfig::testing(), &service);
    let ack_requested = ProtocolVersion::Rm11.actions().ack_requested;

    session.invoke(echo("1"), false).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(service.count_action(ack_requested), 0);

    // Slot is free and number 2 is pending at decoration time.
    session.invoke(echo("2"), false).await.unwrap();
    let requests = service.application_requests();
    assert!(requests[1]
        .headers
        .contains(ProtocolVersion::Rm11.namespace_uri(), names::ACK_REQUESTED));
}

// ---------------------------------------------------------------------------
// Incoming processing
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_round_trip_acknowledges_both_directions() {
    let service = LoopbackService::new(ProtocolVersion::Rm11);
    let session = session_with(RmConfig::testing(), &service);

    for i in 0..4 {
        session.invoke(echo(&i.to_string()), false).await.unwrap();
    }

    let outbound = session.outbound_sequence_id().unwrap();
    let inbound = session.inbound_sequence_id().unwrap();
    let sequences = session.sequence_manager();
    assert!(!sequences.has_pending_acknowledgements(&outbound).unwrap());
    assert_eq!(sequences.acknowledged_ranges(&outbound).unwrap(), vec![AckRange::new(1, 4)]);
    assert_eq!(sequences.acknowledged_ranges(&inbound).unwrap(), vec![AckRange::new(1, 4)]);
    assert_eq!(session.metrics().acknowledgements_received, 4);

    // The fourth request carried an acknowledgement for the first three responses.
    let fourth = &service.application_requests()[3];
    let ack = ProtocolVersion::Rm11
        .codec()
        .read_acknowledgement(&fourth.headers)
        .unwrap()
        .unwrap();
    assert_eq!(ack.id, inbound);
    assert_eq!(ack.ranges, vec![AckRange::new(1, 3)]);
}

#[tokio::test(start_paused = true)]
async fn test_foreign_inbound_sequence_is_rejected() {
    let service = LoopbackService::new(ProtocolVersion::Rm11);
    let session = session_with(RmConfig::testing(), &service);
    session.invoke(echo("a"), false).await.unwrap();

    let mut response = Envelope::with_body("urn:test:EchoResponse", "x");
    ProtocolVersion::Rm11
        .codec()
        .write_sequence(&mut response.headers, &SequenceHeader::new("urn:uuid:other".into(), 1))
        .unwrap();
    let err = session.process_incoming_packet(&response, false).unwrap_err();
    match err {
        RmError::SequenceIdentityMismatch { expected, actual } => {
            assert_eq!(Some(expected), session.inbound_sequence_id());
            assert_eq!(actual, SequenceId::new("urn:uuid:other"));
        }
        other => panic!("unexpected error: {other}"),
    }

    // Responses to one-way requests do not carry the service's sequence.
    assert!(session.process_incoming_packet(&response, true).is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_inbound_number_at_top_of_range_keeps_session_usable() {
    let service = LoopbackService::new(ProtocolVersion::Rm11);
    let session = session_with(RmConfig::testing(), &service);
    session.invoke(echo("a"), false).await.unwrap();
    let inbound = session.inbound_sequence_id().unwrap();

    let mut response = Envelope::with_body("urn:test:EchoResponse", "x");
    ProtocolVersion::Rm11
        .codec()
        .write_sequence(&mut response.headers, &SequenceHeader::new(inbound.clone(), u64::MAX))
        .unwrap();
    session.process_incoming_packet(&response, false).unwrap();
    assert_eq!(
        session.sequence_manager().acknowledged_ranges(&inbound).unwrap(),
        vec![AckRange::new(1, 1), AckRange::new(u64::MAX, u64::MAX)]
    );

    let reply = session.invoke(echo("b"), false).await.unwrap().unwrap();
    assert_eq!(reply.body, &b"b"[..]);

    let second = &service.application_requests()[1];
    let ack = ProtocolVersion::Rm11
        .codec()
        .read_acknowledgement(&second.headers)
        .unwrap()
        .unwrap();
    assert_eq!(ack.id, inbound);
    assert_eq!(ack.ranges, vec![AckRange::new(1, 1), AckRange::new(u64::MAX, u64::MAX)]);
}

#[tokio::test(start_paused = true)]
async fn test_acknowledgement_for_foreign_sequence_is_rejected() {
    let service = LoopbackService::new(ProtocolVersion::Rm11);
    let session = session_with(RmConfig::testing(), &service);
    session.invoke(echo("a"), false).await.unwrap();

    let mut response = Envelope::with_body("urn:test:EchoResponse", "x");
    ProtocolVersion::Rm11
        .codec()
        .write_acknowledgement(
            &mut response.headers,
            &SequenceAcknowledgementHeader {
                id: "urn:uuid:other".into(),
                ranges: vec![AckRange::new(1, 1)],
                final_ack: false,
            },
        )
        .unwrap();
    let err = session.process_incoming_packet(&response, false).unwrap_err();
    assert!(matches!(err, RmError::SequenceIdentityMismatch { .. }));
    assert!(err.is_fatal());
}

#[tokio::test(start_paused = true)]
async fn test_sequence_header_without_inbound_is_protocol_error() {
    let service = LoopbackService::new(ProtocolVersion::Rm11);
    service.set_accept_offer(false);
    let session = session_with(RmConfig::testing(), &service);
    session.invoke(echo("a"), false).await.unwrap();

    let mut response = Envelope::with_body("urn:test:EchoResponse", "x");
    ProtocolVersion::Rm11
        .codec()
        .write_sequence(&mut response.headers, &SequenceHeader::new("urn:uuid:s".into(), 1))
        .unwrap();
    let err = session.process_incoming_packet(&response, false).unwrap_err();
    assert!(matches!(err, RmError::Protocol { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_envelope_without_headers_is_ignored() {
    let service = LoopbackService::new(ProtocolVersion::Rm11);
    let session = session_with(RmConfig::testing(), &service);
    assert!(session
        .process_incoming_packet(&Envelope::with_body("urn:test:EchoResponse", "x"), false)
        .is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_peer_ack_request_is_answered() {
    let service = LoopbackService::new(ProtocolVersion::Rm11);
    service.set_request_acks(true);
    let session = session_with(RmConfig::testing(), &service);
    let acknowledgement = ProtocolVersion::Rm11.actions().sequence_acknowledgement;

    session.invoke(echo("a"), false).await.unwrap();
    assert_eq!(service.count_action(acknowledgement), 0);

    tokio::time::sleep(Duration::from_millis(25)).await;
    assert_eq!(service.count_action(acknowledgement), 1);
    let (_, standalone) = service
        .received()
        .into_iter()
        .find(|(a, _)| a == acknowledgement)
        .unwrap();
    let ack = ProtocolVersion::Rm11
        .codec()
        .read_acknowledgement(&standalone.headers)
        .unwrap()
        .unwrap();
    assert_eq!(Some(ack.id), session.inbound_sequence_id());
    assert_eq!(ack.ranges, vec![AckRange::new(1, 1)]);

    // Settled once; later ticks stay quiet.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(service.count_action(acknowledgement), 1);
}

#[tokio::test(start_paused = true)]
async fn test_protocol_messages_are_recognised() {
    let service = LoopbackService::new(ProtocolVersion::Rm11);
    let session = session_with(RmConfig::testing(), &service);
    let actions = ProtocolVersion::Rm11.actions();

    let mut control = Envelope::new();
    control.set_action(actions.terminate_sequence);
    assert!(session.is_protocol_message(&control));
    assert!(!session.is_protocol_message(&echo("a")));
    assert!(!session.is_protocol_message(&Envelope::new()));
}
