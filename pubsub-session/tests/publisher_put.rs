/********************************************************************************
 * Copyright (c) 2024 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

use integration_test_utils::{init_tracing, Fault, FaultyTransport, Operation};
use pubsub_session::{
    Attachment, CongestionControl, Config, Encoding, MemoryOptions, MemoryRouter, MemoryTransport,
    PublisherOptions, PutOptions, PutOutcome, Session, SessionError, TransportError, WireKey,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const KEY_EXPR: &str = "demo/example/test";

fn memory(options: MemoryOptions) -> (Arc<MemoryTransport>, MemoryRouter) {
    let (transport, router) = MemoryTransport::new(options);
    (Arc::new(transport), router)
}

fn faulty(options: MemoryOptions) -> (Arc<FaultyTransport>, Arc<MemoryTransport>, MemoryRouter) {
    let (inner, router) = memory(options);
    (Arc::new(FaultyTransport::new(inner.clone())), inner, router)
}

#[tokio::test]
async fn hello_goes_out_by_alias_when_granted() {
    init_tracing();
    for grant_aliases in [true, false] {
        let (transport, mut router) = memory(MemoryOptions {
            grant_aliases,
            ..Default::default()
        });
        let session = Session::open(Config::default(), transport.clone())
            .await
            .expect("session opens");
        let publisher = session
            .declare_publisher(KEY_EXPR, PublisherOptions::default())
            .await
            .expect("publisher declared");
        assert_eq!(publisher.alias().is_some(), grant_aliases);

        let outcome = publisher
            .put("hello", PutOptions::default().encoding(Encoding::TEXT_PLAIN))
            .await
            .expect("put succeeds");
        assert_eq!(outcome, PutOutcome::Delivered);

        let deliveries = {
            // let the single delivery land, then make sure nothing else follows
            let first = router.recv().await.expect("one delivery");
            let mut all = vec![first];
            all.extend(router.drain());
            all
        };
        assert_eq!(deliveries.len(), 1);
        let delivery = &deliveries[0];
        assert_eq!(delivery.key_expr.as_str(), KEY_EXPR);
        assert_eq!(&delivery.publication.payload[..], b"hello");
        assert_eq!(delivery.publication.encoding, Encoding::TEXT_PLAIN);
        match (grant_aliases, &delivery.publication.target) {
            (true, WireKey::Alias(alias)) => assert_eq!(Some(*alias), publisher.alias()),
            (false, WireKey::KeyExpr(key_expr)) => assert_eq!(key_expr.as_str(), KEY_EXPR),
            (_, target) => panic!("unexpected wire target {target}"),
        }

        publisher.undeclare().await.expect("undeclare succeeds");
        session.close().await.expect("session closes");
    }
}

#[tokio::test]
async fn attachment_travels_with_the_publication() {
    init_tracing();
    let (transport, mut router) = memory(MemoryOptions::default());
    let session = Session::open(Config::default(), transport)
        .await
        .expect("session opens");
    let publisher = session
        .declare_publisher(KEY_EXPR, PublisherOptions::default())
        .await
        .expect("publisher declared");

    let attachment = Attachment::from([
        ("source".to_string(), "sensor-7".to_string()),
        ("seq".to_string(), "42".to_string()),
    ]);
    publisher
        .put(
            "with metadata",
            PutOptions::default().attachment(attachment.clone()),
        )
        .await
        .expect("put with attachment succeeds");
    publisher
        .put("plain", PutOptions::default())
        .await
        .expect("put without attachment succeeds");

    let tagged = router.recv().await.expect("first delivery");
    assert_eq!(&tagged.publication.payload[..], b"with metadata");
    assert_eq!(tagged.publication.attachment, Some(attachment));

    let plain = router.recv().await.expect("second delivery");
    assert_eq!(&plain.publication.payload[..], b"plain");
    assert_eq!(plain.publication.attachment, None);

    publisher.undeclare().await.expect("publisher undeclared");
    session.close().await.expect("session closes");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_block_puts_are_all_delivered_in_task_order() {
    init_tracing();
    const TASKS: usize = 4;
    const PUTS_PER_TASK: usize = 25;

    let (transport, mut router) = memory(MemoryOptions {
        capacity: 4,
        ..Default::default()
    });
    let session = Session::open(Config::default(), transport.clone())
        .await
        .expect("session opens");
    let publisher = Arc::new(
        session
            .declare_publisher(
                KEY_EXPR,
                PublisherOptions::default().congestion_control(CongestionControl::Block),
            )
            .await
            .expect("publisher declared"),
    );

    let drain = tokio::spawn(async move {
        let mut received = Vec::new();
        while received.len() < TASKS * PUTS_PER_TASK {
            match router.recv().await {
                Some(delivery) => received.push(delivery),
                None => break,
            }
        }
        received
    });

    let mut producers = Vec::new();
    for task in 0..TASKS {
        let publisher = publisher.clone();
        producers.push(tokio::spawn(async move {
            for seq in 0..PUTS_PER_TASK {
                let outcome = publisher
                    .put(format!("{task}:{seq}"), PutOptions::default())
                    .await
                    .expect("block put succeeds");
                assert_eq!(outcome, PutOutcome::Delivered);
            }
        }));
    }
    for producer in producers {
        producer.await.expect("producer finished");
    }

    let received = tokio::time::timeout(Duration::from_secs(10), drain)
        .await
        .expect("drain finished in time")
        .expect("drain task joined");
    assert_eq!(received.len(), TASKS * PUTS_PER_TASK);

    let mut last_seen: HashMap<usize, usize> = HashMap::new();
    for delivery in received {
        let text = String::from_utf8(delivery.publication.payload.to_vec()).expect("utf-8");
        let (task, seq) = text.split_once(':').expect("task:seq payload");
        let (task, seq): (usize, usize) = (task.parse().unwrap(), seq.parse().unwrap());
        if let Some(previous) = last_seen.insert(task, seq) {
            assert!(seq > previous, "task {task} reordered: {previous} then {seq}");
        }
    }
    assert_eq!(last_seen.len(), TASKS);
    assert!(last_seen.values().all(|seq| *seq == PUTS_PER_TASK - 1));

    let publisher = Arc::try_unwrap(publisher).expect("producers released the publisher");
    publisher.undeclare().await.expect("undeclare succeeds");
    session.close().await.expect("session closes");
}

#[tokio::test]
async fn drop_policy_discards_against_saturated_transport() {
    init_tracing();
    let (transport, mut router) = memory(MemoryOptions {
        capacity: 10,
        ..Default::default()
    });
    let session = Session::open(Config::default(), transport.clone())
        .await
        .expect("session opens");
    let publisher = session
        .declare_publisher(KEY_EXPR, PublisherOptions::default())
        .await
        .expect("publisher declared");

    let mut dropped = 0;
    for seq in 0..100 {
        let outcome = publisher
            .put(
                format!("{seq}"),
                PutOptions::default().congestion_control(CongestionControl::Drop),
            )
            .await
            .expect("drop put is never an error");
        if outcome == PutOutcome::Dropped {
            dropped += 1;
        }
    }

    let delivered = router.drain().len();
    assert!(delivered < 100);
    assert_eq!(delivered, 10);
    assert_eq!(dropped, 90);

    publisher.undeclare().await.expect("undeclare succeeds");
    session.close().await.expect("session closes");
}

#[tokio::test]
async fn wildcard_key_expression_is_rejected_without_registration() {
    init_tracing();
    let (transport, inner, _router) = faulty(MemoryOptions::default());
    let session = Session::open(Config::default(), transport.clone())
        .await
        .expect("session opens");

    for expr in ["demo/*/test", "demo/**", "demo//test"] {
        assert!(matches!(
            session
                .declare_publisher(expr, PublisherOptions::default())
                .await,
            Err(SessionError::InvalidKeyExpr { .. })
        ));
    }
    assert_eq!(transport.calls(Operation::Register), 0);
    assert_eq!(inner.active_registrations(), 0);

    session.close().await.expect("session closes");
}

#[tokio::test]
async fn equivalent_key_expressions_reuse_one_alias() {
    init_tracing();
    let (transport, _router) = memory(MemoryOptions::default());
    let session = Session::open(Config::default(), transport.clone())
        .await
        .expect("session opens");

    let first = session
        .declare_publisher(KEY_EXPR, PublisherOptions::default())
        .await
        .expect("first declared");
    let second = session
        .declare_publisher(KEY_EXPR.to_string(), PublisherOptions::default())
        .await
        .expect("second declared");
    assert_eq!(first.alias(), second.alias());
    assert_eq!(transport.active_registrations(), 1);

    first.undeclare().await.expect("first undeclared");
    assert_eq!(transport.active_registrations(), 1);
    second.undeclare().await.expect("second undeclared");
    assert_eq!(transport.active_registrations(), 0);

    session.close().await.expect("session closes");
}

#[tokio::test]
async fn oversized_payload_is_reported_and_session_stays_usable() {
    init_tracing();
    let (transport, mut router) = memory(MemoryOptions {
        max_payload: Some(8),
        ..Default::default()
    });
    let session = Session::open(Config::default(), transport.clone())
        .await
        .expect("session opens");
    let publisher = session
        .declare_publisher(KEY_EXPR, PublisherOptions::default())
        .await
        .expect("publisher declared");

    assert_eq!(
        publisher.put(vec![0u8; 64], PutOptions::default()).await,
        Err(SessionError::PayloadTooLarge { size: 64, max: 8 })
    );
    assert_eq!(
        publisher.put("small", PutOptions::default()).await,
        Ok(PutOutcome::Delivered)
    );
    assert_eq!(router.drain().len(), 1);

    publisher.undeclare().await.expect("undeclare succeeds");
    session.close().await.expect("session closes");
}

#[tokio::test]
async fn close_wakes_blocked_put() {
    init_tracing();
    let (transport, _inner, _router) = faulty(MemoryOptions::default());
    transport.inject(Operation::Send, Fault::Hang);
    let session = Session::open(Config::default(), transport.clone())
        .await
        .expect("session opens");
    let publisher = session
        .declare_publisher(KEY_EXPR, PublisherOptions::default())
        .await
        .expect("publisher declared");

    let in_flight = tokio::spawn(async move {
        publisher
            .put(
                "stuck",
                PutOptions::default().congestion_control(CongestionControl::Block),
            )
            .await
    });
    while transport.calls(Operation::Send) == 0 {
        tokio::task::yield_now().await;
    }

    session.close().await.expect("session closes");
    let result = tokio::time::timeout(Duration::from_secs(5), in_flight)
        .await
        .expect("put woke up")
        .expect("put task joined");
    assert_eq!(result, Err(SessionError::SessionClosed));
}

#[tokio::test]
async fn hung_transport_calls_are_bounded_by_timeouts() {
    init_tracing();
    let config = Config {
        open_timeout: Duration::from_millis(50),
        declare_timeout: Duration::from_millis(50),
        put_timeout: Duration::from_millis(50),
        close_timeout: Duration::from_millis(50),
        ..Default::default()
    };

    let (transport, _inner, _router) = faulty(MemoryOptions::default());
    transport.inject(Operation::Connect, Fault::Hang);
    assert!(matches!(
        Session::open(config.clone(), transport.clone()).await,
        Err(SessionError::ConnectError(_))
    ));
    transport.clear(Operation::Connect);

    let session = Session::open(config, transport.clone())
        .await
        .expect("session opens");

    transport.inject(Operation::Register, Fault::Hang);
    assert!(matches!(
        session
            .declare_publisher(KEY_EXPR, PublisherOptions::default())
            .await,
        Err(SessionError::DeclarationError(_))
    ));
    transport.clear(Operation::Register);

    let publisher = session
        .declare_publisher(KEY_EXPR, PublisherOptions::default())
        .await
        .expect("publisher declared");
    transport.inject(Operation::Send, Fault::Hang);
    assert!(matches!(
        publisher.put("late", PutOptions::default()).await,
        Err(SessionError::TransportError(_))
    ));

    transport.inject(Operation::Unregister, Fault::Hang);
    match session.close().await {
        Err(SessionError::CloseIncomplete(failures)) => assert_eq!(failures.len(), 1),
        other => panic!("expected CloseIncomplete, got {other:?}"),
    }
    assert_eq!(transport.calls(Operation::Disconnect), 1);
    drop(publisher);
}

#[tokio::test]
async fn rejected_registration_is_a_declaration_error() {
    init_tracing();
    let (transport, inner, _router) = faulty(MemoryOptions::default());
    transport.inject(
        Operation::Register,
        Fault::Fail(TransportError::Rejected("acl denied".to_string())),
    );
    let session = Session::open(Config::default(), transport.clone())
        .await
        .expect("session opens");

    assert_eq!(
        session
            .declare_publisher(KEY_EXPR, PublisherOptions::default())
            .await
            .err(),
        Some(SessionError::DeclarationError("acl denied".to_string()))
    );
    assert_eq!(session.active_declarations().await, 0);

    transport.clear(Operation::Register);
    let publisher = session
        .declare_publisher(KEY_EXPR, PublisherOptions::default())
        .await
        .expect("publisher declared once the transport accepts");
    assert_eq!(inner.active_registrations(), 1);

    transport.inject(
        Operation::Unregister,
        Fault::Fail(TransportError::Io("link reset".to_string())),
    );
    drop(publisher);
    match session.close().await {
        Ok(()) => assert_eq!(transport.calls(Operation::Unregister), 1),
        Err(SessionError::CloseIncomplete(failures)) => assert_eq!(failures.len(), 1),
        Err(other) => panic!("unexpected close error {other:?}"),
    }
    assert_eq!(inner.open_connections(), 0);
}

#[tokio::test]
async fn slow_registration_does_not_stall_the_session() {
    init_tracing();
    let (transport, inner, _router) = faulty(MemoryOptions::default());
    let session = Session::open(Config::default(), transport.clone())
        .await
        .expect("session opens");
    let existing = session
        .declare_publisher("demo/existing", PublisherOptions::default())
        .await
        .expect("publisher declared");

    transport.inject(Operation::Register, Fault::Hang);
    let mut slow = Box::pin(session.declare_publisher("demo/slow", PublisherOptions::default()));
    assert!(tokio::time::timeout(Duration::from_millis(50), &mut slow)
        .await
        .is_err());
    assert_eq!(transport.calls(Operation::Register), 2);

    // the registration round trip is in flight; the session must still answer
    let declarations = tokio::time::timeout(
        Duration::from_millis(500),
        session.active_declarations(),
    )
    .await
    .expect("declaration table not locked by the pending registration");
    assert_eq!(declarations, 1);
    tokio::time::timeout(Duration::from_millis(500), existing.undeclare())
        .await
        .expect("undeclare not blocked by the pending registration")
        .expect("publisher undeclared");
    assert_eq!(inner.active_registrations(), 0);

    drop(slow);
    transport.clear(Operation::Register);
    session.close().await.expect("session closes");
}
