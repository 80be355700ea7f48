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

use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use pubsub_session::{
    CongestionControl, Config, Encoding, MemoryOptions, MemoryTransport, Publisher,
    PublisherOptions, PutOptions, Session,
};
use tokio::runtime::Runtime;

async fn setup(grant_aliases: bool) -> (Session, Publisher) {
    let (transport, mut router) = MemoryTransport::new(MemoryOptions {
        grant_aliases,
        capacity: 1024,
        ..Default::default()
    });
    tokio::spawn(async move { while router.recv().await.is_some() {} });

    let session = Session::open(Config::default(), Arc::new(transport))
        .await
        .unwrap();
    let publisher = session
        .declare_publisher(
            "demo/example/bench",
            PublisherOptions::default()
                .encoding(Encoding::TEXT_PLAIN)
                .congestion_control(CongestionControl::Block),
        )
        .await
        .unwrap();
    (session, publisher)
}

fn criterion_benchmark(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    for (label, grant_aliases) in [("alias", true), ("full_key", false)] {
        let (session, publisher) = rt.block_on(setup(grant_aliases));

        c.bench_with_input(
            BenchmarkId::new("publisher_put", label),
            &publisher,
            |b, publisher| {
                b.to_async(&rt).iter(|| async {
                    publisher
                        .put("Session Move!", PutOptions::default())
                        .await
                        .unwrap()
                });
            },
        );

        rt.block_on(async move {
            publisher.undeclare().await.unwrap();
            session.close().await.unwrap();
        });
    }
}

criterion_group! {
    name = benches;
    config = Criterion::default().measurement_time(Duration::from_secs(10));
    targets = criterion_benchmark
}
criterion_main!(benches);
