//! Broadcast fan-out benchmark suite.
//!
//! Measures the time from `Server::broadcast` until every subscriber of a
//! stream has received the frame, at different scales:
//! - Subscriber counts: 10, 100, 1000
//! - Streams per connection: 1, 8
//!
//! Run with: cargo bench --bench fanout
//! Results saved to: target/criterion/

use std::sync::Arc;
use std::time::Duration;

use cable_mux::{
    ChannelDescriptor, ConnectRequest, Envelope, Identity, Peer, Result, Server,
};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use futures_util::future::join_all;
use serde_json::json;
use tokio::runtime::Runtime;
use tokio::sync::Mutex;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const SUBSCRIBER_COUNTS: &[usize] = &[10, 100, 1000];
const STREAMS_PER_CONNECTION: &[usize] = &[1, 8];

// ============================================================================
// Setup
// ============================================================================

struct Fixture {
    server: Server,
    peers: Arc<Mutex<Vec<Peer>>>,
}

fn server() -> Server {
    let feed = ChannelDescriptor::builder("Feed")
        .action("follow", |ctx, data| {
            ctx.stream_from(format!("feed_{}", data["stream"]));
            Ok(())
        })
        .build();

    Server::builder()
        .resolver(|_: &ConnectRequest| -> Result<Identity> { Ok(Identity::anonymous()) })
        .channel(feed)
        .build()
        .expect("build server")
}

async fn fixture(subscribers: usize, streams: usize) -> Fixture {
    let server = server();
    let mut peers = Vec::with_capacity(subscribers);

    for _ in 0..subscribers {
        let (transport, mut peer) = cable_mux::transport::memory::pair();
        let connection = server
            .accept(ConnectRequest::new("/cable"), transport)
            .await
            .expect("accept");
        peer.recv().await.expect("welcome");

        connection
            .perform(Envelope::subscribe_to("feed", "Feed"))
            .await
            .expect("subscribe");
        peer.recv().await.expect("confirm");

        for stream in 0..streams {
            connection
                .perform(Envelope::message(
                    "feed",
                    &json!({ "action": "follow", "stream": stream }),
                ))
                .await
                .expect("follow");
        }

        peers.push(peer);
    }

    Fixture {
        server,
        peers: Arc::new(Mutex::new(peers)),
    }
}

// ============================================================================
// Benchmark: Broadcast Fan-out
// ============================================================================

fn bench_fanout(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");

    let mut group = c.benchmark_group("fanout");
    group.sample_size(20);
    group.measurement_time(Duration::from_secs(10));

    for &subscribers in SUBSCRIBER_COUNTS {
        for &streams in STREAMS_PER_CONNECTION {
            let fixture = rt.block_on(fixture(subscribers, streams));
            let id = format!("{subscribers}s_{streams}st");

            group.throughput(Throughput::Elements(subscribers as u64));
            group.bench_function(BenchmarkId::new("broadcast", &id), |b| {
                b.to_async(&rt).iter(|| {
                    let server = fixture.server.clone();
                    let peers = Arc::clone(&fixture.peers);
                    async move {
                        let mut peers = peers.lock().await;
                        server
                            .broadcast("feed_0", json!({ "tick": 1 }))
                            .await
                            .expect("broadcast");
                        join_all(peers.iter_mut().map(Peer::recv)).await;
                    }
                });
            });

            rt.block_on(fixture.server.shutdown());
        }
    }

    group.finish();
}

// ============================================================================
// Benchmark: Subscribe Round Trip
// ============================================================================

fn bench_subscribe(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let server = server();

    let (connection, peer) = rt.block_on(async {
        let (transport, mut peer) = cable_mux::transport::memory::pair();
        let connection = server
            .accept(ConnectRequest::new("/cable"), transport)
            .await
            .expect("accept");
        peer.recv().await.expect("welcome");
        (connection, Arc::new(Mutex::new(peer)))
    });

    c.bench_function("subscribe_unsubscribe", |b| {
        b.to_async(&rt).iter(|| {
            let connection = connection.clone();
            let peer = Arc::clone(&peer);
            async move {
                let mut peer = peer.lock().await;
                connection
                    .perform(Envelope::subscribe_to("feed", "Feed"))
                    .await
                    .expect("subscribe");
                peer.recv().await.expect("confirm");
                connection
                    .perform(Envelope::unsubscribe("feed"))
                    .await
                    .expect("unsubscribe");
            }
        });
    });

    rt.block_on(server.shutdown());
}

criterion_group!(benches, bench_fanout, bench_subscribe);
criterion_main!(benches);
