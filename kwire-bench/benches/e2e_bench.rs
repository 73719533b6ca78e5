//! End-to-end client-server benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kwire_client::{Client, ConnectionConfig};
use kwire_server::{Server, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::runtime::Runtime;

struct TestSetup {
    addr: SocketAddr,
    server: Arc<Server>,
    client: Client,
}

impl Drop for TestSetup {
    fn drop(&mut self) {
        self.server.shutdown();
    }
}

fn setup_server_and_client(rt: &Runtime) -> TestSetup {
    // Find available port
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let server = Arc::new(Server::new(ServerConfig::new(addr)));

    // Start server
    let server_clone = server.clone();
    rt.spawn(async move {
        let _ = server_clone.run().await;
    });

    // Give server time to start
    std::thread::sleep(std::time::Duration::from_millis(100));

    let client = Client::new(ConnectionConfig::new(addr).with_client_id("bench"));
    rt.block_on(async {
        client.connect().await.unwrap();
    });

    TestSetup {
        addr,
        server,
        client,
    }
}

fn bench_api_versions_latency(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let setup = setup_server_and_client(&rt);

    let mut group = c.benchmark_group("e2e_api_versions");
    group.throughput(Throughput::Elements(1));

    for version in [0i16, 4] {
        group.bench_with_input(
            BenchmarkId::from_parameter(version),
            &version,
            |b, &version| {
                b.to_async(&rt).iter(|| async {
                    black_box(setup.client.api_versions(version).await.unwrap())
                });
            },
        );
    }

    group.finish();
}

fn bench_concurrent_connections(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let setup = setup_server_and_client(&rt);

    // One client per connection; requests on a connection are sequential.
    let mut group = c.benchmark_group("e2e_concurrent");
    group.sample_size(20);

    for concurrency in [1, 10, 50] {
        let clients: Vec<Client> = rt.block_on(async {
            let mut clients = Vec::with_capacity(concurrency);
            for _ in 0..concurrency {
                let client = Client::new(ConnectionConfig::new(setup.addr));
                client.connect().await.unwrap();
                clients.push(client);
            }
            clients
        });

        group.throughput(Throughput::Elements(concurrency as u64));
        group.bench_with_input(
            BenchmarkId::new("api_versions", concurrency),
            &clients,
            |b, clients| {
                b.to_async(&rt).iter(|| async {
                    let futures: Vec<_> =
                        clients.iter().map(|client| client.api_versions(4)).collect();
                    black_box(futures::future::join_all(futures).await)
                });
            },
        );
    }

    group.finish();
}

fn bench_connect_and_request(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let setup = setup_server_and_client(&rt);

    let mut group = c.benchmark_group("e2e_connect");
    group.sample_size(20);

    group.bench_function("connect_api_versions_close", |b| {
        b.to_async(&rt).iter(|| async {
            let client = Client::new(ConnectionConfig::new(setup.addr));
            client.connect().await.unwrap();
            let response = client.api_versions(4).await.unwrap();
            client.close().await.unwrap();
            black_box(response)
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_api_versions_latency,
    bench_concurrent_connections,
    bench_connect_and_request,
);

criterion_main!(benches);
