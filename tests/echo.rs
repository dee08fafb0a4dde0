use edge_echo::runtime::selector::{MioSelector, Selector};
use edge_echo::{Echo, NonBlockingSocket, Reactor, ReactorOptions, ReactorStats, ShutdownHandle};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

struct Server {
    addr: SocketAddr,
    shutdown: ShutdownHandle,
    handle: thread::JoinHandle<ReactorStats>,
}

impl Server {
    fn stop(self) -> ReactorStats {
        self.shutdown.shutdown();
        self.handle.join().expect("reactor thread panicked")
    }
}

fn spawn_server<S, F>(make_selector: F, options: ReactorOptions) -> Server
where
    S: Selector,
    F: FnOnce() -> S + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let listener =
            NonBlockingSocket::create_listener("127.0.0.1:0".parse().unwrap(), 64).unwrap();
        let mut reactor = Reactor::new(make_selector(), listener, Echo, options).unwrap();
        tx.send((reactor.local_addr(), reactor.shutdown_handle()))
            .unwrap();
        reactor.run().unwrap();
        reactor.stats()
    });

    let (addr, shutdown) = rx.recv().unwrap();
    Server {
        addr,
        shutdown,
        handle,
    }
}

#[cfg(target_os = "linux")]
fn default_server(options: ReactorOptions) -> Server {
    spawn_server(
        || edge_echo::runtime::selector::EpollSelector::new(16).unwrap(),
        options,
    )
}

#[cfg(not(target_os = "linux"))]
fn default_server(options: ReactorOptions) -> Server {
    spawn_server(|| MioSelector::new(16).unwrap(), options)
}

fn mio_server(options: ReactorOptions) -> Server {
    spawn_server(|| MioSelector::new(16).unwrap(), options)
}

fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    stream
}

fn echo_hello(server: Server) {
    let mut client = connect(server.addr);
    client.write_all(b"hello").unwrap();

    let mut buf = [0u8; 5];
    client.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"hello");
    drop(client);

    // Let the reactor observe end-of-stream before stopping it.
    thread::sleep(Duration::from_millis(100));
    let stats = server.stop();
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.closed, 1);
    assert_eq!(stats.bytes_read, 5);
    assert_eq!(stats.bytes_written, 5);
}

#[test]
fn test_echo_hello_default_backend() {
    echo_hello(default_server(ReactorOptions::default()));
}

#[test]
fn test_echo_hello_mio_backend() {
    echo_hello(mio_server(ReactorOptions::default()));
}

fn connect_then_close(server: Server) {
    drop(connect(server.addr));

    thread::sleep(Duration::from_millis(100));
    let stats = server.stop();
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.closed, 1);
    assert_eq!(stats.active, 0);
    assert_eq!(stats.bytes_read, 0);
}

#[test]
fn test_connect_then_close_without_data() {
    connect_then_close(default_server(ReactorOptions::default()));
}

#[test]
fn test_connect_then_close_without_data_mio() {
    connect_then_close(mio_server(ReactorOptions::default()));
}

fn burst_of_connections(server: Server) {
    let mut clients: Vec<TcpStream> = (0..16).map(|_| connect(server.addr)).collect();

    for (i, client) in clients.iter_mut().enumerate() {
        let msg = [b'c', i as u8];
        client.write_all(&msg).unwrap();
        let mut echoed = [0u8; 2];
        client.read_exact(&mut echoed).unwrap();
        assert_eq!(echoed, msg);
    }

    let stats = server.stop();
    assert_eq!(stats.accepted, 16);
    assert_eq!(stats.rejected, 0);
    assert_eq!(stats.closed, 16);
}

#[test]
fn test_burst_of_connections_all_served() {
    burst_of_connections(default_server(ReactorOptions::default()));
}

#[test]
fn test_burst_of_connections_all_served_mio() {
    burst_of_connections(mio_server(ReactorOptions::default()));
}

async fn concurrent_clients(server: Server) {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    let addr = server.addr;

    let client_a = async move {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let payload: Vec<u8> = (0..2000).map(|i| (i % 253) as u8).collect();
        stream.write_all(&payload).await.unwrap();

        let mut echoed = vec![0u8; payload.len()];
        stream.read_exact(&mut echoed).await.unwrap();
        assert_eq!(echoed, payload);
    };

    let client_b = async move {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        for round in 0..20u8 {
            let msg = [b'b', round];
            stream.write_all(&msg).await.unwrap();
            let mut echoed = [0u8; 2];
            stream.read_exact(&mut echoed).await.unwrap();
            assert_eq!(echoed, msg);
        }
    };

    tokio::join!(client_a, client_b);

    let stats = tokio::task::spawn_blocking(move || server.stop())
        .await
        .unwrap();
    assert_eq!(stats.accepted, 2);
    assert_eq!(stats.bytes_read, 2040);
}

#[tokio::test]
async fn test_concurrent_clients_independent_streams() {
    concurrent_clients(default_server(ReactorOptions::default())).await;
}

#[tokio::test]
async fn test_concurrent_clients_independent_streams_mio() {
    concurrent_clients(mio_server(ReactorOptions::default())).await;
}

fn slow_reader_options() -> ReactorOptions {
    ReactorOptions {
        buffer_size: 4096,
        max_outbound: 64 * 1024,
        ..ReactorOptions::default()
    }
}

fn slow_reader(server: Server) {
    let payload: Vec<u8> = (0..4 * 1024 * 1024).map(|i| (i % 241) as u8).collect();
    let mut writer = connect(server.addr);
    let mut reader = writer.try_clone().unwrap();

    let expected = payload.clone();
    let read_thread = thread::spawn(move || {
        // Not reading yet: the server's socket buffer fills and output queues.
        thread::sleep(Duration::from_millis(200));
        let mut echoed = vec![0u8; expected.len()];
        reader.read_exact(&mut echoed).unwrap();
        assert!(echoed == expected, "echoed payload differs");
    });

    writer.write_all(&payload).unwrap();
    read_thread.join().unwrap();
    drop(writer);

    thread::sleep(Duration::from_millis(100));
    let stats = server.stop();
    assert_eq!(stats.bytes_read, payload.len() as u64);
    assert_eq!(stats.bytes_written, payload.len() as u64);
    assert!(stats.write_stalls > 0);
}

#[test]
fn test_slow_reader_gets_every_byte() {
    slow_reader(default_server(slow_reader_options()));
}

#[test]
fn test_slow_reader_gets_every_byte_mio() {
    slow_reader(mio_server(slow_reader_options()));
}

fn shutdown_closes_live_connections(server: Server) {
    let mut clients: Vec<TcpStream> = (0..3).map(|_| connect(server.addr)).collect();

    // Round-trip once so every connection is known to be registered.
    for client in &mut clients {
        client.write_all(b"x").unwrap();
        let mut buf = [0u8; 1];
        client.read_exact(&mut buf).unwrap();
    }

    let stats = server.stop();
    assert_eq!(stats.closed, 3);

    for client in &mut clients {
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).unwrap_or(0), 0);
    }
}

#[test]
fn test_shutdown_closes_live_connections() {
    shutdown_closes_live_connections(default_server(ReactorOptions::default()));
}

#[test]
fn test_shutdown_closes_live_connections_mio() {
    shutdown_closes_live_connections(mio_server(ReactorOptions::default()));
}
