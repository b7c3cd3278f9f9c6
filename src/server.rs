use crate::cli::Cli;
use crate::error::AppError;
use crate::fs::{ensure_root_directory, list_directory};
use crate::http::{handle_client, ServeContext};
use log::{debug, error, info};
use rand::Rng;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, UdpSocket};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use threadpool::ThreadPool;

/// How long a connection may sit idle on a read or write before it is dropped.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Address other devices on the network can reach this machine at.
///
/// A UDP "connect" sends nothing; it only makes the OS pick the outbound
/// interface, whose address is then read back. Falls back to loopback.
pub fn local_ip() -> IpAddr {
    outbound_ip().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn outbound_ip() -> std::io::Result<IpAddr> {
    let socket = UdpSocket::bind(("0.0.0.0", 0))?;
    socket.connect(("8.8.8.8", 80))?;
    Ok(socket.local_addr()?.ip())
}

/// Runs the server until a message arrives on `shutdown_rx`.
///
/// `addr_tx` receives the bound address once listening, which lets callers
/// bind port 0 and learn the real port.
pub fn run_server(
    cli: Cli,
    shutdown_rx: Option<mpsc::Receiver<()>>,
    addr_tx: Option<mpsc::Sender<SocketAddr>>,
) -> Result<(), AppError> {
    println!("Starting server...");
    println!("Target folder: {}", cli.directory.display());

    if ensure_root_directory(&cli.directory)? {
        println!("Created folder");
    }
    let root = cli.directory.canonicalize()?;

    match list_directory(&root) {
        Ok(entries) => info!("{} entries in '{}'", entries.len(), root.display()),
        Err(e) => error!("Could not list '{}': {e}", root.display()),
    }

    let bind_address = format!("{}:{}", cli.listen, cli.port);
    let listener = TcpListener::bind(&bind_address)?;
    let local_addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;

    if let Some(tx) = addr_tx {
        if tx.send(local_addr).is_err() {
            return Err(AppError::InternalServerError(
                "Failed to send server address to test thread".to_string(),
            ));
        }
    }

    let port = local_addr.port();
    println!();
    println!("🚀 SERVER STARTED!");
    println!("📱 Network URL: http://{}:{port}", local_ip());
    println!("💻 Local URL: http://127.0.0.1:{port}");
    println!("Press Ctrl+C to stop");
    println!();
    info!(
        "Server listening on {} for directory '{}'",
        local_addr,
        root.display()
    );

    let ctx = Arc::new(ServeContext {
        root,
        chunk_size: cli.chunk_size,
        title: cli.title,
        archive_name: cli.archive_name,
    });
    let pool = ThreadPool::new(cli.threads.max(1));

    'server_loop: loop {
        if let Some(ref rx) = shutdown_rx {
            if rx.try_recv().is_ok() {
                info!("Shutdown signal received. Shutting down gracefully.");
                break 'server_loop;
            }
        }

        match listener.accept() {
            Ok((stream, peer)) => {
                // Workers use blocking I/O, bounded so idle clients cannot pin a worker.
                let configured = stream
                    .set_nonblocking(false)
                    .and_then(|()| stream.set_read_timeout(Some(CONNECTION_TIMEOUT)))
                    .and_then(|()| stream.set_write_timeout(Some(CONNECTION_TIMEOUT)));
                if let Err(e) = configured {
                    error!("Could not configure connection from {peer}: {e}");
                    continue;
                }
                let ctx = Arc::clone(&ctx);
                let request_id = generate_request_id();
                let log_prefix = format!("[ReqID: {request_id}][Peer: {peer}]");

                pool.execute(move || {
                    debug!("{log_prefix} Handling client connection");
                    match handle_client(stream, &ctx, &log_prefix) {
                        Ok(()) => debug!("{log_prefix} Client handled successfully"),
                        Err(e) => error!("{log_prefix} Error handling client: {e}"),
                    }
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(100));
                continue;
            }
            Err(e) => {
                error!("Error accepting connection: {e}");
            }
        }
    }

    // Workers still busy are left to finish (or time out) on their own.
    let active = pool.active_count();
    if active > 0 {
        info!("{active} connection(s) still in progress at shutdown");
    }
    println!("✅ Server stopped successfully!");
    Ok(())
}

fn generate_request_id() -> String {
    rand::rng()
        .sample_iter(&rand::distr::Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}
