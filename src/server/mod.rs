//! Poll-friendly HTTP boundary for the display collaborator. Serves
//! point-in-time copies of the histogram and summary while the simulation
//! runs on a background task; never blocks the writer beyond the snapshot
//! copy itself.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};

pub mod api;
pub mod routes;

/// Read-only view handed to request handlers.
#[derive(Clone)]
pub struct ServerContext {
    pub shared: crate::aggregate::SharedAggregate,
    pub target_trials: u64,
}

pub fn run_server(bind_addr: &str, ctx: ServerContext) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind_addr)?;
    println!("graveler server listening on http://{bind_addr}");

    for stream in listener.incoming() {
        match stream {
            Ok(mut stream) => {
                if let Err(err) = handle_connection(&mut stream, &ctx) {
                    eprintln!("request error: {err}");
                }
            }
            Err(err) => eprintln!("connection failed: {err}"),
        }
    }

    Ok(())
}

fn handle_connection(stream: &mut TcpStream, ctx: &ServerContext) -> std::io::Result<()> {
    let mut buffer = [0_u8; 8192];
    let bytes_read = stream.read(&mut buffer)?;
    if bytes_read == 0 {
        return Ok(());
    }

    let request = String::from_utf8_lossy(&buffer[..bytes_read]);
    let request_line = request.lines().next().unwrap_or_default();
    let mut request_parts = request_line.split_whitespace();
    let method = request_parts.next().unwrap_or("GET");
    let path = request_parts.next().unwrap_or("/");

    let response = routes::route_request(method, path, ctx).to_http_string();
    stream.write_all(response.as_bytes())?;
    stream.flush()?;
    Ok(())
}
