use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;

use flatfs::io::BlockStorage;
use flatfs::StorageManager;
use log::{debug, error, info, warn};

use crate::protocol::{handle_line, Response};

/// Room on a request line beyond the payload: verb, name, separators and CRLF.
const LINE_OVERHEAD: usize = 64;

/// Accepts clients and serves each one on its own thread. All workers share
/// the same file system.
pub struct Server<T: BlockStorage + 'static> {
    listener: TcpListener,
    fs: Arc<StorageManager<T>>,
}

impl<T: BlockStorage + 'static> Server<T> {
    pub fn bind<A: ToSocketAddrs>(addr: A, fs: Arc<StorageManager<T>>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self { listener, fs })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves clients until the listener fails for good. A failing client or a
    /// failed accept never stops the loop.
    pub fn run(self) -> std::io::Result<()> {
        info!("Listening on {}.", self.local_addr()?);
        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(err) => {
                    warn!("Failed to accept client: {}", err);
                    continue;
                }
            };
            let peer = stream
                .peer_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "unknown".to_string());
            info!("Handling client {}.", peer);

            let fs = Arc::clone(&self.fs);
            let worker = thread::Builder::new()
                .name(format!("client-{}", peer))
                .spawn(move || {
                    if let Err(err) = serve_client(stream, &fs) {
                        warn!("Connection to {} ended with error: {}", peer, err);
                    } else {
                        debug!("Client {} disconnected.", peer);
                    }
                });
            if let Err(err) = worker {
                error!("Failed to spawn client worker: {}", err);
            }
        }
        Ok(())
    }
}

/// Longest request line worth buffering: a payload filling the whole region
/// plus the surrounding command.
fn line_limit<T: BlockStorage>(fs: &StorageManager<T>) -> usize {
    fs.device().block_count() * fs.block_size() + LINE_OVERHEAD
}

/// Skips input up to and including the next newline, or to EOF.
fn discard_line<R: BufRead>(reader: &mut R) -> std::io::Result<()> {
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            return Ok(());
        }
        match buf.iter().position(|&b| b == b'\n') {
            Some(end) => {
                reader.consume(end + 1);
                return Ok(());
            }
            None => {
                let len = buf.len();
                reader.consume(len);
            }
        }
    }
}

/// Answers request lines until the client quits or closes the connection.
pub fn serve_client<T: BlockStorage>(stream: TcpStream, fs: &StorageManager<T>) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream;
    let limit = line_limit(fs);
    let mut raw = Vec::new();
    loop {
        raw.clear();
        if (&mut reader).take(limit as u64 + 1).read_until(b'\n', &mut raw)? == 0 {
            return Ok(());
        }
        if raw.len() > limit && raw.last() != Some(&b'\n') {
            warn!("Dropping request line longer than {} bytes.", limit);
            discard_line(&mut reader)?;
            writeln!(writer, "{}", Response::Error("line too long".to_string()))?;
            writer.flush()?;
            continue;
        }
        let line = String::from_utf8_lossy(&raw);
        let line = line.trim_end_matches(|c: char| c == '\n' || c == '\r');
        debug!("Received from client: {}", line);

        let (response, quit) = handle_line(fs, line);
        writeln!(writer, "{}", response)?;
        writer.flush()?;
        if quit {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn discard_line_stops_after_newline() {
        let mut input = Cursor::new(b"xxxxxxxx\nLIST\n".to_vec());
        discard_line(&mut input).unwrap();

        let mut rest = String::new();
        input.read_line(&mut rest).unwrap();
        assert_eq!(rest, "LIST\n");
    }

    #[test]
    fn discard_line_tolerates_eof() {
        let mut input = Cursor::new(b"no newline here".to_vec());
        discard_line(&mut input).unwrap();
        assert!(input.fill_buf().unwrap().is_empty());
    }
}
