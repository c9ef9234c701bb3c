use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;

use flatfs::io::FileBlockEmulatorBuilder;
use flatfs::{FsOptions, StorageManager};
use flatfs_server::Server;

fn start_server() -> SocketAddr {
    let dev = FileBlockEmulatorBuilder::from(tempfile::tempfile().unwrap())
        .with_block_count(16)
        .build()
        .unwrap();
    let fs = Arc::new(StorageManager::new(dev, FsOptions::default()).unwrap());
    let server = Server::bind("127.0.0.1:0", fs).unwrap();
    let addr = server.local_addr().unwrap();
    thread::spawn(move || server.run());
    addr
}

struct Client {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Client {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        Self {
            reader: BufReader::new(stream.try_clone().unwrap()),
            writer: stream,
        }
    }

    fn send(&mut self, line: &str) -> String {
        writeln!(self.writer, "{}", line).unwrap();
        let mut reply = String::new();
        self.reader.read_line(&mut reply).unwrap();
        reply.trim_end().to_string()
    }
}

#[test]
fn client_session_round_trips_commands() {
    let addr = start_server();
    let mut client = Client::connect(addr);

    assert_eq!(client.send("CREATE notes.txt"), "OK: created notes.txt");
    assert_eq!(
        client.send("WRITE notes.txt remember the milk"),
        "OK: wrote notes.txt"
    );
    assert_eq!(client.send("READ notes.txt"), "OK: remember the milk");
    assert_eq!(client.send("LIST"), "OK: notes.txt");
    assert_eq!(client.send("READ other.txt"), "ERROR: file not found: other.txt");
    assert_eq!(client.send("BOGUS"), "ERROR: unknown command");
    assert_eq!(client.send("QUIT"), "OK: goodbye");

    // The server closes the connection after QUIT.
    let mut rest = String::new();
    assert_eq!(client.reader.read_line(&mut rest).unwrap(), 0);
}

#[test]
fn clients_share_one_volume() {
    let addr = start_server();
    let mut first = Client::connect(addr);
    let mut second = Client::connect(addr);

    assert_eq!(first.send("CREATE shared"), "OK: created shared");
    assert_eq!(second.send("CREATE shared"), "ERROR: file already exists: shared");
    assert_eq!(second.send("WRITE shared from second"), "OK: wrote shared");
    assert_eq!(first.send("READ shared"), "OK: from second");
}

#[test]
fn failing_request_does_not_end_connection() {
    let addr = start_server();
    let mut client = Client::connect(addr);

    assert_eq!(client.send(""), "ERROR: empty command");
    assert_eq!(client.send("WRITE"), "ERROR: WRITE requires filename and data");
    assert_eq!(client.send("DELETE ghost"), "ERROR: file not found: ghost");
    assert_eq!(client.send("LIST"), "OK: ");

    // A dropped client leaves the server accepting new ones.
    drop(client);
    let mut next = Client::connect(addr);
    assert_eq!(next.send("CREATE after"), "OK: created after");
}

#[test]
fn oversized_line_is_refused_and_connection_survives() {
    let addr = start_server();
    let mut client = Client::connect(addr);
    assert_eq!(client.send("CREATE big"), "OK: created big");

    // 16 blocks of 128 bytes; this payload cannot fit on any line the server accepts.
    let line = format!("WRITE big {}", "x".repeat(5000));
    assert_eq!(client.send(&line), "ERROR: line too long");

    assert_eq!(client.send("READ big"), "OK: ");
    assert_eq!(client.send("LIST"), "OK: big");
    let fits = "y".repeat(1000);
    assert_eq!(client.send(&format!("WRITE big {}", fits)), "OK: wrote big");
    assert_eq!(client.send("READ big"), format!("OK: {}", fits));
}

#[test]
fn parallel_clients_each_get_their_own_file() {
    let addr = start_server();
    let handles: Vec<_> = (0..4)
        .map(|i| {
            thread::spawn(move || {
                let mut client = Client::connect(addr);
                let name = format!("client{}", i);
                assert_eq!(client.send(&format!("CREATE {}", name)), format!("OK: created {}", name));
                for round in 0..10 {
                    let data = format!("round {} from {}", round, name);
                    client.send(&format!("WRITE {} {}", name, data));
                    assert_eq!(client.send(&format!("READ {}", name)), format!("OK: {}", data));
                }
                client.send("QUIT")
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), "OK: goodbye");
    }
}
