#![allow(dead_code)]

use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use liso::config::Config;
use liso::server::{Server, ShutdownHandle};
use tempfile::TempDir;

pub const INDEX: &str = "<html><body>liso</body></html>";

/// A server running on an ephemeral port in a background thread.
pub struct TestServer {
    pub addr: SocketAddr,
    pub tls_addr: Option<SocketAddr>,
    handle: ShutdownHandle,
    thread: Option<JoinHandle<anyhow::Result<()>>>,
    _root: TempDir,
}

impl TestServer {
    pub fn start(configure: impl FnOnce(&mut Config, &TempDir)) -> Self {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("index.html"), INDEX).unwrap();

        let mut config = Config::default();
        config.server.listen_addr = "127.0.0.1:0".to_string();
        config.static_files.root = root.path().to_path_buf();
        configure(&mut config, &root);

        let mut server = Server::bind(&config).unwrap();
        let addr = server.local_addr().unwrap();
        let tls_addr = server.tls_local_addr();
        let handle = server.shutdown_handle();
        let thread = thread::spawn(move || server.run());

        Self {
            addr,
            tls_addr,
            handle,
            thread: Some(thread),
            _root: root,
        }
    }

    pub fn connect(&self) -> Client {
        let stream = TcpStream::connect(self.addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        Client {
            reader: BufReader::new(stream.try_clone().unwrap()),
            stream,
        }
    }

    pub fn stop(&mut self) -> anyhow::Result<()> {
        self.handle.shutdown();
        match self.thread.take() {
            Some(thread) => thread.join().unwrap(),
            None => Ok(()),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

pub struct Client {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
}

impl Client {
    pub fn send(&mut self, raw: &[u8]) {
        self.stream.write_all(raw).unwrap();
    }

    pub fn read_reply(&mut self) -> Reply {
        read_reply(&mut self.reader)
    }

    pub fn assert_closed(&mut self) {
        assert_closed(&mut self.reader);
    }
}

#[derive(Debug)]
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Reads one response, body included, off `reader`.
pub fn read_reply(reader: &mut impl BufRead) -> Reply {
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    let status = line
        .split(' ')
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap_or_else(|| panic!("bad status line {line:?}"));

    let mut headers = Vec::new();
    loop {
        line.clear();
        reader.read_line(&mut line).unwrap();
        let header = line.trim_end_matches("\r\n");
        if header.is_empty() {
            break;
        }
        let (name, value) = header.split_once(": ").unwrap();
        headers.push((name.to_string(), value.to_string()));
    }

    let length = headers
        .iter()
        .find(|(k, _)| k == "Content-Length")
        .map(|(_, v)| v.parse().unwrap())
        .unwrap_or(0);
    let mut body = vec![0; length];
    reader.read_exact(&mut body).unwrap();

    Reply {
        status,
        headers,
        body,
    }
}

/// Asserts the peer has closed its end.
pub fn assert_closed(reader: &mut impl Read) {
    let mut buf = [0u8; 16];
    let n = reader.read(&mut buf).unwrap();
    assert_eq!(n, 0, "expected the server to close the connection");
}
