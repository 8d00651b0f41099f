use std::io::{self, BufWriter, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::output::opentsdb::{Connection, Connector};

const READ_CHUNK: usize = 1024;

/// Opens plain TCP connections, optionally bounded by a connect timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector {
    pub connect_timeout: Option<Duration>,
}

impl Connector for TcpConnector {
    type Connection = TcpConnection;

    fn connect(&self, host: &str, port: u16) -> io::Result<TcpConnection> {
        let stream = match self.connect_timeout {
            None => TcpStream::connect((host, port))?,
            Some(timeout) => connect_timeout((host, port), timeout)?,
        };

        Ok(TcpConnection::new(stream))
    }
}

fn connect_timeout(addr: impl ToSocketAddrs, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "could not resolve to any address")
    }))
}

/// Buffered TCP connection.
///
/// Responses are only ever read from what the socket already holds. A line the server has
/// not finished is kept until a later drain completes it.
#[derive(Debug)]
pub struct TcpConnection {
    writer: BufWriter<TcpStream>,
    pending: Vec<u8>,
    eof: bool,
}

impl TcpConnection {
    #[must_use]
    pub fn new(stream: TcpStream) -> Self {
        TcpConnection { writer: BufWriter::new(stream), pending: Vec::new(), eof: false }
    }

    fn has_line(&self) -> bool {
        self.pending.contains(&b'\n')
    }

    /// Moves everything readable without blocking into `pending`.
    ///
    /// The socket is shared with the writer, so it is back in blocking mode before this
    /// returns, whatever the outcome of the read.
    fn fill(&mut self) -> io::Result<()> {
        if self.eof {
            return Ok(());
        }

        let stream = self.writer.get_ref();
        stream.set_nonblocking(true)?;
        let read = read_available(stream, &mut self.pending);
        let restored = stream.set_nonblocking(false);

        self.eof = read?;
        restored
    }

    fn take_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=end).collect();

        Some(decode(&line))
    }
}

/// Returns `true` once the peer has closed its side.
fn read_available(mut stream: &TcpStream, pending: &mut Vec<u8>) -> io::Result<bool> {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => return Ok(true),
            Ok(n) => pending.extend_from_slice(&chunk[..n]),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
}

fn decode(line: &[u8]) -> String {
    String::from_utf8_lossy(line)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

impl Connection for TcpConnection {
    fn output(&mut self) -> io::Result<&mut dyn Write> {
        Ok(&mut self.writer)
    }

    fn response_ready(&mut self) -> io::Result<bool> {
        if self.has_line() || self.eof {
            return Ok(true);
        }

        self.fill()?;

        // End of stream also counts as ready; the next read reports it.
        Ok(self.has_line() || self.eof)
    }

    fn read_response_line(&mut self) -> io::Result<Option<String>> {
        if !self.has_line() {
            self.fill()?;
        }
        if let Some(line) = self.take_line() {
            return Ok(Some(line));
        }

        // An unterminated tail is only a line once the peer is gone.
        if self.eof && !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);

            return Ok(Some(decode(&tail)));
        }

        Ok(None)
    }

    fn close(mut self) -> io::Result<()> {
        let flushed = self.writer.flush();
        let shutdown = match self.writer.get_ref().shutdown(Shutdown::Both) {
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        };

        flushed.and(shutdown)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::time::Instant;

    use super::*;

    fn listen() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        (listener, port)
    }

    /// Polls until a response is ready; loopback delivery is fast but not synchronous.
    fn wait_ready(connection: &mut TcpConnection) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !connection.response_ready().unwrap() {
            assert!(Instant::now() < deadline, "no response within 5s");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn connect_refused() {
        let (listener, port) = listen();
        drop(listener);

        let err = TcpConnector::default().connect("127.0.0.1", port).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }

    #[test]
    fn write_and_read_response() {
        let (listener, port) = listen();
        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            (&stream).write_all(b"unknown metric\r\n").unwrap();

            line
        });

        let connector = TcpConnector { connect_timeout: Some(Duration::from_secs(5)) };
        let mut connection = connector.connect("127.0.0.1", port).unwrap();
        let out = connection.output().unwrap();
        out.write_all(b"put m 0 1 host=h\n").unwrap();
        out.flush().unwrap();

        assert_eq!(server.join().unwrap(), "put m 0 1 host=h\n");
        wait_ready(&mut connection);
        assert_eq!(connection.read_response_line().unwrap().as_deref(), Some("unknown metric"));
        // The server hung up after answering.
        wait_ready(&mut connection);
        assert_eq!(connection.read_response_line().unwrap(), None);
        connection.close().unwrap();
    }

    #[test]
    fn nothing_ready_on_idle_connection() {
        let (listener, port) = listen();

        let mut connection = TcpConnector::default().connect("127.0.0.1", port).unwrap();
        let (_server_side, _) = listener.accept().unwrap();

        assert!(!connection.response_ready().unwrap());
        assert_eq!(connection.read_response_line().unwrap(), None);
        connection.close().unwrap();
    }

    #[test]
    fn partial_line_is_carried_over() {
        let (listener, port) = listen();
        let (resume_tx, resume_rx) = mpsc::channel::<()>();
        let (sent_tx, sent_rx) = mpsc::channel::<()>();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"unknown ").unwrap();
            sent_tx.send(()).unwrap();
            resume_rx.recv().unwrap();
            stream.write_all(b"metric\nnext").unwrap();
            sent_tx.send(()).unwrap();
            // Hold the socket open until the client is done.
            resume_rx.recv().unwrap();
        });

        let mut connection = TcpConnector::default().connect("127.0.0.1", port).unwrap();
        sent_rx.recv().unwrap();
        for _ in 0..10 {
            assert!(!connection.response_ready().unwrap());
            assert_eq!(connection.read_response_line().unwrap(), None);
        }

        resume_tx.send(()).unwrap();
        sent_rx.recv().unwrap();
        wait_ready(&mut connection);
        assert_eq!(connection.read_response_line().unwrap().as_deref(), Some("unknown metric"));
        assert!(!connection.response_ready().unwrap());

        // The socket is back in blocking mode for the writer.
        let out = connection.output().unwrap();
        out.write_all(b"put m 0 1 host=h\n").unwrap();
        out.flush().unwrap();

        resume_tx.send(()).unwrap();
        server.join().unwrap();
        wait_ready(&mut connection);
        assert_eq!(connection.read_response_line().unwrap().as_deref(), Some("next"));
        assert_eq!(connection.read_response_line().unwrap(), None);
    }
}
