//! Raw protocol client for asserting on exact wire messages.

use std::time::Duration;

use serde_json::Value;

use tether_config::SocketEndpoint;
use tether_protocol::Message;

use crate::identity::ClientIdentity;
use crate::transport::{ConnectionStream, LineReader, MessageWriter, connect};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

pub struct WireClient {
    reader: LineReader<ConnectionStream>,
    writer: MessageWriter<ConnectionStream>,
}

impl WireClient {
    pub fn connect(endpoint: &SocketEndpoint) -> Self {
        let stream = connect(endpoint, READ_TIMEOUT).expect("connect to daemon");
        stream
            .set_read_timeout(Some(READ_TIMEOUT))
            .expect("set read timeout");
        let writer = MessageWriter::new(stream.try_clone().expect("clone stream"));
        Self {
            reader: LineReader::new(stream),
            writer,
        }
    }

    /// Connects and completes a handshake as `identity`.
    pub fn admitted(endpoint: &SocketEndpoint, identity: &ClientIdentity) -> Self {
        let mut client = Self::connect(endpoint);
        client.send(&identity.handshake());
        let ack = client.recv();
        assert_eq!(ack["type"], "handshake_ack");
        assert_eq!(ack["accepted"], true, "handshake refused: {ack}");
        client
    }

    pub fn send(&mut self, message: &Message) {
        self.writer.send(message).expect("send message");
    }

    pub fn send_raw(&mut self, line: &str) {
        use std::io::Write;
        let stream = self.writer.get_ref();
        let mut stream = stream.try_clone().expect("clone stream");
        stream.write_all(line.as_bytes()).expect("write raw line");
        stream.write_all(b"\n").expect("write newline");
        stream.flush().expect("flush raw line");
    }

    /// Reads the next message as untyped JSON.
    pub fn recv(&mut self) -> Value {
        let line = self
            .reader
            .read_line()
            .expect("read from daemon")
            .expect("daemon closed the connection");
        serde_json::from_str(&line).expect("daemon sent JSON")
    }

    /// Reads until a message of `kind` arrives.
    pub fn recv_kind(&mut self, kind: &str) -> Value {
        loop {
            let message = self.recv();
            if message["type"] == kind {
                return message;
            }
        }
    }

    /// Whether the daemon closed the connection.
    pub fn is_closed(&mut self) -> bool {
        matches!(self.reader.read_line(), Ok(None) | Err(_))
    }
}
