//! Minimal scripted HTTP/1.1 server for transport tests.
//!
//! Each path answers with the next status of its script (200 once the script
//! runs out) and closes the connection. Every request line is recorded.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

type Script = Arc<Mutex<HashMap<String, VecDeque<u16>>>>;

pub struct StubServer {
    addr: SocketAddr,
    log: Arc<Mutex<Vec<String>>>,
}

impl StubServer {
    pub async fn start(routes: Vec<(&str, Vec<u16>)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let script: Script = Arc::new(Mutex::new(
            routes
                .into_iter()
                .map(|(path, statuses)| (path.to_string(), VecDeque::from(statuses)))
                .collect(),
        ));
        let log = Arc::new(Mutex::new(Vec::new()));

        let (script_rx, log_rx) = (Arc::clone(&script), Arc::clone(&log));
        tokio::spawn(async move {
            while let Ok((sock, _)) = listener.accept().await {
                tokio::spawn(answer(sock, Arc::clone(&script_rx), Arc::clone(&log_rx)));
            }
        });

        Self { addr, log }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// `"METHOD /path"` for every request seen so far, in arrival order.
    pub fn requests(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

async fn answer(mut sock: TcpStream, script: Script, log: Arc<Mutex<Vec<String>>>) {
    let Some(head) = read_head(&mut sock).await else {
        return;
    };
    let mut parts = head.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let status = script
        .lock()
        .unwrap()
        .get_mut(&path)
        .and_then(|q| q.pop_front())
        .unwrap_or(200);
    log.lock().unwrap().push(format!("{} {}", method, path));

    let reply = format!(
        "HTTP/1.1 {} Stub\r\nContent-Type: text/html\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
        status
    );
    let _ = sock.write_all(reply.as_bytes()).await;
    let _ = sock.shutdown().await;
}

/// Read the request head and drain any body announced by Content-Length.
async fn read_head(sock: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = sock.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);

        let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&buf[..end]).to_string();
        let body_len = head
            .lines()
            .filter_map(|l| l.split_once(':'))
            .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.trim().parse::<usize>().ok())
            .unwrap_or(0);

        let mut have = buf.len() - end - 4;
        while have < body_len {
            let n = sock.read(&mut chunk).await.ok()?;
            if n == 0 {
                break;
            }
            have += n;
        }
        return Some(head);
    }
}
