use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Minimal in-process HTTP endpoint for provider tests: answers consecutive
/// requests with the given status/body pairs and hands back the JSON bodies
/// it received so tests can assert on the outgoing wire format.
pub async fn respond_with(
    responses: Vec<(u16, String)>,
) -> (String, JoinHandle<Vec<serde_json::Value>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let mut bodies = Vec::new();
        for (status, body) in responses {
            let (mut stream, _) = listener.accept().await.unwrap();
            bodies.push(read_json_request(&mut stream).await);

            let reason = if status == 200 { "OK" } else { "Error" };
            let response = format!(
                "HTTP/1.1 {status} {reason}\r\n\
                 content-type: application/json\r\n\
                 content-length: {}\r\n\
                 connection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
        }
        bodies
    });

    (format!("http://{address}"), handle)
}

async fn read_json_request(stream: &mut TcpStream) -> serde_json::Value {
    let mut raw = Vec::new();
    let mut chunk = [0u8; 4096];

    let (body_start, content_length) = loop {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before request headers completed");
        raw.extend_from_slice(&chunk[..n]);
        if let Some(position) = raw.windows(4).position(|window| window == b"\r\n\r\n") {
            let headers = String::from_utf8_lossy(&raw[..position]).to_string();
            let content_length = headers
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    if name.eq_ignore_ascii_case("content-length") {
                        value.trim().parse::<usize>().ok()
                    } else {
                        None
                    }
                })
                .unwrap_or(0);
            break (position + 4, content_length);
        }
    };

    while raw.len() < body_start + content_length {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before request body completed");
        raw.extend_from_slice(&chunk[..n]);
    }

    serde_json::from_slice(&raw[body_start..body_start + content_length]).unwrap()
}
