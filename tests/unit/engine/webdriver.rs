use super::*;

#[test]
fn w3c_codes_map_to_engine_taxonomy() {
    assert!(matches!(
        map_w3c_error("no such element", "#more"),
        EngineError::NotFound(_)
    ));
    assert!(matches!(
        map_w3c_error("timeout", ""),
        EngineError::Timeout { .. }
    ));
    assert!(matches!(
        map_w3c_error("javascript error", "x is not defined"),
        EngineError::Script(_)
    ));
    assert!(matches!(
        map_w3c_error("invalid session id", ""),
        EngineError::Crashed(_)
    ));
    assert!(matches!(
        map_w3c_error("unknown error", "session deleted because of page crash: tab crashed"),
        EngineError::Crashed(_)
    ));
    assert!(matches!(
        map_w3c_error("unknown error", "net::ERR_NAME_NOT_RESOLVED"),
        EngineError::Navigation(_)
    ));
    assert!(matches!(
        map_w3c_error("element not interactable", ""),
        EngineError::Protocol(_)
    ));
}

#[test]
fn endpoint_gets_trailing_slash_so_session_paths_nest() {
    let opts = WebDriverOptions::new(Url::parse("http://grid.local:4444/wd/hub").unwrap());
    let engine = WebDriverEngine::new(opts).unwrap();
    let session = join(&engine.opts.endpoint, "session").unwrap();
    assert_eq!(session.as_str(), "http://grid.local:4444/wd/hub/session");
}

#[test]
fn chrome_capabilities_use_eager_load_and_viewport() {
    let engine = WebDriverEngine::new(WebDriverOptions::new(
        Url::parse("http://localhost:9515").unwrap(),
    ))
    .unwrap();
    let caps = engine.capabilities(&Viewport {
        width: 1280,
        height: 720,
        device_scale_factor: 2.0,
    });
    let always = &caps["capabilities"]["alwaysMatch"];
    assert_eq!(always["pageLoadStrategy"], "eager");
    let args: Vec<&str> = always["goog:chromeOptions"]["args"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(args.contains(&"--window-size=1280,720"));
    assert!(args.contains(&"--force-device-scale-factor=2"));
    assert!(args.contains(&"--headless=new"));
}

/// Minimal WebDriver endpoint: creates session `s1`, rejects window sizing, accepts deletion.
fn window_rejecting_endpoint() -> (Url, std::sync::Arc<std::sync::Mutex<Vec<String>>>) {
    use std::io::{BufRead as _, BufReader, Read as _, Write as _};

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let log = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen = log.clone();
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let mut stream = stream.unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let mut parts = line.split_whitespace();
            let request = format!("{} {}", parts.next().unwrap(), parts.next().unwrap());

            let mut len = 0usize;
            loop {
                let mut header = String::new();
                reader.read_line(&mut header).unwrap();
                let header = header.trim_end();
                if header.is_empty() {
                    break;
                }
                if let Some((k, v)) = header.split_once(':') {
                    if k.eq_ignore_ascii_case("content-length") {
                        len = v.trim().parse().unwrap();
                    }
                }
            }
            let mut body = vec![0; len];
            reader.read_exact(&mut body).unwrap();

            let (status, reply) = if request == "POST /session" {
                ("200 OK", json!({ "value": { "sessionId": "s1", "capabilities": {} } }))
            } else if request.ends_with("/window/rect") {
                (
                    "500 Internal Server Error",
                    json!({ "value": { "error": "unsupported operation", "message": "no window" } }),
                )
            } else {
                ("200 OK", json!({ "value": null }))
            };
            seen.lock().unwrap().push(request);
            let reply = reply.to_string();
            write!(
                stream,
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{reply}",
                reply.len()
            )
            .unwrap();
        }
    });
    (Url::parse(&format!("http://{addr}/")).unwrap(), log)
}

#[tokio::test]
async fn failed_window_sizing_deletes_the_new_session() {
    let (endpoint, log) = window_rejecting_endpoint();
    let engine = WebDriverEngine::new(WebDriverOptions::new(endpoint)).unwrap();

    let err = match engine.open_page(&Viewport::default()).await {
        Ok(_) => panic!("window sizing was rejected"),
        Err(e) => e,
    };
    assert!(matches!(err, EngineError::Unsupported(_)));
    assert_eq!(
        *log.lock().unwrap(),
        [
            "POST /session",
            "POST /session/s1/window/rect",
            "DELETE /session/s1/"
        ]
    );
}
