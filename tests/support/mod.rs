use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// In-memory source site served over tiny_http. Pages can be swapped while
/// the server is running, so tests can break and then "fix" a chapter.
pub struct SiteServer {
    pub base_url: String,
    pages: Arc<Mutex<HashMap<String, (u16, String)>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SiteServer {
    pub fn spawn(pages: Vec<(&str, (u16, String))>) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start site server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}");

        let pages: Arc<Mutex<HashMap<String, (u16, String)>>> = Arc::new(Mutex::new(
            pages
                .into_iter()
                .map(|(path, page)| (path.to_owned(), page))
                .collect(),
        ));
        let served = Arc::clone(&pages);

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let path = request.url().to_string();
                let page = served.lock().expect("lock pages").get(&path).cloned();
                let (status, body) = match page {
                    Some(page) => page,
                    None => (404, "not found".to_owned()),
                };

                let header = tiny_http::Header::from_bytes(
                    &b"Content-Type"[..],
                    &b"text/html; charset=utf-8"[..],
                )
                .expect("build header");
                let response = tiny_http::Response::from_string(body)
                    .with_status_code(status)
                    .with_header(header);
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            pages,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Replaces (or adds) one page while the server is running.
    #[allow(dead_code)]
    pub fn set_page(&self, path: &str, status: u16, body: String) {
        self.pages
            .lock()
            .expect("lock pages")
            .insert(path.to_owned(), (status, body));
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl Drop for SiteServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// A chapter page in the layout the default site profile expects: an `h1`
/// heading, the prose in `#content`, and a `.bottem` pagination block.
pub fn chapter_html(title: &str, paragraphs: &[&str], nav_links: &[&str]) -> String {
    let body = paragraphs.join("\n<br><br>\n");
    let nav = nav_links
        .iter()
        .map(|href| format!("<a href=\"{href}\">link</a>"))
        .collect::<String>();
    format!(
        "<!doctype html><html><head><title>{title}</title></head><body>\n\
         <h1>{title}</h1>\n\
         <div id=\"content\">\n{body}\n</div>\n\
         <div class=\"bottem\">{nav}</div>\n\
         </body></html>"
    )
}

pub fn ok(body: String) -> (u16, String) {
    (200, body)
}
