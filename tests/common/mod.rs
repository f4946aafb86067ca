#![allow(dead_code)]

use std::{path::PathBuf, time::Duration};

use tempfile::TempDir;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

pub const FOLDER1_TEXT: &str = "This is a file in folder 1.";
pub const FOLDER2_TEXT: &str = "This is a file in folder 2.";

/// Two sibling roots, `folder1` and `folder2`, each with its own `index.txt`.
pub struct Fixture {
    dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let folder1 = dir.path().join("folder1");
        let folder2 = dir.path().join("folder2");
        std::fs::create_dir_all(folder1.join("sub")).unwrap();
        std::fs::create_dir_all(&folder2).unwrap();

        std::fs::write(folder1.join("index.txt"), FOLDER1_TEXT).unwrap();
        std::fs::write(folder1.join("page.html"), "<p>page</p>").unwrap();
        std::fs::write(folder1.join("sub").join("nested.txt"), "nested").unwrap();
        std::fs::write(folder2.join("index.txt"), FOLDER2_TEXT).unwrap();
        std::fs::write(dir.path().join("secret.txt"), "outside the root").unwrap();

        Self { dir }
    }

    /// Canonical path of a folder inside the fixture.
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name).canonicalize().unwrap()
    }

    /// Canonical path of a folder inside the fixture, as a string.
    pub fn root(&self, name: &str) -> String {
        self.path(name).to_str().unwrap().to_string()
    }
}

pub fn url(port: u16, path: &str) -> String {
    format!("http://127.0.0.1:{port}{path}")
}

/// GET a path and return status and body.
pub async fn get(port: u16, path: &str) -> (u16, String) {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap();
    let response = client.get(url(port, path)).send().await.unwrap();
    let status = response.status().as_u16();
    (status, response.text().await.unwrap())
}

/// Send a request line verbatim, bypassing client-side path normalisation.
pub async fn raw_get(port: u16, path: &str) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: 127.0.0.1\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

/// Status code from a raw HTTP/1.1 response.
pub fn status_of(raw: &str) -> u16 {
    raw.split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap()
}
