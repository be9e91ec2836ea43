//! HTTP transport that records every post and answers from a script.

use crate::http::{Endpoint, HttpError, HttpTransport};

#[derive(Clone, Copy, Debug)]
pub enum Reply {
    Status(u16),
    Fail(HttpError),
    /// Never completes; the caller's timeout has to fire.
    Hang,
}

pub struct RecordingTransport {
    pub reply: Reply,
    pub posts: Vec<(Endpoint, String)>,
}

impl RecordingTransport {
    pub fn new(reply: Reply) -> Self {
        Self {
            reply,
            posts: Vec::new(),
        }
    }

    pub fn bodies(&self) -> Vec<&str> {
        self.posts.iter().map(|(_, body)| body.as_str()).collect()
    }
}

impl HttpTransport for RecordingTransport {
    async fn post(&mut self, endpoint: &Endpoint, body: &str) -> Result<u16, HttpError> {
        self.posts.push((*endpoint, body.to_string()));
        match self.reply {
            Reply::Status(status) => Ok(status),
            Reply::Fail(e) => Err(e),
            Reply::Hang => core::future::pending().await,
        }
    }
}

/// RNG returning a fixed cycle of words.
pub struct FixedRng {
    words: Vec<u32>,
    next: usize,
}

impl FixedRng {
    pub fn new(words: &[u32]) -> Self {
        Self {
            words: words.to_vec(),
            next: 0,
        }
    }
}

impl rand_core::RngCore for FixedRng {
    fn next_u32(&mut self) -> u32 {
        let word = self.words[self.next % self.words.len()];
        self.next += 1;
        word
    }

    fn next_u64(&mut self) -> u64 {
        rand_core::impls::next_u64_via_u32(self)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        rand_core::impls::fill_bytes_via_next(self, dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

pub fn collector() -> Endpoint {
    Endpoint {
        ip: [172, 18, 0, 1],
        port: 3000,
    }
}
