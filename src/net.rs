//! [`HttpTransport`] over an `embassy-net` TCP socket.

use embassy_net::tcp::TcpSocket;
use embassy_net::{IpAddress, IpEndpoint, Ipv4Address, Stack};
use embedded_io_async::Write;

use crate::config::TAG;
use crate::http::{
    parse_response, status_line_end, write_request, Endpoint, HttpError, HttpTransport,
};
use crate::publisher::HTTP_TIMEOUT;

pub struct NetHttpClient {
    stack: Stack<'static>,
}

impl NetHttpClient {
    pub fn new(stack: Stack<'static>) -> Self {
        Self { stack }
    }
}

impl HttpTransport for NetHttpClient {
    async fn post(&mut self, endpoint: &Endpoint, body: &str) -> Result<u16, HttpError> {
        let request = write_request(endpoint, body)?;

        let mut rx_buf = [0u8; 1024];
        let mut tx_buf = [0u8; 1024];
        let mut socket = TcpSocket::new(self.stack, &mut rx_buf, &mut tx_buf);
        socket.set_timeout(Some(HTTP_TIMEOUT));

        let [a, b, c, d] = endpoint.ip;
        let remote = IpEndpoint::new(IpAddress::Ipv4(Ipv4Address::new(a, b, c, d)), endpoint.port);
        log::debug!(target: TAG, "http: connecting to {:?}", remote);

        if let Err(e) = socket.connect(remote).await {
            log::debug!(target: TAG, "http: connect: {:?}", e);
            socket.abort();
            return Err(HttpError::Connect);
        }

        if let Err(e) = socket.write_all(request.as_bytes()).await {
            log::debug!(target: TAG, "http: write: {:?}", e);
            socket.abort();
            return Err(HttpError::Write);
        }

        // Only the status line is needed; stop there rather than waiting for
        // the server to close.
        let mut response_buf = [0u8; 512];
        let mut total_read = 0;
        loop {
            match socket.read(&mut response_buf[total_read..]).await {
                Ok(0) => break,
                Ok(n) => {
                    total_read += n;
                    if total_read >= response_buf.len()
                        || status_line_end(&response_buf[..total_read]).is_some()
                    {
                        break;
                    }
                }
                Err(e) => {
                    log::debug!(target: TAG, "http: read: {:?}", e);
                    socket.abort();
                    return Err(HttpError::Read);
                }
            }
        }

        socket.abort();
        parse_response(&response_buf[..total_read])
    }
}
