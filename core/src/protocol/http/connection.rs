/*
 * connection.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Corriere, a cross-platform application runtime.
 *
 * Corriere is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Corriere is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Corriere.  If not, see <http://www.gnu.org/licenses/>.
 */

//! One HTTP connection: a plain TCP or TLS stream plus its read buffer,
//! tagged with its destination. Every read and write is wrapped in the idle
//! watchdog when the bound request carries a timeout; any activity re-arms it.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::BytesMut;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream as TokioTlsStream;
use tokio_rustls::TlsConnector;

use crate::net::{http_client_config, insecure_client_config};
use crate::protocol::http::error::HttpError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const READ_CHUNK: usize = 8192;

/// Where a connection goes: host, port, and whether the stream is TLS.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// Unified stream: plain TCP or TLS. Implements AsyncRead + AsyncWrite.
pub enum HttpStream {
    Plain(TcpStream),
    Tls(TokioTlsStream<TcpStream>),
}

impl AsyncRead for HttpStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            HttpStream::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for HttpStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            HttpStream::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_flush(cx),
            HttpStream::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            HttpStream::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// A connected stream with its parse buffer. Owned by the pool between
/// requests and borrowed by exactly one transfer while in use.
pub struct HttpConn {
    pub dest: Destination,
    stream: HttpStream,
    read_buf: BytesMut,
}

impl HttpConn {
    /// Connect (TCP, then TLS when the destination requires it). A handshake
    /// failure surfaces as a TLS error distinct from the connect error.
    pub async fn connect(dest: &Destination, disable_tls_verify: bool) -> Result<Self, HttpError> {
        let addr = format!("{}:{}", dest.host, dest.port);
        let tcp = timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                HttpError::Connect(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "TCP connect timed out",
                ))
            })?
            .map_err(HttpError::Connect)?;

        let stream = if dest.tls {
            let host_static: &'static str = Box::leak(dest.host.clone().into_boxed_str());
            let server_name: ServerName<'static> = host_static.try_into().map_err(|_| {
                HttpError::Tls(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "invalid host name",
                ))
            })?;
            let config = if disable_tls_verify {
                insecure_client_config()
            } else {
                http_client_config()
            };
            let connector = TlsConnector::from(config);
            let tls = timeout(CONNECT_TIMEOUT, connector.connect(server_name, tcp))
                .await
                .map_err(|_| {
                    HttpError::Tls(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "TLS handshake timed out",
                    ))
                })?
                .map_err(HttpError::Tls)?;
            HttpStream::Tls(tls)
        } else {
            HttpStream::Plain(tcp)
        };

        Ok(Self {
            dest: dest.clone(),
            stream,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
        })
    }

    /// Read once into the parse buffer, re-arming the idle watchdog.
    /// Returns the number of bytes read (0 = EOF).
    pub async fn read_some(&mut self, idle: Option<Duration>) -> Result<usize, HttpError> {
        let mut tmp = [0u8; READ_CHUNK];
        let n = match idle {
            Some(window) => timeout(window, self.stream.read(&mut tmp))
                .await
                .map_err(|_| HttpError::Timeout)?
                .map_err(HttpError::Connect)?,
            None => self.stream.read(&mut tmp).await.map_err(HttpError::Connect)?,
        };
        self.read_buf.extend_from_slice(&tmp[..n]);
        Ok(n)
    }

    /// Write a whole buffer, idle watchdog armed.
    pub async fn write_all(&mut self, data: &[u8], idle: Option<Duration>) -> Result<(), HttpError> {
        match idle {
            Some(window) => timeout(window, self.stream.write_all(data))
                .await
                .map_err(|_| HttpError::Timeout)?
                .map_err(HttpError::Connect),
            None => self.stream.write_all(data).await.map_err(HttpError::Connect),
        }
    }

    pub async fn flush(&mut self, idle: Option<Duration>) -> Result<(), HttpError> {
        match idle {
            Some(window) => timeout(window, self.stream.flush())
                .await
                .map_err(|_| HttpError::Timeout)?
                .map_err(HttpError::Connect),
            None => self.stream.flush().await.map_err(HttpError::Connect),
        }
    }

    /// The buffered, not-yet-parsed bytes.
    pub fn buffer(&mut self) -> &mut BytesMut {
        &mut self.read_buf
    }

    /// A connection is only reusable when nothing unparsed is left over.
    pub fn is_clean(&self) -> bool {
        self.read_buf.is_empty()
    }

    pub fn stream_mut(&mut self) -> &mut HttpStream {
        &mut self.stream
    }

    /// Close the stream. Errors on shutdown are ignored; the socket is gone
    /// either way.
    pub async fn close(mut self) {
        let _ = self.stream.shutdown().await;
    }
}
