//! Implicit-FTPS wire client (§4.1): TLS established before the banner on
//! port 990, PBSZ/PROT, passive-mode data connections reusing the control
//! channel's TLS session. Command/response pairs are serialized by a
//! mutex; data transfers are serialized by a single-slot semaphore so a
//! `LIST` can never interleave with an in-flight `RETR`/`STOR`.

use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Semaphore};
use tokio_rustls::{client::TlsStream, TlsConnector};

use crate::errors::{DomainError, DomainResult};

#[derive(Debug, Clone, serde::Serialize)]
pub struct FtpEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<String>,
}

pub struct FtpsWireClient {
    host: String,
    connector: TlsConnector,
    control: Mutex<BufReader<TlsStream<TcpStream>>>,
    transfer_slot: Semaphore,
}

impl FtpsWireClient {
    pub async fn connect(host: &str, user: &str, password: &str) -> DomainResult<Self> {
        let connector = TlsConnector::from(Arc::new(super::tls::client_config()));
        let stream = connect_tls(&connector, host, 990).await?;
        let control = Mutex::new(BufReader::new(stream));
        let client = Self { host: host.to_string(), connector, control, transfer_slot: Semaphore::new(1) };
        client.read_reply().await?;
        client.command(&format!("USER {user}")).await?;
        let reply = client.command(&format!("PASS {password}")).await?;
        if reply.code == 530 {
            return Err(DomainError::Unauthorized);
        }
        let _ = client.command("PBSZ 0").await;
        let _ = client.command("PROT P").await;
        Ok(client)
    }

    async fn read_reply(&self) -> DomainResult<Reply> {
        let mut guard = self.control.lock().await;
        read_reply_locked(&mut guard).await
    }

    async fn command(&self, line: &str) -> DomainResult<Reply> {
        let mut guard = self.control.lock().await;
        guard.get_mut().write_all(format!("{line}\r\n").as_bytes()).await.map_err(transport_err)?;
        read_reply_locked(&mut guard).await
    }

    pub async fn list(&self, path: &str) -> DomainResult<Vec<FtpEntry>> {
        let _permit = self.transfer_slot.acquire().await.expect("semaphore not closed");
        self.command("TYPE A").await?;
        let data = self.open_passive_data().await?;
        let reply = self.command(&format!("LIST {path}")).await?;
        reply_to_domain_error(&reply)?;
        let mut data = data;
        let mut raw = Vec::new();
        data.read_to_end(&mut raw).await.map_err(transport_err)?;
        self.read_reply().await?;
        Ok(parse_unix_listing(&String::from_utf8_lossy(&raw)))
    }

    pub async fn retrieve(&self, path: &str) -> DomainResult<Vec<u8>> {
        let _permit = self.transfer_slot.acquire().await.expect("semaphore not closed");
        self.command("TYPE I").await?;
        let mut data = self.open_passive_data().await?;
        let reply = self.command(&format!("RETR {path}")).await?;
        reply_to_domain_error(&reply)?;
        let mut buf = Vec::new();
        data.read_to_end(&mut buf).await.map_err(transport_err)?;
        self.read_reply().await?;
        Ok(buf)
    }

    pub async fn store(&self, path: &str, body: &[u8]) -> DomainResult<()> {
        let _permit = self.transfer_slot.acquire().await.expect("semaphore not closed");
        self.command("TYPE I").await?;
        let mut data = self.open_passive_data().await?;
        let reply = self.command(&format!("STOR {path}")).await?;
        reply_to_domain_error(&reply)?;
        data.write_all(body).await.map_err(transport_err)?;
        data.shutdown().await.ok();
        self.read_reply().await?;
        Ok(())
    }

    pub async fn delete(&self, path: &str) -> DomainResult<()> {
        reply_to_domain_error(&self.command(&format!("DELE {path}")).await?)
    }

    pub async fn rename(&self, from: &str, to: &str) -> DomainResult<()> {
        self.command(&format!("RNFR {from}")).await?;
        reply_to_domain_error(&self.command(&format!("RNTO {to}")).await?)
    }

    pub async fn make_dir(&self, path: &str) -> DomainResult<()> {
        reply_to_domain_error(&self.command(&format!("MKD {path}")).await?)
    }

    /// `PASV`, falling back to `EPSV` if the reply can't be parsed. Opens
    /// the data connection over TLS, reusing the control channel's
    /// underlying session parameters by using the same connector/host.
    async fn open_passive_data(&self) -> DomainResult<TlsStream<TcpStream>> {
        let reply = self.command("PASV").await?;
        let (ip, port) = match parse_pasv(&reply.message) {
            Some((ip, port)) => (ip, port),
            None => {
                let reply = self.command("EPSV").await?;
                parse_epsv(&reply.message).ok_or_else(|| {
                    DomainError::BadGateway("printer did not return a usable passive-mode address".into())
                })?
            }
        };
        let host = if ip == "0.0.0.0" { self.host.clone() } else { ip };
        connect_tls(&self.connector, &host, port).await
    }
}

struct Reply {
    code: u16,
    message: String,
}

async fn read_reply_locked(reader: &mut BufReader<TlsStream<TcpStream>>) -> DomainResult<Reply> {
    let mut line = String::new();
    reader.read_line(&mut line).await.map_err(transport_err)?;
    if line.len() < 4 {
        return Err(DomainError::BadGateway("truncated FTP reply".into()));
    }
    let code: u16 = line[0..3].parse().map_err(|_| DomainError::BadGateway(format!("malformed FTP reply: {line}")))?;
    // Multi-line replies start "code-" and end with "code ".
    if line.as_bytes().get(3) == Some(&b'-') {
        loop {
            let mut cont = String::new();
            reader.read_line(&mut cont).await.map_err(transport_err)?;
            if cont.len() >= 4 && cont.as_bytes()[3] == b' ' && cont.starts_with(&line[0..3]) {
                break;
            }
        }
    }
    Ok(Reply { code, message: line.trim().to_string() })
}

fn reply_to_domain_error(reply: &Reply) -> DomainResult<()> {
    match reply.code {
        200..=299 => Ok(()),
        421 => Err(DomainError::ServiceUnavailable("FTP control channel closed by the printer".into())),
        530 => Err(DomainError::Unauthorized),
        550 => Err(DomainError::NotFound("requested path".into())),
        code => Err(DomainError::BadGateway(format!("FTP error {code}: {}", reply.message))),
    }
}

fn transport_err(e: std::io::Error) -> DomainError {
    if e.kind() == ErrorKind::ConnectionReset || e.kind() == ErrorKind::BrokenPipe {
        DomainError::ServiceUnavailable(format!("FTP transport closed: {e}"))
    } else {
        DomainError::BadGateway(format!("FTP transport error: {e}"))
    }
}

async fn connect_tls(connector: &TlsConnector, host: &str, port: u16) -> DomainResult<TlsStream<TcpStream>> {
    let tcp = tokio::time::timeout(Duration::from_secs(30), TcpStream::connect((host, port)))
        .await
        .map_err(|_| DomainError::ServiceUnavailable(format!("timed out connecting to {host}:{port}")))?
        .map_err(transport_err)?;
    let server_name = rustls_pki_types::ServerName::try_from(host.to_string())
        .map_err(|_| DomainError::BadRequest(format!("invalid FTP host: {host}")))?;
    connector.connect(server_name, tcp).await.map_err(transport_err)
}

/// Parse a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply.
fn parse_pasv(message: &str) -> Option<(String, u16)> {
    let start = message.find('(')?;
    let end = message.find(')')?;
    let nums: Vec<u16> = message[start + 1..end].split(',').filter_map(|n| n.parse().ok()).collect();
    if nums.len() != 6 {
        return None;
    }
    let ip = format!("{}.{}.{}.{}", nums[0], nums[1], nums[2], nums[3]);
    let port = (nums[4] << 8) | nums[5];
    Some((ip, port))
}

/// Parse a `229 Entering Extended Passive Mode (|||port|)` reply.
fn parse_epsv(message: &str) -> Option<(String, u16)> {
    let start = message.find('(')?;
    let end = message.find(')')?;
    let inner = &message[start + 1..end];
    let port: u16 = inner.trim_matches('|').parse().ok()?;
    Some(("0.0.0.0".to_string(), port))
}

fn parse_unix_listing(body: &str) -> Vec<FtpEntry> {
    body.lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let perms = parts.next()?;
            let _links = parts.next()?;
            let _owner = parts.next()?;
            let _group = parts.next()?;
            let size: u64 = parts.next()?.parse().ok()?;
            let month = parts.next()?;
            let day = parts.next()?;
            let year_or_time = parts.next()?;
            let name = parts.collect::<Vec<_>>().join(" ");
            if name.is_empty() {
                return None;
            }
            Some(FtpEntry {
                name,
                is_dir: perms.starts_with('d'),
                size,
                modified: Some(format!("{month} {day} {year_or_time}")),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pasv_reply() {
        let (ip, port) = parse_pasv("227 Entering Passive Mode (192,168,1,50,200,15)").unwrap();
        assert_eq!(ip, "192.168.1.50");
        assert_eq!(port, 200 * 256 + 15);
    }

    #[test]
    fn parses_unix_style_listing() {
        let body = "drwxr-xr-x 2 root root 4096 Jan 01 12:00 models\n-rw-r--r-- 1 root root 1234 Jan 01 12:00 cube.3mf\n";
        let entries = parse_unix_listing(body);
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_dir);
        assert_eq!(entries[1].name, "cube.3mf");
        assert_eq!(entries[1].size, 1234);
    }
}
