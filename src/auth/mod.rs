/*!
 * Authenticator (distilled spec §4.4). Runs immediately after the TCP
 * handshake, before a `Connection` is handed to its pool.
 */

pub mod cr;
pub mod pbkdf2_cache;
pub mod scram;
pub mod x509;

use std::future::Future;
use std::pin::Pin;

use crate::bson::Document;
use crate::document;
use crate::error::{Error, ErrorKind, Result};

use scram::ScramSha1Client;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Mechanism selected from wire version and explicit configuration: wire
/// version >= 3 defaults to SCRAM, X.509 if requested, otherwise legacy CR.
#[derive(Debug, Clone)]
pub enum Authenticator {
    ScramSha1 { username: String, password: String },
    Cr { username: String, password: String },
    X509 { subject_dn: String },
    None,
}

impl Authenticator {
    pub fn for_wire_version(wire_version: i32, username: String, password: String) -> Self {
        if wire_version >= 3 {
            Authenticator::ScramSha1 { username, password }
        } else {
            Authenticator::Cr { username, password }
        }
    }
}

/// The minimal surface a `Connection` exposes for running auth commands;
/// kept as a trait so this module has no dependency on `crate::connection`.
/// Manually boxes its future instead of depending on `async-trait`, so the
/// trait stays object-safe for `&mut dyn CommandTransport`.
pub trait CommandTransport {
    fn run_command<'a>(&'a mut self, db: &'a str, cmd: Document) -> BoxFuture<'a, Result<Document>>;
}

fn command_ok(reply: &Document) -> bool {
    matches!(reply.get_i32("ok"), Some(1)) || reply.get("ok").and_then(|b| b.as_bool()) == Some(true)
}

fn auth_failed(reply: &Document) -> Error {
    let code = reply.get_i32("code").unwrap_or(0);
    let message = reply.get_str("errmsg").unwrap_or("authentication failed").to_string();
    Error::new(ErrorKind::Auth(format!("code {code}: {message}")))
}

/// Runs the selected mechanism's handshake to completion. The Connection is
/// closed by the caller on any error, per the distilled spec's failure
/// semantics for C4.
pub async fn authenticate(authenticator: &Authenticator, transport: &mut dyn CommandTransport, auth_source: &str) -> Result<()> {
    match authenticator {
        Authenticator::None => Ok(()),
        Authenticator::ScramSha1 { username, password } => {
            authenticate_scram_sha1(transport, auth_source, username, password).await
        }
        Authenticator::Cr { username, password } => authenticate_cr(transport, auth_source, username, password).await,
        Authenticator::X509 { subject_dn } => authenticate_x509(transport, subject_dn).await,
    }
}

async fn authenticate_scram_sha1(
    transport: &mut dyn CommandTransport,
    auth_source: &str,
    username: &str,
    password: &str,
) -> Result<()> {
    let client = ScramSha1Client::new(username, password);
    let first = client.client_first();

    let start_reply = transport
        .run_command(
            auth_source,
            document! {
                "saslStart" => 1i32,
                "mechanism" => "SCRAM-SHA-1",
                "payload" => crate::bson::Bson::Binary(crate::bson::Binary {
                    subtype: crate::bson::BinarySubtype::Generic,
                    bytes: first.payload.clone().into_bytes(),
                }),
            },
        )
        .await?;
    if !command_ok(&start_reply) {
        return Err(auth_failed(&start_reply));
    }
    let conversation_id = start_reply.get_i32("conversationId").unwrap_or(1);
    let server_first = payload_as_str(&start_reply)?;

    let client_final = client.process_server_first(&first, &server_first)?;

    let continue_reply = transport
        .run_command(
            auth_source,
            document! {
                "saslContinue" => 1i32,
                "conversationId" => conversation_id,
                "payload" => crate::bson::Bson::Binary(crate::bson::Binary {
                    subtype: crate::bson::BinarySubtype::Generic,
                    bytes: client_final.payload.clone().into_bytes(),
                }),
            },
        )
        .await?;
    if !command_ok(&continue_reply) {
        return Err(auth_failed(&continue_reply));
    }
    let server_final = payload_as_str(&continue_reply)?;
    client.verify_server_final(&client_final, &server_final)?;

    if continue_reply.get_bool("done") == Some(true) {
        return Ok(());
    }

    // Message 3: empty payload, expect `done: true`.
    let done_reply = transport
        .run_command(
            auth_source,
            document! {
                "saslContinue" => 1i32,
                "conversationId" => conversation_id,
                "payload" => crate::bson::Bson::Binary(crate::bson::Binary {
                    subtype: crate::bson::BinarySubtype::Generic,
                    bytes: Vec::new(),
                }),
            },
        )
        .await?;
    if !command_ok(&done_reply) || done_reply.get_bool("done") != Some(true) {
        return Err(auth_failed(&done_reply));
    }
    Ok(())
}

fn payload_as_str(reply: &Document) -> Result<String> {
    match reply.get("payload") {
        Some(crate::bson::Bson::Binary(bin)) => String::from_utf8(bin.bytes.clone())
            .map_err(|_| Error::new(ErrorKind::Auth("SASL payload was not valid UTF-8".into()))),
        Some(crate::bson::Bson::String(s)) => Ok(s.clone()),
        _ => Err(Error::new(ErrorKind::Auth("reply missing SASL payload".into()))),
    }
}

async fn authenticate_cr(transport: &mut dyn CommandTransport, auth_source: &str, username: &str, password: &str) -> Result<()> {
    let nonce_reply = transport.run_command(auth_source, document! { "getnonce" => 1i32 }).await?;
    if !command_ok(&nonce_reply) {
        return Err(auth_failed(&nonce_reply));
    }
    let nonce = nonce_reply
        .get_str("nonce")
        .ok_or_else(|| Error::new(ErrorKind::Auth("getnonce reply missing nonce".into())))?;
    let key = cr::compute_key(nonce, username, password);

    let auth_reply = transport
        .run_command(
            auth_source,
            document! {
                "authenticate" => 1i32,
                "nonce" => nonce,
                "user" => username,
                "key" => key,
            },
        )
        .await?;
    if !command_ok(&auth_reply) {
        return Err(auth_failed(&auth_reply));
    }
    Ok(())
}

async fn authenticate_x509(transport: &mut dyn CommandTransport, subject_dn: &str) -> Result<()> {
    let reply = transport.run_command(x509::EXTERNAL_DATABASE, x509::authenticate_command(subject_dn)).await?;
    if !command_ok(&reply) {
        return Err(auth_failed(&reply));
    }
    Ok(())
}
