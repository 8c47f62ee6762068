//! Interactive OAuth2 consent.
//!
//! [`LoopbackConsent`] runs the desktop "installed app" flow: it prints the
//! consent URL, waits for the browser redirect on a one-shot localhost
//! listener, and exchanges the authorization code (with PKCE) for an access
//! token.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use reqwest::Url;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};
use uuid::Uuid;

use super::error::CloudError;
use crate::config::CloudConfig;

type Result<T> = std::result::Result<T, CloudError>;

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
/// Access to files created by this app only.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";
const VERIFIER_LEN: usize = 64;
const MAX_REQUEST_BYTES: usize = 8 * 1024;
const CONSENT_TIMEOUT_SECS: u64 = 300;

#[async_trait]
pub trait ConsentFlow: Send + Sync {
    /// Runs the consent flow and returns a fresh access token.
    async fn authorize(&self, config: &CloudConfig) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
}

pub struct LoopbackConsent {
    client: reqwest::Client,
}

impl LoopbackConsent {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }

    // Accepts connections until one carries the consent outcome. Browsers
    // may open idle preconnect sockets or ask for a favicon first.
    async fn wait_for_redirect(&self, listener: TcpListener) -> Result<RedirectParams> {
        loop {
            let (mut stream, peer) = listener.accept().await?;
            let buffer = match read_request(&mut stream).await {
                Ok(buffer) => buffer,
                Err(e) => {
                    debug!("Dropping loopback connection from {}: {}", peer, e);
                    continue;
                }
            };

            let request = String::from_utf8_lossy(&buffer);
            let Some(params) = parse_redirect_request(&request).filter(RedirectParams::is_final)
            else {
                if !buffer.is_empty() {
                    debug!("Ignoring non-consent request from {}", peer);
                    let _ = respond(&mut stream, "404 Not Found", "").await;
                }
                continue;
            };

            debug!("Consent redirect received from {}", peer);
            let page = match params.error {
                None => "Signed in to CueClub cloud backup. You can close this window.",
                Some(_) => "Cloud backup sign-in failed. Return to CueClub and try again.",
            };
            respond(&mut stream, "200 OK", page).await?;
            return Ok(params);
        }
    }

    async fn exchange_code(
        &self,
        config: &CloudConfig,
        client_id: &str,
        code: &str,
        verifier: &str,
        redirect_uri: &str,
    ) -> Result<String> {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", client_id),
            ("redirect_uri", redirect_uri),
            ("code_verifier", verifier),
        ];
        if let Some(secret) = config.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        let response = self.client.post(TOKEN_URL).form(&form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<TokenErrorResponse>(&body)
                .ok()
                .and_then(|err| err.error_description.or(err.error))
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(CloudError::auth(format!("Token exchange failed: {}", message)));
        }
        let token: TokenResponse = serde_json::from_str(&body)?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl ConsentFlow for LoopbackConsent {
    async fn authorize(&self, config: &CloudConfig) -> Result<String> {
        let client_id = config
            .client_id
            .as_deref()
            .ok_or_else(|| CloudError::NotConfigured("missing Google client ID".to_string()))?;

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let redirect_uri = format!("http://127.0.0.1:{}", listener.local_addr()?.port());
        let verifier = pkce_verifier();
        let state = Uuid::new_v4().to_string();
        let url = consent_url(client_id, &redirect_uri, &pkce_challenge(&verifier), &state)?;

        info!("Waiting for cloud backup consent on {}", redirect_uri);
        eprintln!("Open this URL in your browser to sign in:\n\n  {}\n", url);

        let params = tokio::time::timeout(
            Duration::from_secs(CONSENT_TIMEOUT_SECS),
            self.wait_for_redirect(listener),
        )
        .await
        .map_err(|_| CloudError::auth("Timed out waiting for consent"))??;

        if let Some(error) = params.error {
            return Err(CloudError::auth(format!("Consent denied: {}", error)));
        }
        if params.state.as_deref() != Some(state.as_str()) {
            return Err(CloudError::auth("Consent response state mismatch"));
        }
        let code = params
            .code
            .ok_or_else(|| CloudError::auth("Consent response carried no authorization code"))?;
        self.exchange_code(config, client_id, &code, &verifier, &redirect_uri)
            .await
    }
}

#[derive(Debug, PartialEq)]
struct RedirectParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

impl RedirectParams {
    fn is_final(&self) -> bool {
        self.code.is_some() || self.error.is_some()
    }
}

async fn read_request(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
        if buffer.windows(4).any(|w| w == b"\r\n\r\n") || buffer.len() >= MAX_REQUEST_BYTES {
            break;
        }
    }
    Ok(buffer)
}

async fn respond(stream: &mut TcpStream, status: &str, page: &str) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        page.len(),
        page
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

fn consent_url(client_id: &str, redirect_uri: &str, challenge: &str, state: &str) -> Result<Url> {
    Url::parse_with_params(
        AUTH_URL,
        &[
            ("client_id", client_id),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", DRIVE_SCOPE),
            ("code_challenge", challenge),
            ("code_challenge_method", "S256"),
            ("state", state),
            ("prompt", "consent"),
        ],
    )
    .map_err(|e| CloudError::auth(format!("Invalid consent URL: {}", e)))
}

/// `None` when the request line is missing or unparsable.
fn parse_redirect_request(request: &str) -> Option<RedirectParams> {
    let target = request.lines().next()?.split_whitespace().nth(1)?;
    let url = Url::parse(&format!("http://127.0.0.1{}", target)).ok()?;

    let mut params = RedirectParams {
        code: None,
        state: None,
        error: None,
    };
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => params.code = Some(value.into_owned()),
            "state" => params.state = Some(value.into_owned()),
            "error" => params.error = Some(value.into_owned()),
            _ => {}
        }
    }
    Some(params)
}

fn pkce_verifier() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(VERIFIER_LEN)
        .map(char::from)
        .collect()
}

fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_matches_rfc7636_example() {
        assert_eq!(
            pkce_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn verifier_has_allowed_length() {
        let verifier = pkce_verifier();
        assert_eq!(verifier.len(), VERIFIER_LEN);
        assert!(verifier.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn redirect_with_code() {
        let request = "GET /?state=abc&code=4%2F0Ax&scope=drive.file HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n";
        let params = parse_redirect_request(request).unwrap();
        assert_eq!(params.code.as_deref(), Some("4/0Ax"));
        assert_eq!(params.state.as_deref(), Some("abc"));
    }

    #[test]
    fn redirect_with_error() {
        let request = "GET /?error=access_denied&state=abc HTTP/1.1\r\n\r\n";
        let params = parse_redirect_request(request).unwrap();
        assert!(params.is_final());
        assert_eq!(params.error.as_deref(), Some("access_denied"));
    }

    #[test]
    fn favicon_and_empty_requests_are_not_final() {
        let favicon = parse_redirect_request("GET /favicon.ico HTTP/1.1\r\n\r\n").unwrap();
        assert!(!favicon.is_final());
        assert!(parse_redirect_request("").is_none());
    }

    #[tokio::test]
    async fn idle_preconnect_does_not_end_the_wait() {
        let consent = LoopbackConsent::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let browser = tokio::spawn(async move {
            drop(TcpStream::connect(addr).await.unwrap());

            let mut favicon = TcpStream::connect(addr).await.unwrap();
            favicon
                .write_all(b"GET /favicon.ico HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n")
                .await
                .unwrap();
            let mut ignored = Vec::new();
            favicon.read_to_end(&mut ignored).await.unwrap();

            let mut redirect = TcpStream::connect(addr).await.unwrap();
            redirect
                .write_all(b"GET /?state=st&code=4%2F0Ax HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n")
                .await
                .unwrap();
            let mut reply = Vec::new();
            redirect.read_to_end(&mut reply).await.unwrap();
            (String::from_utf8(ignored).unwrap(), String::from_utf8(reply).unwrap())
        });

        let params = consent.wait_for_redirect(listener).await.unwrap();
        assert_eq!(params.code.as_deref(), Some("4/0Ax"));
        assert_eq!(params.state.as_deref(), Some("st"));

        let (ignored, reply) = browser.await.unwrap();
        assert!(ignored.starts_with("HTTP/1.1 404"));
        assert!(reply.starts_with("HTTP/1.1 200 OK"));
    }

    #[test]
    fn consent_url_carries_pkce() {
        let url = consent_url("client-1", "http://127.0.0.1:5000", "chal", "st").unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("code_challenge_method".into(), "S256".into())));
        assert!(pairs.contains(&("scope".into(), DRIVE_SCOPE.into())));
        assert!(pairs.contains(&("redirect_uri".into(), "http://127.0.0.1:5000".into())));
    }

    #[tokio::test]
    async fn missing_client_id_is_not_configured() {
        let consent = LoopbackConsent::new().unwrap();
        let err = consent.authorize(&CloudConfig::default()).await.unwrap_err();
        assert!(matches!(err, CloudError::NotConfigured(_)));
    }
}
