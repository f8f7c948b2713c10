use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use base64::Engine;
use futures::StreamExt;
use reqwest::{Client, Method, StatusCode, Url};
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::delivery::event::{Envelope, EventSender, TransportEvent};
use crate::loader::config::LoaderConfig;
use crate::loader::resource_loader::{MetadataSource, ResourceLoader};
use crate::loader::upload::upload_body;
use crate::types::net_error;
use crate::types::types::{
    CompletionInfo, LoadError, LoadTiming, RedirectInfo, RequestId, RequestInfo, ResponseInfo,
};

/// `ResourceLoader` over HTTP(S) with reqwest.
///
/// Redirects are handled here rather than by the client so that every hop
/// can be put to the peer. Bodies whose declared length fits within
/// `combine_threshold` are read whole and delivered through the combined
/// notification; everything else streams chunk by chunk, or into a file when
/// the request asks for download-to-file.
pub struct HttpLoader {
    client: Client,
    config: LoaderConfig,
    metadata: Option<Arc<dyn MetadataSource>>,
}

impl HttpLoader {
    pub fn new(config: LoaderConfig) -> Result<Self, LoadError> {
        let mut builder = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(config.connect_timeout)
            .tcp_nodelay(true);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        Ok(Self {
            client: builder.build()?,
            config,
            metadata: None,
        })
    }

    pub fn with_metadata_source(mut self, source: Arc<dyn MetadataSource>) -> Self {
        self.metadata = Some(source);
        self
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Issues the request and walks redirects. `None` means a terminal event
    /// has already been emitted and there is no response to deliver.
    async fn follow_redirects(
        &self,
        emit: &Emitter,
        request: &RequestInfo,
        request_start: SystemTime,
    ) -> Result<Option<reqwest::Response>, LoadError> {
        let mut url = match Url::parse(&request.url) {
            Ok(url) => url,
            Err(e) => {
                log::warn!("[http_loader] {}: invalid url {:?}: {}", emit.id, request.url, e);
                emit.fail(net_error::ERR_INVALID_URL, 0).await?;
                return Ok(None);
            }
        };
        let mut method = match Method::from_bytes(request.method.as_bytes()) {
            Ok(method) => method,
            Err(_) => {
                log::warn!("[http_loader] {}: invalid method {:?}", emit.id, request.method);
                emit.fail(net_error::ERR_INVALID_ARGUMENT, 0).await?;
                return Ok(None);
            }
        };
        let auth_header = precompute_auth(request);
        let mut body = request.body.clone();
        // Only the first transmission reports upload progress; a re-sent body
        // would restart the position at zero.
        let mut report_upload = request.report_upload_progress;
        // Credentials stay with the origin they were given for.
        let mut send_credentials = true;
        let mut hops = 0usize;

        loop {
            let builder = self.client.request(method.clone(), url.clone());
            let mut builder = apply_headers(
                builder,
                request,
                auth_header.as_deref().filter(|_| send_credentials),
                send_credentials,
            );
            if let Some(bytes) = &body {
                let ticks = report_upload.then(|| emit.events.clone());
                builder = builder.body(upload_body(
                    emit.id,
                    bytes.clone(),
                    self.config.upload_slice,
                    ticks,
                ));
            }
            report_upload = false;

            log::info!("[http_loader] {}: {} {}", emit.id, method, url);
            let sent = tokio::select! {
                biased;
                _ = emit.cancel.cancelled() => return Err(LoadError::Cancelled),
                sent = builder.send() => sent,
            };
            let response = match sent {
                Ok(response) => response,
                Err(e) => {
                    log::warn!("[http_loader] {}: request failed: {}", emit.id, e);
                    emit.fail(net_error::from_reqwest(&e), 0).await?;
                    return Ok(None);
                }
            };

            let status = response.status();
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let location = match location {
                Some(location) if status.is_redirection() => location,
                _ => return Ok(Some(response)),
            };

            let next = match url.join(&location) {
                Ok(next) => next,
                Err(e) => {
                    log::warn!("[http_loader] {}: bad Location {:?}: {}", emit.id, location, e);
                    emit.fail(net_error::ERR_INVALID_URL, 0).await?;
                    return Ok(None);
                }
            };
            if !matches!(next.scheme(), "http" | "https") {
                emit.fail(net_error::ERR_UNSAFE_REDIRECT, 0).await?;
                return Ok(None);
            }
            hops += 1;
            if hops > self.config.max_redirects {
                log::warn!(
                    "[http_loader] {}: more than {} redirects",
                    emit.id,
                    self.config.max_redirects
                );
                emit.fail(net_error::ERR_TOO_MANY_REDIRECTS, 0).await?;
                return Ok(None);
            }

            let next_method = redirect_method(status, &method);
            if next_method != method {
                body = None;
            }
            let redirect = RedirectInfo {
                new_url: next.to_string(),
                new_method: next_method.to_string(),
                status_code: status.as_u16(),
            };
            let info = response_info(&response, request_start);
            drop(response);

            let (reply, decision) = oneshot::channel();
            emit.send(TransportEvent::Redirect { redirect, info, reply }).await?;
            let follow = tokio::select! {
                _ = emit.cancel.cancelled() => return Err(LoadError::Cancelled),
                decision = decision => decision.unwrap_or(false),
            };
            if !follow {
                log::info!("[http_loader] {}: redirect to {} suppressed", emit.id, next);
                emit.fail(net_error::ERR_ABORTED, 0).await?;
                return Ok(None);
            }

            if send_credentials && next.origin() != url.origin() {
                log::debug!(
                    "[http_loader] {}: dropping credentials for {}",
                    emit.id,
                    next.origin().ascii_serialization()
                );
                send_credentials = false;
            }
            url = next;
            method = next_method;
        }
    }

    /// Reads the whole body and delivers it with the response and completion
    /// in one notification.
    async fn deliver_combined(
        &self,
        emit: &Emitter,
        info: ResponseInfo,
        response: reqwest::Response,
    ) -> Result<(), LoadError> {
        let body = tokio::select! {
            _ = emit.cancel.cancelled() => return Err(LoadError::Cancelled),
            body = response.bytes() => body,
        };
        match body {
            Ok(bytes) => {
                let total = bytes.len() as u64;
                let payload = (!bytes.is_empty()).then_some(bytes);
                emit.send(TransportEvent::CompletedResponse {
                    info,
                    payload,
                    completion: CompletionInfo::success(total),
                })
                .await
            }
            Err(e) => {
                log::warn!("[http_loader] {}: body read failed: {}", emit.id, e);
                emit.send(TransportEvent::Response(info)).await?;
                emit.fail(net_error::from_reqwest(&e), 0).await
            }
        }
    }

    async fn stream_chunks(
        &self,
        emit: &Emitter,
        response: reqwest::Response,
    ) -> Result<(), LoadError> {
        let mut stream = response.bytes_stream();
        let mut total: u64 = 0;

        loop {
            let next = tokio::select! {
                _ = emit.cancel.cancelled() => return Err(LoadError::Cancelled),
                next = stream.next() => next,
            };
            match next {
                Some(Ok(chunk)) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    let len = chunk.len() as u64;
                    total += len;
                    emit.send(TransportEvent::Data {
                        payload: chunk,
                        encoded_len: len,
                    })
                    .await?;
                }
                Some(Err(e)) => {
                    log::warn!("[http_loader] {}: stream error after {} bytes: {}", emit.id, total, e);
                    return emit.fail(net_error::from_reqwest(&e), total).await;
                }
                None => break,
            }
        }

        log::debug!("[http_loader] {}: streamed {} bytes", emit.id, total);
        emit.send(TransportEvent::Completed(CompletionInfo::success(total)))
            .await
    }

    /// Writes the body to a temporary `.part` file next to `path` and renames
    /// it into place once the body is complete. The peer hears byte counts.
    async fn stream_to_file(
        &self,
        emit: &Emitter,
        response: reqwest::Response,
        path: &Path,
    ) -> Result<(), LoadError> {
        let part = part_path(path);
        let file = match tokio::fs::File::create(&part).await {
            Ok(file) => file,
            Err(e) => {
                log::error!("[http_loader] {}: cannot create {}: {}", emit.id, part.display(), e);
                return emit.fail(net_error::from_io(&e), 0).await;
            }
        };
        let mut writer = tokio::io::BufWriter::with_capacity(self.config.write_buffer, file);
        let mut stream = response.bytes_stream();
        let mut total: u64 = 0;

        let outcome: Result<(), i32> = loop {
            let next = tokio::select! {
                _ = emit.cancel.cancelled() => None,
                next = stream.next() => Some(next),
            };
            let Some(next) = next else {
                drop(writer);
                discard(&part).await;
                return Err(LoadError::Cancelled);
            };

            match next {
                Some(Ok(chunk)) => {
                    if let Err(e) = writer.write_all(&chunk).await {
                        break Err(net_error::from_io(&e));
                    }
                    let len = chunk.len() as u64;
                    total += len;
                    if let Err(e) = emit
                        .send(TransportEvent::DownloadedData {
                            len,
                            encoded_len: len,
                        })
                        .await
                    {
                        drop(writer);
                        discard(&part).await;
                        return Err(e);
                    }
                }
                Some(Err(e)) => break Err(net_error::from_reqwest(&e)),
                None => break writer.flush().await.map_err(|e| net_error::from_io(&e)),
            }
        };
        drop(writer);

        let outcome = match outcome {
            Ok(()) => tokio::fs::rename(&part, path)
                .await
                .map_err(|e| net_error::from_io(&e)),
            Err(code) => Err(code),
        };

        match outcome {
            Ok(()) => {
                log::info!(
                    "[http_loader] {}: wrote {} bytes to {}",
                    emit.id,
                    total,
                    path.display()
                );
                emit.send(TransportEvent::Completed(CompletionInfo::success(total)))
                    .await
            }
            Err(code) => {
                log::warn!(
                    "[http_loader] {}: download to {} failed with {}",
                    emit.id,
                    path.display(),
                    net_error::name(code)
                );
                discard(&part).await;
                emit.fail(code, total).await
            }
        }
    }
}

#[async_trait]
impl ResourceLoader for HttpLoader {
    async fn load(
        &self,
        id: RequestId,
        request: RequestInfo,
        events: EventSender,
        cancel: CancellationToken,
    ) -> Result<(), LoadError> {
        let emit = Emitter { id, events, cancel };
        let request_start = SystemTime::now();

        if let Some(source) = &self.metadata {
            if let Some(blob) = source.lookup(&request.url) {
                emit.send(TransportEvent::CachedMetadata(blob)).await?;
            }
        }

        let Some(response) = self.follow_redirects(&emit, &request, request_start).await? else {
            return Ok(());
        };
        let info = response_info(&response, request_start);

        let combine = request.download_to_file.is_none()
            && self.config.combine_threshold > 0
            && info
                .content_length
                .is_some_and(|len| len <= self.config.combine_threshold);
        if combine {
            return self.deliver_combined(&emit, info, response).await;
        }

        emit.send(TransportEvent::Response(info)).await?;
        match &request.download_to_file {
            Some(path) => self.stream_to_file(&emit, response, path).await,
            None => self.stream_chunks(&emit, response).await,
        }
    }
}

/// Event sink for one load, aware of cancellation.
struct Emitter {
    id: RequestId,
    events: EventSender,
    cancel: CancellationToken,
}

impl Emitter {
    async fn send(&self, event: TransportEvent) -> Result<(), LoadError> {
        let envelope = Envelope { id: self.id, event };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(LoadError::Cancelled),
            sent = self.events.send(envelope) => sent.map_err(|_| LoadError::ChannelClosed),
        }
    }

    async fn fail(&self, error_code: i32, total_transfer_size: u64) -> Result<(), LoadError> {
        self.send(TransportEvent::Completed(CompletionInfo::with_error(
            error_code,
            total_transfer_size,
        )))
        .await
    }
}

/// Applies custom headers, cookies and credentials to a request builder.
/// Without `send_credentials`, `Authorization` and `Cookie` are left out,
/// including copies of them among the custom headers.
fn apply_headers(
    mut builder: reqwest::RequestBuilder,
    request: &RequestInfo,
    precomputed_auth: Option<&str>,
    send_credentials: bool,
) -> reqwest::RequestBuilder {
    for (key, values) in &request.headers {
        if !send_credentials && is_credential_header(key) {
            continue;
        }
        for value in values {
            builder = builder.header(key.as_str(), value.as_str());
        }
    }
    if let Some(cookies) = request.cookies.as_ref().filter(|_| send_credentials) {
        builder = builder.header(reqwest::header::COOKIE, cookies.as_str());
    }
    if let Some(auth_value) = precomputed_auth {
        builder = builder.header(reqwest::header::AUTHORIZATION, auth_value);
    }
    builder
}

fn is_credential_header(name: &str) -> bool {
    name.eq_ignore_ascii_case("authorization")
        || name.eq_ignore_ascii_case("cookie")
        || name.eq_ignore_ascii_case("proxy-authorization")
}

/// Basic auth header value, computed once per load rather than per hop.
fn precompute_auth(request: &RequestInfo) -> Option<String> {
    request.authentication.as_ref().map(|auth| {
        let credentials = format!("{}:{}", auth.username, auth.password);
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
        format!("Basic {}", encoded)
    })
}

/// 303 always becomes GET (HEAD stays HEAD); 301 and 302 turn POST into GET.
fn redirect_method(status: StatusCode, method: &Method) -> Method {
    match status.as_u16() {
        303 if *method != Method::HEAD => Method::GET,
        301 | 302 if *method == Method::POST => Method::GET,
        _ => method.clone(),
    }
}

fn response_info(response: &reqwest::Response, request_start: SystemTime) -> ResponseInfo {
    let mut headers: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in response.headers() {
        headers
            .entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }

    let status = response.status();
    ResponseInfo::new(
        response.url().as_str(),
        status.as_u16(),
        headers,
        LoadTiming {
            request_start,
            response_start: SystemTime::now(),
        },
    )
    .with_status_text(status.canonical_reason().unwrap_or(""))
    .with_http_version(format!("{:?}", response.version()))
    .with_remote_addr(response.remote_addr())
}

fn part_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    path.with_file_name(format!(".{}.{}.part", name, Uuid::new_v4()))
}

async fn discard(part: &Path) {
    if let Err(e) = tokio::fs::remove_file(part).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("[http_loader] could not remove {}: {}", part.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn see_other_switches_to_get() {
        assert_eq!(redirect_method(StatusCode::SEE_OTHER, &Method::POST), Method::GET);
        assert_eq!(redirect_method(StatusCode::SEE_OTHER, &Method::HEAD), Method::HEAD);
    }

    #[test]
    fn found_rewrites_only_post() {
        assert_eq!(redirect_method(StatusCode::FOUND, &Method::POST), Method::GET);
        assert_eq!(redirect_method(StatusCode::FOUND, &Method::PUT), Method::PUT);
    }

    #[test]
    fn temporary_redirect_keeps_method() {
        assert_eq!(
            redirect_method(StatusCode::TEMPORARY_REDIRECT, &Method::POST),
            Method::POST
        );
    }

    #[test]
    fn part_file_sits_next_to_target() {
        let part = part_path(Path::new("/tmp/out/file.bin"));
        assert_eq!(part.parent(), Some(Path::new("/tmp/out")));
        let name = part.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(".file.bin."));
        assert!(name.ends_with(".part"));
    }

    #[test]
    fn credential_headers_are_recognised_in_any_case() {
        assert!(is_credential_header("Authorization"));
        assert!(is_credential_header("COOKIE"));
        assert!(!is_credential_header("x-trace"));
    }

    #[test]
    fn basic_auth_is_encoded() {
        let request = RequestInfo::get("http://example.test/").with_authentication(
            crate::types::types::AuthenticationInfo {
                username: "user".to_string(),
                password: "pass".to_string(),
            },
        );
        assert_eq!(precompute_auth(&request).as_deref(), Some("Basic dXNlcjpwYXNz"));
    }
}
