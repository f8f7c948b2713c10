use std::io::Write;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use reqpeer_core::{
    format_bytes, net_error, CompletionInfo, DataChunk, RedirectInfo, RequestPeer, ResponseInfo,
};

/// Where a response body goes once it reaches the terminal peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodySink {
    Stdout,
    Discard,
}

/// Renders one request's notifications as indicatif bars.
///
/// Each peer owns an upload bar (created on the first progress tick) and a
/// body bar (created when the response arrives), both living under a shared
/// `MultiProgress`. Status lines go through the `MultiProgress` so they do
/// not tear the bars.
pub struct TerminalPeer {
    label: String,
    multi: MultiProgress,
    sink: BodySink,
    follow_redirects: bool,
    upload_bar: Option<ProgressBar>,
    body_bar: Option<ProgressBar>,
    body_bytes: u64,
}

impl TerminalPeer {
    pub fn new(label: impl Into<String>, multi: MultiProgress, sink: BodySink) -> Self {
        Self {
            label: label.into(),
            multi,
            sink,
            follow_redirects: true,
            upload_bar: None,
            body_bar: None,
            body_bytes: 0,
        }
    }

    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    fn status(&self, line: String) {
        if self.multi.println(line.clone()).is_err() {
            eprintln!("{}", line);
        }
    }

    fn bar(&self, len: Option<u64>, template: &str) -> ProgressBar {
        let pb = match len {
            Some(len) => ProgressBar::new(len.max(1)),
            None => ProgressBar::new_spinner(),
        };
        if let Ok(style) = ProgressStyle::with_template(template) {
            pb.set_style(style.progress_chars("=>-"));
        }
        pb.set_message(self.label.clone());
        self.multi.add(pb)
    }

    fn start_body(&mut self, info: &ResponseInfo) {
        self.status(format!(
            "{} {} {} {}",
            self.label,
            info.status,
            info.status_text,
            info.mime_type.as_deref().unwrap_or("-")
        ));
        let template = match info.content_length {
            Some(_) => "[{bar:30.green/white}] {bytes}/{total_bytes} ({binary_bytes_per_sec}) ETA {eta} {msg}",
            None => "{spinner} {bytes} ({binary_bytes_per_sec}) {msg}",
        };
        self.body_bar = Some(self.bar(info.content_length, template));
    }

    fn take_body(&mut self, data: &DataChunk) {
        self.body_bytes += data.len() as u64;
        if let Some(pb) = &self.body_bar {
            pb.inc(data.len() as u64);
        }
        if self.sink == BodySink::Stdout {
            let mut out = std::io::stdout().lock();
            if let Err(e) = out.write_all(data.payload()).and_then(|_| out.flush()) {
                log::warn!("[terminal] {}: could not write body: {}", self.label, e);
            }
        }
    }

    fn finish(&mut self, completion: &CompletionInfo) {
        if let Some(pb) = self.upload_bar.take() {
            pb.finish_and_clear();
        }
        let total = format_bytes(self.body_bytes.max(completion.total_transfer_size));
        match (self.body_bar.take(), completion.is_success()) {
            (Some(pb), true) => pb.finish_with_message(format!("{} done, {}", self.label, total)),
            (Some(pb), false) => pb.abandon_with_message(format!(
                "{} failed: {}",
                self.label,
                net_error::name(completion.error_code)
            )),
            (None, true) => self.status(format!("{} done, {}", self.label, total)),
            (None, false) => self.status(format!(
                "{} failed: {} ({})",
                self.label,
                net_error::name(completion.error_code),
                completion.error_code
            )),
        }
    }
}

impl RequestPeer for TerminalPeer {
    fn on_upload_progress(&mut self, position: u64, size: u64) {
        if self.upload_bar.is_none() {
            let pb = self.bar(
                Some(size),
                "up [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({binary_bytes_per_sec}) {msg}",
            );
            self.upload_bar = Some(pb);
        }
        if let Some(pb) = &self.upload_bar {
            pb.set_position(position);
        }
    }

    fn on_received_redirect(&mut self, redirect: &RedirectInfo, _info: &ResponseInfo) -> bool {
        let verdict = if self.follow_redirects { "" } else { " (not followed)" };
        self.status(format!(
            "{} {} -> {} {}{}",
            self.label, redirect.status_code, redirect.new_method, redirect.new_url, verdict
        ));
        self.follow_redirects
    }

    fn on_received_response(&mut self, info: &ResponseInfo) {
        self.start_body(info);
    }

    fn on_downloaded_data(&mut self, len: u64, _encoded_len: u64) {
        self.body_bytes += len;
        if let Some(pb) = &self.body_bar {
            pb.inc(len);
        }
    }

    fn on_received_data(&mut self, data: DataChunk) {
        self.take_body(&data);
    }

    fn on_received_cached_metadata(&mut self, data: &[u8]) {
        self.status(format!("{} cached metadata {}", self.label, format_bytes(data.len() as u64)));
    }

    fn on_completed_request(&mut self, completion: &CompletionInfo) {
        self.finish(completion);
    }

    fn on_received_completed_response(
        &mut self,
        info: &ResponseInfo,
        data: Option<DataChunk>,
        completion: &CompletionInfo,
    ) {
        self.start_body(info);
        if let Some(data) = &data {
            self.take_body(data);
        }
        self.finish(completion);
    }
}
