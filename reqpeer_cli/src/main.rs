use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use indicatif::{MultiProgress, ProgressDrawTarget};

use reqpeer_core::{
    AuthenticationInfo, HttpLoader, LoaderConfig, LoggingPeer, RequestInfo, RequestOutcome,
    ResourceFetcher,
};

mod terminal_peer;
use terminal_peer::{BodySink, TerminalPeer};

#[derive(Parser)]
#[command(name = "reqpeer", about = "Fetch URLs and watch their delivery notifications")]
struct Args {
    /// URLs to fetch, all concurrently
    #[arg(required = true)]
    urls: Vec<String>,

    /// Save bodies to disk. A file path for one URL, a directory for several.
    /// Without it a single body is written to stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Extra request header, `Name: value`. Repeatable.
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Request body; upload progress is reported while it is sent
    #[arg(short, long)]
    data: Option<String>,

    #[arg(long)]
    cookies: Option<String>,

    /// Basic credentials, `user:password`
    #[arg(short, long)]
    user: Option<String>,

    /// Report redirects but do not follow them
    #[arg(long)]
    no_redirect: bool,

    #[arg(long)]
    max_redirects: Option<usize>,

    /// Largest declared body delivered in a single notification; 0 disables
    #[arg(long)]
    combine_threshold: Option<u64>,

    /// Print the outcomes as JSON on stdout instead of the body
    #[arg(long)]
    json: bool,

    /// Hide progress bars and status lines
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let mut config = LoaderConfig::from_env();
    if let Some(max) = args.max_redirects {
        config = config.with_max_redirects(max);
    }
    if let Some(threshold) = args.combine_threshold {
        config = config.with_combine_threshold(threshold);
    }
    let channel_capacity = config.channel_capacity;

    let loader = match HttpLoader::new(config) {
        Ok(loader) => loader,
        Err(e) => {
            eprintln!("Cannot set up HTTP client: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let mut fetcher = ResourceFetcher::new(Arc::new(loader)).with_channel_capacity(channel_capacity);

    let multi = if args.quiet {
        MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
    } else {
        MultiProgress::new()
    };
    let sink = if args.urls.len() == 1 && args.output.is_none() && !args.json {
        BodySink::Stdout
    } else {
        BodySink::Discard
    };

    for url in &args.urls {
        let request = match build_request(&args, url) {
            Ok(request) => request,
            Err(message) => {
                eprintln!("{}", message);
                return ExitCode::from(2);
            }
        };
        let peer = TerminalPeer::new(url.clone(), multi.clone(), sink)
            .with_follow_redirects(!args.no_redirect);
        let id = fetcher.next_id();
        if let Err(e) = fetcher.add_request(request, LoggingPeer::new(id, peer)) {
            eprintln!("Cannot register {}: {}", url, e);
            return ExitCode::FAILURE;
        }
    }

    let shutdown = fetcher.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("[main] interrupted, cancelling requests");
            shutdown.cancel();
        }
    });

    let start = Instant::now();
    let outcomes = fetcher.run().await;
    let elapsed = start.elapsed();

    if args.json {
        match serde_json::to_string_pretty(&outcomes) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Cannot encode outcomes: {}", e),
        }
    }

    let failed = report(&outcomes);
    if !args.quiet {
        eprintln!(
            "{} of {} requests succeeded in {:.2}s",
            outcomes.len() - failed,
            outcomes.len(),
            elapsed.as_secs_f64()
        );
    }
    if failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn build_request(args: &Args, url: &str) -> Result<RequestInfo, String> {
    let mut request = RequestInfo::get(url).with_method(args.method.to_uppercase());

    for raw in &args.headers {
        let (name, value) = raw
            .split_once(':')
            .ok_or_else(|| format!("Malformed header {:?}, expected `Name: value`", raw))?;
        request = request.add_header(name.trim(), value.trim());
    }
    if let Some(cookies) = &args.cookies {
        request = request.with_cookies(cookies.clone());
    }
    if let Some(user) = &args.user {
        let (username, password) = user.split_once(':').unwrap_or((user.as_str(), ""));
        request = request.with_authentication(AuthenticationInfo {
            username: username.to_string(),
            password: password.to_string(),
        });
    }
    if let Some(data) = &args.data {
        request = request.with_body(data.clone().into_bytes(), true);
    }
    if let Some(output) = &args.output {
        let target = if args.urls.len() == 1 {
            output.clone()
        } else {
            output.join(file_name_for(url))
        };
        request = request.with_download_to_file(target);
    }

    Ok(request)
}

/// Last non-empty path segment of `url`, without query or fragment.
fn file_name_for(url: &str) -> PathBuf {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let path = without_query
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(without_query);
    let name = path
        .split_once('/')
        .map(|(_, p)| p)
        .unwrap_or("")
        .rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or("index.html");
    Path::new(name)
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("index.html"))
}

/// Prints one line per failed request; returns how many failed.
fn report(outcomes: &[RequestOutcome]) -> usize {
    let mut failed = 0;
    for outcome in outcomes {
        if let Err(e) = outcome.result() {
            failed += 1;
            eprintln!("{} failed: {}", outcome.id, e);
        }
    }
    failed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_uses_last_segment() {
        assert_eq!(file_name_for("http://h/a/b/c.tar.gz?x=1"), PathBuf::from("c.tar.gz"));
        assert_eq!(file_name_for("https://h/dir/"), PathBuf::from("dir"));
    }

    #[test]
    fn file_name_falls_back_for_bare_host() {
        assert_eq!(file_name_for("http://example.test"), PathBuf::from("index.html"));
        assert_eq!(file_name_for("http://example.test/"), PathBuf::from("index.html"));
        assert_eq!(file_name_for("http://example.test/.."), PathBuf::from("index.html"));
    }

    #[test]
    fn headers_are_split_on_first_colon() {
        let args = Args::parse_from(["reqpeer", "-H", "X-Time: 10:30", "http://h/"]);
        let request = build_request(&args, "http://h/").unwrap();
        assert_eq!(request.headers.get("X-Time"), Some(&vec!["10:30".to_string()]));
    }

    #[test]
    fn malformed_header_is_rejected() {
        let args = Args::parse_from(["reqpeer", "-H", "nocolon", "http://h/"]);
        assert!(build_request(&args, "http://h/").is_err());
    }

    #[test]
    fn multiple_urls_save_into_directory() {
        let args = Args::parse_from(["reqpeer", "-o", "out", "http://h/a.txt", "http://h/b.txt"]);
        let request = build_request(&args, "http://h/b.txt").unwrap();
        assert_eq!(request.download_to_file, Some(PathBuf::from("out/b.txt")));
    }
}
