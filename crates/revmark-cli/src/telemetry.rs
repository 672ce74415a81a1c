//! Log output for the CLI.
//!
//! `RUST_LOG` wins when set; otherwise the level comes from the number of
//! `-v` flags (warn, info, debug, trace). Everything goes to stderr so that
//! documents and JSON written to stdout stay clean.

use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::EnvFilter;

fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "revmark=info,revmark_core=info",
        2 => "revmark=debug,revmark_core=debug",
        _ => "revmark=trace,revmark_core=trace",
    }
}

pub fn init(verbosity: u8, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));
    let registry = tracing_subscriber::registry().with(filter);

    let result = if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .try_init()
    };
    if let Err(e) = result {
        eprintln!("warning: logging already initialized: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_raises_the_level() {
        assert_eq!(default_directive(0), "warn");
        assert!(default_directive(2).contains("revmark_core=debug"));
        assert_eq!(default_directive(3), default_directive(9));
    }
}
