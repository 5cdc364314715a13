#![forbid(unsafe_code)]

//! Prints a watch-relay access token for a content identifier.

use anyhow::{Result, bail};
use cinerelay::token::{AccessToken, Clock, SystemClock};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about = "Mint an access token for the watch relay.")]
struct Cli {
    #[arg(value_name = "ID", help = "Upstream content identifier, e.g. tt0111161")]
    identifier: String,
    #[arg(
        long = "issued-at",
        value_name = "EPOCH_MS",
        help = "Issue time in epoch milliseconds (default: now)"
    )]
    issued_at: Option<i64>,
    #[arg(long = "url", help = "Print the /watch path instead of the bare token")]
    url: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.identifier.is_empty() || cli.identifier.contains('-') {
        bail!("identifier must be non-empty and must not contain '-'");
    }

    let issued_at = cli.issued_at.unwrap_or_else(|| SystemClock.now_ms());
    let token = AccessToken::new(cli.identifier, issued_at).encode();

    if cli.url {
        println!("/watch?token={}", encode_query_value(&token));
    } else {
        println!("{token}");
    }
    Ok(())
}

/// Percent-encodes the characters of standard base64 that are significant in
/// a query string.
fn encode_query_value(value: &str) -> String {
    value
        .replace('+', "%2B")
        .replace('/', "%2F")
        .replace('=', "%3D")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_encoding_escapes_base64_symbols() {
        assert_eq!(encode_query_value("a+b/c=="), "a%2Bb%2Fc%3D%3D");
    }

    #[test]
    fn cli_parses_issued_at() {
        let cli =
            Cli::try_parse_from(["mint_token", "tt01", "--issued-at", "42", "--url"]).unwrap();
        assert_eq!(cli.identifier, "tt01");
        assert_eq!(cli.issued_at, Some(42));
        assert!(cli.url);
    }
}
