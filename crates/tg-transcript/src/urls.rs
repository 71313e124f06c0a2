//! URL discovery for background jobs.
//!
//! A dev server rarely prints a clean URL, so output extraction is
//! supplemented by sniffing the command line for port-shaped arguments.

use std::sync::OnceLock;

use regex::Regex;

/// Keep at most this many URLs per job.
pub const MAX_URLS: usize = 3;

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s"'`<>\)\]]+"#).unwrap())
}

fn port_res() -> &'static [Regex; 4] {
    static RES: OnceLock<[Regex; 4]> = OnceLock::new();
    RES.get_or_init(|| {
        [
            Regex::new(r"localhost:(\d{2,5})").unwrap(),
            Regex::new(r"--port[= ](\d{2,5})").unwrap(),
            Regex::new(r"(?:^|\s)-p[= ](\d{2,5})").unwrap(),
            Regex::new(r"\.listen\((\d{2,5})").unwrap(),
        ]
    })
}

/// Extract literal URLs from free text, trimming trailing punctuation.
pub fn extract_urls(text: &str) -> Vec<String> {
    url_re()
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';']).to_string())
        .collect()
}

/// Guess URLs from port-shaped patterns in a command line.
pub fn sniff_command_urls(command: &str) -> Vec<String> {
    let mut out = Vec::new();
    for re in port_res() {
        for caps in re.captures_iter(command) {
            if let Some(port) = caps.get(1) {
                out.push(format!("http://localhost:{}", port.as_str()));
            }
        }
    }
    out
}

/// Combine output extraction with command sniffing. First
/// [`MAX_URLS`] unique URLs survive, output URLs first.
pub fn discover_urls(output: &str, command: Option<&str>) -> Vec<String> {
    let mut seen = Vec::new();
    for url in extract_urls(output)
        .into_iter()
        .chain(command.map(sniff_command_urls).unwrap_or_default())
    {
        if !seen.contains(&url) {
            seen.push(url);
            if seen.len() == MAX_URLS {
                break;
            }
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_and_trims() {
        let urls = extract_urls("ready at http://localhost:5173/, docs: https://vitejs.dev.");
        assert_eq!(urls, vec!["http://localhost:5173/", "https://vitejs.dev"]);
    }

    #[test]
    fn sniffs_port_flags() {
        assert_eq!(
            sniff_command_urls("next dev --port 4000"),
            vec!["http://localhost:4000"]
        );
        assert_eq!(
            sniff_command_urls("serve -p 8080 dist"),
            vec!["http://localhost:8080"]
        );
        assert_eq!(
            sniff_command_urls("node -e 'app.listen(3000)'"),
            vec!["http://localhost:3000"]
        );
        assert_eq!(
            sniff_command_urls("curl localhost:9999/health"),
            vec!["http://localhost:9999"]
        );
    }

    #[test]
    fn caps_at_three_unique() {
        let urls = discover_urls(
            "http://a.test http://b.test http://c.test http://d.test",
            Some("dev --port 5000"),
        );
        assert_eq!(urls.len(), MAX_URLS);
        assert_eq!(urls[0], "http://a.test");
    }

    #[test]
    fn dedupes_output_and_command() {
        let urls = discover_urls("listening on http://localhost:3000", Some("app.listen(3000)"));
        assert_eq!(urls, vec!["http://localhost:3000"]);
    }
}
