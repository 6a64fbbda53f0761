//! HTML pages served by the HTTP layer: the application shell and the
//! error overlay shown while the client target has no good build.

use std::path::Path;

use kiln_build::ReportedError;
use kiln_build::diagnostics::display_path;

/// Page that loads the client bundle from the `script` and `style` URLs.
pub fn html_shell(script: &str, style: Option<&str>) -> String {
    let stylesheet = style
        .map(|href| format!("    <link rel=\"stylesheet\" href=\"{}\">\n", html_escape(href)))
        .unwrap_or_default();
    format!(
        "<!DOCTYPE html>\n\
         <html lang=\"en\">\n\
         \x20 <head>\n\
         \x20   <meta charset=\"utf-8\">\n\
         \x20   <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         {stylesheet}\
         \x20 </head>\n\
         \x20 <body>\n\
         \x20   <div id=\"root\"></div>\n\
         \x20   <script type=\"module\" src=\"{}\"></script>\n\
         \x20 </body>\n\
         </html>\n",
        html_escape(script)
    )
}

/// Error page for a failed client build. With `live_reload` the page
/// listens on `events_path` and reloads after the next build.
pub fn error_overlay(report: Option<&ReportedError>, root: &Path, live_reload: Option<&str>) -> String {
    let (message, locations) = match report {
        Some(report) => (
            report.message.as_str(),
            report
                .locations
                .iter()
                .map(|location| {
                    format!(
                        "<li><code>{}:{}:{}</code></li>",
                        html_escape(&display_path(&location.path, root)),
                        location.line,
                        location.column
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        None => ("The client build has not produced any output yet.", String::new()),
    };
    let reload = live_reload
        .map(|events| {
            format!(
                "<script>new EventSource({}).addEventListener(\"rebuilt\", () => location.reload());</script>\n",
                js_string(events)
            )
        })
        .unwrap_or_default();

    format!(
        "<!DOCTYPE html>\n\
         <html lang=\"en\">\n\
         <head>\n\
         <meta charset=\"utf-8\">\n\
         <title>Build failed</title>\n\
         <style>\n\
         body {{ margin: 0; background: #1e1e1e; color: #f0f0f0; font-family: ui-monospace, monospace; }}\n\
         main {{ max-width: 960px; margin: 48px auto; padding: 24px; border-left: 4px solid #e5534b; }}\n\
         h1 {{ color: #e5534b; font-size: 20px; }}\n\
         pre {{ white-space: pre-wrap; line-height: 1.5; }}\n\
         </style>\n\
         </head>\n\
         <body>\n\
         <main>\n\
         <h1>Build failed</h1>\n\
         <pre>{}</pre>\n\
         <ul>\n{}\n</ul>\n\
         </main>\n\
         {}\
         </body>\n\
         </html>\n",
        html_escape(message),
        locations,
        reload
    )
}

/// Escape `& < > " '` for HTML text and attribute values.
pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

// JSON string literal, with `<` escaped so it cannot close the script tag.
fn js_string(s: &str) -> String {
    serde_json::to_string(s)
        .unwrap_or_else(|_| "\"\"".to_string())
        .replace('<', "\\u003c")
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_build::Location;

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("<script>alert('x')</script>"), "&lt;script&gt;alert(&#x27;x&#x27;)&lt;/script&gt;");
        assert_eq!(html_escape("a & \"b\""), "a &amp; &quot;b&quot;");
        assert_eq!(html_escape("plain"), "plain");
    }

    #[test]
    fn test_shell_references_bundle() {
        let html = html_shell("/assets/client/main-1a2b3c4d.js", Some("/assets/client/main-9f8e7d6c.css"));
        assert!(html.contains("<script type=\"module\" src=\"/assets/client/main-1a2b3c4d.js\"></script>"));
        assert!(html.contains("<link rel=\"stylesheet\" href=\"/assets/client/main-9f8e7d6c.css\">"));

        let html = html_shell("/assets/client/main.js", None);
        assert!(!html.contains("stylesheet"));
    }

    #[test]
    fn test_overlay_escapes_compiler_output() {
        let report = ReportedError {
            message: "Build 'client' failed: Unexpected token <div>".to_string(),
            locations: vec![Location::new("/app/src/main.tsx", 3, 14)],
        };
        let html = error_overlay(Some(&report), Path::new("/app"), Some("/__kiln/events"));
        assert!(html.contains("Unexpected token &lt;div&gt;"));
        assert!(html.contains("src/main.tsx:3:14"));
        assert!(html.contains("new EventSource(\"/__kiln/events\")"));
    }

    #[test]
    fn test_overlay_without_report() {
        let html = error_overlay(None, Path::new("/app"), None);
        assert!(html.contains("has not produced any output"));
        assert!(!html.contains("EventSource"));
    }
}
