//! HTML pages

use fire_watch_common::Thresholds;

/// User-facing message for a `/demo?error=` code
#[must_use]
pub fn error_message(code: &str) -> Option<&'static str> {
    Some(match code {
        "no_file" => "No file part.",
        "empty_filename" => "No selected file.",
        "unsupported_format" => "Unsupported format. Upload an MP4, MOV, AVI or MKV file.",
        "no_video" => "No video to process.",
        "processing_error" => "Processing error.",
        "upload_failed" => "The upload could not be saved.",
        _ => return None,
    })
}

/// Escape text for HTML element content and attribute values
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

const STYLE: &str = r"
body { font-family: system-ui, sans-serif; margin: 0; background: #111; color: #eee; }
header { background: #b22222; padding: 1rem 2rem; }
header a { color: #fff; margin-right: 1.5rem; text-decoration: none; font-weight: 600; }
main { max-width: 960px; margin: 2rem auto; padding: 0 1rem; }
.error { background: #5a1a1a; border-left: 4px solid #f44; padding: .75rem 1rem; }
.alert { display: none; background: #f44; color: #fff; padding: .75rem 1rem; font-weight: 700; }
.alert.visible { display: block; }
img.feed, video { width: 100%; border: 1px solid #333; }
.button { display: inline-block; background: #b22222; color: #fff; padding: .6rem 1.2rem; text-decoration: none; border: 0; cursor: pointer; }
";

/// Polls the alert endpoint and toggles the `#alert` banner
const ALERT_SCRIPT: &str = r"
<script>
async function pollAlert() {
  try {
    const res = await fetch('/check_high_confidence');
    const data = await res.json();
    const banner = document.getElementById('alert');
    if (data.high_confidence) {
      banner.textContent = 'High confidence fire detected (' + Math.round(data.score * 100) + '%)';
      banner.classList.add('visible');
    } else {
      banner.classList.remove('visible');
    }
  } catch (e) {}
}
setInterval(pollAlert, 1000);
</script>
";

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title} | Fire Watch</title>
<style>{STYLE}</style>
</head>
<body>
<header><a href="/">Fire Watch</a><a href="/demo">Demo</a><a href="/live">Live</a></header>
<main>
{body}
</main>
</body>
</html>
"#,
        title = escape_html(title),
    )
}

#[must_use]
pub fn index_page(thresholds: Thresholds) -> String {
    layout(
        "Home",
        &format!(
            r#"<h1>Video fire detection</h1>
<p>Upload a recording or watch a live camera. Every frame is checked for fire;
detections above {draw}% are boxed and detections above {alert}% raise an alert.</p>
<p><a class="button" href="/demo">Try a video</a> <a class="button" href="/live">Live feed</a></p>"#,
            draw = (thresholds.draw * 100.0) as u32,
            alert = thresholds.alert_percent(),
        ),
    )
}

#[must_use]
pub fn demo_page(error: Option<&str>) -> String {
    let notice = error
        .and_then(error_message)
        .map(|message| format!(r#"<p class="error">{}</p>"#, escape_html(message)))
        .unwrap_or_default();
    layout(
        "Demo",
        &format!(
            r#"<h1>Analyse a video</h1>
{notice}
<form action="/upload" method="post" enctype="multipart/form-data">
<p><input type="file" name="video" accept=".mp4,.mov,.avi,.mkv"></p>
<p><button class="button" type="submit">Upload and process</button></p>
</form>"#
        ),
    )
}

#[must_use]
pub fn processing_page(original_filename: &str, output_filename: &str) -> String {
    layout(
        "Processing",
        &format!(
            r#"<h1>Processing {original}</h1>
<div id="alert" class="alert"></div>
<img class="feed" src="/process_stream" alt="Annotated preview">
<p id="status">Writing {output}...</p>
<p><a class="button" href="/finish_processing">Finish</a></p>
<script>
async function pollStatus() {{
  try {{
    const res = await fetch('/process_status');
    if (!res.ok) return;
    const data = await res.json();
    const status = document.getElementById('status');
    if (data.state === 'completed') {{
      status.textContent = 'Saved ' + data.frames_written + ' frames.';
    }} else if (data.state === 'failed') {{
      status.textContent = 'Writing failed: ' + data.error;
    }}
  }} catch (e) {{}}
}}
setInterval(pollStatus, 2000);
</script>
{ALERT_SCRIPT}"#,
            original = escape_html(original_filename),
            output = escape_html(output_filename),
        ),
    )
}

#[must_use]
pub fn result_page(video_file: &str, message: &str, timestamp: &str) -> String {
    let file = escape_html(video_file);
    layout(
        "Result",
        &format!(
            r#"<h1>Processing complete</h1>
<p>{message}</p>
<video controls src="/outputs/{file}"></video>
<p><a class="button" href="/outputs/{file}" download>Download</a> <a class="button" href="/demo">Analyse another</a></p>
<p><small>Finished {timestamp}</small></p>"#,
            message = escape_html(message),
            timestamp = escape_html(timestamp),
        ),
    )
}

#[must_use]
pub fn live_page() -> String {
    layout(
        "Live",
        &format!(
            r#"<h1>Live feed</h1>
<div id="alert" class="alert"></div>
<img class="feed" src="/live_feed" alt="Live annotated feed">
{ALERT_SCRIPT}"#
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(error_message("no_file"), Some("No file part."));
        assert_eq!(error_message("no_video"), Some("No video to process."));
        assert_eq!(error_message("bogus"), None);
    }

    #[test]
    fn test_demo_page_shows_known_errors_only() {
        assert!(demo_page(Some("empty_filename")).contains("No selected file."));
        assert!(!demo_page(Some("<script>")).contains("class=\"error\""));
        assert!(!demo_page(None).contains("class=\"error\""));
    }

    #[test]
    fn test_filenames_are_escaped() {
        let page = processing_page("<b>fire</b>.mp4", "processed_x.mp4");
        assert!(page.contains("&lt;b&gt;fire&lt;/b&gt;.mp4"));
        assert!(!page.contains("<b>fire"));
    }

    #[test]
    fn test_result_page() {
        let page = result_page(
            "processed_x.mp4",
            "Processed 10 frames (0.4 seconds)",
            "2024-01-01 00:00:00 UTC",
        );
        assert!(page.contains("/outputs/processed_x.mp4"));
        assert!(page.contains("Processed 10 frames (0.4 seconds)"));
    }
}
