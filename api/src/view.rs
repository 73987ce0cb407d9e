use smash_collector_common::frame::{CapturedFrame, Label};
use smash_collector_session::SessionSnapshot;

const TITLE: &str = "Smash Burger Data Collector";

/// Button caption for each label choice.
fn caption(label: Label) -> &'static str {
    match label {
        Label::UnderSmashed => "Under",
        Label::Perfect => "Perfect",
        Label::OverSmashed => "Over",
    }
}

/// Render the operator page for the current session state.
///
/// Controls follow the session: capture and the live feed only while the
/// camera is live, export only once at least one frame exists.
pub fn render_page(snapshot: &SessionSnapshot, notice: Option<&str>) -> String {
    let mut html = String::with_capacity(4096 + snapshot.frames.len() * 512);
    html.push_str(&format!(
        "<!doctype html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>{TITLE}</title>\n</head>\n<body>\n<main>\n<h1>{TITLE}</h1>\n"
    ));

    if let Some(message) = notice {
        html.push_str(&format!(
            "<p class=\"notice\" role=\"alert\">{}</p>\n",
            escape(message)
        ));
    }

    render_camera_controls(&mut html, snapshot);

    if snapshot.can_export() {
        html.push_str(&format!(
            "<a class=\"export\" href=\"/export\" download>Download Dataset ({} images)</a>\n",
            snapshot.frame_count()
        ));
    }

    html.push_str("<section class=\"frames\">\n");
    for frame in &snapshot.frames {
        render_frame(&mut html, frame);
    }
    html.push_str("</section>\n</main>\n</body>\n</html>\n");
    html
}

fn render_camera_controls(html: &mut String, snapshot: &SessionSnapshot) {
    html.push_str("<section class=\"camera\">\n");
    if snapshot.camera_active {
        html.push_str(
            "<form method=\"post\" action=\"/camera/stop\"><button class=\"stop\">Stop Camera</button></form>\n\
             <form method=\"post\" action=\"/capture\"><button class=\"capture\">Capture</button></form>\n",
        );
        // The stream id keeps browsers from reusing a feed of an earlier stream.
        html.push_str(&format!(
            "<img class=\"feed\" src=\"/camera/feed?stream={}\" alt=\"Live camera feed\">\n",
            snapshot.stream_id.unwrap_or_default()
        ));
    } else {
        html.push_str(
            "<form method=\"post\" action=\"/camera/start\"><button class=\"start\">Start Camera</button></form>\n",
        );
    }
    html.push_str("</section>\n");
}

fn render_frame(html: &mut String, frame: &CapturedFrame) {
    let id = frame.id();
    html.push_str(&format!(
        "<article class=\"frame\" id=\"frame-{id}\">\n<img src=\"{}\" alt=\"Captured patty\">\n<form method=\"post\" action=\"/frames/{id}/label\">\n",
        escape(frame.image().data_uri())
    ));
    for label in Label::ALL {
        let selected = if frame.label() == Some(label) {
            " selected"
        } else {
            ""
        };
        html.push_str(&format!(
            "<button name=\"label\" value=\"{label}\" class=\"label {label}{selected}\">{}</button>\n",
            caption(label)
        ));
    }
    html.push_str("</form>\n</article>\n");
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
