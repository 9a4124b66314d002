use axum::{
    http::header,
    response::{Html, IntoResponse},
};

//-- HELPER FUNCS
const CONTENT_SECURITY_POLICY: &str = "default-src 'none'; style-src 'unsafe-inline'; img-src 'self' data:; form-action 'self'; base-uri 'none'; frame-ancestors 'none'";

fn hardening_headers() -> [(header::HeaderName, &'static str); 4] {
    [
        (header::CONTENT_SECURITY_POLICY, CONTENT_SECURITY_POLICY),
        (header::X_FRAME_OPTIONS, "DENY"),
        (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        (header::REFERRER_POLICY, "no-referrer"),
    ]
}

fn serve_html(content: String) -> impl IntoResponse {
    (hardening_headers(), Html(content))
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

//-- UPLOAD PAGE
pub fn render_upload_page(action: &str) -> String {
    include_str!("upload.html").replace("{{action}}", &escape_html(action))
}

pub fn serve_upload_page(action: &str) -> impl IntoResponse {
    serve_html(render_upload_page(action))
}

//-- COMPLETION PAGE
pub fn render_done_page(files: &[String]) -> String {
    let items = if files.is_empty() {
        "    <li>(no files)</li>".to_string()
    } else {
        files
            .iter()
            .map(|name| format!("    <li>{}</li>", escape_html(name)))
            .collect::<Vec<_>>()
            .join("\n")
    };
    include_str!("done.html").replace("{{files}}", &items)
}

pub fn serve_done_page(files: &[String]) -> impl IntoResponse {
    serve_html(render_done_page(files))
}

//-- QR PAGE
pub fn render_qr_page(svg: &str, url: &str) -> String {
    // Drop the XML prolog so the SVG can sit inline
    let inline = svg.find("<svg").map_or(svg, |start| &svg[start..]);
    include_str!("qr.html")
        .replace("{{svg}}", inline)
        .replace("{{url}}", &escape_html(url))
}

pub fn serve_qr_page(svg: &str, url: &str) -> impl IntoResponse {
    serve_html(render_qr_page(svg, url))
}
