use std::io;

use crate::http::exchange::Exchange;
use crate::http::response::{Response, StatusCode};

const FONT: &str = "Verdana, Geneva, sans-serif";
const DEFAULT_MESSAGE: &str = "Sorry, I have tried my best... :'(";

/// Renders the HTML body of a status page.
pub fn render_error(status: StatusCode, message: Option<&str>) -> String {
    let reason = status.reason_phrase();
    format!(
        "<html><head><title>{reason}</title></head><body style=\"font-family:{FONT};\">\
         <h1 style=\"color:#0040F0\">{code} {reason}</h1>\
         <p style=\"font-size:14px;\">{message}</p></body></html>",
        code = status.as_u16(),
        message = escape(message.unwrap_or(DEFAULT_MESSAGE)),
    )
}

/// Renders a directory listing. `entries` are names relative to `uri`;
/// directories carry a trailing `/`.
pub fn render_folder(uri: &str, entries: &[String]) -> String {
    let base = if uri.ends_with('/') {
        uri.to_string()
    } else {
        format!("{uri}/")
    };
    let items: String = entries
        .iter()
        .map(|name| {
            format!(
                "<li><a href=\"{}{}\">{}</a></li>",
                escape(&base),
                urlencoding::encode(name).replace("%2F", "/"),
                escape(name)
            )
        })
        .collect();
    format!(
        "<html><head><title>{title}</title></head><body style=\"font-family:{FONT};\">\
         <h1 style=\"color:#0040F0\">{title}</h1><ul style=\"font-size:14px;\">{items}</ul>\
         </body></html>",
        title = escape(&base),
    )
}

/// Default error page hook.
pub fn error_page(ex: &mut Exchange<'_>, status: StatusCode, message: Option<&str>) -> io::Result<()> {
    tracing::debug!(socket = ex.socket(), status = status.as_u16(), "Sending status page");
    ex.respond(Response::html(status, render_error(status, message)))
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
