//! Server-rendered HTML for the upload form.

use std::fmt::Write;

use axum::http::StatusCode;

use crate::services::interaction::InteractionState;
use crate::services::stage::StageListing;
use crate::services::table::TablePreview;

const TITLE: &str = "📤 CSV Upload with Original Filenames";

const STYLE: &str = "body{font-family:sans-serif;max-width:960px;margin:2rem auto;padding:0 1rem}\
table{border-collapse:collapse;margin:1rem 0}th,td{border:1px solid #ccc;padding:.3rem .6rem;text-align:left}\
.banner{padding:.6rem 1rem;border-radius:4px;margin:1rem 0}.success{background:#e6f4ea;color:#1e4620}\
.error{background:#fdecea;color:#611a15}.muted{color:#666}";

pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
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

fn layout(body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\"><head><meta charset=\"utf-8\">\
         <title>CSV Upload</title><style>{STYLE}</style></head>\
         <body><h1>{TITLE}</h1>{body}</body></html>\n"
    )
}

fn file_picker() -> &'static str {
    "<form method=\"post\" action=\"/preview\" enctype=\"multipart/form-data\">\
     <label>Choose CSV <input type=\"file\" name=\"file\" accept=\".csv,text/csv\" required></label> \
     <button type=\"submit\">Preview</button></form>"
}

fn banner(class: &str, text: &str) -> String {
    format!("<div class=\"banner {}\">{}</div>", class, escape(text))
}

fn preview_table(preview: &TablePreview) -> String {
    let mut html = String::from("<table><thead><tr>");
    for column in &preview.columns {
        let _ = write!(html, "<th>{}</th>", escape(column));
    }
    html.push_str("</tr></thead><tbody>");
    for row in &preview.rows {
        html.push_str("<tr>");
        for cell in row {
            let _ = write!(html, "<td>{}</td>", escape(cell));
        }
        html.push_str("</tr>");
    }
    html.push_str("</tbody></table>");
    let _ = write!(
        html,
        "<p class=\"muted\">Showing {} of {} rows</p>",
        preview.rows.len(),
        preview.total_rows
    );
    html
}

fn listing_table(listing: &StageListing) -> String {
    let mut html = String::from("<table><thead><tr><th>Stage files</th></tr></thead><tbody>");
    for name in listing.names() {
        let _ = write!(html, "<tr><td>{}</td></tr>", escape(&name));
    }
    html.push_str("</tbody></table>");
    html
}

pub fn index_page() -> String {
    layout(file_picker())
}

/// Renders the page for the state an interaction ended in.
pub fn state_page(state: &InteractionState) -> String {
    let body = match state {
        InteractionState::Idle
        | InteractionState::FileSelected { .. }
        | InteractionState::Uploading { .. } => file_picker().to_string(),
        InteractionState::Previewed {
            draft_id,
            filename,
            preview,
        } => format!(
            "{picker}<h2>{name}</h2>{table}\
             <form method=\"post\" action=\"/upload\">\
             <input type=\"hidden\" name=\"draft_id\" value=\"{draft_id}\">\
             <button type=\"submit\">Upload</button></form>",
            picker = file_picker(),
            name = escape(filename),
            table = preview_table(preview),
        ),
        InteractionState::Done {
            filename,
            stage_files,
        } => format!(
            "{picker}{banner}{listing}",
            picker = file_picker(),
            banner = banner("success", &format!("✅ Uploaded as: {}", filename)),
            listing = listing_table(stage_files),
        ),
        InteractionState::Failed { error, .. } => {
            let inline = error
                .as_deref()
                .map(|e| banner("error", e))
                .unwrap_or_default();
            format!(
                "{picker}{inline}{banner}",
                picker = file_picker(),
                banner = banner("error", "Upload failed"),
            )
        }
    };
    layout(&body)
}

pub fn error_page(status: StatusCode, message: &str) -> String {
    layout(&format!(
        "{}{}<p><a href=\"/\">Start over</a></p>",
        banner("error", message),
        format!("<p class=\"muted\">{}</p>", status),
    ))
}
