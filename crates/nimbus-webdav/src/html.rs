//! HTML directory listings for browsers.

use chrono::{DateTime, Utc};
use nimbus_core::FileInfo;

/// Parents whose children expose a delete button.
const DELETABLE_PARENTS: &[&str] = &["__all__", "__bad__", "torrents"];

/// Render a directory listing with breadcrumbs.
///
/// `href_base` is the absolute, percent-encoded path of the directory with
/// a trailing slash.
#[must_use]
pub(crate) fn render_listing(
    title: &str,
    href_base: &str,
    parent: Option<&str>,
    entries: &[FileInfo],
) -> String {
    let deletable = parent.is_some_and(|parent| DELETABLE_PARENTS.contains(&parent));
    let mut body = String::with_capacity(1_024 + entries.len() * 128);
    body.push_str("<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>");
    body.push_str(&escape(title));
    body.push_str("</title></head><body>\n");

    body.push_str("<h1>");
    push_breadcrumbs(&mut body, href_base);
    body.push_str("</h1>\n<table>\n");
    body.push_str("<tr><th>Name</th><th>Size</th><th>Modified</th><th></th></tr>\n");

    for entry in entries {
        let encoded = urlencoding::encode(&entry.name);
        let href = if entry.is_dir {
            format!("{href_base}{encoded}/")
        } else {
            format!("{href_base}{encoded}")
        };
        body.push_str("<tr><td><a href=\"");
        body.push_str(&href);
        body.push_str("\">");
        body.push_str(&escape(&entry.name));
        if entry.is_dir {
            body.push('/');
        }
        body.push_str("</a></td><td>");
        if entry.is_dir {
            body.push('-');
        } else {
            body.push_str(&entry.size.to_string());
        }
        body.push_str("</td><td>");
        body.push_str(&format_http_date(entry.mod_time));
        body.push_str("</td><td>");
        if deletable && entry.is_dir {
            body.push_str(
                "<form method=\"post\" action=\"",
            );
            body.push_str(&href);
            body.push_str(
                "\" onsubmit=\"return confirm('Delete?')\">\
                 <input type=\"hidden\" name=\"_method\" value=\"DELETE\">\
                 <button>delete</button></form>",
            );
        }
        body.push_str("</td></tr>\n");
    }
    body.push_str("</table>\n</body></html>\n");
    body
}

fn push_breadcrumbs(body: &mut String, href_base: &str) {
    let mut accumulated = String::from("/");
    body.push_str("<a href=\"/\">/</a>");
    for segment in href_base.split('/').filter(|segment| !segment.is_empty()) {
        accumulated.push_str(segment);
        accumulated.push('/');
        body.push_str("<a href=\"");
        body.push_str(&accumulated);
        body.push_str("\">");
        body.push_str(&escape(&urlencoding::decode(segment).unwrap_or_default()));
        body.push_str("</a>/");
    }
}

/// RFC 7231 HTTP-date.
pub(crate) fn format_http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub(crate) fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_orders_entries_as_given_and_escapes_names() {
        let entries = vec![
            FileInfo::dir("Alpha & Co", Utc::now()),
            FileInfo::file("beta<1>.mkv", 42, Utc::now()),
        ];
        let html = render_listing(
            "__all__",
            "/webdav/realdebrid/__all__/",
            Some("__all__"),
            &entries,
        );
        let alpha = html.find("Alpha &amp; Co").expect("alpha entry");
        let beta = html.find("beta&lt;1&gt;.mkv").expect("beta entry");
        assert!(alpha < beta, "entries render in listing order");
        assert!(html.contains("delete"), "deletable parents get buttons");
    }

    #[test]
    fn non_deletable_parents_have_no_buttons() {
        let entries = vec![FileInfo::dir("Alpha", Utc::now())];
        let html = render_listing("shows", "/webdav/rd/shows/", Some("shows"), &entries);
        assert!(!html.contains("<button>"));
    }

    #[test]
    fn http_dates_are_rfc7231() {
        use chrono::TimeZone;
        let time = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).single().expect("time");
        assert_eq!(format_http_date(time), "Sat, 01 Aug 2026 12:00:00 GMT");
    }
}
