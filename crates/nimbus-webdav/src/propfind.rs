//! Minimal multistatus rendering for PROPFIND.

use nimbus_core::FileInfo;

use crate::html::{escape, format_http_date};

/// Render a `DAV:` multistatus for a path and, at depth 1, its children.
///
/// HREFs are percent-encoded preserving `/`.
#[must_use]
pub(crate) fn render_multistatus(
    href: &str,
    own: &FileInfo,
    children: Option<&[FileInfo]>,
    content_type: &str,
) -> String {
    let mut xml = String::with_capacity(1_024);
    xml.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    xml.push_str("<D:multistatus xmlns:D=\"DAV:\">\n");

    push_response(&mut xml, href, own, content_type);
    if let Some(children) = children {
        for child in children {
            let encoded = encode_segment(&child.name);
            let child_href = if child.is_dir {
                format!("{href}{encoded}/")
            } else {
                format!("{href}{encoded}")
            };
            let child_type = if child.is_dir {
                ""
            } else {
                nimbus_core::content_type_for(&child.name)
            };
            push_response(&mut xml, &child_href, child, child_type);
        }
    }

    xml.push_str("</D:multistatus>\n");
    xml
}

fn push_response(xml: &mut String, href: &str, info: &FileInfo, content_type: &str) {
    xml.push_str("<D:response>\n<D:href>");
    xml.push_str(&escape(href));
    xml.push_str("</D:href>\n<D:propstat>\n<D:prop>\n");

    xml.push_str("<D:displayname>");
    xml.push_str(&escape(&info.name));
    xml.push_str("</D:displayname>\n");

    if info.is_dir {
        xml.push_str("<D:resourcetype><D:collection/></D:resourcetype>\n");
    } else {
        xml.push_str("<D:resourcetype/>\n");
        xml.push_str("<D:getcontentlength>");
        xml.push_str(&info.size.to_string());
        xml.push_str("</D:getcontentlength>\n");
        xml.push_str("<D:getcontenttype>");
        xml.push_str(content_type);
        xml.push_str("</D:getcontenttype>\n");
    }

    xml.push_str("<D:getlastmodified>");
    xml.push_str(&format_http_date(info.mod_time));
    xml.push_str("</D:getlastmodified>\n");

    xml.push_str(
        "<D:supportedlock>\n<D:lockentry>\n<D:lockscope><D:exclusive/></D:lockscope>\n\
         <D:locktype><D:write/></D:locktype>\n</D:lockentry>\n</D:supportedlock>\n",
    );

    xml.push_str(
        "</D:prop>\n<D:status>HTTP/1.1 200 OK</D:status>\n</D:propstat>\n</D:response>\n",
    );
}

/// Percent-encode one path segment, leaving `/` untouched by construction.
pub(crate) fn encode_segment(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}
