//! NZB XML builder for parser fixtures.

/// One raw file within a fixture NZB.
#[derive(Debug, Clone)]
pub struct NzbFixtureFile {
    /// Subject line carrying the file name in quotes.
    pub subject: String,
    /// Newsgroups the file was posted to.
    pub groups: Vec<String>,
    /// Segments as `(number, on_wire_bytes, message_id)` without brackets.
    pub segments: Vec<(u32, u64, String)>,
}

impl NzbFixtureFile {
    /// Construct a fixture file with one group and sequential message-ids.
    #[must_use]
    pub fn simple(name: &str, segment_bytes: &[u64]) -> Self {
        Self {
            subject: format!("fixture [1/1] - \"{name}\" yEnc (1/{})", segment_bytes.len()),
            groups: vec!["alt.binaries.test".to_owned()],
            segments: segment_bytes
                .iter()
                .enumerate()
                .map(|(index, bytes)| {
                    let number = u32::try_from(index + 1).unwrap_or(u32::MAX);
                    (number, *bytes, format!("{name}.{number}@fixture"))
                })
                .collect(),
        }
    }
}

/// Render a complete NZB document.
#[must_use]
pub fn build_nzb(meta_name: Option<&str>, password: Option<&str>, files: &[NzbFixtureFile]) -> String {
    let mut out = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <nzb xmlns=\"http://www.newzbin.com/DTD/2003/nzb\">\n",
    );
    if meta_name.is_some() || password.is_some() {
        out.push_str("  <head>\n");
        if let Some(name) = meta_name {
            out.push_str(&format!("    <meta type=\"name\">{name}</meta>\n"));
        }
        if let Some(password) = password {
            out.push_str(&format!("    <meta type=\"password\">{password}</meta>\n"));
        }
        out.push_str("  </head>\n");
    }
    for file in files {
        out.push_str(&format!(
            "  <file poster=\"fixture@example.com\" date=\"1700000000\" subject=\"{}\">\n",
            xml_escape(&file.subject)
        ));
        out.push_str("    <groups>\n");
        for group in &file.groups {
            out.push_str(&format!("      <group>{group}</group>\n"));
        }
        out.push_str("    </groups>\n    <segments>\n");
        for (number, bytes, message_id) in &file.segments {
            out.push_str(&format!(
                "      <segment bytes=\"{bytes}\" number=\"{number}\">{message_id}</segment>\n"
            ));
        }
        out.push_str("    </segments>\n  </file>\n");
    }
    out.push_str("</nzb>\n");
    out
}

fn xml_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
