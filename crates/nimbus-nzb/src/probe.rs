//! Classification, grouping, and header probing.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use futures_util::stream;
use nimbus_core::sanitize_file_name;
use nimbus_nntp::Client;
use nimbus_nntp::yenc::{self, YENC_DENSITY};
use nimbus_rar::RarReader;
use tracing::{debug, warn};

use crate::classify::{FileClass, base_name, classify_magic, classify_name, file_number};
use crate::error::{NzbError, NzbResult};
use crate::model::{Nzb, NzbFile, NzbSegment, NzbStatus, compute_id};
use crate::parse::{RawSegment, parse_xml, subject_filename};

/// Per-probe attempt deadline.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Parallelism and accumulation bounds for header probing.
#[derive(Debug, Clone, Copy)]
pub struct ParserLimits {
    /// Hard cap on concurrent content probes.
    pub max_probe_parallelism: usize,
    /// Maximum first-file segments fetched for RAR offset discovery.
    pub rar_probe_segments: usize,
    /// Stop accumulating RAR probe bytes past this size.
    pub rar_probe_bytes: usize,
    /// Store-mode detection threshold on `unpacked / archive` ratio.
    pub store_ratio: f64,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self {
            max_probe_parallelism: 10,
            rar_probe_segments: 5,
            rar_probe_bytes: 32 * 1024,
            store_ratio: 0.95,
        }
    }
}

/// Turns raw NZB XML into probed logical files.
pub struct NzbParser {
    client: Option<Arc<Client>>,
    limits: ParserLimits,
}

/// One raw file after naming and ordering.
struct OrderedRaw {
    name: String,
    ordinal: u32,
    groups: Vec<String>,
    segments: Vec<RawSegment>,
}

struct Group {
    class: FileClass,
    files: Vec<OrderedRaw>,
}

impl NzbParser {
    /// Construct a parser; without a client every probe degrades to
    /// estimation.
    #[must_use]
    pub fn new(client: Option<Arc<Client>>) -> Self {
        Self {
            client,
            limits: ParserLimits::default(),
        }
    }

    /// Override the default probing limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: ParserLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Parse `content` into a logical NZB record.
    ///
    /// `filename` is the import's display name (preferred over document
    /// metadata); `category` partitions the usenet store.
    ///
    /// # Errors
    ///
    /// All failures map to the `InvalidNzb` taxonomy kind; individual
    /// segment probe failures degrade to estimation instead of failing.
    pub async fn parse(&self, content: &str, filename: &str, category: &str) -> NzbResult<Nzb> {
        let raw = parse_xml(content)?;

        let name = normalized_name(filename, raw.name.as_deref(), raw.title.as_deref());
        let password = raw.password.clone().unwrap_or_default();
        let title = raw.title.clone().unwrap_or_default();

        // Step 2: name-first classification.
        let mut named: Vec<(String, FileClass, usize)> = raw
            .files
            .iter()
            .enumerate()
            .map(|(index, file)| {
                let display = subject_filename(&file.subject)
                    .unwrap_or_else(|| file.subject.clone());
                let class = classify_name(&display);
                (display, class, index)
            })
            .collect();

        // Step 3: content probes for the unknowns, bounded.
        self.probe_unknowns(&raw, &mut named).await;

        // Step 4: group by base name, dropping archives and noise.
        let mut groups: BTreeMap<(String, u8), Group> = BTreeMap::new();
        for (display, class, index) in named {
            let class = if class == FileClass::Unknown {
                FileClass::Media
            } else {
                class
            };
            if !matches!(class, FileClass::Media | FileClass::Rar) {
                continue;
            }
            let file = &raw.files[index];
            if file.segments.is_empty() {
                continue;
            }
            let key = (base_name(&display), class_rank(class));
            let ordinal = file_number(&file.subject)
                .unwrap_or_else(|| u32::try_from(index).unwrap_or(u32::MAX));
            groups
                .entry(key)
                .or_insert_with(|| Group {
                    class,
                    files: Vec::new(),
                })
                .files
                .push(OrderedRaw {
                    name: display,
                    ordinal,
                    groups: file.groups.clone(),
                    segments: file.segments.clone(),
                });
        }

        // Step 5: one logical file per group, groups probed concurrently.
        let group_limit = self
            .client
            .as_ref()
            .map_or(1, |client| {
                self.limits
                    .max_probe_parallelism
                    .min(client.minimum_max_conns())
                    .max(1)
            });
        let password_ref = &password;
        let mut files: Vec<NzbFile> = stream::iter(groups)
            .map(|((base, _), mut group)| async move {
                match group.class {
                    FileClass::Rar => {
                        group.files.sort_by(|a, b| a.name.cmp(&b.name));
                        self.build_rar_file(&base, &group, password_ref).await
                    }
                    _ => {
                        group.files.sort_by_key(|file| file.ordinal);
                        for file in &mut group.files {
                            file.segments.sort_by_key(|segment| segment.number);
                        }
                        self.build_media_file(&group).await
                    }
                }
            })
            .buffer_unordered(group_limit)
            .collect()
            .await;
        if files.is_empty() {
            return Err(NzbError::NoValidFiles);
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));

        // Step 6: deterministic identity.
        let total_size: u64 = files.iter().map(|file| file.size).sum();
        let id = compute_id(&name, total_size, category, &password);
        for file in &mut files {
            file.nzb_id.clone_from(&id);
            file.password.clone_from(&password);
        }

        Ok(Nzb {
            id,
            name,
            title,
            category: category.to_owned(),
            password,
            total_size,
            added_on: Utc::now(),
            status: NzbStatus::Parsed,
            completed_on: None,
            progress: 0,
            downloaded: false,
            storage: String::new(),
            files,
            is_bad: false,
        })
    }

    async fn probe_unknowns(
        &self,
        raw: &crate::parse::RawNzb,
        named: &mut [(String, FileClass, usize)],
    ) {
        let Some(client) = self.client.as_ref() else {
            return;
        };
        let limit = self
            .limits
            .max_probe_parallelism
            .min(client.minimum_max_conns())
            .max(1);

        let probes: Vec<usize> = named
            .iter()
            .enumerate()
            .filter(|(_, (_, class, _))| *class == FileClass::Unknown)
            .map(|(position, _)| position)
            .collect();
        if probes.is_empty() {
            return;
        }
        debug!(count = probes.len(), limit, "probing unclassified files");

        let results: Vec<(usize, Option<(FileClass, String)>)> = stream::iter(probes)
            .map(|position| {
                let index = named[position].2;
                let file = &raw.files[index];
                let client = Arc::clone(client);
                async move {
                    (position, probe_first_segment(&client, file).await)
                }
            })
            .buffer_unordered(limit)
            .collect()
            .await;

        for (position, outcome) in results {
            if let Some((class, header_name)) = outcome {
                let slot = &mut named[position];
                slot.1 = class;
                if !header_name.is_empty() {
                    slot.0 = header_name;
                }
            }
        }
    }

    async fn build_media_file(&self, group: &Group) -> NzbFile {
        let (mut segments, estimated_size) = estimated_segments(&group.files);
        let mut name = group.files[0].name.clone();
        let mut size = estimated_size;
        let mut segment_size = 0_u64;

        if let Some(client) = self.client.as_ref() {
            if let Some(probe) = probe_media_sizes(client, &group.files).await {
                if probe.chunk_size > 0 {
                    let (rebuilt, total) = probed_segments(
                        &group.files,
                        probe.chunk_size,
                        probe.first_size,
                        probe.last_size,
                    );
                    segments = rebuilt;
                    size = total;
                    segment_size = probe.chunk_size;
                }
                if !probe.header_name.is_empty() {
                    name = probe.header_name;
                }
            }
        }

        NzbFile {
            nzb_id: String::new(),
            name,
            size,
            segment_size,
            start_offset: 0,
            is_rar_archive: false,
            password: String::new(),
            groups: union_groups(&group.files),
            segments,
            deleted: false,
        }
    }

    async fn build_rar_file(&self, base: &str, group: &Group, password: &str) -> NzbFile {
        let (segments, estimated_size) = estimated_segments(&group.files);
        let mut file = NzbFile {
            nzb_id: String::new(),
            name: format!("{base}.rar"),
            size: estimated_size,
            segment_size: 0,
            start_offset: 0,
            is_rar_archive: true,
            password: String::new(),
            groups: union_groups(&group.files),
            segments,
            deleted: false,
        };

        let Some(client) = self.client.as_ref() else {
            return file;
        };
        match self
            .probe_rar_offset(client, group, password, estimated_size)
            .await
        {
            Some(probe) => {
                file.name = probe.inner_name;
                file.size = probe.inner_size;
                file.start_offset = probe.start_offset;
                file.segment_size = probe.segment_size;
            }
            None => {
                debug!(base, "rar probe fell back to estimation");
            }
        }
        file
    }

    async fn probe_rar_offset(
        &self,
        client: &Arc<Client>,
        group: &Group,
        password: &str,
        archive_size: u64,
    ) -> Option<RarProbe> {
        let first = group.files.first()?;
        let newsgroup = first.groups.first().map(String::as_str);

        let mut buffer = Vec::new();
        let mut segment_size = 0_u64;
        for segment in first.segments.iter().take(self.limits.rar_probe_segments) {
            if buffer.len() >= self.limits.rar_probe_bytes {
                break;
            }
            match fetch_segment(client, newsgroup, &segment.message_id).await {
                Some(decoded) => {
                    if segment_size == 0 {
                        segment_size = decoded
                            .part
                            .map_or(decoded.header.size, |part| part.len());
                    }
                    buffer.extend_from_slice(&decoded.data);
                }
                None => break,
            }
        }
        if buffer.is_empty() {
            return None;
        }

        let mut reader = RarReader::new(buffer.as_slice(), non_empty(password));
        loop {
            let entry = match reader.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => return None,
                Err(err) => {
                    warn!(error = %err, "rar offset probe failed");
                    return None;
                }
            };
            if entry.is_dir {
                if reader.skip_entry(&entry).await.is_err() {
                    return None;
                }
                continue;
            }
            if classify_name(&entry.name) != FileClass::Media {
                if reader.skip_entry(&entry).await.is_err() {
                    return None;
                }
                continue;
            }
            // At this header the tracker's position is the archive-internal
            // offset where the inner payload begins.
            #[allow(clippy::cast_precision_loss)]
            let ratio = entry.unpacked_size as f64 / archive_size.max(1) as f64;
            if ratio <= self.limits.store_ratio || !entry.is_store {
                return None;
            }
            return Some(RarProbe {
                inner_name: entry.name,
                inner_size: entry.unpacked_size,
                start_offset: entry.data_offset,
                segment_size,
            });
        }
    }
}

struct RarProbe {
    inner_name: String,
    inner_size: u64,
    start_offset: u64,
    segment_size: u64,
}

struct MediaProbe {
    chunk_size: u64,
    first_size: u64,
    last_size: u64,
    header_name: String,
}

fn class_rank(class: FileClass) -> u8 {
    match class {
        FileClass::Media => 0,
        FileClass::Rar => 1,
        FileClass::Archive => 2,
        FileClass::Ignore => 3,
        FileClass::Unknown => 4,
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_owned())
}

fn union_groups(files: &[OrderedRaw]) -> Vec<String> {
    let mut seen = Vec::new();
    for file in files {
        for group in &file.groups {
            if !seen.contains(group) {
                seen.push(group.clone());
            }
        }
    }
    seen
}

/// Contiguous offsets from the empirical yEnc density.
fn estimated_segments(files: &[OrderedRaw]) -> (Vec<NzbSegment>, u64) {
    let mut offset = 0_u64;
    let mut segments = Vec::new();
    for file in files {
        let group = file.groups.first().cloned().unwrap_or_default();
        for segment in &file.segments {
            #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let decoded = (segment.bytes as f64 * YENC_DENSITY) as u64;
            segments.push(NzbSegment {
                number: segment.number,
                message_id: segment.message_id.clone(),
                bytes: segment.bytes,
                start_offset: offset,
                end_offset: offset + decoded,
                group: group.clone(),
            });
            offset += decoded;
        }
    }
    (segments, offset)
}

/// Exact offsets once the chunk size and per-file sizes are known.
fn probed_segments(
    files: &[OrderedRaw],
    chunk_size: u64,
    first_size: u64,
    last_size: u64,
) -> (Vec<NzbSegment>, u64) {
    let count = u64::try_from(files.len()).unwrap_or(u64::MAX);
    let total = (count.saturating_sub(1)) * first_size + last_size;
    let mut segments = Vec::new();
    for (index, file) in files.iter().enumerate() {
        let base = u64::try_from(index).unwrap_or(u64::MAX) * first_size;
        let file_size = if index + 1 == files.len() {
            last_size
        } else {
            first_size
        };
        let group = file.groups.first().cloned().unwrap_or_default();
        for segment in &file.segments {
            let start = base + u64::from(segment.number.saturating_sub(1)) * chunk_size;
            let end = (start + chunk_size).min(base + file_size);
            segments.push(NzbSegment {
                number: segment.number,
                message_id: segment.message_id.clone(),
                bytes: segment.bytes,
                start_offset: start,
                end_offset: end,
                group: group.clone(),
            });
        }
    }
    (segments, total)
}

fn normalized_name(filename: &str, meta_name: Option<&str>, meta_title: Option<&str>) -> String {
    let explicit = filename
        .rsplit_once('.')
        .map_or(filename, |(stem, _)| stem);
    let chosen = if explicit.is_empty() {
        meta_name
            .filter(|name| !name.is_empty())
            .or(meta_title.filter(|title| !title.is_empty()))
            .unwrap_or(explicit)
    } else {
        explicit
    };
    sanitize_file_name(chosen)
}

async fn fetch_segment(
    client: &Arc<Client>,
    group: Option<&str>,
    message_id: &str,
) -> Option<yenc::Decoded> {
    let attempt = async {
        let mut connection = client.get_connection().await?;
        connection.get_segment(group, message_id).await
    };
    match tokio::time::timeout(PROBE_TIMEOUT, attempt).await {
        Ok(Ok(decoded)) => Some(decoded),
        Ok(Err(err)) => {
            warn!(message_id, error = %err, "segment probe failed");
            None
        }
        Err(_) => {
            warn!(message_id, "segment probe timed out");
            None
        }
    }
}

async fn probe_first_segment(
    client: &Arc<Client>,
    file: &crate::parse::RawNzbFile,
) -> Option<(FileClass, String)> {
    let segment = file.segments.first()?;
    let group = file.groups.first().map(String::as_str);
    let decoded = fetch_segment(client, group, &segment.message_id).await?;

    if !decoded.header.name.is_empty() {
        let class = classify_name(&decoded.header.name);
        if class != FileClass::Unknown {
            return Some((class, decoded.header.name));
        }
    }
    let class = match classify_magic(&decoded.data) {
        FileClass::Unknown => FileClass::Media,
        other => other,
    };
    Some((class, decoded.header.name))
}

/// First/last header probe for media groups.
async fn probe_media_sizes(client: &Arc<Client>, files: &[OrderedRaw]) -> Option<MediaProbe> {
    let first = files.first()?;
    let last = files.last()?;
    let group = first.groups.first().map(String::as_str);

    let first_segment = first.segments.first()?;
    let first_decoded = fetch_segment(client, group, &first_segment.message_id).await?;
    let chunk_size = first_decoded
        .part
        .map_or(first_decoded.header.size, |part| part.len());
    let first_size = first_decoded.header.size;

    let last_size = if files.len() == 1 {
        first_size
    } else {
        let last_group = last.groups.first().map(String::as_str);
        let last_segment = last.segments.first()?;
        let last_decoded = fetch_segment(client, last_group, &last_segment.message_id).await?;
        last_decoded.header.size
    };

    Some(MediaProbe {
        chunk_size,
        first_size,
        last_size,
        header_name: first_decoded.header.name,
    })
}
