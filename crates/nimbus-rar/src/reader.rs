//! Header walk and payload access.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{RarError, RarResult};

/// Shared signature prefix; byte 6 selects the format (0x00 RAR4, 0x01
/// RAR5 with one trailing 0x00).
const SIG_PREFIX: &[u8] = b"Rar!\x1A\x07";

/// RAR4 block types.
const RAR4_MAIN: u8 = 0x73;
const RAR4_FILE: u8 = 0x74;
const RAR4_END: u8 = 0x7B;

/// RAR5 header types.
const RAR5_MAIN: u64 = 1;
const RAR5_FILE: u64 = 2;
const RAR5_ENCRYPTION: u64 = 4;
const RAR5_END: u64 = 5;

/// Discard buffer size for entry skipping.
const SKIP_BUF: usize = 64 * 1024;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Format {
    Rar4,
    Rar5,
}

/// One archive entry positioned at its payload.
#[derive(Debug, Clone)]
pub struct RarEntry {
    /// Entry path as stored in the archive.
    pub name: String,
    /// Unpacked payload size in bytes.
    pub unpacked_size: u64,
    /// Packed payload size in bytes; equals `unpacked_size` for store mode.
    pub packed_size: u64,
    /// Whether the entry was stored without compression.
    pub is_store: bool,
    /// Whether the entry is a directory.
    pub is_dir: bool,
    /// Absolute stream position at which the payload begins.
    pub data_offset: u64,
}

/// Streaming reader over RAR4 / RAR5 archives.
///
/// Entries are visited strictly in order: after [`RarReader::next_entry`]
/// returns an entry, its payload must be fully consumed (skipped or copied)
/// before asking for the next one.
pub struct RarReader<R> {
    inner: R,
    position: u64,
    format: Option<Format>,
    /// Password supplied by the NZB; retained so encrypted-data archives
    /// fail with a precise error rather than producing garbage output.
    password: Option<String>,
    pending_data: u64,
}

impl<R: AsyncRead + Unpin> RarReader<R> {
    /// Wrap a stream positioned at the start of an archive.
    pub fn new(inner: R, password: Option<String>) -> Self {
        Self {
            inner,
            position: 0,
            format: None,
            password,
            pending_data: 0,
        }
    }

    /// Bytes consumed from the underlying stream so far.
    #[must_use]
    pub const fn position(&self) -> u64 {
        self.position
    }

    /// Advance to the next file entry, transparently skipping service
    /// blocks and any unconsumed payload of the previous entry.
    ///
    /// Returns `None` at the end-of-archive block or on clean EOF.
    ///
    /// # Errors
    ///
    /// [`RarError::InvalidSignature`] when the stream is not RAR,
    /// [`RarError::Encrypted`] for encrypted headers, [`RarError::Truncated`]
    /// on short reads, [`RarError::Malformed`] for invalid header fields.
    pub async fn next_entry(&mut self) -> RarResult<Option<RarEntry>> {
        if self.format.is_none() {
            self.read_signature().await?;
        }
        self.discard(self.pending_data).await?;
        self.pending_data = 0;

        match self.format.expect("signature read") {
            Format::Rar4 => self.next_entry_rar4().await,
            Format::Rar5 => self.next_entry_rar5().await,
        }
    }

    /// Discard the current entry's remaining payload.
    ///
    /// # Errors
    ///
    /// Propagates stream failures and truncation.
    pub async fn skip_entry(&mut self, entry: &RarEntry) -> RarResult<()> {
        let consumed = self.position.saturating_sub(entry.data_offset);
        let remaining = entry.packed_size.saturating_sub(consumed);
        self.discard(remaining).await?;
        self.pending_data = 0;
        Ok(())
    }

    /// Copy `len` payload bytes to `sink` after discarding `skip` bytes.
    ///
    /// Only valid for store-mode entries, where packed bytes are the
    /// payload bytes. The remaining tail of the entry stays pending and is
    /// discarded on the next [`RarReader::next_entry`] call.
    ///
    /// # Errors
    ///
    /// [`RarError::Malformed`] when the entry is not store-mode,
    /// [`RarError::Truncated`] when the payload ends inside the range.
    pub async fn copy_range<W: AsyncWrite + Unpin>(
        &mut self,
        entry: &RarEntry,
        skip: u64,
        len: u64,
        sink: &mut W,
    ) -> RarResult<u64> {
        if !entry.is_store {
            return Err(RarError::Malformed {
                detail: format!("entry '{}' is compressed; seeking requires store mode", entry.name),
            });
        }
        if skip.checked_add(len).is_none_or(|end| end > entry.packed_size) {
            return Err(RarError::Truncated);
        }
        self.discard(skip).await?;

        let mut copied = 0_u64;
        let mut buf = vec![0_u8; SKIP_BUF];
        while copied < len {
            let want = usize::try_from((len - copied).min(SKIP_BUF as u64))
                .unwrap_or(SKIP_BUF);
            let read = self.inner.read(&mut buf[..want]).await?;
            if read == 0 {
                return Err(RarError::Truncated);
            }
            self.position += read as u64;
            sink.write_all(&buf[..read])
                .await
                .map_err(|source| RarError::Io { source })?;
            copied += read as u64;
        }
        self.pending_data = entry.packed_size - skip - len;
        Ok(copied)
    }

    async fn read_signature(&mut self) -> RarResult<()> {
        let mut sig = [0_u8; 7];
        self.read_exact(&mut sig).await?;
        if &sig[..6] != SIG_PREFIX {
            return Err(RarError::InvalidSignature);
        }
        match sig[6] {
            0x00 => {
                self.format = Some(Format::Rar4);
                Ok(())
            }
            0x01 => {
                let mut tail = [0_u8; 1];
                self.read_exact(&mut tail).await?;
                if tail[0] != 0x00 {
                    return Err(RarError::InvalidSignature);
                }
                self.format = Some(Format::Rar5);
                Ok(())
            }
            _ => Err(RarError::InvalidSignature),
        }
    }

    async fn next_entry_rar4(&mut self) -> RarResult<Option<RarEntry>> {
        loop {
            let mut base = [0_u8; 7];
            if !self.read_exact_or_eof(&mut base).await? {
                return Ok(None);
            }
            let head_type = base[2];
            let flags = u16::from_le_bytes([base[3], base[4]]);
            let head_size = u64::from(u16::from_le_bytes([base[5], base[6]]));
            if head_size < 7 {
                return Err(RarError::Malformed {
                    detail: "header shorter than its fixed part".to_owned(),
                });
            }
            let body_len = head_size - 7;

            match head_type {
                RAR4_MAIN => {
                    // Header-encrypted archives (flag 0x0080) cannot be walked.
                    if flags & 0x0080 != 0 {
                        return Err(RarError::Encrypted);
                    }
                    self.discard(body_len).await?;
                }
                RAR4_FILE => {
                    return self.read_file_head_rar4(flags, body_len).await.map(Some);
                }
                RAR4_END => return Ok(None),
                _ => {
                    // Service block: ADD_SIZE data follows when LONG_BLOCK set.
                    let mut body = vec![0_u8; usize::try_from(body_len).map_err(|_| {
                        RarError::Malformed {
                            detail: "oversized service header".to_owned(),
                        }
                    })?];
                    self.read_exact(&mut body).await?;
                    if flags & 0x8000 != 0 && body.len() >= 4 {
                        let add = u64::from(u32::from_le_bytes([
                            body[0], body[1], body[2], body[3],
                        ]));
                        self.discard(add).await?;
                    }
                }
            }
        }
    }

    async fn read_file_head_rar4(&mut self, flags: u16, body_len: u64) -> RarResult<RarEntry> {
        let mut body = vec![0_u8; usize::try_from(body_len).map_err(|_| RarError::Malformed {
            detail: "oversized file header".to_owned(),
        })?];
        self.read_exact(&mut body).await?;
        if body.len() < 25 {
            return Err(RarError::Malformed {
                detail: "file header shorter than its fixed fields".to_owned(),
            });
        }

        let mut pack_size = u64::from(u32::from_le_bytes([body[0], body[1], body[2], body[3]]));
        let mut unp_size = u64::from(u32::from_le_bytes([body[4], body[5], body[6], body[7]]));
        let method = body[19];
        let name_size = usize::from(u16::from_le_bytes([body[20], body[21]]));
        let mut cursor = 26;
        if flags & 0x0100 != 0 {
            // 64-bit sizes appended for large files.
            if body.len() < cursor + 8 {
                return Err(RarError::Malformed {
                    detail: "missing 64-bit size extension".to_owned(),
                });
            }
            let high_pack = u64::from(u32::from_le_bytes([
                body[cursor],
                body[cursor + 1],
                body[cursor + 2],
                body[cursor + 3],
            ]));
            let high_unp = u64::from(u32::from_le_bytes([
                body[cursor + 4],
                body[cursor + 5],
                body[cursor + 6],
                body[cursor + 7],
            ]));
            pack_size |= high_pack << 32;
            unp_size |= high_unp << 32;
            cursor += 8;
        }
        if body.len() < cursor + name_size {
            return Err(RarError::Malformed {
                detail: "file name extends past the header".to_owned(),
            });
        }
        let name = String::from_utf8_lossy(&body[cursor..cursor + name_size]).into_owned();

        if flags & 0x0004 != 0 && self.password.is_none() {
            // Data encrypted and no password supplied.
            return Err(RarError::Encrypted);
        }

        self.pending_data = pack_size;
        Ok(RarEntry {
            name,
            unpacked_size: unp_size,
            packed_size: pack_size,
            is_store: method == 0x30,
            is_dir: flags & 0x00E0 == 0x00E0,
            data_offset: self.position,
        })
    }

    async fn next_entry_rar5(&mut self) -> RarResult<Option<RarEntry>> {
        loop {
            // Block: crc32, vint header size, then the header itself.
            let mut crc = [0_u8; 4];
            if !self.read_exact_or_eof(&mut crc).await? {
                return Ok(None);
            }
            let header_size = self.read_vint().await?;
            let mut header = vec![0_u8; usize::try_from(header_size).map_err(|_| {
                RarError::Malformed {
                    detail: "oversized rar5 header".to_owned(),
                }
            })?];
            self.read_exact(&mut header).await?;

            let mut view = VintView::new(&header);
            let header_type = view.vint()?;
            let header_flags = view.vint()?;
            let _extra_size = if header_flags & 0x0001 != 0 {
                view.vint()?
            } else {
                0
            };
            let data_size = if header_flags & 0x0002 != 0 {
                view.vint()?
            } else {
                0
            };

            match header_type {
                RAR5_END => return Ok(None),
                RAR5_ENCRYPTION => return Err(RarError::Encrypted),
                RAR5_FILE => {
                    let file_flags = view.vint()?;
                    let unpacked_size = view.vint()?;
                    let _attributes = view.vint()?;
                    if file_flags & 0x0002 != 0 {
                        view.skip(4)?; // mtime
                    }
                    if file_flags & 0x0004 != 0 {
                        view.skip(4)?; // crc32
                    }
                    let compression = view.vint()?;
                    let _host_os = view.vint()?;
                    let name_len = view.vint()?;
                    let name = view.bytes(usize::try_from(name_len).map_err(|_| {
                        RarError::Malformed {
                            detail: "oversized rar5 file name".to_owned(),
                        }
                    })?)?;
                    let method = (compression >> 7) & 0x7;

                    self.pending_data = data_size;
                    return Ok(Some(RarEntry {
                        name: String::from_utf8_lossy(name).into_owned(),
                        unpacked_size,
                        packed_size: data_size,
                        is_store: method == 0,
                        is_dir: file_flags & 0x0001 != 0,
                        data_offset: self.position,
                    }));
                }
                RAR5_MAIN => {
                    self.discard(data_size).await?;
                }
                _ => {
                    self.discard(data_size).await?;
                }
            }
        }
    }

    async fn read_vint(&mut self) -> RarResult<u64> {
        let mut value = 0_u64;
        for shift in (0..10).map(|i| i * 7) {
            let mut byte = [0_u8; 1];
            self.read_exact(&mut byte).await?;
            value |= u64::from(byte[0] & 0x7F) << shift;
            if byte[0] & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(RarError::Malformed {
            detail: "vint longer than 10 bytes".to_owned(),
        })
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> RarResult<()> {
        self.inner.read_exact(buf).await?;
        self.position += buf.len() as u64;
        Ok(())
    }

    /// Like `read_exact`, but a clean EOF before the first byte returns
    /// `false` instead of an error.
    async fn read_exact_or_eof(&mut self, buf: &mut [u8]) -> RarResult<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            let read = self.inner.read(&mut buf[filled..]).await?;
            if read == 0 {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(RarError::Truncated);
            }
            filled += read;
            self.position += read as u64;
        }
        Ok(true)
    }

    async fn discard(&mut self, mut remaining: u64) -> RarResult<()> {
        let mut buf = vec![0_u8; SKIP_BUF];
        while remaining > 0 {
            let want = usize::try_from(remaining.min(SKIP_BUF as u64)).unwrap_or(SKIP_BUF);
            let read = self.inner.read(&mut buf[..want]).await?;
            if read == 0 {
                return Err(RarError::Truncated);
            }
            self.position += read as u64;
            remaining -= read as u64;
        }
        Ok(())
    }
}

/// Cursor over an in-memory RAR5 header.
struct VintView<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> VintView<'a> {
    const fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn vint(&mut self) -> RarResult<u64> {
        let mut value = 0_u64;
        for shift in (0..10).map(|i| i * 7) {
            let byte = *self.data.get(self.offset).ok_or(RarError::Truncated)?;
            self.offset += 1;
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(RarError::Malformed {
            detail: "vint longer than 10 bytes".to_owned(),
        })
    }

    fn skip(&mut self, count: usize) -> RarResult<()> {
        if self.offset + count > self.data.len() {
            return Err(RarError::Truncated);
        }
        self.offset += count;
        Ok(())
    }

    fn bytes(&mut self, count: usize) -> RarResult<&'a [u8]> {
        if self.offset + count > self.data.len() {
            return Err(RarError::Truncated);
        }
        let slice = &self.data[self.offset..self.offset + count];
        self.offset += count;
        Ok(slice)
    }
}
