use bytes::{Buf, BufMut, BytesMut};
use shared::{EngineError, Error, Result};
use std::io::{ErrorKind, Read, Write};

// Stream layout:
// - header: [b"STRB"][format: u8]
// - entry:  [0x01][key_len: u32][value_len: u32][expires_at: u64][version: u64][key][value]
// - end:    [0x00][upto: u64]
pub const MAGIC: &[u8; 4] = b"STRB";
pub const FORMAT_VERSION: u8 = 1;

pub const TAG_END: u8 = 0x00;
pub const TAG_ENTRY: u8 = 0x01;

const ENTRY_HEADER_LEN: usize = 24;

/// One key/value pair in a backup stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackupEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub expires_at: Option<u64>,
    pub version: u64,
}

impl BackupEntry {
    fn encode(&self) -> BytesMut {
        let frame_len = 1 + ENTRY_HEADER_LEN + self.key.len() + self.value.len();
        let mut buf = BytesMut::with_capacity(frame_len);
        buf.put_u8(TAG_ENTRY);
        buf.put_u32(self.key.len() as u32);
        buf.put_u32(self.value.len() as u32);
        buf.put_u64(self.expires_at.unwrap_or(0));
        buf.put_u64(self.version);
        buf.put_slice(&self.key);
        buf.put_slice(&self.value);
        buf
    }
}

/// Encodes entries into a backup stream.
pub struct BackupWriter<W: Write> {
    inner: W,
    entries: u64,
}

impl<W: Write> BackupWriter<W> {
    pub fn new(mut inner: W) -> Result<Self> {
        let mut header = BytesMut::with_capacity(MAGIC.len() + 1);
        header.put_slice(MAGIC);
        header.put_u8(FORMAT_VERSION);
        inner.write_all(&header)?;

        Ok(Self { inner, entries: 0 })
    }

    pub fn write_entry(&mut self, entry: &BackupEntry) -> Result<()> {
        if entry.key.len() > u32::MAX as usize || entry.value.len() > u32::MAX as usize {
            return Err(EngineError::Corrupted(format!(
                "entry too large for backup frame: key {} bytes, value {} bytes",
                entry.key.len(),
                entry.value.len()
            ))
            .into());
        }

        self.inner.write_all(&entry.encode())?;
        self.entries += 1;
        Ok(())
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Writes the end marker and returns the number of entries written.
    pub fn finish(mut self, upto: u64) -> Result<u64> {
        let mut trailer = BytesMut::with_capacity(9);
        trailer.put_u8(TAG_END);
        trailer.put_u64(upto);
        self.inner.write_all(&trailer)?;
        self.inner.flush()?;
        Ok(self.entries)
    }
}

/// Decodes a backup stream entry by entry.
pub struct BackupReader<R: Read> {
    inner: R,
    upto: Option<u64>,
}

impl<R: Read> BackupReader<R> {
    pub fn new(mut inner: R) -> Result<Self> {
        let mut header = [0u8; 5];
        read_exact(&mut inner, &mut header, "header")?;

        if &header[..4] != MAGIC {
            return Err(EngineError::Corrupted("not a backup stream: bad magic".to_string()).into());
        }
        if header[4] != FORMAT_VERSION {
            return Err(EngineError::Corrupted(format!(
                "unsupported backup format version {}",
                header[4]
            ))
            .into());
        }

        Ok(Self { inner, upto: None })
    }

    /// Returns the next entry, or `None` once the end marker is reached.
    pub fn next_entry(&mut self) -> Result<Option<BackupEntry>> {
        if self.upto.is_some() {
            return Ok(None);
        }

        let mut tag = [0u8; 1];
        read_exact(&mut self.inner, &mut tag, "frame tag")?;

        match tag[0] {
            TAG_END => {
                let mut upto = [0u8; 8];
                read_exact(&mut self.inner, &mut upto, "end marker")?;
                self.upto = Some(u64::from_be_bytes(upto));
                Ok(None)
            }
            TAG_ENTRY => {
                let mut header = [0u8; ENTRY_HEADER_LEN];
                read_exact(&mut self.inner, &mut header, "entry header")?;

                let mut buf = &header[..];
                let key_len = buf.get_u32() as u64;
                let value_len = buf.get_u32() as u64;
                let expires_at = match buf.get_u64() {
                    0 => None,
                    at => Some(at),
                };
                let version = buf.get_u64();

                let key = read_vec(&mut self.inner, key_len, "key")?;
                let value = read_vec(&mut self.inner, value_len, "value")?;

                Ok(Some(BackupEntry {
                    key,
                    value,
                    expires_at,
                    version,
                }))
            }
            other => {
                Err(EngineError::Corrupted(format!("unknown frame tag: 0x{:02X}", other)).into())
            }
        }
    }

    /// Version recorded in the end marker, once it has been read.
    pub fn upto(&self) -> Option<u64> {
        self.upto
    }
}

fn read_exact(reader: &mut impl Read, buf: &mut [u8], what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => Error::from(EngineError::Corrupted(format!(
            "truncated backup stream: missing {}",
            what
        ))),
        _ => Error::from(e),
    })
}

// Reads through `take` so a corrupt length cannot force a huge allocation up front.
fn read_vec(reader: &mut impl Read, len: u64, what: &str) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    reader.by_ref().take(len).read_to_end(&mut out)?;
    if out.len() as u64 != len {
        return Err(EngineError::Corrupted(format!(
            "truncated backup stream: {} has {} of {} bytes",
            what,
            out.len(),
            len
        ))
        .into());
    }
    Ok(out)
}
