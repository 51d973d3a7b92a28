use bytes::Bytes;

/// Number of leading bytes the format detector looks at.
pub const DETECTION_HEADER_LEN: usize = 512;

/// One uploaded file. Immutable once read; consumed once by the pipeline.
#[derive(Debug, Clone)]
pub struct FileDescriptor {
    pub name: String,
    pub byte_size: usize,
    pub raw_bytes: Bytes,
    pub claimed_extension: Option<String>,
}

impl FileDescriptor {
    pub fn new(name: impl Into<String>, raw_bytes: impl Into<Bytes>) -> Self {
        let name = name.into();
        let raw_bytes = raw_bytes.into();
        let claimed_extension = extension_of(&name);
        Self {
            byte_size: raw_bytes.len(),
            name,
            raw_bytes,
            claimed_extension,
        }
    }

    pub fn header(&self) -> &[u8] {
        let end = self.raw_bytes.len().min(DETECTION_HEADER_LEN);
        &self.raw_bytes[..end]
    }
}

/// Lower-cased extension without the dot, if the name has one.
pub fn extension_of(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
