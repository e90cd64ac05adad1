/// Appended when output was cut off at the cap.
pub const STRIPPED_MARKER: &[u8] = b" ... stripped";

/// Byte sink that keeps at most `limit` bytes.
///
/// Anything past the cap is dropped; the retained bytes then end with
/// [`STRIPPED_MARKER`] while the total length stays within `limit`.
#[derive(Debug, Clone)]
pub struct LimitedBuffer {
    limit: usize,
    data: Vec<u8>,
    overflowed: bool,
}

impl LimitedBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            data: Vec::new(),
            overflowed: false,
        }
    }

    pub fn write(&mut self, chunk: &[u8]) {
        let room = self.limit.saturating_sub(self.data.len());
        if chunk.len() > room {
            self.overflowed = true;
        }
        self.data.extend(chunk.iter().take(room));
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        let mut data = self.data;
        if self.overflowed {
            let keep = self.limit.saturating_sub(STRIPPED_MARKER.len());
            data.truncate(keep);
            data.extend_from_slice(STRIPPED_MARKER);
            data.truncate(self.limit);
        }
        data
    }
}
