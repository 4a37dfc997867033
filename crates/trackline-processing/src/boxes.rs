//! Minimal ISOBMFF box walking.

/// Parsed view over a single box inside a parent byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BoxView {
    pub(crate) start: usize,
    pub(crate) end: usize,
    pub(crate) fourcc: [u8; 4],
    pub(crate) body_start: usize,
    pub(crate) body_end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BoxError {
    /// Header or declared size runs past the enclosing range.
    Truncated { offset: usize },
}

/// Parse the box at `offset` within `data[..end]`.
///
/// Handles 32-bit sizes, 64-bit extended sizes (`size == 1`) and
/// box-extends-to-end (`size == 0`).
pub(crate) fn box_at(data: &[u8], offset: usize, end: usize) -> Result<BoxView, BoxError> {
    let truncated = BoxError::Truncated { offset };
    let header = data.get(offset..end).ok_or(truncated)?;
    if header.len() < 8 {
        return Err(truncated);
    }

    let size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;
    let fourcc = [header[4], header[5], header[6], header[7]];

    let (size, header_size) = match size {
        0 => ((end - offset) as u64, 8),
        1 => {
            if header.len() < 16 {
                return Err(truncated);
            }
            let mut ext = [0u8; 8];
            ext.copy_from_slice(&header[8..16]);
            (u64::from_be_bytes(ext), 16)
        }
        n => (n, 8),
    };

    let size = usize::try_from(size).map_err(|_| truncated)?;
    if size < header_size || offset.checked_add(size).map_or(true, |box_end| box_end > end) {
        return Err(truncated);
    }

    Ok(BoxView {
        start: offset,
        end: offset + size,
        fourcc,
        body_start: offset + header_size,
        body_end: offset + size,
    })
}

/// Every box directly inside `data[start..end]`.
pub(crate) fn children(data: &[u8], start: usize, end: usize) -> Result<Vec<BoxView>, BoxError> {
    let mut boxes = Vec::new();
    let mut offset = start;
    while offset < end {
        let parsed = box_at(data, offset, end)?;
        offset = parsed.end;
        boxes.push(parsed);
    }
    Ok(boxes)
}

/// First box reached by following `path` from `data[start..end]`.
pub(crate) fn find_path(data: &[u8], start: usize, end: usize, path: &[&[u8; 4]]) -> Option<BoxView> {
    let (first, rest) = path.split_first()?;
    let found = children(data, start, end)
        .ok()?
        .into_iter()
        .find(|b| &b.fourcc == *first)?;
    if rest.is_empty() {
        Some(found)
    } else {
        find_path(data, found.body_start, found.body_end, rest)
    }
}

pub(crate) fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub(crate) fn read_u64(data: &[u8], offset: usize) -> Option<u64> {
    let bytes = data.get(offset..offset + 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Some(u64::from_be_bytes(buf))
}

/// Version and 24-bit flags of a full box body.
pub(crate) fn full_box_header(data: &[u8], body_start: usize) -> Option<(u8, u32)> {
    let word = read_u32(data, body_start)?;
    Some(((word >> 24) as u8, word & 0x00FF_FFFF))
}

pub(crate) fn fourcc_to_string(fourcc: &[u8; 4]) -> String {
    String::from_utf8_lossy(fourcc).to_string()
}
