//! Parser for `/proc/self/mountinfo`.
//!
//! Line format (see proc(5)):
//!
//! ```text
//! 36 35 98:0 /mnt1 /mnt/parent rw,noatime master:1 - ext3 /dev/root rw,errors=continue
//! (1)(2)(3)   (4)   (5)         (6)       (7)      (8) (9)  (10)      (11)
//! ```
//!
//! Field (7) is a variable number of optional fields terminated by the
//! single `-` separator.

use super::{MountRecord, PSEUDO_DEVICE_SOURCES};
use crate::error::{MountError, MountResult};

/// Parse the full contents of a mountinfo file.
pub fn parse_mountinfo(content: &str) -> MountResult<Vec<MountRecord>> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_line)
        .collect()
}

fn parse_line(line: &str) -> MountResult<MountRecord> {
    let fields: Vec<&str> = line.split_whitespace().collect();

    let separator = fields
        .iter()
        .skip(6)
        .position(|f| *f == "-")
        .map(|pos| pos + 6)
        .ok_or_else(|| MountError::Parse(format!("missing separator in line: {}", line)))?;

    if fields.len() < separator + 3 {
        return Err(MountError::Parse(format!("truncated line: {}", line)));
    }

    let root = unescape(fields[3]);
    let path = unescape(fields[4]);
    let options = fields[5].split(',').map(str::to_string).collect();
    let fs_type = fields[separator + 1].to_string();
    let device = unescape(fields[separator + 2]);

    // A bind mount of a node under /dev records the devtmpfs placeholder as
    // its source and the node's path (relative to /dev) as its root.
    let source = if PSEUDO_DEVICE_SOURCES.contains(&device.as_str()) && root != "/" {
        format!("/dev{}", root)
    } else {
        device.clone()
    };

    Ok(MountRecord {
        device,
        source,
        path,
        fs_type,
        options,
    })
}

/// Decode the octal escapes (`\040` for space, `\011` tab, `\012` newline,
/// `\134` backslash) the kernel uses in mountinfo paths.
fn unescape(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..=i + 3];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                if let Ok(byte) = u8::try_from(value) {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}
