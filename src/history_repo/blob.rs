// BLOB version prefix helpers. [version: u8][payload].
// data: version 1 = wincode UnraidSnapshot.

pub(super) const SNAPSHOT_BLOB_VERSION: u8 = 1;

pub(super) fn with_version_prefix(version: u8, payload: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(version);
    out.extend_from_slice(&payload);
    out
}

/// Payload after the version byte, or None when the blob carries another version.
pub(super) fn versioned_payload(bytes: &[u8], expected_version: u8) -> Option<&[u8]> {
    match bytes.split_first() {
        Some((v, rest)) if *v == expected_version => Some(rest),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_is_checked() {
        let blob = with_version_prefix(SNAPSHOT_BLOB_VERSION, vec![7, 8]);
        assert_eq!(versioned_payload(&blob, SNAPSHOT_BLOB_VERSION), Some(&[7u8, 8][..]));
        assert_eq!(versioned_payload(&blob, 2), None);
        assert_eq!(versioned_payload(&[], SNAPSHOT_BLOB_VERSION), None);
    }
}
