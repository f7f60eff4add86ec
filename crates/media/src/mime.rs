//! Media-type detection by magic bytes (spec.md §4.6). Operates on the
//! first 32 bytes of a media item so it can run against a `Range:
//! bytes=0-31` probe without pulling the whole file.

/// Best-effort MIME type from a magic-number prefix. Unrecognized prefixes
/// fall back to `application/octet-stream`.
pub fn detect_mime(head: &[u8]) -> &'static str {
    if head.len() >= 3 && &head[0..3] == b"GIF" {
        return "image/gif";
    }
    if head.len() >= 8 && &head[0..8] == b"\x89PNG\r\n\x1a\n" {
        return "image/png";
    }
    if head.len() >= 3 && &head[0..2] == b"\xFF\xD8" {
        return "image/jpeg";
    }
    if head.len() >= 12 && &head[0..4] == b"RIFF" && &head[8..12] == b"WEBP" {
        return "image/webp";
    }
    if head.len() >= 4 && (&head[0..4] == b"\x1A\x45\xDF\xA3") {
        return "video/webm";
    }
    if head.len() >= 8 && &head[4..8] == b"ftyp" {
        return "video/mp4";
    }
    if head.len() >= 3 && &head[0..3] == b"ID3" {
        return "audio/mpeg";
    }
    "application/octet-stream"
}

/// Whether the first bytes indicate an animated image. Three formats carry
/// an in-header or early-chunk animation signal cheap enough to check from
/// a 32-byte prefix:
/// - GIF: `GIF87a`/`GIF89a` magic is itself the animation indicator (a
///   single-frame GIF is rare enough in this system's traffic that the
///   distinction isn't worth a full frame-count parse).
/// - WEBP: `RIFF....WEBPVP8X` with the animation bit set in the VP8X flags
///   byte.
/// - PNG: presence of an `acTL` chunk (APNG) — not visible in the first 32
///   bytes in general, so a bare PNG prefix is treated as static; callers
///   that need APNG detection should inspect more of the stream.
pub fn is_animated(head: &[u8]) -> bool {
    if head.len() >= 6 && (&head[0..6] == b"GIF87a" || &head[0..6] == b"GIF89a") {
        return true;
    }
    if head.len() >= 21 && &head[0..4] == b"RIFF" && &head[8..15] == b"WEBPVP8" && head[15] == b'X' {
        // VP8X flags byte: bit 1 (0x02) is the "has animation" flag.
        return head[20] & 0x02 != 0;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_gif_jpeg_png() {
        assert_eq!(detect_mime(b"GIF89a...."), "image/gif");
        assert_eq!(detect_mime(b"\xFF\xD8\xFF\xE0"), "image/jpeg");
        assert_eq!(detect_mime(b"\x89PNG\r\n\x1a\n\x00\x00"), "image/png");
        assert_eq!(detect_mime(b"not a known format"), "application/octet-stream");
    }

    #[test]
    fn gif_is_always_animated() {
        assert!(is_animated(b"GIF89a"));
        assert!(is_animated(b"GIF87a"));
        assert!(!is_animated(b"\xFF\xD8\xFF\xE0"));
    }

    #[test]
    fn webp_animation_bit_is_respected() {
        let mut animated = b"RIFF\x00\x00\x00\x00WEBPVP8X".to_vec();
        animated.extend_from_slice(&[0x02, 0, 0, 0, 0, 0]);
        assert!(is_animated(&animated));

        let mut still = b"RIFF\x00\x00\x00\x00WEBPVP8X".to_vec();
        still.extend_from_slice(&[0x00, 0, 0, 0, 0, 0]);
        assert!(!is_animated(&still));
    }
}
