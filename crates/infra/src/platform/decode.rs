use std::io::Read;

use flate2::read::{GzDecoder, ZlibDecoder};
use tracing::debug;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Turns a response body into text. Compressed bodies are recognised by
/// their magic bytes regardless of `Content-Encoding`; anything that fails to
/// inflate is returned as lossy UTF-8.
pub fn decode_body(bytes: &[u8]) -> String {
    let inflated = if is_gzip(bytes) {
        inflate(GzDecoder::new(bytes))
    } else if is_zlib(bytes) {
        inflate(ZlibDecoder::new(bytes))
    } else {
        None
    };
    match inflated {
        Some(raw) => String::from_utf8_lossy(&raw).into_owned(),
        None => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn is_gzip(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

/// CMF/FLG pair of RFC 1950: deflate method and a header checksum that is a
/// multiple of 31.
fn is_zlib(bytes: &[u8]) -> bool {
    match bytes {
        [cmf, flg, ..] => {
            *cmf & 0x0f == 8 && *cmf >> 4 <= 7 && (u16::from(*cmf) << 8 | u16::from(*flg)) % 31 == 0
        }
        _ => false,
    }
}

fn inflate<R: Read>(mut decoder: R) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    match decoder.read_to_end(&mut out) {
        Ok(_) => Some(out),
        Err(err) => {
            debug!(error = %err, "body looked compressed but failed to inflate");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::{GzEncoder, ZlibEncoder};

    use super::decode_body;

    const BODY: &str = r#"{"code":0,"message":"0","data":{"text":"你好"}}"#;

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(decode_body(BODY.as_bytes()), BODY);
    }

    #[test]
    fn gzip_body_is_inflated() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(BODY.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();
        assert_eq!(decode_body(&compressed), BODY);
    }

    #[test]
    fn zlib_body_is_inflated() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(BODY.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();
        assert_eq!(decode_body(&compressed), BODY);
    }

    #[test]
    fn truncated_gzip_falls_back_to_raw() {
        let bytes = [0x1f, 0x8b, 0x08];
        let decoded = decode_body(&bytes);
        assert_eq!(decoded.as_bytes().len(), String::from_utf8_lossy(&bytes).len());
    }

    #[test]
    fn empty_body_is_empty_text() {
        assert_eq!(decode_body(&[]), "");
    }
}
