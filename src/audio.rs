//! PCM audio constants and helpers shared by the client protocol and the
//! upstream adapter.

use base64::Engine;

/// Client microphone input: 16kHz, 16-bit little-endian, mono PCM.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;
/// Upstream voice output: 24kHz, 16-bit little-endian, mono PCM.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Builds the MIME type for raw PCM at the given sample rate.
pub fn pcm_mime(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}

/// True for any raw PCM MIME type, regardless of the rate parameter.
pub fn is_pcm_mime(mime: &str) -> bool {
    mime.starts_with("audio/pcm")
}

pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn decode_base64(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD.decode(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_mime_embeds_rate() {
        assert_eq!(pcm_mime(INPUT_SAMPLE_RATE), "audio/pcm;rate=16000");
        assert_eq!(pcm_mime(OUTPUT_SAMPLE_RATE), "audio/pcm;rate=24000");
    }

    #[test]
    fn is_pcm_mime_matches_any_rate() {
        assert!(is_pcm_mime("audio/pcm;rate=16000"));
        assert!(is_pcm_mime("audio/pcm;rate=48000"));
        assert!(is_pcm_mime("audio/pcm"));
        assert!(!is_pcm_mime("audio/ogg"));
        assert!(!is_pcm_mime("application/json"));
    }

    #[test]
    fn base64_round_trip() {
        let pcm: Vec<u8> = vec![0x00, 0x40, 0x00, 0x80, 0x7f, 0xff];
        let encoded = encode_base64(&pcm);
        let decoded = decode_base64(&encoded).expect("valid base64");
        assert_eq!(decoded, pcm);

        // Empty payloads round-trip too.
        assert!(decode_base64(&encode_base64(&[])).unwrap().is_empty());
    }

    #[test]
    fn decode_rejects_invalid_input() {
        assert!(decode_base64("not base64!").is_err());
    }
}
