use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use bytes::Bytes;

const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Incremental decoder for a part's `Content-Transfer-Encoding`.
#[derive(Debug)]
pub(crate) enum TransferDecoder {
    /// `binary`, `7bit` and `8bit` bodies are passed through untouched.
    Identity,
    /// Holds the encoded text not yet aligned to a 4-character group.
    Base64 { pending: Vec<u8> },
    /// Fails as soon as body data shows up.
    Unsupported(String),
}

impl TransferDecoder {
    pub(crate) fn for_encoding(encoding: &str) -> TransferDecoder {
        match encoding {
            "binary" | "7bit" | "8bit" => TransferDecoder::Identity,
            "base64" => TransferDecoder::Base64 { pending: Vec::new() },
            other => TransferDecoder::Unsupported(other.to_owned()),
        }
    }

    pub(crate) fn decode(&mut self, data: &[u8]) -> crate::Result<Bytes> {
        match self {
            TransferDecoder::Identity => Ok(Bytes::copy_from_slice(data)),
            TransferDecoder::Base64 { pending } => {
                pending.extend(data.iter().copied().filter(|b| !b.is_ascii_whitespace()));

                let aligned = pending.len() / 4 * 4;
                if aligned == 0 {
                    return Ok(Bytes::new());
                }

                let decoded = decode_base64(&pending[..aligned])?;
                pending.drain(..aligned);

                Ok(decoded)
            }
            TransferDecoder::Unsupported(encoding) => Err(crate::Error::UnsupportedEncoding {
                encoding: encoding.clone(),
            }),
        }
    }

    /// Flushes whatever is left once the part ends.
    pub(crate) fn finish(&mut self) -> crate::Result<Bytes> {
        match self {
            TransferDecoder::Base64 { pending } if !pending.is_empty() => {
                let decoded = decode_base64(pending)?;
                pending.clear();
                Ok(decoded)
            }
            _ => Ok(Bytes::new()),
        }
    }
}

fn decode_base64(input: &[u8]) -> crate::Result<Bytes> {
    BASE64
        .decode(input)
        .map(Bytes::from)
        .map_err(|err| crate::Error::parse(format!("invalid base64 data in part body: {}", err)))
}
