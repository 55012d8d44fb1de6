//! Table payload encoding: gzip'd JSON with a SHA-256 digest.

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rosterdb_core::Table;
use sha2::{Digest, Sha256};

use crate::error::{BackupError, Result};

/// A compressed table payload and its digest.
#[derive(Debug, Clone)]
pub struct EncodedTable {
    /// Compressed bytes as stored.
    pub bytes: Bytes,
    /// Lowercase hex SHA-256 of `bytes`.
    pub sha256: String,
}

/// Hex SHA-256 of a byte slice.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Serialize and compress a table.
pub fn encode_table(table: &Table) -> Result<EncodedTable> {
    let json = serde_json::to_vec(table)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;

    Ok(EncodedTable {
        sha256: sha256_hex(&compressed),
        bytes: Bytes::from(compressed),
    })
}

/// Verify, decompress and deserialize a table payload.
pub fn decode_table(backup_id: &str, table: &str, data: &[u8], expected_sha256: &str) -> Result<Table> {
    let actual = sha256_hex(data);
    if !actual.eq_ignore_ascii_case(expected_sha256) {
        return Err(BackupError::ChecksumMismatch {
            backup_id: backup_id.to_string(),
            table: table.to_string(),
            expected: expected_sha256.to_string(),
            actual,
        });
    }

    let mut json = Vec::new();
    GzDecoder::new(data).read_to_end(&mut json)?;
    Ok(serde_json::from_slice(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Table {
        Table::new("parents", ["ParentId", "Name"])
            .with_row(["P1", "Ada"])
            .with_row(["", "draft"])
    }

    #[test]
    fn test_encode_decode() {
        let encoded = encode_table(&table()).unwrap();
        assert_eq!(encoded.sha256.len(), 64);

        let decoded = decode_table("b1", "parents", &encoded.bytes, &encoded.sha256).unwrap();
        assert_eq!(decoded, table());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let encoded = encode_table(&table()).unwrap();
        let mut damaged = encoded.bytes.to_vec();
        let last = damaged.len() - 1;
        damaged[last] ^= 0xff;

        let err = decode_table("b1", "parents", &damaged, &encoded.sha256).unwrap_err();
        assert!(matches!(err, BackupError::ChecksumMismatch { ref table, .. } if table == "parents"));
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
