//! A best-effort reader for the legacy per-cloud descriptor file format
//! (§6.2): little-endian `int32 N`, `int32 D`, then `N` records of
//! `[3x float32 xyz][D x float32 descriptor]`. The xyz triplet is discarded;
//! point positions are expected to come from the point-cloud file instead.
//!
//! This is a convenience on top of the registration core, not part of the
//! algorithm itself — the core only ever consumes an already-built
//! [`FeatureMatrix`].

use std::io::Read;

use nalgebra::DMatrix;

use crate::error::{Error, Result};
use crate::types::FeatureMatrix;

/// Reads a legacy descriptor file from `reader`, returning a D×N
/// [`FeatureMatrix`] (column `j` is the descriptor of point `j`).
pub fn read_feature_file(mut reader: impl Read) -> Result<FeatureMatrix> {
    let n = read_i32(&mut reader)? as usize;
    let d = read_i32(&mut reader)? as usize;

    if n == 0 || d == 0 {
        return Err(Error::EmptyInput);
    }

    let mut data = DMatrix::<f64>::zeros(d, n);
    let mut xyz = [0u8; 12];
    let mut descriptor_bytes = vec![0u8; d * 4];

    for j in 0..n {
        reader
            .read_exact(&mut xyz)
            .map_err(|_| truncated_error(j, n))?;
        reader
            .read_exact(&mut descriptor_bytes)
            .map_err(|_| truncated_error(j, n))?;
        for k in 0..d {
            let bytes: [u8; 4] = descriptor_bytes[k * 4..k * 4 + 4].try_into().unwrap();
            data[(k, j)] = f32::from_le_bytes(bytes) as f64;
        }
    }

    Ok(data)
}

fn read_i32(reader: &mut impl Read) -> Result<i32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes).map_err(|e| {
        Error::IoFailure(std::io::Error::new(
            e.kind(),
            "truncated descriptor file header",
        ))
    })?;
    Ok(i32::from_le_bytes(bytes))
}

fn truncated_error(read: usize, expected: usize) -> Error {
    Error::IoFailure(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        format!("descriptor file truncated after record {read} of {expected}"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_file(records: &[(f32, f32, f32, &[f32])]) -> Vec<u8> {
        let d = records[0].3.len();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(records.len() as i32).to_le_bytes());
        bytes.extend_from_slice(&(d as i32).to_le_bytes());
        for (x, y, z, desc) in records {
            bytes.extend_from_slice(&x.to_le_bytes());
            bytes.extend_from_slice(&y.to_le_bytes());
            bytes.extend_from_slice(&z.to_le_bytes());
            for v in *desc {
                bytes.extend_from_slice(&v.to_le_bytes());
            }
        }
        bytes
    }

    #[test]
    fn reads_descriptor_columns_and_drops_xyz() {
        let bytes = encode_file(&[
            (1.0, 2.0, 3.0, &[0.5, 1.5, 2.5]),
            (4.0, 5.0, 6.0, &[3.5, 4.5, 5.5]),
        ]);
        let matrix = read_feature_file(bytes.as_slice()).unwrap();
        assert_eq!(matrix.nrows(), 3);
        assert_eq!(matrix.ncols(), 2);
        assert_eq!(matrix[(0, 0)], 0.5);
        assert_eq!(matrix[(2, 1)], 5.5);
    }

    #[test]
    fn truncated_file_is_an_io_failure() {
        let bytes = encode_file(&[(1.0, 2.0, 3.0, &[0.5, 1.5, 2.5])]);
        let truncated = &bytes[..bytes.len() - 2];
        assert!(matches!(read_feature_file(truncated), Err(Error::IoFailure(_))));
    }

    #[test]
    fn empty_header_is_empty_input() {
        let bytes = encode_file_header_only(0, 3);
        assert!(matches!(read_feature_file(bytes.as_slice()), Err(Error::EmptyInput)));
    }

    fn encode_file_header_only(n: i32, d: i32) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&n.to_le_bytes());
        bytes.extend_from_slice(&d.to_le_bytes());
        bytes
    }
}
