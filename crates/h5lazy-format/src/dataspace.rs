//! Dataspace message (type 0x0001).

use crate::cursor::Cursor;
use crate::error::{Error, Result};
use crate::source::ByteSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataspaceType {
    Scalar,
    Simple,
    Null,
}

/// Shape of a dataset or attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataspace {
    pub space_type: DataspaceType,
    pub dimensions: Vec<u64>,
    /// Maximum sizes; unlimited dimensions read as `u64::MAX`.
    pub max_dimensions: Option<Vec<u64>>,
    /// Version 1 permutation indices, when stored.
    pub permutation: Option<Vec<u64>>,
}

impl Dataspace {
    pub fn parse<S: ByteSource>(c: &mut Cursor<S>) -> Result<Dataspace> {
        let version = c.read_version("dataspace", &[1, 2])?;
        let rank = usize::from(c.read_u8()?);
        let flags = c.read_u8()?;
        let space_type = if version == 1 {
            c.skip(5);
            if rank == 0 {
                DataspaceType::Scalar
            } else {
                DataspaceType::Simple
            }
        } else {
            match c.read_u8()? {
                0 => DataspaceType::Scalar,
                1 => DataspaceType::Simple,
                2 => DataspaceType::Null,
                other => {
                    return Err(Error::malformed(
                        "dataspace",
                        format!("unknown dataspace type {other}"),
                    ))
                }
            }
        };

        let lengths = |c: &mut Cursor<S>| -> Result<Vec<u64>> {
            (0..rank).map(|_| c.read_length()).collect()
        };
        let dimensions = lengths(c)?;
        let max_dimensions = if flags & 0x01 != 0 {
            Some(lengths(c)?)
        } else {
            None
        };
        let permutation = if version == 1 && flags & 0x02 != 0 {
            Some(lengths(c)?)
        } else {
            None
        };

        Ok(Dataspace {
            space_type,
            dimensions,
            max_dimensions,
            permutation,
        })
    }

    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }

    /// Number of elements. Scalar is 1, null is 0.
    pub fn num_elements(&self) -> u64 {
        match self.space_type {
            DataspaceType::Null => 0,
            DataspaceType::Scalar => 1,
            DataspaceType::Simple => self
                .dimensions
                .iter()
                .try_fold(1u64, |acc, &d| acc.checked_mul(d))
                .unwrap_or(u64::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::FieldWidths;

    fn parse(buf: &[u8]) -> Result<Dataspace> {
        Dataspace::parse(&mut Cursor::with_widths(buf, FieldWidths::new(8, 8).unwrap()))
    }

    fn v1(rank: u8, flags: u8, dims: &[u64]) -> Vec<u8> {
        let mut buf = vec![1, rank, flags, 0, 0, 0, 0, 0];
        for d in dims {
            buf.extend_from_slice(&d.to_le_bytes());
        }
        buf
    }

    #[test]
    fn v1_simple_with_max() {
        let buf = v1(2, 0x01, &[10, 20, 10, u64::MAX]);
        let ds = parse(&buf).unwrap();
        assert_eq!(ds.space_type, DataspaceType::Simple);
        assert_eq!(ds.dimensions, vec![10, 20]);
        assert_eq!(ds.max_dimensions, Some(vec![10, u64::MAX]));
        assert_eq!(ds.num_elements(), 200);
    }

    #[test]
    fn v1_scalar_and_permutation() {
        assert_eq!(parse(&v1(0, 0, &[])).unwrap().space_type, DataspaceType::Scalar);
        let ds = parse(&v1(1, 0x02, &[4, 0])).unwrap();
        assert_eq!(ds.permutation, Some(vec![0]));
    }

    #[test]
    fn v2_null() {
        let ds = parse(&[2, 0, 0, 2]).unwrap();
        assert_eq!(ds.space_type, DataspaceType::Null);
        assert_eq!(ds.num_elements(), 0);
    }

    #[test]
    fn v2_scalar_has_one_element() {
        let ds = parse(&[2, 0, 0, 0]).unwrap();
        assert_eq!(ds.num_elements(), 1);
        assert_eq!(ds.rank(), 0);
    }

    #[test]
    fn truncated_dimensions_fail() {
        let mut buf = vec![2, 2, 0, 1];
        buf.extend_from_slice(&5u64.to_le_bytes());
        assert!(parse(&buf).is_err());
    }

    #[test]
    fn bad_version_and_type() {
        assert!(parse(&[3, 0, 0, 0]).is_err());
        assert!(parse(&[2, 0, 0, 7]).is_err());
    }
}
