use crate::args::ColumnType;
use rand::Rng;
use tokio_postgres::types::ToSql;
use uuid::Uuid;

/// A generated key or value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvValue {
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Int(i64),
    String(String),
}

impl KvValue {
    /// Generate a random value of type `ty`. `size` is the length of
    /// `bytes` and `string` values and is ignored for the others.
    pub fn random<R: Rng>(rng: &mut R, ty: ColumnType, size: usize) -> Self {
        match ty {
            ColumnType::Bytes => {
                let mut bytes = vec![0u8; size];
                rng.fill(bytes.as_mut_slice());
                KvValue::Bytes(bytes)
            }
            ColumnType::Uuid => {
                KvValue::Uuid(uuid::Builder::from_random_bytes(rng.random()).into_uuid())
            }
            ColumnType::Int => KvValue::Int(rng.random_range(0..=i64::MAX)),
            ColumnType::String => {
                KvValue::String((0..size).map(|_| printable(rng.random::<u8>())).collect())
            }
        }
    }

    pub fn as_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            KvValue::Bytes(v) => v,
            KvValue::Uuid(v) => v,
            KvValue::Int(v) => v,
            KvValue::String(v) => v,
        }
    }
}

/// Map a random byte onto `[a-z0-9A-Z]`, lower case twice as likely as digits.
fn printable(b: u8) -> char {
    match b {
        0..=112 => (b'a' + b % 26) as char,
        113..=142 => (b'0' + (b - 113) % 10) as char,
        _ => (b'A' + (b - 143) % 26) as char,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes_and_types() {
        let mut rng = rand::rng();
        match KvValue::random(&mut rng, ColumnType::Bytes, 32) {
            KvValue::Bytes(b) => assert_eq!(b.len(), 32),
            other => panic!("unexpected {other:?}"),
        }
        match KvValue::random(&mut rng, ColumnType::String, 16) {
            KvValue::String(s) => {
                assert_eq!(s.len(), 16);
                assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
            }
            other => panic!("unexpected {other:?}"),
        }
        match KvValue::random(&mut rng, ColumnType::Int, 0) {
            KvValue::Int(i) => assert!(i >= 0),
            other => panic!("unexpected {other:?}"),
        }
        match KvValue::random(&mut rng, ColumnType::Uuid, 0) {
            KvValue::Uuid(u) => assert_eq!(u.get_version_num(), 4),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_printable_covers_every_byte() {
        for b in 0..=u8::MAX {
            assert!(printable(b).is_ascii_alphanumeric(), "byte {b}");
        }
        assert_eq!(printable(0), 'a');
        assert_eq!(printable(113), '0');
        assert_eq!(printable(143), 'A');
        assert_eq!(printable(255), 'I');
    }
}
