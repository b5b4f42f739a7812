use crate::delta::{Delta, DeltaOp, ReadAt};
use crate::error::{Error, Result};

/// apply a delta to a fully materialized base buffer
pub fn apply_delta(base: &[u8], delta: &Delta) -> Result<Vec<u8>> {
    if delta.base_size != base.len() as u64 {
        return Err(Error::DeltaSizeMismatch {
            expected: delta.base_size,
            actual: base.len() as u64,
        });
    }

    let mut out = Vec::with_capacity(delta.result_size as usize);
    for op in &delta.ops {
        match op {
            DeltaOp::Copy { offset, len } => {
                let start = *offset as usize;
                let end = start + *len as usize;
                let slice = base.get(start..end).ok_or_else(|| {
                    Error::CorruptObjectMessage(format!(
                        "delta copy {}..{} outside base of {} bytes",
                        start,
                        end,
                        base.len()
                    ))
                })?;
                out.extend_from_slice(slice);
            }
            DeltaOp::Insert(data) => out.extend_from_slice(data),
        }
    }

    if out.len() as u64 != delta.result_size {
        return Err(Error::CorruptObjectMessage(format!(
            "delta produced {} bytes, header promised {}",
            out.len(),
            delta.result_size
        )));
    }

    Ok(out)
}

/// where one reconstructed span comes from
#[derive(Clone, Copy, Debug)]
enum SpanSource {
    /// read from the base at this offset
    Copy { base_offset: u64 },
    /// read from the literal bytes of op `op`
    Insert { op: usize },
}

#[derive(Clone, Copy, Debug)]
struct Span {
    result_start: u64,
    len: u64,
    source: SpanSource,
}

/// a delta analyzed once into positioned instructions, sorted by
/// result offset, enabling binary-searched random access
pub struct DeltaMap {
    spans: Vec<Span>,
    result_size: u64,
}

impl DeltaMap {
    pub fn build(delta: &Delta) -> Self {
        let mut spans = Vec::with_capacity(delta.ops.len());
        let mut result_start = 0u64;
        for (i, op) in delta.ops.iter().enumerate() {
            let len = op.len();
            let source = match op {
                DeltaOp::Copy { offset, .. } => SpanSource::Copy {
                    base_offset: *offset,
                },
                DeltaOp::Insert(_) => SpanSource::Insert { op: i },
            };
            spans.push(Span {
                result_start,
                len,
                source,
            });
            result_start += len;
        }
        Self {
            spans,
            result_size: result_start,
        }
    }

    pub fn result_size(&self) -> u64 {
        self.result_size
    }

    /// index of the first span overlapping `offset`
    fn span_at(&self, offset: u64) -> Option<usize> {
        if offset >= self.result_size {
            return None;
        }
        let idx = self
            .spans
            .partition_point(|span| span.result_start + span.len <= offset);
        (idx < self.spans.len()).then_some(idx)
    }

    /// read into `buf` at `offset` of the reconstructed content,
    /// pulling sub-slices from `base` or from the delta literals
    pub fn read_at(
        &self,
        delta: &Delta,
        base: &dyn ReadAt,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize> {
        let mut filled = 0usize;
        let mut idx = match self.span_at(offset) {
            Some(idx) => idx,
            None => return Ok(0),
        };

        while filled < buf.len() && idx < self.spans.len() {
            let span = self.spans[idx];
            let pos = offset + filled as u64;
            debug_assert!(pos >= span.result_start);
            let within = pos - span.result_start;
            let want = ((span.len - within) as usize).min(buf.len() - filled);

            match span.source {
                SpanSource::Copy { base_offset } => {
                    let n = base.read_at(base_offset + within, &mut buf[filled..filled + want])?;
                    if n == 0 {
                        return Err(Error::CorruptObjectMessage(
                            "delta copy reads past end of base".to_string(),
                        ));
                    }
                    filled += n;
                    // a short base read re-enters the same span
                    if n < want {
                        continue;
                    }
                }
                SpanSource::Insert { op } => {
                    let data = match &delta.ops[op] {
                        DeltaOp::Insert(data) => data,
                        DeltaOp::Copy { .. } => unreachable!("span source points at insert"),
                    };
                    let start = within as usize;
                    buf[filled..filled + want].copy_from_slice(&data[start..start + want]);
                    filled += want;
                }
            }
            idx += 1;
        }

        Ok(filled)
    }
}

/// random-access reader over delta-reconstructed content
///
/// chains: the base may itself be a `DeltaReader`, so offset reads
/// walk down the delta stack without materializing intermediate
/// targets.
pub struct DeltaReader<B> {
    base: B,
    delta: Delta,
    map: DeltaMap,
}

impl<B: ReadAt> DeltaReader<B> {
    pub fn new(base: B, delta: Delta) -> Result<Self> {
        if delta.base_size != base.len() {
            return Err(Error::DeltaSizeMismatch {
                expected: delta.base_size,
                actual: base.len(),
            });
        }
        let map = DeltaMap::build(&delta);
        Ok(Self { base, delta, map })
    }

    /// materialize the full reconstructed content
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        super::read_range(self, 0, self.len() as usize)
    }
}

impl<B: ReadAt> ReadAt for DeltaReader<B> {
    fn len(&self) -> u64 {
        self.map.result_size()
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.map.read_at(&self.delta, &self.base, offset, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::{build_delta, read_range};

    #[test]
    fn test_apply_basic() {
        let base = b"hello cruel world";
        let delta = Delta::new(
            17,
            11,
            vec![
                DeltaOp::Copy { offset: 0, len: 6 },
                DeltaOp::Copy { offset: 12, len: 5 },
            ],
        );
        assert_eq!(apply_delta(base, &delta).unwrap(), b"hello world");
    }

    #[test]
    fn test_apply_insert() {
        let delta = Delta::new(0, 5, vec![DeltaOp::Insert(b"fresh".to_vec())]);
        assert_eq!(apply_delta(b"", &delta).unwrap(), b"fresh");
    }

    #[test]
    fn test_apply_rejects_base_size_mismatch() {
        let delta = Delta::new(100, 0, vec![]);
        assert!(matches!(
            apply_delta(b"short", &delta),
            Err(Error::DeltaSizeMismatch { .. })
        ));
    }

    #[test]
    fn test_apply_rejects_out_of_range_copy() {
        let delta = Delta::new(
            5,
            10,
            vec![DeltaOp::Copy {
                offset: 0,
                len: 10,
            }],
        );
        assert!(apply_delta(b"short", &delta).is_err());
    }

    #[test]
    fn test_apply_rejects_result_size_mismatch() {
        let delta = Delta::new(5, 99, vec![DeltaOp::Copy { offset: 0, len: 5 }]);
        assert!(apply_delta(b"short", &delta).is_err());
    }

    #[test]
    fn test_delta_reader_random_access() {
        let base = b"the quick brown fox jumps over the lazy dog".to_vec();
        let target = b"the quick red fox jumps over the lazy cat".to_vec();
        let delta = build_delta(&base, &target, 16);

        let reader = DeltaReader::new(base, delta).unwrap();
        assert_eq!(reader.len(), target.len() as u64);

        // whole content
        assert_eq!(reader.to_vec().unwrap(), target);

        // offset reads across span boundaries
        for (offset, len) in [(0usize, 5usize), (10, 10), (12, 20), (38, 3), (0, 41)] {
            let got = read_range(&reader, offset as u64, len).unwrap();
            assert_eq!(got, &target[offset..offset + len], "read {}+{}", offset, len);
        }

        // past the end
        let mut buf = [0u8; 4];
        assert_eq!(reader.read_at(1000, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_delta_reader_chain() {
        let v1 = b"state one: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa end".to_vec();
        let v2 = b"state two: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa end".to_vec();
        let v3 = b"state two: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaabbbbbbbb end".to_vec();

        let d12 = build_delta(&v1, &v2, 16);
        let d23 = build_delta(&v2, &v3, 16);

        let r2 = DeltaReader::new(v1, d12).unwrap();
        let r3 = DeltaReader::new(r2, d23).unwrap();

        assert_eq!(r3.to_vec().unwrap(), v3);
        assert_eq!(read_range(&r3, 11, 8).unwrap(), &v3[11..19]);
    }

    #[test]
    fn test_delta_map_binary_search() {
        let delta = Delta::new(
            10,
            9,
            vec![
                DeltaOp::Insert(b"abc".to_vec()),
                DeltaOp::Copy { offset: 2, len: 3 },
                DeltaOp::Insert(b"xyz".to_vec()),
            ],
        );
        let map = DeltaMap::build(&delta);
        assert_eq!(map.result_size(), 9);

        let base = b"0123456789".to_vec();
        let mut buf = [0u8; 9];
        let n = map.read_at(&delta, &base, 0, &mut buf).unwrap();
        assert_eq!(n, 9);
        assert_eq!(&buf, b"abc234xyz");

        let mut buf = [0u8; 3];
        map.read_at(&delta, &base, 4, &mut buf).unwrap();
        assert_eq!(&buf, b"34x");
    }
}
